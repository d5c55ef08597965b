use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Parameter name plus the first validator message.
    #[error("{0}: {1}")]
    InvalidParameter(String, String),
    #[error("Index \"{0}\" not found")]
    IndexNotFound(String),
    #[error("Document not found")]
    DocumentNotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Backend(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidParameter(..) => StatusCode::BAD_REQUEST,
            GatewayError::IndexNotFound(_) | GatewayError::DocumentNotFound => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Config(_)
            | GatewayError::Backend(_)
            | GatewayError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "gateway.error", error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
