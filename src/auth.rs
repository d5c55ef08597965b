//! Bearer-token authentication middleware.
//!
//! When an API key is configured every path except `/health` requires
//! `Authorization: Bearer <key>`; the prefix must be literally `"Bearer "`.
//! With no key configured the middleware passes everything through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::GatewayError;
use crate::handlers::AppState;

pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if token == expected => next.run(req).await,
        _ => GatewayError::Unauthorized.into_response(),
    }
}
