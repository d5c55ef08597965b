//! Thin HTTP transport for Elasticsearch and OpenSearch.
//!
//! The two dialects share every query and response shape; what differs is
//! captured in [`ElasticFlavor`]'s two functions — payload unwrapping and
//! not-found detection — so the engine above can stay identical.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElasticFlavor {
    Elasticsearch,
    OpenSearch,
}

impl ElasticFlavor {
    /// OpenSearch deployments fronted by SDK-style proxies wrap the payload
    /// in a `body` envelope next to transport metadata; lift it out.
    pub fn unwrap_body(&self, value: Value) -> Value {
        match self {
            ElasticFlavor::Elasticsearch => value,
            ElasticFlavor::OpenSearch => match value {
                Value::Object(mut map)
                    if map.contains_key("body")
                        && map.keys().all(|k| {
                            matches!(k.as_str(), "body" | "statusCode" | "headers" | "meta")
                        }) =>
                {
                    map.remove("body").unwrap_or(Value::Null)
                }
                other => other,
            },
        }
    }

    /// Where the 404 signal lives differs between the dialects.
    pub fn is_not_found(&self, status: StatusCode, body: &Value) -> bool {
        if status == StatusCode::NOT_FOUND {
            return true;
        }
        match self {
            ElasticFlavor::Elasticsearch => {
                body.get("status").and_then(Value::as_i64) == Some(404)
            }
            ElasticFlavor::OpenSearch => {
                body.get("statusCode").and_then(Value::as_i64) == Some(404)
                    || body.pointer("/body/status").and_then(Value::as_i64) == Some(404)
            }
        }
    }
}

#[derive(Clone)]
pub struct ElasticClient {
    base_url: String,
    http: Client,
    flavor: ElasticFlavor,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
}

impl ElasticClient {
    pub fn new(
        host: &str,
        flavor: ElasticFlavor,
        username: Option<String>,
        password: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: host.trim_end_matches('/').to_string(),
            http,
            flavor,
            username,
            password,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("ApiKey {key}"));
        } else if let Some(user) = &self.username {
            builder = builder.basic_auth(user, self.password.as_deref());
        }
        builder
    }

    /// Pull the most useful message out of an error body.
    fn error_message(body: &Value) -> Option<String> {
        body.pointer("/error/reason")
            .and_then(Value::as_str)
            .or_else(|| body.get("error").and_then(Value::as_str))
            .or_else(|| body.get("message").and_then(Value::as_str))
            .map(str::to_string)
    }

    async fn send(&self, builder: RequestBuilder, target: &str) -> Result<(StatusCode, Value)> {
        let resp = builder.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        if !status.is_success() && !self.flavor.is_not_found(status, &body) {
            let message = Self::error_message(&body).unwrap_or_else(|| {
                let mut preview = text;
                preview.truncate(500);
                preview
            });
            tracing::event!(
                target: "elastic.request",
                tracing::Level::ERROR,
                http.status = %status,
                op = target,
                error.message = %message,
                "backend request failed"
            );
            return Err(GatewayError::Backend(message));
        }
        Ok((status, body))
    }

    pub async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        let (status, resp) = self
            .send(
                self.request(Method::POST, &format!("{index}/_search")).json(body),
                "search",
            )
            .await?;
        if !status.is_success() {
            return Err(GatewayError::Backend(
                Self::error_message(&resp).unwrap_or_else(|| format!("search failed ({status})")),
            ));
        }
        Ok(self.flavor.unwrap_body(resp))
    }

    /// Single-index document fetch. `None` on a 404.
    pub async fn get_doc(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let path = format!("{index}/_doc/{}", urlencoding::encode(id));
        let (status, body) = self.send(self.request(Method::GET, &path), "get").await?;
        if self.flavor.is_not_found(status, &body) {
            return Ok(None);
        }
        Ok(Some(self.flavor.unwrap_body(body)))
    }

    pub async fn mapping(&self, index: &str) -> Result<Value> {
        let (status, body) = self
            .send(self.request(Method::GET, &format!("{index}/_mapping")), "mapping")
            .await?;
        if !status.is_success() {
            return Err(GatewayError::Backend(
                Self::error_message(&body).unwrap_or_else(|| format!("mapping failed ({status})")),
            ));
        }
        Ok(self.flavor.unwrap_body(body))
    }
}
