use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderValue, Request};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing_subscriber::{fmt, EnvFilter};

use search_gateway::cache::ResultCache;
use search_gateway::config::GatewayConfig;
use search_gateway::engines::build_registry;
use search_gateway::handlers::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::from_default_env().add_directive("info".parse().unwrap());
    fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .init();

    let config_path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "config.yaml".to_string())
        .into();
    let config = GatewayConfig::load(&config_path)?;
    tracing::info!(
        config = %config_path.display(),
        indexes = config.indexes.len(),
        auth = config.api_key.is_some(),
        "loaded config"
    );

    let cache = match std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()) {
        Some(url) => ResultCache::connect(&url).await,
        None => {
            tracing::info!("REDIS_URL not set; result cache disabled");
            ResultCache::disabled()
        }
    };

    let state = Arc::new(AppState {
        indexes: build_registry(&config)?,
        cache,
        api_key: config.api_key.clone(),
    });

    let mut app = handlers::router(state);
    if let Some(origins) = &config.cors_origins {
        let list = origins.to_vec();
        let cors = if list.iter().any(|o| o == "*") {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let parsed: Vec<HeaderValue> =
                list.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new().allow_origin(parsed).allow_methods(Any).allow_headers(Any)
        };
        app = app.layer(cors);
    }
    let app = app.layer(
        TraceLayer::new_for_http()
            .on_request(DefaultOnRequest::new().level(tracing::Level::INFO))
            .on_response(DefaultOnResponse::new().level(tracing::Level::INFO))
            .make_span_with(|req: &Request<_>| {
                let id = nanoid::nanoid!(8);
                tracing::info_span!(
                    "http.request",
                    req.id = %id,
                    http.method = %req.method(),
                    http.path = %req.uri().path(),
                )
            }),
    );

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    tracing::info!("search-gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
