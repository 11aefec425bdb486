use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use chrono::{DateTime, Utc};

pub mod config;
pub mod credential;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod processor;
pub mod session;

use config::{Config, ModernSessionPolicy};
use credential::CredentialBinder;
use processor::MessageProcessor;
use session::SessionRegistry;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub keep_alive_interval: Duration,
    pub channel_capacity: usize,
    pub modern_sessions: ModernSessionPolicy,
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub processor: Arc<dyn MessageProcessor>,
    pub credentials: Arc<CredentialBinder>,
    pub settings: Arc<TransportSettings>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: &Config,
        sessions: Arc<SessionRegistry>,
        processor: Arc<dyn MessageProcessor>,
    ) -> Self {
        Self {
            sessions,
            processor,
            credentials: Arc::new(CredentialBinder::new(
                config.credential_header.clone(),
                config.default_credential.clone(),
            )),
            settings: Arc::new(TransportSettings {
                keep_alive_interval: config.keep_alive_interval,
                channel_capacity: config.channel_capacity.max(1),
                modern_sessions: config.modern_sessions,
            }),
            started_at: Utc::now(),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(http::PRIMARY_PATH, any(http::router::primary_endpoint))
        .route(
            "/mcp/{credential}",
            any(http::router::primary_endpoint_with_credential),
        )
        .route(http::MESSAGE_PATH, any(http::router::message_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
