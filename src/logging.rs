use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::http::SESSION_HEADER;

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// One summary line per request. Streaming responses are summarised when the
/// stream is handed back, not when it ends.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();
    let session_id = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    info!(
        method = %method,
        path = %redact_path(&path),
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        session_id = %session_id,
        "request summary"
    );

    if status.as_u16() == 401 {
        warn!(method = %method, path = %redact_path(&path), "credential resolution failed");
    }

    response
}

/// Credentials may travel as a path segment under the primary endpoint.
fn redact_path(path: &str) -> &str {
    match path.strip_prefix("/mcp/") {
        Some(rest) if !rest.is_empty() => "/mcp/[REDACTED]",
        _ => path,
    }
}
