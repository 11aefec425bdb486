use std::sync::Arc;

use mcp_dual_transport::{
    build_app,
    config::Config,
    logging,
    mcp::server::McpProcessor,
    session::{spawn_session_sweeper, EndReason, SessionRegistry},
    AppState,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let sessions = SessionRegistry::new_shared();
    let shutdown = CancellationToken::new();
    let sweeper = spawn_session_sweeper(
        Arc::clone(&sessions),
        config.sweep_interval,
        config.session_idle_timeout,
        shutdown.child_token(),
    );

    let state = AppState::new(&config, Arc::clone(&sessions), Arc::new(McpProcessor::new()));
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        modern_sessions = ?config.modern_sessions,
        idle_timeout_secs = config.session_idle_timeout.as_secs(),
        "server starting"
    );

    let signal_sessions = Arc::clone(&sessions);
    let signal_shutdown = shutdown.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
            signal_shutdown.cancel();
            // Open event streams never end on their own; closing them lets
            // the server drain.
            let closed = signal_sessions.close_all(EndReason::Shutdown);
            info!(sessions = closed, "shutdown requested");
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        warn!(error = %err, "session sweeper did not stop cleanly");
    }
    info!("server stopped");
    Ok(())
}
