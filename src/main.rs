use std::error::Error;
use std::sync::Arc;

use mcp_session_backplane::{
    backplane::in_process::InProcessBackplane, backplane::orchestrator::OrchestratorError, build_app,
    config::Config, logging, session::registry::SessionRegistry,
    tools::builtin::register_builtin_tools, tools::ToolRegistry, AppState,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools)?;

    let backplane = Arc::new(InProcessBackplane::standalone(config.instance_id.clone()));
    let state = AppState::new(backplane, tools, config.keepalive_interval);
    let shutdown = CancellationToken::new();
    let orchestrator = tokio::spawn(watch_orchestrator(
        state.orchestrator().spawn(),
        shutdown.clone(),
    ));

    let app = build_app(state.clone());
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        instance_id = %config.instance_id,
        keepalive_secs = config.keepalive_interval.as_secs(),
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(state.sessions(), shutdown.clone()))
        .await?;

    shutdown.cancel();
    state.backplane().close();
    orchestrator.await??;
    info!("server stopped");
    Ok(())
}

/// Stops the server when the orchestrator ends before shutdown was requested.
async fn watch_orchestrator(
    handle: JoinHandle<Result<(), OrchestratorError>>,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let outcome = handle.await;
    if !shutdown.is_cancelled() {
        error!(outcome = ?outcome, "backplane orchestrator stopped unexpectedly");
        shutdown.cancel();
    }
    outcome??;
    Ok(())
}

/// Resolves on Ctrl-C or an orchestrator failure after closing every session
/// so open SSE streams end.
async fn shutdown_signal(sessions: Arc<SessionRegistry>, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("shutdown requested"),
        () = shutdown.cancelled() => warn!("shutting down without a running orchestrator"),
    }
    shutdown.cancel();

    let closed = sessions.close_all();
    info!(sessions = closed, "sessions closed");
}
