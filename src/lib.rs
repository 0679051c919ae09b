use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::sync::mpsc;

pub mod backplane;
pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod session;
pub mod tools;

use backplane::orchestrator::BackplaneOrchestrator;
use backplane::{Backplane, BackplaneError, SessionDirectory};
use errors::AppError;
use mcp::message::JsonRpcMessage;
use session::registry::SessionRegistry;
use session::transport::ChannelTransport;
use session::{ClientId, InstanceId, Session, SessionToken};
use tools::ToolRegistry;

/// Where an accepted message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Local,
    Forwarded,
}

#[derive(Clone)]
pub struct AppState {
    instance_id: InstanceId,
    sessions: Arc<SessionRegistry>,
    backplane: Arc<dyn Backplane>,
}

impl AppState {
    /// Builds the instance state and publishes its sessions to the backplane.
    pub fn new(backplane: Arc<dyn Backplane>, tools: Arc<ToolRegistry>, keepalive_interval: Duration) -> Self {
        let sessions = Arc::new(SessionRegistry::with_keepalive(tools, keepalive_interval));
        let directory: Arc<dyn SessionDirectory> = sessions.clone();
        backplane.attach(directory);

        Self {
            instance_id: backplane.instance_id().clone(),
            sessions,
            backplane,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    pub fn backplane(&self) -> Arc<dyn Backplane> {
        Arc::clone(&self.backplane)
    }

    pub fn orchestrator(&self) -> BackplaneOrchestrator {
        BackplaneOrchestrator::new(self.sessions(), self.backplane())
    }

    /// Creates a session owned by this instance, returning its outbound channel.
    pub fn open_session(
        &self,
    ) -> Result<(Arc<Session>, mpsc::UnboundedReceiver<JsonRpcMessage>), AppError> {
        let (transport, outbound) = ChannelTransport::new();
        let session = self
            .sessions
            .create(ClientId::generate(), self.instance_id.clone(), Arc::new(transport))
            .map_err(|err| AppError::internal(err.to_string()))?;
        Ok((session, outbound))
    }

    /// Hands messages to the local session or forwards them to the owning instance.
    pub async fn route_messages(
        &self,
        token: &SessionToken,
        messages: Vec<JsonRpcMessage>,
    ) -> Result<Delivery, AppError> {
        if token.instance_id == self.instance_id {
            let session = self.sessions.try_get(&token.client_id).ok_or_else(|| {
                AppError::not_found("session_not_found", "no such session on this instance")
            })?;
            for message in messages {
                session
                    .dispatch(message)
                    .map_err(|_| AppError::not_found("session_not_found", "session is closed"))?;
            }
            return Ok(Delivery::Local);
        }

        for message in messages {
            self.backplane
                .send(message, &token.instance_id, &token.client_id)
                .await
                .map_err(|err| match err {
                    BackplaneError::UnknownInstance(_) => {
                        AppError::not_found("unknown_instance", "session owner is not reachable")
                    }
                    BackplaneError::SessionNotFound { .. } => {
                        AppError::not_found("session_not_found", "no such session on the owning instance")
                    }
                    other => AppError::internal(other.to_string()),
                })?;
        }
        Ok(Delivery::Forwarded)
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(http::handlers::SSE_ENDPOINT, get(http::handlers::sse_endpoint))
        .route(http::handlers::MESSAGE_ENDPOINT, post(http::handlers::message_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
