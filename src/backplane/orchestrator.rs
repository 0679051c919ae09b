//! Feeds backplane traffic into local sessions

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backplane::{Backplane, BackplaneError};
use crate::session::registry::SessionRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("failed to subscribe to backplane: {0}")]
    Subscribe(#[from] BackplaneError),
}

pub struct BackplaneOrchestrator {
    sessions: Arc<SessionRegistry>,
    backplane: Arc<dyn Backplane>,
}

impl BackplaneOrchestrator {
    pub fn new(sessions: Arc<SessionRegistry>, backplane: Arc<dyn Backplane>) -> Self {
        Self { sessions, backplane }
    }

    pub fn spawn(self) -> JoinHandle<Result<(), OrchestratorError>> {
        tokio::spawn(self.run())
    }

    /// Runs until the backplane stream ends.
    ///
    /// Senders are checked against this instance's sessions before a message
    /// is queued, so a miss here means the session closed while the message
    /// was in flight. Such messages are dropped.
    pub async fn run(self) -> Result<(), OrchestratorError> {
        let mut stream = self.backplane.subscribe()?;
        let instance_id = self.backplane.instance_id().clone();
        info!(instance_id = %instance_id, "backplane orchestrator started");

        while let Some(delivery) = stream.next().await {
            let Some(session) = self.sessions.try_get(&delivery.client_id) else {
                warn!(
                    instance_id = %instance_id,
                    client_id = %delivery.client_id,
                    "dropping backplane message for closed session"
                );
                continue;
            };

            if let Err(err) = session.dispatch(delivery.message) {
                warn!(client_id = %delivery.client_id, error = %err, "failed to dispatch backplane message");
            }
        }

        info!(instance_id = %instance_id, "backplane orchestrator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backplane::in_process::InProcessBackplane;
    use crate::mcp::message::{JsonRpcMessage, RequestId};
    use crate::session::transport::ChannelTransport;
    use crate::session::{ClientId, InstanceId};
    use crate::tools::ToolRegistry;

    fn sessions() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::with_keepalive(
            Arc::new(ToolRegistry::new()),
            Duration::from_secs(300),
        ))
    }

    #[tokio::test]
    async fn delivers_to_local_session_and_stops_when_closed() {
        let sessions = sessions();
        let backplane = Arc::new(InProcessBackplane::standalone(InstanceId::from("a")));
        let (transport, mut outbound) = ChannelTransport::new();
        sessions
            .create(ClientId::from("c1"), InstanceId::from("a"), Arc::new(transport))
            .expect("session");

        let handle = BackplaneOrchestrator::new(Arc::clone(&sessions), backplane.clone()).spawn();

        backplane
            .send(
                JsonRpcMessage::request(RequestId::Integer(3), "ping", None),
                &InstanceId::from("a"),
                &ClientId::from("c1"),
            )
            .await
            .expect("send");

        let response = outbound.recv().await.expect("pong");
        assert_eq!(response.id(), Some(&RequestId::Integer(3)));
        assert!(!response.is_error());

        backplane.close();
        assert_eq!(handle.await.expect("join"), Ok(()));
    }

    #[tokio::test]
    async fn message_for_missing_session_is_dropped_and_loop_continues() {
        let sessions = sessions();
        let backplane = Arc::new(InProcessBackplane::standalone(InstanceId::from("a")));
        let (transport, mut outbound) = ChannelTransport::new();
        sessions
            .create(ClientId::from("c1"), InstanceId::from("a"), Arc::new(transport))
            .expect("session");
        let handle = BackplaneOrchestrator::new(Arc::clone(&sessions), backplane.clone()).spawn();

        for (client, id) in [("ghost", 1), ("c1", 2)] {
            backplane
                .send(
                    JsonRpcMessage::request(RequestId::Integer(id), "ping", None),
                    &InstanceId::from("a"),
                    &ClientId::from(client),
                )
                .await
                .expect("send");
        }

        let response = outbound.recv().await.expect("pong");
        assert_eq!(response.id(), Some(&RequestId::Integer(2)));
        assert!(!handle.is_finished());

        backplane.close();
        assert_eq!(handle.await.expect("join"), Ok(()));
    }

    #[tokio::test]
    async fn second_subscription_fails_to_start() {
        let backplane = Arc::new(InProcessBackplane::standalone(InstanceId::from("a")));
        let _stream = backplane.subscribe().expect("first subscription");

        let result = BackplaneOrchestrator::new(sessions(), backplane).run().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Subscribe(BackplaneError::AlreadySubscribed(_)))
        ));
    }
}
