//! Instance-pinned client sessions
//!
//! A session belongs to the instance that created it for its whole lifetime.
//! Inbound messages are queued on the session's inbox and handled one at a time
//! in arrival order by a dedicated worker; a second task pings the client so
//! idle connections stay open.

pub mod registry;
pub mod transport;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mcp::message::{JsonRpcMessage, RequestId};
use crate::mcp::server::ServerHandle;
use crate::session::transport::Transport;
use crate::tools::ToolRegistry;

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(ClientId);
string_id!(InstanceId);

/// Out-of-band session identity: `<instance_id>:<client_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken {
    pub instance_id: InstanceId,
    pub client_id: ClientId,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("session token must look like <instance_id>:<client_id>")]
pub struct InvalidSessionToken;

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance_id, self.client_id)
    }
}

impl FromStr for SessionToken {
    type Err = InvalidSessionToken;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (instance_id, client_id) = value.trim().split_once(':').ok_or(InvalidSessionToken)?;
        if instance_id.is_empty() || client_id.is_empty() || client_id.contains(':') {
            return Err(InvalidSessionToken);
        }
        Ok(Self {
            instance_id: InstanceId::from(instance_id),
            client_id: ClientId::from(client_id),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(ClientId),
}

pub struct Session {
    client_id: ClientId,
    owner_instance_id: InstanceId,
    transport: Arc<dyn Transport>,
    tools: Arc<ToolRegistry>,
    server: Mutex<Option<Arc<ServerHandle>>>,
    inbox: mpsc::UnboundedSender<JsonRpcMessage>,
    pending_inbox: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcMessage>>>,
    keepalive_interval: Duration,
    keepalive_sequence: AtomicU64,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("owner_instance_id", &self.owner_instance_id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        client_id: ClientId,
        owner_instance_id: InstanceId,
        transport: Arc<dyn Transport>,
        tools: Arc<ToolRegistry>,
        keepalive_interval: Duration,
    ) -> Arc<Self> {
        let (inbox, pending_inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            client_id,
            owner_instance_id,
            transport,
            tools,
            server: Mutex::new(None),
            inbox,
            pending_inbox: Mutex::new(Some(pending_inbox)),
            keepalive_interval,
            keepalive_sequence: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        })
    }

    /// Spawns the inbox worker and the keepalive loop. Later calls are no-ops.
    pub(crate) fn start(self: &Arc<Self>) {
        let Some(inbox) = self.pending_inbox.lock().take() else {
            return;
        };

        tokio::spawn(Arc::clone(self).run_inbox(inbox));
        tokio::spawn(Arc::clone(self).run_keepalive());
        debug!(client_id = %self.client_id, "session started");
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn owner_instance_id(&self) -> &InstanceId {
        &self.owner_instance_id
    }

    pub fn token(&self) -> SessionToken {
        SessionToken {
            instance_id: self.owner_instance_id.clone(),
            client_id: self.client_id.clone(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// The protocol server for this session, created on first use.
    pub fn server_handle(&self) -> Option<Arc<ServerHandle>> {
        if self.is_disposed() {
            return None;
        }

        let mut server = self.server.lock();
        let handle = server.get_or_insert_with(|| {
            debug!(client_id = %self.client_id, "server handle created");
            Arc::new(ServerHandle::new(self.client_id.clone(), Arc::clone(&self.tools)))
        });
        Some(Arc::clone(handle))
    }

    pub fn has_server_handle(&self) -> bool {
        self.server.lock().is_some()
    }

    /// Queues a message for in-order handling without waiting for it.
    pub fn dispatch(&self, message: JsonRpcMessage) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Closed(self.client_id.clone()));
        }
        self.inbox
            .send(message)
            .map_err(|_| SessionError::Closed(self.client_id.clone()))
    }

    pub async fn handle_message(&self, message: JsonRpcMessage) {
        let Some(server) = self.server_handle() else {
            debug!(client_id = %self.client_id, "dropping message for disposed session");
            return;
        };

        match message {
            JsonRpcMessage::Request(request) => {
                let response = server.handle_request(request).await;
                self.send(response).await;
            }
            JsonRpcMessage::Notification(notification) => server.handle_notification(notification),
            JsonRpcMessage::Response(response) => {
                debug!(client_id = %self.client_id, id = %response.id, "client response received");
            }
            JsonRpcMessage::Error(error) => {
                warn!(
                    client_id = %self.client_id,
                    code = error.error.code,
                    message = %error.error.message,
                    "client reported error"
                );
            }
        }
    }

    pub async fn send(&self, message: JsonRpcMessage) {
        if let Err(err) = self.transport.send(message).await {
            warn!(client_id = %self.client_id, error = %err, "failed to send message to client");
        }
    }

    /// Cancels the worker tasks, closes the transport and drops the server handle.
    ///
    /// A message already being handled runs to completion.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();
        self.transport.close();
        let released = self.server.lock().take().is_some();
        info!(
            client_id = %self.client_id,
            instance_id = %self.owner_instance_id,
            server_handle_released = released,
            "session disposed"
        );
    }

    async fn run_inbox(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<JsonRpcMessage>) {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            self.handle_message(message).await;
        }

        debug!(client_id = %self.client_id, "session inbox stopped");
    }

    async fn run_keepalive(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.keepalive_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sequence = self.keepalive_sequence.fetch_add(1, Ordering::Relaxed);
            let ping = JsonRpcMessage::request(
                RequestId::String(format!("keepalive-{sequence}")),
                "ping",
                None,
            );

            if let Err(err) = self.transport.send(ping).await {
                warn!(client_id = %self.client_id, error = %err, "keepalive failed, stopping session tasks");
                self.cancel.cancel();
                break;
            }
        }

        debug!(client_id = %self.client_id, "session keepalive stopped");
    }
}
