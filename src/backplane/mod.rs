//! Cross-instance message routing
//!
//! A backplane carries client messages to the instance that owns the client's
//! session. Each instance subscribes exactly once and receives only messages
//! addressed to it.

pub mod in_process;
pub mod orchestrator;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mcp::message::JsonRpcMessage;
use crate::session::{ClientId, InstanceId};

/// Envelope routed between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackplaneMessage {
    pub client_id: ClientId,
    pub message: JsonRpcMessage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackplaneError {
    #[error("no instance {0} is connected to the backplane")]
    UnknownInstance(InstanceId),
    #[error("backplane for instance {0} is closed")]
    Closed(InstanceId),
    #[error("instance {0} is already subscribed")]
    AlreadySubscribed(InstanceId),
    #[error("instance {0} is already connected to the backplane")]
    DuplicateInstance(InstanceId),
    #[error("instance {owner} holds no session {client_id}")]
    SessionNotFound { owner: InstanceId, client_id: ClientId },
}

/// The set of sessions an instance owns, as seen by the backplane.
pub trait SessionDirectory: Send + Sync {
    fn contains(&self, client_id: &ClientId) -> bool;
}

pub type BackplaneStream = BoxStream<'static, BackplaneMessage>;

#[async_trait]
pub trait Backplane: Send + Sync {
    fn instance_id(&self) -> &InstanceId;

    /// Delivers `message` to the instance that owns `client_id`.
    async fn send(
        &self,
        message: JsonRpcMessage,
        owner: &InstanceId,
        client_id: &ClientId,
    ) -> Result<(), BackplaneError>;

    /// Publishes the sessions this instance owns. Sends for a client id the
    /// directory does not contain are refused with
    /// [`BackplaneError::SessionNotFound`].
    fn attach(&self, directory: Arc<dyn SessionDirectory>);

    /// Stream of messages addressed to this instance. Can be taken once.
    fn subscribe(&self) -> Result<BackplaneStream, BackplaneError>;

    /// Stops accepting messages for this instance and ends its stream.
    fn close(&self);
}
