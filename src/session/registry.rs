//! Sessions owned by this instance, keyed by client id

use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use thiserror::Error;
use tracing::{debug, info};

use crate::backplane::SessionDirectory;
use crate::session::transport::Transport;
use crate::session::{ClientId, InstanceId, Session, DEFAULT_KEEPALIVE_INTERVAL};
use crate::tools::ToolRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0} already exists")]
    AlreadyExists(ClientId),
    #[error("session {0} not found")]
    NotFound(ClientId),
}

pub struct SessionRegistry {
    sessions: DashMap<ClientId, Arc<Session>>,
    tools: Arc<ToolRegistry>,
    keepalive_interval: Duration,
}

impl SessionRegistry {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self::with_keepalive(tools, DEFAULT_KEEPALIVE_INTERVAL)
    }

    pub fn with_keepalive(tools: Arc<ToolRegistry>, keepalive_interval: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            tools,
            keepalive_interval,
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Creates and starts a session. The insert is atomic per client id.
    pub fn create(
        &self,
        client_id: ClientId,
        owner_instance_id: InstanceId,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Session>, RegistryError> {
        let session = match self.sessions.entry(client_id) {
            Entry::Occupied(entry) => return Err(RegistryError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let session = Session::new(
                    entry.key().clone(),
                    owner_instance_id,
                    transport,
                    Arc::clone(&self.tools),
                    self.keepalive_interval,
                );
                entry.insert(Arc::clone(&session));
                session
            }
        };

        session.start();
        info!(
            client_id = %session.client_id(),
            instance_id = %session.owner_instance_id(),
            sessions = self.sessions.len(),
            "session created"
        );
        Ok(session)
    }

    pub fn try_get(&self, client_id: &ClientId) -> Option<Arc<Session>> {
        self.sessions
            .get(client_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and disposes a session that must exist.
    pub fn remove(&self, client_id: &ClientId) -> Result<(), RegistryError> {
        self.close(client_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(client_id.clone()))
    }

    /// Removes and disposes a session if it is still registered.
    pub fn close(&self, client_id: &ClientId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(client_id)?;
        session.dispose();
        debug!(client_id = %client_id, sessions = self.sessions.len(), "session removed");
        Some(session)
    }

    pub fn close_all(&self) -> usize {
        let ids = self.client_ids();
        ids.iter().filter(|id| self.close(id).is_some()).count()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionDirectory for SessionRegistry {
    fn contains(&self, client_id: &ClientId) -> bool {
        self.sessions.contains_key(client_id)
    }
}
