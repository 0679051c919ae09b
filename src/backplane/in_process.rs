//! Backplane whose instances share one process
//!
//! Every connected instance gets a route on a shared [`InProcessBus`]. A
//! single-instance deployment uses [`InProcessBackplane::standalone`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::backplane::{Backplane, BackplaneError, BackplaneMessage, BackplaneStream, SessionDirectory};
use crate::mcp::message::JsonRpcMessage;
use crate::session::{ClientId, InstanceId};

type Route = mpsc::UnboundedSender<BackplaneMessage>;

#[derive(Default)]
pub struct InProcessBus {
    routes: DashMap<InstanceId, Route>,
    directories: DashMap<InstanceId, Arc<dyn SessionDirectory>>,
}

impl fmt::Debug for InProcessBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessBus")
            .field("instances", &self.instances())
            .finish_non_exhaustive()
    }
}

impl InProcessBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(self: &Arc<Self>, instance_id: InstanceId) -> Result<InProcessBackplane, BackplaneError> {
        let (route, receiver) = mpsc::unbounded_channel();

        match self.routes.entry(instance_id.clone()) {
            Entry::Occupied(_) => return Err(BackplaneError::DuplicateInstance(instance_id)),
            Entry::Vacant(entry) => {
                entry.insert(route.clone());
            }
        }

        debug!(instance_id = %instance_id, "instance connected to backplane");
        Ok(InProcessBackplane {
            bus: Arc::clone(self),
            instance_id,
            route: Mutex::new(Some(route)),
            receiver: Mutex::new(Some(receiver)),
        })
    }

    pub fn instances(&self) -> Vec<InstanceId> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[derive(Debug)]
pub struct InProcessBackplane {
    bus: Arc<InProcessBus>,
    instance_id: InstanceId,
    route: Mutex<Option<Route>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<BackplaneMessage>>>,
}

impl InProcessBackplane {
    /// Backplane on a private bus with this instance as its only member.
    pub fn standalone(instance_id: InstanceId) -> Self {
        let bus = InProcessBus::new();
        let (route, receiver) = mpsc::unbounded_channel();
        bus.routes.insert(instance_id.clone(), route.clone());

        Self {
            bus,
            instance_id,
            route: Mutex::new(Some(route)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn bus(&self) -> &Arc<InProcessBus> {
        &self.bus
    }
}

#[async_trait]
impl Backplane for InProcessBackplane {
    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    async fn send(
        &self,
        message: JsonRpcMessage,
        owner: &InstanceId,
        client_id: &ClientId,
    ) -> Result<(), BackplaneError> {
        if self.route.lock().is_none() {
            return Err(BackplaneError::Closed(self.instance_id.clone()));
        }

        let route = self
            .bus
            .routes
            .get(owner)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackplaneError::UnknownInstance(owner.clone()))?;

        let directory = self
            .bus
            .directories
            .get(owner)
            .map(|entry| Arc::clone(entry.value()));
        if directory.is_some_and(|directory| !directory.contains(client_id)) {
            return Err(BackplaneError::SessionNotFound {
                owner: owner.clone(),
                client_id: client_id.clone(),
            });
        }

        route
            .send(BackplaneMessage {
                client_id: client_id.clone(),
                message,
            })
            .map_err(|_| BackplaneError::Closed(owner.clone()))?;

        debug!(from = %self.instance_id, to = %owner, client_id = %client_id, "message routed");
        Ok(())
    }

    fn attach(&self, directory: Arc<dyn SessionDirectory>) {
        if self.route.lock().is_none() {
            return;
        }
        self.bus.directories.insert(self.instance_id.clone(), directory);
    }

    fn subscribe(&self) -> Result<BackplaneStream, BackplaneError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| BackplaneError::AlreadySubscribed(self.instance_id.clone()))?;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    fn close(&self) {
        let Some(route) = self.route.lock().take() else {
            return;
        };
        self.bus
            .routes
            .remove_if(&self.instance_id, |_, registered| registered.same_channel(&route));
        self.bus.directories.remove(&self.instance_id);
        debug!(instance_id = %self.instance_id, "instance left backplane");
    }
}

impl Drop for InProcessBackplane {
    fn drop(&mut self) {
        self.close();
    }
}
