//! Server state

use std::sync::Arc;

use crate::audit::BroadcastHub;
use crate::dispatch::Dispatcher;
use crate::store::UserDirectory;

/// Server state shared across handlers
pub struct ServerState {
    pub dispatcher: Arc<Dispatcher>,
    pub hub: Arc<BroadcastHub>,
    pub users: Arc<dyn UserDirectory>,
}

impl ServerState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        hub: Arc<BroadcastHub>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            dispatcher,
            hub,
            users,
        }
    }
}
