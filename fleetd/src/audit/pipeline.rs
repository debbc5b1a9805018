//! Recording and broadcasting of updates

use std::sync::Arc;

use chrono::Utc;
use client_api::{Event, Update};
use tracing::{debug, error};

use crate::audit::hub::{BroadcastHub, Visibility};
use crate::store::AuditStore;
use crate::utils::generate_uuid;

#[derive(Clone)]
pub struct AuditPipeline {
    store: Arc<dyn AuditStore>,
    hub: Arc<BroadcastHub>,
}

impl AuditPipeline {
    pub fn new(store: Arc<dyn AuditStore>, hub: Arc<BroadcastHub>) -> Self {
        Self { store, hub }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Persist an update with a fresh id and timestamp.
    ///
    /// Store failures are logged only; the returned update is the one that
    /// would have been stored.
    pub async fn record(&self, mut update: Update) -> Update {
        update.id = generate_uuid();
        update.timestamp = Utc::now();
        match self.store.append(update.clone()).await {
            Ok(stored) => {
                debug!("Recorded {} by {}", stored.operation, stored.operator);
                stored
            }
            Err(e) => {
                error!("Failed to record update {}: {}", update.operation, e);
                update
            }
        }
    }

    pub fn publish(&self, event: &Event, visibility: &Visibility) -> usize {
        self.hub.publish(event, visibility)
    }

    pub async fn record_and_publish(&self, update: Update, visibility: &Visibility) -> Update {
        let update = self.record(update).await;
        self.hub.publish(
            &Event::Update {
                update: update.clone(),
            },
            visibility,
        );
        update
    }
}
