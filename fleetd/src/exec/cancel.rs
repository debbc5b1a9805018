//! Out-of-band cancellation of running builds

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::info;

/// Cancellation signals of running builds, keyed by working copy name
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    signals: Arc<DashMap<String, Arc<Notify>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running build; the signal is removed when the handle drops
    pub fn register(&self, name: &str) -> CancelHandle {
        let notify = Arc::new(Notify::new());
        self.signals.insert(name.to_string(), notify.clone());
        CancelHandle {
            registry: self.clone(),
            name: name.to_string(),
            notify,
        }
    }

    /// Signal the running build of `name`; false when none is running
    pub fn cancel(&self, name: &str) -> bool {
        match self.signals.get(name) {
            Some(notify) => {
                info!("Cancelling build {}", name);
                notify.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }
}

pub struct CancelHandle {
    registry: CancelRegistry,
    name: String,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn signal(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        // A newer build of the same name may have replaced this signal
        self.registry
            .signals
            .remove_if(&self.name, |_, current| Arc::ptr_eq(current, &self.notify));
    }
}
