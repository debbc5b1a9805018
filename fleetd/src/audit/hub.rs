//! Publish/subscribe hub for connected clients

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use client_api::Event;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

/// Default per-subscriber queue depth
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// Who is behind a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub tier: u8,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.tier >= 2
    }
}

/// Which subscribers may receive an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    All,
    /// Owners of a resource plus admins
    Owners(Vec<String>),
    Admins,
    /// Admins plus one extra user
    AdminsAnd(String),
}

impl Visibility {
    pub fn allows(&self, identity: &Identity) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Owners(owners) => {
                identity.is_admin() || owners.iter().any(|o| o == &identity.username)
            }
            Visibility::Admins => identity.is_admin(),
            Visibility::AdminsAnd(username) => {
                identity.is_admin() || &identity.username == username
            }
        }
    }
}

struct Subscriber {
    identity: Identity,
    tx: mpsc::Sender<Arc<str>>,
}

/// Receiving end handed to a connection
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<str>>,
}

/// Fan-out of serialized events to every live connection
pub struct BroadcastHub {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, identity: Identity) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        debug!("Subscriber {} connected as {}", id, identity.username);
        match self.subscribers.write() {
            Ok(mut subscribers) => {
                subscribers.insert(id, Subscriber { identity, tx });
            }
            Err(e) => error!("Subscriber table poisoned: {}", e),
        }
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            if subscribers.remove(&id).is_some() {
                debug!("Subscriber {} disconnected", id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver an event to every subscriber the visibility allows.
    ///
    /// Never waits on a subscriber: a full queue drops the event for that
    /// subscriber only. Returns the number of deliveries.
    pub fn publish(&self, event: &Event, visibility: &Visibility) -> usize {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                return 0;
            }
        };

        // Snapshot the targets so sending never happens under the lock
        let targets: Vec<(u64, mpsc::Sender<Arc<str>>)> = match self.subscribers.read() {
            Ok(subscribers) => subscribers
                .iter()
                .filter(|(_, sub)| visibility.allows(&sub.identity))
                .map(|(id, sub)| (*id, sub.tx.clone()))
                .collect(),
            Err(e) => {
                error!("Subscriber table poisoned: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is lagging, dropping event", id);
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
        delivered
    }

    /// Deliver an event to one subscriber regardless of visibility
    pub fn send_to(&self, id: u64, event: &Event) -> bool {
        let tx = match self.subscribers.read() {
            Ok(subscribers) => match subscribers.get(&id) {
                Some(sub) => sub.tx.clone(),
                None => return false,
            },
            Err(_) => return false,
        };
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                return false;
            }
        };
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber {} is lagging, dropping reply", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.unsubscribe(id);
                false
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
