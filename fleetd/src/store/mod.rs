//! Narrow interfaces to resource, user and audit storage

pub mod memory;
pub mod seed;

use std::sync::Arc;

use async_trait::async_trait;
use client_api::{Build, Deployment, Server, Update, User};

use crate::errors::CoreError;

/// A stored resource with an opaque id
pub trait Resource: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
}

impl Resource for Build {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Resource for Deployment {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Resource for Server {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

pub type Filter<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

/// Storage of one resource type
#[async_trait]
pub trait Collection<T: Resource>: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>, CoreError>;

    async fn find(&self, filter: Filter<'_, T>) -> Result<Vec<T>, CoreError>;

    async fn create(&self, item: T) -> Result<T, CoreError>;

    /// Replace a stored item, `None` when the id is unknown
    async fn update_by_id(&self, id: &str, item: T) -> Result<Option<T>, CoreError>;

    /// Atomic find-and-delete, `None` when the id is unknown
    async fn delete_by_id(&self, id: &str) -> Result<Option<T>, CoreError>;
}

/// User lookup
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, CoreError>;

    /// User owning a session token
    async fn find_by_session(&self, token: &str) -> Result<Option<User>, CoreError>;
}

/// Append-only audit log
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, update: Update) -> Result<Update, CoreError>;

    /// Newest first, skipping `offset` matches
    async fn most_recent(
        &self,
        n: usize,
        filter: Filter<'_, Update>,
        offset: usize,
    ) -> Result<Vec<Update>, CoreError>;
}

/// Resource collections consumed by the dispatcher
#[derive(Clone)]
pub struct Resources {
    pub builds: Arc<dyn Collection<Build>>,
    pub deployments: Arc<dyn Collection<Deployment>>,
    pub servers: Arc<dyn Collection<Server>>,
}
