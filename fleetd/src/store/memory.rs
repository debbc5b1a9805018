//! In-memory store implementations

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use client_api::{Update, User};
use tokio::sync::RwLock;

use crate::errors::CoreError;
use crate::store::{AuditStore, Collection, Filter, Resource, UserDirectory};
use crate::utils::generate_uuid;

/// Resource collection held in memory
pub struct MemoryCollection<T: Resource> {
    items: RwLock<BTreeMap<String, T>>,
}

impl<T: Resource> MemoryCollection<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_items(items: Vec<T>) -> Self {
        let items = items
            .into_iter()
            .map(|item| (item.id().to_string(), item))
            .collect();
        Self {
            items: RwLock::new(items),
        }
    }

    pub async fn all(&self) -> Vec<T> {
        self.items.read().await.values().cloned().collect()
    }
}

impl<T: Resource> Default for MemoryCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Resource> Collection<T> for MemoryCollection<T> {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>, CoreError> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn find(&self, filter: Filter<'_, T>) -> Result<Vec<T>, CoreError> {
        Ok(self
            .items
            .read()
            .await
            .values()
            .filter(|item| filter(item))
            .cloned()
            .collect())
    }

    async fn create(&self, mut item: T) -> Result<T, CoreError> {
        if item.id().is_empty() {
            item.set_id(generate_uuid());
        }
        let mut items = self.items.write().await;
        if items.contains_key(item.id()) {
            return Err(CoreError::StoreError(format!("duplicate id {}", item.id())));
        }
        items.insert(item.id().to_string(), item.clone());
        Ok(item)
    }

    async fn update_by_id(&self, id: &str, mut item: T) -> Result<Option<T>, CoreError> {
        let mut items = self.items.write().await;
        match items.get_mut(id) {
            Some(existing) => {
                item.set_id(id.to_string());
                *existing = item.clone();
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<T>, CoreError> {
        Ok(self.items.write().await.remove(id))
    }
}

/// Users and their session tokens held in memory
#[derive(Default)]
pub struct MemoryUsers {
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, String>>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    /// Bind a session token to a user id
    pub async fn add_session(&self, token: &str, user_id: &str) {
        self.sessions
            .write()
            .await
            .insert(token.to_string(), user_id.to_string());
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, CoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_session(&self, token: &str) -> Result<Option<User>, CoreError> {
        let user_id = match self.sessions.read().await.get(token) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        self.find_by_id(&user_id).await
    }
}

/// Audit log held in memory
#[derive(Default)]
pub struct MemoryAuditLog {
    updates: RwLock<Vec<Update>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.updates.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.updates.read().await.is_empty()
    }

    /// Every record in append order
    pub async fn all(&self) -> Vec<Update> {
        self.updates.read().await.clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditLog {
    async fn append(&self, update: Update) -> Result<Update, CoreError> {
        self.updates.write().await.push(update.clone());
        Ok(update)
    }

    async fn most_recent(
        &self,
        n: usize,
        filter: Filter<'_, Update>,
        offset: usize,
    ) -> Result<Vec<Update>, CoreError> {
        let updates = self.updates.read().await;
        let mut matching: Vec<&Update> = updates.iter().filter(|u| filter(u)).collect();
        // Newest first, ties keep append order
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching.into_iter().skip(offset).take(n).cloned().collect())
    }
}
