//! Startup snapshot of resources and users

use std::sync::Arc;

use client_api::{Build, Deployment, Server, User};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::CoreError;
use crate::filesys::file::File;
use crate::store::memory::{MemoryCollection, MemoryUsers};
use crate::store::Resources;

/// A user plus the session tokens it may connect with
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedUser {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub sessions: Vec<String>,
}

/// JSON snapshot loaded into the in-memory stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub builds: Vec<Build>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

impl Seed {
    /// Read a snapshot; a missing file is an empty snapshot
    pub async fn load(file: &File) -> Result<Self, CoreError> {
        let seed: Seed = file.read_json_or_default().await?;
        seed.validate()?;
        info!(
            "Loaded seed: {} builds, {} deployments, {} servers, {} users",
            seed.builds.len(),
            seed.deployments.len(),
            seed.servers.len(),
            seed.users.len()
        );
        Ok(seed)
    }

    /// At most one core server; every resource carries an id
    pub fn validate(&self) -> Result<(), CoreError> {
        let cores = self.servers.iter().filter(|s| s.is_core).count();
        if cores > 1 {
            return Err(CoreError::ConfigError(format!(
                "seed declares {} core servers, expected at most one",
                cores
            )));
        }
        let missing_id = self.builds.iter().any(|b| b.id.is_empty())
            || self.deployments.iter().any(|d| d.id.is_empty())
            || self.servers.iter().any(|s| s.id.is_empty())
            || self.users.iter().any(|u| u.user.id.is_empty());
        if missing_id {
            return Err(CoreError::ConfigError("seed entry without id".to_string()));
        }
        Ok(())
    }

    /// Build the stores holding this snapshot
    pub async fn into_stores(self) -> (Resources, Arc<MemoryUsers>) {
        let users = Arc::new(MemoryUsers::new());
        for seed_user in self.users {
            for token in &seed_user.sessions {
                users.add_session(token, &seed_user.user.id).await;
            }
            users.insert(seed_user.user).await;
        }

        let resources = Resources {
            builds: Arc::new(MemoryCollection::with_items(self.builds)),
            deployments: Arc::new(MemoryCollection::with_items(self.deployments)),
            servers: Arc::new(MemoryCollection::with_items(self.servers)),
        };

        (resources, users)
    }
}
