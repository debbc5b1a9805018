//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::action::ActionRegistry;
use crate::app::options::AppOptions;
use crate::audit::{AuditPipeline, BroadcastHub};
use crate::dispatch::Dispatcher;
use crate::errors::CoreError;
use crate::exec::{Executor, LocalHost, PeripheryClient};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::periphery::PeripheryState;
use crate::server::state::ServerState;
use crate::store::memory::{MemoryAuditLog, MemoryUsers};
use crate::store::seed::Seed;

/// Core node state
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub hub: Arc<BroadcastHub>,
    pub users: Arc<MemoryUsers>,
}

impl AppState {
    /// Load the seed and wire stores, executor, audit pipeline and
    /// dispatcher together
    pub async fn init(options: &AppOptions) -> Result<Self, CoreError> {
        options.layout.setup().await?;
        let repos = Dir::new(options.repo_root.clone());
        repos.create().await?;

        let seed = Seed::load(&File::new(options.seed_file.clone())).await?;
        let (resources, users) = seed.into_stores().await;

        let hub = Arc::new(BroadcastHub::new());
        let audit = AuditPipeline::new(Arc::new(MemoryAuditLog::new()), hub.clone());

        let local = Arc::new(LocalHost::new(repos));
        let periphery = PeripheryClient::new(options.default_passkey.clone(), options.timeouts)?;
        let executor = Arc::new(Executor::new(local, periphery));

        let dispatcher = Dispatcher::new(resources, users.clone(), ActionRegistry::new(), executor, audit)
            .with_github_accounts(options.github_accounts.clone());
        let registered = dispatcher.register_all().await?;
        info!("Core state ready with {} registered resources", registered);

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            hub,
            users,
        })
    }

    pub fn server_state(&self) -> Arc<ServerState> {
        Arc::new(ServerState::new(
            self.dispatcher.clone(),
            self.hub.clone(),
            self.users.clone(),
        ))
    }
}

/// Periphery agent state
pub async fn init_periphery_state(options: &AppOptions) -> Result<Arc<PeripheryState>, CoreError> {
    let repos = Dir::new(options.repo_root.clone());
    repos.create().await?;
    if options.passkeys.is_empty() {
        warn!("No passkeys configured, the periphery agent accepts every request");
    }
    Ok(Arc::new(PeripheryState::new(
        Arc::new(LocalHost::new(repos)),
        options.passkeys.clone(),
    )))
}
