//! Permission-gated command dispatch

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use client_api::{
    Build, Command, CommandEnvelope, Deployment, Event, Operation, Server, Update, UpdateTarget, User,
};
use futures::FutureExt;
use periphery_api::ExecutionResult;
use tracing::{debug, error, info, warn};

use crate::action::{ActionFlag, ActionGuard, ActionRegistry, ResourceKind};
use crate::audit::{AuditPipeline, Visibility};
use crate::errors::CoreError;
use crate::exec::result::error_result;
use crate::exec::{NodeExecutor, NodeOp, NodeRef};
use crate::store::{Resources, UserDirectory};

/// What happened to one command
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Ran to completion (successfully or not) and was audited
    Completed(Update),
    /// Refused for lack of permission, audited
    Denied(Update),
    /// Target busy; only the requester is told
    Busy(String),
    /// Invalid request; only the requester is told
    Rejected(String),
    /// Answer to a query
    Reply(Event),
    /// Stale target, unknown command or unknown user
    Ignored,
}

impl Outcome {
    /// Event sent back to the requesting connection only
    pub fn reply(&self) -> Option<Event> {
        match self {
            Outcome::Busy(message) | Outcome::Rejected(message) => Some(Event::notice(message.clone())),
            Outcome::Reply(event) => Some(event.clone()),
            _ => None,
        }
    }
}

/// The user a command runs for
#[derive(Debug, Clone)]
pub struct Ctx {
    pub user: User,
    pub note: Option<String>,
}

impl Ctx {
    pub fn operator(&self) -> &str {
        &self.user.username
    }
}

pub struct Dispatcher {
    pub(super) resources: Resources,
    pub(super) users: Arc<dyn UserDirectory>,
    pub(super) actions: ActionRegistry,
    pub(super) executor: Arc<dyn NodeExecutor>,
    pub(super) audit: AuditPipeline,
    github_accounts: HashMap<String, String>,
}

impl Dispatcher {
    pub fn new(
        resources: Resources,
        users: Arc<dyn UserDirectory>,
        actions: ActionRegistry,
        executor: Arc<dyn NodeExecutor>,
        audit: AuditPipeline,
    ) -> Self {
        Self {
            resources,
            users,
            actions,
            executor,
            audit,
            github_accounts: HashMap::new(),
        }
    }

    pub fn with_github_accounts(mut self, accounts: HashMap<String, String>) -> Self {
        self.github_accounts = accounts;
        self
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn audit(&self) -> &AuditPipeline {
        &self.audit
    }

    /// Register an action state entry for every stored resource
    pub async fn register_all(&self) -> Result<usize, CoreError> {
        let builds = self.resources.builds.find(&|_: &Build| true).await?;
        let deployments = self.resources.deployments.find(&|_: &Deployment| true).await?;
        let servers = self.resources.servers.find(&|_: &Server| true).await?;

        for build in &builds {
            self.actions.register(&build.id, ResourceKind::Build);
        }
        for deployment in &deployments {
            self.actions.register(&deployment.id, ResourceKind::Deployment);
        }
        for server in &servers {
            self.actions.register(&server.id, ResourceKind::Server);
        }

        let total = builds.len() + deployments.len() + servers.len();
        info!(
            "Registered action state for {} builds, {} deployments, {} servers",
            builds.len(),
            deployments.len(),
            servers.len()
        );
        Ok(total)
    }

    /// Handle one command on behalf of a user
    pub async fn dispatch(&self, user_id: &str, envelope: CommandEnvelope) -> Result<Outcome, CoreError> {
        let user = match self.users.find_by_id(user_id).await? {
            Some(user) if user.enabled => user,
            Some(_) => {
                debug!("Ignoring command from disabled user {}", user_id);
                return Ok(Outcome::Ignored);
            }
            None => {
                debug!("Ignoring command from unknown user {}", user_id);
                return Ok(Outcome::Ignored);
            }
        };
        let ctx = Ctx {
            user,
            note: envelope.note,
        };

        match envelope.command {
            Command::CreateBuild(build) => self.create_build(&ctx, build).await,
            Command::UpdateBuild(build) => self.update_build(&ctx, build).await,
            Command::DeleteBuild { build_id } => self.delete_build(&ctx, &build_id).await,
            Command::PullBuild { build_id } => self.pull_build(&ctx, &build_id).await,
            Command::CloneBuild { build_id } => self.clone_build(&ctx, &build_id).await,
            Command::Build { build_id } => self.build(&ctx, &build_id).await,
            Command::CancelBuild { build_id } => self.cancel_build(&ctx, &build_id).await,

            Command::CreateDeployment(deployment) => self.create_deployment(&ctx, deployment).await,
            Command::UpdateDeployment(deployment) => self.update_deployment(&ctx, deployment).await,
            Command::DeleteDeployment { deployment_id } => {
                self.delete_deployment(&ctx, &deployment_id).await
            }
            Command::Deploy { deployment_id } => self.deploy(&ctx, &deployment_id).await,
            Command::PullDeployment { deployment_id } => self.pull_deployment(&ctx, &deployment_id).await,
            Command::CloneDeployment { deployment_id } => {
                self.clone_deployment(&ctx, &deployment_id).await
            }
            Command::StartContainer { deployment_id } => {
                self.container_action(&ctx, &deployment_id, Operation::StartContainer).await
            }
            Command::StopContainer { deployment_id } => {
                self.container_action(&ctx, &deployment_id, Operation::StopContainer).await
            }
            Command::DeleteContainer { deployment_id } => {
                self.container_action(&ctx, &deployment_id, Operation::DeleteContainer).await
            }

            Command::AddServer(server) => self.add_server(&ctx, server).await,
            Command::UpdateServer(server) => self.update_server(&ctx, server).await,
            Command::RemoveServer {
                server_id,
                delete_containers,
            } => self.remove_server(&ctx, &server_id, delete_containers).await,
            Command::CreateNetwork {
                server_id,
                name,
                driver,
            } => {
                let op = NodeOp::CreateNetwork(periphery_api::NetworkCreate { name, driver });
                self.server_action(&ctx, &server_id, Operation::CreateNetwork, op).await
            }
            Command::DeleteNetwork { server_id, name } => {
                let op = NodeOp::DeleteNetwork { name };
                self.server_action(&ctx, &server_id, Operation::DeleteNetwork, op).await
            }
            Command::PruneImages { server_id } => {
                self.server_action(&ctx, &server_id, Operation::PruneImages, NodeOp::PruneImages).await
            }
            Command::PruneNetworks { server_id } => {
                self.server_action(&ctx, &server_id, Operation::PruneNetworks, NodeOp::PruneNetworks)
                    .await
            }
            Command::PruneContainers { server_id } => {
                self.server_action(&ctx, &server_id, Operation::PruneContainers, NodeOp::PruneContainers)
                    .await
            }

            Command::GetContainerStatus { deployment_id } => {
                self.get_container_status(&deployment_id).await
            }
            Command::CheckServer { server_id } => self.check_server(&server_id).await,
            Command::GetServerStats { server_id } => self.get_server_stats(&server_id).await,
            Command::GetContainerLog { deployment_id, tail } => {
                self.get_container_log(&ctx, &deployment_id, tail).await
            }
            Command::GetUpdates { target, offset } => self.get_updates(&ctx, target, offset).await,

            Command::Unknown => {
                debug!("Ignoring unknown command from {}", ctx.operator());
                Ok(Outcome::Ignored)
            }
        }
    }

    // ============================== PIPELINE ================================ //

    /// Record and broadcast a refused attempt
    pub(super) async fn deny(&self, ctx: &Ctx, target: UpdateTarget, operation: Operation) -> Outcome {
        info!("Denied {} to {}", operation, ctx.operator());
        let update = Update::new(target, operation.as_str(), ctx.operator())
            .with_note(ctx.note.clone())
            .denied();
        let update = self
            .audit
            .record_and_publish(update, &Visibility::AdminsAnd(ctx.operator().to_string()))
            .await;
        Outcome::Denied(update)
    }

    /// Run one unit of work with progress events, audit and broadcast.
    ///
    /// `work` yields the result plus an optional resource event published
    /// after the audit record. A panic inside `work` becomes an error
    /// result. The guards are released once everything is published.
    pub(super) async fn execute_tracked<F, Fut>(
        &self,
        ctx: &Ctx,
        target: UpdateTarget,
        operation: Operation,
        visibility: Visibility,
        guards: Vec<ActionGuard>,
        work: F,
    ) -> Update
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (ExecutionResult, Option<Event>)>,
    {
        let target_id = target.id().unwrap_or_default().to_string();
        self.audit.publish(
            &Event::progress(operation.as_str(), &target_id, false),
            &Visibility::All,
        );

        let (result, completion) = match AssertUnwindSafe(work()).catch_unwind().await {
            Ok(output) => output,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("{} on {} panicked: {}", operation, target_id, message);
                (error_result(operation.as_str(), message), None)
            }
        };
        if result.is_error {
            warn!("{} on {} failed: {}", operation, target_id, result.log.stderr);
        }

        let update = Update::new(target, operation.as_str(), ctx.operator())
            .with_result(result)
            .with_note(ctx.note.clone());
        let update = self.audit.record_and_publish(update, &visibility).await;

        if let Some(event) = completion {
            self.audit.publish(&event, &visibility);
        }
        self.audit.publish(
            &Event::progress(operation.as_str(), &target_id, true),
            &Visibility::All,
        );

        drop(guards);
        update
    }

    /// `execute_tracked` under one exclusive action flag
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn run_exclusive<F, Fut>(
        &self,
        ctx: &Ctx,
        kind: ResourceKind,
        target: UpdateTarget,
        operation: Operation,
        flag: ActionFlag,
        visibility: Visibility,
        work: F,
    ) -> Result<Outcome, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (ExecutionResult, Option<Event>)>,
    {
        let id = target.id().unwrap_or_default().to_string();
        let guard = match self.acquire(&id, kind, flag).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!("{} {} is busy, rejecting {}", kind, id, operation);
                return Ok(Outcome::Busy(busy_message(kind, &id)));
            }
            Err(CoreError::NotFound(_)) => {
                debug!("{} {} was deleted, ignoring {}", kind, id, operation);
                return Ok(Outcome::Ignored);
            }
            Err(e) => return Err(e),
        };
        let update = self
            .execute_tracked(ctx, target, operation, visibility, vec![guard], work)
            .await;
        Ok(Outcome::Completed(update))
    }

    /// Take a flag, registering resources created outside the dispatcher.
    ///
    /// A lazily registered id is checked against its store once the flag is
    /// held; an id deleted in the meantime is `NotFound` and left unregistered.
    pub(super) async fn acquire(
        &self,
        id: &str,
        kind: ResourceKind,
        flag: ActionFlag,
    ) -> Result<Option<ActionGuard>, CoreError> {
        match self.actions.try_acquire(id, flag) {
            Err(CoreError::UnregisteredResource(_)) => {}
            other => return other,
        }

        warn!("{} {} had no action state, registering", kind, id);
        self.actions.register(id, kind);
        let guard = match self.actions.try_acquire(id, flag)? {
            Some(guard) => guard,
            None => return Ok(None),
        };
        if !self.resource_exists(kind, id).await? {
            drop(guard);
            self.actions.unregister(id);
            return Err(CoreError::NotFound(format!("{} {}", kind, id)));
        }
        Ok(Some(guard))
    }

    async fn resource_exists(&self, kind: ResourceKind, id: &str) -> Result<bool, CoreError> {
        let found = match kind {
            ResourceKind::Build => self.resources.builds.find_by_id(id).await?.is_some(),
            ResourceKind::Deployment => self.resources.deployments.find_by_id(id).await?.is_some(),
            ResourceKind::Server => self.resources.servers.find_by_id(id).await?.is_some(),
        };
        Ok(found)
    }

    // ================================ NODES ================================= //

    /// Node of a resource; no server means the core node
    pub(super) async fn resolve_node(&self, server_id: Option<&str>) -> Result<NodeRef, CoreError> {
        let server_id = match server_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => return Ok(NodeRef::Core),
        };
        match self.resources.servers.find_by_id(server_id).await? {
            Some(server) => Ok(NodeRef::from_server(&server)),
            None => Err(CoreError::NotFound(format!("server {}", server_id))),
        }
    }

    /// Resolve the node and run a mutating operation on it
    pub(super) async fn run_on(&self, server_id: Option<&str>, op: NodeOp) -> ExecutionResult {
        match self.resolve_node(server_id).await {
            Ok(node) => self.executor.run(&node, op).await,
            Err(e) => error_result(op.label(), e),
        }
    }

    /// Token configured for a github account
    pub(super) fn access_token(&self, account: Option<&str>) -> Option<String> {
        account.and_then(|account| self.github_accounts.get(account).cloned())
    }
}

pub(super) fn busy_message(kind: ResourceKind, id: &str) -> String {
    format!("{} {} is busy, try again shortly", kind, id)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "operation panicked".to_string()
    }
}
