//! Read-only commands answered to the requester only

use std::collections::HashSet;

use client_api::{Build, Deployment, Event, Owned, Server, Update, UpdateTarget};
use periphery_api::Log;
use tracing::debug;

use crate::dispatch::dispatcher::{Ctx, Dispatcher, Outcome};
use crate::dispatch::permissions::{can_create, can_mutate, is_admin};
use crate::errors::CoreError;
use crate::exec::{NodeOp, NodeOutput, NodeRef};

/// Updates returned per `GetUpdates` page
pub const UPDATES_PAGE_SIZE: usize = 10;

impl Dispatcher {
    pub(super) async fn get_container_status(&self, deployment_id: &str) -> Result<Outcome, CoreError> {
        let deployment = match self.resources.deployments.find_by_id(deployment_id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        let status = self.fetch_container_status(&deployment).await;
        Ok(Outcome::Reply(Event::ContainerStatus {
            deployment_id: deployment.id,
            status,
        }))
    }

    pub(super) async fn check_server(&self, server_id: &str) -> Result<Outcome, CoreError> {
        let server = match self.resources.servers.find_by_id(server_id).await? {
            Some(server) => server,
            None => return Ok(Outcome::Ignored),
        };
        let reachable = self.executor.check_reachable(&NodeRef::from_server(&server)).await;
        Ok(Outcome::Reply(Event::ServerReachability {
            server_id: server.id,
            reachable,
        }))
    }

    pub(super) async fn get_server_stats(&self, server_id: &str) -> Result<Outcome, CoreError> {
        let server = match self.resources.servers.find_by_id(server_id).await? {
            Some(server) => server,
            None => return Ok(Outcome::Ignored),
        };
        let node = NodeRef::from_server(&server);

        let docker = match self.executor.execute(&node, NodeOp::GetDockerStats).await {
            Ok(NodeOutput::DockerStats(stats)) => stats,
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("Docker stats of {} unavailable: {}", server.id, e);
                Vec::new()
            }
        };
        let system = match self.executor.execute(&node, NodeOp::GetSystemStats).await {
            Ok(NodeOutput::SystemStats(stats)) => Some(stats),
            Ok(_) => None,
            Err(e) => {
                debug!("System stats of {} unavailable: {}", server.id, e);
                None
            }
        };

        Ok(Outcome::Reply(Event::ServerStats {
            server_id: server.id,
            docker,
            system,
        }))
    }

    pub(super) async fn get_container_log(
        &self,
        ctx: &Ctx,
        deployment_id: &str,
        tail: Option<u32>,
    ) -> Result<Outcome, CoreError> {
        let deployment = match self.resources.deployments.find_by_id(deployment_id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        if !can_mutate(&ctx.user, &deployment) {
            return Ok(Outcome::Rejected(format!(
                "not permitted to read the log of {}",
                deployment.name
            )));
        }

        let op = NodeOp::GetContainerLog {
            name: deployment.container_name.clone(),
            tail,
        };
        let log = match self.resolve_node(deployment.server_id.as_deref()).await {
            Ok(node) => match self.executor.execute(&node, op).await {
                Ok(NodeOutput::Log(log)) => log,
                Ok(_) => Log::default(),
                Err(e) => Log {
                    stdout: String::new(),
                    stderr: e.to_string(),
                },
            },
            Err(e) => Log {
                stdout: String::new(),
                stderr: e.to_string(),
            },
        };

        Ok(Outcome::Reply(Event::ContainerLog {
            deployment_id: deployment.id,
            log,
        }))
    }

    /// Page of recent updates the user may see
    pub(super) async fn get_updates(
        &self,
        ctx: &Ctx,
        target: Option<UpdateTarget>,
        offset: usize,
    ) -> Result<Outcome, CoreError> {
        if !can_create(&ctx.user) {
            return Ok(Outcome::Rejected("not permitted to list updates".to_string()));
        }

        let admin = is_admin(&ctx.user);
        let username = ctx.operator().to_string();
        let (builds, deployments, servers) = if admin {
            (HashSet::new(), HashSet::new(), HashSet::new())
        } else {
            let builds: HashSet<String> = self
                .resources
                .builds
                .find(&|b: &Build| b.is_owned_by(&username))
                .await?
                .into_iter()
                .map(|b| b.id)
                .collect();
            let deployments: HashSet<String> = self
                .resources
                .deployments
                .find(&|d: &Deployment| d.is_owned_by(&username))
                .await?
                .into_iter()
                .map(|d| d.id)
                .collect();
            let servers: HashSet<String> = self
                .resources
                .servers
                .find(&|s: &Server| s.is_owned_by(&username))
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
            (builds, deployments, servers)
        };

        let visible = |update: &Update| -> bool {
            if target.as_ref().map(|t| t != &update.target).unwrap_or(false) {
                return false;
            }
            if admin {
                return true;
            }
            match &update.target {
                UpdateTarget::Build(id) => builds.contains(id),
                UpdateTarget::Deployment(id) => deployments.contains(id),
                UpdateTarget::Server(id) => servers.contains(id),
                UpdateTarget::System => update.operator == username,
            }
        };

        let updates = self
            .audit
            .store()
            .most_recent(UPDATES_PAGE_SIZE, &visible, offset)
            .await?;
        Ok(Outcome::Reply(Event::Updates { updates }))
    }
}
