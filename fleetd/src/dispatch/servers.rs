//! Server commands

use client_api::{Deployment, Event, Operation, Owned, Server, UpdateTarget};
use periphery_api::ExecutionResult;
use tracing::debug;

use crate::action::{ActionFlag, ResourceKind};
use crate::audit::Visibility;
use crate::dispatch::dispatcher::{busy_message, Ctx, Dispatcher, Outcome};
use crate::dispatch::permissions::is_admin;
use crate::errors::CoreError;
use crate::exec::result::error_result;
use crate::exec::{merge_results, NodeOp, NodeRef, Step};
use crate::utils::generate_uuid;

impl Dispatcher {
    async fn find_server(&self, server_id: &str) -> Result<Option<Server>, CoreError> {
        let server = self.resources.servers.find_by_id(server_id).await?;
        if server.is_none() {
            debug!("Server {} not found, ignoring command", server_id);
        }
        Ok(server)
    }

    /// Another server already flagged as the core node
    async fn other_core(&self, except_id: &str) -> Result<Option<Server>, CoreError> {
        let cores = self
            .resources
            .servers
            .find(&|s: &Server| s.is_core && s.id != except_id)
            .await?;
        Ok(cores.into_iter().next())
    }

    pub(super) async fn add_server(&self, ctx: &Ctx, mut server: Server) -> Result<Outcome, CoreError> {
        if !is_admin(&ctx.user) {
            return Ok(self.deny(ctx, UpdateTarget::System, Operation::AddServer).await);
        }
        server.id = generate_uuid();
        if server.is_core {
            if let Some(core) = self.other_core(&server.id).await? {
                return Ok(Outcome::Rejected(format!("server {} is already the core node", core.name)));
            }
        }
        if !server.is_owned_by(ctx.operator()) {
            server.owners.push(ctx.operator().to_string());
        }

        let visibility = Visibility::Owners(server.all_owners());
        let update = self
            .execute_tracked(
                ctx,
                UpdateTarget::Server(server.id.clone()),
                Operation::AddServer,
                visibility,
                Vec::new(),
                move || async move {
                    let command = format!("add server {}", server.name);
                    match self.resources.servers.create(server).await {
                        Ok(server) => {
                            self.actions.register(&server.id, ResourceKind::Server);
                            (ExecutionResult::success(command, ""), Some(Event::ServerAdded { server }))
                        }
                        Err(e) => (error_result(command, e), None),
                    }
                },
            )
            .await;
        Ok(Outcome::Completed(update))
    }

    pub(super) async fn update_server(&self, ctx: &Ctx, mut changes: Server) -> Result<Outcome, CoreError> {
        let current = match self.find_server(&changes.id).await? {
            Some(server) => server,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Server(current.id.clone());
        if !is_admin(&ctx.user) {
            return Ok(self.deny(ctx, target, Operation::UpdateServer).await);
        }
        if changes.is_core {
            if let Some(core) = self.other_core(&current.id).await? {
                return Ok(Outcome::Rejected(format!("server {} is already the core node", core.name)));
            }
        }
        // Passkeys never leave the core, so clients send updates without one
        if changes.passkey.as_deref().map(str::is_empty).unwrap_or(true) {
            changes.passkey = current.passkey.clone();
        }
        if changes.owners.is_empty() {
            changes.owners = current.owners.clone();
        }

        let visibility = Visibility::Owners(current.all_owners());
        let update = self
            .execute_tracked(ctx, target, Operation::UpdateServer, visibility, Vec::new(), move || async move {
                let command = format!("update server {}", changes.name);
                match self.resources.servers.update_by_id(&current.id, changes).await {
                    Ok(Some(server)) => (
                        ExecutionResult::success(command, ""),
                        Some(Event::ServerUpdated { server }),
                    ),
                    Ok(None) => (ExecutionResult::failure(command, "server no longer exists"), None),
                    Err(e) => (error_result(command, e), None),
                }
            })
            .await;
        Ok(Outcome::Completed(update))
    }

    /// Delete a server and every deployment bound to it
    pub(super) async fn remove_server(
        &self,
        ctx: &Ctx,
        server_id: &str,
        delete_containers: bool,
    ) -> Result<Outcome, CoreError> {
        let server = match self.find_server(server_id).await? {
            Some(server) => server,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Server(server.id.clone());
        if !is_admin(&ctx.user) {
            return Ok(self.deny(ctx, target, Operation::RemoveServer).await);
        }

        let bound = self
            .resources
            .deployments
            .find(&|d: &Deployment| d.server_id.as_deref() == Some(server.id.as_str()))
            .await?;

        let mut targets = vec![(server.id.clone(), ActionFlag::Removing)];
        if !self.actions.is_registered(&server.id) {
            self.actions.register(&server.id, ResourceKind::Server);
        }
        for deployment in &bound {
            if !self.actions.is_registered(&deployment.id) {
                self.actions.register(&deployment.id, ResourceKind::Deployment);
            }
            targets.push((deployment.id.clone(), ActionFlag::Deleting));
        }
        let guards = match self.actions.try_acquire_all(&targets)? {
            Some(guards) => guards,
            None => {
                debug!("Server {} or one of its deployments is busy", server.id);
                return Ok(Outcome::Busy(busy_message(ResourceKind::Server, &server.id)));
            }
        };

        let visibility = Visibility::Owners(server.all_owners());
        let update = self
            .execute_tracked(ctx, target, Operation::RemoveServer, visibility, guards, move || async move {
                let node = NodeRef::from_server(&server);
                let mut steps = Vec::new();

                for deployment in bound {
                    if delete_containers {
                        let op = NodeOp::DeleteContainer {
                            name: deployment.container_name.clone(),
                        };
                        let label = format!("delete container {}", deployment.container_name);
                        steps.push(Step::ran(label, self.executor.run(&node, op).await));
                    }

                    let label = format!("delete deployment {}", deployment.name);
                    match self.resources.deployments.delete_by_id(&deployment.id).await {
                        Ok(_) => {
                            steps.push(Step::ran(label.clone(), ExecutionResult::success(label, "")));
                            self.actions.unregister(&deployment.id);
                            self.audit.publish(
                                &Event::DeploymentDeleted {
                                    deployment_id: deployment.id.clone(),
                                },
                                &Visibility::Owners(deployment.all_owners()),
                            );
                        }
                        Err(e) => steps.push(Step::ran(label.clone(), error_result(label, e))),
                    }
                }

                let label = format!("remove server {}", server.name);
                match self.resources.servers.delete_by_id(&server.id).await {
                    Ok(_) => {
                        steps.push(Step::ran("remove", ExecutionResult::success(label, "")));
                        self.actions.unregister(&server.id);
                        (
                            merge_results(steps),
                            Some(Event::ServerRemoved {
                                server_id: server.id.clone(),
                            }),
                        )
                    }
                    Err(e) => {
                        steps.push(Step::ran("remove", error_result(label, e)));
                        (merge_results(steps), None)
                    }
                }
            })
            .await;
        Ok(Outcome::Completed(update))
    }

    /// Network and prune operations, not exclusive
    pub(super) async fn server_action(
        &self,
        ctx: &Ctx,
        server_id: &str,
        operation: Operation,
        op: NodeOp,
    ) -> Result<Outcome, CoreError> {
        let server = match self.find_server(server_id).await? {
            Some(server) => server,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Server(server.id.clone());
        if !is_admin(&ctx.user) {
            return Ok(self.deny(ctx, target, operation).await);
        }

        let visibility = Visibility::Owners(server.all_owners());
        let update = self
            .execute_tracked(ctx, target, operation, visibility, Vec::new(), move || async move {
                let node = NodeRef::from_server(&server);
                (self.executor.run(&node, op).await, None)
            })
            .await;
        Ok(Outcome::Completed(update))
    }
}
