//! Deployment and container commands

use client_api::{Deployment, Event, Operation, Owned, UpdateTarget};
use periphery_api::{ContainerSpec, ContainerStatus, ExecutionResult, RenameRepo, RepoMount, RepoSpec};
use tracing::debug;

use crate::action::{ActionFlag, ResourceKind};
use crate::audit::Visibility;
use crate::dispatch::dispatcher::{Ctx, Dispatcher, Outcome};
use crate::dispatch::permissions::{can_create, can_mutate, deployment_hooks_allowed};
use crate::errors::CoreError;
use crate::exec::result::error_result;
use crate::exec::{merge_results, NodeOp, NodeOutput, Step};
use crate::utils::{generate_uuid, to_dashed_name};

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Container definition of a deployment running `image`
pub fn container_spec(deployment: &Deployment, image: String) -> ContainerSpec {
    let repo_mount = match (non_empty(&deployment.repo_mount), non_empty(&deployment.container_mount)) {
        (Some(path), Some(container)) if deployment.has_repo() => Some(RepoMount {
            repo: deployment.container_name.clone(),
            path: path.to_string(),
            container: container.to_string(),
        }),
        _ => None,
    };

    ContainerSpec {
        name: deployment.container_name.clone(),
        image,
        ports: deployment.ports.clone(),
        volumes: deployment.volumes.clone(),
        environment: deployment.environment.clone(),
        network: deployment.network.clone(),
        restart: deployment.restart.clone(),
        post_image: deployment.post_image.clone(),
        container_user: deployment.container_user.clone(),
        repo_mount,
    }
}

impl Dispatcher {
    fn deployment_repo_spec(&self, deployment: &Deployment) -> RepoSpec {
        RepoSpec {
            name: deployment.container_name.clone(),
            repo: deployment.repo.clone().unwrap_or_default(),
            branch: deployment.branch.clone(),
            access_token: self.access_token(deployment.github_account.as_deref()),
            on_clone: deployment.on_clone.clone(),
            on_pull: deployment.on_pull.clone(),
        }
    }

    async fn find_deployment(&self, deployment_id: &str) -> Result<Option<Deployment>, CoreError> {
        let deployment = self.resources.deployments.find_by_id(deployment_id).await?;
        if deployment.is_none() {
            debug!("Deployment {} not found, ignoring command", deployment_id);
        }
        Ok(deployment)
    }

    /// Image to run: the attached build's image, else the configured one
    async fn deploy_image(&self, deployment: &Deployment) -> Result<String, String> {
        if let Some(build_id) = non_empty(&deployment.build_id) {
            match self.resources.builds.find_by_id(build_id).await {
                Ok(Some(build)) => return Ok(build.image_name()),
                Ok(None) => debug!("Build {} of deployment {} is gone", build_id, deployment.id),
                Err(e) => return Err(e.to_string()),
            }
        }
        non_empty(&deployment.image)
            .map(str::to_string)
            .ok_or_else(|| format!("deployment {} has no image or build configured", deployment.name))
    }

    /// Current container state, `None` when missing or unknown
    pub(super) async fn fetch_container_status(&self, deployment: &Deployment) -> Option<ContainerStatus> {
        let node = self.resolve_node(deployment.server_id.as_deref()).await.ok()?;
        let op = NodeOp::GetContainerStatus {
            name: deployment.container_name.clone(),
        };
        match self.executor.execute(&node, op).await {
            Ok(NodeOutput::Status(status)) => status,
            Ok(_) => None,
            Err(e) => {
                debug!("Status of {} unavailable: {}", deployment.container_name, e);
                None
            }
        }
    }

    pub(super) async fn create_deployment(
        &self,
        ctx: &Ctx,
        mut deployment: Deployment,
    ) -> Result<Outcome, CoreError> {
        if !can_create(&ctx.user) || !deployment_hooks_allowed(&ctx.user, None, &deployment) {
            return Ok(self
                .deny(ctx, UpdateTarget::System, Operation::CreateDeployment)
                .await);
        }
        deployment.container_name = to_dashed_name(&deployment.name);
        if deployment.container_name.is_empty() {
            return Ok(Outcome::Rejected("deployment name must not be empty".to_string()));
        }
        deployment.id = generate_uuid();
        if !deployment.is_owned_by(ctx.operator()) {
            deployment.owners.push(ctx.operator().to_string());
        }

        let deployment_id = deployment.id.clone();
        let visibility = Visibility::Owners(deployment.all_owners());
        let update = self
            .execute_tracked(
                ctx,
                UpdateTarget::Deployment(deployment_id.clone()),
                Operation::CreateDeployment,
                visibility,
                Vec::new(),
                move || async move {
                    let command = format!("create deployment {}", deployment.name);
                    match self.resources.deployments.create(deployment).await {
                        Ok(deployment) => {
                            self.actions.register(&deployment.id, ResourceKind::Deployment);
                            (
                                ExecutionResult::success(command, ""),
                                Some(Event::DeploymentCreated { deployment }),
                            )
                        }
                        Err(e) => (error_result(command, e), None),
                    }
                },
            )
            .await;

        if !update.is_error {
            if let Some(deployment) = self.resources.deployments.find_by_id(&deployment_id).await? {
                if deployment.has_repo() {
                    self.clone_deployment_flow(ctx, deployment).await?;
                }
            }
        }
        Ok(Outcome::Completed(update))
    }

    pub(super) async fn update_deployment(
        &self,
        ctx: &Ctx,
        mut changes: Deployment,
    ) -> Result<Outcome, CoreError> {
        let current = match self.find_deployment(&changes.id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Deployment(current.id.clone());
        if !can_mutate(&ctx.user, &current)
            || !deployment_hooks_allowed(&ctx.user, Some(&current), &changes)
        {
            return Ok(self.deny(ctx, target, Operation::UpdateDeployment).await);
        }
        changes.container_name = to_dashed_name(&changes.name);
        if changes.container_name.is_empty() {
            return Ok(Outcome::Rejected("deployment name must not be empty".to_string()));
        }
        changes.owners = current.owners.clone();
        changes.owner = current.owner.clone();

        let visibility = Visibility::Owners(current.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Deployment,
            target,
            Operation::UpdateDeployment,
            ActionFlag::Updating,
            visibility,
            move || async move {
                let mut steps = Vec::new();
                let moved = current.repo != changes.repo
                    || current.branch != changes.branch
                    || current.server_id != changes.server_id;
                if moved {
                    if current.has_repo() {
                        let op = NodeOp::DeleteRepo {
                            name: current.container_name.clone(),
                        };
                        steps.push(Step::ran("delete repo", self.run_on(current.server_id.as_deref(), op).await));
                    }
                    if changes.has_repo() {
                        let op = NodeOp::CloneRepo(self.deployment_repo_spec(&changes));
                        steps.push(Step::ran("clone", self.run_on(changes.server_id.as_deref(), op).await));
                    }
                } else if current.container_name != changes.container_name && changes.has_repo() {
                    let op = NodeOp::RenameRepo(RenameRepo {
                        from: current.container_name.clone(),
                        to: changes.container_name.clone(),
                    });
                    steps.push(Step::ran("rename repo", self.run_on(changes.server_id.as_deref(), op).await));
                }

                let command = format!("update deployment {}", changes.name);
                match self.resources.deployments.update_by_id(&current.id, changes).await {
                    Ok(Some(deployment)) => {
                        steps.push(Step::ran("update", ExecutionResult::success(command, "")));
                        (merge_results(steps), Some(Event::DeploymentUpdated { deployment }))
                    }
                    Ok(None) => {
                        let result = ExecutionResult::failure(command, "deployment no longer exists");
                        steps.push(Step::ran("update", result));
                        (merge_results(steps), None)
                    }
                    Err(e) => {
                        steps.push(Step::ran("update", error_result(command, e)));
                        (merge_results(steps), None)
                    }
                }
            },
        )
        .await
    }

    pub(super) async fn delete_deployment(&self, ctx: &Ctx, deployment_id: &str) -> Result<Outcome, CoreError> {
        let deployment = match self.find_deployment(deployment_id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Deployment(deployment.id.clone());
        if !can_mutate(&ctx.user, &deployment) {
            return Ok(self.deny(ctx, target, Operation::DeleteDeployment).await);
        }

        let visibility = Visibility::Owners(deployment.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Deployment,
            target,
            Operation::DeleteDeployment,
            ActionFlag::Deleting,
            visibility,
            move || async move {
                let node = match self.resolve_node(deployment.server_id.as_deref()).await {
                    Ok(node) => node,
                    Err(e) => {
                        return (error_result(format!("delete deployment {}", deployment.name), e), None)
                    }
                };

                let mut steps = Vec::new();
                let op = NodeOp::DeleteContainer {
                    name: deployment.container_name.clone(),
                };
                steps.push(Step::ran("delete container", self.executor.run(&node, op).await));
                if deployment.has_repo() {
                    let op = NodeOp::DeleteRepo {
                        name: deployment.container_name.clone(),
                    };
                    steps.push(Step::ran("delete repo", self.executor.run(&node, op).await));
                }

                let command = format!("delete deployment {}", deployment.name);
                if let Err(e) = self.resources.deployments.delete_by_id(&deployment.id).await {
                    steps.push(Step::ran("delete", error_result(command, e)));
                    return (merge_results(steps), None);
                }
                steps.push(Step::ran("delete", ExecutionResult::success(command, "")));
                // Gone from the store, whatever the node steps did
                self.actions.unregister(&deployment.id);
                (
                    merge_results(steps),
                    Some(Event::DeploymentDeleted {
                        deployment_id: deployment.id.clone(),
                    }),
                )
            },
        )
        .await
    }

    pub(super) async fn deploy(&self, ctx: &Ctx, deployment_id: &str) -> Result<Outcome, CoreError> {
        let deployment = match self.find_deployment(deployment_id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Deployment(deployment.id.clone());
        if !can_mutate(&ctx.user, &deployment) {
            return Ok(self.deny(ctx, target, Operation::Deploy).await);
        }

        let visibility = Visibility::Owners(deployment.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Deployment,
            target,
            Operation::Deploy,
            ActionFlag::Deploying,
            visibility,
            move || async move {
                let label = format!("deploy {}", deployment.container_name);
                let image = match self.deploy_image(&deployment).await {
                    Ok(image) => image,
                    Err(message) => return (ExecutionResult::failure(label, message), None),
                };
                let node = match self.resolve_node(deployment.server_id.as_deref()).await {
                    Ok(node) => node,
                    Err(e) => return (error_result(label, e), None),
                };

                let spec = container_spec(&deployment, image);
                let result = self.executor.run(&node, NodeOp::RunContainer(spec)).await;
                let status = self.fetch_container_status(&deployment).await;
                (
                    result,
                    Some(Event::ContainerStatus {
                        deployment_id: deployment.id.clone(),
                        status,
                    }),
                )
            },
        )
        .await
    }

    pub(super) async fn pull_deployment(&self, ctx: &Ctx, deployment_id: &str) -> Result<Outcome, CoreError> {
        let deployment = match self.find_deployment(deployment_id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Deployment(deployment.id.clone());
        if !can_mutate(&ctx.user, &deployment) {
            return Ok(self.deny(ctx, target, Operation::PullDeployment).await);
        }
        if !deployment.has_repo() {
            return Ok(Outcome::Rejected(format!(
                "deployment {} has no repo configured",
                deployment.name
            )));
        }

        let visibility = Visibility::Owners(deployment.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Deployment,
            target,
            Operation::PullDeployment,
            ActionFlag::Pulling,
            visibility,
            move || async move {
                let op = NodeOp::PullRepo(self.deployment_repo_spec(&deployment));
                (self.run_on(deployment.server_id.as_deref(), op).await, None)
            },
        )
        .await
    }

    pub(super) async fn clone_deployment(&self, ctx: &Ctx, deployment_id: &str) -> Result<Outcome, CoreError> {
        let deployment = match self.find_deployment(deployment_id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        if !can_mutate(&ctx.user, &deployment) {
            let target = UpdateTarget::Deployment(deployment.id.clone());
            return Ok(self.deny(ctx, target, Operation::CloneDeployment).await);
        }
        if !deployment.has_repo() {
            return Ok(Outcome::Rejected(format!(
                "deployment {} has no repo configured",
                deployment.name
            )));
        }
        self.clone_deployment_flow(ctx, deployment).await
    }

    async fn clone_deployment_flow(&self, ctx: &Ctx, deployment: Deployment) -> Result<Outcome, CoreError> {
        let visibility = Visibility::Owners(deployment.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Deployment,
            UpdateTarget::Deployment(deployment.id.clone()),
            Operation::CloneDeployment,
            ActionFlag::Cloning,
            visibility,
            move || async move {
                let op = NodeOp::CloneRepo(self.deployment_repo_spec(&deployment));
                (self.run_on(deployment.server_id.as_deref(), op).await, None)
            },
        )
        .await
    }

    /// Start, stop or remove a deployment's container
    pub(super) async fn container_action(
        &self,
        ctx: &Ctx,
        deployment_id: &str,
        operation: Operation,
    ) -> Result<Outcome, CoreError> {
        let deployment = match self.find_deployment(deployment_id).await? {
            Some(deployment) => deployment,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Deployment(deployment.id.clone());
        if !can_mutate(&ctx.user, &deployment) {
            return Ok(self.deny(ctx, target, operation).await);
        }

        let name = deployment.container_name.clone();
        let (flag, op) = match operation {
            Operation::StartContainer => (ActionFlag::Starting, NodeOp::StartContainer { name }),
            Operation::StopContainer => (ActionFlag::Stopping, NodeOp::StopContainer { name }),
            Operation::DeleteContainer => (ActionFlag::Deleting, NodeOp::DeleteContainer { name }),
            other => {
                return Err(CoreError::ValidationError(format!(
                    "{} is not a container operation",
                    other
                )))
            }
        };

        let visibility = Visibility::Owners(deployment.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Deployment,
            target,
            operation,
            flag,
            visibility,
            move || async move {
                let result = self.run_on(deployment.server_id.as_deref(), op).await;
                let status = self.fetch_container_status(&deployment).await;
                (
                    result,
                    Some(Event::ContainerStatus {
                        deployment_id: deployment.id.clone(),
                        status,
                    }),
                )
            },
        )
        .await
    }
}
