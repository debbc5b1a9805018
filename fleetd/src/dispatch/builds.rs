//! Build commands

use client_api::{Build, Deployment, Event, Operation, Owned, UpdateTarget};
use periphery_api::{BuildSpec, ExecutionResult, RenameRepo, RepoSpec};
use tracing::{debug, warn};

use crate::action::{ActionFlag, ResourceKind};
use crate::audit::Visibility;
use crate::dispatch::dispatcher::{Ctx, Dispatcher, Outcome};
use crate::dispatch::permissions::{build_hooks_allowed, can_create, can_mutate};
use crate::errors::CoreError;
use crate::exec::result::error_result;
use crate::exec::{merge_results, NodeOp, Step};
use crate::utils::{generate_uuid, to_dashed_name};

impl Dispatcher {
    fn build_repo_spec(&self, build: &Build) -> RepoSpec {
        RepoSpec {
            name: build.pull_name.clone(),
            repo: build.repo.clone().unwrap_or_default(),
            branch: build.branch.clone(),
            access_token: self.access_token(build.github_account.as_deref()),
            on_clone: build.on_clone.clone(),
            on_pull: build.on_pull.clone(),
        }
    }

    /// Load a build, `None` when it no longer exists
    async fn find_build(&self, build_id: &str) -> Result<Option<Build>, CoreError> {
        let build = self.resources.builds.find_by_id(build_id).await?;
        if build.is_none() {
            debug!("Build {} not found, ignoring command", build_id);
        }
        Ok(build)
    }

    pub(super) async fn create_build(&self, ctx: &Ctx, mut build: Build) -> Result<Outcome, CoreError> {
        if !can_create(&ctx.user) || !build_hooks_allowed(&ctx.user, None, &build) {
            return Ok(self.deny(ctx, UpdateTarget::System, Operation::CreateBuild).await);
        }
        build.pull_name = to_dashed_name(&build.name);
        if build.pull_name.is_empty() {
            return Ok(Outcome::Rejected("build name must not be empty".to_string()));
        }
        build.id = generate_uuid();
        if !build.is_owned_by(ctx.operator()) {
            build.owners.push(ctx.operator().to_string());
        }

        let build_id = build.id.clone();
        let visibility = Visibility::Owners(build.all_owners());
        let update = self
            .execute_tracked(
                ctx,
                UpdateTarget::Build(build_id.clone()),
                Operation::CreateBuild,
                visibility,
                Vec::new(),
                move || async move {
                    let command = format!("create build {}", build.name);
                    match self.resources.builds.create(build).await {
                        Ok(build) => {
                            self.actions.register(&build.id, ResourceKind::Build);
                            (ExecutionResult::success(command, ""), Some(Event::BuildCreated { build }))
                        }
                        Err(e) => (error_result(command, e), None),
                    }
                },
            )
            .await;

        if !update.is_error {
            if let Some(build) = self.resources.builds.find_by_id(&build_id).await? {
                if build.has_repo() {
                    self.clone_build_flow(ctx, build).await?;
                }
            }
        }
        Ok(Outcome::Completed(update))
    }

    pub(super) async fn update_build(&self, ctx: &Ctx, mut changes: Build) -> Result<Outcome, CoreError> {
        let current = match self.find_build(&changes.id).await? {
            Some(build) => build,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Build(current.id.clone());
        if !can_mutate(&ctx.user, &current) || !build_hooks_allowed(&ctx.user, Some(&current), &changes) {
            return Ok(self.deny(ctx, target, Operation::UpdateBuild).await);
        }
        changes.pull_name = to_dashed_name(&changes.name);
        if changes.pull_name.is_empty() {
            return Ok(Outcome::Rejected("build name must not be empty".to_string()));
        }
        changes.owners = current.owners.clone();
        changes.owner = current.owner.clone();

        let visibility = Visibility::Owners(current.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Build,
            target,
            Operation::UpdateBuild,
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
                            name: current.pull_name.clone(),
                        };
                        steps.push(Step::ran("delete repo", self.run_on(current.server_id.as_deref(), op).await));
                    }
                    if changes.has_repo() {
                        let op = NodeOp::CloneRepo(self.build_repo_spec(&changes));
                        steps.push(Step::ran("clone", self.run_on(changes.server_id.as_deref(), op).await));
                    }
                } else if current.pull_name != changes.pull_name && changes.has_repo() {
                    let op = NodeOp::RenameRepo(RenameRepo {
                        from: current.pull_name.clone(),
                        to: changes.pull_name.clone(),
                    });
                    steps.push(Step::ran("rename repo", self.run_on(changes.server_id.as_deref(), op).await));
                }

                let command = format!("update build {}", changes.name);
                match self.resources.builds.update_by_id(&current.id, changes).await {
                    Ok(Some(build)) => {
                        steps.push(Step::ran("update", ExecutionResult::success(command, "")));
                        (merge_results(steps), Some(Event::BuildUpdated { build }))
                    }
                    Ok(None) => {
                        steps.push(Step::ran("update", ExecutionResult::failure(command, "build no longer exists")));
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

    pub(super) async fn delete_build(&self, ctx: &Ctx, build_id: &str) -> Result<Outcome, CoreError> {
        let build = match self.find_build(build_id).await? {
            Some(build) => build,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Build(build.id.clone());
        if !can_mutate(&ctx.user, &build) {
            return Ok(self.deny(ctx, target, Operation::DeleteBuild).await);
        }

        let visibility = Visibility::Owners(build.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Build,
            target,
            Operation::DeleteBuild,
            ActionFlag::Deleting,
            visibility,
            move || async move {
                let mut steps = Vec::new();
                if build.has_repo() {
                    let op = NodeOp::DeleteRepo {
                        name: build.pull_name.clone(),
                    };
                    steps.push(Step::ran("delete repo", self.run_on(build.server_id.as_deref(), op).await));
                }

                let command = format!("delete build {}", build.name);
                if let Err(e) = self.resources.builds.delete_by_id(&build.id).await {
                    steps.push(Step::ran("delete", error_result(command, e)));
                    return (merge_results(steps), None);
                }
                steps.push(Step::ran("delete", ExecutionResult::success(command, "")));
                self.actions.unregister(&build.id);

                self.detach_build(&build.id).await;
                (merge_results(steps), Some(Event::BuildDeleted { build_id: build.id.clone() }))
            },
        )
        .await
    }

    /// Clear the build reference of every deployment using a deleted build
    async fn detach_build(&self, build_id: &str) {
        let attached = match self
            .resources
            .deployments
            .find(&|d: &Deployment| d.build_id.as_deref() == Some(build_id))
            .await
        {
            Ok(attached) => attached,
            Err(e) => {
                warn!("Failed to find deployments of build {}: {}", build_id, e);
                return;
            }
        };

        for mut deployment in attached {
            deployment.build_id = None;
            let id = deployment.id.clone();
            match self.resources.deployments.update_by_id(&id, deployment).await {
                Ok(Some(deployment)) => {
                    let visibility = Visibility::Owners(deployment.all_owners());
                    self.audit
                        .publish(&Event::DeploymentUpdated { deployment }, &visibility);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to detach deployment {} from build {}: {}", id, build_id, e),
            }
        }
    }

    pub(super) async fn pull_build(&self, ctx: &Ctx, build_id: &str) -> Result<Outcome, CoreError> {
        let build = match self.find_build(build_id).await? {
            Some(build) => build,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Build(build.id.clone());
        if !can_mutate(&ctx.user, &build) {
            return Ok(self.deny(ctx, target, Operation::PullBuild).await);
        }
        if !build.has_repo() {
            return Ok(Outcome::Rejected(format!("build {} has no repo configured", build.name)));
        }

        let visibility = Visibility::Owners(build.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Build,
            target,
            Operation::PullBuild,
            ActionFlag::Pulling,
            visibility,
            move || async move {
                let op = NodeOp::PullRepo(self.build_repo_spec(&build));
                (self.run_on(build.server_id.as_deref(), op).await, None)
            },
        )
        .await
    }

    pub(super) async fn clone_build(&self, ctx: &Ctx, build_id: &str) -> Result<Outcome, CoreError> {
        let build = match self.find_build(build_id).await? {
            Some(build) => build,
            None => return Ok(Outcome::Ignored),
        };
        if !can_mutate(&ctx.user, &build) {
            return Ok(self
                .deny(ctx, UpdateTarget::Build(build.id.clone()), Operation::CloneBuild)
                .await);
        }
        if !build.has_repo() {
            return Ok(Outcome::Rejected(format!("build {} has no repo configured", build.name)));
        }
        self.clone_build_flow(ctx, build).await
    }

    /// Fresh clone of a build's working copy under the cloning flag
    async fn clone_build_flow(&self, ctx: &Ctx, build: Build) -> Result<Outcome, CoreError> {
        let visibility = Visibility::Owners(build.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Build,
            UpdateTarget::Build(build.id.clone()),
            Operation::CloneBuild,
            ActionFlag::Cloning,
            visibility,
            move || async move {
                let op = NodeOp::CloneRepo(self.build_repo_spec(&build));
                (self.run_on(build.server_id.as_deref(), op).await, None)
            },
        )
        .await
    }

    pub(super) async fn build(&self, ctx: &Ctx, build_id: &str) -> Result<Outcome, CoreError> {
        let build = match self.find_build(build_id).await? {
            Some(build) => build,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Build(build.id.clone());
        if !can_mutate(&ctx.user, &build) {
            return Ok(self.deny(ctx, target, Operation::Build).await);
        }

        let visibility = Visibility::Owners(build.all_owners());
        self.run_exclusive(
            ctx,
            ResourceKind::Build,
            target,
            Operation::Build,
            ActionFlag::Building,
            visibility,
            move || async move {
                let server_id = build.server_id.as_deref();
                let node = match self.resolve_node(server_id).await {
                    Ok(node) => node,
                    Err(e) => return (error_result(format!("build {}", build.name), e), None),
                };

                let mut steps = Vec::new();
                if build.has_repo() {
                    let op = NodeOp::PullRepo(self.build_repo_spec(&build));
                    steps.push(Step::ran("pull", self.executor.run(&node, op).await));
                } else {
                    steps.push(Step::skipped("pull"));
                }

                let spec = BuildSpec {
                    name: build.pull_name.clone(),
                    image: build.image_name(),
                    docker_build_args: build.docker_build_args.clone(),
                    cli_build: build.cli_build.clone(),
                    push: build
                        .docker_account
                        .as_deref()
                        .map(|account| !account.is_empty())
                        .unwrap_or(false),
                };
                steps.push(Step::ran("build", self.executor.run(&node, NodeOp::BuildImage(spec)).await));
                (merge_results(steps), None)
            },
        )
        .await
    }

    /// Signal a running image build; no action state is involved
    pub(super) async fn cancel_build(&self, ctx: &Ctx, build_id: &str) -> Result<Outcome, CoreError> {
        let build = match self.find_build(build_id).await? {
            Some(build) => build,
            None => return Ok(Outcome::Ignored),
        };
        let target = UpdateTarget::Build(build.id.clone());
        if !can_mutate(&ctx.user, &build) {
            return Ok(self.deny(ctx, target, Operation::CancelBuild).await);
        }

        let visibility = Visibility::Owners(build.all_owners());
        let update = self
            .execute_tracked(ctx, target, Operation::CancelBuild, visibility, Vec::new(), move || async move {
                let op = NodeOp::CancelBuild {
                    name: build.pull_name.clone(),
                };
                (self.run_on(build.server_id.as_deref(), op).await, None)
            })
            .await;
        Ok(Outcome::Completed(update))
    }
}
