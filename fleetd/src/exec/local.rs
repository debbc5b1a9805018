//! Operations against the host fleetd runs on

use periphery_api::{
    BuildSpec, ContainerSpec, ContainerStatus, DockerStat, ExecutionResult, Log, Network,
    NetworkCreate, RenameRepo, RepoSpec, SystemStats,
};
use tracing::info;

use crate::errors::CoreError;
use crate::exec::cancel::CancelRegistry;
use crate::exec::result::error_result;
use crate::exec::{docker, git, stats};
use crate::filesys::dir::Dir;

/// Runs git and docker on the local host.
///
/// Used directly by the core node and served over HTTP in periphery mode.
#[derive(Debug, Clone)]
pub struct LocalHost {
    repos: Dir,
    cancels: CancelRegistry,
}

impl LocalHost {
    pub fn new(repos: Dir) -> Self {
        Self {
            repos,
            cancels: CancelRegistry::new(),
        }
    }

    pub fn repos(&self) -> &Dir {
        &self.repos
    }

    // ---------------------------------- repos ---------------------------------- //

    pub async fn clone_repo(&self, spec: &RepoSpec) -> ExecutionResult {
        git::clone(&self.repos, spec).await
    }

    pub async fn pull_repo(&self, spec: &RepoSpec) -> ExecutionResult {
        git::pull(&self.repos, spec).await
    }

    pub async fn delete_repo(&self, name: &str) -> ExecutionResult {
        git::delete(&self.repos, name).await
    }

    pub async fn rename_repo(&self, rename: &RenameRepo) -> ExecutionResult {
        git::rename(&self.repos, &rename.from, &rename.to).await
    }

    // --------------------------------- builds ---------------------------------- //

    pub async fn build_image(&self, spec: &BuildSpec) -> ExecutionResult {
        let repo_dir = match git::repo_dir(&self.repos, &spec.name) {
            Ok(dir) => dir,
            Err(e) => return error_result(format!("build {}", spec.image), e),
        };
        let handle = self.cancels.register(&spec.name);
        docker::build(spec, repo_dir.path(), handle.signal()).await
    }

    pub async fn cancel_build(&self, name: &str) -> ExecutionResult {
        let command = format!("cancel build {}", name);
        if self.cancels.cancel(name) {
            ExecutionResult::success(command, "cancel signal sent")
        } else {
            info!("No running build named {}", name);
            ExecutionResult::success(command, "no build running")
        }
    }

    // ------------------------------- containers -------------------------------- //

    pub async fn run_container(&self, spec: &ContainerSpec) -> ExecutionResult {
        docker::deploy(spec, self.repos.path()).await
    }

    pub async fn start_container(&self, name: &str) -> ExecutionResult {
        docker::start_container(name).await
    }

    pub async fn stop_container(&self, name: &str) -> ExecutionResult {
        docker::stop_container(name).await
    }

    pub async fn delete_container(&self, name: &str) -> ExecutionResult {
        docker::delete_container(name).await
    }

    pub async fn container_log(&self, name: &str, tail: Option<u32>) -> Result<Log, CoreError> {
        docker::container_log(name, tail).await
    }

    pub async fn container_status(&self, name: &str) -> Result<Option<ContainerStatus>, CoreError> {
        docker::container_status(name).await
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerStatus>, CoreError> {
        docker::list_containers().await
    }

    // -------------------------------- networks --------------------------------- //

    pub async fn list_networks(&self) -> Result<Vec<Network>, CoreError> {
        docker::list_networks().await
    }

    pub async fn create_network(&self, network: &NetworkCreate) -> ExecutionResult {
        docker::create_network(&network.name, network.driver.as_deref()).await
    }

    pub async fn delete_network(&self, name: &str) -> ExecutionResult {
        docker::delete_network(name).await
    }

    // --------------------------------- prune ----------------------------------- //

    pub async fn prune_images(&self) -> ExecutionResult {
        docker::prune_images().await
    }

    pub async fn prune_networks(&self) -> ExecutionResult {
        docker::prune_networks().await
    }

    pub async fn prune_containers(&self) -> ExecutionResult {
        docker::prune_containers().await
    }

    // --------------------------------- stats ----------------------------------- //

    pub async fn docker_stats(&self) -> Result<Vec<DockerStat>, CoreError> {
        docker::docker_stats().await
    }

    pub async fn system_stats(&self) -> Result<SystemStats, CoreError> {
        stats::system_stats().await
    }
}
