//! Uniform execution on the core node or a remote periphery agent

use std::sync::Arc;

use async_trait::async_trait;
use client_api::Server;
use periphery_api::{
    BuildSpec, ContainerSpec, ContainerStatus, DockerStat, ExecutionResult, Log, Network,
    NetworkCreate, RenameRepo, RepoSpec, SystemStats,
};
use tracing::debug;

use crate::errors::CoreError;
use crate::exec::local::LocalHost;
use crate::exec::remote::{Budget, PeripheryClient, RemoteNode};
use crate::exec::result::error_result;

/// Where an operation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Core,
    Remote(RemoteNode),
}

impl NodeRef {
    pub fn from_server(server: &Server) -> Self {
        if server.is_core {
            NodeRef::Core
        } else {
            NodeRef::Remote(RemoteNode {
                server_id: server.id.clone(),
                address: server.address.clone(),
                passkey: server.passkey.clone(),
                enabled: server.enabled,
            })
        }
    }

    pub fn is_core(&self) -> bool {
        matches!(self, NodeRef::Core)
    }
}

/// Operations a node can run, with their payloads
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOp {
    CloneRepo(RepoSpec),
    PullRepo(RepoSpec),
    DeleteRepo { name: String },
    RenameRepo(RenameRepo),
    BuildImage(BuildSpec),
    CancelBuild { name: String },
    RunContainer(ContainerSpec),
    StartContainer { name: String },
    StopContainer { name: String },
    DeleteContainer { name: String },
    GetContainerLog { name: String, tail: Option<u32> },
    GetContainerStatus { name: String },
    ListContainers,
    ListNetworks,
    CreateNetwork(NetworkCreate),
    DeleteNetwork { name: String },
    PruneImages,
    PruneNetworks,
    PruneContainers,
    GetDockerStats,
    GetSystemStats,
    CheckReachable,
}

impl NodeOp {
    /// Command label used when an operation fails before producing a result
    pub fn label(&self) -> String {
        match self {
            NodeOp::CloneRepo(spec) => format!("clone {}", spec.name),
            NodeOp::PullRepo(spec) => format!("pull {}", spec.name),
            NodeOp::DeleteRepo { name } => format!("delete repo {}", name),
            NodeOp::RenameRepo(rename) => format!("rename repo {} -> {}", rename.from, rename.to),
            NodeOp::BuildImage(spec) => format!("build {}", spec.image),
            NodeOp::CancelBuild { name } => format!("cancel build {}", name),
            NodeOp::RunContainer(spec) => format!("docker run {}", spec.name),
            NodeOp::StartContainer { name } => format!("docker start {}", name),
            NodeOp::StopContainer { name } => format!("docker stop {}", name),
            NodeOp::DeleteContainer { name } => format!("docker rm -f {}", name),
            NodeOp::GetContainerLog { name, .. } => format!("docker logs {}", name),
            NodeOp::GetContainerStatus { name } => format!("docker ps {}", name),
            NodeOp::ListContainers => "docker ps".to_string(),
            NodeOp::ListNetworks => "docker network ls".to_string(),
            NodeOp::CreateNetwork(network) => format!("docker network create {}", network.name),
            NodeOp::DeleteNetwork { name } => format!("docker network rm {}", name),
            NodeOp::PruneImages => "docker image prune -a -f".to_string(),
            NodeOp::PruneNetworks => "docker network prune -f".to_string(),
            NodeOp::PruneContainers => "docker container prune -f".to_string(),
            NodeOp::GetDockerStats => "docker stats".to_string(),
            NodeOp::GetSystemStats => "system stats".to_string(),
            NodeOp::CheckReachable => "status".to_string(),
        }
    }
}

/// Output of a node operation
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    Result(ExecutionResult),
    Log(Log),
    Status(Option<ContainerStatus>),
    Containers(Vec<ContainerStatus>),
    Networks(Vec<Network>),
    DockerStats(Vec<DockerStat>),
    SystemStats(SystemStats),
    Reachable(bool),
}

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run an operation on a node
    async fn execute(&self, node: &NodeRef, op: NodeOp) -> Result<NodeOutput, CoreError>;

    /// Reachability of a node; never fails
    async fn check_reachable(&self, node: &NodeRef) -> bool;

    /// Run a mutating operation, folding every failure into the result
    async fn run(&self, node: &NodeRef, op: NodeOp) -> ExecutionResult {
        let label = op.label();
        match self.execute(node, op).await {
            Ok(NodeOutput::Result(result)) => result,
            Ok(other) => ExecutionResult::success(label, format!("{:?}", other)),
            Err(e) => error_result(label, e),
        }
    }
}

/// Executor dispatching to the local host or a periphery agent
#[derive(Clone)]
pub struct Executor {
    local: Arc<LocalHost>,
    periphery: PeripheryClient,
}

impl Executor {
    pub fn new(local: Arc<LocalHost>, periphery: PeripheryClient) -> Self {
        Self { local, periphery }
    }

    async fn execute_local(&self, op: NodeOp) -> Result<NodeOutput, CoreError> {
        let local = &self.local;
        let output = match op {
            NodeOp::CloneRepo(spec) => NodeOutput::Result(local.clone_repo(&spec).await),
            NodeOp::PullRepo(spec) => NodeOutput::Result(local.pull_repo(&spec).await),
            NodeOp::DeleteRepo { name } => NodeOutput::Result(local.delete_repo(&name).await),
            NodeOp::RenameRepo(rename) => NodeOutput::Result(local.rename_repo(&rename).await),
            NodeOp::BuildImage(spec) => NodeOutput::Result(local.build_image(&spec).await),
            NodeOp::CancelBuild { name } => NodeOutput::Result(local.cancel_build(&name).await),
            NodeOp::RunContainer(spec) => NodeOutput::Result(local.run_container(&spec).await),
            NodeOp::StartContainer { name } => NodeOutput::Result(local.start_container(&name).await),
            NodeOp::StopContainer { name } => NodeOutput::Result(local.stop_container(&name).await),
            NodeOp::DeleteContainer { name } => NodeOutput::Result(local.delete_container(&name).await),
            NodeOp::GetContainerLog { name, tail } => NodeOutput::Log(local.container_log(&name, tail).await?),
            NodeOp::GetContainerStatus { name } => NodeOutput::Status(local.container_status(&name).await?),
            NodeOp::ListContainers => NodeOutput::Containers(local.list_containers().await?),
            NodeOp::ListNetworks => NodeOutput::Networks(local.list_networks().await?),
            NodeOp::CreateNetwork(network) => NodeOutput::Result(local.create_network(&network).await),
            NodeOp::DeleteNetwork { name } => NodeOutput::Result(local.delete_network(&name).await),
            NodeOp::PruneImages => NodeOutput::Result(local.prune_images().await),
            NodeOp::PruneNetworks => NodeOutput::Result(local.prune_networks().await),
            NodeOp::PruneContainers => NodeOutput::Result(local.prune_containers().await),
            NodeOp::GetDockerStats => NodeOutput::DockerStats(local.docker_stats().await?),
            NodeOp::GetSystemStats => NodeOutput::SystemStats(local.system_stats().await?),
            NodeOp::CheckReachable => NodeOutput::Reachable(true),
        };
        Ok(output)
    }

    async fn execute_remote(&self, node: &RemoteNode, op: NodeOp) -> Result<NodeOutput, CoreError> {
        let p = &self.periphery;
        let output = match op {
            NodeOp::CloneRepo(spec) => {
                NodeOutput::Result(p.post(node, "/repo/clone", &[], &spec, Budget::Unbounded).await?)
            }
            NodeOp::PullRepo(spec) => {
                NodeOutput::Result(p.post(node, "/repo/pull", &[], &spec, Budget::Unbounded).await?)
            }
            NodeOp::DeleteRepo { name } => NodeOutput::Result(
                p.get(node, &format!("/repo/delete/{}", name), &[], Budget::Request).await?,
            ),
            NodeOp::RenameRepo(rename) => {
                NodeOutput::Result(p.post(node, "/repo/rename", &[], &rename, Budget::Request).await?)
            }
            NodeOp::BuildImage(spec) => {
                NodeOutput::Result(p.post(node, "/build", &[], &spec, Budget::Unbounded).await?)
            }
            NodeOp::CancelBuild { name } => NodeOutput::Result(
                p.get(node, &format!("/build/cancel/{}", name), &[], Budget::Request).await?,
            ),
            NodeOp::RunContainer(spec) => {
                let query = [("image", spec.image.clone())];
                NodeOutput::Result(p.post(node, "/deploy", &query, &spec, Budget::Unbounded).await?)
            }
            NodeOp::StartContainer { name } => NodeOutput::Result(
                p.get(node, &format!("/container/start/{}", name), &[], Budget::Request).await?,
            ),
            NodeOp::StopContainer { name } => NodeOutput::Result(
                p.get(node, &format!("/container/stop/{}", name), &[], Budget::Request).await?,
            ),
            NodeOp::DeleteContainer { name } => NodeOutput::Result(
                p.get(node, &format!("/container/delete/{}", name), &[], Budget::Request).await?,
            ),
            NodeOp::GetContainerLog { name, tail } => {
                let query: Vec<(&str, String)> = tail.map(|t| ("tail", t.to_string())).into_iter().collect();
                NodeOutput::Log(
                    p.get(node, &format!("/container/log/{}", name), &query, Budget::Request).await?,
                )
            }
            NodeOp::GetContainerStatus { name } => NodeOutput::Status(
                p.get(node, &format!("/container/{}", name), &[], Budget::Request).await?,
            ),
            NodeOp::ListContainers => {
                NodeOutput::Containers(p.get(node, "/containers", &[], Budget::Request).await?)
            }
            NodeOp::ListNetworks => NodeOutput::Networks(p.get(node, "/networks", &[], Budget::Request).await?),
            NodeOp::CreateNetwork(network) => NodeOutput::Result(
                p.post(node, "/network/create", &[], &network, Budget::Request).await?,
            ),
            NodeOp::DeleteNetwork { name } => NodeOutput::Result(
                p.get(node, &format!("/network/delete/{}", name), &[], Budget::Request).await?,
            ),
            NodeOp::PruneImages => {
                NodeOutput::Result(p.get(node, "/images/prune", &[], Budget::Unbounded).await?)
            }
            NodeOp::PruneNetworks => {
                NodeOutput::Result(p.get(node, "/networks/prune", &[], Budget::Request).await?)
            }
            NodeOp::PruneContainers => {
                NodeOutput::Result(p.get(node, "/containers/prune", &[], Budget::Request).await?)
            }
            NodeOp::GetDockerStats => NodeOutput::DockerStats(p.get(node, "/stats", &[], Budget::Request).await?),
            NodeOp::GetSystemStats => {
                NodeOutput::SystemStats(p.get(node, "/stats/system", &[], Budget::Request).await?)
            }
            NodeOp::CheckReachable => NodeOutput::Reachable(p.probe(node).await),
        };
        Ok(output)
    }
}

#[async_trait]
impl NodeExecutor for Executor {
    async fn execute(&self, node: &NodeRef, op: NodeOp) -> Result<NodeOutput, CoreError> {
        match node {
            NodeRef::Core => self.execute_local(op).await,
            NodeRef::Remote(remote) if !remote.enabled => {
                if op == NodeOp::CheckReachable {
                    return Ok(NodeOutput::Reachable(false));
                }
                Err(CoreError::NodeUnreachable(format!(
                    "server {} is disabled",
                    remote.server_id
                )))
            }
            NodeRef::Remote(remote) => self.execute_remote(remote, op).await,
        }
    }

    async fn check_reachable(&self, node: &NodeRef) -> bool {
        match node {
            NodeRef::Core => true,
            NodeRef::Remote(remote) if !remote.enabled => {
                debug!("Server {} is disabled, skipping probe", remote.server_id);
                false
            }
            NodeRef::Remote(remote) => self.periphery.probe(remote).await,
        }
    }
}
