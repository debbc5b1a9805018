//! Periphery API models

use serde::{Deserialize, Serialize};

// ================================ EXECUTION =================================== //

/// Captured output of a unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl Log {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Uniform result returned by every mutating periphery route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub command: String,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub is_error: bool,
}

impl ExecutionResult {
    pub fn new(
        command: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            command: command.into(),
            log: Log {
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            is_error,
        }
    }

    pub fn success(command: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self::new(command, stdout, "", false)
    }

    pub fn failure(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::new(command, "", stderr, true)
    }
}

// ================================= REQUESTS =================================== //

/// A shell command run inside a working copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Directory relative to the working copy root
    #[serde(default)]
    pub path: String,
    pub command: String,
}

impl Hook {
    pub fn is_configured(&self) -> bool {
        !self.command.trim().is_empty()
    }
}

/// Working copy to clone or pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSpec {
    /// Directory name of the working copy under the host's repo root
    pub name: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_clone: Option<Hook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_pull: Option<Hook>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRepo {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerBuildArgs {
    /// Build context relative to the working copy root
    #[serde(default)]
    pub build_path: String,
    /// Dockerfile relative to the build context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_path: Option<String>,
}

/// Image build to run inside a cloned working copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Working copy name, also the cancellation handle
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_build_args: Option<DockerBuildArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_build: Option<Hook>,
    #[serde(default)]
    pub push: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub local: String,
    pub container: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub local: String,
    pub container: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub variable: String,
    pub value: String,
}

/// Mount of a working copy directory into a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMount {
    /// Working copy name under the host's repo root
    pub repo: String,
    /// Directory relative to the working copy root
    #[serde(default)]
    pub path: String,
    /// Mount point inside the container
    pub container: String,
}

/// Container to (re)create with `docker run`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
    #[serde(default)]
    pub environment: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_mount: Option<RepoMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCreate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// `?tail=` query of the container log route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub tail: Option<u32>,
}

/// `?image=` query of the deploy route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployQuery {
    #[serde(default)]
    pub image: Option<String>,
}

// ================================ RESPONSES =================================== //

/// Reachability probe response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Docker state: created, running, exited, ...
    pub state: String,
    /// Human readable status, e.g. "Up 3 hours"
    pub status: String,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
}

/// One line of `docker stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerStat {
    pub name: String,
    pub cpu_perc: String,
    pub mem_usage: String,
    pub mem_perc: String,
    pub net_io: String,
    pub block_io: String,
    pub pids: String,
}

/// Host level metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_percent: f32,
    pub disk_used: u64,
    pub disk_total: u64,
    pub disk_percent: f32,
    pub uptime_secs: u64,
    pub cpu_count: usize,
    pub hostname: String,
}
