//! Inbound command envelopes

use std::fmt;

use serde::{Deserialize, Serialize};

use super::resources::{Build, Deployment, Server};
use super::update::UpdateTarget;

/// Audited operation names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    CreateBuild,
    UpdateBuild,
    DeleteBuild,
    PullBuild,
    CloneBuild,
    Build,
    CancelBuild,
    CreateDeployment,
    UpdateDeployment,
    DeleteDeployment,
    Deploy,
    PullDeployment,
    CloneDeployment,
    StartContainer,
    StopContainer,
    DeleteContainer,
    AddServer,
    UpdateServer,
    RemoveServer,
    CreateNetwork,
    DeleteNetwork,
    PruneImages,
    PruneNetworks,
    PruneContainers,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateBuild => "CreateBuild",
            Operation::UpdateBuild => "UpdateBuild",
            Operation::DeleteBuild => "DeleteBuild",
            Operation::PullBuild => "PullBuild",
            Operation::CloneBuild => "CloneBuild",
            Operation::Build => "Build",
            Operation::CancelBuild => "CancelBuild",
            Operation::CreateDeployment => "CreateDeployment",
            Operation::UpdateDeployment => "UpdateDeployment",
            Operation::DeleteDeployment => "DeleteDeployment",
            Operation::Deploy => "Deploy",
            Operation::PullDeployment => "PullDeployment",
            Operation::CloneDeployment => "CloneDeployment",
            Operation::StartContainer => "StartContainer",
            Operation::StopContainer => "StopContainer",
            Operation::DeleteContainer => "DeleteContainer",
            Operation::AddServer => "AddServer",
            Operation::UpdateServer => "UpdateServer",
            Operation::RemoveServer => "RemoveServer",
            Operation::CreateNetwork => "CreateNetwork",
            Operation::DeleteNetwork => "DeleteNetwork",
            Operation::PruneImages => "PruneImages",
            Operation::PruneNetworks => "PruneNetworks",
            Operation::PruneContainers => "PruneContainers",
        }
    }

    /// Name recorded for a refused attempt
    pub fn denied(&self) -> String {
        format!("{} (DENIED)", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of commands accepted on the client channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Command {
    // Builds
    CreateBuild(Build),
    UpdateBuild(Build),
    DeleteBuild { build_id: String },
    PullBuild { build_id: String },
    CloneBuild { build_id: String },
    Build { build_id: String },
    CancelBuild { build_id: String },

    // Deployments
    CreateDeployment(Deployment),
    UpdateDeployment(Deployment),
    DeleteDeployment { deployment_id: String },
    Deploy { deployment_id: String },
    PullDeployment { deployment_id: String },
    CloneDeployment { deployment_id: String },
    StartContainer { deployment_id: String },
    StopContainer { deployment_id: String },
    DeleteContainer { deployment_id: String },

    // Servers
    AddServer(Server),
    UpdateServer(Server),
    RemoveServer {
        server_id: String,
        #[serde(default)]
        delete_containers: bool,
    },
    CreateNetwork {
        server_id: String,
        name: String,
        #[serde(default)]
        driver: Option<String>,
    },
    DeleteNetwork { server_id: String, name: String },
    PruneImages { server_id: String },
    PruneNetworks { server_id: String },
    PruneContainers { server_id: String },

    // Queries
    GetContainerStatus { deployment_id: String },
    CheckServer { server_id: String },
    GetServerStats { server_id: String },
    GetContainerLog {
        deployment_id: String,
        #[serde(default)]
        tail: Option<u32>,
    },
    GetUpdates {
        #[serde(default)]
        target: Option<UpdateTarget>,
        #[serde(default)]
        offset: usize,
    },

    #[serde(other)]
    Unknown,
}

impl Command {
    /// Audited operation of this command, `None` for queries
    pub fn operation(&self) -> Option<Operation> {
        let op = match self {
            Command::CreateBuild(_) => Operation::CreateBuild,
            Command::UpdateBuild(_) => Operation::UpdateBuild,
            Command::DeleteBuild { .. } => Operation::DeleteBuild,
            Command::PullBuild { .. } => Operation::PullBuild,
            Command::CloneBuild { .. } => Operation::CloneBuild,
            Command::Build { .. } => Operation::Build,
            Command::CancelBuild { .. } => Operation::CancelBuild,
            Command::CreateDeployment(_) => Operation::CreateDeployment,
            Command::UpdateDeployment(_) => Operation::UpdateDeployment,
            Command::DeleteDeployment { .. } => Operation::DeleteDeployment,
            Command::Deploy { .. } => Operation::Deploy,
            Command::PullDeployment { .. } => Operation::PullDeployment,
            Command::CloneDeployment { .. } => Operation::CloneDeployment,
            Command::StartContainer { .. } => Operation::StartContainer,
            Command::StopContainer { .. } => Operation::StopContainer,
            Command::DeleteContainer { .. } => Operation::DeleteContainer,
            Command::AddServer(_) => Operation::AddServer,
            Command::UpdateServer(_) => Operation::UpdateServer,
            Command::RemoveServer { .. } => Operation::RemoveServer,
            Command::CreateNetwork { .. } => Operation::CreateNetwork,
            Command::DeleteNetwork { .. } => Operation::DeleteNetwork,
            Command::PruneImages { .. } => Operation::PruneImages,
            Command::PruneNetworks { .. } => Operation::PruneNetworks,
            Command::PruneContainers { .. } => Operation::PruneContainers,
            Command::GetContainerStatus { .. }
            | Command::CheckServer { .. }
            | Command::GetServerStats { .. }
            | Command::GetContainerLog { .. }
            | Command::GetUpdates { .. }
            | Command::Unknown => return None,
        };
        Some(op)
    }
}

/// A command plus the operator's free-text note
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub command: Command,
    pub note: Option<String>,
}

impl CommandEnvelope {
    pub fn new(command: Command) -> Self {
        Self { command, note: None }
    }

    /// Parses a `{type, ...fields, note?}` text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        let note = value
            .as_object_mut()
            .and_then(|obj| obj.remove("note"))
            .and_then(|n| n.as_str().map(str::to_string));
        let command = serde_json::from_value(value)?;
        Ok(Self { command, note })
    }
}
