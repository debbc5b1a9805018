//! Outbound event envelopes

use periphery_api::{ContainerStatus, DockerStat, Log, SystemStats};
use serde::{Deserialize, Serialize};

use super::resources::{Build, Deployment, Server};
use super::update::Update;

/// Events pushed to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Event {
    Update {
        update: Update,
    },
    Progress {
        operation: String,
        target_id: String,
        complete: bool,
    },
    BuildCreated {
        build: Build,
    },
    BuildUpdated {
        build: Build,
    },
    BuildDeleted {
        build_id: String,
    },
    DeploymentCreated {
        deployment: Deployment,
    },
    DeploymentUpdated {
        deployment: Deployment,
    },
    DeploymentDeleted {
        deployment_id: String,
    },
    ServerAdded {
        server: Server,
    },
    ServerUpdated {
        server: Server,
    },
    ServerRemoved {
        server_id: String,
    },
    ContainerStatus {
        deployment_id: String,
        status: Option<ContainerStatus>,
    },
    ServerReachability {
        server_id: String,
        reachable: bool,
    },
    ServerStats {
        server_id: String,
        docker: Vec<DockerStat>,
        system: Option<SystemStats>,
    },
    ContainerLog {
        deployment_id: String,
        log: Log,
    },
    Updates {
        updates: Vec<Update>,
    },
    Notice {
        message: String,
    },
}

impl Event {
    pub fn notice(message: impl Into<String>) -> Self {
        Event::Notice {
            message: message.into(),
        }
    }

    pub fn progress(operation: impl Into<String>, target_id: impl Into<String>, complete: bool) -> Self {
        Event::Progress {
            operation: operation.into(),
            target_id: target_id.into(),
            complete,
        }
    }
}
