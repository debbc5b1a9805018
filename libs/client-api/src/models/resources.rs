//! Resource models

use periphery_api::{DockerBuildArgs, EnvVar, Hook, PortMapping, VolumeMapping};
use serde::{Deserialize, Serialize};

/// Ownership shared by every resource kind
pub trait Owned {
    fn owners(&self) -> &[String];

    /// Single-owner field kept for records created before `owners`
    fn legacy_owner(&self) -> Option<&str> {
        None
    }

    fn is_owned_by(&self, username: &str) -> bool {
        self.owners().iter().any(|o| o == username) || self.legacy_owner() == Some(username)
    }

    /// Owners including the legacy owner, deduplicated
    fn all_owners(&self) -> Vec<String> {
        let mut owners = self.owners().to_vec();
        if let Some(owner) = self.legacy_owner() {
            if !owners.iter().any(|o| o == owner) {
                owners.push(owner.to_string());
            }
        }
        owners
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Image build definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Build {
    pub id: String,
    pub name: String,
    /// Canonical dashed name, also the working copy directory
    pub pull_name: String,
    pub owners: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Server the build runs on, core when unset
    pub server_id: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub github_account: Option<String>,
    pub on_clone: Option<Hook>,
    pub on_pull: Option<Hook>,
    pub docker_build_args: Option<DockerBuildArgs>,
    pub cli_build: Option<Hook>,
    pub docker_account: Option<String>,
}

impl Build {
    pub fn has_repo(&self) -> bool {
        has_text(&self.repo)
    }

    /// Image tag produced by this build
    pub fn image_name(&self) -> String {
        match self.docker_account.as_deref().filter(|a| !a.is_empty()) {
            Some(account) => format!("{}/{}", account, self.pull_name),
            None => self.pull_name.clone(),
        }
    }
}

impl Owned for Build {
    fn owners(&self) -> &[String] {
        &self.owners
    }

    fn legacy_owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

/// Container deployment definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub name: String,
    /// Canonical dashed name, used as container and working copy name
    pub container_name: String,
    pub owners: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub server_id: Option<String>,
    pub build_id: Option<String>,
    pub image: Option<String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMapping>,
    pub environment: Vec<EnvVar>,
    pub network: Option<String>,
    pub restart: Option<String>,
    pub post_image: Option<String>,
    pub container_user: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub github_account: Option<String>,
    pub on_clone: Option<Hook>,
    pub on_pull: Option<Hook>,
    /// Directory of the working copy mounted into the container
    pub repo_mount: Option<String>,
    pub container_mount: Option<String>,
}

impl Deployment {
    pub fn has_repo(&self) -> bool {
        has_text(&self.repo)
    }
}

impl Owned for Deployment {
    fn owners(&self) -> &[String] {
        &self.owners
    }

    fn legacy_owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

/// Managed node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Server {
    pub id: String,
    pub name: String,
    /// Base URL of the periphery agent
    pub address: String,
    #[serde(skip_serializing)]
    pub passkey: Option<String>,
    pub enabled: bool,
    pub is_core: bool,
    pub owners: Vec<String>,
    pub region: Option<String>,
}

impl Owned for Server {
    fn owners(&self) -> &[String] {
        &self.owners
    }
}

/// Operator account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    /// Permission tier: 0 none, 1 member, 2 admin
    pub permissions: u8,
    pub enabled: bool,
}
