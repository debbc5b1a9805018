//! Settings file management

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// fleetd settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP listener, mode dependent default port when unset
    #[serde(default)]
    pub server: Option<ServerSettings>,

    /// Fallback passkey for servers without their own
    #[serde(default)]
    pub default_passkey: Option<String>,

    /// Periphery mode configuration
    #[serde(default)]
    pub periphery: PeripherySettings,

    /// Directory holding local working copies, `<base_dir>/repos` when unset
    #[serde(default)]
    pub repo_root: Option<PathBuf>,

    /// Reachability probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Timeout of short periphery requests (queries, container control)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout of periphery requests
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Access tokens per github account, injected into clone URLs
    #[serde(default)]
    pub github_accounts: HashMap<String, String>,

    /// Snapshot loaded into the resource stores at startup, `<base_dir>/seed.json` when unset
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: None,
            default_passkey: None,
            periphery: PeripherySettings::default(),
            repo_root: None,
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            github_accounts: HashMap::new(),
            seed_file: None,
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Periphery mode settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeripherySettings {
    /// Accepted `Authorization` passkeys, everything is accepted when empty
    #[serde(default)]
    pub passkeys: Vec<String>,
}
