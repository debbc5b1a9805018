//! Application configuration options

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::exec::PeripheryTimeouts;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Default listener port of the core node
pub const CORE_PORT: u16 = 9000;

/// Default listener port of a periphery agent
pub const PERIPHERY_PORT: u16 = 8000;

/// Which half of the system this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Control plane with the command channel
    Core,
    /// Agent executing operations for the core
    Periphery,
}

impl Mode {
    pub fn default_port(&self) -> u16 {
        match self {
            Mode::Core => CORE_PORT,
            Mode::Periphery => PERIPHERY_PORT,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Core => write!(f, "core"),
            Mode::Periphery => write!(f, "periphery"),
        }
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub mode: Mode,

    /// Server configuration
    pub server: ServerOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Directory holding local working copies
    pub repo_root: PathBuf,

    /// Snapshot loaded into the stores at startup (core only)
    pub seed_file: PathBuf,

    /// Periphery client timeouts (core only)
    pub timeouts: PeripheryTimeouts,

    /// Fallback passkey for servers without their own (core only)
    pub default_passkey: Option<String>,

    /// Accepted passkeys (periphery only)
    pub passkeys: Vec<String>,

    /// Access tokens per github account (core only)
    pub github_accounts: HashMap<String, String>,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl AppOptions {
    /// Options derived from a settings file, falling back to the layout
    /// for unset paths
    pub fn from_settings(mode: Mode, settings: &Settings, layout: StorageLayout) -> Self {
        let server = match &settings.server {
            Some(server) => ServerOptions {
                host: server.host.clone(),
                port: server.port,
            },
            None => ServerOptions::for_mode(mode),
        };
        let repo_root = settings
            .repo_root
            .clone()
            .unwrap_or_else(|| layout.repos_dir().path().to_path_buf());
        let seed_file = settings
            .seed_file
            .clone()
            .unwrap_or_else(|| layout.seed_file().path().to_path_buf());

        Self {
            mode,
            server,
            layout,
            repo_root,
            seed_file,
            timeouts: PeripheryTimeouts {
                connect: Duration::from_secs(settings.connect_timeout_secs),
                request: Duration::from_secs(settings.request_timeout_secs),
                probe: Duration::from_millis(settings.probe_timeout_ms),
            },
            default_passkey: settings.default_passkey.clone().filter(|p| !p.is_empty()),
            passkeys: settings.periphery.passkeys.clone(),
            github_accounts: settings.github_accounts.clone(),
            ..Self::default()
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        let layout = StorageLayout::default();
        Self {
            mode: Mode::Core,
            server: ServerOptions::default(),
            repo_root: layout.repos_dir().path().to_path_buf(),
            seed_file: layout.seed_file().path().to_path_buf(),
            layout,
            timeouts: PeripheryTimeouts::default(),
            default_passkey: None,
            passkeys: Vec::new(),
            github_accounts: HashMap::new(),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl ServerOptions {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            port: mode.default_port(),
            ..Self::default()
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: CORE_PORT,
        }
    }
}
