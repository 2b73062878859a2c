//! Server configuration: TOML file + environment/CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use vless_core::{Credential, SubMode, VlessError, VlessResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub subscription: SubscriptionSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_uuid")]
    pub uuid: String,
    /// Relay path without the leading slash. Derived from the uuid when unset.
    #[serde(default)]
    pub ws_path: Option<String>,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            uuid: default_uuid(),
            ws_path: None,
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

/// `[subscription]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSection {
    #[serde(default = "default_sub_path")]
    pub path: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_sub_mode")]
    pub mode: String,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            path: default_sub_path(),
            name: default_name(),
            domain: default_domain(),
            mode: default_sub_mode(),
        }
    }
}

fn default_port() -> u16 {
    3000
}
fn default_uuid() -> String {
    "5efabea4-f6d4-91fd-b8f0-17e004c89c60".to_string()
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_sub_path() -> String {
    "sub".to_string()
}
fn default_name() -> String {
    "Web".to_string()
}
fn default_domain() -> String {
    "example.com".to_string()
}
fn default_sub_mode() -> String {
    "plain".to_string()
}

/// Values supplied on the command line or through the environment.
/// Each one, when present, wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub uuid: Option<String>,
    pub ws_path: Option<String>,
    pub sub_path: Option<String>,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub sub_mode: Option<String>,
    pub heartbeat_secs: Option<u64>,
}

/// Resolved server configuration. Immutable once the listener starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub credential: Credential,
    /// Relay path without the leading slash.
    pub ws_path: String,
    /// Subscription path without the leading slash.
    pub sub_path: String,
    pub name: String,
    pub domain: String,
    pub sub_mode: SubMode,
    pub heartbeat: Duration,
}

impl ServerConfig {
    /// Load config from TOML file, then apply overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> VlessResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| VlessError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    /// Merge overrides into a parsed file config.
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> VlessResult<Self> {
        let uuid = overrides.uuid.unwrap_or(file.server.uuid);
        let credential = Credential::parse(&uuid)?;

        let ws_path = overrides
            .ws_path
            .or(file.server.ws_path)
            .map(|p| p.trim_start_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| credential.as_str().chars().take(8).collect());

        let sub_path = overrides
            .sub_path
            .unwrap_or(file.subscription.path)
            .trim_start_matches('/')
            .to_string();

        let heartbeat_secs = overrides
            .heartbeat_secs
            .unwrap_or(file.server.heartbeat_secs);
        if heartbeat_secs == 0 {
            return Err(VlessError::Config("heartbeat_secs must be positive".into()));
        }

        Ok(Self {
            port: overrides.port.unwrap_or(file.server.port),
            credential,
            ws_path,
            sub_path,
            name: overrides.name.unwrap_or(file.subscription.name),
            domain: overrides.domain.unwrap_or(file.subscription.domain),
            sub_mode: SubMode::parse_lenient(
                &overrides.sub_mode.unwrap_or(file.subscription.mode),
            ),
            heartbeat: Duration::from_secs(heartbeat_secs),
        })
    }

    /// The exact request target admitted for upgrades.
    pub fn relay_target(&self) -> String {
        format!("/{}", self.ws_path)
    }

    /// The exact request target serving the subscription.
    pub fn sub_target(&self) -> String {
        format!("/{}", self.sub_path)
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
