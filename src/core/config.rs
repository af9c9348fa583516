use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "LABDROP_CONFIG";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// The catalog fetch executable. Type and id are appended to `args`.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_program")]
    pub program: String,

    #[serde(default = "default_fetch_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Managed base directory; its subfolders must be named `vendor-product`.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Permission-repair command run on the lab host after a copy.
    #[serde(default = "default_fix_permissions")]
    pub fix_permissions: String,

    #[serde(default = "default_sshpass")]
    pub sshpass: String,

    #[serde(default = "default_ssh")]
    pub ssh: String,

    #[serde(default = "default_scp")]
    pub scp: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_fetch_program() -> String {
    "/opt/ishare2-cli/ishare2".to_string()
}
fn default_fetch_args() -> Vec<String> {
    vec!["pull".to_string()]
}
fn default_base_dir() -> PathBuf {
    PathBuf::from("/opt/unetlab/addons/qemu")
}
fn default_fix_permissions() -> String {
    "/opt/unetlab/wrappers/unl_wrapper -a fixpermissions".to_string()
}
fn default_sshpass() -> String {
    "sshpass".to_string()
}
fn default_ssh() -> String {
    "ssh".to_string()
}
fn default_scp() -> String {
    "scp".to_string()
}
fn default_connect_timeout() -> u32 {
    30
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            program: default_fetch_program(),
            args: default_fetch_args(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            fix_permissions: default_fix_permissions(),
            sshpass: default_sshpass(),
            ssh: default_ssh(),
            scp: default_scp(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Resolve the config path: explicit flag, then `LABDROP_CONFIG`, then
    /// the per-user config directory.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("labdrop").join("config.toml"))
    }

    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_path(explicit) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            if explicit.is_some() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            info!("No config file at {}, using defaults.", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        info!(
            "Loaded config from {}: fetch={}, base_dir={}",
            path.display(),
            config.fetch.program,
            config.remote.base_dir.display()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
