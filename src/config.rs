//! Config file handling
//!
//! Everything a session needs besides the tunnel spec itself is carried in an
//! explicit [`TunnelConfig`]; nothing is read from process arguments.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::Deserialize;
use tracing::debug;

use crate::errors::TunnelError;

/// Where label lookups search for pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupScope {
    /// Only the namespace named in the tunnel spec
    #[default]
    Namespace,
    /// Every namespace the credentials can list
    AllNamespaces,
}

/// kubetunnel configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    /// Explicit kubeconfig file; falls back to the usual inference when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[serde(default)]
    pub context: Option<String>,

    /// Interface the local end of the tunnel listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// Namespace scope for label lookups
    #[serde(default)]
    pub lookup_scope: LookupScope,

    /// Upper bound on how long `start` waits for readiness
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            listen_address: default_listen_address(),
            lookup_scope: LookupScope::default(),
            ready_timeout_secs: None,
        }
    }
}

impl TunnelConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, TunnelError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TunnelError::Config(format!("Failed to read config {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Load the config file from the default location, or defaults if there is none
    pub fn load_default() -> Result<Self, TunnelError> {
        let path = Self::default_config_file();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, TunnelError> {
        toml::from_str(content)
            .map_err(|e| TunnelError::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Get the default config file path
    pub fn default_config_file() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("kubetunnel"))
            .unwrap_or_else(|| PathBuf::from(".kubetunnel"))
            .join("config.toml")
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    /// Load the cluster connection settings these options point at
    pub async fn kube_config(&self) -> Result<kube::Config, TunnelError> {
        let options = KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        };

        match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| TunnelError::Config(format!("Failed to read kubeconfig {}: {}", path.display(), e)))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &options).await
                    .map_err(|e| TunnelError::Config(format!("Invalid kubeconfig {}: {}", path.display(), e)))
            }
            None if self.context.is_some() => kube::Config::from_kubeconfig(&options).await
                .map_err(|e| TunnelError::Config(format!("Invalid kubeconfig: {}", e))),
            None => kube::Config::infer().await
                .map_err(|e| TunnelError::Config(format!("Could not infer cluster config: {}", e))),
        }
    }
}
