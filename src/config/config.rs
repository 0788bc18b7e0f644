//! Config file handling

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::TunnelError;
use crate::k8s::portforward::TunnelOptions;
use crate::k8s::resolver::PollPolicy;
use crate::logging::LogLevel;

/// Overrides the config directory
pub const CONFIG_DIR_ENV: &str = "PODTUNNEL_CONFIG_DIR";

/// Where cluster credentials come from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSource {
    /// Kubeconfig file; `None` means in-cluster configuration
    pub kubeconfig: Option<PathBuf>,
    /// Context overriding the kubeconfig's current context
    pub context: Option<String>,
}

impl ClusterSource {
    pub fn new(kubeconfig: Option<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig,
            context: context.filter(|c| !c.is_empty()),
        }
    }

    /// Use the service account of the pod we are running in
    pub fn in_cluster() -> Self {
        Self::default()
    }

    /// An explicit path wins; otherwise fall back to `KUBECONFIG` and `~/.kube/config`
    pub fn discover(explicit: Option<PathBuf>, context: Option<String>) -> Self {
        let kubeconfig = explicit.or_else(default_kubeconfig_path);
        Self::new(kubeconfig, context)
    }
}

/// The kubeconfig a client would pick up without an explicit path
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    kubeconfig_from(std::env::var_os("KUBECONFIG"), dirs::home_dir())
}

fn kubeconfig_from(env: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    let candidate = match env {
        Some(value) => std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()),
        None => home.map(|h| h.join(".kube").join("config")),
    };
    candidate.filter(|p| p.is_file())
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelSection {
    pub grace_ms: Option<u64>,
    /// Dial the pod once while starting a tunnel
    pub probe: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessSection {
    pub max_checks: Option<u32>,
    pub interval_secs: Option<u64>,
}

/// podtunnel configuration (`config.toml`)
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub namespace: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub log_level: Option<LogLevel>,
    pub bind_address: Option<IpAddr>,
    pub tunnel: TunnelSection,
    pub readiness: ReadinessSection,
}

impl Settings {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self, TunnelError> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, TunnelError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| TunnelError::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| TunnelError::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Get the config directory; `PODTUNNEL_CONFIG_DIR` overrides the platform default
    pub fn config_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .map(|p| p.join("podtunnel"))
            .unwrap_or_else(|| PathBuf::from(".podtunnel"))
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Tunnel options with the file's overrides applied
    pub fn tunnel_options(&self) -> TunnelOptions {
        let defaults = TunnelOptions::default();
        let default_poll = PollPolicy::default();

        TunnelOptions {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            grace: self
                .tunnel
                .grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.grace),
            probe_on_start: self.tunnel.probe.unwrap_or(defaults.probe_on_start),
            readiness: PollPolicy {
                max_checks: self.readiness.max_checks.unwrap_or(default_poll.max_checks),
                interval: self
                    .readiness
                    .interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_poll.interval),
            },
            ..defaults
        }
    }
}
