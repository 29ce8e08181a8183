//! Config file + environment loading for the `meshlink-node` binary
//! (SPEC_FULL.md §3 "Configuration"): YAML file, then `MESHLINK_*`
//! environment overrides, then CLI flags — each layer overriding the
//! last only where it sets a value.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A node's file/environment-sourced configuration. Every field is
/// optional at this layer so later layers (env, CLI) can leave it
/// unset rather than silently overwrite a file value with a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeshNodeConfig {
    /// Local address to bind the discovery/coordinator/node listeners to.
    pub bind_ip: IpAddr,
    /// Session identifier: the host's session name, or a client's
    /// username. Random if unset.
    pub identifier: Option<String>,
    /// Starting probe value for `discoveryPort` (spec.md §3 default 5330).
    pub discovery_port: Option<u16>,
    /// Starting probe value for `coordinatorPort`.
    pub coordinator_port: Option<u16>,
    /// Starting probe value for `nodePort`.
    pub node_port: Option<u16>,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_level: String,
}

impl Default for MeshNodeConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            identifier: None,
            discovery_port: None,
            coordinator_port: None,
            node_port: None,
            log_level: default_log_level(),
        }
    }
}

impl MeshNodeConfig {
    /// Load defaults, merge a YAML file at `path` if it exists, then
    /// merge `MESHLINK_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let contents = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
                config = serde_yaml::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))?;
                info!(path = %path.display(), "loaded configuration file");
            } else {
                warn!(path = %path.display(), "config file not found, using defaults");
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MESHLINK_BIND_IP") {
            match v.parse() {
                Ok(ip) => self.bind_ip = ip,
                Err(_) => warn!(value = %v, "MESHLINK_BIND_IP is not a valid IP address, ignoring"),
            }
        }
        if let Ok(v) = std::env::var("MESHLINK_IDENTIFIER") {
            self.identifier = Some(v);
        }
        if let Ok(v) = std::env::var("MESHLINK_DISCOVERY_PORT") {
            if let Ok(p) = v.parse() {
                self.discovery_port = Some(p);
            }
        }
        if let Ok(v) = std::env::var("MESHLINK_COORDINATOR_PORT") {
            if let Ok(p) = v.parse() {
                self.coordinator_port = Some(p);
            }
        }
        if let Ok(v) = std::env::var("MESHLINK_NODE_PORT") {
            if let Ok(p) = v.parse() {
                self.node_port = Some(p);
            }
        }
        if let Ok(v) = std::env::var("MESHLINK_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_to_unspecified_and_info_logging() {
        let config = MeshNodeConfig::default();
        assert_eq!(config.bind_ip, IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.log_level, "info");
        assert!(config.identifier.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = MeshNodeConfig::load(Some(Path::new("/nonexistent/meshlink.yaml"))).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn yaml_file_values_are_applied() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("meshlink-test-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "identifier: blorp-glork\nlog_level: debug\n").unwrap();

        let config = MeshNodeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.identifier.as_deref(), Some("blorp-glork"));
        assert_eq!(config.log_level, "debug");

        std::fs::remove_file(&path).ok();
    }
}
