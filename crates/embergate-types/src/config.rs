//! Node configuration with sensible defaults.
//!
//! All operational parameters are centralized here. The embedding host
//! passes a [`NodeConfig`] to `start`; the manager snapshots it for the
//! lifetime of the node, so mid-flight mutation is impossible by
//! construction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{GatewayError, Result};

/// Directory component under `<data_dir>/<name>` holding light-client
/// chain data. Removed wholesale by `reset_chain_data`.
pub const CHAIN_DATA_SUBDIR: &str = "lightchaindata";

// ---------------------------------------------------------------------------
// UpstreamConfig
// ---------------------------------------------------------------------------

/// Upstream JSON-RPC endpoint configuration.
///
/// When enabled, read RPCs and the send-transaction path go to this
/// endpoint instead of the local light client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Whether the upstream endpoint is used at all.
    pub enabled: bool,
    /// HTTP(S) URL of the upstream JSON-RPC endpoint.
    pub url: String,
}

// ---------------------------------------------------------------------------
// BootClusterConfig
// ---------------------------------------------------------------------------

/// Static peers added to the node after start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BootClusterConfig {
    /// Whether static peers are added after start.
    pub enabled: bool,
    /// Enode URLs of the boot cluster.
    pub boot_nodes: Vec<String>,
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Configuration for a gateway node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network identifier; doubles as the EIP-155 chain id for signing.
    pub network_id: u64,

    /// Root of all on-disk state.
    pub data_dir: PathBuf,

    /// Node name; chain data lives under `<data_dir>/<name>`.
    pub name: String,

    /// Key files directory. Defaults to `<data_dir>/keystore` when unset.
    #[serde(default)]
    pub keystore_dir: Option<PathBuf>,

    /// Upstream RPC endpoint; selects the remote send path when enabled.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Static peers to add after start.
    #[serde(default)]
    pub boot_cluster: BootClusterConfig,

    /// Log level applied by the embedding host ("trace".."error").
    pub log_level: String,

    /// Optional log file path, also applied by the host.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            data_dir: PathBuf::from("embergate-data"),
            name: "embergate".into(),
            keystore_dir: None,
            upstream: UpstreamConfig::default(),
            boot_cluster: BootClusterConfig::default(),
            log_level: "info".into(),
            log_file: None,
        }
    }
}

impl NodeConfig {
    /// Creates a config for the given network rooted at `data_dir`.
    pub fn new(network_id: u64, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            network_id,
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Directory holding the light-client chain data.
    pub fn chain_data_dir(&self) -> PathBuf {
        self.data_dir.join(&self.name).join(CHAIN_DATA_SUBDIR)
    }

    /// Directory holding account key files.
    pub fn keystore_dir(&self) -> PathBuf {
        self.keystore_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keystore"))
    }

    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.network_id == 0 {
            return Err(GatewayError::Config {
                reason: "network_id must be greater than 0".into(),
            });
        }

        if self.data_dir == Path::new("") {
            return Err(GatewayError::Config {
                reason: "data_dir must not be empty".into(),
            });
        }

        if self.name.is_empty() || self.name.contains(std::path::MAIN_SEPARATOR) {
            return Err(GatewayError::Config {
                reason: "name must be a non-empty single path component".into(),
            });
        }

        if self.upstream.enabled
            && !(self.upstream.url.starts_with("http://")
                || self.upstream.url.starts_with("https://"))
        {
            return Err(GatewayError::Config {
                reason: format!("upstream.url is not a valid endpoint: '{}'", self.upstream.url),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn chain_data_dir_layout() {
        let config = NodeConfig::new(3, "/tmp/gate");
        let dir = config.chain_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/gate/embergate/lightchaindata"));
    }

    #[test]
    fn keystore_dir_defaults_under_data_dir() {
        let config = NodeConfig::new(3, "/tmp/gate");
        assert_eq!(config.keystore_dir(), PathBuf::from("/tmp/gate/keystore"));

        let explicit = NodeConfig {
            keystore_dir: Some(PathBuf::from("/keys")),
            ..config
        };
        assert_eq!(explicit.keystore_dir(), PathBuf::from("/keys"));
    }

    #[test]
    fn zero_network_id_rejected() {
        let config = NodeConfig {
            network_id: 0,
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_data_dir_rejected() {
        let config = NodeConfig {
            data_dir: PathBuf::new(),
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn upstream_without_scheme_rejected() {
        let config = NodeConfig {
            upstream: UpstreamConfig {
                enabled: true,
                url: "example.com:8545".into(),
            },
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn upstream_disabled_ignores_url() {
        let config = NodeConfig {
            upstream: UpstreamConfig {
                enabled: false,
                url: String::new(),
            },
            ..NodeConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_json_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = NodeConfig::new(3, "/tmp/gate");
        let json = serde_json::to_string(&config)?;
        let parsed: NodeConfig = serde_json::from_str(&json)?;
        assert_eq!(config, parsed);
        Ok(())
    }
}
