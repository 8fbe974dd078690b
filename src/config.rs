//! Uplink configuration loading and validation

use crate::error::{UplinkError, UplinkResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_remote_port() -> u16 {
    22
}

fn default_sync_interval() -> u64 {
    600
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("/root/handshakes")
}

fn default_allowed_ips() -> String {
    "0.0.0.0/0, ::/0".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/tmp/wg0.conf")
}

fn default_activation_timeout() -> u64 {
    30
}

fn default_transfer_timeout() -> u64 {
    300
}

/// Uplink configuration, loaded from a TOML file.
///
/// Missing required fields are fatal at load time; the component never
/// becomes ready on an invalid configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkConfig {
    /// WireGuard private key for this device
    pub private_key: String,
    /// Local tunnel address in CIDR form (e.g. "10.0.0.2/24")
    pub address: String,
    /// Public key of the remote peer
    pub peer_public_key: String,
    /// Remote peer endpoint as host:port
    pub peer_endpoint: String,
    /// Username on the collection server
    pub remote_user: String,
    /// Destination directory on the collection server
    pub remote_dir: String,

    /// DNS server pushed into the tunnel (omitted from the config when unset)
    #[serde(default)]
    pub dns: Option<String>,
    /// Optional preshared key for the peer
    #[serde(default)]
    pub preshared_key: Option<String>,
    /// SSH port on the collection server
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    /// Delay before the service starts ticking
    #[serde(default)]
    pub startup_delay_secs: u64,
    /// Minimum interval between transfer attempts
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Local directory holding captured handshake files
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Destinations routed through the tunnel
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: String,
    /// Where the generated tunnel configuration file is written
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    /// Bound on wg-quick invocations
    #[serde(default = "default_activation_timeout")]
    pub activation_timeout_secs: u64,
    /// Bound on a single transfer attempt
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

impl UplinkConfig {
    /// Load and validate a configuration file
    pub async fn load(path: &Path) -> UplinkResult<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            UplinkError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: UplinkConfig = toml::from_str(&contents).map_err(|e| {
            UplinkError::ConfigError(format!("Invalid TOML in {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate field contents beyond what deserialization enforces
    pub fn validate(&self) -> UplinkResult<()> {
        for (name, value) in [
            ("private_key", &self.private_key),
            ("address", &self.address),
            ("peer_public_key", &self.peer_public_key),
            ("peer_endpoint", &self.peer_endpoint),
            ("remote_user", &self.remote_user),
            ("remote_dir", &self.remote_dir),
        ] {
            if value.trim().is_empty() {
                return Err(UplinkError::ConfigError(format!("'{}' must not be empty", name)));
            }
        }

        let (host, port) = self.peer_endpoint.rsplit_once(':').ok_or_else(|| {
            UplinkError::ConfigError("'peer_endpoint' must be in format 'host:port'".to_string())
        })?;
        if host.is_empty() {
            return Err(UplinkError::ConfigError(
                "'peer_endpoint' has an empty host".to_string(),
            ));
        }
        port.parse::<u16>().map_err(|_| {
            UplinkError::ConfigError(format!("'peer_endpoint' has an invalid port: {}", port))
        })?;

        if self.sync_interval_secs == 0 {
            return Err(UplinkError::ConfigError(
                "'sync_interval_secs' must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Host part of the peer endpoint, used as the transfer destination
    pub fn peer_host(&self) -> &str {
        self.peer_endpoint
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.peer_endpoint)
    }
}
