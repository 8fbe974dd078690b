//! Tunnel lifecycle management via wg-quick

use crate::command::{delete_file, normalize_diagnostic, write_secure_file, CommandRunner};
use crate::config::UplinkConfig;
use crate::error::{UplinkError, UplinkResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const PERSISTENT_KEEPALIVE_SECS: u32 = 25;

/// WireGuard tunnel parameters, rendered into a wg-quick configuration file
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub private_key: String,
    pub address: String,
    pub dns: Option<String>,
    pub peer_public_key: String,
    pub peer_endpoint: String,
    pub preshared_key: Option<String>,
    pub allowed_ips: String,
}

impl TunnelConfig {
    pub fn from_config(config: &UplinkConfig) -> Self {
        Self {
            private_key: config.private_key.clone(),
            address: config.address.clone(),
            dns: config.dns.clone(),
            peer_public_key: config.peer_public_key.clone(),
            peer_endpoint: config.peer_endpoint.clone(),
            preshared_key: config.preshared_key.clone(),
            allowed_ips: config.allowed_ips.clone(),
        }
    }

    /// Render the [Interface]/[Peer] configuration file content.
    /// Optional lines are omitted entirely when unset.
    pub fn render(&self) -> String {
        let mut cfg = String::new();

        cfg.push_str("[Interface]\n");
        cfg.push_str(&format!("PrivateKey = {}\n", self.private_key));
        cfg.push_str(&format!("Address = {}\n", self.address));
        if let Some(dns) = &self.dns {
            cfg.push_str(&format!("DNS = {}\n", dns));
        }

        cfg.push_str("\n[Peer]\n");
        cfg.push_str(&format!("PublicKey = {}\n", self.peer_public_key));
        cfg.push_str(&format!("Endpoint = {}\n", self.peer_endpoint));
        cfg.push_str(&format!("AllowedIPs = {}\n", self.allowed_ips));
        cfg.push_str(&format!("PersistentKeepalive = {}\n", PERSISTENT_KEEPALIVE_SECS));
        if let Some(psk) = &self.preshared_key {
            cfg.push_str(&format!("PresharedKey = {}\n", psk));
        }

        cfg
    }
}

/// Connection state for the tunnel. No state is terminal; the manager may
/// cycle through reconnects indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Up,
    Down,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "Initializing",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Up => "Up",
            ConnectionState::Down => "Down",
            ConnectionState::Error => "Error",
        }
    }
}

/// Owns the tunnel lifecycle: writes the configuration file, drives wg-quick,
/// and tracks connection state. Retry is driven externally; a failed
/// activation leaves the manager in `Error` until the next eligible tick.
pub struct ConnectionManager {
    tunnel: TunnelConfig,
    config_path: PathBuf,
    activation_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    state: ConnectionState,
    diagnostic: Option<String>,
    missing_binary_reported: bool,
}

impl ConnectionManager {
    pub fn new(
        tunnel: TunnelConfig,
        config_path: PathBuf,
        activation_timeout: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            tunnel,
            config_path,
            activation_timeout,
            runner,
            state: ConnectionState::Uninitialized,
            diagnostic: None,
            missing_binary_reported: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Single-line diagnostic from the last failed activation, if any
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Force the state to `Down` so the next tick reconnects. Used by the
    /// scheduler when a transfer reveals the tunnel is silently dead.
    pub fn force_down(&mut self) {
        if self.state == ConnectionState::Up {
            warn!("Tunnel marked down after degraded-link detection");
            self.state = ConnectionState::Down;
        }
    }

    /// Bring the tunnel up. Idempotent while `Up`: no command is invoked.
    pub async fn connect(&mut self) -> UplinkResult<()> {
        if self.state == ConnectionState::Up {
            return Ok(());
        }

        info!("Attempting to connect tunnel");
        self.state = ConnectionState::Connecting;

        // Best-effort cleanup of any stale interface
        self.teardown_interface().await;

        let content = self.tunnel.render();
        write_secure_file(&self.config_path, &content).await?;

        let config_path = self.path_str()?.to_string();
        match self
            .runner
            .run("wg-quick", &["up", config_path.as_str()], self.activation_timeout)
            .await
        {
            Ok(output) if output.success() => {
                self.state = ConnectionState::Up;
                self.diagnostic = None;
                self.missing_binary_reported = false;
                info!("Tunnel established");
                Ok(())
            }
            Ok(output) => {
                let diag = normalize_diagnostic(&output.stderr);
                error!("wg-quick up failed: {}", diag);
                self.state = ConnectionState::Error;
                self.diagnostic = Some(diag.clone());
                Err(UplinkError::CommandFailed {
                    cmd: "wg-quick up".to_string(),
                    code: output.code,
                    stderr: diag,
                })
            }
            Err(UplinkError::BinaryNotFound(name)) => {
                if !self.missing_binary_reported {
                    error!("'{}' is not installed; tunnel cannot be established", name);
                    self.missing_binary_reported = true;
                }
                self.state = ConnectionState::Error;
                self.diagnostic = Some(format!("{} not installed", name));
                Err(UplinkError::BinaryNotFound(name))
            }
            Err(e) => {
                error!("wg-quick up failed: {}", e);
                self.state = ConnectionState::Error;
                self.diagnostic = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Tear the tunnel down and remove the configuration file.
    /// Tolerates a missing binary and nothing-to-tear-down failures.
    pub async fn disconnect(&mut self) -> UplinkResult<()> {
        info!("Disconnecting tunnel");
        self.teardown_interface().await;
        delete_file(&self.config_path).await?;
        self.state = ConnectionState::Down;
        Ok(())
    }

    async fn teardown_interface(&self) {
        let config_path = match self.path_str() {
            Ok(path) => path.to_string(),
            Err(_) => return,
        };

        match self
            .runner
            .run("wg-quick", &["down", config_path.as_str()], self.activation_timeout)
            .await
        {
            Ok(output) if !output.success() => {
                debug!(
                    "wg-quick down reported: {}",
                    normalize_diagnostic(&output.stderr)
                );
            }
            Ok(_) => {}
            Err(e) => debug!("wg-quick down unavailable: {}", e),
        }
    }

    fn path_str(&self) -> UplinkResult<&str> {
        self.config_path.to_str().ok_or_else(|| {
            UplinkError::ConfigError("Config path contains invalid UTF-8".to_string())
        })
    }

    #[cfg(test)]
    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }
}
