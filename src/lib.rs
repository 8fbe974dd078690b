//! wguplink - WireGuard Uplink Library
//!
//! Maintains an encrypted WireGuard tunnel to a remote collection server and
//! ships captured WiFi handshake files over it:
//! - Tunnel lifecycle (wg-quick up/down, state tracking)
//! - Transfer scheduling with a minimum interval and at-most-one-in-flight
//! - rsync-over-SSH transfer with non-interactive transport options
//! - Terse status string for an external display
//!
//! The external driver calls `Uplink::tick` whenever connectivity is
//! available; all failures become state transitions, never driver-fatal
//! errors.

pub mod command;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod transfer;
pub mod tunnel;

// Re-export commonly used types
pub use command::{CmdOutput, CommandRunner, SystemRunner};
pub use config::UplinkConfig;
pub use error::{UplinkError, UplinkResult};
pub use scheduler::{SyncDisposition, SyncScheduler};
pub use service::Uplink;
pub use status::StatusBoard;
pub use transfer::{
    RsyncExecutor, TransferExecutor, TransferFailure, TransferJob, TransferOutcome, TransferResult,
};
pub use tunnel::{ConnectionManager, ConnectionState, TunnelConfig};
