//! Error types for wguplink

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum UplinkError {
    /// IO error
    Io(io::Error),
    /// Command execution failed
    CommandFailed { cmd: String, code: Option<i32>, stderr: String },
    /// External binary not installed
    BinaryNotFound(String),
    /// Configuration error
    ConfigError(String),
    /// Timeout
    Timeout(String),
    /// Parse error
    ParseError(String),
    /// Invalid state
    InvalidState(String),
}

impl fmt::Display for UplinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UplinkError::Io(e) => write!(f, "IO error: {}", e),
            UplinkError::CommandFailed { cmd, code, stderr } => {
                if let Some(code) = code {
                    write!(f, "Command '{}' failed with code {}: {}", cmd, code, stderr)
                } else {
                    write!(f, "Command '{}' failed: {}", cmd, stderr)
                }
            }
            UplinkError::BinaryNotFound(name) => write!(f, "Binary not found: {}", name),
            UplinkError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            UplinkError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            UplinkError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            UplinkError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for UplinkError {}

impl From<io::Error> for UplinkError {
    fn from(error: io::Error) -> Self {
        UplinkError::Io(error)
    }
}

pub type UplinkResult<T> = Result<T, UplinkError>;
