//! Handshake transfer via rsync over SSH

use crate::command::{normalize_diagnostic, CommandRunner};
use crate::error::UplinkError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Why a transfer attempt failed. The scheduler uses this taxonomy, not raw
/// tool output, to decide whether to force a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    /// The transfer tool itself is not installed
    BinaryNotFound(String),
    /// The attempt exceeded its timeout
    Timeout,
    /// Remote unreachable, refused, or rejected authentication
    AuthOrConnectivity(String),
    /// Non-zero exit without a recognizable cause
    PartialOrUnknown { code: Option<i32>, detail: String },
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFailure::BinaryNotFound(name) => write!(f, "{} not installed", name),
            TransferFailure::Timeout => write!(f, "transfer timed out"),
            TransferFailure::AuthOrConnectivity(detail) => {
                write!(f, "remote unreachable or auth failed: {}", detail)
            }
            TransferFailure::PartialOrUnknown { code, detail } => {
                write!(f, "transfer failed (code {:?}): {}", code, detail)
            }
        }
    }
}

/// Result of a successful transfer attempt
#[derive(Debug, Clone)]
pub struct TransferResult {
    /// Newly created remote files, best-effort parsed from the tool summary
    pub created: u64,
    /// Raw diagnostic text for the operational log
    pub raw: String,
}

#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed(TransferResult),
    /// The local source directory does not exist yet; expected before the
    /// first capture, not an error
    NothingToDo,
}

/// Everything a single transfer attempt needs
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub source_dir: PathBuf,
    pub remote_user: String,
    pub remote_host: String,
    pub remote_port: u16,
    pub remote_dir: String,
    pub timeout: Duration,
}

/// Seam for the external copy mechanism
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn transfer(&self, job: &TransferJob) -> Result<TransferOutcome, TransferFailure>;
}

/// Invokes rsync with non-interactive SSH transport options and a bounded
/// timeout, then parses the `--stats` summary for the created-file count.
pub struct RsyncExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl RsyncExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl TransferExecutor for RsyncExecutor {
    async fn transfer(&self, job: &TransferJob) -> Result<TransferOutcome, TransferFailure> {
        let source_is_dir = match tokio::fs::metadata(&job.source_dir).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        };
        if !source_is_dir {
            debug!("Source directory {:?} does not exist yet", job.source_dir);
            return Ok(TransferOutcome::NothingToDo);
        }

        let args = build_args(job);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        info!("Transferring handshakes from {:?}", job.source_dir);
        let output = match self.runner.run("rsync", &arg_refs, job.timeout).await {
            Ok(output) => output,
            Err(UplinkError::BinaryNotFound(name)) => {
                return Err(TransferFailure::BinaryNotFound(name));
            }
            Err(UplinkError::Timeout(_)) => return Err(TransferFailure::Timeout),
            Err(e) => {
                return Err(TransferFailure::PartialOrUnknown {
                    code: None,
                    detail: e.to_string(),
                });
            }
        };

        if output.success() {
            // Parse failures default the count to zero without failing the
            // overall transfer.
            let created = parse_created_count(&output.stdout).unwrap_or(0);
            info!("Transfer complete: {} new file(s)", created);
            return Ok(TransferOutcome::Completed(TransferResult {
                created,
                raw: normalize_diagnostic(&output.stdout),
            }));
        }

        Err(classify_failure(output.code, &output.stderr))
    }
}

fn build_args(job: &TransferJob) -> Vec<String> {
    let transport = format!(
        "ssh -p {} -o StrictHostKeyChecking=no -o BatchMode=yes -o UserKnownHostsFile=/dev/null",
        job.remote_port
    );
    vec![
        "-rtz".to_string(),
        "--stats".to_string(),
        "-e".to_string(),
        transport,
        format!("{}/", job.source_dir.display()),
        format!("{}@{}:{}", job.remote_user, job.remote_host, job.remote_dir),
    ]
}

/// Scan rsync --stats output for the "Number of created files" line.
/// rsync groups digits with commas on large counts.
fn parse_created_count(stats: &str) -> Option<u64> {
    for line in stats.lines() {
        if let Some(rest) = line.trim().strip_prefix("Number of created files:") {
            let token = rest.trim().split_whitespace().next()?;
            let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
            return digits.parse().ok();
        }
    }
    None
}

fn classify_failure(code: Option<i32>, stderr: &str) -> TransferFailure {
    const CONNECTIVITY_MARKERS: [&str; 8] = [
        "connection refused",
        "connection timed out",
        "connection reset",
        "connection unexpectedly closed",
        "no route to host",
        "network is unreachable",
        "could not resolve hostname",
        "permission denied",
    ];

    let detail = normalize_diagnostic(stderr);
    let lower = stderr.to_ascii_lowercase();

    // rsync: 5 = error starting protocol, 10 = socket IO, 12 = protocol
    // stream, 30 = IO timeout, 35 = connect timeout
    let connectivity_code = matches!(code, Some(5) | Some(10) | Some(12) | Some(30) | Some(35));
    if connectivity_code || CONNECTIVITY_MARKERS.iter().any(|m| lower.contains(m)) {
        return TransferFailure::AuthOrConnectivity(detail);
    }

    TransferFailure::PartialOrUnknown { code, detail }
}
