//! Subprocess invocation and file helpers shared across components

use crate::error::{UplinkError, UplinkResult};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Seam for invoking external binaries. All process invocations go through
/// this trait so components can be exercised without the real tools installed.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, bounded by `timeout`.
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> UplinkResult<CmdOutput>;
}

/// Runs commands on the host system via tokio::process
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> UplinkResult<CmdOutput> {
        debug!("Running command: {} {:?}", program, args);

        let output = match tokio::time::timeout(timeout, Command::new(program).args(args).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UplinkError::BinaryNotFound(program.to_string()));
            }
            Ok(Err(e)) => return Err(UplinkError::Io(e)),
            Err(_) => {
                return Err(UplinkError::Timeout(format!(
                    "{} did not finish within {}s",
                    program,
                    timeout.as_secs()
                )));
            }
        };

        Ok(CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Collapse multi-line tool output into a single log-friendly line.
pub fn normalize_diagnostic(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Write a secrets-bearing file with owner-only permissions.
///
/// The file is created with mode 0o600 so no other process can observe its
/// contents between creation and the permission change. Any pre-existing file
/// is removed first so stale permission bits never apply.
pub async fn write_secure_file(path: &Path, content: &str) -> UplinkResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;

    debug!("Wrote secure file: {:?}", path);
    Ok(())
}

/// Delete a file if it exists
pub async fn delete_file(path: &Path) -> UplinkResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Deleted file: {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_embedded_newlines() {
        assert_eq!(
            normalize_diagnostic("Address already in use\nfailed"),
            "Address already in use | failed"
        );
    }

    #[test]
    fn normalize_drops_blank_lines_and_whitespace() {
        assert_eq!(normalize_diagnostic("  one \n\n two \n"), "one | two");
        assert_eq!(normalize_diagnostic(""), "");
    }

    #[tokio::test]
    async fn secure_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg0.conf");

        write_secure_file(&path, "secret").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "secret");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn secure_file_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg0.conf");

        std::fs::write(&path, "old").unwrap();
        write_secure_file(&path, "new").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "new");
    }

    #[tokio::test]
    async fn delete_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.conf");

        delete_file(&path).await.unwrap();

        std::fs::write(&path, "x").unwrap();
        delete_file(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_binary_is_distinct() {
        let runner = SystemRunner;
        let err = runner
            .run("wguplink-no-such-binary", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, UplinkError::BinaryNotFound(_)));
    }
}
