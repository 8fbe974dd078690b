//! Transfer scheduling with an at-most-one-in-flight guarantee

use crate::transfer::{TransferExecutor, TransferFailure, TransferJob, TransferOutcome, TransferResult};
use crate::tunnel::{ConnectionManager, ConnectionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Bookkeeping for transfer eligibility
struct SyncRecord {
    /// Unix timestamp of the last completed attempt (success or failure)
    last_sync: StdMutex<Option<u64>>,
    /// Minimum seconds between attempts
    interval_secs: u64,
    /// Sole mutual-exclusion mechanism for transfers
    in_progress: AtomicBool,
}

/// What a `maybe_sync` call did
#[derive(Debug)]
pub enum SyncDisposition {
    /// Tunnel is not up; transfers require connect-before-sync
    NotConnected,
    /// Another transfer holds the in-progress flag
    AlreadyRunning,
    /// The minimum interval has not elapsed
    NotDue,
    /// Source directory absent; nothing captured yet
    NothingToDo,
    Completed(TransferResult),
    Failed(TransferFailure),
}

/// Decides when to hand off to the transfer executor. Reads connection state,
/// never mutates it, except to force `Down` when a transfer reveals the
/// remote is unreachable through a nominally-up tunnel.
pub struct SyncScheduler {
    record: SyncRecord,
    executor: Arc<dyn TransferExecutor>,
    manager: Arc<Mutex<ConnectionManager>>,
    job: TransferJob,
}

impl SyncScheduler {
    pub fn new(
        interval_secs: u64,
        executor: Arc<dyn TransferExecutor>,
        manager: Arc<Mutex<ConnectionManager>>,
        job: TransferJob,
    ) -> Self {
        Self {
            record: SyncRecord {
                last_sync: StdMutex::new(None),
                interval_secs,
                in_progress: AtomicBool::new(false),
            },
            executor,
            manager,
            job,
        }
    }

    /// Run a transfer if one is due. Declines rather than queueing when a
    /// transfer is already in flight. `last_sync` is stamped on return
    /// regardless of success so a failing remote cannot cause a tight retry
    /// loop.
    pub async fn maybe_sync(&self, now: u64) -> SyncDisposition {
        {
            let manager = self.manager.lock().await;
            if manager.state() != ConnectionState::Up {
                return SyncDisposition::NotConnected;
            }
        }

        // Check-and-set must be one atomic operation: a concurrent caller
        // must observe the flag and decline.
        if self
            .record
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Transfer already in progress, declining");
            return SyncDisposition::AlreadyRunning;
        }

        if !self.due(now) {
            self.record.in_progress.store(false, Ordering::Release);
            return SyncDisposition::NotDue;
        }

        let result = self.executor.transfer(&self.job).await;

        *self.record.last_sync.lock().unwrap() = Some(now);
        self.record.in_progress.store(false, Ordering::Release);

        match result {
            Ok(TransferOutcome::NothingToDo) => {
                debug!("No handshakes to transfer yet");
                SyncDisposition::NothingToDo
            }
            Ok(TransferOutcome::Completed(result)) => {
                info!("Sync complete: {} new file(s)", result.created);
                SyncDisposition::Completed(result)
            }
            Err(failure) => {
                warn!("Sync failed: {}", failure);
                if matches!(failure, TransferFailure::AuthOrConnectivity(_)) {
                    // The tunnel is nominally up but the remote is
                    // unreachable; force a reconnect on the next tick.
                    self.manager.lock().await.force_down();
                }
                SyncDisposition::Failed(failure)
            }
        }
    }

    fn due(&self, now: u64) -> bool {
        match *self.record.last_sync.lock().unwrap() {
            Some(last) => now.saturating_sub(last) >= self.record.interval_secs,
            None => true,
        }
    }

    /// Timestamp of the last completed attempt, if any
    pub fn last_sync(&self) -> Option<u64> {
        *self.record.last_sync.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CmdOutput, CommandRunner};
    use crate::error::UplinkResult;
    use crate::tunnel::TunnelConfig;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(
            &self,
            _program: &str,
            _args: &[&str],
            _timeout: Duration,
        ) -> UplinkResult<CmdOutput> {
            Ok(CmdOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    struct FakeExecutor {
        invocations: AtomicUsize,
        result: Box<dyn Fn() -> Result<TransferOutcome, TransferFailure> + Send + Sync>,
    }

    impl FakeExecutor {
        fn completing(created: u64) -> Self {
            Self {
                invocations: AtomicUsize::new(0),
                result: Box::new(move || {
                    Ok(TransferOutcome::Completed(TransferResult {
                        created,
                        raw: String::new(),
                    }))
                }),
            }
        }

        fn failing(failure: TransferFailure) -> Self {
            Self {
                invocations: AtomicUsize::new(0),
                result: Box::new(move || Err(failure.clone())),
            }
        }

        fn nothing_to_do() -> Self {
            Self {
                invocations: AtomicUsize::new(0),
                result: Box::new(|| Ok(TransferOutcome::NothingToDo)),
            }
        }

        fn count(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransferExecutor for FakeExecutor {
        async fn transfer(&self, _job: &TransferJob) -> Result<TransferOutcome, TransferFailure> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn manager_in(state: ConnectionState) -> Arc<Mutex<ConnectionManager>> {
        let tunnel = TunnelConfig {
            private_key: "K".to_string(),
            address: "10.0.0.2/24".to_string(),
            dns: None,
            peer_public_key: "P".to_string(),
            peer_endpoint: "vpn.example.com:51820".to_string(),
            preshared_key: None,
            allowed_ips: "0.0.0.0/0, ::/0".to_string(),
        };
        let mut manager = ConnectionManager::new(
            tunnel,
            PathBuf::from("/tmp/wg0-test.conf"),
            Duration::from_secs(5),
            Arc::new(NoopRunner),
        );
        manager.set_state(state);
        Arc::new(Mutex::new(manager))
    }

    fn job() -> TransferJob {
        TransferJob {
            source_dir: PathBuf::from("/root/handshakes"),
            remote_user: "uploader".to_string(),
            remote_host: "vpn.example.com".to_string(),
            remote_port: 22,
            remote_dir: "/srv/handshakes".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    fn scheduler(executor: Arc<FakeExecutor>, state: ConnectionState) -> SyncScheduler {
        SyncScheduler::new(600, executor, manager_in(state), job())
    }

    #[tokio::test]
    async fn declines_when_not_up() {
        let executor = Arc::new(FakeExecutor::completing(1));
        for state in [
            ConnectionState::Uninitialized,
            ConnectionState::Connecting,
            ConnectionState::Down,
            ConnectionState::Error,
        ] {
            let s = scheduler(executor.clone(), state);
            assert!(matches!(s.maybe_sync(1_000).await, SyncDisposition::NotConnected));
        }
        assert_eq!(executor.count(), 0);
    }

    #[tokio::test]
    async fn respects_minimum_interval() {
        let executor = Arc::new(FakeExecutor::completing(2));
        let s = scheduler(executor.clone(), ConnectionState::Up);

        assert!(matches!(s.maybe_sync(1_000).await, SyncDisposition::Completed(_)));
        assert_eq!(executor.count(), 1);

        // 599s elapsed: not due
        assert!(matches!(s.maybe_sync(1_599).await, SyncDisposition::NotDue));
        assert_eq!(executor.count(), 1);

        // 600s elapsed: due again
        assert!(matches!(s.maybe_sync(1_600).await, SyncDisposition::Completed(_)));
        assert_eq!(executor.count(), 2);
    }

    #[tokio::test]
    async fn failed_attempt_still_resets_backoff_clock() {
        let executor = Arc::new(FakeExecutor::failing(TransferFailure::PartialOrUnknown {
            code: Some(23),
            detail: "partial".to_string(),
        }));
        let s = scheduler(executor.clone(), ConnectionState::Up);

        assert!(matches!(s.maybe_sync(1_000).await, SyncDisposition::Failed(_)));
        assert_eq!(s.last_sync(), Some(1_000));

        assert!(matches!(s.maybe_sync(1_100).await, SyncDisposition::NotDue));
        assert_eq!(executor.count(), 1);
    }

    #[tokio::test]
    async fn nothing_to_do_stamps_last_sync() {
        let executor = Arc::new(FakeExecutor::nothing_to_do());
        let s = scheduler(executor, ConnectionState::Up);

        assert!(matches!(s.maybe_sync(1_000).await, SyncDisposition::NothingToDo));
        assert_eq!(s.last_sync(), Some(1_000));
    }

    #[tokio::test]
    async fn connectivity_failure_forces_tunnel_down() {
        let executor = Arc::new(FakeExecutor::failing(TransferFailure::AuthOrConnectivity(
            "connection refused".to_string(),
        )));
        let manager = manager_in(ConnectionState::Up);
        let s = SyncScheduler::new(600, executor, manager.clone(), job());

        assert!(matches!(s.maybe_sync(1_000).await, SyncDisposition::Failed(_)));
        assert_eq!(manager.lock().await.state(), ConnectionState::Down);
    }

    #[tokio::test]
    async fn non_connectivity_failure_leaves_tunnel_up() {
        let executor = Arc::new(FakeExecutor::failing(TransferFailure::PartialOrUnknown {
            code: Some(23),
            detail: "partial".to_string(),
        }));
        let manager = manager_in(ConnectionState::Up);
        let s = SyncScheduler::new(600, executor, manager.clone(), job());

        assert!(matches!(s.maybe_sync(1_000).await, SyncDisposition::Failed(_)));
        assert_eq!(manager.lock().await.state(), ConnectionState::Up);
    }
}
