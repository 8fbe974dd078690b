//! Service wiring: lifecycle entry points and the periodic tick

use crate::command::{CommandRunner, SystemRunner};
use crate::config::UplinkConfig;
use crate::error::UplinkResult;
use crate::scheduler::{SyncDisposition, SyncScheduler};
use crate::status::StatusBoard;
use crate::transfer::{RsyncExecutor, TransferExecutor, TransferJob};
use crate::tunnel::{ConnectionManager, ConnectionState, TunnelConfig};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The uplink service. Maps the host-plugin lifecycle onto explicit entry
/// points: `new` (load), `start`, `tick` (connectivity available), `stop`
/// (unload). `tick` never propagates a failure to the driver; all failures
/// become state transitions plus log records, and the driver can always call
/// again on the next tick.
pub struct Uplink {
    manager: Arc<Mutex<ConnectionManager>>,
    scheduler: Arc<SyncScheduler>,
    status: StatusBoard,
    startup_delay: Duration,
    last_created: Arc<StdMutex<Option<u64>>>,
}

impl Uplink {
    /// Build the service with the system command runner and rsync executor
    pub fn new(config: UplinkConfig) -> UplinkResult<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let executor: Arc<dyn TransferExecutor> = Arc::new(RsyncExecutor::new(runner.clone()));
        Self::with_parts(config, runner, executor)
    }

    /// Build the service with explicit collaborators
    pub fn with_parts(
        config: UplinkConfig,
        runner: Arc<dyn CommandRunner>,
        executor: Arc<dyn TransferExecutor>,
    ) -> UplinkResult<Self> {
        config.validate()?;

        let manager = Arc::new(Mutex::new(ConnectionManager::new(
            TunnelConfig::from_config(&config),
            config.config_path.clone(),
            Duration::from_secs(config.activation_timeout_secs),
            runner,
        )));

        let job = TransferJob {
            source_dir: config.source_dir.clone(),
            remote_user: config.remote_user.clone(),
            remote_host: config.peer_host().to_string(),
            remote_port: config.remote_port,
            remote_dir: config.remote_dir.clone(),
            timeout: Duration::from_secs(config.transfer_timeout_secs),
        };

        let scheduler = Arc::new(SyncScheduler::new(
            config.sync_interval_secs,
            executor,
            manager.clone(),
            job,
        ));

        Ok(Self {
            manager,
            scheduler,
            status: StatusBoard::new(),
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            last_created: Arc::new(StdMutex::new(None)),
        })
    }

    /// Apply the configured startup delay and register the status element
    pub async fn start(&self) {
        if !self.startup_delay.is_zero() {
            info!("Delaying startup by {}s", self.startup_delay.as_secs());
            tokio::time::sleep(self.startup_delay).await;
        }
        self.status.register();
        info!("Uplink service started");
    }

    /// The "connectivity available" entry point. Ensures the tunnel is up,
    /// then runs any due transfer on a background task so the driver is never
    /// blocked by a slow copy.
    pub async fn tick(&self, now: u64) {
        let state = { self.manager.lock().await.state() };

        if state != ConnectionState::Up {
            // The old session's sync count must not survive a reconnect;
            // status shows "Sync: <n>" only for transfers completed since.
            *self.last_created.lock().unwrap() = None;
            self.status.update(ConnectionState::Connecting, None);
            let result = { self.manager.lock().await.connect().await };
            if let Err(e) = result {
                warn!("Connect attempt failed: {}", e);
            }
            self.refresh_status().await;
            if { self.manager.lock().await.state() } != ConnectionState::Up {
                return;
            }
        }

        let scheduler = self.scheduler.clone();
        let manager = self.manager.clone();
        let status = self.status.clone();
        let last_created = self.last_created.clone();
        tokio::spawn(async move {
            run_sync(scheduler, manager, status, last_created, now).await;
        });
    }

    /// Run a due transfer inline. Same semantics as the background half of
    /// `tick`, for drivers that want to await the outcome.
    pub async fn sync_now(&self, now: u64) -> SyncDisposition {
        run_sync(
            self.scheduler.clone(),
            self.manager.clone(),
            self.status.clone(),
            self.last_created.clone(),
            now,
        )
        .await
    }

    /// Tear down the tunnel and clear the registered status element
    pub async fn stop(&self) {
        info!("Stopping uplink service");
        if let Err(e) = self.manager.lock().await.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        self.status.clear();
    }

    /// Current status string, if the service has started
    pub fn status(&self) -> Option<String> {
        self.status.current()
    }

    pub async fn state(&self) -> ConnectionState {
        self.manager.lock().await.state()
    }

    async fn refresh_status(&self) {
        let state = self.manager.lock().await.state();
        let last_created = *self.last_created.lock().unwrap();
        self.status.update(state, last_created);
    }
}

async fn run_sync(
    scheduler: Arc<SyncScheduler>,
    manager: Arc<Mutex<ConnectionManager>>,
    status: StatusBoard,
    last_created: Arc<StdMutex<Option<u64>>>,
    now: u64,
) -> SyncDisposition {
    let disposition = scheduler.maybe_sync(now).await;

    if let SyncDisposition::Completed(result) = &disposition {
        *last_created.lock().unwrap() = Some(result.created);
    }

    let state = manager.lock().await.state();
    status.update(state, *last_created.lock().unwrap());

    disposition
}
