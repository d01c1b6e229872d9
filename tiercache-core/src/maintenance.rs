//! Background sweep and compaction tasks
//!
//! Both loops run on the tokio runtime and hand the blocking storage work to
//! `spawn_blocking`. They stop when the handle's token is cancelled.

use crate::cache::backend::CacheBackend;
use crate::config::CacheSettings;
use crate::error::{CompactionError, Result};
use crate::storage::compaction::CompactionStats;
use crate::storage::expiration::SweepStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Periods and limits for the background tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    pub sweep_interval: Duration,
    pub sweep_limit: usize,
    pub compact_interval: Duration,
}

impl From<&CacheSettings> for MaintenanceSchedule {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            sweep_interval: settings.sweep_interval(),
            sweep_limit: settings.sweep_batch_limit,
            compact_interval: settings.compact_interval(),
        }
    }
}

type SweepJob = Arc<dyn Fn(usize) -> Result<SweepStats> + Send + Sync>;
type CompactJob =
    Arc<dyn Fn() -> std::result::Result<Option<CompactionStats>, CompactionError> + Send + Sync>;

/// Running maintenance tasks
pub struct MaintenanceHandle {
    token: CancellationToken,
    sweeper: JoinHandle<()>,
    compactor: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Start both loops. Must be called from within a tokio runtime.
    pub fn spawn(backend: Arc<dyn CacheBackend>, schedule: MaintenanceSchedule) -> Self {
        let sweeper_backend = backend.clone();
        Self::spawn_jobs(
            Arc::new(move |limit| sweeper_backend.sweep_expired(limit)),
            Arc::new(move || backend.compact()),
            schedule,
        )
    }

    fn spawn_jobs(sweep: SweepJob, compact: CompactJob, schedule: MaintenanceSchedule) -> Self {
        let token = CancellationToken::new();

        let sweeper = tokio::spawn(sweep_loop(sweep, schedule, token.child_token()));
        let compactor = tokio::spawn(compact_loop(compact, schedule, token.child_token()));

        info!(
            sweep_every = ?schedule.sweep_interval,
            sweep_limit = schedule.sweep_limit,
            compact_every = ?schedule.compact_interval,
            "maintenance tasks started"
        );

        Self {
            token,
            sweeper,
            compactor,
        }
    }

    /// Token that stops both loops when cancelled
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the loops and wait for any in-flight run to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, task) in [("sweep", self.sweeper), ("compaction", self.compactor)] {
            if let Err(e) = task.await {
                warn!("{} task ended abnormally: {}", name, e);
            }
        }
        info!("maintenance tasks stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // First run one full period after start
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn sweep_loop(sweep: SweepJob, schedule: MaintenanceSchedule, token: CancellationToken) {
    let mut interval = ticker(schedule.sweep_interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let job = sweep.clone();
        let limit = schedule.sweep_limit;
        match tokio::task::spawn_blocking(move || job(limit)).await {
            Ok(Ok(stats)) if stats.processed > 0 => {
                info!(processed = stats.processed, removed = stats.removed, "expired keys swept");
            }
            Ok(Ok(_)) => debug!("sweep found nothing to reclaim"),
            Ok(Err(e)) => warn!("expired-key sweep failed: {}", e),
            Err(e) => warn!("sweep task panicked: {}", e),
        }
    }
}

async fn compact_loop(
    compact: CompactJob,
    schedule: MaintenanceSchedule,
    token: CancellationToken,
) {
    let mut interval = ticker(schedule.compact_interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let job = compact.clone();
        match tokio::task::spawn_blocking(move || job()).await {
            Ok(Ok(Some(stats))) => info!(
                entries = stats.entries,
                bytes_before = stats.bytes_before,
                bytes_after = stats.bytes_after,
                elapsed = ?stats.duration,
                "database compacted"
            ),
            Ok(Ok(None)) => debug!("backend has nothing to compact"),
            Ok(Err(e)) if e.is_fatal() => {
                error!(
                    "CRITICAL: compaction left the store unusable, restart required: {}",
                    e
                );
                break;
            }
            Ok(Err(e)) => warn!("compaction failed, will retry next period: {}", e),
            Err(e) => warn!("compaction task panicked: {}", e),
        }
    }
}
