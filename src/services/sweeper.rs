use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::errors::{ConfigError, StoreError};
use crate::state::store::RecordStore;

const NEVER: i64 = i64::MIN;

/// Debounce guard for request-triggered sweeps.
///
/// Holds the time (ms) of the last sweep attempt. Admission is decided with
/// a compare-and-swap, so callers racing on the same stale value admit at
/// most one sweep between them.
#[derive(Debug)]
pub struct SweepGate {
    last_attempt_ms: AtomicI64,
    interval_ms: i64,
}

impl SweepGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_attempt_ms: AtomicI64::new(NEVER),
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// True if this caller won the right to sweep at `now`.
    pub fn try_arm(&self, now: DateTime<Utc>) -> bool {
        let now_ms = now.timestamp_millis();
        let last = self.last_attempt_ms.load(Ordering::Acquire);

        if last != NEVER && now_ms.saturating_sub(last) <= self.interval_ms {
            return false;
        }

        self.last_attempt_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record an attempt unconditionally (startup sweep).
    pub fn arm(&self, now: DateTime<Utc>) {
        self.last_attempt_ms
            .store(now.timestamp_millis(), Ordering::Release);
    }
}

/// Lazy eviction of records whose last access is older than the retention
/// window.
///
/// There is no background loop: one sweep runs at startup, later ones are
/// triggered by incoming requests through [`Sweeper::maybe_trigger`].
pub struct Sweeper {
    store: RecordStore,
    retention: Option<Duration>,
    gate: SweepGate,
}

impl Sweeper {
    pub fn new(store: RecordStore, retention: Option<Duration>, interval: Duration) -> Self {
        Self {
            store,
            retention,
            gate: SweepGate::new(interval),
        }
    }

    pub fn from_config(store: RecordStore, cfg: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(store, cfg.retention_window()?, cfg.sweep_interval()))
    }

    pub fn is_enabled(&self) -> bool {
        self.retention.is_some()
    }

    /// Called for every inbound request. Spawns a sweep on its own task when
    /// the debounce interval has elapsed, so the request never waits for it.
    pub fn maybe_trigger(self: &Arc<Self>) -> Option<JoinHandle<usize>> {
        if !self.is_enabled() || !self.gate.try_arm(Utc::now()) {
            return None;
        }

        let sweeper = Arc::clone(self);
        Some(tokio::spawn(async move { sweeper.run_once().await }))
    }

    /// Unconditional sweep at process start.
    pub async fn startup(&self) -> usize {
        if !self.is_enabled() {
            tracing::info!("Data auto-deletion disabled (DELETE_DATA_AFTER_TIME not set)");
            return 0;
        }

        self.gate.arm(Utc::now());
        self.run_once().await
    }

    /// One sweep; failures are logged and reported as zero removals.
    pub async fn run_once(&self) -> usize {
        tracing::info!("Deleting unaccessed keys...");

        match self.sweep_at(Utc::now()).await {
            Ok(removed) => {
                tracing::info!(
                    "Deleted {} unaccessed keys older than {:?}",
                    removed,
                    self.retention.unwrap_or_default()
                );
                removed
            }
            Err(e) => {
                tracing::error!("Sweep failed: {e}");
                0
            }
        }
    }

    /// Delete every record last accessed before `now - retention`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };

        let cutoff = TimeDelta::from_std(retention)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.store
            .unit_of_work(move |uow| uow.delete_older_than(cutoff))
            .await
    }
}
