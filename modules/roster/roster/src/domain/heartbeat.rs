//! Per-service heartbeat task and the handle that owns it.
//!
//! A registered service keeps its record alive by rewriting it with a fresh
//! expiry every heartbeat interval. Failed writes never stop the loop; they are
//! counted in [`HeartbeatStats`] and logged with throttling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use roster_sdk::{RegistryStore, ServiceRecord, StoreError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::unix_now;

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Heartbeats are being written.
    Running,
    /// Unregistration requested, the task has not exited yet.
    Stopping,
    /// No further writes will happen.
    Stopped,
}

impl ServiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            RUNNING => Self::Running,
            STOPPING => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Outcome counters of heartbeat writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Failures since the last successful write.
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// How a failed write is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureLog {
    Quiet,
    Warn,
    /// Failures have lasted a full TTL; the record has likely lapsed.
    Escalate,
}

#[derive(Debug, Default)]
struct FailureTracker {
    stats: HeartbeatStats,
    failing_since: Option<Instant>,
    last_report: Option<Instant>,
    escalated: bool,
}

impl FailureTracker {
    /// Resets the failure streak. Returns the length of the streak that ended.
    fn record_success(&mut self) -> u32 {
        let streak = self.stats.consecutive_failures;
        self.stats.consecutive_failures = 0;
        self.stats.total_successes += 1;
        self.stats.last_success = Some(Utc::now());
        self.failing_since = None;
        self.last_report = None;
        self.escalated = false;
        streak
    }

    /// Counts a failure at `now`. At most one report is due per `ttl`, and the
    /// escalation fires once per streak.
    fn record_failure(&mut self, err: &StoreError, now: Instant, ttl: Duration) -> FailureLog {
        self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);
        self.stats.total_failures += 1;
        self.stats.last_error = Some(err.to_string());
        let failing_since = *self.failing_since.get_or_insert(now);

        let escalate = !self.escalated && now.duration_since(failing_since) >= ttl;
        let report_due = self
            .last_report
            .is_none_or(|at| now.duration_since(at) >= ttl);

        if escalate {
            self.escalated = true;
            self.last_report = Some(now);
            FailureLog::Escalate
        } else if report_due {
            self.last_report = Some(now);
            FailureLog::Warn
        } else {
            FailureLog::Quiet
        }
    }
}

struct Heartbeat {
    registry: String,
    store: Arc<dyn RegistryStore>,
    record: Mutex<ServiceRecord>,
    ttl: Duration,
    interval: Duration,
    state: AtomicU8,
    tracker: Mutex<FailureTracker>,
}

/// Rounds `ttl` up to whole seconds, the granularity of stored expiries.
///
/// Both the written expiry and the unregister drain use this lease, so a
/// record can never outlive the drain.
fn lease_for(ttl: Duration) -> Duration {
    Duration::from_secs(
        ttl.as_secs()
            .saturating_add(u64::from(ttl.subsec_nanos() > 0)),
    )
}

fn lease_seconds(lease: Duration) -> i64 {
    i64::try_from(lease.as_secs()).unwrap_or(i64::MAX)
}

impl Heartbeat {
    /// Writes the record with `expiry = now + ttl` and records the outcome.
    async fn beat(&self) {
        let (row, expiry) = {
            let record = self.record.lock();
            // A clock stepping backwards must not shorten an advertised lease.
            let expiry = unix_now()
                .saturating_add(lease_seconds(self.ttl))
                .max(record.expiry);
            let mut next = record.clone();
            next.expiry = expiry;
            (next.to_row(), expiry)
        };

        match self.store.put_row(&self.registry, row).await {
            Ok(()) => {
                self.record.lock().expiry = expiry;
                self.on_success();
            }
            Err(e) => self.on_failure(&e),
        }
    }

    fn on_success(&self) {
        let recovered_after = self.tracker.lock().record_success();
        if recovered_after > 0 {
            let record = self.record.lock();
            info!(
                service = %record.name,
                endpoint = %record.endpoint,
                failures = recovered_after,
                "heartbeat recovered"
            );
        }
    }

    fn on_failure(&self, err: &StoreError) {
        let (log, failures) = {
            let mut tracker = self.tracker.lock();
            let log = tracker.record_failure(err, Instant::now(), self.ttl);
            (log, tracker.stats.consecutive_failures)
        };

        let record = self.record.lock().clone();
        match log {
            FailureLog::Escalate => error!(
                registry = %self.registry,
                service = %record.name,
                endpoint = %record.endpoint,
                failures,
                error = %err,
                "heartbeat failing for longer than the TTL, record has likely expired"
            ),
            FailureLog::Warn => warn!(
                registry = %self.registry,
                service = %record.name,
                endpoint = %record.endpoint,
                failures,
                error = %err,
                "heartbeat write failed"
            ),
            FailureLog::Quiet => {}
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial write already happened.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.beat().await,
            }
        }

        self.state.store(STOPPED, Ordering::Release);
        debug!(service = %self.record.lock().name, "heartbeat stopped");
    }
}

/// Handle to a live registration.
///
/// Dropping the handle does not stop the heartbeat; call
/// [`ServiceHandle::unregister`] to withdraw the record.
pub struct ServiceHandle {
    heartbeat: Arc<Heartbeat>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("record", &self.record())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServiceHandle {
    /// Writes the first heartbeat, then spawns the periodic task.
    ///
    /// `ttl` is rounded up to whole seconds.
    pub(crate) async fn start(
        registry: String,
        store: Arc<dyn RegistryStore>,
        record: ServiceRecord,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        let heartbeat = Arc::new(Heartbeat {
            registry,
            store,
            record: Mutex::new(record),
            ttl: lease_for(ttl),
            interval,
            state: AtomicU8::new(RUNNING),
            tracker: Mutex::new(FailureTracker::default()),
        });

        heartbeat.beat().await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&heartbeat).run(cancel.clone()));

        Self {
            heartbeat,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stops heartbeating and waits one TTL so the record lapses everywhere.
    ///
    /// No delete is written; readers stop seeing the record once its last
    /// expiry passes. Calls after the first return immediately.
    pub async fn unregister(&self) {
        if self
            .heartbeat
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
        self.heartbeat.state.store(STOPPED, Ordering::Release);

        let record = self.record();
        info!(
            service = %record.name,
            endpoint = %record.endpoint,
            drain_ms = self.heartbeat.ttl.as_millis(),
            "unregistered, waiting for the record to expire"
        );
        tokio::time::sleep(self.heartbeat.ttl).await;
    }

    /// The record as last successfully written.
    #[must_use]
    pub fn record(&self) -> ServiceRecord {
        self.heartbeat.record.lock().clone()
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.heartbeat.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn stats(&self) -> HeartbeatStats {
        self.heartbeat.tracker.lock().stats.clone()
    }

    /// The lease written with every heartbeat, in whole seconds.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.heartbeat.ttl
    }
}
