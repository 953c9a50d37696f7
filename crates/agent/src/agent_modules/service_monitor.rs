//! Runs one independent, cancellable probe loop per enabled monitor.
use chrono::Utc;
use lookout_common::MonitorRecord;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::notify::{Alert, NotificationDispatcher};
use super::probe::ProbeRegistry;
use super::tracker::{AlertPolicy, Decision, FailureTracker, TrackerSnapshot};

fn lock(tracker: &Mutex<FailureTracker>) -> MutexGuard<'_, FailureTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The first tick strictly after `now` on the fixed cadence that began at `started`.
///
/// Ticks that passed while a probe was still running are skipped, not queued.
/// A tick the clock cannot represent is pushed out to [`FAR_FUTURE`] past `now`.
fn next_tick_after(started: Instant, period: Duration, now: Instant) -> Instant {
    let elapsed = now.saturating_duration_since(started).as_nanos();
    let periods = elapsed / period.as_nanos().max(1) + 1;
    u32::try_from(periods)
        .ok()
        .and_then(|periods| period.checked_mul(periods))
        .and_then(|offset| started.checked_add(offset))
        .unwrap_or_else(|| far_future(now))
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn far_future(now: Instant) -> Instant {
    now.checked_add(FAR_FUTURE).unwrap_or(now)
}

/// Handle to one running probe loop and the tracker it owns.
pub struct MonitorTask {
    record: MonitorRecord,
    tracker: Arc<Mutex<FailureTracker>>,
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl MonitorTask {
    pub fn record(&self) -> &MonitorRecord {
        &self.record
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        lock(&self.tracker).snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop and waits for it to exit.
    ///
    /// An in-flight probe is dropped before this returns, so no stale result
    /// can reach the tracker afterwards.
    pub async fn stop(self) {
        let monitor_id = self.record.id;
        if self.shutdown_tx.send(()).is_err() {
            debug!(monitor_id, "Probe loop had already exited.");
        }
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(monitor_id, error = %e, "Probe loop panicked.");
            }
        }
    }
}

pub struct MonitorScheduler {
    registry: Arc<ProbeRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl MonitorScheduler {
    pub fn new(registry: Arc<ProbeRegistry>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        &self.registry
    }

    /// Starts a probe loop for `record` with a fresh tracker. The first probe runs immediately.
    pub fn spawn(&self, record: MonitorRecord) -> MonitorTask {
        let tracker = Arc::new(Mutex::new(FailureTracker::new(AlertPolicy::from(&record))));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_probe_loop(
            record.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
            Arc::clone(&tracker),
            shutdown_rx,
        ));

        MonitorTask {
            record,
            tracker,
            handle,
            shutdown_tx,
        }
    }
}

async fn run_probe_loop(
    record: MonitorRecord,
    registry: Arc<ProbeRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    tracker: Arc<Mutex<FailureTracker>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let monitor_id = record.id;
    let period = record.interval().max(Duration::from_secs(1));
    let timeout = record.probe_timeout();
    let started = Instant::now();
    let mut next_tick = started;

    info!(
        monitor_id,
        monitor_name = %record.name,
        kind = %record.monitor_type,
        interval_seconds = period.as_secs(),
        "Started probe loop."
    );

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = sleep_until(next_tick) => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            outcome = registry.execute(record.monitor_type, &record.target, timeout) => outcome,
        };

        let (decision, consecutive_failures) = {
            let mut tracker = lock(&tracker);
            let decision = tracker.record(outcome.ok, Instant::now());
            (decision, tracker.consecutive_failures())
        };

        match decision {
            Decision::Healthy => {
                debug!(monitor_id, detail = %outcome.detail, "Probe succeeded.");
            }
            Decision::Recovered => {
                info!(monitor_id, monitor_name = %record.name, detail = %outcome.detail, "Monitor recovered.");
            }
            Decision::Failing { consecutive_failures } => {
                warn!(monitor_id, consecutive_failures, detail = %outcome.detail, "Probe failed.");
            }
            Decision::Notify { sequence } => {
                warn!(
                    monitor_id,
                    monitor_name = %record.name,
                    consecutive_failures,
                    sequence,
                    detail = %outcome.detail,
                    "Monitor is alerting. Dispatching notification."
                );
                dispatcher.dispatch(Alert {
                    notify_type: record.notify_type,
                    notify_target: record.notify_target.clone(),
                    monitor_id,
                    monitor_name: record.name.clone(),
                    detail: outcome.detail,
                    sequence,
                    consecutive_failures,
                    triggered_at: Utc::now(),
                });
            }
            Decision::Silenced | Decision::Exhausted => {
                debug!(monitor_id, consecutive_failures, ?decision, detail = %outcome.detail, "Monitor is alerting; notification suppressed.");
            }
        }

        next_tick = next_tick_after(started, period, Instant::now());
    }

    info!(monitor_id, "Probe loop stopped.");
}
