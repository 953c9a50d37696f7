//! Per-monitor consecutive-failure tracking and notification gating.
//!
//! A monitor is `Healthy` until `times` probes in a row fail, at which point an
//! alert episode opens. Within one episode notifications are spaced at least
//! `silent_cycle` apart and capped at `notify_times` (0 means no cap). Any
//! successful probe closes the episode and clears every counter.
use lookout_common::MonitorRecord;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Healthy,
    Alerting,
}

/// The thresholds a tracker enforces, taken from a monitor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub times: u32,
    pub silent_cycle: Duration,
    pub notify_times: u32,
}

impl From<&MonitorRecord> for AlertPolicy {
    fn from(record: &MonitorRecord) -> Self {
        Self {
            times: u32::from(record.times).max(1),
            silent_cycle: record.silent_cycle(),
            notify_times: u32::from(record.notify_times),
        }
    }
}

/// What the scheduler should do after feeding a probe result in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Probe succeeded and no episode was open.
    Healthy,
    /// Probe succeeded and closed an open episode.
    Recovered,
    /// Probe failed but the threshold has not been reached.
    Failing { consecutive_failures: u32 },
    /// Dispatch notification number `sequence` of the current episode.
    Notify { sequence: u32 },
    /// Alerting, but the silent cycle has not elapsed since the last notification.
    Silenced,
    /// Alerting, and the episode already sent its `notify_times` notifications.
    Exhausted,
}

/// Read-only view of a tracker for status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    pub state: AlertState,
    pub consecutive_failures: u32,
    pub notifications_sent: u32,
    #[serde(skip)]
    pub last_notification_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct FailureTracker {
    policy: AlertPolicy,
    consecutive_failures: u32,
    episode_active: bool,
    notifications_sent: u32,
    last_notification_at: Option<Instant>,
}

impl FailureTracker {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            episode_active: false,
            notifications_sent: 0,
            last_notification_at: None,
        }
    }

    pub fn state(&self) -> AlertState {
        if self.episode_active {
            AlertState::Alerting
        } else {
            AlertState::Healthy
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures,
            notifications_sent: self.notifications_sent,
            last_notification_at: self.last_notification_at,
        }
    }

    /// Feeds one probe result in, in the order the probes were issued.
    pub fn record(&mut self, ok: bool, now: Instant) -> Decision {
        if ok {
            self.record_success()
        } else {
            self.record_failure(now)
        }
    }

    pub fn record_success(&mut self) -> Decision {
        let was_alerting = self.episode_active;
        self.consecutive_failures = 0;
        self.episode_active = false;
        self.notifications_sent = 0;
        self.last_notification_at = None;

        if was_alerting {
            Decision::Recovered
        } else {
            Decision::Healthy
        }
    }

    pub fn record_failure(&mut self, now: Instant) -> Decision {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures < self.policy.times {
            return Decision::Failing {
                consecutive_failures: self.consecutive_failures,
            };
        }

        if !self.episode_active {
            self.episode_active = true;
            self.notifications_sent = 0;
            self.last_notification_at = None;
        }

        if self.policy.notify_times != 0 && self.notifications_sent >= self.policy.notify_times {
            return Decision::Exhausted;
        }
        if let Some(last) = self.last_notification_at {
            if now.saturating_duration_since(last) < self.policy.silent_cycle {
                return Decision::Silenced;
            }
        }

        // A failed delivery still counts: the attempt closes this silent window.
        self.notifications_sent += 1;
        self.last_notification_at = Some(now);
        Decision::Notify {
            sequence: self.notifications_sent,
        }
    }
}
