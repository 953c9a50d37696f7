//! Probe implementations and the registry that dispatches to them.
//!
//! A probe runs a single bounded-time check and has no memory between
//! invocations. The registry owns one implementation per [`MonitorType`] and
//! is the only place timeouts and unexpected panics are turned into failed
//! outcomes, so nothing a probe does can escape into the scheduler.
use async_trait::async_trait;
use futures::FutureExt;
use lookout_common::{MonitorRecord, MonitorTarget, MonitorType};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

pub mod http;
pub mod ping;
pub mod process;
pub mod script;
pub mod tcp;

pub use http::HttpProbe;
pub use ping::PingProbe;
pub use process::ProcessProbe;
pub use script::ScriptProbe;
pub use tcp::TcpProbe;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,
    #[error("probe panicked")]
    Panicked,
    #[error("no probe registered for {0}")]
    Unregistered(MonitorType),
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{target}: request failed: {source}")]
    Http {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{target}: unexpected status {status}")]
    Status {
        target: String,
        status: reqwest::StatusCode,
    },
    #[error("{target}: connection failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{target}: could not resolve host")]
    Resolve { target: String },
    #[error("{target}: ping failed: {source}")]
    Ping {
        target: String,
        #[source]
        source: surge_ping::SurgeError,
    },
    #[error("process {0} is not running")]
    ProcessNotFound(String),
    #[error("script exited with code {code}: {output}")]
    ScriptExit { code: i32, output: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one probe execution as the scheduler and the ad-hoc check see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub detail: String,
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn success(detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
            elapsed,
        }
    }

    pub fn failure(detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            elapsed,
        }
    }
}

/// A single kind of health check.
///
/// Implementations return a human-readable detail on success and a
/// [`ProbeError`] on failure. They may assume `target` has passed
/// [`MonitorTarget::validate_for`] for their kind.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &MonitorTarget, timeout: Duration) -> Result<String, ProbeError>;
}

/// Parameters for one stateless probe run, as sent by the "test connectivity" surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub monitor_type: MonitorType,
    pub target: MonitorTarget,
    pub timeout: Duration,
}

impl From<&MonitorRecord> for ProbeRequest {
    fn from(record: &MonitorRecord) -> Self {
        Self {
            monitor_type: record.monitor_type,
            target: record.target.clone(),
            timeout: record.probe_timeout(),
        }
    }
}

pub struct ProbeRegistry {
    probes: HashMap<MonitorType, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    /// A registry with no probes; every execution fails until kinds are registered.
    pub fn empty() -> Self {
        Self {
            probes: HashMap::new(),
        }
    }

    /// A registry with the built-in implementation for every monitor type.
    pub fn with_defaults() -> Result<Self, ProbeError> {
        let mut registry = Self::empty();
        registry.register(MonitorType::Site, Arc::new(HttpProbe::new()?));
        registry.register(MonitorType::Port, Arc::new(TcpProbe));
        registry.register(MonitorType::HostAlive, Arc::new(PingProbe));
        registry.register(MonitorType::Process, Arc::new(ProcessProbe));
        registry.register(MonitorType::Script, Arc::new(ScriptProbe));
        Ok(registry)
    }

    /// Installs `probe` for `kind`, replacing any previous implementation.
    pub fn register(&mut self, kind: MonitorType, probe: Arc<dyn Probe>) {
        self.probes.insert(kind, probe);
    }

    /// Runs the probe for `kind`, never taking longer than `timeout`.
    ///
    /// When the deadline passes the probe future is dropped, which closes its
    /// sockets and kills any child process it spawned.
    pub async fn execute(
        &self,
        kind: MonitorType,
        target: &MonitorTarget,
        timeout: Duration,
    ) -> ProbeOutcome {
        let start = Instant::now();
        let result = match self.probes.get(&kind) {
            None => Err(ProbeError::Unregistered(kind)),
            Some(probe) => {
                let guarded = AssertUnwindSafe(probe.probe(target, timeout)).catch_unwind();
                match tokio::time::timeout(timeout, guarded).await {
                    Err(_) => Err(ProbeError::Timeout),
                    Ok(Err(_)) => {
                        warn!(kind = %kind, "Probe implementation panicked.");
                        Err(ProbeError::Panicked)
                    }
                    Ok(Ok(result)) => result,
                }
            }
        };
        let elapsed = start.elapsed();

        match result {
            Ok(detail) => ProbeOutcome::success(detail, elapsed),
            Err(e) => {
                debug!(kind = %kind, error = %e, "Probe failed.");
                ProbeOutcome::failure(e.to_string(), elapsed)
            }
        }
    }

    /// One-off check with no failure tracking.
    pub async fn check(&self, request: &ProbeRequest) -> ProbeOutcome {
        self.execute(request.monitor_type, &request.target, request.timeout)
            .await
    }
}

/// Cuts `text` to at most `max` bytes without splitting a character.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of results, then keeps succeeding.
    pub(crate) struct ScriptedProbe {
        results: Mutex<VecDeque<bool>>,
    }

    impl ScriptedProbe {
        pub(crate) fn new(results: impl IntoIterator<Item = bool>) -> Self {
            Self {
                results: Mutex::new(results.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, _: &MonitorTarget, _: Duration) -> Result<String, ProbeError> {
            let next = self.results.lock().unwrap().pop_front().unwrap_or(true);
            if next {
                Ok("scripted success".to_string())
            } else {
                Err(ProbeError::ProcessNotFound("scripted".to_string()))
            }
        }
    }

    struct SlowProbe(Duration);

    #[async_trait]
    impl Probe for SlowProbe {
        async fn probe(&self, _: &MonitorTarget, _: Duration) -> Result<String, ProbeError> {
            tokio::time::sleep(self.0).await;
            Ok("finished".to_string())
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl Probe for PanickingProbe {
        async fn probe(&self, _: &MonitorTarget, _: Duration) -> Result<String, ProbeError> {
            panic!("bug in probe");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        let mut registry = ProbeRegistry::empty();
        registry.register(
            MonitorType::Site,
            Arc::new(SlowProbe(Duration::from_secs(30))),
        );

        let outcome = registry
            .execute(
                MonitorType::Site,
                &MonitorTarget::items(["http://slow"]),
                Duration::from_secs(2),
            )
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.detail, "timeout");
        assert!(outcome.elapsed >= Duration::from_secs(2));
        assert!(outcome.elapsed < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_panicking_probe_is_failure() {
        let mut registry = ProbeRegistry::empty();
        registry.register(MonitorType::Process, Arc::new(PanickingProbe));

        let outcome = registry
            .execute(
                MonitorType::Process,
                &MonitorTarget::process("x"),
                Duration::from_secs(1),
            )
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.detail, "probe panicked");
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_failure() {
        let registry = ProbeRegistry::empty();
        let outcome = registry
            .check(&ProbeRequest {
                monitor_type: MonitorType::Script,
                target: MonitorTarget::script("exit 0"),
                timeout: Duration::from_secs(1),
            })
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.detail, "no probe registered for script");
    }

    #[tokio::test]
    async fn test_scripted_probe_replays_results() {
        let mut registry = ProbeRegistry::empty();
        registry.register(
            MonitorType::Port,
            Arc::new(ScriptedProbe::new([false, true])),
        );
        let target = MonitorTarget::items(["db:5432"]);

        let first = registry
            .execute(MonitorType::Port, &target, Duration::from_secs(1))
            .await;
        let second = registry
            .execute(MonitorType::Port, &target, Duration::from_secs(1))
            .await;

        assert!(!first.ok);
        assert!(second.ok);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("héllo", 2), "h...");
    }
}
