use async_trait::async_trait;
use lookout_common::MonitorTarget;
use std::ffi::OsStr;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use super::{Probe, ProbeError};

/// Process liveness on the local host, matched by process or executable name.
pub struct ProcessProbe;

fn running_pids(name: &str) -> Vec<u32> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing()
            .without_tasks()
            .with_exe(UpdateKind::OnlyIfNotSet),
    );

    let wanted = OsStr::new(name);
    let mut pids: Vec<u32> = sys
        .processes()
        .values()
        .filter(|process| {
            // Linux truncates `name` to 15 bytes, so also match the executable.
            process.name() == wanted
                || process
                    .exe()
                    .and_then(|exe| exe.file_name())
                    .is_some_and(|file_name| file_name == wanted)
        })
        .map(|process| process.pid().as_u32())
        .collect();
    pids.sort_unstable();
    pids
}

#[async_trait]
impl Probe for ProcessProbe {
    async fn probe(&self, target: &MonitorTarget, _timeout: Duration) -> Result<String, ProbeError> {
        let name = target.process.trim().to_string();
        let lookup_name = name.clone();
        // Enumerating /proc is blocking work.
        let pids = tokio::task::spawn_blocking(move || running_pids(&lookup_name))
            .await
            .map_err(|_| ProbeError::Panicked)?;

        if pids.is_empty() {
            return Err(ProbeError::ProcessNotFound(name));
        }
        Ok(format!("{name}: {} process(es) running", pids.len()))
    }
}
