use async_trait::async_trait;
use lookout_common::MonitorTarget;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
#[cfg(unix)]
use tracing::warn;

use super::{truncate, Probe, ProbeError};

const MAX_OUTPUT_BYTES: usize = 512;

/// SIGKILLs the script's whole process group when dropped while still armed,
/// so children forked by the script die with it.
#[cfg(unix)]
struct ProcessGroupGuard {
    pgid: Option<nix::unistd::Pid>,
}

#[cfg(unix)]
impl ProcessGroupGuard {
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: leader
                .and_then(|pid| i32::try_from(pid).ok())
                .map(nix::unistd::Pid::from_raw),
        }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

#[cfg(unix)]
impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};

        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill script process group."),
            }
        }
    }
}

/// Runs the script body with the host shell; healthy iff it exits with 0.
pub struct ScriptProbe;

#[async_trait]
impl Probe for ScriptProbe {
    async fn probe(&self, target: &MonitorTarget, _timeout: Duration) -> Result<String, ProbeError> {
        let script_extension = if cfg!(windows) { ".ps1" } else { ".sh" };
        let temp_file = tempfile::Builder::new()
            .prefix("lookout-")
            .suffix(script_extension)
            .tempfile()?;
        fs::write(temp_file.path(), target.script.as_bytes()).await?;
        // Closes our handle; the file is removed when `temp_path` drops.
        let temp_path = temp_file.into_temp_path();

        #[cfg(windows)]
        let mut command = {
            let mut cmd = Command::new("powershell.exe");
            cmd.args(["-NoProfile", "-NonInteractive", "-File"]);
            cmd.arg(temp_path.as_os_str());
            cmd
        };

        #[cfg(not(windows))]
        let mut command = {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg(temp_path.as_os_str());
            cmd
        };

        // The registry drops this future on timeout; the child must die with it.
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Leader of a fresh group, so the group id is the shell's pid.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        #[cfg(unix)]
        let group = ProcessGroupGuard::new(child.id());
        let output = child.wait_with_output().await?;
        #[cfg(unix)]
        group.disarm();

        let mut captured = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            if !captured.is_empty() {
                captured.push('\n');
            }
            captured.push_str(stderr);
        }
        let captured = truncate(&captured, MAX_OUTPUT_BYTES);
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            Ok(format!("exit code {code}: {captured}"))
        } else {
            Err(ProbeError::ScriptExit {
                code,
                output: captured,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::agent_modules::probe::ProbeRegistry;
    use lookout_common::MonitorType;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let detail = ScriptProbe
            .probe(&MonitorTarget::script("echo healthy"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(detail, "exit code 0: healthy");
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_code_and_output() {
        let err = ScriptProbe
            .probe(
                &MonitorTarget::script("echo disk full >&2\nexit 3"),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();

        match err {
            ProbeError::ScriptExit { code, output } => {
                assert_eq!(code, 3);
                assert_eq!(output, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let err = ScriptProbe
            .probe(
                &MonitorTarget::script("head -c 2000 /dev/zero | tr '\\0' 'a'\nexit 1"),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();

        match err {
            ProbeError::ScriptExit { output, .. } => {
                assert_eq!(output.len(), MAX_OUTPUT_BYTES + 3);
                assert!(output.ends_with("..."));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn is_alive(pid: u32) -> bool {
        use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid)
            .is_some_and(|process| process.status() != ProcessStatus::Zombie)
    }

    #[tokio::test]
    async fn test_timeout_kills_processes_forked_by_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        let script = format!(
            "sleep 47 &\necho $! > '{}'\nwait\necho x",
            pid_file.display()
        );
        let mut registry = ProbeRegistry::empty();
        registry.register(MonitorType::Script, Arc::new(ScriptProbe));

        let outcome = registry
            .execute(
                MonitorType::Script,
                &MonitorTarget::script(script),
                Duration::from_millis(500),
            )
            .await;
        assert_eq!(outcome.detail, "timeout");

        let sleeper: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..50 {
            alive = is_alive(sleeper);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "sleep {sleeper} outlived the script timeout");
    }

    #[tokio::test]
    async fn test_overrunning_script_is_killed_on_timeout() {
        let mut registry = ProbeRegistry::empty();
        registry.register(MonitorType::Script, Arc::new(ScriptProbe));

        let outcome = registry
            .execute(
                MonitorType::Script,
                &MonitorTarget::script("sleep 30"),
                Duration::from_millis(300),
            )
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.detail, "timeout");
        assert!(outcome.elapsed < Duration::from_secs(5));
    }
}
