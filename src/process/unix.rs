use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{info, warn};

use super::controller::ProcessController;
use super::launcher;
use super::types::{ProcessRecord, RunProfile};
use crate::agents::VirtualEnv;
use crate::constants::{STOP_POLL_ATTEMPTS, STOP_POLL_INTERVAL};
use crate::utils::paths::ManagerPaths;

/// POSIX controller: `bash -lc` inside the venv, one process group per launch
pub struct NativeController {
    paths: ManagerPaths,
}

impl NativeController {
    pub fn new(paths: ManagerPaths) -> Self {
        Self { paths }
    }

    fn signal(pid: u32, process_group_id: Option<i32>, sig: Signal) -> Result<(), Errno> {
        match process_group_id {
            Some(pgid) if pgid > 0 => killpg(Pid::from_raw(pgid), sig),
            _ => {
                let raw = i32::try_from(pid).map_err(|_| Errno::ESRCH)?;
                if raw <= 0 {
                    return Err(Errno::ESRCH);
                }
                kill(Pid::from_raw(raw), sig)
            }
        }
    }
}

impl ProcessController for NativeController {
    fn start(&self, agent: &str, profile: &RunProfile, working_dir: &Path) -> ProcessRecord {
        let log_path = self.paths.process_log(agent, &profile.label);
        let mut record = ProcessRecord::pending(agent, profile, working_dir, &log_path);

        let mut log = match launcher::open_log(&log_path) {
            Ok(log) => log,
            Err(e) => {
                warn!(agent, label = %profile.label, error = %e, "[Launcher] cannot open process log");
                return record;
            }
        };

        let venv = VirtualEnv::for_agent(working_dir);
        if !venv.exists() {
            let _ = launcher::write_marker(
                &mut log,
                &format!("launch failed: virtual environment not found at {}", venv.dir().display()),
            );
            return record;
        }

        let script = launcher::activation_script(&venv, &profile.command);
        let _ = launcher::write_marker(&mut log, &format!("start: {}", script));

        let stderr = match log.try_clone() {
            Ok(stderr) => stderr,
            Err(e) => {
                let _ = launcher::write_marker(&mut log, &format!("launch failed: {}", e));
                return record;
            }
        };

        let spawned = Command::new("bash")
            .arg("-lc")
            .arg(&script)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .spawn();

        match spawned {
            Ok(mut child) => {
                let pid = child.id();
                record.pid = Some(pid);
                // process_group(0) makes the child its own group leader
                record.process_group_id = i32::try_from(pid).ok();
                // Reap on exit so a dead child never lingers as a zombie that
                // still answers signal 0
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                info!(agent, label = %profile.label, pid, "[Launcher] started");
            }
            Err(e) => {
                let _ = launcher::append_marker(&log_path, &format!("launch failed: {}", e));
                warn!(agent, label = %profile.label, error = %e, "[Launcher] spawn failed");
            }
        }
        record
    }

    fn stop(&self, pid: u32, process_group_id: Option<i32>) {
        match Self::signal(pid, process_group_id, Signal::SIGTERM) {
            Err(Errno::ESRCH) => return,
            Err(e) => warn!(pid, error = %e, "[Launcher] SIGTERM failed"),
            Ok(()) => {}
        }

        for _ in 0..STOP_POLL_ATTEMPTS {
            if !self.is_alive(pid, process_group_id) {
                return;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        warn!(pid, "[Launcher] still alive after SIGTERM, sending SIGKILL");
        match Self::signal(pid, process_group_id, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pid, error = %e, "[Launcher] SIGKILL failed"),
        }
    }

    fn is_alive(&self, pid: u32, process_group_id: Option<i32>) -> bool {
        let probe = match process_group_id {
            Some(pgid) if pgid > 0 => killpg(Pid::from_raw(pgid), None),
            _ => match i32::try_from(pid) {
                Ok(raw) if raw > 0 => kill(Pid::from_raw(raw), None),
                _ => return false,
            },
        };
        // EPERM means the process exists but belongs to someone else
        !matches!(probe, Err(Errno::ESRCH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn agent_with_venv(root: &Path, name: &str) -> std::path::PathBuf {
        let agent = root.join("agents").join(name);
        std::fs::create_dir_all(agent.join(".venv/bin")).unwrap();
        std::fs::write(agent.join(".venv/bin/activate"), "export AGENT_VENV=1\n").unwrap();
        agent
    }

    fn wait_until(deadline: Duration, mut f: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        f()
    }

    #[test]
    fn test_missing_venv_is_signaled_failure() {
        let dir = tempfile::tempdir().unwrap();
        let controller = NativeController::new(ManagerPaths::new(dir.path().join("home")));
        let agent = dir.path().join("agents/bare");
        std::fs::create_dir_all(&agent).unwrap();

        let record = controller.start("bare", &RunProfile::new("worker", "sleep 5"), &agent);
        assert!(record.pid.is_none());
        let log = std::fs::read_to_string(&record.log_path).unwrap();
        assert!(log.contains("virtual environment not found"));
    }

    #[test]
    fn test_start_logs_marker_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let controller = NativeController::new(ManagerPaths::new(dir.path().join("home")));
        let agent = agent_with_venv(dir.path(), "echoer");

        let record = controller.start("echoer", &RunProfile::new("once", "echo venv=$AGENT_VENV"), &agent);
        let pid = record.pid.unwrap();
        assert_eq!(record.process_group_id, Some(pid as i32));

        assert!(wait_until(Duration::from_secs(5), || !controller.is_alive(pid, record.process_group_id)));
        let log = std::fs::read_to_string(&record.log_path).unwrap();
        assert!(log.starts_with("[agent-manager] start: source "));
        assert!(log.contains("venv=1"));
    }

    #[test]
    fn test_stop_terminates_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let controller = NativeController::new(ManagerPaths::new(dir.path().join("home")));
        let agent = agent_with_venv(dir.path(), "sleeper");

        let record = controller.start("sleeper", &RunProfile::new("long", "sleep 30 & sleep 30"), &agent);
        let pid = record.pid.unwrap();
        assert!(controller.is_alive(pid, record.process_group_id));

        controller.stop(pid, record.process_group_id);
        assert!(wait_until(Duration::from_secs(2), || !controller.is_alive(pid, record.process_group_id)));

        // Stopping again is a no-op
        controller.stop(pid, record.process_group_id);
    }

    #[test]
    fn test_invalid_pid_is_dead() {
        let dir = tempfile::tempdir().unwrap();
        let controller = NativeController::new(ManagerPaths::new(dir.path()));
        assert!(!controller.is_alive(0, None));
        assert!(!controller.is_alive(u32::MAX, None));
    }

    #[test]
    fn test_permission_denied_counts_as_alive() {
        let dir = tempfile::tempdir().unwrap();
        let controller = NativeController::new(ManagerPaths::new(dir.path()));
        // pid 1 always exists; unprivileged callers get EPERM
        assert!(controller.is_alive(1, None));
    }
}
