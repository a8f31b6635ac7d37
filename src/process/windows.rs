use std::os::windows::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{info, warn};

use super::controller::ProcessController;
use super::launcher;
use super::types::{ProcessRecord, RunProfile};
use crate::agents::VirtualEnv;
use crate::constants::{STOP_POLL_ATTEMPTS, STOP_POLL_INTERVAL};
use crate::utils::paths::ManagerPaths;

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Windows controller: no shell activation, the venv interpreter is invoked directly
pub struct NativeController {
    paths: ManagerPaths,
}

impl NativeController {
    pub fn new(paths: ManagerPaths) -> Self {
        Self { paths }
    }

    fn taskkill(pid: u32, force: bool) {
        let mut cmd = Command::new("taskkill");
        if force {
            cmd.arg("/F");
        }
        let result = cmd
            .args(["/T", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .status();
        if let Err(e) = result {
            warn!(pid, error = %e, "[Launcher] taskkill failed");
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
                &format!("launch failed: interpreter not found at {}", venv.python().display()),
            );
            return record;
        }

        let argv = launcher::translate_command(&profile.command, &venv.python());
        let _ = launcher::write_marker(&mut log, &format!("start: {}", argv.join(" ")));

        let stderr = match log.try_clone() {
            Ok(stderr) => stderr,
            Err(e) => {
                let _ = launcher::write_marker(&mut log, &format!("launch failed: {}", e));
                return record;
            }
        };

        let spawned = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .creation_flags(CREATE_NEW_PROCESS_GROUP)
            .spawn();

        match spawned {
            Ok(mut child) => {
                let pid = child.id();
                record.pid = Some(pid);
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

    fn stop(&self, pid: u32, _process_group_id: Option<i32>) {
        if !self.is_alive(pid, None) {
            return;
        }
        Self::taskkill(pid, false);

        for _ in 0..STOP_POLL_ATTEMPTS {
            if !self.is_alive(pid, None) {
                return;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        Self::taskkill(pid, true);
    }

    fn is_alive(&self, pid: u32, _process_group_id: Option<i32>) -> bool {
        if pid == 0 {
            return false;
        }
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .output();
        match output {
            Ok(output) => {
                let needle = format!("\"{}\"", pid);
                String::from_utf8_lossy(&output.stdout).contains(&needle)
            }
            // Cannot tell; keep the record rather than dropping a live process
            Err(_) => true,
        }
    }
}
