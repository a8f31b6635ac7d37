//! Test doubles and fixtures shared by the unit tests

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ManagerConfig;
use crate::lifecycle::ManagerContext;
use crate::process::{launcher, ProcessController, ProcessRecord, RunProfile};
use crate::utils::paths::ManagerPaths;

/// In-memory controller: "processes" are pids in a set
pub struct FakeController {
    paths: ManagerPaths,
    next_pid: AtomicU32,
    alive: Mutex<HashSet<u32>>,
    starts: Mutex<Vec<(String, String)>>,
    stops: Mutex<Vec<u32>>,
    fail: AtomicBool,
}

impl FakeController {
    pub fn new(home: &Path) -> Self {
        Self {
            paths: ManagerPaths::new(home),
            next_pid: AtomicU32::new(1000),
            alive: Mutex::new(HashSet::new()),
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_alive(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }

    /// Simulate the process dying on its own
    pub fn kill(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> Vec<(String, String)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn stops(&self) -> Vec<u32> {
        self.stops.lock().unwrap().clone()
    }
}

impl ProcessController for FakeController {
    fn start(&self, agent: &str, profile: &RunProfile, working_dir: &Path) -> ProcessRecord {
        let log_path = self.paths.process_log(agent, &profile.label);
        let mut record = ProcessRecord::pending(agent, profile, working_dir, &log_path);
        self.starts
            .lock()
            .unwrap()
            .push((agent.to_string(), profile.label.clone()));

        if self.fail.load(Ordering::SeqCst) {
            let _ = launcher::append_marker(&log_path, "launch failed: simulated");
            return record;
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.set_alive(pid);
        record.pid = Some(pid);
        record.process_group_id = Some(pid as i32);
        let _ = launcher::append_marker(&log_path, &format!("start: {}", profile.command));
        record
    }

    fn stop(&self, pid: u32, _process_group_id: Option<i32>) {
        self.stops.lock().unwrap().push(pid);
        self.kill(pid);
    }

    fn is_alive(&self, pid: u32, _process_group_id: Option<i32>) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}

/// Temp home + agents root with one agent `news` and two profiles:
/// `ui` (port 8501) and `worker` (no port)
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub fake: Arc<FakeController>,
    pub ctx: Arc<ManagerContext>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut ManagerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ManagerConfig::with_home(dir.path().join("home"));
        config.agents_root = dir.path().join("agents");
        config.webhook_port = None;
        config.trigger_interval = Duration::from_millis(50);
        config.health_interval = Duration::from_millis(50);
        config.probe_timeout = Duration::from_secs(1);
        tweak(&mut config);

        config.paths().ensure_dirs().unwrap();
        std::fs::create_dir_all(config.agents_root.join("news")).unwrap();

        let fake = Arc::new(FakeController::new(&config.home));
        let ctx = Arc::new(ManagerContext::with_controller(config, fake.clone()));
        ctx.profiles
            .replace(
                "news",
                vec![
                    RunProfile::new("ui", "streamlit run app.py").with_port(8501),
                    RunProfile::new("worker", "python worker.py"),
                ],
            )
            .unwrap();

        Self { dir, fake, ctx }
    }

    pub fn agent_dir(&self, agent: &str) -> PathBuf {
        self.ctx.config.agents_root.join(agent)
    }
}
