//! manager.rs
//!
//! HealthMonitor: periodic probing of running profiles and auto-restart of
//! profiles that died.
//!
//! Entry points:
//! - `ensure_started` / `shutdown`: background loop lifecycle
//! - `run_cycle`: one probe + restart pass (also driven directly by tests)
//! - `mark_manual_stop` / `clear_manual_stop`: the auto-restart override
//! - `statuses`, `configs`, `set_config`: read and edit persisted state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::probe;
use super::types::{health_key, HealthConfig, HealthConfigMap, HealthState, HealthStatus, Status};
use crate::error::AppError;
use crate::lifecycle::ManagerContext;
use crate::process::types::epoch_seconds;
use crate::process::{ProcessRecord, RunProfile};
use crate::store;
use crate::utils::periodic::PeriodicTask;

pub struct HealthMonitor {
    ctx: Arc<ManagerContext>,
    config_path: PathBuf,
    state_path: PathBuf,
    // Held for a whole cycle and for every read-modify-write of the state file
    lock: Mutex<()>,
    task: PeriodicTask,
}

impl HealthMonitor {
    pub fn new(ctx: Arc<ManagerContext>) -> Self {
        Self {
            config_path: ctx.paths.health_config(),
            state_path: ctx.paths.health_state(),
            ctx,
            lock: Mutex::new(()),
            task: PeriodicTask::new("health"),
        }
    }

    // ========================
    // Loop lifecycle
    // ========================

    /// Start the background loop; a second call while running is a no-op
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        let started = self.task.ensure_started(self.ctx.config.health_interval, move || {
            let this = Arc::clone(&this);
            async move {
                if let Err(e) = this.run_cycle().await {
                    error!(error = %e, "[Health] cycle failed");
                }
            }
        });
        if started {
            info!(interval = ?self.ctx.config.health_interval, "[Health] monitor started");
        }
        started
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub async fn shutdown(&self) {
        self.task.stop().await;
    }

    // ========================
    // Persisted state
    // ========================

    pub fn configs(&self) -> HealthConfigMap {
        store::read_json_or_default(&self.config_path)
    }

    pub async fn set_config(&self, agent: &str, label: &str, config: HealthConfig) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut configs = self.configs();
        configs.insert(health_key(agent, label), config);
        store::write_json_atomic(&self.config_path, &configs)
    }

    pub fn statuses(&self) -> HealthState {
        store::read_json_or_default(&self.state_path)
    }

    fn save_state(&self, state: &HealthState) -> Result<(), AppError> {
        store::write_json_atomic(&self.state_path, state)
    }

    pub async fn mark_manual_stop(&self, agent: &str, label: &str) -> Result<(), AppError> {
        self.set_manual_stop(agent, label, true).await
    }

    pub async fn clear_manual_stop(&self, agent: &str, label: &str) -> Result<(), AppError> {
        self.set_manual_stop(agent, label, false).await
    }

    async fn set_manual_stop(&self, agent: &str, label: &str, value: bool) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut state = self.statuses();
        state.profiles.entry(health_key(agent, label)).or_default().manual_stop = value;
        self.save_state(&state)
    }

    // ========================
    // Cycle
    // ========================

    /// Probe every running profile and restart dead ones where allowed
    pub async fn run_cycle(&self) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let profiles = self.ctx.profiles.load();

        let mut configs = self.configs();
        let mut configs_dirty = false;
        for (agent, list) in &profiles {
            for profile in list {
                let key = health_key(agent, &profile.label);
                if !configs.contains_key(&key) {
                    configs.insert(key, HealthConfig::default_for(profile));
                    configs_dirty = true;
                }
            }
        }
        if configs_dirty {
            store::write_json_atomic(&self.config_path, &configs)?;
        }

        let mut state = self.statuses();
        let table = self.ctx.registry.refresh();
        let now = epoch_seconds();

        for record in &table.processes {
            let key = health_key(&record.agent, &record.label);
            let config = configs
                .get(&key)
                .cloned()
                .unwrap_or_else(|| HealthConfig::default_for_port(record.streamlit_port));
            let result = probe::run_probe(&config, record, self.ctx.config.probe_timeout).await;

            let status = state.profiles.entry(key).or_default();
            status.last_check = Some(now);
            status.last_pid = record.pid;
            status.last_log_time = log_mtime(record);
            match result {
                Ok(()) => {
                    status.status = Status::Healthy;
                    status.last_ok = Some(now);
                }
                Err(reason) => {
                    debug!(agent = %record.agent, label = %record.label, reason, "[Health] probe failed");
                    status.status = Status::Unhealthy;
                    status.last_failure = Some(reason.to_string());
                }
            }
        }

        for (agent, list) in &profiles {
            for profile in list {
                if table.contains(agent, &profile.label) {
                    continue;
                }
                let key = health_key(agent, &profile.label);
                let auto_restart = configs.get(&key).map(|c| c.auto_restart).unwrap_or(false);
                let status = state.profiles.entry(key).or_default();
                status.last_check = Some(now);

                if status.last_pid.is_some() && auto_restart && !status.manual_stop {
                    self.restart(agent, profile, status).await;
                } else {
                    status.status = Status::Stopped;
                }
            }
        }

        self.save_state(&state)
    }

    async fn restart(&self, agent: &str, profile: &RunProfile, status: &mut HealthStatus) {
        match self.launch(agent, profile).await {
            Ok(record) => {
                let pid = record.pid.unwrap_or_default();
                status.restart_count += 1;
                status.status = Status::Running;
                status.last_pid = record.pid;
                status.manual_stop = false;
                info!(agent, label = %profile.label, pid, "[Health] auto-restarted");
                self.ctx.automation.record(
                    agent,
                    &profile.label,
                    &format!("auto-restart #{} started pid {}", status.restart_count, pid),
                );
            }
            Err(reason) => {
                warn!(agent, label = %profile.label, reason = %reason, "[Health] auto-restart failed");
                status.status = Status::Stopped;
                status.last_failure = Some(reason.clone());
                self.ctx.automation.record(
                    agent,
                    &profile.label,
                    &format!("auto-restart failed: {}", reason),
                );
            }
        }
    }

    async fn launch(&self, agent: &str, profile: &RunProfile) -> Result<ProcessRecord, String> {
        let working_dir = self.ctx.agents.resolve(agent).map_err(|e| e.to_string())?;
        let controller = Arc::clone(self.ctx.controller());
        let (agent_owned, profile_owned) = (agent.to_string(), profile.clone());
        let record = tokio::task::spawn_blocking(move || {
            controller.start(&agent_owned, &profile_owned, &working_dir)
        })
        .await
        .map_err(|e| format!("launch task failed: {}", e))?;

        if !record.is_started() {
            return Err(format!("launch failed, see {}", record.log_path.display()));
        }
        self.ctx.registry.add(record.clone()).map_err(|e| e.to_string())?;
        Ok(record)
    }
}

fn log_mtime(record: &ProcessRecord) -> Option<f64> {
    std::fs::metadata(&record.log_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::types::ProbeType;
    use crate::test_support::Fixture;

    async fn start_worker(fx: &Fixture) -> u32 {
        let profile = fx.ctx.profiles.find("news", "worker").unwrap();
        let record = fx.ctx.controller().start("news", &profile, &fx.agent_dir("news"));
        fx.ctx.registry.add(record.clone()).unwrap();
        record.pid.unwrap()
    }

    async fn enable_auto_restart(monitor: &HealthMonitor) {
        let mut config = HealthConfig::default_for_port(None);
        config.auto_restart = true;
        monitor.set_config("news", "worker", config).await.unwrap();
    }

    #[tokio::test]
    async fn test_cycle_creates_default_configs() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        monitor.run_cycle().await.unwrap();

        let configs = monitor.configs();
        assert_eq!(configs["news::ui"].probe_type, ProbeType::Http);
        assert_eq!(configs["news::worker"].probe_type, ProbeType::Disabled);

        let state = monitor.statuses();
        assert_eq!(state.profiles["news::worker"].status, Status::Stopped);
    }

    #[tokio::test]
    async fn test_running_disabled_probe_is_healthy() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        let pid = start_worker(&fx).await;

        monitor.run_cycle().await.unwrap();
        let status = &monitor.statuses().profiles["news::worker"];
        assert_eq!(status.status, Status::Healthy);
        assert_eq!(status.last_pid, Some(pid));
        assert!(status.last_ok.is_some());
        assert!(status.last_log_time.is_some());
    }

    #[tokio::test]
    async fn test_failed_http_probe_is_unhealthy() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        monitor
            .set_config("news", "worker", HealthConfig::default_for_port(Some(port)))
            .await
            .unwrap();
        start_worker(&fx).await;

        monitor.run_cycle().await.unwrap();
        let status = &monitor.statuses().profiles["news::worker"];
        assert_eq!(status.status, Status::Unhealthy);
        assert_eq!(status.last_failure.as_deref(), Some(crate::constants::PROBE_FAILURE_HTTP));
    }

    #[tokio::test]
    async fn test_dead_process_restarts_when_enabled() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        enable_auto_restart(&monitor).await;
        let pid = start_worker(&fx).await;
        monitor.run_cycle().await.unwrap();

        fx.fake.kill(pid);
        monitor.run_cycle().await.unwrap();

        let status = &monitor.statuses().profiles["news::worker"];
        assert_eq!(status.status, Status::Running);
        assert_eq!(status.restart_count, 1);
        assert_ne!(status.last_pid, Some(pid));
        assert!(fx.ctx.registry.find_running("news", "worker").is_some());
        assert!(fx.ctx.automation.tail(5).contains("auto-restart #1"));
    }

    #[tokio::test]
    async fn test_no_restart_without_auto_restart() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        let pid = start_worker(&fx).await;
        monitor.run_cycle().await.unwrap();

        fx.fake.kill(pid);
        monitor.run_cycle().await.unwrap();

        assert_eq!(monitor.statuses().profiles["news::worker"].status, Status::Stopped);
        assert_eq!(fx.fake.start_count(), 1);
    }

    #[tokio::test]
    async fn test_manual_stop_gates_restart() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        enable_auto_restart(&monitor).await;
        let pid = start_worker(&fx).await;
        monitor.run_cycle().await.unwrap();

        monitor.mark_manual_stop("news", "worker").await.unwrap();
        fx.fake.kill(pid);
        monitor.run_cycle().await.unwrap();
        monitor.run_cycle().await.unwrap();
        assert_eq!(fx.fake.start_count(), 1);
        assert_eq!(monitor.statuses().profiles["news::worker"].status, Status::Stopped);

        monitor.clear_manual_stop("news", "worker").await.unwrap();
        monitor.run_cycle().await.unwrap();
        assert_eq!(fx.fake.start_count(), 2);
        assert_eq!(monitor.statuses().profiles["news::worker"].status, Status::Running);
    }

    #[tokio::test]
    async fn test_failed_restart_is_stopped_with_reason() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        enable_auto_restart(&monitor).await;
        let pid = start_worker(&fx).await;
        monitor.run_cycle().await.unwrap();

        fx.fake.kill(pid);
        fx.fake.fail_launches(true);
        monitor.run_cycle().await.unwrap();

        let status = &monitor.statuses().profiles["news::worker"];
        assert_eq!(status.status, Status::Stopped);
        assert_eq!(status.restart_count, 0);
        assert!(status.last_failure.as_deref().unwrap().starts_with("launch failed"));
    }

    #[tokio::test]
    async fn test_manual_stop_is_idempotent() {
        let fx = Fixture::new();
        let monitor = HealthMonitor::new(fx.ctx.clone());
        monitor.mark_manual_stop("news", "ui").await.unwrap();
        monitor.mark_manual_stop("news", "ui").await.unwrap();
        assert!(monitor.statuses().profiles["news::ui"].manual_stop);

        monitor.clear_manual_stop("news", "ui").await.unwrap();
        monitor.clear_manual_stop("news", "ui").await.unwrap();
        assert!(!monitor.statuses().profiles["news::ui"].manual_stop);
    }

    #[tokio::test]
    async fn test_loop_start_is_idempotent() {
        let fx = Fixture::new();
        let monitor = Arc::new(HealthMonitor::new(fx.ctx.clone()));
        assert!(monitor.ensure_started());
        assert!(!monitor.ensure_started());
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        monitor.shutdown().await;
        assert!(!monitor.is_running());
        assert!(monitor.statuses().profiles.contains_key("news::ui"));
    }
}
