//! Application root: owns one scheduler, one health monitor and the
//! optional webhook receiver, and exposes user-initiated start/stop.

pub mod context;

pub use context::{AutomationLog, ManagerContext};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::api::{self, WebhookServer};
use crate::config::ManagerConfig;
use crate::error::AppError;
use crate::health::HealthMonitor;
use crate::process::{launcher, ProcessController, ProcessRecord, ProcessTable};
use crate::scheduler::TriggerScheduler;

pub struct AgentManager {
    ctx: Arc<ManagerContext>,
    health: Arc<HealthMonitor>,
    scheduler: Arc<TriggerScheduler>,
    webhook: Mutex<Option<WebhookServer>>,
}

impl AgentManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self::from_context(Arc::new(ManagerContext::new(config)))
    }

    /// Manager driving processes through `controller` instead of the OS
    pub fn with_controller(config: ManagerConfig, controller: Arc<dyn ProcessController>) -> Self {
        Self::from_context(Arc::new(ManagerContext::with_controller(config, controller)))
    }

    /// Manager configured from `AGENT_MANAGER_HOME` and the settings file
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(ManagerConfig::from_env()?))
    }

    fn from_context(ctx: Arc<ManagerContext>) -> Self {
        let health = Arc::new(HealthMonitor::new(ctx.clone()));
        let scheduler = Arc::new(TriggerScheduler::new(ctx.clone(), health.clone()));
        Self {
            ctx,
            health,
            scheduler,
            webhook: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<ManagerContext> {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.scheduler
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    // ========================
    // Background services
    // ========================

    /// Start both loops and the webhook receiver; safe to call repeatedly
    pub async fn ensure_started(&self) -> Result<(), AppError> {
        self.ctx.paths.ensure_dirs().map_err(AppError::file_write)?;
        self.scheduler.ensure_started();
        self.health.ensure_started();

        let Some(port) = self.ctx.config.webhook_port else {
            return Ok(());
        };
        let mut webhook = self.webhook.lock().await;
        if webhook.is_none() {
            let server =
                api::start_server(&self.ctx.config.webhook_host, port, self.scheduler.clone()).await?;
            *webhook = Some(server);
        }
        Ok(())
    }

    /// Stop both loops and the receiver, waiting for each to exit
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.health.shutdown().await;
        if let Some(server) = self.webhook.lock().await.take() {
            server.shutdown().await;
        }
        info!("[Manager] shut down");
    }

    pub async fn webhook_addr(&self) -> Option<SocketAddr> {
        self.webhook.lock().await.as_ref().map(WebhookServer::local_addr)
    }

    // ========================
    // User-initiated lifecycle
    // ========================

    pub fn list_agents(&self) -> Vec<String> {
        self.ctx.agents.list_agents()
    }

    /// Reconciled registry
    pub fn running(&self) -> ProcessTable {
        self.ctx.registry.refresh()
    }

    /// Start a run profile; clears the manual-stop override
    pub async fn start_profile(&self, agent: &str, label: &str) -> Result<ProcessRecord, AppError> {
        let profile = self
            .ctx
            .profiles
            .find(agent, label)
            .ok_or_else(|| AppError::profile_not_found(agent, label))?;
        let working_dir = self.ctx.agents.resolve(agent)?;

        self.health.clear_manual_stop(agent, label).await?;

        let controller = Arc::clone(self.ctx.controller());
        let agent_owned = agent.to_string();
        let record = tokio::task::spawn_blocking(move || {
            controller.start(&agent_owned, &profile, &working_dir)
        })
        .await
        .map_err(|e| AppError::launch_failed(e.to_string()))?;

        if !record.is_started() {
            warn!(agent, label, log = %record.log_path.display(), "[Manager] launch failed");
            return Err(AppError::launch_failed(format!("{}::{} did not start", agent, label))
                .with_details(record.log_path.display().to_string()));
        }

        self.ctx.registry.add(record.clone())?;
        self.ctx.automation.record(
            agent,
            label,
            &format!("started manually, pid {}", record.pid.unwrap_or_default()),
        );
        info!(agent, label, pid = ?record.pid, "[Manager] profile started");
        Ok(record)
    }

    /// Stop every live process of a profile; marks the manual-stop override
    pub async fn stop_profile(&self, agent: &str, label: &str) -> Result<Vec<ProcessRecord>, AppError> {
        self.health.mark_manual_stop(agent, label).await?;

        let targets: Vec<ProcessRecord> = self
            .running()
            .processes
            .into_iter()
            .filter(|r| r.matches(agent, label))
            .collect();

        let mut stopped = Vec::new();
        for record in targets {
            if let Some(pid) = record.pid {
                stopped.extend(self.stop_record(pid, record.process_group_id).await?);
            }
        }
        Ok(stopped)
    }

    /// Stop a single pid; marks manual stop for the profile it belongs to
    pub async fn stop_pid(&self, pid: u32) -> Result<Vec<ProcessRecord>, AppError> {
        let record = self
            .ctx
            .registry
            .load()
            .processes
            .into_iter()
            .find(|r| r.pid == Some(pid));

        let process_group_id = match &record {
            Some(record) => {
                self.health.mark_manual_stop(&record.agent, &record.label).await?;
                record.process_group_id
            }
            None => None,
        };
        self.stop_record(pid, process_group_id).await
    }

    async fn stop_record(&self, pid: u32, process_group_id: Option<i32>) -> Result<Vec<ProcessRecord>, AppError> {
        let controller = Arc::clone(self.ctx.controller());
        tokio::task::spawn_blocking(move || controller.stop(pid, process_group_id))
            .await
            .map_err(|e| AppError::unknown(e.to_string()))?;

        let removed = self.ctx.registry.remove_pid(pid)?;
        for record in &removed {
            if let Err(e) = launcher::append_marker(&record.log_path, &format!("stop: pid {}", pid)) {
                warn!(pid, error = %e, "[Manager] could not write stop marker");
            }
            self.ctx
                .automation
                .record(&record.agent, &record.label, &format!("stopped manually, pid {}", pid));
        }
        info!(pid, "[Manager] process stopped");
        Ok(removed)
    }

    /// Whether the profile's UI port accepts connections; `None` without a port
    pub fn ui_reachable(&self, agent: &str, label: &str) -> Option<bool> {
        let port = self.ctx.profiles.find(agent, label)?.streamlit_port?;
        Some(launcher::port_is_open(port))
    }

    /// Last `max_lines` of a profile's log
    pub fn tail_log(&self, agent: &str, label: &str, max_lines: usize) -> String {
        launcher::tail_log(&self.ctx.paths.process_log(agent, label), max_lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::health::{HealthConfig, Status};
    use crate::process::RunProfile;
    use crate::test_support::Fixture;

    fn manager(fx: &Fixture) -> AgentManager {
        AgentManager::from_context(fx.ctx.clone())
    }

    #[tokio::test]
    async fn test_start_and_stop_profile() {
        let fx = Fixture::new();
        let mgr = manager(&fx);

        let record = mgr.start_profile("news", "ui").await.unwrap();
        let pid = record.pid.unwrap();
        assert_eq!(record.streamlit_port, Some(8501));
        assert!(mgr.running().contains("news", "ui"));

        let stopped = mgr.stop_profile("news", "ui").await.unwrap();
        assert_eq!(stopped.len(), 1);
        assert_eq!(fx.fake.stops(), vec![pid]);
        assert!(mgr.running().processes.is_empty());
        assert!(mgr.health().statuses().profiles["news::ui"].manual_stop);
        assert!(mgr.tail_log("news", "ui", 5).contains(&format!("stop: pid {}", pid)));
    }

    #[tokio::test]
    async fn test_start_clears_manual_stop() {
        let fx = Fixture::new();
        let mgr = manager(&fx);
        mgr.health().mark_manual_stop("news", "worker").await.unwrap();

        mgr.start_profile("news", "worker").await.unwrap();
        assert!(!mgr.health().statuses().profiles["news::worker"].manual_stop);
    }

    #[tokio::test]
    async fn test_start_errors() {
        let fx = Fixture::new();
        let mgr = manager(&fx);

        let err = mgr.start_profile("news", "nope").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProfileNotFound);

        fx.fake.fail_launches(true);
        let err = mgr.start_profile("news", "worker").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LaunchFailed);
        assert!(err.details.unwrap().ends_with("news_worker.log"));
        assert!(mgr.running().processes.is_empty());
    }

    #[tokio::test]
    async fn test_stop_pid_blocks_auto_restart() {
        let fx = Fixture::new();
        let mgr = manager(&fx);
        let mut config = HealthConfig::default_for_port(None);
        config.auto_restart = true;
        mgr.health().set_config("news", "worker", config).await.unwrap();

        let pid = mgr.start_profile("news", "worker").await.unwrap().pid.unwrap();
        mgr.health().run_cycle().await.unwrap();

        mgr.stop_pid(pid).await.unwrap();
        mgr.health().run_cycle().await.unwrap();

        assert_eq!(fx.fake.start_count(), 1);
        assert_eq!(mgr.health().statuses().profiles["news::worker"].status, Status::Stopped);
    }

    #[tokio::test]
    async fn test_ui_reachable() {
        let fx = Fixture::new();
        let mgr = manager(&fx);
        assert_eq!(mgr.ui_reachable("news", "worker"), None);
        assert_eq!(mgr.ui_reachable("news", "missing"), None);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        fx.ctx
            .profiles
            .replace("news", vec![RunProfile::new("ui", "streamlit run app.py").with_port(port)])
            .unwrap();
        assert_eq!(mgr.ui_reachable("news", "ui"), Some(true));
    }

    #[tokio::test]
    async fn test_stop_unknown_pid_is_quiet() {
        let fx = Fixture::new();
        let mgr = manager(&fx);
        assert!(mgr.stop_pid(4242).await.unwrap().is_empty());
        assert_eq!(fx.fake.stops(), vec![4242]);
    }

    #[tokio::test]
    async fn test_ensure_started_and_shutdown() {
        let fx = Fixture::with_config(|c| {
            c.webhook_host = "127.0.0.1".to_string();
            c.webhook_port = Some(0);
        });
        let mgr = manager(&fx);

        mgr.ensure_started().await.unwrap();
        mgr.ensure_started().await.unwrap();
        assert!(mgr.scheduler().is_running());
        assert!(mgr.health().is_running());
        let addr = mgr.webhook_addr().await.unwrap();
        assert_ne!(addr.port(), 0);

        mgr.shutdown().await;
        assert!(!mgr.scheduler().is_running());
        assert!(!mgr.health().is_running());
        assert!(mgr.webhook_addr().await.is_none());
    }
}
