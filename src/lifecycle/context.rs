//! Shared collaborators of the scheduler, the health monitor and the
//! user-facing lifecycle API

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::agents::AgentsRoot;
use crate::config::ManagerConfig;
use crate::process::{launcher, NativeController, ProcessController, ProcessRegistry, ProfileStore};
use crate::utils::paths::ManagerPaths;

pub struct ManagerContext {
    pub config: ManagerConfig,
    pub paths: ManagerPaths,
    pub agents: AgentsRoot,
    pub profiles: ProfileStore,
    pub registry: ProcessRegistry,
    pub automation: AutomationLog,
}

impl ManagerContext {
    /// Context backed by the platform's native controller
    pub fn new(config: ManagerConfig) -> Self {
        let controller: Arc<dyn ProcessController> = Arc::new(NativeController::new(config.paths()));
        Self::with_controller(config, controller)
    }

    pub fn with_controller(config: ManagerConfig, controller: Arc<dyn ProcessController>) -> Self {
        let paths = config.paths();
        Self {
            agents: AgentsRoot::new(&config.agents_root),
            profiles: ProfileStore::new(paths.profiles()),
            registry: ProcessRegistry::new(paths.registry(), controller),
            automation: AutomationLog::new(paths.automation_log()),
            paths,
            config,
        }
    }

    pub fn controller(&self) -> &Arc<dyn ProcessController> {
        self.registry.controller()
    }
}

/// Append-only human-readable log of every automated action
#[derive(Debug, Clone)]
pub struct AutomationLog {
    path: PathBuf,
}

impl AutomationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<local timestamp> | <agent>/<label> | <message>`
    pub fn record(&self, agent: &str, label: &str, message: &str) {
        let line = format!(
            "{} | {}/{} | {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            agent,
            label,
            message
        );
        if let Err(e) = self.append(&line) {
            warn!(path = %self.path.display(), error = %e, "automation log write failed");
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    pub fn tail(&self, max_lines: usize) -> String {
        launcher::tail_log(&self.path, max_lines)
    }
}
