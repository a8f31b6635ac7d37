use std::env;
use std::path::{Path, PathBuf};

// =============================================================================
// Core Path Functions
// =============================================================================

/// Get user home directory
/// NEVER use "~" as Rust's std::fs and Command do not expand it
pub fn get_home_dir() -> Result<PathBuf, String> {
    dirs::home_dir().ok_or_else(|| "Cannot determine home directory".to_string())
}

/// Get the manager home directory (holds config/ and logs/)
/// Priority:
/// 1. AGENT_MANAGER_HOME environment variable
/// 2. Default to ~/.agentica
pub fn get_manager_home() -> Result<PathBuf, String> {
    if let Ok(root) = env::var("AGENT_MANAGER_HOME") {
        let path = PathBuf::from(root);
        if !path.exists() {
            std::fs::create_dir_all(&path)
                .map_err(|e| format!("Failed to create AGENT_MANAGER_HOME: {}", e))?;
        }
        return Ok(path);
    }

    let default_path = get_home_dir()?.join(".agentica");
    if !default_path.exists() {
        std::fs::create_dir_all(&default_path)
            .map_err(|e| format!("Failed to create ~/.agentica: {}", e))?;
    }
    Ok(default_path)
}

/// Every store path derived from one manager home directory
///
/// Layout:
/// - `<home>/config/settings.json`
/// - `<home>/config/agent_profiles.json`
/// - `<home>/config/agent_triggers.json`
/// - `<home>/config/health_config.json`
/// - `<home>/logs/agent_manager_state.json` (process registry)
/// - `<home>/logs/trigger_state.json`
/// - `<home>/logs/health_state.json`
/// - `<home>/logs/automation.log`
/// - `<home>/logs/agent_manager_logs/<agent>_<label>.log`
#[derive(Debug, Clone)]
pub struct ManagerPaths {
    home: PathBuf,
}

impl ManagerPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    // === Config Directory (user-defined configuration) ===

    pub fn config_dir(&self) -> PathBuf {
        self.home.join("config")
    }

    pub fn settings(&self) -> PathBuf {
        self.config_dir().join("settings.json")
    }

    pub fn profiles(&self) -> PathBuf {
        self.config_dir().join("agent_profiles.json")
    }

    pub fn trigger_rules(&self) -> PathBuf {
        self.config_dir().join("agent_triggers.json")
    }

    pub fn health_config(&self) -> PathBuf {
        self.config_dir().join("health_config.json")
    }

    // === Logs Directory (system-managed runtime state) ===

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn registry(&self) -> PathBuf {
        self.logs_dir().join("agent_manager_state.json")
    }

    pub fn trigger_state(&self) -> PathBuf {
        self.logs_dir().join("trigger_state.json")
    }

    pub fn health_state(&self) -> PathBuf {
        self.logs_dir().join("health_state.json")
    }

    pub fn automation_log(&self) -> PathBuf {
        self.logs_dir().join("automation.log")
    }

    pub fn process_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("agent_manager_logs")
    }

    /// Deterministic per-profile log file, overwritten on every start
    pub fn process_log(&self, agent: &str, label: &str) -> PathBuf {
        self.process_logs_dir()
            .join(format!("{}_{}.log", sanitize_component(agent), sanitize_component(label)))
    }

    /// Create config/, logs/ and logs/agent_manager_logs/
    pub fn ensure_dirs(&self) -> Result<(), String> {
        for dir in [self.config_dir(), self.logs_dir(), self.process_logs_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }
}

/// Replace path separators so a label can never escape the logs directory
fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
