use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_WEBHOOK_HOST, DEFAULT_WEBHOOK_PORT, HEALTH_INTERVAL, MAX_SETTINGS_BYTES,
    PROBE_TIMEOUT, TRIGGER_INTERVAL,
};
use crate::error::AppError;
use crate::utils::paths::{self, ManagerPaths};

/// Runtime configuration of one manager instance
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root of `config/` and `logs/`
    pub home: PathBuf,
    /// Directory whose sub-directories are agents
    pub agents_root: PathBuf,
    pub webhook_host: String,
    /// `None` disables the webhook receiver
    pub webhook_port: Option<u16>,
    pub trigger_interval: Duration,
    pub health_interval: Duration,
    pub probe_timeout: Duration,
    /// Advance the `file_change` baseline after each successful fire
    pub rearm_file_change: bool,
}

/// On-disk shape of `config/settings.json`
///
/// Every key is optional; missing keys keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rearm_file_change: Option<bool>,
}

impl ManagerConfig {
    /// Built-in defaults for a given home directory
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            agents_root: home.join("AGENTS"),
            home,
            webhook_host: DEFAULT_WEBHOOK_HOST.to_string(),
            webhook_port: Some(DEFAULT_WEBHOOK_PORT),
            trigger_interval: TRIGGER_INTERVAL,
            health_interval: HEALTH_INTERVAL,
            probe_timeout: PROBE_TIMEOUT,
            rearm_file_change: false,
        }
    }

    /// Resolve configuration: defaults, then settings.json, then environment
    ///
    /// Environment variables:
    /// - AGENT_MANAGER_HOME: manager home (default: ~/.agentica)
    /// - AGENTS_ROOT: agents directory (default: <home>/AGENTS)
    /// - AGENT_MANAGER_WEBHOOK_HOST: receiver bind address (default: 127.0.0.1)
    /// - AGENT_MANAGER_WEBHOOK_PORT: receiver port, or "off" to disable (default: 8765)
    pub fn from_env() -> Result<Self, AppError> {
        let home = paths::get_manager_home().map_err(AppError::invalid_config)?;
        let mut config = Self::load(&home)?;

        if let Ok(root) = std::env::var("AGENTS_ROOT") {
            if !root.trim().is_empty() {
                config.agents_root = PathBuf::from(root);
            }
        }
        if let Ok(host) = std::env::var("AGENT_MANAGER_WEBHOOK_HOST") {
            if !host.trim().is_empty() {
                config.webhook_host = host;
            }
        }
        if let Ok(port) = std::env::var("AGENT_MANAGER_WEBHOOK_PORT") {
            config.webhook_port = parse_port_override(&port)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load settings.json under `home` on top of the defaults
    ///
    /// A missing file yields the defaults. A malformed file is ignored with a
    /// warning. A file above 1MB is rejected.
    pub fn load(home: &Path) -> Result<Self, AppError> {
        let mut config = Self::with_home(home);
        let settings_path = ManagerPaths::new(home).settings();
        if let Some(settings) = read_settings(&settings_path)? {
            config.apply(settings);
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, settings: SettingsFile) {
        if let Some(root) = settings.agents_root.filter(|r| !r.trim().is_empty()) {
            self.agents_root = PathBuf::from(root);
        }
        if let Some(host) = settings.webhook_host.filter(|h| !h.trim().is_empty()) {
            self.webhook_host = host;
        }
        if let Some(port) = settings.webhook_port {
            self.webhook_port = Some(port);
        }
        if settings.webhook_enabled == Some(false) {
            self.webhook_port = None;
        }
        if let Some(secs) = settings.trigger_interval_secs {
            self.trigger_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.health_interval_secs {
            self.health_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.probe_timeout_secs {
            self.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(rearm) = settings.rearm_file_change {
            self.rearm_file_change = rearm;
        }
    }

    /// Validate configuration constraints
    pub fn validate(&self) -> Result<(), AppError> {
        if self.trigger_interval.is_zero() {
            return Err(AppError::invalid_config("trigger_interval must be greater than zero"));
        }
        if self.health_interval.is_zero() {
            return Err(AppError::invalid_config("health_interval must be greater than zero"));
        }
        if self.probe_timeout.is_zero() {
            return Err(AppError::invalid_config("probe_timeout must be greater than zero"));
        }
        if self.webhook_host.trim().is_empty() {
            return Err(AppError::invalid_config("webhook_host must not be empty"));
        }
        Ok(())
    }

    /// Store paths derived from `home`
    pub fn paths(&self) -> ManagerPaths {
        ManagerPaths::new(&self.home)
    }
}

/// Read settings.json with the 1MB size guard
fn read_settings(path: &Path) -> Result<Option<SettingsFile>, AppError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(None),
    };

    if metadata.len() > MAX_SETTINGS_BYTES {
        return Err(AppError::invalid_config(format!(
            "Settings file too large: {} bytes (max 1MB)",
            metadata.len()
        ))
        .with_details(path.display().to_string()));
    }

    Ok(crate::store::read_json(path))
}

/// "off", "none", "disabled" or "0" disable the receiver; anything else must be a port
fn parse_port_override(value: &str) -> Result<Option<u16>, AppError> {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "" | "off" | "none" | "disabled" | "0" => Ok(None),
        _ => value.parse::<u16>().map(Some).map_err(|_| {
            AppError::invalid_config(format!("Invalid AGENT_MANAGER_WEBHOOK_PORT: '{}'", value))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::load(dir.path()).unwrap();
        assert_eq!(config.agents_root, dir.path().join("AGENTS"));
        assert_eq!(config.webhook_port, Some(DEFAULT_WEBHOOK_PORT));
        assert_eq!(config.trigger_interval, TRIGGER_INTERVAL);
        assert!(!config.rearm_file_change);
    }

    #[test]
    fn test_settings_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ManagerPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        fs::write(
            paths.settings(),
            r#"{"agents_root": "/opt/agents", "webhook_port": 9000, "health_interval_secs": 30, "rearm_file_change": true}"#,
        )
        .unwrap();

        let config = ManagerConfig::load(dir.path()).unwrap();
        assert_eq!(config.agents_root, PathBuf::from("/opt/agents"));
        assert_eq!(config.webhook_port, Some(9000));
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert!(config.rearm_file_change);
    }

    #[test]
    fn test_webhook_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ManagerPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        fs::write(paths.settings(), r#"{"webhook_enabled": false}"#).unwrap();

        let config = ManagerConfig::load(dir.path()).unwrap();
        assert_eq!(config.webhook_port, None);
    }

    #[test]
    fn test_malformed_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ManagerPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        fs::write(paths.settings(), "{ nope").unwrap();

        let config = ManagerConfig::load(dir.path()).unwrap();
        assert_eq!(config.webhook_host, DEFAULT_WEBHOOK_HOST);
    }

    #[test]
    fn test_oversized_settings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ManagerPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        let padding = " ".repeat(MAX_SETTINGS_BYTES as usize + 1);
        fs::write(paths.settings(), format!("{{}}{}", padding)).unwrap();

        let err = ManagerConfig::load(dir.path()).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ManagerPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        fs::write(paths.settings(), r#"{"trigger_interval_secs": 0}"#).unwrap();

        assert!(ManagerConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_parse_port_override() {
        assert_eq!(parse_port_override("off").unwrap(), None);
        assert_eq!(parse_port_override(" 9100 ").unwrap(), Some(9100));
        assert!(parse_port_override("http").is_err());
    }
}
