use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::HEALTH_KEY_SEPARATOR;
use crate::process::RunProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    Http,
    Command,
    Disabled,
}

/// Probe configuration of one (agent, profile)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub probe_type: ProbeType,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub probe_command: String,
    #[serde(default)]
    pub auto_restart: bool,
}

impl HealthConfig {
    /// `http` when the profile declares a port, otherwise `disabled`
    pub fn default_for(profile: &RunProfile) -> Self {
        Self::default_for_port(profile.streamlit_port)
    }

    pub fn default_for_port(port: Option<u16>) -> Self {
        Self {
            probe_type: if port.is_some() { ProbeType::Http } else { ProbeType::Disabled },
            port,
            probe_command: String::new(),
            auto_restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Running,
    Stopped,
}

/// Observed state of one (agent, profile)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: Status,
    /// Epoch seconds of the last cycle that looked at this profile
    #[serde(default)]
    pub last_check: Option<f64>,
    /// Modification time of the process log, epoch seconds
    #[serde(default)]
    pub last_log_time: Option<f64>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub last_pid: Option<u32>,
    /// Set by an explicit user stop; blocks auto-restart until the next start
    #[serde(default)]
    pub manual_stop: bool,
    #[serde(default)]
    pub last_ok: Option<f64>,
    #[serde(default)]
    pub last_failure: Option<String>,
}

/// `config/health_config.json`
pub type HealthConfigMap = BTreeMap<String, HealthConfig>;

/// `logs/health_state.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthState {
    #[serde(default)]
    pub profiles: BTreeMap<String, HealthStatus>,
}

/// "<agent>::<label>"
pub fn health_key(agent: &str, label: &str) -> String {
    format!("{}{}{}", agent, HEALTH_KEY_SEPARATOR, label)
}
