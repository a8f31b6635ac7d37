use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A named way to start an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProfile {
    pub label: String,
    /// Shell command run inside the agent's virtual environment
    pub command: String,
    #[serde(default)]
    pub streamlit_port: Option<u16>,
}

impl RunProfile {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            streamlit_port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.streamlit_port = Some(port);
        self
    }
}

/// A process launched by the manager
///
/// `pid` is `None` only on a failed launch; such records are returned to the
/// caller but never stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub agent: String,
    pub label: String,
    pub pid: Option<u32>,
    #[serde(rename = "pgid", default)]
    pub process_group_id: Option<i32>,
    pub command: String,
    #[serde(default)]
    pub streamlit_port: Option<u16>,
    #[serde(rename = "cwd")]
    pub working_dir: PathBuf,
    pub log_path: PathBuf,
    /// Epoch seconds
    pub started_at: f64,
}

impl ProcessRecord {
    /// A not-yet-started record for `profile`; the controller fills in the pid
    pub fn pending(agent: &str, profile: &RunProfile, working_dir: &Path, log_path: &Path) -> Self {
        Self {
            agent: agent.to_string(),
            label: profile.label.clone(),
            pid: None,
            process_group_id: None,
            command: profile.command.clone(),
            streamlit_port: profile.streamlit_port,
            working_dir: working_dir.to_path_buf(),
            log_path: log_path.to_path_buf(),
            started_at: epoch_seconds(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.pid.is_some()
    }

    pub fn matches(&self, agent: &str, label: &str) -> bool {
        self.agent == agent && self.label == label
    }
}

/// Persisted registry table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessTable {
    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
}

impl ProcessTable {
    pub fn find(&self, agent: &str, label: &str) -> Option<&ProcessRecord> {
        self.processes.iter().find(|r| r.matches(agent, label))
    }

    pub fn contains(&self, agent: &str, label: &str) -> bool {
        self.find(agent, label).is_some()
    }
}

pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
