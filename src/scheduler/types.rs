use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::process::ProcessRecord;

// ========================
// Trigger rules
// ========================

/// A persisted automation definition
///
/// Serialized flat: `{id, label, profile_label, enabled, skip_if_running,
/// kind: "schedule"|"event", schedule_type|event_type, ...variant fields}`.
/// The owning agent is the key the rule is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub profile_label: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub skip_if_running: bool,
    #[serde(flatten)]
    pub kind: TriggerKind,
}

fn default_true() -> bool {
    true
}

impl TriggerRule {
    /// Enabled rule without an id; the rule store assigns one on add
    pub fn new(label: impl Into<String>, profile_label: impl Into<String>, kind: TriggerKind) -> Self {
        Self {
            id: String::new(),
            label: label.into(),
            profile_label: profile_label.into(),
            enabled: true,
            skip_if_running: false,
            kind,
        }
    }

    pub fn skip_if_running(mut self, skip: bool) -> Self {
        self.skip_if_running = skip;
        self
    }

    /// Label for logs, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    /// Webhook path when this is a webhook or github_push rule
    pub fn webhook_path(&self) -> Option<&str> {
        match &self.kind {
            TriggerKind::Event(EventRule::Webhook { webhook_path, .. })
            | TriggerKind::Event(EventRule::GithubPush { webhook_path, .. }) => Some(webhook_path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule(ScheduleRule),
    Event(EventRule),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum ScheduleRule {
    Hourly { minute: u32 },
    Daily { hour: u32, minute: u32 },
    Cron { expression: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventRule {
    FileNew(FileWatch),
    FileChange(FileWatch),
    Webhook {
        webhook_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
        /// Header carrying the shared secret (default `X-Webhook-Token`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_header: Option<String>,
    },
    GithubPush {
        webhook_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
}

/// Folder watched by `file_new` / `file_change` rules
///
/// `pattern` is a file-name glob (`*.csv`, `report[0-9].txt`). Recursive
/// watches never descend into `.venv`, `__pycache__`, `.git`, `.mypy_cache`
/// or `.pytest_cache`; files inside those trees cannot trigger a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWatch {
    pub path: String,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub recursive: bool,
}

fn default_pattern() -> String {
    "*".to_string()
}

/// Rules keyed by agent name
pub type RuleMap = BTreeMap<String, Vec<TriggerRule>>;

// ========================
// Runtime state
// ========================

/// Per-rule memory that prevents duplicate fires
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerState {
    /// Epoch seconds of the last successful fire
    #[serde(default)]
    pub last_run: BTreeMap<String, f64>,
    /// Baseline of `file_new` rules
    #[serde(default)]
    pub file_snapshots: BTreeMap<String, BTreeSet<String>>,
    /// "YYYY-MM-DD HH:MM" of the last matched cron minute
    #[serde(default)]
    pub cron_last_minute: BTreeMap<String, String>,
    /// Baseline timestamp of `file_change` rules
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_change_since: BTreeMap<String, f64>,
}

impl TriggerState {
    /// Drop entries of rules that no longer exist
    pub fn retain_rules(&mut self, ids: &BTreeSet<&str>) -> bool {
        let before = self.len();
        self.last_run.retain(|id, _| ids.contains(id.as_str()));
        self.file_snapshots.retain(|id, _| ids.contains(id.as_str()));
        self.cron_last_minute.retain(|id, _| ids.contains(id.as_str()));
        self.file_change_since.retain(|id, _| ids.contains(id.as_str()));
        self.len() != before
    }

    fn len(&self) -> usize {
        self.last_run.len()
            + self.file_snapshots.len()
            + self.cron_last_minute.len()
            + self.file_change_since.len()
    }
}

/// Result of one fire attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    Started(ProcessRecord),
    /// `skip_if_running` and the profile already had a live process
    Skipped,
    Failed(String),
}

impl FireOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, FireOutcome::Started(_))
    }
}
