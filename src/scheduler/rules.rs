//! Trigger rule store (`config/agent_triggers.json`)
//!
//! Shape: `{agent_name: [TriggerRule]}`. Rules are parsed one at a time so a
//! single malformed rule is skipped without losing the rest of the file.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::warn;

use super::cron::CronSchedule;
use super::types::{EventRule, RuleMap, ScheduleRule, TriggerKind, TriggerRule};
use crate::error::AppError;
use crate::store;

/// (mtime, len) of the rules file; a change means the cache is stale
pub type FileStamp = Option<(SystemTime, u64)>;

/// Serializes read-modify-write edits of the rules file
#[derive(Debug)]
pub struct TriggerRuleStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl TriggerRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stamp(&self) -> FileStamp {
        let metadata = std::fs::metadata(&self.path).ok()?;
        Some((metadata.modified().ok()?, metadata.len()))
    }

    /// All parseable rules; empty when the file is missing or malformed
    pub fn load(&self) -> RuleMap {
        self.try_load().unwrap_or_default()
    }

    /// Parse the rules file
    ///
    /// A missing file is an empty rule set. `None` means the file exists but
    /// is not a JSON object, so callers can keep what they had.
    pub fn try_load(&self) -> Option<RuleMap> {
        if !self.path.exists() {
            return Some(RuleMap::new());
        }
        let raw: Value = store::read_json(&self.path)?;
        let Some(agents) = raw.as_object() else {
            warn!(path = %self.path.display(), "[Scheduler] trigger rules file is not an object");
            return None;
        };

        let mut rules = RuleMap::new();
        for (agent, items) in agents {
            let Some(items) = items.as_array() else {
                continue;
            };
            let parsed: Vec<TriggerRule> = items
                .iter()
                .filter_map(|item| match serde_json::from_value::<TriggerRule>(item.clone()) {
                    Ok(rule) if !rule.id.is_empty() => Some(rule),
                    Ok(_) => {
                        warn!(agent = %agent, "[Scheduler] skipping trigger rule without id");
                        None
                    }
                    Err(e) => {
                        warn!(agent = %agent, error = %e, "[Scheduler] skipping malformed trigger rule");
                        None
                    }
                })
                .collect();
            if !parsed.is_empty() {
                rules.insert(agent.clone(), parsed);
            }
        }
        Some(rules)
    }

    /// Rules for an edit; refuses to overwrite a file that failed to parse
    fn load_for_update(&self) -> Result<RuleMap, AppError> {
        self.try_load().ok_or_else(|| {
            let path = self.path.display().to_string();
            AppError::file_read(&path).with_details(format!("{} is malformed, fix it before editing", path))
        })
    }

    pub fn save(&self, rules: &RuleMap) -> Result<(), AppError> {
        store::write_json_atomic(&self.path, rules)
    }

    /// Validate, assign a fresh id, and append the rule to `agent`
    pub fn add(&self, agent: &str, mut rule: TriggerRule) -> Result<TriggerRule, AppError> {
        validate(&rule)?;
        rule.id = uuid::Uuid::new_v4().to_string();

        let _guard = self.lock();
        let mut rules = self.load_for_update()?;
        rules.entry(agent.to_string()).or_default().push(rule.clone());
        self.save(&rules)?;
        Ok(rule)
    }

    pub fn remove(&self, agent: &str, rule_id: &str) -> Result<TriggerRule, AppError> {
        let _guard = self.lock();
        let mut rules = self.load_for_update()?;
        let list = rules
            .get_mut(agent)
            .ok_or_else(|| AppError::rule_not_found(rule_id))?;
        let index = list
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| AppError::rule_not_found(rule_id))?;
        let removed = list.remove(index);
        if list.is_empty() {
            rules.remove(agent);
        }
        self.save(&rules)?;
        Ok(removed)
    }

    pub fn set_enabled(&self, agent: &str, rule_id: &str, enabled: bool) -> Result<(), AppError> {
        let _guard = self.lock();
        let mut rules = self.load_for_update()?;
        let rule = rules
            .get_mut(agent)
            .and_then(|list| list.iter_mut().find(|r| r.id == rule_id))
            .ok_or_else(|| AppError::rule_not_found(rule_id))?;
        rule.enabled = enabled;
        self.save(&rules)
    }
}

/// Reject rules that could never fire
pub fn validate(rule: &TriggerRule) -> Result<(), AppError> {
    if rule.profile_label.trim().is_empty() {
        return Err(AppError::invalid_config("Trigger rule needs a profile_label"));
    }
    match &rule.kind {
        TriggerKind::Schedule(ScheduleRule::Hourly { minute }) => check_time(0, *minute),
        TriggerKind::Schedule(ScheduleRule::Daily { hour, minute }) => check_time(*hour, *minute),
        TriggerKind::Schedule(ScheduleRule::Cron { expression }) => {
            CronSchedule::parse(expression).map(|_| ())
        }
        TriggerKind::Event(EventRule::FileNew(watch)) | TriggerKind::Event(EventRule::FileChange(watch)) => {
            if watch.path.trim().is_empty() {
                Err(AppError::invalid_config("File trigger needs a folder path"))
            } else {
                Ok(())
            }
        }
        TriggerKind::Event(EventRule::Webhook { webhook_path, .. })
        | TriggerKind::Event(EventRule::GithubPush { webhook_path, .. }) => {
            if normalize_webhook_path(webhook_path) == "/" {
                Err(AppError::invalid_config("Webhook trigger needs a non-root path"))
            } else {
                Ok(())
            }
        }
    }
}

fn check_time(hour: u32, minute: u32) -> Result<(), AppError> {
    if hour > 23 || minute > 59 {
        return Err(AppError::invalid_config(format!(
            "Invalid schedule time {:02}:{:02}",
            hour, minute
        )));
    }
    Ok(())
}

/// Leading slash, no trailing slash: "hooks/x/" -> "/hooks/x"
pub fn normalize_webhook_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}
