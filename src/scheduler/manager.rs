//! manager.rs
//!
//! TriggerScheduler: evaluates schedule and file-event rules on a fixed
//! interval and fires them through the shared launch path. Webhook requests
//! arrive through `handle_webhook` and use the same path.
//!
//! All rule evaluation, state mutation and firing happens under one async
//! mutex, so two triggers can never race to start the same profile.

use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Local, TimeZone, Timelike};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::cron::CronSchedule;
use super::files;
use super::rules::{normalize_webhook_path, FileStamp, TriggerRuleStore};
use super::types::*;
use crate::api::auth;
use crate::constants::GITHUB_EVENT_HEADER;
use crate::error::AppError;
use crate::health::HealthMonitor;
use crate::lifecycle::ManagerContext;
use crate::store;
use crate::utils::periodic::PeriodicTask;

pub struct TriggerScheduler {
    ctx: Arc<ManagerContext>,
    health: Arc<HealthMonitor>,
    rules: TriggerRuleStore,
    state_path: PathBuf,
    inner: Mutex<SchedulerInner>,
    task: PeriodicTask,
}

struct SchedulerInner {
    rules: RuleMap,
    rules_stamp: FileStamp,
    rules_loaded: bool,
    state: TriggerState,
}

/// Response of a webhook delivery
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    pub status: StatusCode,
    pub message: String,
}

impl WebhookReply {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl TriggerScheduler {
    pub fn new(ctx: Arc<ManagerContext>, health: Arc<HealthMonitor>) -> Self {
        let rules = TriggerRuleStore::new(ctx.paths.trigger_rules());
        let state_path = ctx.paths.trigger_state();
        let state = store::read_json_or_default(&state_path);
        Self {
            ctx,
            health,
            rules,
            state_path,
            inner: Mutex::new(SchedulerInner {
                rules: RuleMap::new(),
                rules_stamp: None,
                rules_loaded: false,
                state,
            }),
            task: PeriodicTask::new("scheduler"),
        }
    }

    pub fn rules(&self) -> &TriggerRuleStore {
        &self.rules
    }

    // ========================
    // Loop lifecycle
    // ========================

    /// Start the background loop; a second call while running is a no-op
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        let started = self.task.ensure_started(self.ctx.config.trigger_interval, move || {
            let this = Arc::clone(&this);
            async move {
                if let Err(e) = this.run_cycle(Local::now()).await {
                    error!(error = %e, "[Scheduler] cycle failed");
                }
            }
        });
        if started {
            info!(interval = ?self.ctx.config.trigger_interval, "[Scheduler] trigger loop started");
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
    // Cycle
    // ========================

    /// Evaluate every enabled schedule and file rule as of `now`
    pub async fn run_cycle(&self, now: DateTime<Local>) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let mut dirty = self.reload_rules_if_stale(&mut inner);

        let due: Vec<(String, TriggerRule)> = inner
            .rules
            .iter()
            .flat_map(|(agent, rules)| rules.iter().map(move |r| (agent.clone(), r.clone())))
            .filter(|(_, rule)| rule.enabled)
            .collect();

        for (agent, rule) in due {
            let fire = match &rule.kind {
                TriggerKind::Schedule(schedule) => {
                    let (fire, changed) = schedule_due(&mut inner.state, &rule.id, schedule, now);
                    dirty |= changed;
                    fire
                }
                TriggerKind::Event(EventRule::FileNew(watch)) => {
                    let (fire, changed) = self.file_new_due(&mut inner.state, &rule.id, watch).await;
                    dirty |= changed;
                    fire
                }
                TriggerKind::Event(EventRule::FileChange(watch)) => {
                    let (fire, changed) =
                        self.file_change_due(&mut inner.state, &rule.id, watch, now).await;
                    dirty |= changed;
                    fire
                }
                TriggerKind::Event(EventRule::Webhook { .. })
                | TriggerKind::Event(EventRule::GithubPush { .. }) => false,
            };

            if fire {
                debug!(agent = %agent, rule_id = %rule.id, "[Scheduler] rule due");
                let outcome = self.fire_rule_locked(&mut inner, &agent, &rule, now).await;
                if outcome.is_started() && self.ctx.config.rearm_file_change {
                    if let TriggerKind::Event(EventRule::FileChange(_)) = rule.kind {
                        inner.state.file_change_since.insert(rule.id.clone(), epoch(now));
                        dirty = true;
                    }
                }
            }
        }

        if dirty {
            self.save_state(&inner.state)?;
        }
        Ok(())
    }

    /// Reload rules when the file's (mtime, len) changed; returns whether state was pruned
    fn reload_rules_if_stale(&self, inner: &mut SchedulerInner) -> bool {
        let stamp = self.rules.stamp();
        if inner.rules_loaded && stamp == inner.rules_stamp {
            return false;
        }
        let Some(rules) = self.rules.try_load() else {
            // Keep the cached rules and their state until the file parses again
            warn!(path = %self.rules.path().display(), "[Scheduler] trigger rules unreadable, keeping previous rules");
            return false;
        };
        inner.rules = rules;
        inner.rules_stamp = stamp;
        inner.rules_loaded = true;
        debug!(agents = inner.rules.len(), "[Scheduler] rules reloaded");

        let ids: BTreeSet<&str> = inner
            .rules
            .values()
            .flatten()
            .map(|r| r.id.as_str())
            .collect();
        inner.state.retain_rules(&ids)
    }

    fn save_state(&self, state: &TriggerState) -> Result<(), AppError> {
        store::write_json_atomic(&self.state_path, state)
    }

    /// Snapshot of the in-memory trigger state
    pub async fn state(&self) -> TriggerState {
        self.inner.lock().await.state.clone()
    }

    async fn file_new_due(&self, state: &mut TriggerState, rule_id: &str, watch: &FileWatch) -> (bool, bool) {
        let current: BTreeSet<String> = scan(watch)
            .await
            .into_iter()
            .map(|f| f.path.to_string_lossy().into_owned())
            .collect();

        match state.file_snapshots.get(rule_id) {
            None => {
                state.file_snapshots.insert(rule_id.to_string(), current);
                (false, true)
            }
            Some(baseline) if *baseline == current => (false, false),
            Some(baseline) => {
                let fire = current.iter().any(|path| !baseline.contains(path));
                state.file_snapshots.insert(rule_id.to_string(), current);
                (fire, true)
            }
        }
    }

    async fn file_change_due(
        &self,
        state: &mut TriggerState,
        rule_id: &str,
        watch: &FileWatch,
        now: DateTime<Local>,
    ) -> (bool, bool) {
        let Some(&since) = state.file_change_since.get(rule_id) else {
            state.file_change_since.insert(rule_id.to_string(), epoch(now));
            return (false, true);
        };
        let fire = scan(watch).await.iter().any(|f| f.modified > since);
        (fire, false)
    }

    // ========================
    // Fire path
    // ========================

    /// Launch the rule's profile; the caller holds the scheduler lock
    async fn fire_rule_locked(
        &self,
        inner: &mut SchedulerInner,
        agent: &str,
        rule: &TriggerRule,
        now: DateTime<Local>,
    ) -> FireOutcome {
        let name = rule.display_name().to_string();
        let label = rule.profile_label.as_str();

        let table = self.ctx.registry.refresh();
        if rule.skip_if_running && table.contains(agent, label) {
            info!(agent, label, rule_id = %rule.id, "[Scheduler] skipped, already running");
            self.ctx
                .automation
                .record(agent, label, &format!("trigger '{}' skipped: already running", name));
            return FireOutcome::Skipped;
        }

        match self.launch(agent, label).await {
            Ok(record) => {
                let pid = record.pid.unwrap_or_default();
                if let Err(e) = self.health.clear_manual_stop(agent, label).await {
                    warn!(agent, label, error = %e, "[Scheduler] could not clear manual stop");
                }
                inner.state.last_run.insert(rule.id.clone(), epoch(now));
                if let Err(e) = self.save_state(&inner.state) {
                    warn!(error = %e, "[Scheduler] could not persist trigger state");
                }
                info!(agent, label, rule_id = %rule.id, pid, "[Scheduler] trigger fired");
                self.ctx
                    .automation
                    .record(agent, label, &format!("trigger '{}' started pid {}", name, pid));
                FireOutcome::Started(record)
            }
            Err(reason) => {
                warn!(agent, label, rule_id = %rule.id, reason = %reason, "[Scheduler] trigger failed");
                self.ctx
                    .automation
                    .record(agent, label, &format!("trigger '{}' failed: {}", name, reason));
                FireOutcome::Failed(reason)
            }
        }
    }

    async fn launch(&self, agent: &str, label: &str) -> Result<crate::process::ProcessRecord, String> {
        let profile = self
            .ctx
            .profiles
            .find(agent, label)
            .ok_or_else(|| format!("profile '{}' not found", label))?;
        let working_dir = self
            .ctx
            .agents
            .resolve(agent)
            .map_err(|_| format!("agent directory for '{}' not found", agent))?;

        let controller = Arc::clone(self.ctx.controller());
        let agent_owned = agent.to_string();
        let record = tokio::task::spawn_blocking(move || {
            controller.start(&agent_owned, &profile, &working_dir)
        })
        .await
        .map_err(|e| format!("launch task failed: {}", e))?;

        if !record.is_started() {
            return Err(format!("launch failed, see {}", record.log_path.display()));
        }
        self.ctx.registry.add(record.clone()).map_err(|e| e.to_string())?;
        Ok(record)
    }

    /// Fire a rule immediately ("run now"), regardless of its schedule
    pub async fn trigger_now(&self, agent: &str, rule_id: &str) -> Result<FireOutcome, AppError> {
        let mut inner = self.inner.lock().await;
        self.reload_rules_if_stale(&mut inner);
        let rule = inner
            .rules
            .get(agent)
            .and_then(|rules| rules.iter().find(|r| r.id == rule_id))
            .cloned()
            .ok_or_else(|| AppError::rule_not_found(rule_id))?;
        Ok(self.fire_rule_locked(&mut inner, agent, &rule, Local::now()).await)
    }

    pub fn automation_log_tail(&self, max_lines: usize) -> String {
        self.ctx.automation.tail(max_lines)
    }

    // ========================
    // Webhooks
    // ========================

    /// Fire every enabled webhook/github_push rule bound to `path`
    ///
    /// 404 when no rule is bound to the path, 401 when every bound rule
    /// rejected the credentials, 200 otherwise.
    pub async fn handle_webhook(&self, path: &str, headers: &HeaderMap, body: &[u8]) -> WebhookReply {
        let mut inner = self.inner.lock().await;
        self.reload_rules_if_stale(&mut inner);

        let path = normalize_webhook_path(path);
        let bound: Vec<(String, TriggerRule)> = inner
            .rules
            .iter()
            .flat_map(|(agent, rules)| rules.iter().map(move |r| (agent.clone(), r.clone())))
            .filter(|(_, rule)| rule.enabled)
            .filter(|(_, rule)| {
                rule.webhook_path()
                    .map(|p| normalize_webhook_path(p) == path)
                    .unwrap_or(false)
            })
            .collect();

        if bound.is_empty() {
            return WebhookReply::new(StatusCode::NOT_FOUND, "no trigger bound to this path");
        }

        let mut fired = 0usize;
        let mut rejected = 0usize;
        for (agent, rule) in &bound {
            match authorize(&rule.kind, headers, body) {
                Delivery::Accept => {
                    self.fire_rule_locked(&mut inner, agent, rule, Local::now()).await;
                    fired += 1;
                }
                Delivery::Ignore => {}
                Delivery::Reject => {
                    warn!(agent = %agent, rule_id = %rule.id, path = %path, "[Webhook] authentication failed");
                    rejected += 1;
                }
            }
        }

        if fired == 0 && rejected > 0 {
            WebhookReply::new(StatusCode::UNAUTHORIZED, "unauthorized")
        } else if fired == 0 {
            WebhookReply::new(StatusCode::OK, "ignored")
        } else {
            WebhookReply::new(StatusCode::OK, format!("triggered {}", fired))
        }
    }
}

enum Delivery {
    Accept,
    Ignore,
    Reject,
}

fn authorize(kind: &TriggerKind, headers: &HeaderMap, body: &[u8]) -> Delivery {
    match kind {
        TriggerKind::Event(EventRule::GithubPush { secret, .. }) => {
            let event = headers
                .get(GITHUB_EVENT_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if event != "push" {
                return Delivery::Ignore;
            }
            match secret.as_deref().filter(|s| !s.is_empty()) {
                Some(secret) if !auth::verify_github_signature(headers, body, secret) => Delivery::Reject,
                _ => Delivery::Accept,
            }
        }
        TriggerKind::Event(EventRule::Webhook { secret, secret_header, .. }) => {
            match secret.as_deref().filter(|s| !s.is_empty()) {
                Some(secret) if !auth::verify_token(headers, secret_header.as_deref(), secret) => {
                    Delivery::Reject
                }
                _ => Delivery::Accept,
            }
        }
        _ => Delivery::Ignore,
    }
}

// ========================
// Schedule evaluation
// ========================

/// Whether a schedule rule fires at `now`, and whether state changed
fn schedule_due(
    state: &mut TriggerState,
    rule_id: &str,
    schedule: &ScheduleRule,
    now: DateTime<Local>,
) -> (bool, bool) {
    let last_run = state.last_run.get(rule_id).and_then(|ts| from_epoch(*ts));
    match schedule {
        ScheduleRule::Hourly { minute } => {
            let already = last_run
                .map(|last| last.date_naive() == now.date_naive() && last.hour() == now.hour())
                .unwrap_or(false);
            (now.minute() == *minute && !already, false)
        }
        ScheduleRule::Daily { hour, minute } => {
            let already = last_run
                .map(|last| last.date_naive() == now.date_naive())
                .unwrap_or(false);
            (now.hour() == *hour && now.minute() == *minute && !already, false)
        }
        ScheduleRule::Cron { expression } => {
            let schedule = match CronSchedule::parse(expression) {
                Ok(schedule) => schedule,
                Err(e) => {
                    debug!(rule_id, error = %e, "[Scheduler] invalid cron expression");
                    return (false, false);
                }
            };
            if !schedule.matches(&now) {
                return (false, false);
            }
            let key = now.format("%Y-%m-%d %H:%M").to_string();
            if state.cron_last_minute.get(rule_id) == Some(&key) {
                return (false, false);
            }
            state.cron_last_minute.insert(rule_id.to_string(), key);
            (true, true)
        }
    }
}

async fn scan(watch: &FileWatch) -> Vec<files::ScannedFile> {
    let watch = watch.clone();
    tokio::task::spawn_blocking(move || {
        files::scan(std::path::Path::new(&watch.path), &watch.pattern, watch.recursive)
    })
    .await
    .unwrap_or_default()
}

fn epoch(time: DateTime<Local>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

fn from_epoch(seconds: f64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt((seconds * 1000.0).round() as i64).single()
}
