//! Process registry (`logs/agent_manager_state.json`)
//!
//! The durable answer to "what is running". Records are added by successful
//! launches and removed either by an explicit stop or by `reconcile`, which
//! drops every record whose process (group) is gone.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::controller::ProcessController;
use super::types::{ProcessRecord, ProcessTable};
use crate::error::AppError;
use crate::store;

pub struct ProcessRegistry {
    path: PathBuf,
    controller: Arc<dyn ProcessController>,
    // Serializes this registry's own read-modify-write of the file
    guard: Mutex<()>,
}

impl ProcessRegistry {
    pub fn new(path: impl Into<PathBuf>, controller: Arc<dyn ProcessController>) -> Self {
        Self {
            path: path.into(),
            controller,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn controller(&self) -> &Arc<dyn ProcessController> {
        &self.controller
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persisted table; empty when missing or malformed
    pub fn load(&self) -> ProcessTable {
        store::read_json_or_default(&self.path)
    }

    pub fn save(&self, table: &ProcessTable) -> Result<(), AppError> {
        store::write_json_atomic(&self.path, table)
    }

    /// Drop records whose process is gone, persist, and return the pruned table
    pub fn reconcile(&self, table: ProcessTable) -> ProcessTable {
        let before = table.processes.len();
        let processes: Vec<ProcessRecord> = table
            .processes
            .into_iter()
            .filter(|record| match record.pid {
                Some(pid) => self.controller.is_alive(pid, record.process_group_id),
                None => false,
            })
            .collect();
        let pruned = ProcessTable { processes };

        if pruned.processes.len() != before {
            debug!(
                removed = before - pruned.processes.len(),
                "[Registry] pruned dead process records"
            );
        }
        if let Err(e) = self.save(&pruned) {
            warn!(error = %e, "[Registry] failed to persist reconciled table");
        }
        pruned
    }

    /// Load and reconcile in one step
    pub fn refresh(&self) -> ProcessTable {
        let _guard = self.lock();
        let table = self.load();
        self.reconcile(table)
    }

    /// Append a started record; records without a pid are rejected
    pub fn add(&self, record: ProcessRecord) -> Result<(), AppError> {
        if record.pid.is_none() {
            return Err(AppError::launch_failed("Refusing to register a process without a pid")
                .with_details(format!("{}::{}", record.agent, record.label)));
        }
        let _guard = self.lock();
        let mut table = self.load();
        table.processes.push(record);
        self.save(&table)
    }

    /// Remove every record for `pid`; returns the removed records
    pub fn remove_pid(&self, pid: u32) -> Result<Vec<ProcessRecord>, AppError> {
        let _guard = self.lock();
        let table = self.load();
        let (removed, kept): (Vec<_>, Vec<_>) = table
            .processes
            .into_iter()
            .partition(|r| r.pid == Some(pid));
        self.save(&ProcessTable { processes: kept })?;
        Ok(removed)
    }

    /// First live record for (agent, label) after reconciliation
    pub fn find_running(&self, agent: &str, label: &str) -> Option<ProcessRecord> {
        self.refresh().find(agent, label).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::types::RunProfile;
    use crate::test_support::FakeController;

    fn record(agent: &str, label: &str, pid: u32) -> ProcessRecord {
        let profile = RunProfile::new(label, "python main.py");
        let mut record = ProcessRecord::pending(agent, &profile, Path::new("/agents/x"), Path::new("/logs/x.log"));
        record.pid = Some(pid);
        record.process_group_id = Some(pid as i32);
        record
    }

    fn registry() -> (tempfile::TempDir, Arc<FakeController>, ProcessRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeController::new(dir.path()));
        let registry = ProcessRegistry::new(dir.path().join("state.json"), fake.clone());
        (dir, fake, registry)
    }

    #[test]
    fn test_load_missing_or_malformed_is_empty() {
        let (dir, _fake, registry) = registry();
        assert!(registry.load().processes.is_empty());
        std::fs::write(dir.path().join("state.json"), "[[[").unwrap();
        assert!(registry.load().processes.is_empty());
    }

    #[test]
    fn test_reconcile_drops_dead_and_is_idempotent() {
        let (_dir, fake, registry) = registry();
        fake.set_alive(100);
        let table = ProcessTable {
            processes: vec![record("news", "ui", 100), record("news", "worker", 200)],
        };

        let once = registry.reconcile(table);
        assert_eq!(once.processes.len(), 1);
        assert_eq!(once.processes[0].pid, Some(100));

        let twice = registry.reconcile(once.clone());
        assert_eq!(twice, once);
        assert_eq!(registry.load(), once);
    }

    #[test]
    fn test_add_rejects_missing_pid() {
        let (_dir, _fake, registry) = registry();
        let mut failed = record("news", "ui", 1);
        failed.pid = None;
        assert!(registry.add(failed).is_err());
        assert!(registry.load().processes.is_empty());
    }

    #[test]
    fn test_remove_pid_and_find_running() {
        let (_dir, fake, registry) = registry();
        fake.set_alive(10);
        fake.set_alive(11);
        registry.add(record("news", "ui", 10)).unwrap();
        registry.add(record("news", "worker", 11)).unwrap();

        assert_eq!(registry.find_running("news", "ui").unwrap().pid, Some(10));

        let removed = registry.remove_pid(10).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(registry.find_running("news", "ui").is_none());
        assert!(registry.find_running("news", "worker").is_some());
    }

    #[test]
    fn test_round_trip() {
        let (_dir, _fake, registry) = registry();
        let table = ProcessTable {
            processes: vec![record("news", "ui", 10)],
        };
        registry.save(&table).unwrap();
        assert_eq!(registry.load(), table);
    }
}
