use std::path::Path;

use super::types::{ProcessRecord, RunProfile};

/// Platform capability for starting, stopping and probing OS processes
///
/// Implementations are synchronous; async callers wrap `stop` in
/// `spawn_blocking` because it may wait up to the stop escalation window.
pub trait ProcessController: Send + Sync {
    /// Start `profile` for `agent` inside `working_dir`.
    ///
    /// Never fails: a launch failure yields a record with `pid: None` and the
    /// reason written to the record's log file.
    fn start(&self, agent: &str, profile: &RunProfile, working_dir: &Path) -> ProcessRecord;

    /// Terminate gracefully, escalating to a forceful kill. "No such process"
    /// counts as success.
    fn stop(&self, pid: u32, process_group_id: Option<i32>);

    /// Whether the process group (when known) or the pid is still alive
    fn is_alive(&self, pid: u32, process_group_id: Option<i32>) -> bool;
}
