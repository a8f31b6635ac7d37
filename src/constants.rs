use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// How often the trigger scheduler evaluates schedule and file rules
pub const TRIGGER_INTERVAL: Duration = Duration::from_secs(10);

/// How often the health monitor probes running profiles
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(15);

/// Timeout for a single health probe (TCP reachability or probe command)
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Graceful stop: poll liveness this many times before escalating to SIGKILL
pub const STOP_POLL_ATTEMPTS: u32 = 25;

/// Delay between liveness polls while waiting for a graceful stop
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Connect timeout used by the quick "is something listening" check
pub const PORT_CHECK_TIMEOUT: Duration = Duration::from_millis(200);

/// Default bind address of the embedded webhook receiver
pub const DEFAULT_WEBHOOK_HOST: &str = "127.0.0.1";

/// Default port of the embedded webhook receiver
pub const DEFAULT_WEBHOOK_PORT: u16 = 8765;

/// Settings files above this size are rejected (1MB)
pub const MAX_SETTINGS_BYTES: u64 = 1_048_576;

/// Prefix written in front of every marker line appended to process logs
pub const LOG_MARKER: &str = "[agent-manager]";

/// Separator used in health store keys: "<agent>::<label>"
pub const HEALTH_KEY_SEPARATOR: &str = "::";

/// Failure descriptions recorded in health state
pub const PROBE_FAILURE_HTTP: &str = "HTTP probe failed";
pub const PROBE_FAILURE_COMMAND: &str = "Probe command failed";

/// Directories never treated as agents or scanned for files
pub const SKIPPED_DIRS: &[&str] = &[".venv", "__pycache__", ".git", ".mypy_cache", ".pytest_cache"];

// =============================================================================
// Webhook headers
// =============================================================================

pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const DEFAULT_SECRET_HEADER: &str = "x-webhook-token";

/// Matches a 5-field cron expression's overall shape before per-field parsing
/// Examples: "0 9 * * 1-5", "*/15 * * * *", "0,30 8-18 * * *"
pub static RE_CRON_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[\d*,/\-]+(\s+[\d*,/\-]+){4}\s*$")
        .expect("Invalid regex pattern for cron shape")
});
