use glob::Pattern;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::WalkDir;

use crate::constants::SKIPPED_DIRS;

/// One matching file found by a scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Modification time in epoch seconds
    pub modified: f64,
}

/// Files under `root` whose name matches the glob `pattern`
///
/// Patterns follow `glob::Pattern` (`*`, `?`, `[...]`, `[!...]`) and are
/// matched against the file name only. Non-recursive scans only look at
/// immediate children. Directories named in `SKIPPED_DIRS` (virtualenv,
/// caches, `.git`) are never entered. A missing root or an invalid pattern
/// yields an empty list.
pub fn scan(root: &Path, pattern: &str, recursive: bool) -> Vec<ScannedFile> {
    let Some(matcher) = compile_pattern(pattern) else {
        return Vec::new();
    };
    let max_depth = if recursive { usize::MAX } else { 1 };

    WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().map(|n| SKIPPED_DIRS.contains(&n)).unwrap_or(false))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().map(|n| matcher.matches(n)).unwrap_or(false))
        .map(|e| {
            let modified = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            ScannedFile {
                path: e.into_path(),
                modified,
            }
        })
        .collect()
}

fn compile_pattern(pattern: &str) -> Option<Pattern> {
    let pattern = if pattern.trim().is_empty() { "*" } else { pattern.trim() };
    match Pattern::new(pattern) {
        Ok(matcher) => Some(matcher),
        Err(e) => {
            warn!(pattern, error = %e, "[Scheduler] invalid file pattern, nothing will match");
            None
        }
    }
}
