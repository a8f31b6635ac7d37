//! Flat JSON-file persistence shared by every store
//!
//! Reads never fail: a missing or malformed file yields the type's default.
//! Writes go to a temporary file in the same directory and are renamed over
//! the target, so a failed write leaves the previous valid file in place.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::warn;

use crate::error::AppError;

/// Read `path` as JSON, falling back to `T::default()` when missing or malformed
pub fn read_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    read_json(path).unwrap_or_default()
}

/// Read `path` as JSON, returning `None` when missing or malformed
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "store unreadable, using default");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "store malformed, using default");
            None
        }
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| AppError::file_write(parent.display().to_string()).with_details(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| AppError::file_write(path.display().to_string()).with_details(e.to_string()))?;
    tmp.write_all(json.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| AppError::file_write(path.display().to_string()).with_details(e.to_string()))?;
    tmp.persist(path)
        .map_err(|e| AppError::file_write(path.display().to_string()).with_details(e.error.to_string()))?;
    Ok(())
}
