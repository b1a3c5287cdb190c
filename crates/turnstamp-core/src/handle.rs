use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Transient record identifying a running watcher process and the
/// transcript it bound to. Written once by the watcher after binding,
/// read and deleted by the supervisor on stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherHandle {
    pub pid: u32,
    pub target: PathBuf,
}

pub fn write_handle(path: &Path, handle: &WatcherHandle) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(handle).unwrap_or_default();
    fs::write(path, json)?;
    Ok(())
}

/// Absent, empty, or malformed handle files all read as `None`:
/// a half-written record means there is nothing safe to signal.
pub fn read_handle(path: &Path) -> Option<WatcherHandle> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("handle_read_error: {err}");
            return None;
        }
    };
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&text) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!("handle_malformed: {err}");
            None
        }
    }
}

/// Idempotent; removing an already-removed handle is not an error.
pub fn remove_handle(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("handle_remove_error: {err}");
        }
    }
}
