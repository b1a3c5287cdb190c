use std::path::PathBuf;
use thiserror::Error;

pub mod handle;
pub mod merge;
pub mod paths;
pub mod sync;
pub mod transcript;
pub mod tslog;

pub use handle::WatcherHandle;
pub use merge::MergeOutcome;
pub use paths::ProjectPaths;
pub use transcript::{Role, Turn};
pub use tslog::LogEntry;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcript has no resolvable parent directory: {0}")]
    Layout(PathBuf),
}

pub type Result<T> = std::result::Result<T, SyncError>;
