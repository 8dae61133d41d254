use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error type for loading, editing, locking and persisting vocabulary tables.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("missing required columns: {}", missing.join(", "))]
    Schema { missing: Vec<String> },
    #[error("could not load '{}': {reason}", path.display())]
    Load { path: PathBuf, reason: String },
    #[error("'{}' is busy (waited {:.1}s for its lock), please try again", path.display(), waited.as_secs_f64())]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("{}", range_message(.target, .count))]
    Range { target: i64, count: usize },
    #[error("no file is loaded")]
    NotLoaded,
    #[error("unsupported file type '{0}': only .csv files are accepted")]
    UnsupportedFormat(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EditorError {
    /// True for contention failures that are worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, EditorError::LockTimeout { .. })
    }

    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EditorError::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn range_message(target: &i64, count: &usize) -> String {
    if *count == 0 {
        format!("cannot go to group {}: the table has no data", target)
    } else {
        format!(
            "group {} is out of range: must be between 1 and {}",
            target, count
        )
    }
}

pub type Result<T> = std::result::Result<T, EditorError>;
