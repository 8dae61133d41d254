use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EditorError, Result};
use crate::guard::DEFAULT_LOCK_TIMEOUT;

// Constants
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60); // 24 hours
const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Runtime settings shared by the editor shells.
#[derive(Clone, Debug)]
pub struct EditorConfig {
    /// Directory uploaded tables and download snapshots are stored in.
    pub upload_dir: PathBuf,
    /// Longest wait for a backing file's lock before giving up.
    pub lock_timeout: Duration,
    /// Files in `upload_dir` older than this are swept before uploads.
    pub retention: Duration,
    /// Socket address the web shell listens on.
    pub bind_addr: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retention: DEFAULT_RETENTION,
            bind_addr: DEFAULT_BIND.to_string(),
        }
    }
}

impl EditorConfig {
    /// Defaults overridden by `EDITOR_UPLOAD_DIR`, `EDITOR_LOCK_TIMEOUT_SECS`,
    /// `EDITOR_RETENTION_HOURS` and `EDITOR_BIND`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`EditorConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Returns
    /// * `Ok(EditorConfig)` - Defaults with every variable found applied
    /// * `Err(EditorError::Config)` - A value is not a number or is too large
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use vocab_editor::EditorConfig;
    ///
    /// let config = EditorConfig::from_lookup(|key| {
    ///     (key == "EDITOR_LOCK_TIMEOUT_SECS").then(|| "5".to_string())
    /// })
    /// .unwrap();
    /// assert_eq!(config.lock_timeout, Duration::from_secs(5));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup("EDITOR_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("EDITOR_LOCK_TIMEOUT_SECS") {
            config.lock_timeout = Duration::from_secs(parse_number("EDITOR_LOCK_TIMEOUT_SECS", &secs)?);
        }
        if let Some(hours) = lookup("EDITOR_RETENTION_HOURS") {
            let secs = parse_number("EDITOR_RETENTION_HOURS", &hours)?
                .checked_mul(60 * 60)
                .ok_or_else(|| {
                    EditorError::Config(format!("EDITOR_RETENTION_HOURS is too large: '{}'", hours))
                })?;
            config.retention = Duration::from_secs(secs);
        }
        if let Some(bind) = lookup("EDITOR_BIND") {
            config.bind_addr = bind;
        }
        Ok(config)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| EditorError::Config(format!("{} must be a whole number, got '{}'", key, value)))
}
