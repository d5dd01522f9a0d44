//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use exfs_protocol::constants::{DEFAULT_IDLE_TIMEOUT, DEFAULT_WATCH_INTERVAL};
use serde::{Deserialize, Serialize};

use crate::writer::WriterOptions;

/// Settings of a [`TransferEngine`](crate::TransferEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory every destination path is resolved against.
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,

    /// Seconds without writes before a handle is closed (0 disables).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds between idle checks.
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
}

fn default_upload_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("exfs")
        .join("uploads")
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_watch_interval_secs() -> u64 {
    DEFAULT_WATCH_INTERVAL.as_secs()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload_root: default_upload_root(),
            idle_timeout_secs: default_idle_timeout_secs(),
            watch_interval_secs: default_watch_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Default settings rooted at `upload_root`.
    pub fn with_root(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            upload_root: upload_root.into(),
            ..Self::default()
        }
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            // A zero interval would make the watcher spin.
            watch_interval: Duration::from_secs(self.watch_interval_secs.max(1)),
        }
    }
}
