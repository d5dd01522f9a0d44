//! File management inside a user's upload space.
//!
//! Every path handed to [`UserFileManager`] is interpreted relative to its
//! root directory, and operations that would reach outside of it are
//! refused. Listings are returned as [`TreeNode`] trees.

mod manager;
mod tree;

use std::path::PathBuf;

pub use manager::{Action, OpResult, Target, UploadStatus, UserFileManager};
pub use tree::{NodeKind, TreeNode, format_size};

/// Errors produced by file operations.
#[derive(Debug, thiserror::Error)]
pub enum FileOpsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path escapes the user directory: {0}")]
    OutsideRoot(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path exists: {0}")]
    AlreadyExists(String),

    #[error("refusing to modify the user directory itself")]
    RootProtected,

    #[error("cannot make {0} path")]
    UnsupportedKind(String),

    #[error("missing destination for {0}")]
    MissingDestination(String),

    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Transfer(#[from] exfs_transfer::TransferError),
}

impl FileOpsError {
    pub(crate) fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into().display().to_string())
    }
}
