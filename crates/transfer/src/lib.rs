//! Resumable chunked file transfers.
//!
//! A [`ResumableWriter`] owns the staging files of one upload
//! (`<dest>.temp` and `<dest>.meta`), resumes from the breakpoint left by a
//! previous run, and renames the data into place once the final chunk has
//! been written. The [`TransferEngine`] ties writers to transfer ids and
//! runs the decode, validate and write pipeline for incoming frames.

mod breakpoint;
mod checksum;
mod config;
mod engine;
mod meta_store;
mod registry;
mod staging;
mod writer;

use std::path::PathBuf;

use exfs_protocol::ProtocolError;

pub use breakpoint::{breakpoint_for_size, compute_breakpoint};
pub use checksum::{Md5Cache, file_md5, verify_file_md5};
pub use config::EngineConfig;
pub use engine::TransferEngine;
pub use meta_store::{load_descriptor, save_descriptor};
pub use registry::{Claim, HandleRegistry};
pub use staging::StagingPaths;
pub use writer::{ResumableWriter, WriterOptions};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("destination already exists: {}", .0.display())]
    DestinationAlreadyExists(PathBuf),

    #[error("transfer {existing} is already in progress for {}, refusing {requested}", path.display())]
    TransferIdentityConflict {
        path: PathBuf,
        existing: String,
        requested: String,
    },

    #[error("a write handle is already open for {}", .0.display())]
    HandleAlreadyOpen(PathBuf),

    #[error("invalid breakpoint: {0}")]
    InvalidBreakpoint(String),

    #[error("write handle is closed: {}", .0.display())]
    HandlerClosed(PathBuf),

    #[error("transfer descriptor not found: {}", .0.display())]
    MetaNotFound(PathBuf),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(String),

    #[error("chunk {got} arrived out of order (expected {expected})")]
    OutOfOrder { expected: u32, got: u32 },

    #[error("file has {actual} bytes, descriptor declares {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Broad classes of [`TransferError`], telling the caller how to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The sender misbehaved; resend a corrected chunk.
    Protocol,
    /// Another transfer owns the destination; pick a new identity, wait or overwrite.
    Conflict,
    /// Partial state cannot be resumed; restart with `overwrite`.
    Corruption,
    /// The write handle is gone; create a new one to resume.
    Resource,
    /// Underlying filesystem or serialization failure.
    Io,
}

impl TransferError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Protocol(_) | Self::OutOfOrder { .. } => ErrorClass::Protocol,
            Self::DestinationAlreadyExists(_)
            | Self::TransferIdentityConflict { .. }
            | Self::HandleAlreadyOpen(_) => ErrorClass::Conflict,
            Self::InvalidBreakpoint(_) | Self::SizeMismatch { .. } => ErrorClass::Corruption,
            Self::HandlerClosed(_) | Self::UnknownTransfer(_) => ErrorClass::Resource,
            Self::Io(_) | Self::Json(_) | Self::MetaNotFound(_) => ErrorClass::Io,
        }
    }
}
