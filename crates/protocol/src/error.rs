//! Error types for descriptor and frame handling.

/// Errors caused by a misbehaving sender or an invalid descriptor.
///
/// None of these close the transfer: the sender may resend a corrected
/// chunk at the same index.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("chunk frame has no header delimiter")]
    MissingDelimiter,

    #[error("malformed chunk header: {0}")]
    MalformedFrame(String),

    #[error("chunk index {index} is out of range (total chunks: {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("chunk {index} has {actual} bytes, expected {expected}")]
    ChunkSizeMismatch {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("chunk {index} checksum mismatch")]
    ChecksumMismatch { index: u32 },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
