//! Wire types for exfs resumable uploads.
//!
//! Holds the transfer descriptor ([`FileMeta`]) persisted next to every
//! partial upload, and the chunk frame codec used to carry file data:
//!
//! ```text
//! [UTF-8 JSON header][0x00][raw payload bytes]
//! ```

pub mod chunk;
pub mod constants;
pub mod types;

mod error;
mod validation;

pub use chunk::{Chunk, ChunkHeader, checksum_bytes, decode_frame, encode_frame};
pub use error::ProtocolError;
pub use types::{ChunkResult, FileMeta, MetaExtra};
pub use validation::validate_upload_path;
