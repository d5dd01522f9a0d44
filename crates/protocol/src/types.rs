use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::validation::validate_upload_path;

/// Describes one logical upload: sizes, chunking and save target.
///
/// Persisted as `<dest>.meta` while the upload is in progress. Two
/// descriptors refer to the same transfer iff [`FileMeta::same_transfer`]
/// holds; `overwrite` and `extra` are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FileMetaRecord", into = "FileMetaRecord")]
pub struct FileMeta {
    pub id: String,
    /// Total size of the finished file in bytes.
    pub file_size: u64,
    pub chunked: bool,
    /// Size of every chunk except the last one.
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Save target, relative to the owner's upload root.
    pub destination_path: String,
    /// Discard any partial state and restart from chunk 0.
    pub overwrite: bool,
    pub owner_id: Option<String>,
    pub extra: MetaExtra,
}

/// Derived absolute paths stashed in the persisted descriptor for display
/// and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_meta_file: Option<String>,
}

impl MetaExtra {
    /// Builds the derived path set for a destination and its staging files.
    pub fn derived(destination: &Path, temp_data: &Path, temp_meta: &Path) -> Self {
        Self {
            name: destination
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            file: Some(destination.to_string_lossy().into_owned()),
            tmp_file: Some(temp_data.to_string_lossy().into_owned()),
            tmp_meta_file: Some(temp_meta.to_string_lossy().into_owned()),
        }
    }
}

/// On-disk JSON shape of a [`FileMeta`].
///
/// `fileId` duplicates `id`; older writers used `saveAs` and `userId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMetaRecord {
    #[serde(default)]
    id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    file_id: String,
    file_size: u64,
    #[serde(default)]
    chunked: bool,
    #[serde(default)]
    chunk_size: u64,
    total_chunks: u32,
    #[serde(alias = "saveAs")]
    destination_path: String,
    #[serde(default)]
    overwrite: bool,
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    owner_id: Option<String>,
    #[serde(default)]
    extra: MetaExtra,
}

impl From<FileMetaRecord> for FileMeta {
    fn from(r: FileMetaRecord) -> Self {
        let id = if r.id.is_empty() { r.file_id } else { r.id };
        Self {
            id,
            file_size: r.file_size,
            chunked: r.chunked,
            chunk_size: r.chunk_size,
            total_chunks: r.total_chunks,
            destination_path: r.destination_path,
            overwrite: r.overwrite,
            owner_id: r.owner_id,
            extra: r.extra,
        }
    }
}

impl From<FileMeta> for FileMetaRecord {
    fn from(m: FileMeta) -> Self {
        Self {
            file_id: m.id.clone(),
            id: m.id,
            file_size: m.file_size,
            chunked: m.chunked,
            chunk_size: m.chunk_size,
            total_chunks: m.total_chunks,
            destination_path: m.destination_path,
            overwrite: m.overwrite,
            owner_id: m.owner_id,
            extra: m.extra,
        }
    }
}

impl FileMeta {
    /// Creates a chunked descriptor, deriving `total_chunks` from the sizes.
    pub fn chunked(
        id: impl Into<String>,
        destination_path: impl Into<String>,
        file_size: u64,
        chunk_size: u64,
    ) -> Self {
        let total_chunks = if chunk_size == 0 {
            1
        } else {
            file_size.div_ceil(chunk_size).max(1) as u32
        };
        Self {
            id: id.into(),
            file_size,
            chunked: true,
            chunk_size,
            total_chunks,
            destination_path: destination_path.into(),
            overwrite: false,
            owner_id: None,
            extra: MetaExtra::default(),
        }
    }

    /// Creates a descriptor for a file sent as one single chunk.
    pub fn single(
        id: impl Into<String>,
        destination_path: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            chunked: false,
            chunk_size: file_size,
            total_chunks: 1,
            ..Self::chunked(id, destination_path, file_size, file_size)
        }
    }

    /// Returns `true` if both descriptors describe the same logical transfer.
    pub fn same_transfer(&self, other: &FileMeta) -> bool {
        self.id == other.id
            && self.file_size == other.file_size
            && self.chunked == other.chunked
            && self.chunk_size == other.chunk_size
            && self.total_chunks == other.total_chunks
            && self.destination_path == other.destination_path
            && self.owner_id == other.owner_id
    }

    /// Returns `true` if `index` is the last chunk of the transfer.
    pub fn is_final(&self, index: u32) -> bool {
        index + 1 == self.total_chunks
    }

    /// Payload length the sender must use for chunk `index`.
    ///
    /// Returns `None` for indices past the end of the transfer.
    pub fn expected_len(&self, index: u32) -> Option<u64> {
        if index >= self.total_chunks {
            return None;
        }
        if !self.is_final(index) {
            return Some(self.chunk_size);
        }
        let preceding = self.chunk_size * u64::from(self.total_chunks - 1);
        Some(self.file_size.saturating_sub(preceding))
    }

    /// Checks the descriptor for internal consistency.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::InvalidDescriptor("id is required".into()));
        }
        if self.total_chunks == 0 {
            return Err(ProtocolError::InvalidDescriptor(
                "totalChunks must be at least 1".into(),
            ));
        }

        if self.chunked {
            if self.chunk_size == 0 {
                return Err(ProtocolError::InvalidDescriptor(
                    "chunkSize must be positive for chunked transfers".into(),
                ));
            }
            let expected = self.file_size.div_ceil(self.chunk_size).max(1);
            if u64::from(self.total_chunks) != expected {
                return Err(ProtocolError::InvalidDescriptor(format!(
                    "totalChunks {} does not match fileSize {} / chunkSize {} (expected {expected})",
                    self.total_chunks, self.file_size, self.chunk_size
                )));
            }
        } else if self.total_chunks != 1 {
            return Err(ProtocolError::InvalidDescriptor(format!(
                "unchunked transfer must have exactly 1 chunk, got {}",
                self.total_chunks
            )));
        }

        validate_upload_path(&self.destination_path)
    }
}

/// Acknowledgement returned to the sender after each accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    /// Index the sender should send next.
    pub next_index: u32,
    /// Payload length expected for `next_index` (absent once complete).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    pub completed: bool,
}

impl ChunkResult {
    /// Builds the acknowledgement for a transfer positioned at `next_index`.
    pub fn at(meta: &FileMeta, next_index: u32) -> Self {
        Self {
            next_index,
            chunk_size: meta.expected_len(next_index),
            completed: next_index >= meta.total_chunks,
        }
    }
}
