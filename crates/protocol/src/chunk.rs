//! Chunk frame codec.
//!
//! # Wire format
//!
//! ```text
//! [N bytes: UTF-8 JSON header][1 byte: 0x00][remaining bytes: payload]
//! ```
//!
//! The header never contains a raw NUL byte (JSON escapes it as `\u0000`),
//! so the first NUL in the frame always terminates the header.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ProtocolError;
use crate::constants::FRAME_DELIMITER;
use crate::types::FileMeta;

/// JSON header preceding the payload of a chunk frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    #[serde(alias = "fileId")]
    pub transfer_id: String,
    pub index: u32,
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// SHA-256 hex digest of the payload (absent means no verification).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// A decoded chunk of file data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub transfer_id: String,
    pub index: u32,
    pub payload: Vec<u8>,
    pub sender_id: Option<String>,
    pub checksum: Option<String>,
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Splits a frame into its parsed header and the raw payload.
pub fn decode_frame(frame: &[u8]) -> Result<(ChunkHeader, &[u8]), ProtocolError> {
    let split = frame
        .iter()
        .position(|&b| b == FRAME_DELIMITER)
        .ok_or(ProtocolError::MissingDelimiter)?;

    let raw = std::str::from_utf8(&frame[..split])
        .map_err(|e| ProtocolError::MalformedFrame(format!("header is not UTF-8: {e}")))?;
    let header: ChunkHeader =
        serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

    Ok((header, &frame[split + 1..]))
}

/// Builds a frame from a header and payload.
pub fn encode_frame(header: &ChunkHeader, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let json =
        serde_json::to_vec(header).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    let mut frame = Vec::with_capacity(json.len() + 1 + payload.len());
    frame.extend_from_slice(&json);
    frame.push(FRAME_DELIMITER);
    frame.extend_from_slice(payload);
    Ok(frame)
}

impl Chunk {
    /// Creates a chunk without sender or checksum information.
    pub fn new(transfer_id: impl Into<String>, index: u32, payload: Vec<u8>) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            index,
            payload,
            sender_id: None,
            checksum: None,
        }
    }

    /// Attaches the SHA-256 digest of the current payload.
    pub fn with_checksum(mut self) -> Self {
        self.checksum = Some(checksum_bytes(&self.payload));
        self
    }

    /// Decodes a chunk from a wire frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (header, payload) = decode_frame(frame)?;
        Ok(Self {
            transfer_id: header.transfer_id,
            index: header.index,
            payload: payload.to_vec(),
            sender_id: header.sender_id,
            checksum: header.checksum,
        })
    }

    /// Encodes this chunk as a wire frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let header = ChunkHeader {
            transfer_id: self.transfer_id.clone(),
            index: self.index,
            sender_id: self.sender_id.clone(),
            checksum: self.checksum.clone(),
        };
        encode_frame(&header, &self.payload)
    }

    /// Checks this chunk against the transfer descriptor.
    ///
    /// Every chunk but the last must be exactly `chunk_size` bytes; the last
    /// one carries whatever remains.
    pub fn validate(&self, meta: &FileMeta) -> Result<(), ProtocolError> {
        if self.index >= meta.total_chunks {
            return Err(ProtocolError::IndexOutOfRange {
                index: self.index,
                total: meta.total_chunks,
            });
        }

        let actual = self.payload.len() as u64;
        if !meta.is_final(self.index) && actual != meta.chunk_size {
            return Err(ProtocolError::ChunkSizeMismatch {
                index: self.index,
                expected: meta.chunk_size,
                actual,
            });
        }

        if let Some(expected) = self.checksum.as_deref() {
            if !expected.eq_ignore_ascii_case(&checksum_bytes(&self.payload)) {
                return Err(ProtocolError::ChecksumMismatch { index: self.index });
            }
        }

        Ok(())
    }
}
