//! Whole-file MD5 digests of completed uploads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::TransferError;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Streams the file at `path` through MD5 and returns the hex digest.
pub async fn file_md5(path: &Path) -> Result<String, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checks that the file has the size the descriptor declared, then digests it.
pub async fn verify_file_md5(path: &Path, expected_size: u64) -> Result<String, TransferError> {
    let actual = tokio::fs::metadata(path).await?.len();
    if actual != expected_size {
        return Err(TransferError::SizeMismatch {
            expected: expected_size,
            actual,
        });
    }
    file_md5(path).await
}

/// Memoizes file digests until the file's modification time changes.
#[derive(Default)]
pub struct Md5Cache {
    entries: Mutex<HashMap<PathBuf, (SystemTime, String)>>,
}

impl Md5Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the digest of `path`, recomputing it only if the file changed.
    pub async fn digest(&self, path: &Path) -> Result<String, TransferError> {
        let modified = tokio::fs::metadata(path).await?.modified()?;
        if let Some(hit) = self.cached(path, modified) {
            return Ok(hit);
        }

        let digest = file_md5(path).await?;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), (modified, digest.clone()));
        Ok(digest)
    }

    fn cached(&self, path: &Path, modified: SystemTime) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(path) {
            Some((at, digest)) if *at == modified => Some(digest.clone()),
            _ => None,
        }
    }

    /// Forgets the digest of `path`.
    pub fn invalidate(&self, path: &Path) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
