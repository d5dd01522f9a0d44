//! JSON persistence of transfer descriptors.

use std::path::Path;

use exfs_protocol::FileMeta;

use crate::TransferError;

/// Loads a descriptor from `path`.
///
/// Fails with [`TransferError::MetaNotFound`] if the file does not exist.
pub async fn load_descriptor(path: &Path) -> Result<FileMeta, TransferError> {
    let content = match tokio::fs::read(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransferError::MetaNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&content)?)
}

/// Writes `meta` to `path` as pretty-printed JSON.
pub async fn save_descriptor(meta: &FileMeta, path: &Path) -> Result<(), TransferError> {
    let json = serde_json::to_vec_pretty(meta)?;
    tokio::fs::write(path, json).await?;
    tracing::debug!(path = %path.display(), transfer_id = %meta.id, "descriptor saved");
    Ok(())
}
