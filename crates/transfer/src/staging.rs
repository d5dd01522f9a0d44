//! On-disk staging files of an upload and breakpoint recovery.
//!
//! For a destination `D` the layout is:
//!
//! ```text
//! D        final file, present only after completion
//! D.temp   raw bytes received so far (append-only)
//! D.meta   JSON descriptor snapshot, written once at transfer start
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use exfs_protocol::constants::{TEMP_DATA_SUFFIX, TEMP_META_SUFFIX};
use exfs_protocol::{FileMeta, MetaExtra};
use tracing::{info, warn};

use crate::TransferError;
use crate::breakpoint::compute_breakpoint;
use crate::meta_store::{load_descriptor, save_descriptor};

/// Absolute paths of a destination and its staging files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub destination: PathBuf,
    pub temp_data: PathBuf,
    pub temp_meta: PathBuf,
}

impl StagingPaths {
    pub fn for_destination(destination: &Path) -> Self {
        Self {
            destination: destination.to_path_buf(),
            temp_data: with_suffix(destination, TEMP_DATA_SUFFIX),
            temp_meta: with_suffix(destination, TEMP_META_SUFFIX),
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Removes `path` if present. Returns `true` if a file was deleted.
async fn remove_if_exists(path: &Path) -> Result<bool, TransferError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Brings the staging files into a resumable state for `meta` and returns
/// the index of the next chunk to write.
///
/// On return `D.temp` holds exactly `index * chunk_size` bytes (or does not
/// exist yet) and `D.meta` holds the descriptor. `meta.extra` is filled in
/// with the derived paths.
pub(crate) async fn prepare(
    paths: &StagingPaths,
    meta: &mut FileMeta,
) -> Result<u32, TransferError> {
    if tokio::fs::try_exists(&paths.destination).await? {
        return Err(TransferError::DestinationAlreadyExists(
            paths.destination.clone(),
        ));
    }

    if meta.overwrite {
        let data = remove_if_exists(&paths.temp_data).await?;
        let snapshot = remove_if_exists(&paths.temp_meta).await?;
        if data || snapshot {
            info!(path = %paths.destination.display(), "overwrite requested, discarded partial upload");
        }
    }

    let has_data = tokio::fs::try_exists(&paths.temp_data).await?;
    let has_meta = tokio::fs::try_exists(&paths.temp_meta).await?;

    if has_data && has_meta {
        return resume(paths, meta).await;
    }

    if has_data || has_meta {
        let orphan = if has_data {
            &paths.temp_data
        } else {
            &paths.temp_meta
        };
        warn!(path = %orphan.display(), "removing orphaned staging file");
        remove_if_exists(orphan).await?;
    }

    if let Some(parent) = paths.temp_data.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    meta.extra = MetaExtra::derived(&paths.destination, &paths.temp_data, &paths.temp_meta);
    save_descriptor(meta, &paths.temp_meta).await?;
    Ok(0)
}

async fn resume(paths: &StagingPaths, meta: &mut FileMeta) -> Result<u32, TransferError> {
    let stored = load_descriptor(&paths.temp_meta).await?;
    if !stored.same_transfer(meta) {
        return Err(TransferError::TransferIdentityConflict {
            path: paths.destination.clone(),
            existing: stored.id,
            requested: meta.id.clone(),
        });
    }

    let next_index = compute_breakpoint(meta, &paths.temp_data).await?;
    let keep = u64::from(next_index) * meta.chunk_size;
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&paths.temp_data)
        .await?;
    let size = file.metadata().await?.len();
    if size > keep {
        file.set_len(keep).await?;
        file.sync_all().await?;
    }

    meta.extra = stored.extra;
    info!(
        path = %paths.destination.display(),
        transfer_id = %meta.id,
        next_index,
        dropped_bytes = size.saturating_sub(keep),
        "resuming partial upload"
    );
    Ok(next_index)
}

/// Moves the completed data into place and removes the descriptor snapshot.
///
/// A missing `D.temp` is tolerated; the snapshot is removed regardless.
pub(crate) async fn finalize(paths: &StagingPaths) -> Result<(), TransferError> {
    match tokio::fs::rename(&paths.temp_data, &paths.destination).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %paths.temp_data.display(), "temp data vanished before finalize");
        }
        Err(e) => return Err(e.into()),
    }
    remove_if_exists(&paths.temp_meta).await?;
    Ok(())
}
