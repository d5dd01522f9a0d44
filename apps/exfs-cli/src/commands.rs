//! Subcommand implementations. Each returns the JSON document to print.

use std::path::Path;

use anyhow::Context;
use exfs_file_ops::UserFileManager;
use exfs_protocol::ChunkResult;
use exfs_transfer::{StagingPaths, compute_breakpoint, file_md5, load_descriptor, verify_file_md5};
use serde_json::{Value, json};

fn staging(dest: &Path) -> anyhow::Result<StagingPaths> {
    let dest = std::path::absolute(dest)
        .with_context(|| format!("failed to resolve {}", dest.display()))?;
    Ok(StagingPaths::for_destination(&dest))
}

pub async fn breakpoint(dest: &Path) -> anyhow::Result<Value> {
    let paths = staging(dest)?;
    if !paths.temp_meta.exists() && paths.destination.exists() {
        return Ok(json!({ "completed": true }));
    }

    let meta = load_descriptor(&paths.temp_meta).await?;
    let next_index = compute_breakpoint(&meta, &paths.temp_data).await?;
    tracing::debug!(transfer_id = %meta.id, next_index, "breakpoint computed");
    Ok(serde_json::to_value(ChunkResult::at(&meta, next_index))?)
}

pub async fn inspect(dest: &Path) -> anyhow::Result<Value> {
    let paths = staging(dest)?;
    let completed = paths.destination.exists();
    if !paths.temp_meta.exists() {
        return Ok(json!({
            "destination": paths.destination.display().to_string(),
            "completed": completed,
            "staged": false,
        }));
    }

    let meta = load_descriptor(&paths.temp_meta).await?;
    let received = match tokio::fs::metadata(&paths.temp_data).await {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    // An unusable breakpoint is reported rather than failing the command.
    let breakpoint = match compute_breakpoint(&meta, &paths.temp_data).await {
        Ok(next) => serde_json::to_value(ChunkResult::at(&meta, next))?,
        Err(e) => json!({ "error": e.to_string() }),
    };

    Ok(json!({
        "destination": paths.destination.display().to_string(),
        "completed": completed,
        "staged": true,
        "receivedBytes": received,
        "breakpoint": breakpoint,
        "meta": serde_json::to_value(&meta)?,
    }))
}

pub async fn md5(file: &Path, size: Option<u64>) -> anyhow::Result<Value> {
    let digest = match size {
        Some(expected) => verify_file_md5(file, expected).await?,
        None => file_md5(file).await?,
    };
    Ok(json!({ "file": file.display().to_string(), "md5": digest }))
}

pub fn ls(
    upload_root: &Path,
    owner: Option<&str>,
    path: &str,
    depth: u32,
    ignores: &[String],
) -> anyhow::Result<Value> {
    let manager = match owner {
        Some(owner) => UserFileManager::for_owner(upload_root, owner)?,
        None => UserFileManager::new(upload_root)?,
    };
    let tree = manager.list(path, depth, ignores)?;
    Ok(serde_json::to_value(tree)?)
}
