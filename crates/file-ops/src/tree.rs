//! Directory trees rendered relative to a root.

use std::path::Path;

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::FileOpsError;

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dir,
    File,
    Unknown,
}

impl NodeKind {
    fn of(meta: &std::fs::Metadata) -> Self {
        if meta.is_dir() {
            Self::Dir
        } else if meta.is_file() {
            Self::File
        } else {
            Self::Unknown
        }
    }
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
    /// Path relative to the listing root; empty for the root itself.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Human readable size, e.g. `1.5 KB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    /// Describes `path` without descending into it.
    pub fn info(path: &Path, root: &Path) -> Result<Self, FileOpsError> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileOpsError::not_found(path));
            }
            Err(e) => return Err(e.into()),
        };
        let kind = NodeKind::of(&meta);
        let mtime = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or_default();

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rel = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (size_bytes, size) = if kind == NodeKind::File {
            (Some(meta.len()), Some(format_size(meta.len())))
        } else {
            (None, None)
        };

        Ok(Self {
            name,
            kind,
            mtime,
            path: rel,
            size_bytes,
            size,
            children: None,
        })
    }

    /// Lists `path` down to `depth` levels below it.
    ///
    /// Children are ordered directories first, then files, then anything
    /// else, each group sorted by name. Entries whose path relative to their
    /// parent matches one of `ignores` are skipped.
    pub fn walk(
        path: &Path,
        root: &Path,
        depth: u32,
        ignores: &[Pattern],
    ) -> Result<Self, FileOpsError> {
        let mut node = Self::info(path, root)?;
        if node.kind != NodeKind::Dir || depth == 0 {
            return Ok(node);
        }

        let mut children = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if ignores.iter().any(|p| p.matches(&name)) {
                continue;
            }
            match Self::walk(&entry.path(), root, depth - 1, ignores) {
                Ok(child) => children.push(child),
                // Removed between read_dir and stat.
                Err(FileOpsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        children.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        node.children = Some(children);
        Ok(node)
    }
}

/// Formats a byte count with binary units, keeping up to two decimals.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let mut s = format!("{value:.2}");
    if s.contains('.') {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{s} {}", UNITS[unit])
}
