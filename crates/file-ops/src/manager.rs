//! Operations on a user's upload directory.

use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use exfs_protocol::validate_upload_path;
use exfs_transfer::{Md5Cache, StagingPaths, compute_breakpoint, load_descriptor};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::FileOpsError;
use crate::tree::{NodeKind, TreeNode};

/// A file operation requested by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Make,
    Rename,
    Move,
    Copy,
    Delete,
}

impl FromStr for Action {
    type Err = FileOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(Self::List),
            "make" | "create" => Ok(Self::Make),
            "rename" => Ok(Self::Rename),
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            "delete" | "remove" => Ok(Self::Delete),
            other => Err(FileOpsError::UnknownAction(other.to_string())),
        }
    }
}

/// Arguments of one operation. Which fields matter depends on the action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub source: String,
    #[serde(default)]
    pub dest: Option<String>,
    /// Entry kind for `make`.
    #[serde(default, rename = "type")]
    pub kind: Option<NodeKind>,
    /// Listing depth for `list`.
    #[serde(default)]
    pub depth: Option<u32>,
    /// Glob patterns of names skipped by `list`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignores: Vec<String>,
}

impl Target {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn to(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    fn dest(&self) -> Result<&str, FileOpsError> {
        self.dest
            .as_deref()
            .ok_or_else(|| FileOpsError::MissingDestination(self.source.clone()))
    }
}

/// Outcome of one operation in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TreeNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OpResult {
    pub fn success(data: Option<TreeNode>) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn failed(message: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.to_string()),
        }
    }
}

impl From<Result<Option<TreeNode>, FileOpsError>> for OpResult {
    fn from(result: Result<Option<TreeNode>, FileOpsError>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::failed(e),
        }
    }
}

/// Progress of an upload that has not completed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadStatus {
    pub transfer_id: String,
    pub next_index: u32,
    pub total_chunks: u32,
    pub file_size: u64,
}

/// File operations confined to one root directory.
#[derive(Debug, Clone)]
pub struct UserFileManager {
    root: PathBuf,
}

impl UserFileManager {
    /// Opens (creating if needed) the directory at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FileOpsError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = std::fs::canonicalize(root)?;
        Ok(Self { root })
    }

    /// Opens the space of `owner` below `upload_root`, the same directory the
    /// transfer engine writes that owner's uploads to.
    pub fn for_owner(upload_root: impl AsRef<Path>, owner: &str) -> Result<Self, FileOpsError> {
        validate_upload_path(owner).map_err(|_| FileOpsError::OutsideRoot(owner.to_string()))?;
        Self::new(upload_root.as_ref().join(owner))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps `target` to an absolute path below the root.
    ///
    /// Leading slashes are ignored, `..` may not climb above the root, and
    /// the path must not leave the root through a symlink anywhere along it.
    pub fn resolve(&self, target: &str) -> Result<PathBuf, FileOpsError> {
        let mut path = self.root.clone();
        for component in Path::new(target).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::ParentDir => {
                    if path == self.root {
                        return Err(FileOpsError::OutsideRoot(target.to_string()));
                    }
                    path.pop();
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        self.confine(&path, target)?;
        Ok(path)
    }

    /// Checks that the nearest existing ancestor of `path` (or `path`
    /// itself) resolves inside the root. Dangling symlinks are refused.
    fn confine(&self, path: &Path, target: &str) -> Result<(), FileOpsError> {
        for ancestor in path.ancestors() {
            match std::fs::canonicalize(ancestor) {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(_) => return Err(FileOpsError::OutsideRoot(target.to_string())),
                Err(_) if std::fs::symlink_metadata(ancestor).is_ok() => {
                    return Err(FileOpsError::OutsideRoot(target.to_string()));
                }
                Err(_) => {}
            }
        }
        Err(FileOpsError::OutsideRoot(target.to_string()))
    }

    /// Describes `target` and its descendants down to `depth` levels.
    pub fn list(
        &self,
        target: &str,
        depth: u32,
        ignores: &[String],
    ) -> Result<TreeNode, FileOpsError> {
        let path = self.resolve(target)?;
        let patterns = ignores
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        TreeNode::walk(&path, &self.root, depth, &patterns)
    }

    /// Creates an empty file or a directory at `target`.
    pub fn make(&self, target: &str, kind: NodeKind) -> Result<TreeNode, FileOpsError> {
        let path = self.resolve(target)?;
        if path.exists() {
            return Err(FileOpsError::AlreadyExists(target.to_string()));
        }
        match kind {
            NodeKind::File => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::File::create_new(&path)?;
            }
            NodeKind::Dir => std::fs::create_dir_all(&path)?,
            NodeKind::Unknown => return Err(FileOpsError::UnsupportedKind("unknown".into())),
        }
        info!(path = %path.display(), ?kind, "created");
        TreeNode::info(&path, &self.root)
    }

    /// Renames `target` within its directory. Only the last component of
    /// `new_name` is used.
    pub fn rename(&self, target: &str, new_name: &str) -> Result<TreeNode, FileOpsError> {
        let old = self.existing(target)?;
        if old == self.root {
            return Err(FileOpsError::RootProtected);
        }
        let name = Path::new(new_name)
            .file_name()
            .ok_or_else(|| FileOpsError::OutsideRoot(new_name.to_string()))?;
        let parent = old.parent().unwrap_or(self.root.as_path());
        let new = parent.join(name);
        if new.exists() {
            return Err(FileOpsError::AlreadyExists(new_name.to_string()));
        }
        std::fs::rename(&old, &new)?;
        info!(from = %old.display(), to = %new.display(), "renamed");
        TreeNode::info(&new, &self.root)
    }

    /// Moves `target` to `dest`. An existing directory at `dest` receives the
    /// entry under its current name.
    pub fn move_to(&self, target: &str, dest: &str) -> Result<TreeNode, FileOpsError> {
        let old = self.existing(target)?;
        if old == self.root {
            return Err(FileOpsError::RootProtected);
        }
        let new = self.landing_path(&old, dest)?;
        if new.starts_with(&old) {
            return Err(FileOpsError::AlreadyExists(dest.to_string()));
        }

        match std::fs::rename(&old, &new) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                copy_recursive(&old, &new)?;
                remove_entry(&old)?;
            }
            Err(e) => return Err(e.into()),
        }
        info!(from = %old.display(), to = %new.display(), "moved");
        TreeNode::info(&new, &self.root)
    }

    /// Copies `target` (recursively for directories) to `dest`.
    pub fn copy(&self, target: &str, dest: &str) -> Result<TreeNode, FileOpsError> {
        let old = self.existing(target)?;
        let new = self.landing_path(&old, dest)?;
        if new.starts_with(&old) {
            return Err(FileOpsError::AlreadyExists(dest.to_string()));
        }
        copy_recursive(&old, &new)?;
        info!(from = %old.display(), to = %new.display(), "copied");
        TreeNode::info(&new, &self.root)
    }

    /// Deletes `target`. Deleting a missing path succeeds.
    pub fn delete(&self, target: &str) -> Result<(), FileOpsError> {
        let path = self.resolve(target)?;
        if path == self.root {
            return Err(FileOpsError::RootProtected);
        }
        match std::fs::symlink_metadata(&path) {
            Ok(_) => {
                remove_entry(&path)?;
                info!(path = %path.display(), "deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "delete of missing path");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs `action` on each target. Failures are reported per target.
    pub fn apply(&self, action: &str, targets: &[Target]) -> Result<Vec<OpResult>, FileOpsError> {
        let action: Action = action.parse()?;
        Ok(targets
            .iter()
            .map(|t| self.run(action, t).into())
            .collect())
    }

    fn run(&self, action: Action, target: &Target) -> Result<Option<TreeNode>, FileOpsError> {
        let src = target.source.as_str();
        match action {
            Action::List => self
                .list(src, target.depth.unwrap_or(0), &target.ignores)
                .map(Some),
            Action::Make => {
                let kind = target
                    .kind
                    .ok_or_else(|| FileOpsError::UnsupportedKind("unspecified".into()))?;
                self.make(src, kind).map(Some)
            }
            Action::Rename => self.rename(src, target.dest()?).map(Some),
            Action::Move => self.move_to(src, target.dest()?).map(Some),
            Action::Copy => self.copy(src, target.dest()?).map(Some),
            Action::Delete => self.delete(src).map(|()| None),
        }
    }

    /// Reports the resume point of an unfinished upload to `target`, or
    /// `None` if nothing is staged there.
    pub async fn upload_status(&self, target: &str) -> Result<Option<UploadStatus>, FileOpsError> {
        let paths = StagingPaths::for_destination(&self.resolve(target)?);
        if !paths.temp_meta.exists() {
            return Ok(None);
        }
        let meta = load_descriptor(&paths.temp_meta).await?;
        let next_index = compute_breakpoint(&meta, &paths.temp_data).await?;
        Ok(Some(UploadStatus {
            transfer_id: meta.id,
            next_index,
            total_chunks: meta.total_chunks,
            file_size: meta.file_size,
        }))
    }

    /// MD5 of the file at `target`, memoized in `cache`.
    pub async fn checksum(&self, target: &str, cache: &Md5Cache) -> Result<String, FileOpsError> {
        let path = self.existing(target)?;
        Ok(cache.digest(&path).await?)
    }

    fn existing(&self, target: &str) -> Result<PathBuf, FileOpsError> {
        let path = self.resolve(target)?;
        if std::fs::symlink_metadata(&path).is_err() {
            return Err(FileOpsError::NotFound(target.to_string()));
        }
        Ok(path)
    }

    fn landing_path(&self, source: &Path, dest: &str) -> Result<PathBuf, FileOpsError> {
        let mut new = self.resolve(dest)?;
        if new.is_dir() {
            if let Some(name) = source.file_name() {
                new.push(name);
                self.confine(&new, dest)?;
            }
        }
        if std::fs::symlink_metadata(&new).is_ok() {
            return Err(FileOpsError::AlreadyExists(dest.to_string()));
        }
        if let Some(parent) = new.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(new)
    }
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn copy_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    if !std::fs::symlink_metadata(from)?.is_dir() {
        std::fs::copy(from, to)?;
        return Ok(());
    }
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}
