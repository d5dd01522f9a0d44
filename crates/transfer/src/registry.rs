//! Single-writer registry of live write handles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::TransferError;
use crate::writer::ResumableWriter;

/// Maps absolute destination paths to the one live handle writing them.
///
/// Owned by the application context and shared as `Arc<HandleRegistry>`.
/// Every operation is a single critical section, so concurrent callers can
/// never both claim the same path.
pub struct HandleRegistry<H = ResumableWriter> {
    entries: Mutex<HashMap<PathBuf, Slot<H>>>,
}

enum Slot<H> {
    /// A handle is being constructed for this path.
    Reserved,
    Open(Arc<H>),
}

impl<H> Default for HandleRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<H> HandleRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, Slot<H>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `handle` for `path`.
    ///
    /// Fails with [`TransferError::HandleAlreadyOpen`] if the path is already
    /// open or reserved.
    pub fn register(&self, path: &Path, handle: Arc<H>) -> Result<(), TransferError> {
        let mut entries = self.entries();
        if entries.contains_key(path) {
            return Err(TransferError::HandleAlreadyOpen(path.to_path_buf()));
        }
        entries.insert(path.to_path_buf(), Slot::Open(handle));
        Ok(())
    }

    /// Reserves `path` while a handle for it is being built.
    ///
    /// The reservation is dropped automatically unless the returned
    /// [`Claim`] is committed.
    pub fn claim(self: &Arc<Self>, path: PathBuf) -> Result<Claim<H>, TransferError> {
        let mut entries = self.entries();
        if entries.contains_key(&path) {
            return Err(TransferError::HandleAlreadyOpen(path));
        }
        entries.insert(path.clone(), Slot::Reserved);
        Ok(Claim {
            registry: Arc::clone(self),
            path,
            committed: false,
        })
    }

    /// Removes whatever entry exists for `path`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, path: &Path) -> bool {
        self.entries().remove(path).is_some()
    }

    /// Removes the entry for `path` only if it is `handle`.
    pub(crate) fn release(&self, path: &Path, handle: &H) -> bool {
        let mut entries = self.entries();
        let owned = matches!(
            entries.get(path),
            Some(Slot::Open(h)) if std::ptr::eq(Arc::as_ptr(h), handle)
        );
        if owned {
            entries.remove(path);
        }
        owned
    }

    /// Returns the live handle for `path`, if any.
    pub fn lookup(&self, path: &Path) -> Option<Arc<H>> {
        match self.entries().get(path) {
            Some(Slot::Open(h)) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    /// Number of open or reserved paths.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Paths with a live handle, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open(_)))
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        paths
    }
}

/// Reservation of a registry path, held while a handle is constructed.
pub struct Claim<H = ResumableWriter> {
    registry: Arc<HandleRegistry<H>>,
    path: PathBuf,
    committed: bool,
}

impl<H> Claim<H> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Turns the reservation into a live entry for `handle`.
    pub fn commit(mut self, handle: Arc<H>) {
        self.registry
            .entries()
            .insert(self.path.clone(), Slot::Open(handle));
        self.committed = true;
    }
}

impl<H> Drop for Claim<H> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut entries = self.registry.entries();
        if matches!(entries.get(&self.path), Some(Slot::Reserved)) {
            entries.remove(&self.path);
        }
    }
}
