//! Transfer engine: the application-level owner of all write handles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use exfs_protocol::{Chunk, ChunkResult, FileMeta, validate_upload_path};
use tracing::{debug, info};

use crate::TransferError;
use crate::config::EngineConfig;
use crate::registry::HandleRegistry;
use crate::writer::{ResumableWriter, WriterOptions};

/// Routes chunks of concurrent uploads to their write handles.
///
/// Owns the [`HandleRegistry`] and an index of live handles by transfer id.
/// Handles of different transfers run independently; chunks of one
/// transfer must be fed sequentially.
pub struct TransferEngine {
    upload_root: PathBuf,
    options: WriterOptions,
    registry: Arc<HandleRegistry>,
    sessions: Mutex<HashMap<String, Arc<ResumableWriter>>>,
}

impl TransferEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            options: config.writer_options(),
            upload_root: config.upload_root,
            registry: Arc::new(HandleRegistry::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the handle lifetime settings derived from the config.
    pub fn with_writer_options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<ResumableWriter>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Absolute location of the finished file: `<root>/[<owner>/]<destination>`.
    pub fn destination_of(&self, meta: &FileMeta) -> Result<PathBuf, TransferError> {
        validate_upload_path(&meta.destination_path)?;
        let mut path = self.upload_root.clone();
        if let Some(owner) = meta.owner_id.as_deref() {
            validate_upload_path(owner)?;
            path.push(owner);
        }
        path.push(&meta.destination_path);
        Ok(path)
    }

    /// Creates a handle for an explicit destination, bypassing the id index.
    pub async fn create_handler(
        &self,
        destination: impl AsRef<Path>,
        meta: FileMeta,
        idle_timeout: Duration,
    ) -> Result<Arc<ResumableWriter>, TransferError> {
        let options = WriterOptions {
            idle_timeout,
            ..self.options
        };
        ResumableWriter::create(&self.registry, destination, meta, options).await
    }

    /// Starts or resumes the transfer described by `meta`.
    ///
    /// Returns the index and size of the chunk the sender should send next.
    pub async fn begin(&self, meta: FileMeta) -> Result<ChunkResult, TransferError> {
        meta.validate()?;
        self.prune_closed();

        if let Some(existing) = self.live_session(&meta.id) {
            if !existing.meta().same_transfer(&meta) {
                return Err(TransferError::TransferIdentityConflict {
                    path: existing.destination().to_path_buf(),
                    existing: existing.meta().id.clone(),
                    requested: meta.id,
                });
            }
            return Ok(ChunkResult::at(existing.meta(), existing.next_index()));
        }

        let destination = self.destination_of(&meta)?;
        let id = meta.id.clone();
        let writer = ResumableWriter::create(&self.registry, &destination, meta, self.options).await?;
        let result = ChunkResult::at(writer.meta(), writer.next_index());
        self.sessions().insert(id.clone(), writer);

        info!(transfer_id = %id, next_index = result.next_index, "transfer started");
        Ok(result)
    }

    /// Decodes a wire frame and applies the chunk it carries.
    pub async fn accept_frame(&self, frame: &[u8]) -> Result<ChunkResult, TransferError> {
        let chunk = Chunk::from_frame(frame)?;
        self.accept_chunk(chunk).await
    }

    /// Validates `chunk` against its transfer and appends it.
    ///
    /// A chunk below the expected index is treated as a resend and only
    /// acknowledged; one above it is rejected with
    /// [`TransferError::OutOfOrder`].
    pub async fn accept_chunk(&self, chunk: Chunk) -> Result<ChunkResult, TransferError> {
        let writer = self
            .sessions()
            .get(&chunk.transfer_id)
            .cloned()
            .ok_or_else(|| TransferError::UnknownTransfer(chunk.transfer_id.clone()))?;

        if writer.is_closed() {
            self.forget(&chunk.transfer_id, &writer);
            return Err(TransferError::HandlerClosed(writer.destination().to_path_buf()));
        }

        chunk.validate(writer.meta())?;

        let expected = writer.next_index();
        if chunk.index < expected {
            debug!(transfer_id = %chunk.transfer_id, index = chunk.index, "duplicate chunk acknowledged");
            return Ok(ChunkResult::at(writer.meta(), expected));
        }
        if chunk.index > expected {
            return Err(TransferError::OutOfOrder {
                expected,
                got: chunk.index,
            });
        }

        let result = writer.write(&chunk.payload).await;
        if writer.is_closed() {
            self.forget(&chunk.transfer_id, &writer);
        }
        let result = result?;
        if result.completed {
            info!(transfer_id = %chunk.transfer_id, path = %writer.destination().display(), "transfer finished");
        }
        Ok(result)
    }

    /// Closes the handle of a transfer. Returns `false` if none was open.
    pub async fn close(&self, transfer_id: &str) -> bool {
        let writer = self.sessions().remove(transfer_id);
        match writer {
            Some(w) => {
                w.close().await;
                true
            }
            None => false,
        }
    }

    /// Closes every open handle.
    pub async fn shutdown(&self) {
        let writers: Vec<_> = self.sessions().drain().map(|(_, w)| w).collect();
        let count = writers.len();
        for writer in writers {
            writer.close().await;
        }
        info!(count, "transfer engine shut down");
    }

    /// Ids of transfers with an open handle, sorted.
    pub fn active_transfers(&self) -> Vec<String> {
        self.prune_closed();
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops index entries of handles that closed on their own, e.g. when idle.
    fn prune_closed(&self) {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, w| !w.is_closed());
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, "dropped closed transfers");
        }
    }

    fn live_session(&self, transfer_id: &str) -> Option<Arc<ResumableWriter>> {
        let mut sessions = self.sessions();
        let writer = sessions.get(transfer_id).cloned()?;
        if writer.is_closed() {
            sessions.remove(transfer_id);
            return None;
        }
        Some(writer)
    }

    /// Drops the index entry of `transfer_id` if it still points at `writer`.
    fn forget(&self, transfer_id: &str, writer: &Arc<ResumableWriter>) {
        let mut sessions = self.sessions();
        if sessions
            .get(transfer_id)
            .is_some_and(|w| Arc::ptr_eq(w, writer))
        {
            sessions.remove(transfer_id);
        }
    }
}
