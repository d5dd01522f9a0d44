//! Resumable write handle for a single upload.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use exfs_protocol::constants::{DEFAULT_IDLE_TIMEOUT, DEFAULT_WATCH_INTERVAL, MIN_WATCH_INTERVAL};
use exfs_protocol::{ChunkResult, FileMeta};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::registry::HandleRegistry;
use crate::staging::{self, StagingPaths};

/// Lifetime settings of a write handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Close the handle after this long without writes (zero disables).
    pub idle_timeout: Duration,
    /// How often the idle watcher wakes up. Raised to
    /// [`MIN_WATCH_INTERVAL`] when shorter.
    pub watch_interval: Duration,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            watch_interval: DEFAULT_WATCH_INTERVAL,
        }
    }
}

impl WriterOptions {
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ..Self::default()
        }
    }
}

/// Owns the open temp-data file of one upload.
///
/// At most one writer exists per destination; it is registered in the
/// [`HandleRegistry`] from creation until [`close`](Self::close). Writes
/// are expected to arrive sequentially in chunk order.
pub struct ResumableWriter {
    paths: StagingPaths,
    meta: FileMeta,
    registry: Arc<HandleRegistry>,
    /// `None` once closed; writes and close serialize on this lock.
    file: Mutex<Option<File>>,
    next_index: AtomicU32,
    closed: AtomicBool,
    created_at: Instant,
    /// Milliseconds after `created_at` of the last write.
    last_activity_ms: AtomicU64,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ResumableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableWriter")
            .field("destination", &self.paths.destination)
            .field("transfer_id", &self.meta.id)
            .field("next_index", &self.next_index())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ResumableWriter {
    /// Creates the write handle for `destination`, resuming any partial
    /// upload of the same transfer found next to it.
    ///
    /// Fails with [`TransferError::HandleAlreadyOpen`] if another handle
    /// owns the destination.
    pub async fn create(
        registry: &Arc<HandleRegistry>,
        destination: impl AsRef<Path>,
        mut meta: FileMeta,
        options: WriterOptions,
    ) -> Result<Arc<Self>, TransferError> {
        let destination = std::path::absolute(destination.as_ref())?;
        let claim = registry.claim(destination.clone())?;

        let paths = StagingPaths::for_destination(&destination);
        let next_index = staging::prepare(&paths, &mut meta).await?;

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.temp_data)
            .await?;

        let writer = Arc::new(Self {
            paths,
            meta,
            registry: Arc::clone(registry),
            file: Mutex::new(Some(file)),
            next_index: AtomicU32::new(next_index),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            idle_timeout: options.idle_timeout,
            cancel: CancellationToken::new(),
        });
        claim.commit(Arc::clone(&writer));

        if !options.idle_timeout.is_zero() {
            writer.spawn_idle_watcher(options.watch_interval.max(MIN_WATCH_INTERVAL));
        }

        info!(
            path = %writer.paths.destination.display(),
            transfer_id = %writer.meta.id,
            next_index,
            idle_timeout_secs = options.idle_timeout.as_secs_f64(),
            "write handle created"
        );
        Ok(writer)
    }

    pub fn destination(&self) -> &Path {
        &self.paths.destination
    }

    pub fn paths(&self) -> &StagingPaths {
        &self.paths
    }

    /// Descriptor of the transfer, with derived paths filled in.
    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    /// Index of the next chunk this handle expects.
    pub fn next_index(&self) -> u32 {
        self.next_index.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Time since the last write (or since creation).
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire));
        self.created_at.elapsed().saturating_sub(last)
    }

    fn touch(&self) {
        let now = self.created_at.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Release);
    }

    /// Appends one chunk's payload and advances the chunk index.
    ///
    /// Chunk order and size must already have been checked by the caller.
    /// Writing the final chunk finalizes the upload and closes the handle.
    pub async fn write(&self, payload: &[u8]) -> Result<ChunkResult, TransferError> {
        let mut slot = self.file.lock().await;
        let Some(file) = slot.as_mut() else {
            return Err(TransferError::HandlerClosed(self.paths.destination.clone()));
        };

        if let Err(e) = append(file, payload).await {
            if let Err(rollback) = self.discard_partial(file).await {
                // Recovery of the next handle truncates the stray bytes.
                warn!(
                    path = %self.paths.destination.display(),
                    error = %rollback,
                    "could not roll back failed write, closing handle"
                );
                self.shut(&mut slot);
            }
            return Err(e.into());
        }
        self.touch();

        let next_index = self.next_index.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            path = %self.paths.destination.display(),
            index = next_index - 1,
            len = payload.len(),
            "chunk written"
        );

        if next_index >= self.meta.total_chunks {
            let result = self.complete(&mut slot).await;
            self.shut(&mut slot);
            result?;
        }

        Ok(ChunkResult::at(&self.meta, next_index))
    }

    /// Cuts the temp data back to the end of the last fully written chunk.
    async fn discard_partial(&self, file: &mut File) -> Result<(), TransferError> {
        let keep = u64::from(self.next_index()) * self.meta.chunk_size;
        file.set_len(keep).await?;
        debug!(
            path = %self.paths.destination.display(),
            keep,
            "discarded partially written chunk"
        );
        Ok(())
    }

    async fn complete(&self, slot: &mut Option<File>) -> Result<(), TransferError> {
        if let Some(file) = slot.take() {
            file.sync_all().await?;
        }
        staging::finalize(&self.paths).await?;
        info!(
            path = %self.paths.destination.display(),
            transfer_id = %self.meta.id,
            size = self.meta.file_size,
            "upload complete"
        );
        Ok(())
    }

    /// Closes the handle. Closing twice is a no-op.
    pub async fn close(&self) {
        let mut slot = self.file.lock().await;
        self.shut(&mut slot);
    }

    /// Closes the handle only if it is still idle once the write lock is held.
    async fn close_if_idle(&self) -> bool {
        let mut slot = self.file.lock().await;
        if self.is_closed() {
            return true;
        }
        if self.idle_for() <= self.idle_timeout {
            return false;
        }
        info!(
            path = %self.paths.destination.display(),
            idle_secs = self.idle_for().as_secs(),
            "write handle idle too long, closing"
        );
        self.shut(&mut slot);
        true
    }

    /// Releases the file and the registry entry. Caller holds the file lock.
    fn shut(&self, slot: &mut Option<File>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the tokio file closes it once in-flight operations finish;
        // every write has already been flushed.
        slot.take();
        self.cancel.cancel();
        if !self.registry.release(&self.paths.destination, self) {
            warn!(
                path = %self.paths.destination.display(),
                "write handle was not registered at close"
            );
        }
        info!(path = %self.paths.destination.display(), "write handle closed");
    }

    fn spawn_idle_watcher(self: &Arc<Self>, period: Duration) {
        let writer = Arc::clone(self);
        tokio::spawn(async move {
            writer.watch_idle(period).await;
        });
    }

    async fn watch_idle(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate first tick.

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_closed() {
                        break;
                    }
                    if self.idle_for() > self.idle_timeout && self.close_if_idle().await {
                        break;
                    }
                }
            }
        }
        debug!(path = %self.paths.destination.display(), "idle watcher stopped");
    }
}

async fn append(file: &mut File, payload: &[u8]) -> std::io::Result<()> {
    file.write_all(payload).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<HandleRegistry> {
        Arc::new(HandleRegistry::new())
    }

    fn no_watcher() -> WriterOptions {
        WriterOptions::with_idle_timeout(Duration::ZERO)
    }

    async fn write_all_chunks(writer: &ResumableWriter, data: &[u8], chunk: usize) {
        let start = writer.next_index() as usize * chunk;
        for piece in data[start..].chunks(chunk) {
            writer.write(piece).await.unwrap();
        }
    }

    #[tokio::test]
    async fn writes_all_chunks_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("out.bin");
        let meta = FileMeta::chunked("t-1", "out.bin", 10, 4);

        let writer = ResumableWriter::create(&reg, &dest, meta, no_watcher())
            .await
            .unwrap();
        assert_eq!(reg.len(), 1);

        let r = writer.write(b"0123").await.unwrap();
        assert_eq!(r.next_index, 1);
        assert!(!r.completed);
        writer.write(b"4567").await.unwrap();
        let last = writer.write(b"89").await.unwrap();
        assert!(last.completed);

        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        assert!(!writer.paths().temp_data.exists());
        assert!(!writer.paths().temp_meta.exists());
        assert!(writer.is_closed());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let meta = FileMeta::chunked("t-1", "a.bin", 8, 4);
        let writer = ResumableWriter::create(&reg, dir.path().join("a.bin"), meta, no_watcher())
            .await
            .unwrap();

        writer.close().await;
        writer.close().await;
        assert!(reg.is_empty());

        let err = writer.write(b"abcd").await.unwrap_err();
        assert!(matches!(err, TransferError::HandlerClosed(_)));
    }

    #[tokio::test]
    async fn second_handle_for_same_path_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("a.bin");
        let meta = FileMeta::chunked("t-1", "a.bin", 8, 4);

        let first = ResumableWriter::create(&reg, &dest, meta.clone(), no_watcher())
            .await
            .unwrap();
        let err = ResumableWriter::create(&reg, &dest, meta.clone(), no_watcher())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::HandleAlreadyOpen(_)));

        first.close().await;
        assert!(
            ResumableWriter::create(&reg, &dest, meta, no_watcher())
                .await
                .is_ok()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_admits_one_writer() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("race.bin");
        let meta = FileMeta::chunked("t-1", "race.bin", 8, 4);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                let dest = dest.clone();
                let meta = meta.clone();
                tokio::spawn(
                    async move { ResumableWriter::create(&reg, dest, meta, no_watcher()).await },
                )
            })
            .collect();

        let mut opened = Vec::new();
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(w) => opened.push(w),
                Err(TransferError::HandleAlreadyOpen(_)) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(opened.len(), 1);
        assert_eq!(refused, 7);
    }

    #[tokio::test]
    async fn resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("movie.mkv");
        let data = b"abcdefghijkl";
        let meta = FileMeta::chunked("m-1", "movie.mkv", 12, 4);

        let first = ResumableWriter::create(&reg, &dest, meta.clone(), no_watcher())
            .await
            .unwrap();
        first.write(b"abcd").await.unwrap();
        first.write(b"efgh").await.unwrap();
        first.close().await;

        let second = ResumableWriter::create(&reg, &dest, meta, no_watcher())
            .await
            .unwrap();
        assert_eq!(second.next_index(), 2);
        write_all_chunks(&second, data, 4).await;

        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn resume_rewrites_partial_final_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("x.bin");
        let meta = FileMeta::chunked("x", "x.bin", 10, 4);

        let first = ResumableWriter::create(&reg, &dest, meta.clone(), no_watcher())
            .await
            .unwrap();
        first.write(b"0123").await.unwrap();
        first.write(b"4567").await.unwrap();
        first.close().await;
        // Simulate a crash halfway through the final chunk.
        let mut bytes = std::fs::read(&first.paths().temp_data).unwrap();
        bytes.push(b'8');
        std::fs::write(&first.paths().temp_data, bytes).unwrap();

        let second = ResumableWriter::create(&reg, &dest, meta, no_watcher())
            .await
            .unwrap();
        assert_eq!(second.next_index(), 2);
        second.write(b"89").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn invalid_breakpoint_releases_claim() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("y.bin");
        let meta = FileMeta::chunked("y", "y.bin", 16, 4);

        let first = ResumableWriter::create(&reg, &dest, meta.clone(), no_watcher())
            .await
            .unwrap();
        first.close().await;
        std::fs::write(&first.paths().temp_data, [0u8; 9]).unwrap();

        let err = ResumableWriter::create(&reg, &dest, meta.clone(), no_watcher())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidBreakpoint(_)));
        assert!(reg.is_empty());

        let restarted = FileMeta {
            overwrite: true,
            ..meta
        };
        let writer = ResumableWriter::create(&reg, &dest, restarted, no_watcher())
            .await
            .unwrap();
        assert_eq!(writer.next_index(), 0);
    }

    #[tokio::test]
    async fn different_transfer_at_same_path_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("z.bin");

        let first = ResumableWriter::create(
            &reg,
            &dest,
            FileMeta::chunked("old", "z.bin", 8, 4),
            no_watcher(),
        )
        .await
        .unwrap();
        first.write(b"abcd").await.unwrap();
        first.close().await;

        let err = ResumableWriter::create(
            &reg,
            &dest,
            FileMeta::chunked("new", "z.bin", 8, 4),
            no_watcher(),
        )
        .await
        .unwrap_err();
        match err {
            TransferError::TransferIdentityConflict {
                existing,
                requested,
                ..
            } => {
                assert_eq!(existing, "old");
                assert_eq!(requested, "new");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn overwrite_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("w.bin");
        let meta = FileMeta::chunked("w", "w.bin", 12, 4);

        let first = ResumableWriter::create(&reg, &dest, meta.clone(), no_watcher())
            .await
            .unwrap();
        first.write(b"AAAA").await.unwrap();
        first.write(b"BBBB").await.unwrap();
        first.close().await;

        let fresh = FileMeta {
            id: "w-2".into(),
            overwrite: true,
            ..meta
        };
        let second = ResumableWriter::create(&reg, &dest, fresh, no_watcher())
            .await
            .unwrap();
        assert_eq!(second.next_index(), 0);
        assert_eq!(std::fs::metadata(&second.paths().temp_data).unwrap().len(), 0);
        write_all_chunks(&second, b"ccccddddeeee", 4).await;
        assert_eq!(std::fs::read(&dest).unwrap(), b"ccccddddeeee");
    }

    #[tokio::test]
    async fn completed_destination_is_not_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("done.bin");
        std::fs::write(&dest, b"final").unwrap();

        let err = ResumableWriter::create(
            &reg,
            &dest,
            FileMeta::chunked("d", "done.bin", 5, 4),
            no_watcher(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::DestinationAlreadyExists(_)));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn idle_handle_is_closed_by_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let options = WriterOptions {
            idle_timeout: Duration::from_millis(50),
            watch_interval: Duration::from_millis(20),
        };
        let writer = ResumableWriter::create(
            &reg,
            dir.path().join("idle.bin"),
            FileMeta::chunked("i", "idle.bin", 8, 4),
            options,
        )
        .await
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !writer.is_closed() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(writer.is_closed());
        assert!(reg.is_empty());
        let err = writer.write(b"abcd").await.unwrap_err();
        assert!(matches!(err, TransferError::HandlerClosed(_)));
    }

    #[tokio::test]
    async fn zero_watch_interval_still_closes_idle_handle() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let options = WriterOptions {
            idle_timeout: Duration::from_millis(50),
            watch_interval: Duration::ZERO,
        };
        let writer = ResumableWriter::create(
            &reg,
            dir.path().join("zero.bin"),
            FileMeta::chunked("z", "zero.bin", 8, 4),
            options,
        )
        .await
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !writer.is_closed() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(writer.is_closed());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn torn_chunk_is_rolled_back_before_resend() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let dest = dir.path().join("torn.bin");
        let meta = FileMeta::chunked("t", "torn.bin", 10, 4);
        let writer = ResumableWriter::create(&reg, &dest, meta, no_watcher())
            .await
            .unwrap();
        writer.write(b"0123").await.unwrap();

        // Half of chunk 1 reached disk before the write failed.
        {
            let mut slot = writer.file.lock().await;
            let file = slot.as_mut().unwrap();
            append(file, b"45").await.unwrap();
            assert_eq!(std::fs::metadata(&writer.paths().temp_data).unwrap().len(), 6);
            writer.discard_partial(file).await.unwrap();
        }
        assert_eq!(std::fs::metadata(&writer.paths().temp_data).unwrap().len(), 4);
        assert_eq!(writer.next_index(), 1);
        assert!(!writer.is_closed());

        writer.write(b"4567").await.unwrap();
        let last = writer.write(b"89").await.unwrap();
        assert!(last.completed);
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn active_handle_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry();
        let options = WriterOptions {
            idle_timeout: Duration::from_millis(300),
            watch_interval: Duration::from_millis(20),
        };
        let writer = ResumableWriter::create(
            &reg,
            dir.path().join("busy.bin"),
            FileMeta::chunked("b", "busy.bin", 16, 4),
            options,
        )
        .await
        .unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.write(b"data").await.unwrap();
        }
        assert!(!writer.is_closed());
        writer.close().await;
    }
}
