//! Breakpoint computation from the size of a partial upload.

use std::path::Path;

use exfs_protocol::FileMeta;

use crate::TransferError;

/// Returns the chunk index a resumed transfer should continue from, given
/// the size of its temp-data file.
///
/// Only whole chunks count. A short tail is accepted only where the final
/// chunk lives; it is never trusted, so the final chunk is always
/// re-requested and the caller must truncate the file to
/// `index * chunk_size` before appending.
pub fn breakpoint_for_size(meta: &FileMeta, size: u64) -> Result<u32, TransferError> {
    let last = meta.total_chunks.saturating_sub(1);
    if meta.chunk_size == 0 {
        // A zero-sized chunk layout only occurs for empty single-chunk files.
        return Ok(0);
    }

    let whole = size / meta.chunk_size;
    let partial = size % meta.chunk_size != 0;

    if partial && whole + 1 != u64::from(meta.total_chunks) {
        return Err(TransferError::InvalidBreakpoint(format!(
            "{size} bytes leave a partial chunk at index {whole}, but the final chunk is {last}"
        )));
    }
    if whole > u64::from(meta.total_chunks) {
        return Err(TransferError::InvalidBreakpoint(format!(
            "{size} bytes hold {whole} chunks, more than the {} declared",
            meta.total_chunks
        )));
    }

    Ok(whole.min(u64::from(last)) as u32)
}

/// Computes the breakpoint of the temp-data file at `temp_path`.
///
/// A missing file resumes from chunk 0.
pub async fn compute_breakpoint(meta: &FileMeta, temp_path: &Path) -> Result<u32, TransferError> {
    match tokio::fs::metadata(temp_path).await {
        Ok(md) => breakpoint_for_size(meta, md.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(file_size: u64, chunk_size: u64, total_chunks: u32) -> FileMeta {
        FileMeta {
            total_chunks,
            ..FileMeta::chunked("b", "out.bin", file_size, chunk_size)
        }
    }

    #[test]
    fn whole_chunks_resume_after_last_complete_chunk() {
        assert_eq!(breakpoint_for_size(&meta(10, 4, 3), 8).unwrap(), 2);
        assert_eq!(breakpoint_for_size(&meta(10, 4, 3), 4).unwrap(), 1);
        assert_eq!(breakpoint_for_size(&meta(10, 4, 3), 0).unwrap(), 0);
    }

    #[test]
    fn partial_final_chunk_is_rewritten() {
        assert_eq!(breakpoint_for_size(&meta(12, 4, 3), 9).unwrap(), 2);
        assert_eq!(breakpoint_for_size(&meta(10, 4, 3), 10).unwrap(), 2);
    }

    #[test]
    fn partial_earlier_chunk_is_invalid() {
        let err = breakpoint_for_size(&meta(16, 4, 4), 9).unwrap_err();
        assert!(matches!(err, TransferError::InvalidBreakpoint(_)));
    }

    #[test]
    fn fully_written_but_unfinalized_file_resends_final_chunk() {
        assert_eq!(breakpoint_for_size(&meta(12, 4, 3), 12).unwrap(), 2);
    }

    #[test]
    fn oversized_file_is_invalid() {
        assert!(breakpoint_for_size(&meta(12, 4, 3), 16).is_err());
    }

    #[test]
    fn single_chunk_always_restarts() {
        let single = FileMeta::single("s", "one.bin", 5);
        assert_eq!(breakpoint_for_size(&single, 3).unwrap(), 0);
        assert_eq!(breakpoint_for_size(&single, 5).unwrap(), 0);

        let empty = FileMeta::single("e", "empty.bin", 0);
        assert_eq!(breakpoint_for_size(&empty, 0).unwrap(), 0);
    }

    #[tokio::test]
    async fn reads_size_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("out.bin.temp");

        assert_eq!(compute_breakpoint(&meta(12, 4, 3), &temp).await.unwrap(), 0);

        std::fs::write(&temp, [0u8; 8]).unwrap();
        assert_eq!(compute_breakpoint(&meta(12, 4, 3), &temp).await.unwrap(), 2);

        std::fs::write(&temp, [0u8; 9]).unwrap();
        assert!(compute_breakpoint(&meta(16, 4, 4), &temp).await.is_err());
    }
}
