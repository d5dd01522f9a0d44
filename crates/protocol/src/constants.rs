//! Shared constants for the on-disk layout and frame format.

use std::time::Duration;

/// Suffix of the in-progress data file (`<dest>.temp`).
pub const TEMP_DATA_SUFFIX: &str = ".temp";

/// Suffix of the persisted descriptor snapshot (`<dest>.meta`).
pub const TEMP_META_SUFFIX: &str = ".meta";

/// Separator between the JSON header and the payload of a chunk frame.
pub const FRAME_DELIMITER: u8 = 0x00;

/// How long a write handle may stay idle before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the idle watcher checks a handle.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest interval the idle watcher accepts.
pub const MIN_WATCH_INTERVAL: Duration = Duration::from_millis(10);
