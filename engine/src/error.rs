//! Error taxonomy for the download engine (spec.md §7).

use std::path::PathBuf;

/// Every fallible engine operation returns this. Variants map 1:1 onto the
/// error kinds named in spec.md §7; propagation policy (what gets retried
/// locally vs escalated) lives in the callers, not here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Origin consistently returned 404 for the playlist.
    #[error("playlist not found after {attempts} attempts: {url}")]
    NotFound { url: String, attempts: u32 },

    /// 403 from playlist, key, or segment fetch.
    #[error("forbidden (403) fetching {url}")]
    Forbidden { url: String },

    /// 410 on a segment; recovered by the Job Driver re-running the Playlist Fetcher.
    #[error("playlist expired (410) fetching segment {url}")]
    PlaylistExpired { url: String },

    /// Connection reset, timeout, DNS, TLS, or other transport-level failure.
    #[error("transport error: {0}")]
    TransportError(#[from] reqwest::Error),

    /// Detected on disk via length-mod-16; recovered by re-fetching next wave.
    #[error("segment {path} is corrupt ({len} bytes is not a positive multiple of 16)")]
    CorruptSegment { path: PathBuf, len: u64 },

    /// The job's segment directory does not exist when the Segment Inventory
    /// is computed (spec.md §4.4 step 1).
    #[error("segment directory missing: {path}")]
    MissingSegmentDir { path: PathBuf },

    /// External merger exited non-zero, or the in-process merge failed to write.
    #[error("merge failed: {reason}")]
    MergeFailed { reason: String },

    /// Malformed playlist, missing key record, wrong key/IV length, or similar.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Cooperative cancellation (a wave aborted by a sibling's terminal error).
    #[error("operation cancelled")]
    Cancelled,

    /// Filesystem I/O failure unrelated to the corruption-detection path above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure in the Download-Info Store.
    #[error("download-info store error: {0}")]
    DownloadInfo(#[from] serde_json::Error),

    /// Anything else that should never happen in practice.
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for errors a caller should treat as this job's terminal failure
    /// (as opposed to `PlaylistExpired`/`CorruptSegment`, which the engine
    /// itself recovers from without surfacing to the Job Driver).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineError::PlaylistExpired { .. })
    }
}
