//! Download-Info Store (spec.md §4.3): an append-only JSON file mapping each
//! job's lowercased id to the history of snapshots recorded for it. Every
//! call to `append` adds one more snapshot to that id's list; nothing is ever
//! rewritten or removed from an existing entry, which is what lets the
//! Segment Inventory recover a historical playlist URL prefix by walking the
//! list backwards (spec.md §4.4).
//!
//! Grounded in `DownloadInfoManager._save_download_info`
//! (`examples/original_source/src/Manager.py`): `{id.lower(): [snapshot, ...]}`,
//! rewritten on every save by reading the whole file, appending, and writing
//! it back. We keep that same read-modify-write shape but make the write
//! atomic (temp file + rename) and guard the whole store behind a
//! `parking_lot::Mutex` so concurrent Job Drivers don't race on the file.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::job::JobStatus;

/// One recorded snapshot of a job's metadata at the time `append` was called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoSnapshot {
    pub name: String,
    pub actress: String,
    pub hash_tag: Vec<String>,
    pub hls_url: String,
    pub cover_url: String,
    pub src: String,
    pub status: JobStatus,
    pub has_chinese: bool,
    pub release_date: Option<String>,
    pub time_length: Option<String>,
}

type StoreFile = HashMap<String, Vec<InfoSnapshot>>;

/// Append-only JSON store, single writer lock for the whole file.
pub struct DownloadInfoStore {
    path: PathBuf,
    data: Mutex<StoreFile>,
}

impl DownloadInfoStore {
    /// Loads the store from `path` if it exists, otherwise starts empty.
    pub fn open(path: PathBuf) -> Result<Self, EngineError> {
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Appends one snapshot to `id_lower`'s history and flushes to disk
    /// atomically (write to a sibling temp file, then rename).
    pub fn append(&self, id_lower: &str, snapshot: InfoSnapshot) -> Result<(), EngineError> {
        let mut guard = self.data.lock();
        guard.entry(id_lower.to_string()).or_default().push(snapshot);
        self.flush(&guard)
    }

    /// The full recorded history for a job, oldest first. Empty if the job
    /// has never been recorded.
    pub fn history(&self, id_lower: &str) -> Vec<InfoSnapshot> {
        self.data
            .lock()
            .get(id_lower)
            .cloned()
            .unwrap_or_default()
    }

    /// The most recently appended snapshot's `hls_url`, if any — the basis
    /// for historical-prefix recovery in the Segment Inventory.
    pub fn latest_playlist_url(&self, id_lower: &str) -> Option<String> {
        self.data
            .lock()
            .get(id_lower)
            .and_then(|snapshots| snapshots.last())
            .map(|s| s.hls_url.clone())
    }

    fn flush(&self, data: &StoreFile) -> Result<(), EngineError> {
        let text = serde_json::to_string_pretty(data)?;
        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp_path, text)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
