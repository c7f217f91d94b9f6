//! Temp-File Store (spec.md §4.2): typed read/write of the four per-job
//! artifacts, plus a directory initializer. Text artifacts are UTF-8; binary
//! artifacts are raw bytes.

use std::path::PathBuf;

use crate::config::DirLayout;
use crate::error::EngineError;

/// Result of a multi-artifact read: explicit absent markers rather than an
/// error, so callers can decide which writes to do (spec.md §4.2).
#[derive(Debug, Default, Clone)]
pub struct TempArtifacts {
    pub playlist: Option<String>,
    pub key: Option<Vec<u8>>,
    pub iv: Option<String>,
}

pub struct TempStore {
    dirs: DirLayout,
}

impl TempStore {
    pub fn new(dirs: DirLayout) -> Self {
        Self { dirs }
    }

    /// Ensures the segment directory for `id_lower` exists.
    pub fn init_segment_dir(&self, id_lower: &str) -> Result<PathBuf, EngineError> {
        let dir = self.dirs.segment_dir(id_lower);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn write_playlist(&self, id_lower: &str, text: &str) -> Result<(), EngineError> {
        write_atomic(&self.dirs.playlist_path(id_lower), text.as_bytes())
    }

    pub fn read_playlist(&self, id_lower: &str) -> Result<Option<String>, EngineError> {
        read_optional_string(&self.dirs.playlist_path(id_lower))
    }

    pub fn write_key(&self, id_lower: &str, bytes: &[u8]) -> Result<(), EngineError> {
        write_atomic(&self.dirs.key_path(id_lower), bytes)
    }

    pub fn read_key(&self, id_lower: &str) -> Result<Option<Vec<u8>>, EngineError> {
        read_optional_bytes(&self.dirs.key_path(id_lower))
    }

    pub fn write_iv(&self, id_lower: &str, iv_hex: &str) -> Result<(), EngineError> {
        write_atomic(&self.dirs.iv_path(id_lower), iv_hex.as_bytes())
    }

    pub fn read_iv(&self, id_lower: &str) -> Result<Option<String>, EngineError> {
        read_optional_string(&self.dirs.iv_path(id_lower))
    }

    pub fn segment_path(&self, id_lower: &str, segment_name: &str) -> PathBuf {
        self.dirs.segment_dir(id_lower).join(segment_name)
    }

    /// Reads all three decryption artifacts at once. Each field is `None`
    /// when its file is absent rather than erroring.
    pub fn read_all(&self, id_lower: &str) -> Result<TempArtifacts, EngineError> {
        Ok(TempArtifacts {
            playlist: self.read_playlist(id_lower)?,
            key: self.read_key(id_lower)?,
            iv: self.read_iv(id_lower)?,
        })
    }

    /// Removes the segment dir, key, iv, and playlist cache for `id_lower`
    /// (spec.md §4.7, post-merge cleanup). Idempotent: a missing path is not
    /// an error.
    pub fn clear(&self, id_lower: &str) -> Result<(), EngineError> {
        let seg_dir = self.dirs.segment_dir(id_lower);
        if seg_dir.exists() {
            std::fs::remove_dir_all(&seg_dir)?;
        }
        for path in [
            self.dirs.key_path(id_lower),
            self.dirs.iv_path(id_lower),
            self.dirs.playlist_path(id_lower),
            self.dirs.merge_list_path(id_lower),
        ] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn dirs(&self) -> &DirLayout {
        &self.dirs
    }
}

/// Write-to-temp-then-rename, so a crash mid-write never leaves a partial
/// file at the canonical path (the same pattern the Download-Info Store
/// uses for its single JSON file).
fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_optional_string(path: &std::path::Path) -> Result<Option<String>, EngineError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_optional_bytes(path: &std::path::Path) -> Result<Option<Vec<u8>>, EngineError> {
    match std::fs::read(path) {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirLayout;

    fn store() -> (tempfile::TempDir, TempStore) {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = DirLayout::new(tmp.path().join("downloads"), tmp.path().join("tmp"));
        dirs.create_all().unwrap();
        (tmp, TempStore::new(dirs))
    }

    #[test]
    fn read_all_reports_absent_as_none() {
        let (_tmp, store) = store();
        let all = store.read_all("abp-933").unwrap();
        assert!(all.playlist.is_none());
        assert!(all.key.is_none());
        assert!(all.iv.is_none());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (_tmp, store) = store();
        store.write_playlist("abp-933", "#EXTM3U\n").unwrap();
        store.write_key("abp-933", &[1u8; 16]).unwrap();
        store.write_iv("abp-933", "0xabcdef").unwrap();

        let all = store.read_all("abp-933").unwrap();
        assert_eq!(all.playlist.as_deref(), Some("#EXTM3U\n"));
        assert_eq!(all.key.as_deref(), Some([1u8; 16].as_slice()));
        assert_eq!(all.iv.as_deref(), Some("0xabcdef"));
    }

    #[test]
    fn clear_removes_segment_dir_and_caches_but_not_unrelated_jobs() {
        let (_tmp, store) = store();
        store.init_segment_dir("abp-933").unwrap();
        store.write_playlist("abp-933", "x").unwrap();
        store.write_playlist("other-1", "y").unwrap();

        store.clear("abp-933").unwrap();

        assert!(!store.dirs().segment_dir("abp-933").exists());
        assert!(store.read_playlist("abp-933").unwrap().is_none());
        assert_eq!(store.read_playlist("other-1").unwrap().as_deref(), Some("y"));
    }
}
