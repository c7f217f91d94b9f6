//! Segment Inventory (spec.md §4.4): decides, for a given playlist, which
//! segments already have a valid on-disk file and which still need fetching.
//!
//! Grounded in `Downloader._undownload_ts` / `_get_undownload_ts`
//! (`examples/original_source/src/Downloader.py`): collect the historical
//! playlist-URL prefixes recorded for this job in the Download-Info Store,
//! scan the segment directory for files whose name starts with one of those
//! prefixes, treat a file whose length is not a positive multiple of 16 as
//! corrupt (skip it, i.e. still missing), and extract each surviving file's
//! trailing numeric index. A segment at playlist position `i` counts as
//! downloaded iff `i` is in that index set.
//!
//! The original treats *any* index collision across prefixes (the same
//! trailing number reachable from two different historical prefixes) as
//! totally ambiguous and gives up on the whole inventory (`# TODO:` then
//! `pass`, leaving nothing marked undownloaded — silently treating every
//! segment as already present). Spec's redesign flag on "safe defaults"
//! replaces that with an explicit, narrower fallback: a colliding index is
//! treated as missing rather than the entire job silently skipping
//! re-fetch. Everything else keeps the original's shape.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::download_info::DownloadInfoStore;
use crate::error::EngineError;

/// One segment from the active playlist, in playlist order.
#[derive(Debug, Clone)]
pub struct SegmentRef {
    pub index: usize,
    pub uri: String,
}

/// Outcome of running the inventory over a job's playlist.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Segments still needing a fetch, in ascending playlist order.
    pub missing: Vec<SegmentRef>,
    /// Playlist indices found corrupt on disk and discarded.
    pub corrupt_indices: Vec<usize>,
    /// Playlist indices whose trailing numeric index collided across two or
    /// more historical prefixes; these are always folded into `missing`.
    pub collided_indices: Vec<usize>,
}

/// Derives the filename prefix from a recorded playlist URL: the final path
/// segment with a trailing `.m3u8` stripped, matching
/// `hls_url.split('/')[-1].split('.m3u8')[0]` in the original.
fn prefix_from_hls_url(hls_url: &str) -> String {
    let last_segment = hls_url.rsplit('/').next().unwrap_or(hls_url);
    last_segment.split(".m3u8").next().unwrap_or(last_segment).to_string()
}

/// Fallback prefix when no history exists yet: derived from the first
/// segment's own URI, assuming segment 0 is named `<prefix>0.ts`.
fn prefix_from_first_segment(first_segment_uri: &str) -> Option<String> {
    let name = first_segment_uri.rsplit('/').next().unwrap_or(first_segment_uri);
    name.strip_suffix("0.ts").map(|p| p.to_string())
}

/// True when `data`'s length is zero or not a multiple of 16 — the
/// corruption probe shared with the decrypted-in-place invariant (spec.md §8).
pub fn is_corrupt(len: u64) -> bool {
    len == 0 || len % 16 != 0
}

/// Extracts the trailing run of ASCII digits from `stem` after stripping
/// `prefix`, e.g. `stem = "abc12"`, `prefix = "abc"` -> `Some(12)`.
fn trailing_index(stem: &str, prefix: &str) -> Option<usize> {
    let rest = stem.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Scans `segment_dir` for segment files matching any prefix in `prefixes`,
/// returning three disjoint index sets: confirmed-present (exactly one
/// prefix matched, file intact), collided (more than one prefix matched),
/// and corrupt (a matching file whose length fails the multiple-of-16 check).
fn scan_segment_dir(
    segment_dir: &Path,
    prefixes: &HashSet<String>,
) -> Result<(HashSet<usize>, HashSet<usize>, HashSet<usize>), EngineError> {
    let mut index_to_prefixes: HashMap<usize, HashSet<String>> = HashMap::new();
    let mut corrupt = HashSet::new();

    let entries = match std::fs::read_dir(segment_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::MissingSegmentDir { path: segment_dir.to_path_buf() });
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".ts") else {
            continue;
        };
        let matches: Vec<(usize, String)> = prefixes
            .iter()
            .filter_map(|prefix| trailing_index(stem, prefix).map(|index| (index, prefix.clone())))
            .collect();
        if matches.is_empty() {
            continue;
        }
        let len = entry.metadata()?.len();
        if is_corrupt(len) {
            for (index, _) in &matches {
                corrupt.insert(*index);
            }
            continue;
        }
        for (index, prefix) in matches {
            index_to_prefixes.entry(index).or_default().insert(prefix);
        }
    }

    let mut confirmed = HashSet::new();
    let mut collided = HashSet::new();
    for (index, matched_prefixes) in index_to_prefixes {
        if matched_prefixes.len() > 1 {
            collided.insert(index);
        } else {
            confirmed.insert(index);
        }
    }
    Ok((confirmed, collided, corrupt))
}

/// Computes the inventory for `id_lower` against `segments` (the current
/// playlist's segment list, in order) and the files under `segment_dir`.
pub fn compute_inventory(
    store: &DownloadInfoStore,
    id_lower: &str,
    segment_dir: &Path,
    segments: &[SegmentRef],
) -> Result<Inventory, EngineError> {
    let history = store.history(id_lower);

    let prefixes: HashSet<String> = if !history.is_empty() {
        history.iter().map(|s| prefix_from_hls_url(&s.hls_url)).collect()
    } else if let Some(first) = segments.first() {
        prefix_from_first_segment(&first.uri).into_iter().collect()
    } else {
        HashSet::new()
    };

    let (confirmed, collided, corrupt) = scan_segment_dir(segment_dir, &prefixes)?;

    let mut missing = Vec::new();
    for segment in segments {
        if confirmed.contains(&segment.index) && !collided.contains(&segment.index) {
            continue;
        }
        missing.push(segment.clone());
    }

    Ok(Inventory {
        missing,
        corrupt_indices: corrupt.into_iter().collect(),
        collided_indices: collided.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download_info::InfoSnapshot;
    use crate::job::JobStatus;

    fn snapshot(hls_url: &str) -> InfoSnapshot {
        InfoSnapshot {
            name: "n".to_string(),
            actress: "a".to_string(),
            hash_tag: vec![],
            hls_url: hls_url.to_string(),
            cover_url: "c".to_string(),
            src: "jab".to_string(),
            status: JobStatus::Downloading,
            has_chinese: false,
            release_date: None,
            time_length: None,
        }
    }

    fn segs(n: usize) -> Vec<SegmentRef> {
        (0..n)
            .map(|i| SegmentRef {
                index: i,
                uri: format!("abp933-{i}.ts"),
            })
            .collect()
    }

    #[test]
    fn prefix_strips_m3u8_suffix() {
        assert_eq!(
            prefix_from_hls_url("https://cdn/x/abp933.m3u8"),
            "abp933"
        );
    }

    #[test]
    fn trailing_index_parses_digits_after_prefix() {
        assert_eq!(trailing_index("abp933-2", "abp933-"), Some(2));
        assert_eq!(trailing_index("abp933-", "abp933-"), None);
        assert_eq!(trailing_index("other-2", "abp933-"), None);
    }

    #[test]
    fn is_corrupt_flags_zero_and_non_multiple_of_16() {
        assert!(is_corrupt(0));
        assert!(is_corrupt(15));
        assert!(!is_corrupt(16));
        assert!(!is_corrupt(32));
    }

    #[test]
    fn all_segments_present_yields_empty_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadInfoStore::open(tmp.path().join("download_info.json")).unwrap();
        store
            .append("abp-933", snapshot("https://cdn/x/abp933-.m3u8"))
            .unwrap();

        let seg_dir = tmp.path().join("ts").join("abp-933");
        std::fs::create_dir_all(&seg_dir).unwrap();
        for i in 0..3 {
            std::fs::write(seg_dir.join(format!("abp933-{i}.ts")), vec![0u8; 16]).unwrap();
        }

        let segments: Vec<SegmentRef> = (0..3)
            .map(|i| SegmentRef { index: i, uri: format!("abp933-{i}.ts") })
            .collect();
        let inv = compute_inventory(&store, "abp-933", &seg_dir, &segments).unwrap();
        assert!(inv.missing.is_empty());
    }

    #[test]
    fn corrupt_file_counts_as_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadInfoStore::open(tmp.path().join("download_info.json")).unwrap();
        store
            .append("abp-933", snapshot("https://cdn/x/abp933-.m3u8"))
            .unwrap();

        let seg_dir = tmp.path().join("ts").join("abp-933");
        std::fs::create_dir_all(&seg_dir).unwrap();
        std::fs::write(seg_dir.join("abp933-0.ts"), vec![0u8; 15]).unwrap();

        let segments = vec![SegmentRef { index: 0, uri: "abp933-0.ts".to_string() }];
        let inv = compute_inventory(&store, "abp-933", &seg_dir, &segments).unwrap();
        assert_eq!(inv.missing.len(), 1);
    }

    #[test]
    fn no_history_falls_back_to_first_segment_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadInfoStore::open(tmp.path().join("download_info.json")).unwrap();

        let seg_dir = tmp.path().join("ts").join("abp-933");
        std::fs::create_dir_all(&seg_dir).unwrap();
        std::fs::write(seg_dir.join("abp9330.ts"), vec![0u8; 16]).unwrap();

        let segments = vec![
            SegmentRef { index: 0, uri: "abp9330.ts".to_string() },
            SegmentRef { index: 1, uri: "abp9331.ts".to_string() },
        ];
        let inv = compute_inventory(&store, "abp-933", &seg_dir, &segments).unwrap();
        assert_eq!(inv.missing.len(), 1);
        assert_eq!(inv.missing[0].index, 1);
    }

    #[test]
    fn missing_segment_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadInfoStore::open(tmp.path().join("download_info.json")).unwrap();
        let seg_dir = tmp.path().join("ts").join("abp-933");
        let segments = segs(2);
        let err = compute_inventory(&store, "abp-933", &seg_dir, &segments).unwrap_err();
        assert!(matches!(err, EngineError::MissingSegmentDir { path } if path == seg_dir));
    }
}
