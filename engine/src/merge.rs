//! Merger (spec.md §4.9): concatenates every segment file for a job into the
//! final container, byte-exact. Two backends — an external `ffmpeg` concat
//! demuxer and an in-process streaming append — selected by
//! `EngineConfig::use_external_merger`.
//!
//! Grounded in `Downloader._merge_ts_with_ffmpeg` / `_merge_ts_without_ffmpeg`
//! (`examples/original_source/src/Downloader.py`): the ffmpeg backend writes
//! an absolute-path concat list and shells out with `-f concat -safe 0 -c
//! copy`, then renames the output to `<ID> <name> <actress>.mp4`; the
//! in-process backend filters corrupt files, sorts by the trailing numeric
//! index in the filename, and streams each into the output file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{DirLayout, EngineConfig};
use crate::error::EngineError;
use crate::inventory::is_corrupt;

/// One segment slated for the merge, in playlist order.
pub struct MergeSegment {
    pub path: PathBuf,
}

/// Quotes a path for an ffmpeg concat-demuxer list line: single-quoted, with
/// embedded single quotes escaped as `'\''`. Rejects an embedded newline,
/// which the concat format cannot represent on one line (spec.md §4.9).
fn quote_concat_path(path: &Path) -> Result<String, EngineError> {
    let s = path.to_string_lossy();
    if s.contains('\n') {
        return Err(EngineError::InvalidInput(format!(
            "segment path contains a newline and cannot be merged: {}",
            path.display()
        )));
    }
    Ok(format!("'{}'", s.replace('\'', "'\\''")))
}

/// Writes the ffmpeg concat list, runs `ffmpeg -f concat -safe 0 -c copy`,
/// and renames the result to the final named output.
pub async fn merge_with_ffmpeg(
    cfg: &EngineConfig,
    id_lower: &str,
    id_upper: &str,
    name: &str,
    actress: &str,
    segments: &[MergeSegment],
) -> Result<PathBuf, EngineError> {
    let list_path = cfg.dirs.merge_list_path(id_lower);
    let mut list_contents = String::new();
    for segment in segments {
        if !segment.path.exists() {
            continue;
        }
        let absolute = segment
            .path
            .canonicalize()
            .unwrap_or_else(|_| segment.path.clone());
        list_contents.push_str("file ");
        list_contents.push_str(&quote_concat_path(&absolute)?);
        list_contents.push('\n');
    }
    tokio::fs::write(&list_path, list_contents).await?;

    let output_path = cfg.dirs.video_output_path(id_lower);
    let status_output = Command::new(&cfg.merge_tool)
        .args([
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ])
        .arg(&list_path)
        .args(["-c", "copy", "-y"])
        .arg(&output_path)
        .output()
        .await?;

    if !status_output.status.success() {
        return Err(EngineError::MergeFailed {
            reason: String::from_utf8_lossy(&status_output.stderr).into_owned(),
        });
    }

    let final_path = cfg.dirs.final_video_path(id_upper, name, actress);
    tokio::fs::rename(&output_path, &final_path).await?;
    Ok(final_path)
}

/// In-process fallback: filters corrupt files, sorts by the trailing numeric
/// index of the file stem, and streams each into the output file in order.
pub async fn merge_in_process(
    dirs: &DirLayout,
    id_lower: &str,
    id_upper: &str,
    name: &str,
    actress: &str,
) -> Result<PathBuf, EngineError> {
    let seg_dir = dirs.segment_dir(id_lower);
    let mut entries: Vec<(usize, PathBuf)> = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&seg_dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let meta = entry.metadata().await?;
        if is_corrupt(meta.len()) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(index) = trailing_digits(stem) else {
            continue;
        };
        entries.push((index, path));
    }
    entries.sort_by_key(|(index, _)| *index);

    let output_path = dirs.video_output_path(id_lower);
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut out = tokio::fs::File::create(&output_path).await?;
    for (_, path) in &entries {
        let bytes = tokio::fs::read(path).await?;
        out.write_all(&bytes).await?;
    }
    out.flush().await?;

    let final_path = dirs.final_video_path(id_upper, name, actress);
    tokio::fs::rename(&output_path, &final_path).await?;
    Ok(final_path)
}

/// Extracts the run of trailing ASCII digits in `stem` (e.g. `abp933-12` ->
/// `12`), or `None` if it doesn't end in a digit. Segment filenames carry
/// their playlist index as a numeric suffix after an id-derived prefix
/// (see `inventory::trailing_index`), so this mirrors that rather than
/// assuming the whole stem is numeric.
fn trailing_digits(stem: &str) -> Option<usize> {
    let digit_count = stem.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digit_count == 0 {
        return None;
    }
    stem[stem.len() - digit_count..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_concat_path_escapes_single_quotes() {
        let path = Path::new("/tmp/a'b.ts");
        let quoted = quote_concat_path(path).unwrap();
        assert_eq!(quoted, "'/tmp/a'\\''b.ts'");
    }

    #[test]
    fn quote_concat_path_rejects_embedded_newline() {
        let path = Path::new("/tmp/a\nb.ts");
        assert!(quote_concat_path(path).is_err());
    }

    #[test]
    fn trailing_digits_parses_numeric_suffix() {
        assert_eq!(trailing_digits("12"), Some(12));
        assert_eq!(trailing_digits("abp933-12"), Some(12));
        assert_eq!(trailing_digits("abc"), None);
    }

    #[tokio::test]
    async fn merge_in_process_concatenates_in_numeric_order_skipping_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = DirLayout::new(tmp.path().join("d"), tmp.path().join("t"));
        dirs.create_all().unwrap();
        let seg_dir = dirs.segment_dir("abp-933");
        tokio::fs::create_dir_all(&seg_dir).await.unwrap();
        tokio::fs::write(seg_dir.join("1.ts"), vec![1u8; 16]).await.unwrap();
        tokio::fs::write(seg_dir.join("0.ts"), vec![0u8; 16]).await.unwrap();
        tokio::fs::write(seg_dir.join("2.ts"), vec![2u8; 15]).await.unwrap(); // corrupt

        let final_path = merge_in_process(&dirs, "abp-933", "ABP-933", "n", "a")
            .await
            .unwrap();
        let contents = tokio::fs::read(&final_path).await.unwrap();
        let mut expected = vec![0u8; 16];
        expected.extend(vec![1u8; 16]);
        assert_eq!(contents, expected);
        assert_eq!(final_path.file_name().unwrap(), "ABP-933 n a.mp4");
    }

    #[tokio::test]
    async fn merge_in_process_handles_id_prefixed_filenames() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = DirLayout::new(tmp.path().join("d"), tmp.path().join("t"));
        dirs.create_all().unwrap();
        let seg_dir = dirs.segment_dir("abp-933");
        tokio::fs::create_dir_all(&seg_dir).await.unwrap();
        tokio::fs::write(seg_dir.join("abp933-1.ts"), vec![1u8; 16]).await.unwrap();
        tokio::fs::write(seg_dir.join("abp933-0.ts"), vec![0u8; 16]).await.unwrap();

        let final_path = merge_in_process(&dirs, "abp-933", "ABP-933", "n", "a")
            .await
            .unwrap();
        let contents = tokio::fs::read(&final_path).await.unwrap();
        let mut expected = vec![0u8; 16];
        expected.extend(vec![1u8; 16]);
        assert_eq!(contents, expected, "prefixed segment names must still sort by trailing index");
    }
}
