//! Playlist Fetcher (spec.md §4.5): fetches and validates the active m3u8,
//! decides whether the cached copy is still current, and when it isn't,
//! (re)fetches the AES key and records a new Download-Info attempt.

use std::sync::Arc;

use m3u8_rs::{Key, KeyMethod, MediaSegment, Playlist};
use url::Url;

use crate::client::HttpFetcher;
use crate::config::EngineConfig;
use crate::download_info::{DownloadInfoStore, InfoSnapshot};
use crate::error::EngineError;
use crate::inventory::SegmentRef;
use crate::job::Job;
use crate::temp_store::TempStore;

/// Result of a successful Playlist Fetcher run.
pub struct PlaylistOutcome {
    /// Whether fresh data was written (false = the on-disk cache was reused).
    pub changed: bool,
    pub segments: Vec<SegmentRef>,
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

fn resolve(base_url: &str, uri: &str) -> Result<String, EngineError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(uri.to_string());
    }
    let base = Url::parse(base_url)
        .map_err(|e| EngineError::InvalidInput(format!("invalid base URL '{base_url}': {e}")))?;
    base.join(uri)
        .map(|u| u.to_string())
        .map_err(|e| EngineError::InvalidInput(format!("cannot resolve '{uri}' against '{base_url}': {e}")))
}

/// Finds the first segment carrying an `EXT-X-KEY` record and validates it's
/// AES-128 with a resolvable URI, per spec.md §3's playlist invariants.
fn find_key_record(segments: &[MediaSegment]) -> Result<&Key, EngineError> {
    let key = segments
        .iter()
        .find_map(|s| s.key.as_ref())
        .ok_or_else(|| EngineError::InvalidInput("playlist has segments but no EXT-X-KEY".to_string()))?;
    if !matches!(key.method, KeyMethod::AES128) {
        return Err(EngineError::InvalidInput(format!(
            "unsupported key method {:?}, only AES-128 is handled",
            key.method
        )));
    }
    if key.uri.as_deref().unwrap_or_default().is_empty() {
        return Err(EngineError::InvalidInput("EXT-X-KEY has no URI".to_string()));
    }
    Ok(key)
}

/// Runs the Playlist Fetcher for `job` once (no retry loop — the caller wraps
/// this in `retry::retry_with_backoff`).
pub async fn fetch_playlist(
    control_client: &dyn HttpFetcher,
    cfg: &EngineConfig,
    temp: &TempStore,
    info_store: &DownloadInfoStore,
    job: &Job,
) -> Result<PlaylistOutcome, EngineError> {
    let id_lower = job.id_lower();
    let old_hls_url = info_store
        .latest_playlist_url(&id_lower)
        .unwrap_or_else(|| job.hls_url.clone());

    let response = control_client.get(&job.hls_url).await?;
    match response.status {
        403 => return Err(EngineError::Forbidden { url: job.hls_url.clone() }),
        404 => {
            return Err(EngineError::NotFound {
                url: job.hls_url.clone(),
                attempts: 1,
            });
        }
        status if !(200..300).contains(&status) => {
            return Err(EngineError::InvalidInput(format!(
                "unexpected status {status} fetching playlist {}",
                job.hls_url
            )));
        }
        _ => {}
    }
    let playlist_text = String::from_utf8(response.body.to_vec())
        .map_err(|e| EngineError::InvalidInput(format!("playlist is not valid UTF-8: {e}")))?;

    let parsed = m3u8_rs::parse_playlist_res(playlist_text.as_bytes())
        .map_err(|e| EngineError::InvalidInput(format!("failed to parse playlist: {e}")))?;
    let media_playlist = match parsed {
        Playlist::MediaPlaylist(p) => p,
        Playlist::MasterPlaylist(_) => {
            return Err(EngineError::InvalidInput(
                "got a master playlist; variant selection is out of scope".to_string(),
            ));
        }
    };

    let cached = temp.read_all(&id_lower)?;
    let unchanged = cached.playlist.as_deref() == Some(playlist_text.as_str())
        && job.hls_url == old_hls_url
        && cached.key.is_some()
        && cached.iv.is_some();

    if unchanged {
        let key_bytes = cached.key.unwrap();
        let iv_hex = cached.iv.unwrap();
        let key = to_key_array(&key_bytes)?;
        let iv = crate::decrypt::parse_iv(&iv_hex)?;
        let segments = segment_refs(&media_playlist.segments);
        return Ok(PlaylistOutcome { changed: false, segments, key, iv });
    }

    let key_record = find_key_record(&media_playlist.segments)?;
    let key_uri = key_record.uri.clone().expect("checked non-empty above");
    let key_url = resolve(&job.base_url, &key_uri)?;
    let key_response = control_client.get(&key_url).await?;
    if key_response.status == 403 {
        return Err(EngineError::Forbidden { url: key_url });
    }
    if !(200..300).contains(&key_response.status) {
        return Err(EngineError::InvalidInput(format!(
            "unexpected status {} fetching key {key_url}",
            key_response.status
        )));
    }
    let key_bytes = key_response.body.to_vec();
    let key = to_key_array(&key_bytes)?;

    let iv_hex = key_record
        .iv
        .clone()
        .ok_or_else(|| EngineError::InvalidInput("EXT-X-KEY has no IV".to_string()))?;
    let iv = crate::decrypt::parse_iv(&iv_hex)?;

    temp.write_playlist(&id_lower, &playlist_text)?;
    temp.write_key(&id_lower, &key_bytes)?;
    temp.write_iv(&id_lower, &iv_hex)?;

    info_store.append(
        &id_lower,
        InfoSnapshot {
            name: job.name.clone(),
            actress: job.actress.clone(),
            hash_tag: job.hash_tag.clone(),
            hls_url: job.hls_url.clone(),
            cover_url: job.cover_url.clone(),
            src: job.src.clone(),
            status: job.status,
            has_chinese: job.has_chinese,
            release_date: job.release_date.clone(),
            time_length: job.time_length.clone(),
        },
    )?;

    let segments = segment_refs(&media_playlist.segments);
    Ok(PlaylistOutcome { changed: true, segments, key, iv })
}

fn to_key_array(bytes: &[u8]) -> Result<[u8; 16], EngineError> {
    bytes
        .try_into()
        .map_err(|_| EngineError::InvalidInput(format!("key must be 16 bytes, got {}", bytes.len())))
}

fn segment_refs(segments: &[MediaSegment]) -> Vec<SegmentRef> {
    segments
        .iter()
        .enumerate()
        .map(|(index, s)| SegmentRef { index, uri: s.uri.clone() })
        .collect()
}

/// Just documents that implementations may stash a shared `Arc<EngineConfig>`
/// alongside the control client rather than re-resolving it per call.
pub type SharedConfig = Arc<EngineConfig>;
