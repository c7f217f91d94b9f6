//! Segment Fetcher (spec.md §4.6): the concurrency core. Schedules every
//! pending segment under a semaphore of width `C_ts`, each running the
//! per-segment state machine (fetch → write ciphertext → decrypt in place),
//! retrying transient failures with backoff and cancelling the whole wave on
//! a `Forbidden` or `Expired` outcome.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::HttpFetcher;
use crate::error::EngineError;
use crate::inventory::SegmentRef;
use crate::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};
use crate::temp_store::TempStore;

/// Outcome of fetching every segment in one wave.
#[derive(Debug, Default)]
pub struct WaveOutcome {
    /// Segments that finished (written, decrypted, verified on disk).
    pub done: Vec<usize>,
    /// Set when a segment hit 410: the caller should refresh the playlist
    /// and recompute the inventory before starting a new wave.
    pub expired: bool,
}

/// Runs one wave over `segments`, resolving each URI against `base_url`,
/// decrypting with `key`/`iv`, and writing the final plaintext file via
/// `temp.segment_path`. Returns as soon as all tasks reach a terminal state,
/// or immediately on the first `Forbidden`/`Expired` (remaining tasks are
/// cancelled cooperatively via `token`).
pub async fn run_wave(
    segment_client: Arc<dyn HttpFetcher>,
    temp: Arc<TempStore>,
    id_lower: String,
    base_url: String,
    key: [u8; 16],
    iv: [u8; 16],
    segments: Vec<SegmentRef>,
    max_concurrent: usize,
    policy: RetryPolicy,
) -> Result<WaveOutcome, EngineError> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let token = CancellationToken::new();
    let mut handles = Vec::with_capacity(segments.len());

    for segment in segments {
        let semaphore = semaphore.clone();
        let client = segment_client.clone();
        let temp = temp.clone();
        let id_lower = id_lower.clone();
        let base_url = base_url.clone();
        let policy = policy.clone();
        let token = token.clone();

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (segment.index, Err(EngineError::Cancelled)),
            };
            let result = fetch_one_segment(
                client.as_ref(),
                &temp,
                &id_lower,
                &base_url,
                &segment,
                key,
                iv,
                &policy,
                &token,
            )
            .await;
            (segment.index, result)
        }));
    }

    let mut outcome = WaveOutcome::default();
    let mut first_terminal_error: Option<EngineError> = None;

    for handle in handles {
        let (index, result) = handle
            .await
            .map_err(|e| EngineError::Internal(format!("segment task panicked: {e}")))?;
        match result {
            Ok(()) => outcome.done.push(index),
            Err(EngineError::PlaylistExpired { .. }) => {
                outcome.expired = true;
                token.cancel();
            }
            Err(EngineError::Cancelled) => {}
            Err(err) => {
                if first_terminal_error.is_none() {
                    first_terminal_error = Some(err);
                }
                token.cancel();
            }
        }
    }

    if let Some(err) = first_terminal_error {
        return Err(err);
    }
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn fetch_one_segment(
    client: &dyn HttpFetcher,
    temp: &TempStore,
    id_lower: &str,
    base_url: &str,
    segment: &SegmentRef,
    key: [u8; 16],
    iv: [u8; 16],
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> Result<(), EngineError> {
    let url = resolve(base_url, &segment.uri)?;
    let segment_name = segment_file_name(&segment.uri, segment.index);

    let ciphertext = retry_with_backoff(policy, token, |attempt| {
        let url = url.clone();
        async move {
            if attempt > 0 {
                debug!(url = %url, attempt, "retrying segment fetch");
            }
            match client.get(&url).await {
                Ok(response) if response.status == 403 => {
                    RetryAction::Fail(EngineError::Forbidden { url: url.clone() })
                }
                Ok(response) if response.status == 410 => {
                    RetryAction::Fail(EngineError::PlaylistExpired { url: url.clone() })
                }
                Ok(response) if (200..300).contains(&response.status) => {
                    RetryAction::Success(response.body)
                }
                Ok(response) => RetryAction::Retry(EngineError::InvalidInput(format!(
                    "unexpected status {} fetching segment {url}",
                    response.status
                ))),
                Err(EngineError::TransportError(e)) if is_retryable_reqwest_error(&e) => {
                    RetryAction::Retry(EngineError::TransportError(e))
                }
                Err(e) => RetryAction::Fail(e),
            }
        }
    })
    .await?;

    let path = temp.segment_path(id_lower, &segment_name);
    tokio::fs::write(&path, &ciphertext).await?;

    let plaintext = crate::decrypt::decrypt_offloaded(ciphertext, key, iv).await;
    match plaintext {
        Ok(plaintext) => {
            tokio::fs::write(&path, plaintext.as_ref()).await?;
            Ok(())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "segment failed to decrypt, left corrupt on disk for next inventory pass");
            Err(e)
        }
    }
}

fn resolve(base_url: &str, uri: &str) -> Result<String, EngineError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(uri.to_string());
    }
    url::Url::parse(base_url)
        .and_then(|b| b.join(uri))
        .map(|u| u.to_string())
        .map_err(|e| EngineError::InvalidInput(format!("cannot resolve '{uri}' against '{base_url}': {e}")))
}

/// Derives the on-disk filename for a segment from its playlist URI, falling
/// back to a numeric name when the URI has no usable file component (spec.md
/// §4.2's "segment files are named by playlist position" convention).
fn segment_file_name(uri: &str, index: usize) -> String {
    let candidate = uri.rsplit('/').next().unwrap_or(uri);
    if candidate.is_empty() {
        format!("segment{index}.ts")
    } else if let Some(idx) = candidate.find('?') {
        candidate[..idx].to_string()
    } else {
        candidate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FetchResponse;
    use crate::config::DirLayout;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeFetcher {
        responses: Mutex<HashMap<String, FetchResponse>>,
    }

    #[async_trait]
    impl HttpFetcher for FakeFetcher {
        async fn get(&self, url: &str) -> Result<FetchResponse, EngineError> {
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| EngineError::InvalidInput(format!("no fake response for {url}")))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    fn aes_encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        use aes::Aes128;
        use cipher::{BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
        type Enc = cbc::Encryptor<Aes128>;
        let cipher = Enc::new_from_slices(key, iv).unwrap();
        let mut buf = plaintext.to_vec();
        let len = buf.len();
        cipher.encrypt_padded_mut::<NoPadding>(&mut buf, len).unwrap();
        buf
    }

    #[tokio::test]
    async fn wave_writes_decrypted_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = DirLayout::new(tmp.path().join("d"), tmp.path().join("t"));
        dirs.create_all().unwrap();
        let temp = Arc::new(TempStore::new(dirs));
        temp.init_segment_dir("abp-933").unwrap();

        let key = [1u8; 16];
        let iv = [2u8; 16];
        let plaintext = vec![7u8; 32];
        let ciphertext = aes_encrypt(&plaintext, &key, &iv);

        let mut responses = HashMap::new();
        responses.insert(
            "https://cdn.example.com/seg0.ts".to_string(),
            FetchResponse { status: 200, body: Bytes::from(ciphertext) },
        );
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(FakeFetcher { responses: Mutex::new(responses) });

        let segments = vec![SegmentRef { index: 0, uri: "seg0.ts".to_string() }];
        let outcome = run_wave(
            fetcher,
            temp.clone(),
            "abp-933".to_string(),
            "https://cdn.example.com/".to_string(),
            key,
            iv,
            segments,
            2,
            policy(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.done, vec![0]);
        assert!(!outcome.expired);
        let written = std::fs::read(temp.segment_path("abp-933", "seg0.ts")).unwrap();
        assert_eq!(written, plaintext);
    }

    #[tokio::test]
    async fn forbidden_segment_is_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = DirLayout::new(tmp.path().join("d"), tmp.path().join("t"));
        dirs.create_all().unwrap();
        let temp = Arc::new(TempStore::new(dirs));
        temp.init_segment_dir("abp-933").unwrap();

        let mut responses = HashMap::new();
        responses.insert(
            "https://cdn.example.com/seg0.ts".to_string(),
            FetchResponse { status: 403, body: Bytes::new() },
        );
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(FakeFetcher { responses: Mutex::new(responses) });

        let segments = vec![SegmentRef { index: 0, uri: "seg0.ts".to_string() }];
        let err = run_wave(
            fetcher,
            temp,
            "abp-933".to_string(),
            "https://cdn.example.com/".to_string(),
            [0u8; 16],
            [0u8; 16],
            segments,
            2,
            policy(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn expired_segment_flags_wave_for_refresh() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = DirLayout::new(tmp.path().join("d"), tmp.path().join("t"));
        dirs.create_all().unwrap();
        let temp = Arc::new(TempStore::new(dirs));
        temp.init_segment_dir("abp-933").unwrap();

        let mut responses = HashMap::new();
        responses.insert(
            "https://cdn.example.com/seg0.ts".to_string(),
            FetchResponse { status: 410, body: Bytes::new() },
        );
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(FakeFetcher { responses: Mutex::new(responses) });

        let segments = vec![SegmentRef { index: 0, uri: "seg0.ts".to_string() }];
        let outcome = run_wave(
            fetcher,
            temp,
            "abp-933".to_string(),
            "https://cdn.example.com/".to_string(),
            [0u8; 16],
            [0u8; 16],
            segments,
            2,
            policy(),
        )
        .await
        .unwrap();
        assert!(outcome.expired);
        assert!(outcome.done.is_empty());
    }

    #[test]
    fn segment_file_name_strips_query_string() {
        assert_eq!(segment_file_name("seg0.ts?token=abc", 0), "seg0.ts");
        assert_eq!(segment_file_name("https://cdn/a/seg3.ts", 3), "seg3.ts");
    }
}
