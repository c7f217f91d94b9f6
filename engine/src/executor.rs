//! Multi-Job Executor (spec.md §4.8): runs up to `C_job` Job Drivers
//! concurrently, isolating per-job failures and surfacing every result.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

use crate::client::{HttpFetcher, ReqwestFetcher};
use crate::config::EngineConfig;
use crate::download_info::DownloadInfoStore;
use crate::driver::run_job;
use crate::error::EngineError;
use crate::job::Job;
use crate::temp_store::TempStore;

/// One job's outcome, keyed by its id so callers can match results back to
/// the jobs they submitted.
pub struct JobResult {
    pub job_id: String,
    pub result: Result<(), EngineError>,
}

/// Runs every job in `jobs`, bounded by `EngineConfig::max_concurrent_jobs`.
/// A failing job never aborts its siblings (spec.md §5's isolation
/// guarantee) — its error is returned in its own `JobResult`.
pub async fn run_all(cfg: Arc<EngineConfig>, jobs: Vec<Job>) -> Result<Vec<JobResult>, EngineError> {
    let control_client: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new(
        cfg.headers.clone(),
        cfg.proxy.as_deref(),
        cfg.control_timeout,
    )?);
    let segment_client: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new(
        cfg.headers.clone(),
        cfg.proxy.as_deref(),
        cfg.segment_timeout,
    )?);
    let info_store = Arc::new(DownloadInfoStore::open(cfg.dirs.download_info_path())?);
    let temp = Arc::new(TempStore::new(cfg.dirs.clone()));

    run_jobs_with_clients(cfg, control_client, segment_client, info_store, temp, jobs).await
}

/// The actual fan-out/join loop, parameterized over the `HttpFetcher`
/// handles so tests can drive it with a fake fetcher instead of real HTTP.
async fn run_jobs_with_clients(
    cfg: Arc<EngineConfig>,
    control_client: Arc<dyn HttpFetcher>,
    segment_client: Arc<dyn HttpFetcher>,
    info_store: Arc<DownloadInfoStore>,
    temp: Arc<TempStore>,
    jobs: Vec<Job>,
) -> Result<Vec<JobResult>, EngineError> {
    let semaphore = Arc::new(Semaphore::new(cfg.max_concurrent_jobs.max(1)));

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let cfg = cfg.clone();
        let control_client = control_client.clone();
        let segment_client = segment_client.clone();
        let info_store = info_store.clone();
        let temp = temp.clone();
        let semaphore = semaphore.clone();
        let job_id = job.id.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("job semaphore is never closed");
            let result = run_job(&cfg, control_client, segment_client, info_store, temp, job).await;
            if let Err(e) = &result {
                error!(job_id = %job_id, error = %e, "job failed");
            }
            JobResult { job_id, result }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(
            handle
                .await
                .map_err(|e| EngineError::Internal(format!("job task panicked: {e}")))?,
        );
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FetchResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

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

    // Segment named `<prefix>0.ts` where `<prefix>` matches the playlist
    // filename (sans `.m3u8`) so the inventory pass (§4.4) recognizes the
    // freshly-written file as belonging to segment index 0.
    const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x00000000000000000000000000000001\n\
#EXTINF:4.0,\n\
abp933-0.ts\n\
#EXT-X-ENDLIST\n";

    fn aes_encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        use aes::Aes128;
        use cipher::{BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
        type Enc = cbc::Encryptor<Aes128>;
        Enc::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<NoPadding>(plaintext)
    }

    fn ok_job(id: &str) -> Job {
        Job::new(
            id,
            "n",
            "a",
            vec![],
            format!("https://cdn.example.com/{id}/abp933-.m3u8"),
            format!("https://cdn.example.com/{id}/cover.jpg"),
            "jab",
        )
    }

    #[tokio::test]
    async fn one_forbidden_job_does_not_affect_its_sibling() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::new(tmp.path().join("d"), tmp.path().join("t")).unwrap();
        cfg.use_external_merger = false;
        let cfg = Arc::new(cfg);

        let good = ok_job("abp-933");
        let bad = ok_job("abp-934");

        let key = [7u8; 16];
        let mut iv = [0u8; 16];
        iv[15] = 1; // matches the playlist's EXT-X-KEY IV=0x00...01 below
        let plaintext = b"segment-bytes-16";
        assert_eq!(plaintext.len() % 16, 0);
        let ciphertext = aes_encrypt(plaintext, &key, &iv);

        let mut responses = HashMap::new();
        responses.insert(
            good.hls_url.clone(),
            FetchResponse { status: 200, body: Bytes::from(PLAYLIST) },
        );
        responses.insert(
            "https://cdn.example.com/abp-933/key.bin".to_string(),
            FetchResponse { status: 200, body: Bytes::from(key.to_vec()) },
        );
        responses.insert(
            "https://cdn.example.com/abp-933/abp933-0.ts".to_string(),
            FetchResponse { status: 200, body: Bytes::from(ciphertext) },
        );
        responses.insert(good.cover_url.clone(), FetchResponse { status: 404, body: Bytes::new() });
        responses.insert(bad.hls_url.clone(), FetchResponse { status: 403, body: Bytes::new() });

        let fetcher: Arc<dyn HttpFetcher> = Arc::new(FakeFetcher { responses: Mutex::new(responses) });
        let info_store = Arc::new(DownloadInfoStore::open(cfg.dirs.download_info_path()).unwrap());
        let temp = Arc::new(TempStore::new(cfg.dirs.clone()));

        let results = run_jobs_with_clients(
            cfg,
            fetcher.clone(),
            fetcher,
            info_store,
            temp,
            vec![good, bad],
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        let good_result = results.iter().find(|r| r.job_id == "abp-933").unwrap();
        let bad_result = results.iter().find(|r| r.job_id == "abp-934").unwrap();
        assert!(good_result.result.is_ok(), "good job should finish despite sibling failure: {:?}", good_result.result.as_ref().err());
        assert!(matches!(bad_result.result, Err(EngineError::Forbidden { .. })));
    }
}
