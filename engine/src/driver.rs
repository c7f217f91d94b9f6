//! Job Driver (spec.md §4.7): orchestrates one job end-to-end — playlist,
//! cover, the inventory/wave loop, merge, and temp cleanup.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::client::HttpFetcher;
use crate::config::EngineConfig;
use crate::download_info::DownloadInfoStore;
use crate::error::EngineError;
use crate::fetcher::run_wave;
use crate::inventory::compute_inventory;
use crate::job::{Job, JobStatus};
use crate::merge::{merge_in_process, merge_with_ffmpeg, MergeSegment};
use crate::playlist::fetch_playlist;
use crate::retry::RetryPolicy;
use crate::temp_store::TempStore;

/// Runs one job to completion (or to a terminal `Failed`), driving the
/// Pending → Downloading → Merging → Finished lifecycle of spec.md §3.
#[instrument(skip_all, fields(job_id = %job.id))]
pub async fn run_job(
    cfg: &EngineConfig,
    control_client: Arc<dyn HttpFetcher>,
    segment_client: Arc<dyn HttpFetcher>,
    info_store: Arc<DownloadInfoStore>,
    temp: Arc<TempStore>,
    mut job: Job,
) -> Result<(), EngineError> {
    let id_lower = job.id_lower();
    temp.init_segment_dir(&id_lower)?;

    job.status = JobStatus::Downloading;
    let retry_policy = RetryPolicy {
        max_retries: cfg.max_retries,
        base_delay: cfg.retry_wait_base,
        max_delay: cfg.retry_wait_base * 2u32.saturating_pow(cfg.max_retries.max(1)),
        jitter: false,
    };

    let outcome = fetch_playlist_with_retry(
        control_client.as_ref(),
        cfg,
        &temp,
        &info_store,
        &job,
        &retry_policy,
    )
    .await;

    let mut playlist_outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            job.status = JobStatus::Failed;
            return Err(e);
        }
    };

    download_cover_best_effort(control_client.as_ref(), cfg, &job).await;

    loop {
        let segment_dir = temp.dirs().segment_dir(&id_lower);
        let inventory = compute_inventory(&info_store, &id_lower, &segment_dir, &playlist_outcome.segments)?;
        if inventory.missing.is_empty() {
            break;
        }
        if !inventory.collided_indices.is_empty() {
            warn!(
                job_id = %job.id,
                collided = ?inventory.collided_indices,
                "index collision across historical prefixes, re-fetching those segments"
            );
        }

        let wave_result = run_wave(
            segment_client.clone(),
            temp.clone(),
            id_lower.clone(),
            job.base_url.clone(),
            playlist_outcome.key,
            playlist_outcome.iv,
            inventory.missing,
            cfg.max_concurrent_segments,
            retry_policy.clone(),
        )
        .await;

        match wave_result {
            Ok(wave) if wave.expired => {
                info!(job_id = %job.id, "playlist expired mid-wave, refreshing");
                playlist_outcome = match fetch_playlist_with_retry(
                    control_client.as_ref(),
                    cfg,
                    &temp,
                    &info_store,
                    &job,
                    &retry_policy,
                )
                .await
                {
                    Ok(o) => o,
                    Err(e) => {
                        job.status = JobStatus::Failed;
                        return Err(e);
                    }
                };
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                job.status = JobStatus::Failed;
                return Err(e);
            }
        }
    }

    job.status = JobStatus::Merging;
    let merge_segments: Vec<MergeSegment> = playlist_outcome
        .segments
        .iter()
        .map(|s| MergeSegment {
            path: temp.segment_path(&id_lower, &segment_file_name(&s.uri, s.index)),
        })
        .collect();

    let merge_result = if cfg.use_external_merger {
        merge_with_ffmpeg(cfg, &id_lower, &job.id_upper(), &job.name, &job.actress, &merge_segments).await
    } else {
        merge_in_process(&cfg.dirs, &id_lower, &job.id_upper(), &job.name, &job.actress).await
    };

    let final_path = match merge_result {
        Ok(path) => path,
        Err(e) => {
            job.status = JobStatus::Failed;
            return Err(e);
        }
    };
    info!(job_id = %job.id, output = %final_path.display(), "merge complete");

    job.status = JobStatus::Finished;
    temp.clear(&id_lower)?;
    Ok(())
}

/// Runs the Playlist Fetcher under spec.md §4.5's retry policy: `Forbidden`
/// is terminal immediately; a 404 is retried up to `policy.max_retries`
/// times (counted in `NotFound::attempts`) before becoming terminal
/// (spec.md §6.2: "404 counted separately and raises NotFound after N such
/// responses"); everything else retries with backoff as well.
async fn fetch_playlist_with_retry(
    control_client: &dyn HttpFetcher,
    cfg: &EngineConfig,
    temp: &TempStore,
    info_store: &DownloadInfoStore,
    job: &Job,
    policy: &RetryPolicy,
) -> Result<crate::playlist::PlaylistOutcome, EngineError> {
    crate::retry::retry_with_backoff(
        policy,
        &tokio_util::sync::CancellationToken::new(),
        |attempt| async move {
            match fetch_playlist(control_client, cfg, temp, info_store, job).await {
                Ok(outcome) => crate::retry::RetryAction::Success(outcome),
                Err(e @ EngineError::Forbidden { .. }) => crate::retry::RetryAction::Fail(e),
                Err(EngineError::NotFound { url, .. }) => crate::retry::RetryAction::Retry(
                    EngineError::NotFound { url, attempts: attempt + 1 },
                ),
                Err(e) => crate::retry::RetryAction::Retry(e),
            }
        },
    )
    .await
}

/// Mirrors `Downloader._download_cover`'s bare try/except: a failed cover
/// fetch is logged and the job continues, never a terminal error.
async fn download_cover_best_effort(control_client: &dyn HttpFetcher, cfg: &EngineConfig, job: &Job) {
    if job.cover_url.is_empty() {
        return;
    }
    match control_client.get(&job.cover_url).await {
        Ok(response) if response.is_success() => {
            let path = cfg.dirs.cover_path(&job.id_lower());
            if let Err(e) = tokio::fs::write(&path, &response.body).await {
                warn!(job_id = %job.id, error = %e, "failed to write cover image");
            }
        }
        Ok(response) => {
            warn!(job_id = %job.id, status = response.status, "cover download returned non-success status");
        }
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "cover download failed, continuing without it");
        }
    }
}

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
