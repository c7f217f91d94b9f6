//! Loads the job descriptor file (spec.md §6.1) the CLI is pointed at.

use std::path::Path;

use anyhow::Context;
use hls_dl_engine::Job;

use crate::error::AppError;

/// Reads a JSON array of job descriptors, matching `Job`'s wire format.
///
/// `base_url` is not read from the file — it is re-derived from `hls_url`
/// so a hand-edited descriptor never needs to carry it.
pub fn load_jobs(path: &Path) -> Result<Vec<Job>, AppError> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading job descriptor file {}", path.display()))?;
    let jobs: Vec<Job> = serde_json::from_str(&text)
        .with_context(|| format!("parsing job descriptor file {}", path.display()))?;
    if jobs.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "{} contains no jobs",
            path.display()
        )));
    }
    Ok(jobs.into_iter().map(Job::finish_deserialize).collect())
}
