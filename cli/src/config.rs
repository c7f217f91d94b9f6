//! TOML configuration file, mapped onto `hls_dl_engine::EngineConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use hls_dl_engine::EngineConfig;
use reqwest::header::HeaderValue;
use serde::Deserialize;

use crate::error::AppError;

/// On-disk shape of the CLI's `conf/config.toml` (spec.md §6.4: `./conf/`).
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_max_concurrent_segments")]
    pub max_concurrent_segments: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_wait_base_secs")]
    pub retry_wait_base_secs: u64,
    #[serde(default = "default_control_timeout_secs")]
    pub control_timeout_secs: u64,
    #[serde(default = "default_segment_timeout_secs")]
    pub segment_timeout_secs: u64,

    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_use_external_merger")]
    pub use_external_merger: bool,
    #[serde(default = "default_merge_tool")]
    pub merge_tool: String,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}
fn default_tmp_dir() -> PathBuf {
    PathBuf::from("./tmp")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_max_concurrent_jobs() -> usize {
    2
}
fn default_max_concurrent_segments() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_wait_base_secs() -> u64 {
    5
}
fn default_control_timeout_secs() -> u64 {
    10
}
fn default_segment_timeout_secs() -> u64 {
    30
}
fn default_use_external_merger() -> bool {
    true
}
fn default_merge_tool() -> String {
    "ffmpeg".to_string()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            tmp_dir: default_tmp_dir(),
            log_dir: default_log_dir(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_concurrent_segments: default_max_concurrent_segments(),
            max_retries: default_max_retries(),
            retry_wait_base_secs: default_retry_wait_base_secs(),
            control_timeout_secs: default_control_timeout_secs(),
            segment_timeout_secs: default_segment_timeout_secs(),
            proxy: None,
            cookie: None,
            user_agent: None,
            use_external_merger: default_use_external_merger(),
            merge_tool: default_merge_tool(),
        }
    }
}

impl FileConfig {
    /// Reads and parses `path`, or falls back to defaults when it is absent
    /// so a fresh checkout can run without a config file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let parsed = toml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?;
                Ok(parsed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Builds the engine's runtime config, creating the download/tmp
    /// directory tree eagerly (`EngineConfig::new`'s contract).
    pub fn into_engine_config(self) -> Result<EngineConfig, AppError> {
        let download_dir = self.download_dir.clone();
        let tmp_dir = self.tmp_dir.clone();
        let mut cfg = EngineConfig::new(self.download_dir, self.tmp_dir).with_context(|| {
            format!(
                "creating download/tmp directories ({}, {})",
                download_dir.display(),
                tmp_dir.display()
            )
        })?;
        cfg.max_concurrent_jobs = self.max_concurrent_jobs;
        cfg.max_concurrent_segments = self.max_concurrent_segments;
        cfg.max_retries = self.max_retries;
        cfg.retry_wait_base = Duration::from_secs(self.retry_wait_base_secs);
        cfg.control_timeout = Duration::from_secs(self.control_timeout_secs);
        cfg.segment_timeout = Duration::from_secs(self.segment_timeout_secs);
        cfg.proxy = self.proxy;
        cfg.use_external_merger = self.use_external_merger;
        cfg.merge_tool = self.merge_tool;

        if let Some(ua) = &self.user_agent {
            if let Ok(value) = HeaderValue::from_str(ua) {
                cfg.headers.insert(reqwest::header::USER_AGENT, value);
            }
        }
        if let Some(cookie) = &self.cookie {
            cfg.set_cookie(cookie);
        }
        Ok(cfg)
    }
}
