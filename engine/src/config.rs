//! Explicitly constructed engine configuration (spec.md §9, "Global mutable
//! config" redesign flag). No process-wide lazy state: everything a job
//! needs is threaded through constructors from one `EngineConfig` value.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `C_job`: max concurrently-running Job Drivers (default 2).
    pub max_concurrent_jobs: usize,
    /// `C_ts`: max in-flight segment GETs per job (default 5).
    pub max_concurrent_segments: usize,
    /// `R`/`N`: retry attempts for segment/key/playlist fetches (default 3).
    pub max_retries: u32,
    /// Base for exponential backoff: `base * 2^k` seconds.
    pub retry_wait_base: Duration,
    /// Per-request timeout for playlist/key/cover GETs (suggested 10s).
    pub control_timeout: Duration,
    /// Per-request timeout for segment GETs.
    pub segment_timeout: Duration,
    /// Headers applied to every outgoing request.
    pub headers: HeaderMap,
    /// Optional single HTTP proxy URL.
    pub proxy: Option<String>,
    /// Directory layout roots (spec.md §6.4).
    pub dirs: DirLayout,
    /// Whether to merge via the external concat tool (ffmpeg) or the
    /// in-process streaming backend.
    pub use_external_merger: bool,
    /// Path to the external merge tool binary.
    pub merge_tool: String,
}

impl EngineConfig {
    /// Construct with the given roots, creating every subdirectory eagerly
    /// (spec.md §6.4), matching `Config._create_dir` in the original.
    pub fn new(
        download_dir: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let dirs = DirLayout::new(download_dir.into(), tmp_dir.into());
        dirs.create_all()?;
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );
        Ok(Self {
            max_concurrent_jobs: 2,
            max_concurrent_segments: 5,
            max_retries: 3,
            retry_wait_base: Duration::from_secs(5),
            control_timeout: Duration::from_secs(10),
            segment_timeout: Duration::from_secs(30),
            headers,
            proxy: None,
            dirs,
            use_external_merger: true,
            merge_tool: "ffmpeg".to_string(),
        })
    }

    /// The single setter the captcha solver (an external collaborator) hands
    /// updated cookies back through, per spec.md §9's redesign note.
    pub fn set_cookie(&mut self, cookie: &str) {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            self.headers.insert(reqwest::header::COOKIE, value);
        }
    }
}

/// Concrete on-disk sub-paths derived from the configured roots
/// (spec.md §3 Temp artifacts table, §6.4 On-disk layout).
#[derive(Debug, Clone)]
pub struct DirLayout {
    pub download_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub video_dir: PathBuf,
    pub cover_dir: PathBuf,
    pub tmp_m3u8_dir: PathBuf,
    pub tmp_key_dir: PathBuf,
    pub tmp_iv_dir: PathBuf,
    pub tmp_ts_dir: PathBuf,
}

impl DirLayout {
    pub fn new(download_dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self {
            video_dir: download_dir.join("video"),
            cover_dir: download_dir.join("cover"),
            tmp_m3u8_dir: tmp_dir.join("m3u8"),
            tmp_key_dir: tmp_dir.join("key"),
            tmp_iv_dir: tmp_dir.join("iv"),
            tmp_ts_dir: tmp_dir.join("ts"),
            download_dir,
            tmp_dir,
        }
    }

    pub fn create_all(&self) -> std::io::Result<()> {
        for dir in [
            &self.download_dir,
            &self.tmp_dir,
            &self.video_dir,
            &self.cover_dir,
            &self.tmp_m3u8_dir,
            &self.tmp_key_dir,
            &self.tmp_iv_dir,
            &self.tmp_ts_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn download_info_path(&self) -> PathBuf {
        self.download_dir.join("download_info.json")
    }

    pub fn playlist_path(&self, id_lower: &str) -> PathBuf {
        self.tmp_m3u8_dir.join(format!("{id_lower}.m3u8"))
    }

    pub fn key_path(&self, id_lower: &str) -> PathBuf {
        self.tmp_key_dir.join(format!("{id_lower}.key"))
    }

    pub fn iv_path(&self, id_lower: &str) -> PathBuf {
        self.tmp_iv_dir.join(format!("{id_lower}.iv"))
    }

    pub fn segment_dir(&self, id_lower: &str) -> PathBuf {
        self.tmp_ts_dir.join(id_lower)
    }

    pub fn merge_list_path(&self, id_lower: &str) -> PathBuf {
        self.tmp_dir.join(format!("{id_lower}.txt"))
    }

    pub fn video_output_path(&self, id_lower: &str) -> PathBuf {
        self.video_dir.join(format!("{id_lower}.mp4"))
    }

    pub fn final_video_path(&self, id_upper: &str, name: &str, actress: &str) -> PathBuf {
        self.video_dir
            .join(format!("{id_upper} {name} {actress}.mp4"))
    }

    pub fn cover_path(&self, id_lower: &str) -> PathBuf {
        self.cover_dir.join(format!("{id_lower}.jpg"))
    }
}
