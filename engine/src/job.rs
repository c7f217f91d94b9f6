//! Job descriptor and status (spec.md §3, §6.1).

use serde::{Deserialize, Serialize};

/// Derives the base URL: the playlist URL with its final path segment
/// removed, trailing slash preserved.
fn derive_base_url(hls_url: &str) -> String {
    match hls_url.rsplit_once('/') {
        Some((prefix, _last)) => format!("{prefix}/"),
        None => hls_url.to_string(),
    }
}

/// A single (playlist URL, id) pair whose outcome is one output container.
///
/// Equality and hashing are structural over `{id, name, actress, hls_url,
/// cover_url, src}`, matching `DownloadPackage.__hash__`/`__eq__` in the
/// original implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub actress: String,
    pub hash_tag: Vec<String>,
    pub hls_url: String,
    pub cover_url: String,
    #[serde(default = "default_src")]
    pub src: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub has_chinese: bool,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub time_length: Option<String>,

    /// Derived; not part of the wire format. Re-derived on load and on
    /// `update_playlist_url`.
    #[serde(skip, default)]
    pub base_url: String,
}

fn default_src() -> String {
    "Unknown".to_string()
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        actress: impl Into<String>,
        hash_tag: Vec<String>,
        hls_url: impl Into<String>,
        cover_url: impl Into<String>,
        src: impl Into<String>,
    ) -> Self {
        let hls_url = hls_url.into();
        let base_url = derive_base_url(&hls_url);
        Self {
            id: id.into(),
            name: name.into(),
            actress: actress.into(),
            hash_tag,
            hls_url,
            cover_url: cover_url.into(),
            src: src.into(),
            status: JobStatus::Pending,
            has_chinese: false,
            release_date: None,
            time_length: None,
            base_url,
        }
    }

    /// Job id, lowercased — the key used for every on-disk artifact path.
    pub fn id_lower(&self) -> String {
        self.id.to_lowercase()
    }

    /// Job id, uppercased — used in the final output filename (spec.md §6.5).
    pub fn id_upper(&self) -> String {
        self.id.to_uppercase()
    }

    /// The only mutation path besides `status`: re-derives `base_url` from
    /// the new playlist URL, matching `DownloadPackage.update` in the
    /// original Python.
    pub fn update_playlist_url(&mut self, new_hls_url: impl Into<String>) {
        self.hls_url = new_hls_url.into();
        self.base_url = derive_base_url(&self.hls_url);
    }

    /// Ensures `base_url` reflects the current `hls_url`. Call this after
    /// deserializing a `Job` from JSON, since `base_url` is not part of the
    /// wire format.
    pub fn finish_deserialize(mut self) -> Self {
        self.base_url = derive_base_url(&self.hls_url);
        self
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.actress == other.actress
            && self.hls_url == other.hls_url
            && self.cover_url == other.cover_url
            && self.src == other.src
    }
}
impl Eq for Job {}

impl std::hash::Hash for Job {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.name.hash(state);
        self.actress.hash(state);
        self.hls_url.hash(state);
        self.cover_url.hash(state);
        self.src.hash(state);
    }
}

/// Linear lifecycle, except `Failed` is terminal from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Downloading,
    Merging,
    Finished,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_last_segment_keeping_trailing_slash() {
        let job = Job::new(
            "ABP-933",
            "n",
            "a",
            vec![],
            "https://cdn.example.com/videos/abp933/playlist.m3u8",
            "https://cdn.example.com/cover.jpg",
            "jab",
        );
        assert_eq!(job.base_url, "https://cdn.example.com/videos/abp933/");
    }

    #[test]
    fn update_playlist_url_rederives_base_url() {
        let mut job = Job::new(
            "ABP-933",
            "n",
            "a",
            vec![],
            "https://old.example.com/a/playlist.m3u8",
            "https://old.example.com/cover.jpg",
            "jab",
        );
        job.update_playlist_url("https://new.example.com/b/c/playlist2.m3u8");
        assert_eq!(job.base_url, "https://new.example.com/b/c/");
        assert_eq!(job.hls_url, "https://new.example.com/b/c/playlist2.m3u8");
    }

    #[test]
    fn equality_is_structural_over_named_fields() {
        let mut a = Job::new("abp-933", "n", "a", vec![], "u/p.m3u8", "c", "jab");
        let b = Job::new("abp-933", "n", "a", vec![], "u/p.m3u8", "c", "jab");
        assert_eq!(a, b);
        a.status = JobStatus::Finished;
        assert_eq!(a, b, "status must not affect equality");
    }

    #[test]
    fn id_case_helpers() {
        let job = Job::new("Abp-933", "n", "a", vec![], "u/p.m3u8", "c", "jab");
        assert_eq!(job.id_lower(), "abp-933");
        assert_eq!(job.id_upper(), "ABP-933");
    }
}
