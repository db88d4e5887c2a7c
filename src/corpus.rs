//! Enumerates and fetches repository files subject to filter/budget rules,
//! from either a remote Git host or an in-memory archive (C5).

use crate::config::CorpusConfig;
use crate::error::{PipelineError, Result};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One admitted file from the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusFile {
    pub path: String,
    pub content: Vec<u8>,
    pub size: u64,
    pub extension: String,
}

/// Result of a fetch pass: what got in, what didn't, and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionResult {
    pub included: Vec<CorpusFile>,
    pub skipped: Vec<String>,
    pub warnings: Vec<String>,
    pub total_files: usize,
    pub total_bytes: u64,
}

/// Where the corpus comes from.
pub enum CorpusSource {
    Remote { owner: String, repo: String },
    Archive { bytes: Vec<u8> },
}

struct Filters {
    ignored: RegexSet,
    allowed_extensions: Vec<String>,
}

impl Filters {
    fn new(config: &CorpusConfig) -> Result<Self> {
        let ignored = RegexSet::new(
            config
                .ignored_patterns
                .iter()
                .map(|p| format!("(?i){p}")),
        )
        .map_err(|e| PipelineError::Internal(format!("invalid ignored-path pattern: {e}")))?;
        Ok(Self { ignored, allowed_extensions: config.allowed_extensions.clone() })
    }

    fn path_ignored(&self, path: &str) -> bool {
        self.ignored.is_match(path)
    }

    fn extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e.eq_ignore_ascii_case(extension))
    }
}

fn canonical_path(path: &str) -> String {
    path.trim_start_matches('/').replace('\\', "/")
}

fn extension_of(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

/// Fetches a corpus from either GitHub's REST API or an in-memory zip
/// archive, applying the shared filter/budget pipeline.
pub struct CorpusFetcher {
    client: reqwest::Client,
    config: CorpusConfig,
    filters: Filters,
    api_base: String,
}

impl CorpusFetcher {
    pub fn new(config: CorpusConfig) -> Result<Self> {
        let filters = Filters::new(&config)?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            filters,
            api_base: "https://api.github.com".to_string(),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub async fn fetch(&self, source: CorpusSource) -> Result<IngestionResult> {
        match source {
            CorpusSource::Remote { owner, repo } => self.fetch_remote(&owner, &repo).await,
            CorpusSource::Archive { bytes } => self.fetch_archive(&bytes),
        }
    }

    async fn fetch_remote(&self, owner: &str, repo: &str) -> Result<IngestionResult> {
        let branch = self.resolve_default_branch(owner, repo).await?;
        let tree = self.fetch_tree(owner, repo, &branch).await?;

        let mut result = IngestionResult::default();

        for entry in tree.into_iter().filter(|e| e.kind == "blob") {
            let path = canonical_path(&entry.path);

            if self.filters.path_ignored(&path) {
                continue;
            }
            let extension = extension_of(&path);
            if !self.filters.extension_allowed(&extension) {
                continue;
            }
            if let Some(size) = entry.size {
                if size > self.config.max_single_file_bytes {
                    result.warnings.push(format!("{path}: exceeds max single file size"));
                    result.skipped.push(path);
                    continue;
                }
            }
            if result.included.len() >= self.config.max_files {
                result
                    .warnings
                    .push(format!("Reached maximum file limit ({})", self.config.max_files));
                break;
            }
            if result.total_bytes >= self.config.max_total_bytes {
                result.warnings.push("Reached total size limit".to_string());
                break;
            }

            match self.fetch_blob_with_retry(owner, repo, &path).await {
                Ok(content) => {
                    let size = content.len() as u64;
                    result.total_bytes += size;
                    result.total_files += 1;
                    result.included.push(CorpusFile { path, content, size, extension });
                }
                Err(e) => {
                    warn!("failed to fetch {path}: {e}");
                    result.warnings.push(format!("{path}: {e}"));
                    result.skipped.push(path);
                }
            }
        }

        if result.included.is_empty() {
            return Err(PipelineError::validation("ingesting", "no files survived ingestion"));
        }

        Ok(result)
    }

    async fn resolve_default_branch(&self, owner: &str, repo: &str) -> Result<String> {
        let url = format!("{}/repos/{owner}/{repo}", self.api_base);
        let response = self.get(&url).await?;
        if response.status().as_u16() == 404 {
            return Err(PipelineError::NotFound(format!("repository {owner}/{repo} not found")));
        }
        let info: RepoInfo = response.json().await?;
        Ok(info.default_branch)
    }

    async fn fetch_tree(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<TreeEntry>> {
        let url = format!("{}/repos/{owner}/{repo}/git/trees/{branch}?recursive=1", self.api_base);
        let response = self.get(&url).await?;
        if response.status().as_u16() == 403 {
            return Err(PipelineError::UpstreamUnavailable(
                "GitHub API rate limit exceeded".to_string(),
            ));
        }
        let parsed: TreeResponse = response.json().await?;
        Ok(parsed.tree)
    }

    async fn fetch_blob_with_retry(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<u8>> {
        match self.fetch_blob(owner, repo, path).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_retryable() => {
                debug!("retrying fetch of {path} once after transient failure: {e}");
                self.fetch_blob(owner, repo, path).await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_blob(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/repos/{owner}/{repo}/contents/{path}", self.api_base);
        let response = self.get(&url).await?;
        let blob: BlobResponse = response.json().await?;
        if blob.encoding != "base64" {
            return Err(PipelineError::UpstreamUnavailable(format!(
                "unexpected content encoding: {}",
                blob.encoding
            )));
        }
        use base64::Engine;
        let cleaned: String = blob.content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(cleaned)
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("invalid base64 content: {e}")))?;
        Ok(bytes)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url).header("User-Agent", "reposcribe");
        if let Some(token) = &self.config.github_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let duration = Duration::from_secs(self.config.fetch_timeout_secs);
        timeout(duration, request.send())
            .await
            .map_err(|_| PipelineError::transient("corpus_host", "request timed out"))?
            .map_err(|e| PipelineError::transient("corpus_host", e.to_string()))
    }

    fn fetch_archive(&self, bytes: &[u8]) -> Result<IngestionResult> {
        let cursor = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(cursor)
            .map_err(|e| PipelineError::validation("ingesting", format!("invalid archive: {e}")))?;

        let mut result = IngestionResult::default();

        for i in 0..archive.len() {
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    result.warnings.push(format!("archive entry {i}: {e}"));
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }

            let path = canonical_path(entry.name());
            if self.filters.path_ignored(&path) {
                continue;
            }
            let extension = extension_of(&path);
            if !self.filters.extension_allowed(&extension) {
                continue;
            }

            let size = entry.size();
            if size > self.config.max_single_file_bytes {
                result.warnings.push(format!("{path}: exceeds max single file size"));
                result.skipped.push(path);
                continue;
            }
            if result.included.len() >= self.config.max_files {
                result
                    .warnings
                    .push(format!("Reached maximum file limit ({})", self.config.max_files));
                break;
            }
            if result.total_bytes >= self.config.max_total_bytes {
                result.warnings.push("Reached total size limit".to_string());
                break;
            }

            let mut content = Vec::with_capacity(size as usize);
            if let Err(e) = entry.read_to_end(&mut content) {
                result.warnings.push(format!("{path}: {e}"));
                result.skipped.push(path);
                continue;
            }

            result.total_bytes += content.len() as u64;
            result.total_files += 1;
            result.included.push(CorpusFile { path, content, size: size, extension });
        }

        if result.included.is_empty() {
            return Err(PipelineError::validation("ingesting", "no files survived ingestion"));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CorpusConfig {
        CorpusConfig { max_files: 2, max_total_bytes: 1_000_000, ..Default::default() }
    }

    #[test]
    fn canonicalizes_paths() {
        assert_eq!(canonical_path("/src/main.rs"), "src/main.rs");
        assert_eq!(canonical_path("src\\main.rs"), "src/main.rs");
    }

    #[test]
    fn ignored_patterns_reject_build_dirs() {
        let fetcher = CorpusFetcher::new(config()).unwrap();
        assert!(fetcher.filters.path_ignored("node_modules/foo.js"));
        assert!(fetcher.filters.path_ignored("project/.git/HEAD"));
        assert!(!fetcher.filters.path_ignored("src/main.rs"));
    }

    #[test]
    fn extension_whitelist_accepts_source_and_docs() {
        let fetcher = CorpusFetcher::new(config()).unwrap();
        assert!(fetcher.filters.extension_allowed("rs"));
        assert!(fetcher.filters.extension_allowed("md"));
        assert!(!fetcher.filters.extension_allowed("exe"));
    }

    #[test]
    fn archive_mode_respects_file_count_cap() {
        let fetcher = CorpusFetcher::new(config()).unwrap();
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options: zip::write::SimpleFileOptions = Default::default();
            for name in ["a.rs", "b.rs", "c.rs"] {
                writer.start_file(name, options).unwrap();
                std::io::Write::write_all(&mut writer, b"fn main() {}").unwrap();
            }
            writer.finish().unwrap();
        }
        let result = fetcher.fetch_archive(&buf).unwrap();
        assert_eq!(result.included.len(), 2);
        assert!(result.warnings.iter().any(|w| w.contains("maximum file limit")));
    }

    #[test]
    fn archive_mode_fails_on_empty_corpus() {
        let fetcher = CorpusFetcher::new(config()).unwrap();
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let writer = zip::ZipWriter::new(cursor);
            writer.finish().unwrap();
        }
        let err = fetcher.fetch_archive(&buf).unwrap_err();
        assert_eq!(err.category(), "validation_failure");
    }
}
