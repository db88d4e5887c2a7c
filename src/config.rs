//! Configuration for the documentation pipeline.
//!
//! A single [`Config`] value is constructed once at process start and passed
//! explicitly into every component constructor. Nothing in the pipeline
//! reads configuration from a global.

use serde::{Deserialize, Serialize};

/// Top-level configuration, composed of one section per external
/// collaborator or subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub corpus: CorpusConfig,
    pub rag: RagConfig,
    pub checkpoint: CheckpointConfig,
    pub orchestrator: OrchestratorConfig,
}

/// LLM endpoint configuration (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL, e.g. `http://localhost:1234/v1`.
    pub base_url: String,

    /// Explicit model id. If empty, the client uses whatever the endpoint
    /// defaults to.
    #[serde(default)]
    pub model: String,

    /// Request timeout for non-streaming calls, in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for a single chapter-generation call, in seconds.
    #[serde(default = "default_chapter_timeout_secs")]
    pub chapter_timeout_secs: u64,

    pub cache: LlmCacheConfig,
}

fn default_llm_timeout_secs() -> u64 {
    3600
}

fn default_chapter_timeout_secs() -> u64 {
    45 * 60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: String::new(),
            timeout_secs: default_llm_timeout_secs(),
            chapter_timeout_secs: default_chapter_timeout_secs(),
            cache: LlmCacheConfig::default(),
        }
    }
}

/// LLM response cache configuration, shared by [`LlmConfig`] and the cache
/// module so there is exactly one definition of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database path for the cache (shared with the checkpoint store).
    #[serde(default = "default_cache_db_path")]
    pub database_path: String,

    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: i64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Responses are only cached below this temperature, since higher
    /// temperatures are intentionally non-deterministic.
    #[serde(default = "default_cache_temperature_threshold")]
    pub min_temperature_threshold: f32,
}

fn default_true() -> bool {
    true
}

fn default_cache_db_path() -> String {
    "reposcribe.sqlite".to_string()
}

fn default_cache_ttl_seconds() -> i64 {
    60 * 60 * 24 * 7
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_cache_temperature_threshold() -> f32 {
    0.3
}

impl Default for LlmCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: default_cache_db_path(),
            ttl_seconds: default_cache_ttl_seconds(),
            max_entries: default_cache_max_entries(),
            min_temperature_threshold: default_cache_temperature_threshold(),
        }
    }
}

/// Embedding endpoint configuration (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_embed_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: String::new(),
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Corpus acquisition configuration (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,

    #[serde(default = "default_max_single_file_bytes")]
    pub max_single_file_bytes: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// GitHub token used for rate-limit relief. Optional.
    #[serde(default)]
    pub github_token: Option<String>,

    /// Extension whitelist, without the leading dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Ignored-path regex fragments, combined with OR and matched
    /// case-insensitively against the full file path.
    #[serde(default = "default_ignored_patterns")]
    pub ignored_patterns: Vec<String>,
}

fn default_max_files() -> usize {
    100
}

fn default_max_total_bytes() -> u64 {
    200_000
}

fn default_max_single_file_bytes() -> u64 {
    200_000
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "py", "js", "jsx", "ts", "tsx", "java", "kt", "dart", "go", "rs", "cpp", "c", "h", "cs",
        "html", "css", "md", "txt", "json", "yaml", "yml", "xml", "pdf", "doc", "docx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignored_patterns() -> Vec<String> {
    [
        "node_modules",
        r"\.git",
        "dist",
        "build",
        r"\.next",
        "venv",
        "__pycache__",
        r"\.env",
        r"\.DS_Store",
        r"\.idea",
        r"\.vscode",
        r"\.pytest_cache",
        r"\.mypy_cache",
        r"\.tox",
        r"\.cache",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_total_bytes: default_max_total_bytes(),
            max_single_file_bytes: default_max_single_file_bytes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            github_token: None,
            allowed_extensions: default_allowed_extensions(),
            ignored_patterns: default_ignored_patterns(),
        }
    }
}

/// RAG pipeline configuration (C1/C3/C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_chunk_size_words")]
    pub chunk_size_words: usize,

    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Token budget below which a query is answered with a single streaming
    /// call; above it, multipart synthesis is used.
    #[serde(default = "default_max_ctx_tokens")]
    pub max_ctx_tokens: usize,

    /// Directory under which `<repo_id>_<timestamp>.index` files and their
    /// `.meta.json` sidecars are written.
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
}

fn default_chunk_size_words() -> usize {
    500
}

fn default_overlap_words() -> usize {
    100
}

fn default_top_k() -> usize {
    5
}

fn default_max_ctx_tokens() -> usize {
    5000
}

fn default_index_dir() -> String {
    "data/rag_indices".to_string()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size_words: default_chunk_size_words(),
            overlap_words: default_overlap_words(),
            top_k: default_top_k(),
            max_ctx_tokens: default_max_ctx_tokens(),
            index_dir: default_index_dir(),
        }
    }
}

/// Checkpoint store configuration (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_cache_db_path")]
    pub database_path: String,

    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
}

fn default_max_age_hours() -> i64 {
    24
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            database_path: default_cache_db_path(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

/// Orchestrator-level configuration (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_content_preview")]
    pub max_content_preview_bytes: usize,

    /// Directory the PDF renderer (when configured) is asked to write
    /// `repo-doc-<repo_id>-<timestamp>.pdf` into during the merge phase.
    #[serde(default = "default_pdf_output_dir")]
    pub pdf_output_dir: String,
}

fn default_max_content_preview() -> usize {
    200_000
}

fn default_pdf_output_dir() -> String {
    "uploads".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_content_preview_bytes: default_max_content_preview(),
            pdf_output_dir: default_pdf_output_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML/YAML/JSON file, selected by extension.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("unsupported config file format")),
        };
        Ok(config)
    }

    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configuration that would make a component impossible to
    /// construct correctly, before any component is built.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.base_url.starts_with("http") {
            return Err(anyhow::anyhow!("invalid LLM base URL: {}", self.llm.base_url));
        }
        if !self.embedding.base_url.starts_with("http") {
            return Err(anyhow::anyhow!(
                "invalid embedding base URL: {}",
                self.embedding.base_url
            ));
        }
        if self.rag.chunk_size_words == 0 {
            return Err(anyhow::anyhow!("chunk_size_words must be greater than 0"));
        }
        if self.rag.top_k == 0 {
            return Err(anyhow::anyhow!("top_k must be greater than 0"));
        }
        if self.corpus.max_files == 0 {
            return Err(anyhow::anyhow!("max_files must be greater than 0"));
        }
        if self.corpus.max_total_bytes == 0 {
            return Err(anyhow::anyhow!("max_total_bytes must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rag.chunk_size_words, 500);
        assert_eq!(config.rag.overlap_words, 100);
    }

    #[test]
    fn rejects_zero_top_k() {
        let mut config = Config::default();
        config.rag.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_llm_url() {
        let mut config = Config::default();
        config.llm.base_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn ignored_patterns_cover_common_build_dirs() {
        let config = CorpusConfig::default();
        assert!(config.ignored_patterns.iter().any(|p| p.contains("node_modules")));
        assert!(config.ignored_patterns.iter().any(|p| p.contains("git")));
    }
}
