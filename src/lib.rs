//! RAG-driven documentation pipeline orchestrator.
//!
//! Ingests a repository (from a Git host or an uploaded archive), builds a
//! vector index over its source, and drives an LLM through an
//! outline-then-chapters workflow to produce long-form Markdown
//! documentation, with resumable checkpoints and progress reporting.

pub mod api;
pub mod cache;
pub mod chapter;
pub mod checkpoint;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod embedder;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod orchestrator;
pub mod outline;
pub mod pdf;
pub mod rag;
pub mod vector_index;

pub use api::{create_router, start_server, AppState};
pub use cache::{CacheStats, LlmCache};
pub use chapter::generate as generate_chapter;
pub use checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, CheckpointUpdate};
pub use config::{
    CheckpointConfig, Config, CorpusConfig, EmbeddingConfig, LlmCacheConfig, LlmConfig, OrchestratorConfig, RagConfig,
};
pub use corpus::{CorpusFetcher, CorpusFile, CorpusSource, IngestionResult};
pub use embedder::{EmbeddingClient, HttpEmbeddingClient};
pub use error::{PipelineError, Result};
pub use llm::{ChatMessage, ContentType, HttpLlmClient, LlmClient};
pub use orchestrator::{CancellationToken, GenerationOutput, NullProgressSink, Orchestrator, ProgressSink, ProgressUpdate};
pub use outline::Chapter;
pub use pdf::PdfRenderer;
pub use rag::{RagEngine, Retriever};
pub use vector_index::{Chunk, VectorIndex};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
