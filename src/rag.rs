//! Ties the chunker, embedder, and vector index together into index builds
//! and multi-tier retrieval, plus LLM-backed question answering (C6).

use crate::chunker;
use crate::config::RagConfig;
use crate::corpus::CorpusFile;
use crate::embedder::EmbeddingClient;
use crate::error::{PipelineError, Result};
use crate::llm::{ChatMessage, ContentType, LlmClient};
use crate::vector_index::{Chunk, VectorIndex};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Narrow retrieval-only view of a [`RagEngine`], so the chapter generator
/// can depend on retrieval without also depending on the LLM collaborator
/// type parameter.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, index: &VectorIndex, queries: &[String], top_k: usize) -> Result<Vec<Chunk>>;
}

#[async_trait]
impl<E: EmbeddingClient, L: LlmClient> Retriever for RagEngine<E, L> {
    async fn retrieve(&self, index: &VectorIndex, queries: &[String], top_k: usize) -> Result<Vec<Chunk>> {
        self.query(index, queries, top_k).await
    }
}

const GENERIC_QUERY_WORDS: &[&str] = &[
    "hi", "hello", "hey", "what", "who", "when", "where", "why", "how", "thanks", "thank", "ok",
    "okay", "help",
];

const SMALL_INDEX_DISTINCT_FILES: usize = 3;
const GENERIC_QUERY_MAX_WORDS: usize = 5;

fn is_generic_query(query: &str) -> bool {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.len() <= GENERIC_QUERY_MAX_WORDS {
        return true;
    }
    words
        .iter()
        .any(|w| GENERIC_QUERY_WORDS.contains(&w.to_lowercase().trim_matches(|c: char| !c.is_alphanumeric())))
}

/// The ordered retrieval fallback policy from §4.6: each tier is tried in
/// order until one yields at least one chunk.
enum Tier {
    Normal,
    LowThreshold,
    ZeroThreshold,
    HeadOfIndex,
}

impl Tier {
    fn all() -> [Tier; 4] {
        [Tier::Normal, Tier::LowThreshold, Tier::ZeroThreshold, Tier::HeadOfIndex]
    }

    fn run(&self, index: &VectorIndex, query_vec: &[f32], query: &str, top_k: usize) -> Option<Vec<(usize, f32, f32)>> {
        match self {
            Tier::Normal => {
                let small_index = index.distinct_file_count() <= SMALL_INDEX_DISTINCT_FILES;
                let min_similarity = if small_index || is_generic_query(query) { 0.0 } else { 0.2 };
                let results = index.search(query_vec, top_k, min_similarity);
                (!results.is_empty()).then_some(results)
            }
            Tier::LowThreshold => {
                let results = index.search(query_vec, top_k, 0.1);
                (!results.is_empty()).then_some(results)
            }
            Tier::ZeroThreshold => {
                let results = index.search(query_vec, top_k, 0.0);
                (!results.is_empty()).then_some(results)
            }
            Tier::HeadOfIndex => {
                let head: Vec<(usize, f32, f32)> = index
                    .metadata()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !c.text.trim().is_empty())
                    .take(top_k)
                    .map(|(i, _)| (i, 0.0, 0.0))
                    .collect();
                if head.is_empty() {
                    None
                } else {
                    Some(head)
                }
            }
        }
    }
}

/// Result of a query: the retrieved chunks plus an estimate of whether the
/// normal-tier threshold was satisfied (used only for logging/diagnostics).
pub struct RagEngine<E, L> {
    embedder: E,
    llm: L,
    config: RagConfig,
}

impl<E: EmbeddingClient, L: LlmClient> RagEngine<E, L> {
    pub fn new(embedder: E, llm: L, config: RagConfig) -> Self {
        Self { embedder, llm, config }
    }

    pub fn index_path(&self, repo_id: &str, timestamp: i64) -> PathBuf {
        Path::new(&self.config.index_dir).join(format!("{repo_id}_{timestamp}.index"))
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    /// Chunk, embed, and add every corpus file's content to `index`,
    /// assigning `chunk_id`s starting at the index's current length.
    pub async fn build(&self, index: &mut VectorIndex, corpus: &[CorpusFile]) -> Result<usize> {
        let mut chunk_offset = index.len();
        let mut added = 0usize;

        for file in corpus {
            let text = match std::str::from_utf8(&file.content) {
                Ok(s) => s.to_string(),
                Err(_) => String::from_utf8_lossy(&file.content).into_owned(),
            };
            let pieces: Vec<String> = chunker::chunk(&text, self.config.chunk_size_words, self.config.overlap_words)
                .into_iter()
                .filter(|c| !c.trim().is_empty())
                .collect();

            if pieces.is_empty() {
                continue;
            }

            let embeddings = self.embedder.embed(&pieces).await?;
            if embeddings.len() != pieces.len() {
                return Err(PipelineError::Internal(format!(
                    "embedder returned {} vectors for {} chunks in {}",
                    embeddings.len(),
                    pieces.len(),
                    file.path
                )));
            }

            let filename = Path::new(&file.path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&file.path)
                .to_string();

            let metadata: Vec<Chunk> = pieces
                .iter()
                .enumerate()
                .map(|(i, text)| Chunk {
                    chunk_id: chunk_offset + i,
                    text: text.clone(),
                    file_path: file.path.clone(),
                    filename: filename.clone(),
                    chunk_index: i,
                })
                .collect();

            chunk_offset += pieces.len();
            added += pieces.len();
            index.add(embeddings, metadata)?;
            debug!(file = %file.path, chunks = pieces.len(), "indexed file");
        }

        if added == 0 {
            return Err(PipelineError::validation("indexing", "no chunks were produced from the corpus"));
        }

        info!(chunks_added = added, total = index.len(), "vector index build complete");
        Ok(added)
    }

    /// Embed each query, retrieve via the tier fallback policy, and
    /// accumulate distinct chunk positions across queries in order of first
    /// appearance.
    pub async fn query(&self, index: &VectorIndex, queries: &[String], top_k: usize) -> Result<Vec<Chunk>> {
        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();

        for query in queries {
            let query_vec = self
                .embedder
                .embed(std::slice::from_ref(query))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| PipelineError::Internal("query embedding produced no vector".to_string()))?;

            let results = Tier::all()
                .iter()
                .find_map(|tier| tier.run(index, &query_vec, query, top_k));

            let Some(results) = results else {
                return Err(PipelineError::validation("retrieving", "index has no chunks to retrieve"));
            };

            for (idx, _, _) in results {
                if seen.insert(idx) {
                    if let Some(chunk) = index.metadata().get(idx) {
                        ordered.push(chunk.clone());
                    }
                }
            }
        }

        Ok(ordered)
    }

    /// Answer a question conversationally. Inlines context directly when it
    /// fits the configured token budget; otherwise performs multipart
    /// synthesis (batch non-streaming answers, then one streaming synthesis
    /// pass).
    pub async fn ask(
        &self,
        index: &VectorIndex,
        question: &str,
        system_prompt: &str,
        temperature: f32,
        top_p: f32,
        top_k: usize,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let chunks = self.query(index, std::slice::from_ref(&question.to_string()), top_k).await?;
        let context = render_context(&chunks);

        let estimated_tokens = estimate_tokens(&format!("{system_prompt}{context}{question}"));
        if estimated_tokens <= self.config.max_ctx_tokens {
            let messages = vec![
                ChatMessage::system(format!("{system_prompt}\n\nContext:\n{context}")),
                ChatMessage::user(question.to_string()),
            ];
            return self.llm.chat_stream(messages, temperature, top_p).await;
        }

        info!(estimated_tokens, "question exceeds context budget, using multipart synthesis");
        let batches = partition_chunks(&chunks, self.config.max_ctx_tokens);
        let total = batches.len();
        let mut partials = Vec::with_capacity(total);

        for (i, batch) in batches.iter().enumerate() {
            let batch_context = render_context(batch);
            let prompt = format!(
                "{system_prompt}\n\nPart {} of {}.\n\nContext:\n{batch_context}\n\nQuestion: {question}\nAnswer using only this part of the context.",
                i + 1,
                total
            );
            let answer = self.llm.generate(&prompt, ContentType::Text, None).await?;
            partials.push(answer);
        }

        let synthesis_prompt = format!(
            "{system_prompt}\n\nYou were given these partial answers to \"{question}\", each drawn from a different part of the context:\n\n{}\n\nProduce a single coherent answer with no redundancy and no reference to \"parts\".",
            partials
                .iter()
                .enumerate()
                .map(|(i, p)| format!("Partial answer {}:\n{p}", i + 1))
                .collect::<Vec<_>>()
                .join("\n\n")
        );
        let messages = vec![ChatMessage::system(synthesis_prompt), ChatMessage::user(question.to_string())];
        self.llm.chat_stream(messages, temperature, top_p).await
    }
}

fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

fn render_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[{}] {}", c.chunk_id, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split chunks into batches that each fit within `budget_tokens` once
/// rendered, accounting for per-batch prompt overhead.
fn partition_chunks(chunks: &[Chunk], budget_tokens: usize) -> Vec<Vec<Chunk>> {
    const OVERHEAD_TOKENS: usize = 300;
    let usable = budget_tokens.saturating_sub(OVERHEAD_TOKENS).max(200);

    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_tokens = 0usize;

    for chunk in chunks {
        let chunk_tokens = estimate_tokens(&chunk.text);
        if current_tokens + chunk_tokens > usable && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += chunk_tokens;
        current.push(chunk.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    if batches.is_empty() {
        batches.push(Vec::new());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedding;
    use async_trait::async_trait;
    use futures_util::stream::iter;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingClient for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 0.0]).collect())
        }
    }

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate(&self, _prompt: &str, _ct: ContentType, _t: Option<std::time::Duration>) -> Result<String> {
            Ok("partial answer".to_string())
        }

        async fn chat_stream(
            &self,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
            _top_p: f32,
        ) -> Result<BoxStream<'static, Result<String>>> {
            Ok(iter(vec![Ok("final".to_string())]).boxed())
        }
    }

    fn sample_index() -> VectorIndex {
        VectorIndex::build(
            vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0]],
            vec![
                Chunk { chunk_id: 0, text: "alpha content".into(), file_path: "a.rs".into(), filename: "a.rs".into(), chunk_index: 0 },
                Chunk { chunk_id: 1, text: "beta content".into(), file_path: "b.rs".into(), filename: "b.rs".into(), chunk_index: 0 },
                Chunk { chunk_id: 2, text: "gamma content".into(), file_path: "c.rs".into(), filename: "c.rs".into(), chunk_index: 0 },
            ],
        )
        .unwrap()
    }

    fn engine() -> RagEngine<StubEmbedder, StubLlm> {
        RagEngine::new(StubEmbedder, StubLlm, RagConfig { max_ctx_tokens: 5000, ..Default::default() })
    }

    #[test]
    fn generic_query_detection_flags_short_and_greeting_queries() {
        assert!(is_generic_query("hello"));
        assert!(is_generic_query("what does this module do in general terms today"));
        assert!(!is_generic_query("explain the checkpoint merge semantics precisely"));
    }

    #[tokio::test]
    async fn query_falls_back_through_tiers_on_small_index() {
        let index = sample_index();
        let eng = engine();
        let results = eng.query(&index, &["xyz".to_string()], 2).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 2);
    }

    #[tokio::test]
    async fn query_deduplicates_across_multiple_queries() {
        let index = sample_index();
        let eng = engine();
        let results = eng
            .query(&index, &["alpha".to_string(), "alpha again".to_string()], 3)
            .await
            .unwrap();
        let ids: std::collections::HashSet<_> = results.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids.len(), results.len());
    }

    #[test]
    fn partition_chunks_respects_budget() {
        let chunks: Vec<Chunk> = (0..5)
            .map(|i| Chunk {
                chunk_id: i,
                text: "word ".repeat(400),
                file_path: "f.rs".into(),
                filename: "f.rs".into(),
                chunk_index: i,
            })
            .collect();
        let batches = partition_chunks(&chunks, 600);
        assert!(batches.len() > 1);
    }

    #[tokio::test]
    async fn ask_uses_multipart_synthesis_when_over_budget() {
        let index = sample_index();
        let eng = RagEngine::new(StubEmbedder, StubLlm, RagConfig { max_ctx_tokens: 1, ..Default::default() });
        let mut stream = eng.ask(&index, "explain", "system", 0.2, 0.95, 2).await.unwrap();
        let mut out = String::new();
        while let Some(piece) = stream.next().await {
            out.push_str(&piece.unwrap());
        }
        assert_eq!(out, "final");
    }
}
