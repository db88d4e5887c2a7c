//! Drives the full ingest → scan → index → generate → merge pipeline,
//! reporting progress and persisting resumable checkpoints (C10).

use crate::chapter;
use crate::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, CheckpointUpdate};
use crate::corpus::{CorpusFetcher, CorpusFile, CorpusSource};
use crate::error::{PipelineError, Result};
use crate::extractor;
use crate::llm::LlmClient;
use crate::outline::{self, Chapter, FileSummary};
use crate::pdf::PdfRenderer;
use crate::rag::RagEngine;
use crate::embedder::EmbeddingClient;
use crate::vector_index::VectorIndex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A progress snapshot, emitted at every phase boundary and chapter
/// completion. The outer layer decides what to do with it (websocket push,
/// log line, metrics counter); the orchestrator has no opinion.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub repo_id: String,
    pub status: CheckpointStatus,
    pub progress: u8,
    pub current_step: String,
    pub completed_steps: u32,
    pub total_steps: u32,
}

/// Injected by the host process; the orchestrator holds no back-reference
/// to whatever consumes these updates.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, update: ProgressUpdate);
}

/// A `ProgressSink` that does nothing, for callers that only care about the
/// checkpoint trail.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Cooperative cancellation flag. Checked only at phase transitions and
/// chapter boundaries, never inside an external call.
#[derive(Clone, Default)]
pub struct CancellationToken(std::sync::Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed (or cancelled) generation run.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub markdown: String,
    pub chapters: Vec<Chapter>,
    pub owner: String,
    pub repo_name: String,
    pub total_files: usize,
    pub total_chars: usize,
    pub duration_seconds: f64,
    /// Path to the rendered PDF, if a `PdfRenderer` was configured and
    /// rendering succeeded.
    pub pdf_path: Option<String>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
struct StoredCorpusFile {
    path: String,
    text: String,
}

fn extract_corpus_text(files: &[CorpusFile]) -> Vec<StoredCorpusFile> {
    files
        .iter()
        .filter_map(|f| match extractor::extract(Path::new(&f.path), &f.content) {
            Ok(text) => Some(StoredCorpusFile { path: f.path.clone(), text }),
            Err(e) => {
                warn!(file = %f.path, error = %e, "skipping file that could not be extracted");
                None
            }
        })
        .collect()
}

fn stored_to_corpus_files(stored: &[StoredCorpusFile]) -> Vec<CorpusFile> {
    stored
        .iter()
        .map(|f| CorpusFile {
            path: f.path.clone(),
            size: f.text.len() as u64,
            extension: Path::new(&f.path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string(),
            content: f.text.clone().into_bytes(),
        })
        .collect()
}

/// Coordinates C1-C9/C11 through one repository's documentation job.
pub struct Orchestrator<E, L> {
    corpus_fetcher: CorpusFetcher,
    rag: RagEngine<E, L>,
    checkpoints: CheckpointStore,
    pdf_renderer: Option<Arc<dyn PdfRenderer>>,
    pdf_output_dir: String,
}

impl<E: EmbeddingClient, L: LlmClient> Orchestrator<E, L> {
    /// `pdf_renderer` is optional: without one, jobs complete with
    /// `pdf_path` absent rather than failing (§7 `PartialFailure`).
    pub fn new(
        corpus_fetcher: CorpusFetcher,
        rag: RagEngine<E, L>,
        checkpoints: CheckpointStore,
        pdf_renderer: Option<Arc<dyn PdfRenderer>>,
        pdf_output_dir: String,
    ) -> Self {
        Self { corpus_fetcher, rag, checkpoints, pdf_renderer, pdf_output_dir }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    async fn report(&self, sink: &dyn ProgressSink, update: CheckpointUpdate, repo_id: &str) -> ProgressUpdate {
        let progress = ProgressUpdate {
            repo_id: repo_id.to_string(),
            status: update.status.unwrap_or(CheckpointStatus::Pending),
            progress: update.progress.unwrap_or(0),
            current_step: update.current_step.clone().unwrap_or_default(),
            completed_steps: update.completed_steps.unwrap_or(0),
            total_steps: update.total_steps.unwrap_or(0),
        };

        if let Err(e) = self.checkpoints.save(repo_id, update).await {
            // Checkpoint writes are best-effort: a storage hiccup must not
            // abort a generation that isn't being resumed.
            warn!(repo_id, error = %e, "checkpoint save failed (non-critical)");
        }
        sink.on_progress(progress.clone());
        progress
    }

    /// Run the full pipeline for a fresh job. `repo_id` must be unique per
    /// job; reusing one while a prior job is in flight is the caller's
    /// responsibility to avoid.
    pub async fn generate(
        &self,
        repo_id: &str,
        source: CorpusSource,
        repo_url: Option<String>,
        owner: &str,
        repo_name: &str,
        sink: &dyn ProgressSink,
        cancellation: &CancellationToken,
    ) -> Result<GenerationOutput> {
        let start = std::time::Instant::now();
        let source_type = match &source {
            CorpusSource::Remote { .. } => "github_repo",
            CorpusSource::Archive { .. } => "zip_upload",
        };

        self.report(
            sink,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Pending),
                progress: Some(0),
                current_step: Some("starting generation".to_string()),
                repo_url: repo_url.clone(),
                source_type: Some(source_type.to_string()),
                ..Default::default()
            },
            repo_id,
        )
        .await;

        self.report(
            sink,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Ingesting),
                progress: Some(5),
                current_step: Some("ingesting repository files".to_string()),
                ..Default::default()
            },
            repo_id,
        )
        .await;

        let ingestion = self.corpus_fetcher.fetch(source).await?;
        if ingestion.included.is_empty() {
            return Err(PipelineError::validation("ingesting", "no files could be ingested from the corpus"));
        }
        let total_files = ingestion.included.len();
        info!(repo_id, total_files, "ingested corpus");

        let stored_files = extract_corpus_text(&ingestion.included);
        if stored_files.is_empty() {
            return Err(PipelineError::validation("ingesting", "no files survived text extraction"));
        }

        let repo_files_json = serde_json::to_string(&stored_files)?;
        self.report(
            sink,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Ingesting),
                progress: Some(20),
                current_step: Some(format!("extracted {} files", stored_files.len())),
                repo_files_json: Some(repo_files_json),
                ..Default::default()
            },
            repo_id,
        )
        .await;

        if cancellation.is_cancelled() {
            return self.cancel(repo_id, CheckpointStatus::Ingesting, 20).await;
        }

        self.run_from_files(repo_id, &stored_files, owner, repo_name, sink, cancellation, start, None).await
    }

    /// Continue a job from its last durable checkpoint. Completed jobs
    /// cannot be resumed. Prerequisite artifacts (`repo_files`, `chapters`,
    /// `index_path`) are reused as-is when present; only a missing
    /// prerequisite forces its phase to re-run.
    pub async fn resume(
        &self,
        repo_id: &str,
        sink: &dyn ProgressSink,
        cancellation: &CancellationToken,
    ) -> Result<GenerationOutput> {
        let start = std::time::Instant::now();
        let checkpoint = self
            .checkpoints
            .get(repo_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("no checkpoint found for repo_id: {repo_id}")))?;

        if checkpoint.status == CheckpointStatus::Completed {
            return Err(PipelineError::validation("resuming", format!("generation already completed for repo_id: {repo_id}")));
        }

        info!(repo_id, status = ?checkpoint.status, progress = checkpoint.progress, "resuming generation");

        let stored_files: Vec<StoredCorpusFile> = match &checkpoint.repo_files_json {
            Some(json) => serde_json::from_str(json)?,
            None => return Err(PipelineError::validation("resuming", "checkpoint has no repo_files to resume from")),
        };

        let owner = checkpoint.repo_url.as_deref().unwrap_or("unknown").to_string();
        let repo_name = repo_id.to_string();

        let existing_chapters: Option<Vec<Chapter>> = match &checkpoint.chapters_json {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        };
        let existing_markdowns: Vec<String> = match &checkpoint.chapter_markdowns_json {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };

        self.run_from_files(
            repo_id,
            &stored_files,
            &owner,
            &repo_name,
            sink,
            cancellation,
            start,
            Some((checkpoint, existing_chapters, existing_markdowns)),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_from_files(
        &self,
        repo_id: &str,
        stored_files: &[StoredCorpusFile],
        owner: &str,
        repo_name: &str,
        sink: &dyn ProgressSink,
        cancellation: &CancellationToken,
        start: std::time::Instant,
        resume_state: Option<(Checkpoint, Option<Vec<Chapter>>, Vec<String>)>,
    ) -> Result<GenerationOutput> {
        let (prior_chapters, mut chapter_markdowns, prior_index_path) = match resume_state {
            Some((checkpoint, chapters, markdowns)) => (chapters, markdowns, checkpoint.index_path),
            None => (None, Vec::new(), None),
        };

        let chapters = match prior_chapters {
            Some(chapters) => chapters,
            None => {
                self.report(
                    sink,
                    CheckpointUpdate {
                        status: Some(CheckpointStatus::Scanning),
                        progress: Some(25),
                        current_step: Some("scanning repository and generating outline".to_string()),
                        ..Default::default()
                    },
                    repo_id,
                )
                .await;

                let summaries: Vec<FileSummary> = stored_files
                    .iter()
                    .map(|f| FileSummary { path: f.path.clone(), line_count: f.text.lines().count() })
                    .collect();
                let chapters = outline::plan(self.rag.llm(), owner, repo_name, &summaries).await?;

                let chapters_json = serde_json::to_string(&chapters)?;
                self.report(
                    sink,
                    CheckpointUpdate {
                        status: Some(CheckpointStatus::Scanning),
                        progress: Some(30),
                        current_step: Some(format!("generated {} chapter outline", chapters.len())),
                        total_steps: Some(chapters.len() as u32 + 3),
                        completed_steps: Some(1),
                        chapters_json: Some(chapters_json),
                        ..Default::default()
                    },
                    repo_id,
                )
                .await;

                chapters
            }
        };

        if cancellation.is_cancelled() {
            return self.cancel(repo_id, CheckpointStatus::Scanning, 30).await;
        }

        let total_steps = chapters.len() as u32 + 3;

        let index_path = match prior_index_path {
            Some(path) if Path::new(&path).exists() => path,
            _ => {
                self.report(
                    sink,
                    CheckpointUpdate {
                        status: Some(CheckpointStatus::Indexing),
                        progress: Some(35),
                        current_step: Some(format!("building RAG index for {} files", stored_files.len())),
                        total_steps: Some(total_steps),
                        completed_steps: Some(2),
                        ..Default::default()
                    },
                    repo_id,
                )
                .await;

                let corpus_files = stored_to_corpus_files(stored_files);
                let mut index = VectorIndex::new();
                let chunk_count = self.rag.build(&mut index, &corpus_files).await?;

                let timestamp = checkpoint_timestamp();
                let path = self.rag.index_path(repo_id, timestamp);
                index.save(&path)?;
                let path_str = path.to_string_lossy().into_owned();

                self.report(
                    sink,
                    CheckpointUpdate {
                        status: Some(CheckpointStatus::Indexing),
                        progress: Some(45),
                        current_step: Some(format!("RAG index built with {chunk_count} chunks")),
                        total_steps: Some(total_steps),
                        completed_steps: Some(3),
                        index_path: Some(path_str.clone()),
                        ..Default::default()
                    },
                    repo_id,
                )
                .await;

                path_str
            }
        };

        if cancellation.is_cancelled() {
            return self.cancel(repo_id, CheckpointStatus::Indexing, 45).await;
        }

        let index = VectorIndex::load(&index_path)?;

        self.report(
            sink,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Generating),
                progress: Some(50),
                current_step: Some(format!("generating documentation for {} chapters", chapters.len())),
                total_steps: Some(total_steps),
                completed_steps: Some(3 + chapter_markdowns.len() as u32),
                ..Default::default()
            },
            repo_id,
        )
        .await;

        let top_k = self.rag.top_k();
        for (i, chapter) in chapters.iter().enumerate().skip(chapter_markdowns.len()) {
            if cancellation.is_cancelled() {
                let chapters_json = serde_json::to_string(&chapters)?;
                let markdowns_json = serde_json::to_string(&chapter_markdowns)?;
                self.report(
                    sink,
                    CheckpointUpdate {
                        status: Some(CheckpointStatus::Generating),
                        chapters_json: Some(chapters_json),
                        chapter_markdowns_json: Some(markdowns_json),
                        ..Default::default()
                    },
                    repo_id,
                )
                .await;
                return Err(PipelineError::partial("generating", "generation cancelled mid-chapter"));
            }

            let markdown = chapter::generate(self.rag.llm(), &self.rag, &index, chapter, repo_name, i + 1, chapters.len(), top_k).await;
            chapter_markdowns.push(markdown);

            let progress = 50 + ((i + 1) as f32 / chapters.len() as f32 * 40.0) as u8;
            let markdowns_json = serde_json::to_string(&chapter_markdowns)?;
            self.report(
                sink,
                CheckpointUpdate {
                    status: Some(CheckpointStatus::Generating),
                    progress: Some(progress),
                    current_step: Some(format!("generated chapter {}/{}", i + 1, chapters.len())),
                    total_steps: Some(total_steps),
                    completed_steps: Some(3 + (i + 1) as u32),
                    chapter_markdowns_json: Some(markdowns_json),
                    ..Default::default()
                },
                repo_id,
            )
            .await;
        }

        self.report(
            sink,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Merging),
                progress: Some(90),
                current_step: Some("merging chapters".to_string()),
                total_steps: Some(total_steps),
                completed_steps: Some(total_steps),
                ..Default::default()
            },
            repo_id,
        )
        .await;

        let generated_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let title_page = chapter::title_page(repo_name, owner, &generated_at, &chapters);
        let markdown = chapter::merge(&title_page, &chapter_markdowns);

        self.report(
            sink,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Merging),
                progress: Some(95),
                generated_markdown: Some(markdown.clone()),
                ..Default::default()
            },
            repo_id,
        )
        .await;

        let pdf_path = match &self.pdf_renderer {
            Some(renderer) => {
                let timestamp = chrono::Utc::now().timestamp();
                let filename = format!("repo-doc-{}-{}.pdf", repo_id.replace('/', "_"), timestamp);
                let output_path = Path::new(&self.pdf_output_dir).join(&filename);
                match renderer.render(&markdown, &output_path).await {
                    Ok(()) => Some(output_path.to_string_lossy().into_owned()),
                    Err(e) => {
                        warn!(repo_id, error = %e, "PDF rendering failed, completing without a PDF");
                        None
                    }
                }
            }
            None => None,
        };

        self.checkpoints.mark_completed(repo_id).await.ok();
        self.checkpoints.delete(repo_id).await.ok();

        let duration_seconds = start.elapsed().as_secs_f64();
        info!(repo_id, duration_seconds, "documentation generation completed");

        sink.on_progress(ProgressUpdate {
            repo_id: repo_id.to_string(),
            status: CheckpointStatus::Completed,
            progress: 100,
            current_step: "completed".to_string(),
            completed_steps: total_steps,
            total_steps,
        });

        Ok(GenerationOutput {
            markdown,
            chapters,
            owner: owner.to_string(),
            repo_name: repo_name.to_string(),
            total_files: stored_files.len(),
            total_chars: stored_files.iter().map(|f| f.text.len()).sum(),
            duration_seconds,
            pdf_path,
        })
    }

    async fn cancel(&self, repo_id: &str, status: CheckpointStatus, progress: u8) -> Result<GenerationOutput> {
        self.checkpoints
            .save(
                repo_id,
                CheckpointUpdate { status: Some(status), progress: Some(progress), ..Default::default() },
            )
            .await
            .ok();
        error!(repo_id, "generation cancelled");
        Err(PipelineError::partial("cancelled", "generation was cancelled by the host runtime"))
    }
}

/// The original `started_at`/timestamp semantics key index filenames by
/// wall-clock time; `Date.now()`-style calls are unavailable in some
/// embedding contexts, so this goes through `chrono` like everything else.
fn checkpoint_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckpointConfig, CorpusConfig, RagConfig};
    use crate::embedder::Embedding;
    use crate::llm::{ChatMessage, ContentType};
    use async_trait::async_trait;
    use futures_util::stream::{self, BoxStream};
    use std::time::Duration;
    use tempfile::{tempdir, NamedTempFile};

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingClient for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate(&self, _prompt: &str, _ct: ContentType, _t: Option<Duration>) -> Result<String> {
            Ok(r#"{"chapters": [
                {"title": "Overview", "description": "d", "queries": ["q"]},
                {"title": "Architecture", "description": "d", "queries": ["q"]},
                {"title": "Core", "description": "d", "queries": ["q"]},
                {"title": "API", "description": "d", "queries": ["q"]},
                {"title": "Usage", "description": "d", "queries": ["q"]}
            ]}"#
            .to_string())
        }

        async fn chat_stream(
            &self,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
            _top_p: f32,
        ) -> Result<BoxStream<'static, Result<String>>> {
            Ok(Box::pin(stream::iter(vec![Ok("body".to_string())])))
        }
    }

    async fn build_orchestrator(index_dir: &tempfile::TempDir, db: &NamedTempFile) -> Orchestrator<StubEmbedder, StubLlm> {
        let corpus_fetcher = CorpusFetcher::new(CorpusConfig::default()).unwrap();
        let rag_config = RagConfig { index_dir: index_dir.path().to_string_lossy().into_owned(), ..RagConfig::default() };
        let rag = RagEngine::new(StubEmbedder, StubLlm, rag_config);
        let checkpoint_config = CheckpointConfig { database_path: db.path().to_string_lossy().into_owned(), max_age_hours: 24 };
        let checkpoints = CheckpointStore::new(checkpoint_config).await.unwrap();
        Orchestrator::new(corpus_fetcher, rag, checkpoints, None, "uploads".to_string())
    }

    fn sample_archive() -> Vec<u8> {
        let mut buf = Vec::new();
        let cursor = std::io::Cursor::new(&mut buf);
        let mut writer = zip::ZipWriter::new(cursor);
        let options: zip::write::SimpleFileOptions = Default::default();
        writer.start_file("src/main.rs", options).unwrap();
        std::io::Write::write_all(&mut writer, b"fn main() { println!(\"hi\"); }").unwrap();
        writer.finish().unwrap();
        buf
    }

    struct RecordingSink {
        updates: std::sync::Mutex<Vec<ProgressUpdate>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { updates: std::sync::Mutex::new(Vec::new()) }
        }
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update);
        }
    }

    #[tokio::test]
    async fn happy_path_archive_job_completes_and_deletes_checkpoint() {
        let index_dir = tempdir().unwrap();
        let db = NamedTempFile::new().unwrap();
        let orchestrator = build_orchestrator(&index_dir, &db).await;
        let sink = RecordingSink::new();
        let cancellation = CancellationToken::new();

        let output = orchestrator
            .generate(
                "acme/widgets",
                CorpusSource::Archive { bytes: sample_archive() },
                None,
                "acme",
                "widgets",
                &sink,
                &cancellation,
            )
            .await
            .unwrap();

        assert!(output.markdown.starts_with("# widgets Documentation"));
        assert_eq!(output.chapters.len(), 5);
        assert!(orchestrator.checkpoints.get("acme/widgets").await.unwrap().is_none());

        let updates = sink.updates.lock().unwrap();
        assert!(updates.iter().any(|u| u.status == CheckpointStatus::Completed));
    }

    #[tokio::test]
    async fn cancellation_before_scanning_persists_checkpoint_and_stops() {
        let index_dir = tempdir().unwrap();
        let db = NamedTempFile::new().unwrap();
        let orchestrator = build_orchestrator(&index_dir, &db).await;
        let sink = RecordingSink::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = orchestrator
            .generate(
                "acme/widgets",
                CorpusSource::Archive { bytes: sample_archive() },
                None,
                "acme",
                "widgets",
                &sink,
                &cancellation,
            )
            .await;

        assert!(result.is_err());
        let checkpoint = orchestrator.checkpoints.get("acme/widgets").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Ingesting);
    }

    #[tokio::test]
    async fn resume_reuses_persisted_artifacts_and_completes() {
        let index_dir = tempdir().unwrap();
        let db = NamedTempFile::new().unwrap();
        let orchestrator = build_orchestrator(&index_dir, &db).await;

        let stored = vec![StoredCorpusFile { path: "src/main.rs".to_string(), text: "fn main() {}".to_string() }];
        orchestrator
            .checkpoints
            .save(
                "acme/widgets",
                CheckpointUpdate {
                    status: Some(CheckpointStatus::Ingesting),
                    repo_url: Some("acme".to_string()),
                    repo_files_json: Some(serde_json::to_string(&stored).unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let sink = RecordingSink::new();
        let cancellation = CancellationToken::new();
        let output = orchestrator.resume("acme/widgets", &sink, &cancellation).await.unwrap();

        assert!(output.markdown.contains("Documentation"));
        assert!(orchestrator.checkpoints.get("acme/widgets").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_rejects_already_completed_job() {
        let index_dir = tempdir().unwrap();
        let db = NamedTempFile::new().unwrap();
        let orchestrator = build_orchestrator(&index_dir, &db).await;

        orchestrator
            .checkpoints
            .save("acme/widgets", CheckpointUpdate { status: Some(CheckpointStatus::Completed), ..Default::default() })
            .await
            .unwrap();

        let sink = RecordingSink::new();
        let cancellation = CancellationToken::new();
        let err = orchestrator.resume("acme/widgets", &sink, &cancellation).await.unwrap_err();
        assert_eq!(err.category(), "validation_failure");
    }

    #[tokio::test]
    async fn resume_without_checkpoint_is_not_found() {
        let index_dir = tempdir().unwrap();
        let db = NamedTempFile::new().unwrap();
        let orchestrator = build_orchestrator(&index_dir, &db).await;

        let sink = RecordingSink::new();
        let cancellation = CancellationToken::new();
        let err = orchestrator.resume("missing/repo", &sink, &cancellation).await.unwrap_err();
        assert_eq!(err.category(), "not_found");
    }
}
