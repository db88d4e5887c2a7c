//! Generates one documentation chapter at a time from retrieved context
//! (C8).

use crate::error::Result;
use crate::llm::{ContentType, LlmClient};
use crate::outline::Chapter;
use crate::rag::Retriever;
use crate::vector_index::{Chunk, VectorIndex};
use std::time::Duration;
use tracing::{error, info, warn};

fn render_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("**File:** `{}`\n\n{}\n\n---\n", c.file_path, c.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_chapter_prompt(chapter: &Chapter, context: &str, repo_name: &str, chapter_number: usize, total_chapters: usize) -> String {
    format!(
        r#"Generate comprehensive documentation for the following chapter.

CHAPTER: {title} ({chapter_number} of {total_chapters})
DESCRIPTION: {description}

REPOSITORY: {repo_name}

CONTEXT (relevant code chunks retrieved from the repository):
{context}

TASK: Write a detailed, professional documentation chapter covering:
- {description}
- All relevant code examples and explanations
- Clear structure with subsections
- Code blocks with proper syntax highlighting
- Practical examples where applicable

REQUIREMENTS:
- Use proper markdown formatting
- Include code examples from the context
- Be thorough but concise
- Maintain professional technical writing style
- Do not invent information beyond what the context supports

OUTPUT: Complete markdown chapter content starting with ## {title}"#,
        title = chapter.title,
        description = chapter.description,
    )
}

fn ensure_heading(markdown: String, title: &str) -> String {
    if markdown.trim_start().starts_with('#') {
        markdown
    } else {
        format!("## {title}\n\n{markdown}")
    }
}

fn error_stub(title: &str, message: &str) -> String {
    format!("## {title}\n\n*Error generating content: {message}*\n")
}

fn empty_stub(title: &str) -> String {
    format!("## {title}\n\n*No relevant content found for this chapter.*\n")
}

/// Retrieve context for `chapter` and ask the LLM to write it. Retrieval
/// failures fall back to arbitrary chunks from the index; LLM failures
/// degrade to an error stub rather than failing the whole job.
pub async fn generate<L, R>(
    llm: &L,
    retriever: &R,
    index: &VectorIndex,
    chapter: &Chapter,
    repo_name: &str,
    chapter_number: usize,
    total_chapters: usize,
    top_k: usize,
) -> String
where
    L: LlmClient,
    R: Retriever,
{
    info!(chapter = %chapter.title, chapter_number, total_chapters, "generating chapter");

    let mut chunks = match retriever.retrieve(index, &chapter.retrieval_queries, top_k).await {
        Ok(chunks) if !chunks.is_empty() => chunks,
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!(chapter = %chapter.title, error = %e, "retrieval failed, falling back to arbitrary chunks");
            Vec::new()
        }
    };

    if chunks.is_empty() {
        warn!(chapter = %chapter.title, "no chunks retrieved, falling back to arbitrary index chunks");
        chunks = index.metadata().iter().take(top_k).cloned().collect();
    }

    if chunks.is_empty() {
        return empty_stub(&chapter.title);
    }

    let context = render_context(&chunks);
    let prompt = build_chapter_prompt(chapter, &context, repo_name, chapter_number, total_chapters);

    match llm.generate(&prompt, ContentType::Code, Some(Duration::from_secs(45 * 60))).await {
        Ok(markdown) => ensure_heading(markdown, &chapter.title),
        Err(e) => {
            error!(chapter = %chapter.title, error = %e, "chapter generation failed, emitting stub");
            error_stub(&chapter.title, &e.to_string())
        }
    }
}

/// Render a title page with a table of contents, matching the contract that
/// the final markdown begins with `# <repo> Documentation`.
pub fn title_page(repo_name: &str, owner: &str, generated_at: &str, chapters: &[Chapter]) -> String {
    let mut page = format!(
        "# {repo_name} Documentation\n\n**Repository:** {owner}/{repo_name}  \n**Generated:** {generated_at}\n\n---\n\n## Table of Contents\n\n"
    );
    for (i, chapter) in chapters.iter().enumerate() {
        let anchor = chapter.title.to_lowercase().replace(' ', "-");
        page.push_str(&format!("{}. [{}](#{anchor})\n", i + 1, chapter.title));
    }
    page.push_str("\n---\n\n");
    page
}

/// Concatenate the title page and every chapter's markdown.
pub fn merge(title_page: &str, chapters: &[String]) -> String {
    format!("{title_page}{}", chapters.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;

    struct StubLlm {
        response: Result<String>,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate(&self, _prompt: &str, _ct: ContentType, _t: Option<Duration>) -> Result<String> {
            match &self.response {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(clone_err(e)),
            }
        }

        async fn chat_stream(
            &self,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
            _top_p: f32,
        ) -> Result<BoxStream<'static, Result<String>>> {
            unimplemented!("not exercised in these tests")
        }
    }

    fn clone_err(e: &crate::error::PipelineError) -> crate::error::PipelineError {
        crate::error::PipelineError::Internal(e.to_string())
    }

    struct StubRetriever {
        chunks: Result<Vec<Chunk>>,
    }

    #[async_trait]
    impl Retriever for StubRetriever {
        async fn retrieve(&self, _index: &VectorIndex, _queries: &[String], _top_k: usize) -> Result<Vec<Chunk>> {
            match &self.chunks {
                Ok(chunks) => Ok(chunks.clone()),
                Err(e) => Err(clone_err(e)),
            }
        }
    }

    fn sample_chapter() -> Chapter {
        Chapter {
            title: "Overview".to_string(),
            description: "High-level tour".to_string(),
            retrieval_queries: vec!["overview".to_string()],
        }
    }

    fn sample_chunk() -> Chunk {
        Chunk { chunk_id: 0, text: "fn main() {}".into(), file_path: "src/main.rs".into(), filename: "main.rs".into(), chunk_index: 0 }
    }

    #[tokio::test]
    async fn prepends_heading_when_llm_omits_one() {
        let llm = StubLlm { response: Ok("Just body text.".to_string()) };
        let index = VectorIndex::new();
        let chapter = sample_chapter();
        let retriever = StubRetriever { chunks: Ok(vec![sample_chunk()]) };
        let markdown = generate(&llm, &retriever, &index, &chapter, "acme", 1, 3, 5).await;
        assert!(markdown.starts_with("## Overview"));
    }

    #[tokio::test]
    async fn keeps_existing_heading_untouched() {
        let llm = StubLlm { response: Ok("## Overview\n\nBody.".to_string()) };
        let index = VectorIndex::new();
        let chapter = sample_chapter();
        let retriever = StubRetriever { chunks: Ok(vec![sample_chunk()]) };
        let markdown = generate(&llm, &retriever, &index, &chapter, "acme", 1, 3, 5).await;
        assert_eq!(markdown, "## Overview\n\nBody.");
    }

    #[tokio::test]
    async fn emits_stub_on_llm_error() {
        let llm = StubLlm { response: Err(crate::error::PipelineError::UpstreamUnavailable("model not loaded".to_string())) };
        let index = VectorIndex::new();
        let chapter = sample_chapter();
        let retriever = StubRetriever { chunks: Ok(vec![sample_chunk()]) };
        let markdown = generate(&llm, &retriever, &index, &chapter, "acme", 1, 3, 5).await;
        assert!(markdown.contains("Error generating content"));
        assert!(markdown.starts_with("## Overview"));
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_to_index_chunks() {
        let llm = StubLlm { response: Ok("## Overview\n\nBody.".to_string()) };
        let chunk = sample_chunk();
        let index = VectorIndex::build(vec![vec![1.0]], vec![chunk]).unwrap();
        let chapter = sample_chapter();
        let retriever = StubRetriever { chunks: Ok(vec![]) };
        let markdown = generate(&llm, &retriever, &index, &chapter, "acme", 1, 3, 5).await;
        assert!(markdown.starts_with("## Overview"));
    }

    #[tokio::test]
    async fn empty_index_and_empty_retrieval_yields_no_content_stub() {
        let llm = StubLlm { response: Ok("unused".to_string()) };
        let index = VectorIndex::new();
        let chapter = sample_chapter();
        let retriever = StubRetriever { chunks: Ok(vec![]) };
        let markdown = generate(&llm, &retriever, &index, &chapter, "acme", 1, 3, 5).await;
        assert!(markdown.contains("No relevant content found"));
    }

    #[test]
    fn title_page_starts_with_documentation_heading() {
        let page = title_page("tool", "acme", "2026-07-28 00:00:00", &[sample_chapter()]);
        assert!(page.starts_with("# tool Documentation"));
        assert!(page.contains("Overview"));
    }

    #[test]
    fn merge_joins_chapters_with_blank_line() {
        let merged = merge("# Title\n\n", &["## A\n\nbody".to_string(), "## B\n\nbody".to_string()]);
        assert!(merged.contains("## A"));
        assert!(merged.contains("## B"));
    }
}
