//! Produces a chapter plan for a repository by asking the LLM for a JSON
//! outline, falling back to heading parsing and finally a canned default
//! (C7).

use crate::error::Result;
use crate::llm::{ContentType, LlmClient};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use utoipa::ToSchema;

/// One planned chapter: what to write about and what to retrieve for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Chapter {
    pub title: String,
    pub description: String,
    pub retrieval_queries: Vec<String>,
}

const MAX_SUMMARY_FILES: usize = 50;
const SCAN_TIMEOUT_SECS: u64 = 300;

/// One entry of the file summary fed to the planner: path plus line count.
pub struct FileSummary {
    pub path: String,
    pub line_count: usize,
}

fn build_file_summary(files: &[FileSummary]) -> String {
    let mut parts: Vec<String> = files
        .iter()
        .take(MAX_SUMMARY_FILES)
        .map(|f| format!("- {} ({} lines)", f.path, f.line_count))
        .collect();
    if files.len() > MAX_SUMMARY_FILES {
        parts.push(format!("\n... and {} more files", files.len() - MAX_SUMMARY_FILES));
    }
    parts.join("\n")
}

fn build_outline_prompt(owner: &str, repo_name: &str, file_summary: &str, file_count: usize) -> String {
    format!(
        r#"Analyze this repository and generate a comprehensive documentation outline.

REPOSITORY: {owner}/{repo_name}
TOTAL FILES: {file_count}

FILE STRUCTURE:
{file_summary}

TASK: Generate a documentation outline with chapters and retrieval queries.

OUTPUT FORMAT (JSON structure):
{{
  "chapters": [
    {{
      "title": "Chapter Title",
      "description": "What this chapter covers",
      "queries": ["query 1", "query 2", "query 3"]
    }}
  ]
}}

REQUIREMENTS:
1. Create 5-10 logical chapters covering overview, architecture, core components,
   API/interfaces, configuration, usage, testing, and deployment as applicable.
2. For each chapter, provide 3-5 retrieval queries specific enough to find relevant
   code chunks (concepts, functions, classes, or patterns).
3. Base chapters on the actual file structure and content.

OUTPUT ONLY the JSON structure, no markdown formatting or explanations."#
    )
}

/// Ask the LLM for an outline and parse its response into a chapter plan.
/// Always returns between 5 and 12 chapters.
pub async fn plan<L: LlmClient>(
    llm: &L,
    owner: &str,
    repo_name: &str,
    files: &[FileSummary],
) -> Result<Vec<Chapter>> {
    let summary = build_file_summary(files);
    let prompt = build_outline_prompt(owner, repo_name, &summary, files.len());

    let outline_text = llm
        .generate(&prompt, ContentType::Text, Some(Duration::from_secs(SCAN_TIMEOUT_SECS)))
        .await?;

    let chapters = parse_outline(&outline_text);
    Ok(clamp_chapters(chapters))
}

fn json_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\"chapters\".*\}").unwrap())
}

#[derive(Debug, Deserialize)]
struct OutlineDoc {
    #[serde(default)]
    chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Deserialize)]
struct OutlineChapter {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    queries: Vec<String>,
}

fn default_title() -> String {
    "Untitled".to_string()
}

fn parse_outline(text: &str) -> Vec<Chapter> {
    if let Some(chapters) = parse_json_outline(text) {
        if !chapters.is_empty() {
            return chapters;
        }
    }

    let chapters = parse_markdown_outline(text);
    if !chapters.is_empty() {
        return chapters;
    }

    default_outline()
}

fn parse_json_outline(text: &str) -> Option<Vec<Chapter>> {
    let candidate = json_block_re().find(text)?.as_str();
    let doc: OutlineDoc = serde_json::from_str(candidate).ok()?;
    Some(
        doc.chapters
            .into_iter()
            .map(|c| Chapter { title: c.title, description: c.description, retrieval_queries: c.queries })
            .collect(),
    )
}

fn parse_markdown_outline(text: &str) -> Vec<Chapter> {
    let mut chapters = Vec::new();
    let mut current: Option<Chapter> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("##") && !line.starts_with("###") {
            if let Some(chapter) = current.take() {
                chapters.push(chapter);
            }
            let title = line.trim_start_matches('#').trim().to_string();
            current = Some(Chapter { title, description: String::new(), retrieval_queries: Vec::new() });
            continue;
        }

        let Some(chapter) = current.as_mut() else { continue };

        if let Some(query) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
            let query = query.trim().to_string();
            if !query.is_empty() {
                chapter.retrieval_queries.push(query);
            }
        } else if !line.starts_with('#') {
            if chapter.description.is_empty() {
                chapter.description = line.to_string();
            } else {
                chapter.description.push(' ');
                chapter.description.push_str(line);
            }
        }
    }

    if let Some(chapter) = current {
        chapters.push(chapter);
    }
    chapters
}

fn default_outline() -> Vec<Chapter> {
    vec![
        Chapter {
            title: "Overview".to_string(),
            description: "Repository overview and introduction".to_string(),
            retrieval_queries: vec![
                "repository structure".to_string(),
                "main entry point".to_string(),
                "README".to_string(),
            ],
        },
        Chapter {
            title: "Architecture".to_string(),
            description: "System architecture and design".to_string(),
            retrieval_queries: vec![
                "architecture".to_string(),
                "design patterns".to_string(),
                "system structure".to_string(),
            ],
        },
        Chapter {
            title: "Core Components".to_string(),
            description: "Main components and modules".to_string(),
            retrieval_queries: vec![
                "main components".to_string(),
                "core modules".to_string(),
                "key classes".to_string(),
            ],
        },
        Chapter {
            title: "API Reference".to_string(),
            description: "API endpoints and interfaces".to_string(),
            retrieval_queries: vec!["API routes".to_string(), "endpoints".to_string(), "interfaces".to_string()],
        },
        Chapter {
            title: "Usage Examples".to_string(),
            description: "Usage examples and tutorials".to_string(),
            retrieval_queries: vec![
                "usage examples".to_string(),
                "how to use".to_string(),
                "tutorial".to_string(),
            ],
        },
    ]
}

/// Keep the chapter count within the `5..=12` contract and ensure every
/// chapter carries at least one retrieval query.
fn clamp_chapters(mut chapters: Vec<Chapter>) -> Vec<Chapter> {
    for chapter in &mut chapters {
        if chapter.retrieval_queries.is_empty() {
            chapter.retrieval_queries.push(chapter.title.clone());
        } else if chapter.retrieval_queries.len() > 5 {
            chapter.retrieval_queries.truncate(5);
        }
    }

    if chapters.len() < 5 {
        return default_outline();
    }
    if chapters.len() > 12 {
        chapters.truncate(12);
    }
    chapters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_json_outline() {
        let text = r#"{"chapters": [
            {"title": "Intro", "description": "d", "queries": ["a", "b"]},
            {"title": "Arch", "description": "d2", "queries": ["c"]}
        ]}"#;
        let chapters = parse_outline(text);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Intro");
    }

    #[test]
    fn falls_back_to_markdown_headings_when_json_invalid() {
        let text = "## Overview\nThis covers the basics.\n- main entry point\n- README\n\n## Architecture\nDesign overview.\n- design patterns";
        let chapters = parse_outline(text);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Overview");
        assert!(chapters[0].retrieval_queries.contains(&"main entry point".to_string()));
    }

    #[test]
    fn falls_back_to_default_when_nothing_parses() {
        let chapters = parse_outline("no structure here at all");
        assert_eq!(chapters.len(), 5);
    }

    #[test]
    fn clamp_enforces_chapter_count_bounds() {
        let too_few = vec![Chapter { title: "Only one".to_string(), description: String::new(), retrieval_queries: vec![] }];
        assert_eq!(clamp_chapters(too_few).len(), 5);

        let many: Vec<Chapter> = (0..20)
            .map(|i| Chapter { title: format!("Chapter {i}"), description: String::new(), retrieval_queries: vec!["q".to_string()] })
            .collect();
        assert_eq!(clamp_chapters(many).len(), 12);
    }

    #[test]
    fn clamp_fills_in_a_query_when_missing() {
        let chapters = vec![
            Chapter { title: "A".to_string(), description: String::new(), retrieval_queries: vec![] },
            Chapter { title: "B".to_string(), description: String::new(), retrieval_queries: vec!["x".to_string()] },
            Chapter { title: "C".to_string(), description: String::new(), retrieval_queries: vec![] },
            Chapter { title: "D".to_string(), description: String::new(), retrieval_queries: vec![] },
            Chapter { title: "E".to_string(), description: String::new(), retrieval_queries: vec![] },
        ];
        let clamped = clamp_chapters(chapters);
        assert!(clamped.iter().all(|c| !c.retrieval_queries.is_empty()));
    }

    #[test]
    fn file_summary_elides_beyond_fifty_files() {
        let files: Vec<FileSummary> = (0..60).map(|i| FileSummary { path: format!("f{i}.rs"), line_count: 10 }).collect();
        let summary = build_file_summary(&files);
        assert!(summary.contains("and 10 more files"));
    }
}
