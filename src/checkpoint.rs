//! Durable job state for resumable documentation generation (C9).
//!
//! A checkpoint is keyed by `repo_id` and updated with field-level-merge
//! semantics: a save only overwrites the fields that were actually
//! provided, so an early-phase save (status/progress) never clobbers a
//! later-phase result (e.g. `generated_markdown`) that hasn't happened yet.

use crate::config::CheckpointConfig;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Ingesting,
    Scanning,
    Indexing,
    Generating,
    Merging,
    Completed,
    Failed,
}

impl CheckpointStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ingesting => "ingesting",
            Self::Scanning => "scanning",
            Self::Indexing => "indexing",
            Self::Generating => "generating",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "ingesting" => Self::Ingesting,
            "scanning" => Self::Scanning,
            "indexing" => Self::Indexing,
            "generating" => Self::Generating,
            "merging" => Self::Merging,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Statuses a resume sweep should pick up; `Completed`/`Failed` are terminal.
    fn is_incomplete(&self) -> bool {
        !matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of a generation job's durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub repo_id: String,
    pub repo_url: Option<String>,
    pub source_type: String,
    pub status: CheckpointStatus,
    pub progress: u8,
    pub current_step: String,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub index_path: Option<String>,
    /// JSON-serialized `Vec<CorpusFile>`, saved after ingestion so a resume
    /// can skip re-fetching the corpus.
    pub repo_files_json: Option<String>,
    /// JSON-serialized `Vec<outline::Chapter>`, saved after outline
    /// planning so a resume can skip re-planning.
    pub chapters_json: Option<String>,
    /// JSON-serialized `Vec<String>`, one rendered chapter per completed
    /// entry, in chapter order; grows as chapters finish.
    pub chapter_markdowns_json: Option<String>,
    pub generated_markdown: Option<String>,
    pub pdf_path: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Fields to merge into an existing checkpoint, or to seed a new one.
/// `None` means "leave unchanged" (or "absent" on first insert), never
/// "clear".
#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub repo_url: Option<String>,
    pub source_type: Option<String>,
    pub status: Option<CheckpointStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub completed_steps: Option<u32>,
    pub total_steps: Option<u32>,
    pub index_path: Option<String>,
    pub repo_files_json: Option<String>,
    pub chapters_json: Option<String>,
    pub chapter_markdowns_json: Option<String>,
    pub generated_markdown: Option<String>,
    pub pdf_path: Option<String>,
    pub error: Option<String>,
}

/// SQLite-backed checkpoint store.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
    config: CheckpointConfig,
}

impl CheckpointStore {
    pub async fn new(config: CheckpointConfig) -> Result<Self> {
        info!("initializing checkpoint store at: {}", config.database_path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.database_path))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generation_checkpoints (
                repo_id TEXT PRIMARY KEY,
                repo_url TEXT,
                source_type TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL,
                current_step TEXT NOT NULL,
                completed_steps INTEGER NOT NULL,
                total_steps INTEGER NOT NULL,
                index_path TEXT,
                repo_files_json TEXT,
                chapters_json TEXT,
                chapter_markdowns_json TEXT,
                generated_markdown TEXT,
                pdf_path TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_status_updated \
             ON generation_checkpoints(status, last_updated)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, config })
    }

    /// Insert a new checkpoint or merge `update` into an existing one.
    /// `started_at` is set only the first time a `repo_id` is seen.
    pub async fn save(&self, repo_id: &str, update: CheckpointUpdate) -> Result<()> {
        let now = Utc::now();
        let existing = self.get(repo_id).await?;

        let merged = match existing {
            Some(mut checkpoint) => {
                if let Some(v) = update.repo_url {
                    checkpoint.repo_url = Some(v);
                }
                if let Some(v) = update.source_type {
                    checkpoint.source_type = v;
                }
                if let Some(v) = update.status {
                    checkpoint.status = v;
                }
                if let Some(v) = update.progress {
                    checkpoint.progress = v;
                }
                if let Some(v) = update.current_step {
                    checkpoint.current_step = v;
                }
                if let Some(v) = update.completed_steps {
                    checkpoint.completed_steps = v;
                }
                if let Some(v) = update.total_steps {
                    checkpoint.total_steps = v;
                }
                if let Some(v) = update.index_path {
                    checkpoint.index_path = Some(v);
                }
                if let Some(v) = update.repo_files_json {
                    checkpoint.repo_files_json = Some(v);
                }
                if let Some(v) = update.chapters_json {
                    checkpoint.chapters_json = Some(v);
                }
                if let Some(v) = update.chapter_markdowns_json {
                    checkpoint.chapter_markdowns_json = Some(v);
                }
                if let Some(v) = update.generated_markdown {
                    checkpoint.generated_markdown = Some(v);
                }
                if let Some(v) = update.pdf_path {
                    checkpoint.pdf_path = Some(v);
                }
                if let Some(v) = update.error {
                    checkpoint.error = Some(v);
                }
                checkpoint.last_updated = now;
                checkpoint
            }
            None => Checkpoint {
                repo_id: repo_id.to_string(),
                repo_url: update.repo_url,
                source_type: update.source_type.unwrap_or_else(|| "github_repo".to_string()),
                status: update.status.unwrap_or(CheckpointStatus::Pending),
                progress: update.progress.unwrap_or(0),
                current_step: update.current_step.unwrap_or_default(),
                completed_steps: update.completed_steps.unwrap_or(0),
                total_steps: update.total_steps.unwrap_or(0),
                index_path: update.index_path,
                repo_files_json: update.repo_files_json,
                chapters_json: update.chapters_json,
                chapter_markdowns_json: update.chapter_markdowns_json,
                generated_markdown: update.generated_markdown,
                pdf_path: update.pdf_path,
                error: update.error,
                started_at: now,
                last_updated: now,
            },
        };

        sqlx::query(
            r#"
            INSERT INTO generation_checkpoints (
                repo_id, repo_url, source_type, status, progress, current_step,
                completed_steps, total_steps, index_path, repo_files_json,
                chapters_json, chapter_markdowns_json, generated_markdown,
                pdf_path, error, started_at, last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_id) DO UPDATE SET
                repo_url = excluded.repo_url,
                source_type = excluded.source_type,
                status = excluded.status,
                progress = excluded.progress,
                current_step = excluded.current_step,
                completed_steps = excluded.completed_steps,
                total_steps = excluded.total_steps,
                index_path = excluded.index_path,
                repo_files_json = excluded.repo_files_json,
                chapters_json = excluded.chapters_json,
                chapter_markdowns_json = excluded.chapter_markdowns_json,
                generated_markdown = excluded.generated_markdown,
                pdf_path = excluded.pdf_path,
                error = excluded.error,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&merged.repo_id)
        .bind(&merged.repo_url)
        .bind(&merged.source_type)
        .bind(merged.status.as_str())
        .bind(merged.progress as i64)
        .bind(&merged.current_step)
        .bind(merged.completed_steps as i64)
        .bind(merged.total_steps as i64)
        .bind(&merged.index_path)
        .bind(&merged.repo_files_json)
        .bind(&merged.chapters_json)
        .bind(&merged.chapter_markdowns_json)
        .bind(&merged.generated_markdown)
        .bind(&merged.pdf_path)
        .bind(&merged.error)
        .bind(merged.started_at.to_rfc3339())
        .bind(merged.last_updated.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(repo_id, status = %merged.status.as_str(), progress = merged.progress, "checkpoint saved");
        Ok(())
    }

    pub async fn get(&self, repo_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT repo_id, repo_url, source_type, status, progress, current_step,
                   completed_steps, total_steps, index_path, repo_files_json,
                   chapters_json, chapter_markdowns_json, generated_markdown,
                   pdf_path, error, started_at, last_updated
            FROM generation_checkpoints
            WHERE repo_id = ?
            "#,
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_checkpoint(&r)))
    }

    /// Checkpoints still in flight, most recently updated first, within
    /// `max_age_hours` of the configured limit.
    pub async fn list_incomplete(&self, limit: i64) -> Result<Vec<Checkpoint>> {
        let cutoff = Utc::now() - Duration::hours(self.config.max_age_hours);

        let rows = sqlx::query(
            r#"
            SELECT repo_id, repo_url, source_type, status, progress, current_step,
                   completed_steps, total_steps, index_path, repo_files_json,
                   chapters_json, chapter_markdowns_json, generated_markdown,
                   pdf_path, error, started_at, last_updated
            FROM generation_checkpoints
            WHERE last_updated >= ?
            ORDER BY last_updated DESC
            LIMIT ?
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let checkpoints: Vec<Checkpoint> = rows
            .iter()
            .map(row_to_checkpoint)
            .filter(|c| c.status.is_incomplete())
            .collect();

        info!(count = checkpoints.len(), "found incomplete generations");
        Ok(checkpoints)
    }

    pub async fn mark_completed(&self, repo_id: &str) -> Result<()> {
        self.save(
            repo_id,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Completed),
                progress: Some(100),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn mark_failed(&self, repo_id: &str, error: String) -> Result<()> {
        self.save(
            repo_id,
            CheckpointUpdate {
                status: Some(CheckpointStatus::Failed),
                error: Some(error),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete(&self, repo_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM generation_checkpoints WHERE repo_id = ?")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Checkpoint {
    let started_at: String = row.get("started_at");
    let last_updated: String = row.get("last_updated");
    let status: String = row.get("status");
    let progress: i64 = row.get("progress");
    let completed_steps: i64 = row.get("completed_steps");
    let total_steps: i64 = row.get("total_steps");

    Checkpoint {
        repo_id: row.get("repo_id"),
        repo_url: row.get("repo_url"),
        source_type: row.get("source_type"),
        status: CheckpointStatus::from_str(&status),
        progress: progress as u8,
        current_step: row.get("current_step"),
        completed_steps: completed_steps as u32,
        total_steps: total_steps as u32,
        index_path: row.get("index_path"),
        repo_files_json: row.get("repo_files_json"),
        chapters_json: row.get("chapters_json"),
        chapter_markdowns_json: row.get("chapter_markdowns_json"),
        generated_markdown: row.get("generated_markdown"),
        pdf_path: row.get("pdf_path"),
        error: row.get("error"),
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn store() -> CheckpointStore {
        let temp_file = NamedTempFile::new().unwrap();
        let database_path = temp_file.path().to_str().unwrap().to_string();
        CheckpointStore::new(CheckpointConfig { database_path, max_age_hours: 24 })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_sets_started_at_only_once() {
        let store = store().await;
        store
            .save(
                "acme/widgets",
                CheckpointUpdate { status: Some(CheckpointStatus::Ingesting), progress: Some(5), ..Default::default() },
            )
            .await
            .unwrap();
        let first = store.get("acme/widgets").await.unwrap().unwrap();

        store
            .save(
                "acme/widgets",
                CheckpointUpdate { status: Some(CheckpointStatus::Scanning), progress: Some(20), ..Default::default() },
            )
            .await
            .unwrap();
        let second = store.get("acme/widgets").await.unwrap().unwrap();

        assert_eq!(first.started_at, second.started_at);
        assert_eq!(second.status, CheckpointStatus::Scanning);
        assert_eq!(second.progress, 20);
    }

    #[tokio::test]
    async fn save_only_overwrites_provided_fields() {
        let store = store().await;
        store
            .save(
                "acme/widgets",
                CheckpointUpdate {
                    status: Some(CheckpointStatus::Generating),
                    generated_markdown: Some("# draft".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .save(
                "acme/widgets",
                CheckpointUpdate { status: Some(CheckpointStatus::Merging), ..Default::default() },
            )
            .await
            .unwrap();

        let checkpoint = store.get("acme/widgets").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Merging);
        assert_eq!(checkpoint.generated_markdown, Some("# draft".to_string()));
    }

    #[tokio::test]
    async fn list_incomplete_excludes_completed_and_failed() {
        let store = store().await;
        store
            .save("done", CheckpointUpdate { status: Some(CheckpointStatus::Completed), ..Default::default() })
            .await
            .unwrap();
        store
            .save("broken", CheckpointUpdate { status: Some(CheckpointStatus::Failed), ..Default::default() })
            .await
            .unwrap();
        store
            .save("in-flight", CheckpointUpdate { status: Some(CheckpointStatus::Generating), ..Default::default() })
            .await
            .unwrap();

        let incomplete = store.list_incomplete(10).await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].repo_id, "in-flight");
    }

    #[tokio::test]
    async fn mark_completed_sets_full_progress() {
        let store = store().await;
        store
            .save("acme/widgets", CheckpointUpdate { status: Some(CheckpointStatus::Generating), ..Default::default() })
            .await
            .unwrap();
        store.mark_completed("acme/widgets").await.unwrap();

        let checkpoint = store.get("acme/widgets").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.progress, 100);
    }

    #[tokio::test]
    async fn delete_removes_the_checkpoint() {
        let store = store().await;
        store.save("acme/widgets", CheckpointUpdate::default()).await.unwrap();
        assert!(store.delete("acme/widgets").await.unwrap());
        assert!(store.get("acme/widgets").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_failed_records_the_error() {
        let store = store().await;
        store.save("acme/widgets", CheckpointUpdate::default()).await.unwrap();
        store.mark_failed("acme/widgets", "upstream unavailable".to_string()).await.unwrap();

        let checkpoint = store.get("acme/widgets").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Failed);
        assert_eq!(checkpoint.error, Some("upstream unavailable".to_string()));
    }
}
