//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Maps each store operation onto the schema created by
//! [`migrate`](crate::migrate). Sparse vectors and the vocabulary are
//! stored as JSON text.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use docpool_core::index::Vocabulary;
use docpool_core::models::{Document, DuplicateFile, NewDocument, TaskKind, TaskRun};
use docpool_core::sparse::SparseRow;
use docpool_core::store::DocumentStore;

use crate::migrate;

const DOCUMENT_COLUMNS: &str =
    "id, fingerprint, path, text_slice, vector_json, created_at, updated_at";

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn document_from_row(row: &SqliteRow) -> Document {
    let id: i64 = row.get("id");
    let vector_json: Option<String> = row.get("vector_json");
    // An unreadable vector reads as missing, which also puts the document
    // back in `documents_without_vector`.
    let vector = vector_json.and_then(|json| match SparseRow::from_json(&json) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(document_id = id, error = %e, "ignoring malformed stored vector");
            None
        }
    });
    Document {
        id,
        fingerprint: row.get("fingerprint"),
        path: PathBuf::from(row.get::<String, _>("path")),
        text_slice: row.get("text_slice"),
        vector,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn task_from_row(row: &SqliteRow) -> Result<TaskRun> {
    let task_type: String = row.get("task_type");
    let kind = TaskKind::parse(&task_type)
        .with_context(|| format!("unknown task type in database: {task_type}"))?;
    Ok(TaskRun {
        id: row.get("id"),
        kind,
        started_at: row.get("started_at"),
        summary: row.get("summary"),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn reset(&self) -> Result<()> {
        migrate::reset_schema(&self.pool).await
    }

    async fn all_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id IN ({placeholders}) ORDER BY id"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn documents_without_vector(&self) -> Result<Vec<Document>> {
        // Rows with a malformed vector count as pending too, so the filter
        // runs after parsing rather than on `vector_json IS NULL`.
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(document_from_row)
            .filter(|d| d.vector.is_none())
            .collect())
    }

    async fn insert_documents(&self, docs: &[NewDocument]) -> Result<Vec<Document>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::new();

        for new in docs {
            let row = sqlx::query(
                r#"
                INSERT INTO documents (fingerprint, path, text_slice, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(fingerprint) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(&new.fingerprint)
            .bind(path_text(&new.path))
            .bind(&new.text_slice)
            .bind(now)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                inserted.push(Document {
                    id: row.get("id"),
                    fingerprint: new.fingerprint.clone(),
                    path: new.path.clone(),
                    text_slice: new.text_slice.clone(),
                    vector: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn update_path(&self, id: i64, path: &Path) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET path = ?, updated_at = ? WHERE id = ?")
            .bind(path_text(path))
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("document {id} not found");
        }
        Ok(())
    }

    async fn update_vector(&self, id: i64, vector: &SparseRow) -> Result<()> {
        let json = vector.to_json()?;
        sqlx::query("UPDATE documents SET vector_json = ?, updated_at = ? WHERE id = ?")
            .bind(json)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_text_slice(&self, id: i64, text_slice: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET text_slice = ?, updated_at = ? WHERE id = ?")
            .bind(text_slice)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_vocabulary(&self, vocabulary: &Vocabulary) -> Result<()> {
        let json = serde_json::to_string(vocabulary)?;
        sqlx::query(
            r#"
            INSERT INTO vocabulary (id, terms_json, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                terms_json = excluded.terms_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_vocabulary(&self) -> Result<Option<Vocabulary>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT terms_json FROM vocabulary WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| serde_json::from_str(&j).context("Failed to parse stored vocabulary"))
            .transpose()
    }

    async fn create_task_run(&self, kind: TaskKind) -> Result<TaskRun> {
        let started_at = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO task_runs (task_type, started_at) VALUES (?, ?) RETURNING id",
        )
        .bind(kind.as_str())
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(TaskRun {
            id,
            kind,
            started_at,
            summary: None,
        })
    }

    async fn update_task_summary(&self, task_id: i64, summary: &str) -> Result<()> {
        sqlx::query("UPDATE task_runs SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_task_runs(&self, limit: usize) -> Result<Vec<TaskRun>> {
        let rows = sqlx::query(
            "SELECT id, task_type, started_at, summary FROM task_runs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn record_duplicates(&self, task_id: i64, duplicates: &[DuplicateFile]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for dup in duplicates {
            sqlx::query(
                "INSERT INTO duplicate_files (task_run_id, duplicate_path, fingerprint) VALUES (?, ?, ?)",
            )
            .bind(task_id)
            .bind(path_text(&dup.path))
            .bind(&dup.fingerprint)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_search_hits(&self, task_id: i64, keyword: &str, paths: &[PathBuf]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for path in paths {
            sqlx::query(
                "INSERT INTO search_hits (task_run_id, keyword, matched_path) VALUES (?, ?, ?)",
            )
            .bind(task_id)
            .bind(keyword)
            .bind(path_text(path))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
