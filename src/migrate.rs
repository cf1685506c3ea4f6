use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Tables in drop order (children first).
const TABLES: &[&str] = &[
    "search_hits",
    "duplicate_files",
    "task_runs",
    "vocabulary",
    "documents",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            text_slice TEXT NOT NULL DEFAULT '',
            vector_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create task history table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_type TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            summary TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_run_id INTEGER NOT NULL,
            duplicate_path TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            FOREIGN KEY (task_run_id) REFERENCES task_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_hits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_run_id INTEGER NOT NULL,
            keyword TEXT NOT NULL,
            matched_path TEXT NOT NULL,
            FOREIGN KEY (task_run_id) REFERENCES task_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row table holding the fitted vocabulary as JSON
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vocabulary (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            terms_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(path)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_duplicate_files_task ON duplicate_files(task_run_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_search_hits_task ON search_hits(task_run_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Drop every table and recreate the schema. All data is lost.
pub async fn reset_schema(pool: &SqlitePool) -> Result<()> {
    for table in TABLES {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(pool)
            .await?;
    }
    ensure_schema(pool).await
}
