//! Storage abstraction for docpool.
//!
//! The [`DocumentStore`] trait lists every persistence operation the
//! pipeline needs, so the orchestrator and executor can run against
//! SQLite in production and [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::index::Vocabulary;
use crate::models::{Document, DuplicateFile, NewDocument, TaskKind, TaskRun};
use crate::sparse::SparseRow;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`reset`](DocumentStore::reset) | Drop and recreate everything |
/// | [`all_documents`](DocumentStore::all_documents) | Every document, ordered by id |
/// | [`get_document`](DocumentStore::get_document) / [`get_documents`](DocumentStore::get_documents) | Fetch by id(s) |
/// | [`documents_without_vector`](DocumentStore::documents_without_vector) | Pending vectorization |
/// | [`insert_documents`](DocumentStore::insert_documents) | Deduplicating bulk insert |
/// | [`update_path`](DocumentStore::update_path), [`update_vector`](DocumentStore::update_vector), [`update_text_slice`](DocumentStore::update_text_slice) | Per-record field updates |
/// | [`replace_vocabulary`](DocumentStore::replace_vocabulary) / [`load_vocabulary`](DocumentStore::load_vocabulary) | Fitted feature vocabulary |
/// | [`create_task_run`](DocumentStore::create_task_run) / [`update_task_summary`](DocumentStore::update_task_summary) | Task history |
/// | [`record_duplicates`](DocumentStore::record_duplicates) / [`record_search_hits`](DocumentStore::record_search_hits) | Per-run detail rows |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Remove all documents, task history and the vocabulary.
    async fn reset(&self) -> Result<()>;

    async fn all_documents(&self) -> Result<Vec<Document>>;

    async fn get_document(&self, id: i64) -> Result<Option<Document>>;

    /// Documents for the given ids, in id order. Unknown ids are ignored.
    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<Document>>;

    async fn documents_without_vector(&self) -> Result<Vec<Document>>;

    /// Insert documents whose fingerprint is not stored yet.
    ///
    /// Returns only the rows that were actually created.
    async fn insert_documents(&self, docs: &[NewDocument]) -> Result<Vec<Document>>;

    async fn update_path(&self, id: i64, path: &Path) -> Result<()>;

    async fn update_vector(&self, id: i64, vector: &SparseRow) -> Result<()>;

    async fn update_text_slice(&self, id: i64, text_slice: &str) -> Result<()>;

    async fn replace_vocabulary(&self, vocabulary: &Vocabulary) -> Result<()>;

    async fn load_vocabulary(&self) -> Result<Option<Vocabulary>>;

    async fn create_task_run(&self, kind: TaskKind) -> Result<TaskRun>;

    async fn update_task_summary(&self, task_id: i64, summary: &str) -> Result<()>;

    /// Most recent runs first.
    async fn recent_task_runs(&self, limit: usize) -> Result<Vec<TaskRun>>;

    async fn record_duplicates(&self, task_id: i64, duplicates: &[DuplicateFile]) -> Result<()>;

    async fn record_search_hits(&self, task_id: i64, keyword: &str, paths: &[PathBuf]) -> Result<()>;
}
