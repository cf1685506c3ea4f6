//! In-memory [`DocumentStore`] implementation for tests.
//!
//! Documents live in a `BTreeMap` keyed by id behind `std::sync::RwLock`,
//! so iteration order matches the SQLite store's `ORDER BY id`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::index::Vocabulary;
use crate::models::{Document, DuplicateFile, NewDocument, TaskKind, TaskRun};
use crate::sparse::SparseRow;

use super::DocumentStore;

#[derive(Default)]
struct State {
    documents: BTreeMap<i64, Document>,
    next_document_id: i64,
    tasks: Vec<TaskRun>,
    duplicates: Vec<(i64, DuplicateFile)>,
    search_hits: Vec<(i64, String, PathBuf)>,
    vocabulary: Option<Vocabulary>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    read_only: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail, as if the database had gone away.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Duplicates recorded against `task_id`.
    pub fn duplicates_for(&self, task_id: i64) -> Vec<DuplicateFile> {
        self.read()
            .map(|s| {
                s.duplicates
                    .iter()
                    .filter(|(t, _)| *t == task_id)
                    .map(|(_, d)| d.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(keyword, path)` hits recorded against `task_id`.
    pub fn search_hits_for(&self, task_id: i64) -> Vec<(String, PathBuf)> {
        self.read()
            .map(|s| {
                s.search_hits
                    .iter()
                    .filter(|(t, _, _)| *t == task_id)
                    .map(|(_, k, p)| (k.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        if self.read_only.load(Ordering::SeqCst) {
            bail!("in-memory store is read-only");
        }
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn update<F>(&self, id: i64, f: F) -> Result<()>
    where
        F: FnOnce(&mut Document),
    {
        let mut state = self.write()?;
        let doc = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| anyhow!("document {id} not found"))?;
        f(doc);
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn reset(&self) -> Result<()> {
        *self.write()? = State::default();
        Ok(())
    }

    async fn all_documents(&self) -> Result<Vec<Document>> {
        Ok(self.read()?.documents.values().cloned().collect())
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<Document>> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn documents_without_vector(&self) -> Result<Vec<Document>> {
        Ok(self
            .read()?
            .documents
            .values()
            .filter(|d| d.vector.is_none())
            .cloned()
            .collect())
    }

    async fn insert_documents(&self, docs: &[NewDocument]) -> Result<Vec<Document>> {
        let mut state = self.write()?;
        let now = chrono::Utc::now().timestamp();
        let mut inserted = Vec::new();
        for new in docs {
            if state
                .documents
                .values()
                .any(|d| d.fingerprint == new.fingerprint)
            {
                continue;
            }
            state.next_document_id += 1;
            let doc = Document {
                id: state.next_document_id,
                fingerprint: new.fingerprint.clone(),
                path: new.path.clone(),
                text_slice: new.text_slice.clone(),
                vector: None,
                created_at: now,
                updated_at: now,
            };
            state.documents.insert(doc.id, doc.clone());
            inserted.push(doc);
        }
        Ok(inserted)
    }

    async fn update_path(&self, id: i64, path: &Path) -> Result<()> {
        self.update(id, |d| d.path = path.to_path_buf())
    }

    async fn update_vector(&self, id: i64, vector: &SparseRow) -> Result<()> {
        self.update(id, |d| d.vector = Some(vector.clone()))
    }

    async fn update_text_slice(&self, id: i64, text_slice: &str) -> Result<()> {
        self.update(id, |d| d.text_slice = text_slice.to_string())
    }

    async fn replace_vocabulary(&self, vocabulary: &Vocabulary) -> Result<()> {
        self.write()?.vocabulary = Some(vocabulary.clone());
        Ok(())
    }

    async fn load_vocabulary(&self) -> Result<Option<Vocabulary>> {
        Ok(self.read()?.vocabulary.clone())
    }

    async fn create_task_run(&self, kind: TaskKind) -> Result<TaskRun> {
        let mut state = self.write()?;
        let task = TaskRun {
            id: state.tasks.len() as i64 + 1,
            kind,
            started_at: chrono::Utc::now().timestamp(),
            summary: None,
        };
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task_summary(&self, task_id: i64, summary: &str) -> Result<()> {
        let mut state = self.write()?;
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| anyhow!("task run {task_id} not found"))?;
        task.summary = Some(summary.to_string());
        Ok(())
    }

    async fn recent_task_runs(&self, limit: usize) -> Result<Vec<TaskRun>> {
        Ok(self
            .read()?
            .tasks
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_duplicates(&self, task_id: i64, duplicates: &[DuplicateFile]) -> Result<()> {
        let mut state = self.write()?;
        state
            .duplicates
            .extend(duplicates.iter().map(|d| (task_id, d.clone())));
        Ok(())
    }

    async fn record_search_hits(&self, task_id: i64, keyword: &str, paths: &[PathBuf]) -> Result<()> {
        let mut state = self.write()?;
        state
            .search_hits
            .extend(paths.iter().map(|p| (task_id, keyword.to_string(), p.clone())));
        Ok(())
    }
}
