//! Pipeline orchestration.
//!
//! [`Orchestrator`] owns the document store, the primed [`IndexCache`]
//! and the pipeline state. Each coarse operation is one `run_*` method
//! that records a task run, walks the state machine in
//! [`PipelineState`] and ends with a [`RunReport`]:
//!
//! | Operation | Module |
//! |-----------|--------|
//! | ingestion (scan, dedup, copy, persist, vectorize) | [`crate::ingest`] |
//! | vectorization, similarity queries | this module |
//! | clustering, grouping, cleanup | [`crate::reorganize`] |
//! | keyword search export | [`crate::search`] |
//!
//! Mutating runs take `&mut self`, so at most one of them runs against a
//! given orchestrator at a time. Anything that rewrites vectors
//! invalidates the cache; queries re-prime it from the store on demand.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use docpool_core::cache::IndexCache;
use docpool_core::cluster::{MovePlan, PlannerConfig};
use docpool_core::index::{FeatureIndex, IndexConfig};
use docpool_core::models::{RunSummary, TaskKind, TaskRun};
use docpool_core::store::DocumentStore;

use crate::config::Config;
use crate::db;
use crate::executor::{ExecutionReport, ReorganizeExecutor, RetryPolicy};
use crate::extract::extract_slice;
use crate::migrate;
use crate::progress::{PipelineState, RunContext};
use crate::sqlite_store::SqliteStore;

/// Everything the pipeline needs from the configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace_root: PathBuf,
    pub extensions: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub block_chars: usize,
    pub index: IndexConfig,
    pub planner: PlannerConfig,
    pub retry: RetryPolicy,
    pub max_dir_name_chars: usize,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspace_root: config.workspace.root.clone(),
            extensions: config.workspace.extensions.clone(),
            exclude_globs: config.workspace.exclude_globs.clone(),
            block_chars: config.fingerprint.block_chars,
            index: config.index_config(),
            planner: config.planner_config(),
            retry: config.retry_policy(),
            max_dir_name_chars: config.clustering.max_dir_name_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    /// A precondition was not met; nothing was changed.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub task_run_id: i64,
    pub status: RunStatus,
    pub summary: RunSummary,
    /// Empty directories removed by the cleanup stage, in removal order.
    pub removed_dirs: Vec<PathBuf>,
}

/// One result of [`Orchestrator::find_similar`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarDocument {
    pub id: i64,
    pub path: PathBuf,
    pub score: f32,
}

pub struct Orchestrator<S: DocumentStore> {
    pub(crate) store: S,
    pub(crate) settings: Settings,
    pub(crate) cache: IndexCache,
    state: PipelineState,
}

/// Open the configured SQLite database (creating the schema if needed)
/// and wrap it in an orchestrator.
pub async fn open(config: &Config) -> Result<Orchestrator<SqliteStore>> {
    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;
    Ok(Orchestrator::new(
        SqliteStore::new(pool),
        Settings::from_config(config),
    ))
}

impl<S: DocumentStore> Orchestrator<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        let cache = IndexCache::new(FeatureIndex::new(&settings.index));
        Self {
            store,
            settings,
            cache,
            state: PipelineState::Idle,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// Swap the custom stopword list. Takes effect on the next fit.
    pub fn update_stopwords(&mut self, stopwords: &[String]) {
        self.settings.index.stopwords = stopwords.to_vec();
        self.cache.index_mut().update_stopwords(stopwords);
    }

    pub(crate) fn begin_run(&mut self) {
        self.state = PipelineState::Idle;
    }

    pub(crate) fn enter(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            bail!("illegal pipeline transition {} -> {}", self.state, next);
        }
        debug!(from = %self.state, to = %next, "pipeline state");
        self.state = next;
        Ok(())
    }

    /// Write the task summary and build the report. A cancelled summary
    /// moves the pipeline to `Cancelled`.
    pub(crate) async fn finish(
        &mut self,
        task: &TaskRun,
        summary: RunSummary,
        skipped: Option<String>,
    ) -> Result<RunReport> {
        let (status, text) = match skipped {
            Some(reason) => (RunStatus::Skipped(reason.clone()), format!("skipped: {reason}")),
            None if summary.cancelled => (RunStatus::Cancelled, summary.to_string()),
            None => (RunStatus::Completed, summary.to_string()),
        };
        self.store.update_task_summary(task.id, &text).await?;
        if status == RunStatus::Cancelled {
            self.enter(PipelineState::Cancelled)?;
        }
        info!(task_run = task.id, kind = %task.kind, summary = %text, "run finished");
        Ok(RunReport {
            task_run_id: task.id,
            status,
            summary,
            removed_dirs: Vec::new(),
        })
    }

    /// Rebuild the in-memory index from the store unless it is current.
    pub async fn ensure_primed(&mut self) -> Result<()> {
        if self.cache.is_primed() {
            return Ok(());
        }
        let vocabulary = self.store.load_vocabulary().await?;
        let documents = self.store.all_documents().await?;
        let report = self.cache.prime(vocabulary, &documents);
        for (id, reason) in &report.malformed {
            warn!(document_id = id, reason = %reason, "stored vector not usable");
        }
        info!(
            loaded = report.loaded,
            without_vector = report.missing.len(),
            "feature index primed"
        );
        Ok(())
    }

    /// Apply a plan and keep cached paths in step with the moves.
    pub(crate) async fn execute_plan(
        &mut self,
        plan: &MovePlan,
        ctx: &RunContext,
    ) -> Result<ExecutionReport> {
        let executor = ReorganizeExecutor::new(&self.store, self.settings.retry.clone());
        match executor.execute(plan, ctx).await {
            Ok(report) => {
                for applied in &report.applied {
                    self.cache.record_move(applied.document_id, &applied.destination);
                }
                Ok(report)
            }
            Err(e) => {
                self.cache.invalidate();
                Err(e)
            }
        }
    }

    /// Vectorize documents that have no vector yet. With `force`, refit
    /// even when every document already has one (e.g. new stopwords).
    pub async fn run_vectorization(&mut self, force: bool, ctx: &RunContext) -> Result<RunReport> {
        self.begin_run();
        let task = self.store.create_task_run(TaskKind::Vectorization).await?;
        self.enter(PipelineState::Vectorizing)?;
        let outcome = self.vectorize(force, ctx).await?;
        match outcome {
            Vectorized::NothingToDo => {
                self.enter(PipelineState::Ready)?;
                self.finish(&task, RunSummary::default(), Some("nothing to vectorize".into()))
                    .await
            }
            Vectorized::Done(summary) => {
                if !summary.cancelled {
                    self.enter(PipelineState::Ready)?;
                }
                self.finish(&task, summary, None).await
            }
        }
    }

    /// Refit the feature index over the whole corpus and rewrite every
    /// vector, so all rows share one vocabulary.
    pub(crate) async fn vectorize(&mut self, force: bool, ctx: &RunContext) -> Result<Vectorized> {
        let pending = self.store.documents_without_vector().await?;
        if pending.is_empty() && !force {
            info!("every document already has a vector");
            return Ok(Vectorized::NothingToDo);
        }
        ctx.started(PipelineState::Vectorizing);

        let mut summary = RunSummary::default();
        let mut documents = self.store.all_documents().await?;
        for doc in documents.iter_mut().filter(|d| d.text_slice.is_empty()) {
            if ctx.is_cancelled() {
                summary.cancelled = true;
                return Ok(Vectorized::Done(summary));
            }
            let slice = extract_slice(&doc.path, self.settings.block_chars);
            if !slice.is_empty() {
                self.store.update_text_slice(doc.id, &slice).await?;
                doc.text_slice = slice;
            }
        }
        if ctx.is_cancelled() {
            summary.cancelled = true;
            return Ok(Vectorized::Done(summary));
        }

        let corpus: Vec<_> = documents
            .iter()
            .filter(|d| !d.text_slice.is_empty())
            .collect();
        summary.skipped = documents.len() - corpus.len();
        let texts: Vec<&str> = corpus.iter().map(|d| d.text_slice.as_str()).collect();
        // The refit replaces the cached rows; the id map no longer matches them.
        self.cache.invalidate();
        let vectors = self.cache.index_mut().fit(&texts);

        if let Some(vocabulary) = self.cache.index().vocabulary() {
            self.store
                .replace_vocabulary(vocabulary)
                .await
                .context("Failed to persist vocabulary")?;
        }

        // One refit is all-or-nothing: cancellation is not honoured
        // while its vectors are written.
        let total = vectors.len();
        for (i, (doc, vector)) in corpus.iter().zip(&vectors).enumerate() {
            ctx.advanced(
                PipelineState::Vectorizing,
                i + 1,
                total,
                doc.path.display().to_string(),
            );
            self.store.update_vector(doc.id, &vector.to_row()).await?;
        }
        summary.processed = total;

        if summary.skipped > 0 {
            warn!(
                count = summary.skipped,
                "documents without usable text were not vectorized"
            );
        }
        info!(
            vectorized = total,
            vocabulary = self.cache.index().vocabulary().map_or(0, |v| v.len()),
            "vectorization complete"
        );
        Ok(Vectorized::Done(summary))
    }

    /// The `n` documents most similar to `document_id`, best first.
    /// An unknown or unvectorized id yields an empty list.
    pub async fn find_similar(&mut self, document_id: i64, n: usize) -> Result<Vec<SimilarDocument>> {
        self.ensure_primed().await?;
        let Some(row) = self.cache.position_of(document_id) else {
            debug!(document_id, "document not in the feature index");
            return Ok(Vec::new());
        };
        let (rows, scores) = self.cache.index().find_top_n_similar_to_row(row, n)?;

        let ids: Vec<i64> = rows
            .iter()
            .filter_map(|&r| self.cache.entry(r).map(|e| e.id))
            .collect();
        let current: HashMap<i64, PathBuf> = self
            .store
            .get_documents(&ids)
            .await?
            .into_iter()
            .map(|d| (d.id, d.path))
            .collect();

        Ok(rows
            .iter()
            .zip(scores)
            .filter_map(|(&r, score)| {
                let entry = self.cache.entry(r)?;
                let path = current
                    .get(&entry.id)
                    .cloned()
                    .unwrap_or_else(|| entry.path.clone());
                Some(SimilarDocument {
                    id: entry.id,
                    path,
                    score,
                })
            })
            .collect())
    }
}

pub(crate) enum Vectorized {
    NothingToDo,
    Done(RunSummary),
}

/// Resolve an operation root to an existing, canonical directory.
pub(crate) fn canonical_dir(dir: &Path) -> Result<PathBuf> {
    let path = dir
        .canonicalize()
        .with_context(|| format!("Directory does not exist: {}", dir.display()))?;
    if !path.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    Ok(path)
}

/// Print a run report in the CLI's `key: value` layout.
pub fn print_report(title: &str, report: &RunReport) {
    let s = &report.summary;
    println!("{title} (task {})", report.task_run_id);
    match &report.status {
        RunStatus::Completed => {}
        RunStatus::Cancelled => println!("  status: cancelled"),
        RunStatus::Skipped(reason) => println!("  skipped: {reason}"),
    }
    println!("  processed: {}", s.processed);
    if s.duplicates > 0 {
        println!("  duplicates: {}", s.duplicates);
    }
    println!("  skipped: {}", s.skipped);
    println!("  failed: {}", s.failed);
    if s.renamed > 0 {
        println!("  renamed: {}", s.renamed);
    }
    if s.unclustered > 0 {
        println!("  unclustered: {}", s.unclustered);
    }
    if !report.removed_dirs.is_empty() {
        println!("  empty directories removed: {}", report.removed_dirs.len());
    }
}

pub async fn run_vectorize(
    config: &Config,
    stopwords: Option<Vec<String>>,
    ctx: &RunContext,
) -> Result<()> {
    let mut orchestrator = open(config).await?;
    let force = stopwords.is_some();
    if let Some(extra) = stopwords {
        orchestrator.update_stopwords(&merged_stopwords(&config.features.stopwords, &extra));
    }
    let report = orchestrator.run_vectorization(force, ctx).await?;
    print_report("vectorize", &report);
    Ok(())
}

/// Configured stopwords followed by `extra`, trimmed, without repeats.
fn merged_stopwords(configured: &[String], extra: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(configured.len() + extra.len());
    for word in configured.iter().chain(extra) {
        let word = word.trim();
        if !word.is_empty() && !merged.iter().any(|w| w == word) {
            merged.push(word.to_string());
        }
    }
    merged
}

pub async fn run_similar(config: &Config, document_id: i64, top: Option<usize>) -> Result<()> {
    let mut orchestrator = open(config).await?;
    let n = top.unwrap_or(config.search.top_n);
    let results = orchestrator.find_similar(document_id, n).await?;
    if results.is_empty() {
        println!("No similar documents for {document_id}.");
        return Ok(());
    }
    for (i, doc) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] #{}  {}",
            i + 1,
            doc.score,
            doc.id,
            doc.path.display()
        );
    }
    Ok(())
}
