//! Keyword search with export.
//!
//! Two modes, matched case-insensitively:
//!
//! - `filename`: the document's current file name contains the keyword.
//! - `content`: the document's stored text slice contains the keyword.
//!
//! Every hit is recorded against the task run and copied (never moved)
//! into `<export root>/<mode>_<keyword>`. Files that cannot be copied are
//! skipped and counted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use docpool_core::models::{Document, RunSummary, TaskKind};
use docpool_core::naming::{next_free_path, sanitize_dir_name};
use docpool_core::store::DocumentStore;

use crate::config::Config;
use crate::orchestrator::{self, print_report, Orchestrator, RunReport};
use crate::progress::{PipelineState, RunContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Filename,
    Content,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Filename => "filename",
            SearchMode::Content => "content",
        }
    }

    fn task_kind(&self) -> TaskKind {
        match self {
            SearchMode::Filename => TaskKind::FilenameSearch,
            SearchMode::Content => TaskKind::ContentSearch,
        }
    }

    fn matches(&self, doc: &Document, needle: &str) -> bool {
        match self {
            SearchMode::Filename => doc
                .path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().to_lowercase().contains(needle)),
            SearchMode::Content => doc.text_slice.to_lowercase().contains(needle),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filename" => Ok(SearchMode::Filename),
            "content" => Ok(SearchMode::Content),
            other => Err(format!(
                "unknown search mode '{}': expected filename or content",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub run: RunReport,
    pub export_dir: PathBuf,
    /// Current paths of the matching documents, in id order.
    pub hits: Vec<PathBuf>,
}

impl<S: DocumentStore> Orchestrator<S> {
    pub async fn run_keyword_search(
        &mut self,
        mode: SearchMode,
        keyword: &str,
        export_root: &Path,
        ctx: &RunContext,
    ) -> Result<SearchReport> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            bail!("Search keyword must not be empty");
        }
        self.begin_run();
        let task = self.store.create_task_run(mode.task_kind()).await?;
        self.enter(PipelineState::Ready)?;

        self.enter(PipelineState::Planning)?;
        ctx.started(PipelineState::Planning);
        let needle = keyword.to_lowercase();
        let hits: Vec<PathBuf> = self
            .store
            .all_documents()
            .await?
            .into_iter()
            .filter(|d| mode.matches(d, &needle))
            .map(|d| d.path)
            .collect();
        self.store
            .record_search_hits(task.id, keyword, &hits)
            .await?;
        info!(mode = %mode, keyword, hits = hits.len(), "search complete");

        let dir_name = sanitize_dir_name(keyword, self.settings.max_dir_name_chars)
            .unwrap_or_else(|| "keyword".to_string());
        let export_dir = export_root.join(format!("{}_{}", mode.as_str(), dir_name));

        self.enter(PipelineState::Executing)?;
        let mut summary = RunSummary::default();
        if !hits.is_empty() {
            std::fs::create_dir_all(&export_dir).with_context(|| {
                format!("Failed to create export directory: {}", export_dir.display())
            })?;
        }
        let total = hits.len();
        for (i, path) in hits.iter().enumerate() {
            if ctx.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            ctx.advanced(PipelineState::Executing, i + 1, total, path.display().to_string());
            let Some(name) = path.file_name() else {
                summary.skipped += 1;
                continue;
            };
            let destination = next_free_path(&export_dir.join(name), |p| p.exists());
            match std::fs::copy(path, &destination) {
                Ok(_) => {
                    if destination.file_name() != Some(name) {
                        summary.renamed += 1;
                    }
                    summary.processed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot export file, skipping");
                    summary.skipped += 1;
                }
            }
        }

        if !summary.cancelled {
            self.enter(PipelineState::Done)?;
        }
        let run = self.finish(&task, summary, None).await?;
        Ok(SearchReport {
            run,
            export_dir,
            hits,
        })
    }
}

pub async fn run_search(
    config: &Config,
    mode: SearchMode,
    keyword: &str,
    export: Option<PathBuf>,
    ctx: &RunContext,
) -> Result<()> {
    let mut orchestrator = orchestrator::open(config).await?;
    let export_root = export.unwrap_or_else(|| config.export_root());
    let report = orchestrator
        .run_keyword_search(mode, keyword, &export_root, ctx)
        .await?;

    if report.hits.is_empty() {
        println!("No documents match '{keyword}'.");
        return Ok(());
    }
    for hit in &report.hits {
        println!("  {}", hit.display());
    }
    print_report(
        &format!("search {mode} '{keyword}' -> {}", report.export_dir.display()),
        &report.run,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RetryPolicy;
    use crate::orchestrator::Settings;
    use docpool_core::cluster::PlannerConfig;
    use docpool_core::index::IndexConfig;
    use docpool_core::models::NewDocument;
    use docpool_core::store::memory::InMemoryStore;
    use std::fs;

    async fn orchestrator_with(root: &Path, files: &[(&str, &str)]) -> Orchestrator<InMemoryStore> {
        let store = InMemoryStore::new();
        let mut docs = Vec::new();
        for (i, (name, text)) in files.iter().enumerate() {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, text).unwrap();
            docs.push(NewDocument {
                fingerprint: format!("fp{i}"),
                path,
                text_slice: text.to_string(),
            });
        }
        store.insert_documents(&docs).await.unwrap();
        Orchestrator::new(
            store,
            Settings {
                workspace_root: root.to_path_buf(),
                extensions: vec![".txt".into()],
                exclude_globs: Vec::new(),
                block_chars: 2048,
                index: IndexConfig::default(),
                planner: PlannerConfig::default(),
                retry: RetryPolicy::default(),
                max_dir_name_chars: 64,
            },
        )
    }

    #[test]
    fn mode_parses() {
        assert_eq!("content".parse::<SearchMode>(), Ok(SearchMode::Content));
        assert!("regex".parse::<SearchMode>().is_err());
    }

    #[tokio::test]
    async fn filename_search_copies_hits() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("workspace");
        let exports = tmp.path().join("exports");
        let mut orch = orchestrator_with(
            &root,
            &[
                ("Invoice_March.txt", "march"),
                ("sub/invoice_april.txt", "april"),
                ("notes.txt", "invoice mention"),
            ],
        )
        .await;

        let report = orch
            .run_keyword_search(SearchMode::Filename, "INVOICE", &exports, &RunContext::quiet())
            .await
            .unwrap();

        assert_eq!(report.hits.len(), 2);
        assert_eq!(report.run.summary.processed, 2);
        assert_eq!(report.export_dir, exports.join("filename_INVOICE"));
        assert!(report.export_dir.join("Invoice_March.txt").exists());
        assert!(report.export_dir.join("invoice_april.txt").exists());
        assert!(root.join("Invoice_March.txt").exists(), "search never moves");
        assert_eq!(orch.store().search_hits_for(report.run.task_run_id).len(), 2);
    }

    #[tokio::test]
    async fn content_search_skips_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("workspace");
        let exports = tmp.path().join("exports");
        let mut orch = orchestrator_with(
            &root,
            &[("a.txt", "budget forecast"), ("b.txt", "Budget review")],
        )
        .await;
        fs::remove_file(root.join("b.txt")).unwrap();

        let report = orch
            .run_keyword_search(SearchMode::Content, "budget", &exports, &RunContext::quiet())
            .await
            .unwrap();
        assert_eq!(report.hits.len(), 2);
        assert_eq!(report.run.summary.processed, 1);
        assert_eq!(report.run.summary.skipped, 1);
    }

    #[tokio::test]
    async fn empty_keyword_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut orch = orchestrator_with(tmp.path(), &[]).await;
        assert!(orch
            .run_keyword_search(SearchMode::Content, "  ", tmp.path(), &RunContext::quiet())
            .await
            .is_err());
    }
}
