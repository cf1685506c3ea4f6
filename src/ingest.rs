//! Ingestion: scan a source tree, drop content duplicates, copy unique
//! files into the workspace, persist them and vectorize.
//!
//! Files are deduplicated by the fingerprint of their text slice, not by
//! bytes. Each unique file is copied to the same relative path under the
//! workspace root; later stages only ever move these copies. The source
//! tree is never modified.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use docpool_core::fingerprint::fingerprint;
use docpool_core::models::{DuplicateFile, NewDocument, RunSummary, TaskKind};
use docpool_core::naming::next_free_path;
use docpool_core::store::DocumentStore;

use crate::config::Config;
use crate::extract::extract_slice;
use crate::orchestrator::{self, canonical_dir, print_report, Orchestrator, RunReport, Vectorized};
use crate::progress::{PipelineState, RunContext};
use crate::scan::scan_files;

/// A unique file already copied into the workspace, waiting to be persisted.
struct Staged {
    source: PathBuf,
    document: NewDocument,
}

impl<S: DocumentStore> Orchestrator<S> {
    /// Ingest every matching file under `source`. With `reset`, the store
    /// and the workspace directory are wiped first.
    pub async fn run_ingestion(
        &mut self,
        source: &Path,
        reset: bool,
        ctx: &RunContext,
    ) -> Result<RunReport> {
        self.begin_run();
        let source = canonical_dir(source)?;
        // Checked before `reset` can clear anything.
        let planned = resolve_path(&self.settings.workspace_root)?;
        if planned.starts_with(&source) || source.starts_with(&planned) {
            bail!(
                "Workspace {} and source {} must not contain each other",
                planned.display(),
                source.display()
            );
        }
        let workspace = self.prepare_workspace(reset).await?;

        let task = self.store.create_task_run(TaskKind::Ingestion).await?;
        let mut summary = RunSummary::default();

        self.enter(PipelineState::Scanning)?;
        ctx.started(PipelineState::Scanning);
        let files = scan_files(&source, &self.settings.extensions, &self.settings.exclude_globs)?;
        info!(files = files.len(), source = %source.display(), "scan complete");

        self.enter(PipelineState::Deduping)?;
        let mut seen: HashSet<String> = self
            .store
            .all_documents()
            .await?
            .into_iter()
            .map(|d| d.fingerprint)
            .collect();
        let mut staged: Vec<Staged> = Vec::new();
        let mut duplicates: Vec<DuplicateFile> = Vec::new();
        let total = files.len();

        for (i, path) in files.iter().enumerate() {
            if ctx.is_cancelled() {
                info!(remaining = total - i, "ingestion cancelled");
                summary.cancelled = true;
                break;
            }
            ctx.advanced(PipelineState::Deduping, i + 1, total, path.display().to_string());

            let slice = extract_slice(path, self.settings.block_chars);
            if slice.is_empty() {
                warn!(path = %path.display(), "no usable text, skipping");
                summary.skipped += 1;
                continue;
            }
            let fp = fingerprint(&slice);
            if !seen.insert(fp.clone()) {
                debug!(path = %path.display(), fingerprint = %fp, "duplicate content");
                duplicates.push(DuplicateFile {
                    path: path.clone(),
                    fingerprint: fp,
                });
                continue;
            }

            let relative = path
                .strip_prefix(&source)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(path.file_name().unwrap_or_default()));
            match copy_into(path, &workspace.join(relative)) {
                Ok(copy) => staged.push(Staged {
                    source: path.clone(),
                    document: NewDocument {
                        fingerprint: fp,
                        path: copy,
                        text_slice: slice,
                    },
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "copy into workspace failed");
                    seen.remove(&fp);
                    summary.failed += 1;
                }
            }
        }

        // Whatever was staged is persisted, cancelled or not.
        self.enter(PipelineState::Persisting)?;
        ctx.started(PipelineState::Persisting);
        let new_docs: Vec<NewDocument> = staged.iter().map(|s| s.document.clone()).collect();
        let inserted = self.store.insert_documents(&new_docs).await?;
        let inserted_fps: HashSet<&str> = inserted.iter().map(|d| d.fingerprint.as_str()).collect();
        for item in &staged {
            if inserted_fps.contains(item.document.fingerprint.as_str()) {
                continue;
            }
            // Lost a race with another writer: the store already has it.
            if let Err(e) = std::fs::remove_file(&item.document.path) {
                warn!(path = %item.document.path.display(), error = %e, "could not remove surplus copy");
            }
            duplicates.push(DuplicateFile {
                path: item.source.clone(),
                fingerprint: item.document.fingerprint.clone(),
            });
        }
        summary.processed = inserted.len();
        summary.duplicates = duplicates.len();
        self.store.record_duplicates(task.id, &duplicates).await?;
        if !inserted.is_empty() {
            self.cache.invalidate();
        }
        info!(
            persisted = summary.processed,
            duplicates = summary.duplicates,
            "documents persisted"
        );

        if summary.cancelled {
            return self.finish(&task, summary, None).await;
        }

        self.enter(PipelineState::Vectorizing)?;
        if let Vectorized::Done(vectorized) = self.vectorize(false, ctx).await? {
            summary.cancelled |= vectorized.cancelled;
        }
        if !summary.cancelled {
            self.enter(PipelineState::Ready)?;
        }
        self.finish(&task, summary, None).await
    }

    /// Create the workspace directory (wiping it and the store on
    /// `reset`) and return its canonical path.
    async fn prepare_workspace(&mut self, reset: bool) -> Result<PathBuf> {
        let root = self.settings.workspace_root.clone();
        if reset {
            info!(workspace = %root.display(), "resetting store and workspace");
            self.store.reset().await.context("Failed to reset store")?;
            self.cache.invalidate();
            if root.exists() {
                clear_dir(&root)?;
            }
        }
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace: {}", root.display()))?;
        canonical_dir(&root)
    }
}

/// Absolute, symlink-resolved form of `path`, which need not exist yet:
/// the deepest existing ancestor is canonicalized and the rest appended.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read the current directory")?
            .join(path)
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

/// Copy `source` to `wanted`, or to a suffixed sibling if that is taken.
fn copy_into(source: &Path, wanted: &Path) -> std::io::Result<PathBuf> {
    if let Some(parent) = wanted.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let destination = next_free_path(wanted, |p| p.exists());
    std::fs::copy(source, &destination)?;
    Ok(destination)
}

/// Remove everything inside `dir`. Read-only entries are made writable
/// and retried once.
fn clear_dir(dir: &Path) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let remove = |p: &Path| {
            if p.is_dir() && !p.is_symlink() {
                std::fs::remove_dir_all(p)
            } else {
                std::fs::remove_file(p)
            }
        };
        if remove(&path).is_err() {
            make_writable(&path);
            remove(&path).with_context(|| format!("Failed to clear {}", path.display()))?;
        }
    }
    Ok(())
}

#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) {
    for entry in walkdir::WalkDir::new(path).into_iter().flatten() {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            if perms.readonly() {
                perms.set_readonly(false);
                let _ = std::fs::set_permissions(entry.path(), perms);
            }
        }
    }
}

pub async fn run_ingest(
    config: &Config,
    source: Option<PathBuf>,
    reset: bool,
    ctx: &RunContext,
) -> Result<()> {
    let Some(source) = source.or_else(|| config.workspace.source.clone()) else {
        bail!("No source directory: pass --source or set workspace.source in the config");
    };
    let mut orchestrator = orchestrator::open(config).await?;
    let report = orchestrator.run_ingestion(&source, reset, ctx).await?;
    print_report(&format!("ingest {}", source.display()), &report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RetryPolicy;
    use crate::orchestrator::{RunStatus, Settings};
    use docpool_core::cluster::PlannerConfig;
    use docpool_core::index::IndexConfig;
    use docpool_core::store::memory::InMemoryStore;
    use std::fs;

    fn orchestrator_for(workspace: &Path) -> Orchestrator<InMemoryStore> {
        Orchestrator::new(
            InMemoryStore::new(),
            Settings {
                workspace_root: workspace.to_path_buf(),
                extensions: vec![".txt".into(), ".md".into()],
                exclude_globs: Vec::new(),
                block_chars: 2048,
                index: IndexConfig::default(),
                planner: PlannerConfig::default(),
                retry: RetryPolicy::default(),
                max_dir_name_chars: 64,
            },
        )
    }

    #[tokio::test]
    async fn copies_unique_files_preserving_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(source.join("notes")).unwrap();
        fs::write(source.join("a.txt"), "alpha beta gamma").unwrap();
        fs::write(source.join("notes/b.md"), "delta epsilon zeta").unwrap();
        fs::write(source.join("empty.txt"), "   ").unwrap();
        let workspace = tmp.path().join("workspace");

        let mut orch = orchestrator_for(&workspace);
        let report = orch
            .run_ingestion(&source, false, &RunContext::quiet())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.summary.skipped, 1);
        assert!(workspace.join("a.txt").exists());
        assert!(workspace.join("notes/b.md").exists());
        assert!(source.join("a.txt").exists());
        assert_eq!(orch.state(), PipelineState::Ready);
        assert!(orch.store().documents_without_vector().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_run_reports_everything_as_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), "alpha beta").unwrap();
        let workspace = tmp.path().join("workspace");

        let mut orch = orchestrator_for(&workspace);
        let ctx = RunContext::quiet();
        orch.run_ingestion(&source, false, &ctx).await.unwrap();
        let again = orch.run_ingestion(&source, false, &ctx).await.unwrap();

        assert_eq!(again.summary.processed, 0);
        assert_eq!(again.summary.duplicates, 1);
        assert_eq!(orch.store().all_documents().await.unwrap().len(), 1);
        assert_eq!(orch.store().duplicates_for(again.task_run_id).len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_workspace_and_store() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), "alpha beta").unwrap();
        let workspace = tmp.path().join("workspace");
        fs::create_dir_all(workspace.join("leftover")).unwrap();
        fs::write(workspace.join("leftover/old.txt"), "old").unwrap();

        let mut orch = orchestrator_for(&workspace);
        let ctx = RunContext::quiet();
        orch.run_ingestion(&source, false, &ctx).await.unwrap();
        let report = orch.run_ingestion(&source, true, &ctx).await.unwrap();

        assert_eq!(report.summary.processed, 1);
        assert_eq!(report.summary.duplicates, 0);
        assert!(!workspace.join("leftover").exists());
        assert!(workspace.join("a.txt").exists());
    }

    #[tokio::test]
    async fn nested_workspace_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(&source).unwrap();
        let mut orch = orchestrator_for(&source.join("workspace"));
        let err = orch
            .run_ingestion(&source, false, &RunContext::quiet())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not contain each other"));
    }

    #[tokio::test]
    async fn rejected_reset_leaves_source_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("pool");
        let source = workspace.join("inbox");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("precious.txt"), "only copy").unwrap();

        let mut orch = orchestrator_for(&workspace);
        let err = orch
            .run_ingestion(&source, true, &RunContext::quiet())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not contain each other"));
        assert!(source.join("precious.txt").exists());
    }

    #[test]
    fn resolve_path_handles_missing_tails() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        assert_eq!(resolve_path(tmp.path()).unwrap(), root);
        assert_eq!(
            resolve_path(&tmp.path().join("not/yet")).unwrap(),
            root.join("not/yet")
        );
    }

    #[tokio::test]
    async fn cancelled_ingestion_persists_nothing_further() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), "alpha beta").unwrap();
        let workspace = tmp.path().join("workspace");

        let mut orch = orchestrator_for(&workspace);
        let ctx = RunContext::quiet();
        ctx.cancel.cancel();
        let report = orch.run_ingestion(&source, false, &ctx).await.unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.summary.processed, 0);
        assert_eq!(orch.state(), PipelineState::Cancelled);
        assert!(orch.store().all_documents().await.unwrap().is_empty());
    }
}
