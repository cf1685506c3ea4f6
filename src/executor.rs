//! Applies a [`MovePlan`] to the filesystem, one file at a time.
//!
//! For each entry the executor creates the destination directory, picks
//! a free name if the destination is occupied, moves the file and then
//! writes the new path to the store before touching the next entry. If
//! that write fails the file is moved back and the run stops with the
//! store error, so no file is ever moved without its path recorded.
//!
//! Locked files are retried according to a [`RetryPolicy`]; a source
//! that has disappeared is skipped. Cancellation is checked between
//! entries only.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use docpool_core::cluster::MovePlan;
use docpool_core::models::{MoveEntry, RunSummary};
use docpool_core::naming::next_free_path;
use docpool_core::store::DocumentStore;

use crate::progress::{PipelineState, RunContext};

/// Bounded retry with exponential backoff for transient file errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base,
    /// 4×base, ... capped at 32×base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exponent)
    }
}

/// Whether an I/O error is worth retrying (file held open or locked).
pub fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

/// A move that was carried out and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub document_id: i64,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// The planned destination was occupied and a suffixed name was used.
    pub renamed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub applied: Vec<AppliedMove>,
    /// `processed` counts moved files.
    pub summary: RunSummary,
}

enum Outcome {
    Moved(AppliedMove),
    Skipped,
    Failed,
}

pub struct ReorganizeExecutor<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    retry: RetryPolicy,
}

impl<'a, S: DocumentStore + ?Sized> ReorganizeExecutor<'a, S> {
    pub fn new(store: &'a S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Apply `plan` in order. Returns `Err` only when the store rejects a
    /// path update; everything moved before that point stays recorded.
    pub async fn execute(&self, plan: &MovePlan, ctx: &RunContext) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        let total = plan.entries.len();

        for (i, entry) in plan.entries.iter().enumerate() {
            if ctx.is_cancelled() {
                info!(remaining = total - i, "move execution cancelled");
                report.summary.cancelled = true;
                break;
            }
            ctx.advanced(
                PipelineState::Executing,
                i + 1,
                total,
                entry.source.display().to_string(),
            );

            match self.apply(entry).await? {
                Outcome::Moved(applied) => {
                    report.summary.processed += 1;
                    if applied.renamed {
                        report.summary.renamed += 1;
                    }
                    report.applied.push(applied);
                }
                Outcome::Skipped => report.summary.skipped += 1,
                Outcome::Failed => report.summary.failed += 1,
            }
        }

        Ok(report)
    }

    async fn apply(&self, entry: &MoveEntry) -> Result<Outcome> {
        if !entry.source.exists() {
            warn!(
                document_id = entry.document_id,
                path = %entry.source.display(),
                "source file is gone, skipping"
            );
            return Ok(Outcome::Skipped);
        }

        if let Some(parent) = entry.destination.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(dir = %parent.display(), error = %e, "cannot create destination directory");
                return Ok(Outcome::Failed);
            }
        }

        let destination = next_free_path(&entry.destination, |p| p.exists());
        let renamed = destination != entry.destination;

        if let Err(e) = self.move_with_retry(&entry.source, &destination).await {
            if e.kind() == io::ErrorKind::NotFound {
                warn!(path = %entry.source.display(), "source vanished during move, skipping");
                return Ok(Outcome::Skipped);
            }
            warn!(
                from = %entry.source.display(),
                to = %destination.display(),
                error = %e,
                "move failed"
            );
            return Ok(Outcome::Failed);
        }

        if let Err(e) = self.store.update_path(entry.document_id, &destination).await {
            if let Err(undo) = move_file(&destination, &entry.source) {
                error!(
                    document_id = entry.document_id,
                    path = %destination.display(),
                    error = %undo,
                    "could not move file back after failed path update"
                );
            }
            return Err(e).with_context(|| {
                format!("Failed to record new path for document {}", entry.document_id)
            });
        }

        debug!(
            document_id = entry.document_id,
            to = %destination.display(),
            "moved"
        );
        Ok(Outcome::Moved(AppliedMove {
            document_id: entry.document_id,
            source: entry.source.clone(),
            destination,
            renamed,
        }))
    }

    async fn move_with_retry(&self, source: &Path, destination: &Path) -> io::Result<()> {
        let mut attempt = 1;
        loop {
            match move_file(source, destination) {
                Ok(()) => return Ok(()),
                Err(e) if is_transient(&e) && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        path = %source.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "file busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Rename, falling back to copy + delete (e.g. across filesystems).
fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match std::fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if is_transient(&e) || e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(_) => {
            std::fs::copy(source, destination)?;
            if let Err(e) = std::fs::remove_file(source) {
                let _ = std::fs::remove_file(destination);
                return Err(e);
            }
            Ok(())
        }
    }
}

/// Remove every empty directory below `root`, deepest first, and return
/// them in removal order. `root` itself is kept.
///
/// Emptiness is checked against the live directory, so a parent emptied
/// by removing its last child goes in the same pass.
pub fn remove_empty_dirs(root: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry during cleanup");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        match is_empty_dir(dir) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot inspect directory");
                continue;
            }
        }
        match std::fs::remove_dir(dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "removed empty directory");
                removed.push(dir.to_path_buf());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "cannot remove directory"),
        }
    }
    removed
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpool_core::models::NewDocument;
    use docpool_core::store::memory::InMemoryStore;
    use std::fs;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    async fn seeded(store: &InMemoryStore, paths: &[&Path]) -> Vec<i64> {
        let docs: Vec<NewDocument> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| NewDocument {
                fingerprint: format!("fp{i}"),
                path: p.to_path_buf(),
                text_slice: String::new(),
            })
            .collect();
        store
            .insert_documents(&docs)
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect()
    }

    fn plan_of(entries: Vec<MoveEntry>) -> MovePlan {
        MovePlan {
            entries,
            ..Default::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(9), Duration::from_millis(320));
    }

    #[test]
    fn lock_errors_are_transient() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[tokio::test]
    async fn moves_and_records_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, "a").unwrap();
        let store = InMemoryStore::new();
        let ids = seeded(&store, &[&src]).await;
        let dest = dir.path().join("topic/a.txt");

        let executor = ReorganizeExecutor::new(&store, fast_retry());
        let report = executor
            .execute(
                &plan_of(vec![MoveEntry {
                    source: src.clone(),
                    destination: dest.clone(),
                    document_id: ids[0],
                }]),
                &RunContext::quiet(),
            )
            .await
            .unwrap();

        assert_eq!(report.summary.processed, 1);
        assert!(dest.exists());
        assert!(!src.exists());
        let stored = store.get_document(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.path, dest);
    }

    #[tokio::test]
    async fn occupied_destination_gets_counter_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("topic");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("report.txt"), "unrelated").unwrap();
        let src = dir.path().join("report.txt");
        fs::write(&src, "mine").unwrap();

        let store = InMemoryStore::new();
        let ids = seeded(&store, &[&src]).await;
        let executor = ReorganizeExecutor::new(&store, fast_retry());
        let report = executor
            .execute(
                &plan_of(vec![MoveEntry {
                    source: src,
                    destination: target.join("report.txt"),
                    document_id: ids[0],
                }]),
                &RunContext::quiet(),
            )
            .await
            .unwrap();

        let expected = target.join("report (1).txt");
        assert_eq!(report.summary.renamed, 1);
        assert_eq!(report.applied[0].destination, expected);
        assert_eq!(fs::read_to_string(&expected).unwrap(), "mine");
        assert_eq!(fs::read_to_string(target.join("report.txt")).unwrap(), "unrelated");
        let stored = store.get_document(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.path, expected);
    }

    #[tokio::test]
    async fn missing_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let gone = dir.path().join("gone.txt");
        let ids = seeded(&store, &[&gone]).await;
        let executor = ReorganizeExecutor::new(&store, fast_retry());
        let report = executor
            .execute(
                &plan_of(vec![MoveEntry {
                    source: gone.clone(),
                    destination: dir.path().join("x/gone.txt"),
                    document_id: ids[0],
                }]),
                &RunContext::quiet(),
            )
            .await
            .unwrap();
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.processed, 0);
        let stored = store.get_document(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.path, gone);
    }

    #[tokio::test]
    async fn store_failure_moves_file_back() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, "a").unwrap();
        let store = InMemoryStore::new();
        let ids = seeded(&store, &[&src]).await;
        store.set_read_only(true);

        let dest = dir.path().join("topic/a.txt");
        let executor = ReorganizeExecutor::new(&store, fast_retry());
        let result = executor
            .execute(
                &plan_of(vec![MoveEntry {
                    source: src.clone(),
                    destination: dest.clone(),
                    document_id: ids[0],
                }]),
                &RunContext::quiet(),
            )
            .await;

        assert!(result.is_err());
        assert!(src.exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_entry() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, "a").unwrap();
        let store = InMemoryStore::new();
        let ids = seeded(&store, &[&src]).await;

        let ctx = RunContext::quiet();
        ctx.cancel.cancel();
        let executor = ReorganizeExecutor::new(&store, fast_retry());
        let report = executor
            .execute(
                &plan_of(vec![MoveEntry {
                    source: src.clone(),
                    destination: dir.path().join("t/a.txt"),
                    document_id: ids[0],
                }]),
                &ctx,
            )
            .await
            .unwrap();
        assert!(report.summary.cancelled);
        assert!(report.applied.is_empty());
        assert!(src.exists());
    }

    #[test]
    fn cleanup_removes_nested_chain_deepest_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("A/B/C")).unwrap();

        let removed = remove_empty_dirs(root);
        assert_eq!(
            removed,
            vec![root.join("A/B/C"), root.join("A/B"), root.join("A")]
        );
        assert!(root.exists());
    }

    #[test]
    fn cleanup_keeps_non_empty_dirs_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("keep/empty")).unwrap();
        fs::write(root.join("keep/file.txt"), "x").unwrap();
        fs::create_dir_all(root.join("drop")).unwrap();

        let removed = remove_empty_dirs(root);
        assert_eq!(removed, vec![root.join("drop"), root.join("keep/empty")]);
        assert!(root.join("keep/file.txt").exists());

        assert!(remove_empty_dirs(root).is_empty());
    }
}
