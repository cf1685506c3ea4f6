//! Clustering, grouping and cleanup runs.
//!
//! - `cluster`: k-partition of every vectorized document under a
//!   directory, then a greedy threshold pass inside each new cluster
//!   directory, then cleanup.
//! - `group`: greedy threshold pass only, then cleanup.
//! - `cleanup`: remove empty directories below a root.
//!
//! Plans are computed against the primed index and executed with
//! [`ReorganizeExecutor`](crate::executor::ReorganizeExecutor); see the
//! executor for the per-file guarantees.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use docpool_core::cluster::{Candidate, ClusterPlanner, MovePlan, PlanOutcome};
use docpool_core::models::{RunSummary, TaskKind, TaskRun};
use docpool_core::store::DocumentStore;

use crate::config::{validate_threshold, Config};
use crate::executor::remove_empty_dirs;
use crate::orchestrator::{self, canonical_dir, print_report, Orchestrator, RunReport};
use crate::progress::{PipelineState, RunContext};

impl<S: DocumentStore> Orchestrator<S> {
    /// K-partition the documents under `target_dir` into `k` topic
    /// directories, then group near-duplicates inside each of them.
    pub async fn run_clustering(
        &mut self,
        target_dir: &Path,
        k: usize,
        threshold: f32,
        ctx: &RunContext,
    ) -> Result<RunReport> {
        self.begin_run();
        let target = canonical_dir(target_dir)?;
        let task = self.store.create_task_run(TaskKind::Clustering).await?;
        self.ensure_primed().await?;
        self.enter(PipelineState::Ready)?;

        self.enter(PipelineState::Planning)?;
        ctx.started(PipelineState::Planning);
        let candidates = self.candidates_under(&target);
        let outcome = ClusterPlanner::new(self.cache.index(), &self.settings.planner)
            .plan_k_partition(&candidates, &target, k);
        let plan = match outcome {
            PlanOutcome::Planned(plan) => plan,
            PlanOutcome::Skipped {
                candidates,
                requested,
            } => {
                info!(candidates, requested, "too few documents to cluster");
                self.enter(PipelineState::Done)?;
                let reason = format!(
                    "{candidates} candidate documents for {requested} requested clusters"
                );
                return self.finish(&task, RunSummary::default(), Some(reason)).await;
            }
        };
        info!(
            clusters = plan.clusters.len(),
            moves = plan.entries.len(),
            "k-partition planned"
        );

        let mut summary = RunSummary {
            unclustered: plan.unclustered.len(),
            ..Default::default()
        };
        self.enter(PipelineState::Executing)?;
        let report = self.execute_plan(&plan, ctx).await?;
        summary.merge(&report.summary);

        for cluster in &plan.clusters {
            if summary.cancelled || ctx.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let candidates = self.candidates_under(&cluster.directory);
            if candidates.len() < 2 {
                continue;
            }
            self.enter(PipelineState::Planning)?;
            let sub_plan = self.plan_greedy(&candidates, &cluster.directory, threshold);
            if sub_plan.is_empty() {
                self.enter(PipelineState::Executing)?;
                continue;
            }
            self.enter(PipelineState::Executing)?;
            let report = self.execute_plan(&sub_plan, ctx).await?;
            summary.merge(&report.summary);
        }

        self.complete(&task, summary, &target, ctx).await
    }

    /// Group similar documents under `target_dir` into sub-directories;
    /// documents with no close match stay where they are.
    pub async fn run_grouping(
        &mut self,
        target_dir: &Path,
        threshold: f32,
        ctx: &RunContext,
    ) -> Result<RunReport> {
        self.begin_run();
        let target = canonical_dir(target_dir)?;
        let task = self.store.create_task_run(TaskKind::Grouping).await?;
        self.ensure_primed().await?;
        self.enter(PipelineState::Ready)?;

        self.enter(PipelineState::Planning)?;
        ctx.started(PipelineState::Planning);
        let candidates = self.candidates_under(&target);
        let plan = self.plan_greedy(&candidates, &target, threshold);
        info!(
            groups = plan.clusters.len(),
            unclustered = plan.unclustered.len(),
            "greedy grouping planned"
        );

        let mut summary = RunSummary {
            unclustered: plan.unclustered.len(),
            ..Default::default()
        };
        self.enter(PipelineState::Executing)?;
        let report = self.execute_plan(&plan, ctx).await?;
        summary.merge(&report.summary);

        self.complete(&task, summary, &target, ctx).await
    }

    /// Remove empty directories below `target_dir`.
    pub async fn run_cleanup(&mut self, target_dir: &Path, ctx: &RunContext) -> Result<RunReport> {
        self.begin_run();
        let target = canonical_dir(target_dir)?;
        let task = self.store.create_task_run(TaskKind::Cleanup).await?;
        self.enter(PipelineState::Cleanup)?;
        ctx.started(PipelineState::Cleanup);
        let removed = remove_empty_dirs(&target);
        self.enter(PipelineState::Done)?;

        let summary = RunSummary {
            processed: removed.len(),
            ..Default::default()
        };
        let mut report = self.finish(&task, summary, None).await?;
        report.removed_dirs = removed;
        Ok(report)
    }

    /// Cleanup and final bookkeeping shared by the move runs. A cancelled
    /// run skips cleanup.
    async fn complete(
        &mut self,
        task: &TaskRun,
        summary: RunSummary,
        target: &Path,
        ctx: &RunContext,
    ) -> Result<RunReport> {
        if summary.cancelled {
            return self.finish(task, summary, None).await;
        }
        self.enter(PipelineState::Cleanup)?;
        ctx.started(PipelineState::Cleanup);
        let removed = remove_empty_dirs(target);
        info!(removed = removed.len(), "empty directories removed");
        self.enter(PipelineState::Done)?;
        let mut report = self.finish(task, summary, None).await?;
        report.removed_dirs = removed;
        Ok(report)
    }

    fn plan_greedy(&self, candidates: &[Candidate], dir: &Path, threshold: f32) -> MovePlan {
        ClusterPlanner::new(self.cache.index(), &self.settings.planner)
            .plan_greedy(candidates, dir, threshold)
    }

    /// Indexed documents whose current path is below `dir`, in row order.
    fn candidates_under(&self, dir: &Path) -> Vec<Candidate> {
        self.cache
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.path.starts_with(dir) && e.path != dir)
            .map(|(row, e)| Candidate {
                document_id: e.id,
                path: e.path.clone(),
                row,
            })
            .collect()
    }
}

pub async fn run_cluster(
    config: &Config,
    dir: PathBuf,
    k: Option<usize>,
    threshold: Option<f32>,
    ctx: &RunContext,
) -> Result<()> {
    let mut orchestrator = orchestrator::open(config).await?;
    let k = k.unwrap_or(config.clustering.k);
    let threshold =
        validate_threshold(threshold.unwrap_or(config.clustering.similarity_threshold))?;
    let report = orchestrator.run_clustering(&dir, k, threshold, ctx).await?;
    print_report(&format!("cluster {} (k = {k})", dir.display()), &report);
    Ok(())
}

pub async fn run_group(
    config: &Config,
    dir: PathBuf,
    threshold: Option<f32>,
    ctx: &RunContext,
) -> Result<()> {
    let mut orchestrator = orchestrator::open(config).await?;
    let threshold =
        validate_threshold(threshold.unwrap_or(config.clustering.similarity_threshold))?;
    let report = orchestrator.run_grouping(&dir, threshold, ctx).await?;
    print_report(&format!("group {}", dir.display()), &report);
    Ok(())
}

pub async fn run_cleanup(config: &Config, dir: PathBuf, ctx: &RunContext) -> Result<()> {
    let mut orchestrator = orchestrator::open(config).await?;
    let report = orchestrator.run_cleanup(&dir, ctx).await?;
    println!("cleanup {} (task {})", dir.display(), report.task_run_id);
    for removed in &report.removed_dirs {
        println!("  removed {}", removed.display());
    }
    println!("  empty directories removed: {}", report.removed_dirs.len());
    Ok(())
}
