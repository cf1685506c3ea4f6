//! Task history and pool overview.
//!
//! `docpool tasks` prints document counts followed by the most recent
//! task runs, newest first, with a relative start time and the summary
//! each run wrote when it finished.

use anyhow::Result;

use docpool_core::models::TaskRun;
use docpool_core::store::DocumentStore;

use crate::config::Config;
use crate::orchestrator;

pub async fn run_tasks(config: &Config, limit: usize) -> Result<()> {
    let orchestrator = orchestrator::open(config).await?;
    let store = orchestrator.store();

    let documents = store.all_documents().await?;
    let vectorized = documents.iter().filter(|d| d.vector.is_some()).count();
    let runs = store.recent_task_runs(limit).await?;

    println!("docpool: {}", config.db.path.display());
    println!("  documents:  {}", documents.len());
    println!("  vectorized: {} / {}", vectorized, documents.len());
    println!();

    if runs.is_empty() {
        println!("No task runs recorded yet.");
        return Ok(());
    }
    println!("  {:>5}  {:<16} {:<14} SUMMARY", "ID", "TASK", "STARTED");
    println!("  {}", "-".repeat(76));
    for run in &runs {
        println!("{}", format_run(run, chrono::Utc::now().timestamp()));
    }
    Ok(())
}

fn format_run(run: &TaskRun, now: i64) -> String {
    format!(
        "  {:>5}  {:<16} {:<14} {}",
        run.id,
        run.kind.as_str(),
        format_ts_relative(run.started_at, now),
        run.summary.as_deref().unwrap_or("(running or aborted)")
    )
}

/// "just now", "5 mins ago", "3 hours ago", "2 days ago", or a date for
/// anything older than a month (or in the future).
fn format_ts_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;
    let plural = |n: i64, unit: &str| format!("{n} {unit}{} ago", if n == 1 { "" } else { "s" });
    match delta {
        d if d < 0 => format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3_600 => plural(d / 60, "min"),
        d if d < 86_400 => plural(d / 3_600, "hour"),
        d if d < 86_400 * 30 => plural(d / 86_400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
