//! Pipeline progress reporting and cooperative cancellation.
//!
//! Long-running stages report what they are working on so the operator
//! sees how much is left. Progress goes to **stderr** so stdout remains
//! parseable for scripts.
//!
//! Cancellation is a shared flag ([`CancellationToken`]) polled by each
//! stage between items. It never interrupts a single file's
//! move-and-persist step.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline state. Also names the stage in progress output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PipelineState {
    Idle,
    Scanning,
    Deduping,
    Persisting,
    Vectorizing,
    Ready,
    Planning,
    Executing,
    Cleanup,
    Done,
    Cancelled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Scanning => "scanning",
            PipelineState::Deduping => "deduping",
            PipelineState::Persisting => "persisting",
            PipelineState::Vectorizing => "vectorizing",
            PipelineState::Ready => "ready",
            PipelineState::Planning => "planning",
            PipelineState::Executing => "executing",
            PipelineState::Cleanup => "cleanup",
            PipelineState::Done => "done",
            PipelineState::Cancelled => "cancelled",
        }
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// Ingestion walks `Idle → Scanning → Deduping → Persisting →
    /// Vectorizing → Ready`; reorganizing runs walk `Ready → Planning →
    /// Executing → (Planning → Executing)* → Cleanup → Done`; a search
    /// export ends at `Executing → Done`. Any live state may move to
    /// `Cancelled`, which is terminal.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        if self == Cancelled {
            return false;
        }
        matches!(
            (self, next),
            (_, Cancelled)
                | (Idle, Scanning)
                | (Scanning, Deduping)
                | (Deduping, Persisting)
                | (Persisting, Vectorizing)
                | (Idle | Ready, Vectorizing)
                | (Vectorizing, Ready)
                | (Idle, Ready)
                | (Ready, Planning)
                | (Planning, Executing)
                | (Planning, Done)
                | (Executing, Planning)
                | (Executing, Cleanup)
                | (Executing, Done)
                | (Idle | Ready, Cleanup)
                | (Cleanup, Done)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A stage started; total unknown.
    Started { state: PipelineState },
    /// `n` of `total` items handled in this stage.
    Advanced {
        state: PipelineState,
        n: u64,
        total: u64,
        item: String,
    },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "docpool  deduping  1,234 / 5,000  report.pdf".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Started { state } => format!("docpool  {}...\n", state),
            ProgressEvent::Advanced {
                state,
                n,
                total,
                item,
            } => format!(
                "docpool  {}  {} / {}  {}\n",
                state,
                format_number(*n),
                format_number(*total),
                item
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Started { state } => serde_json::json!({
                "event": "progress",
                "state": state.as_str(),
            }),
            ProgressEvent::Advanced {
                state,
                n,
                total,
                item,
            } => serde_json::json!({
                "event": "progress",
                "state": state.as_str(),
                "n": n,
                "total": total,
                "item": item,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected human, json or off",
                other
            )),
        }
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress sink and cancellation token handed to every pipeline run.
pub struct RunContext {
    pub progress: Box<dyn ProgressReporter>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(progress: Box<dyn ProgressReporter>, cancel: CancellationToken) -> Self {
        Self { progress, cancel }
    }

    /// No progress output, never cancelled unless `cancel` is triggered.
    pub fn quiet() -> Self {
        Self::new(Box::new(NoProgress), CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn started(&self, state: PipelineState) {
        self.progress.report(ProgressEvent::Started { state });
    }

    pub fn advanced(&self, state: PipelineState, n: usize, total: usize, item: impl Into<String>) {
        self.progress.report(ProgressEvent::Advanced {
            state,
            n: n as u64,
            total: total as u64,
            item: item.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn ingestion_path_is_legal() {
        use PipelineState::*;
        let path = [Idle, Scanning, Deduping, Persisting, Vectorizing, Ready];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn reorganize_path_is_legal() {
        use PipelineState::*;
        let path = [Ready, Planning, Executing, Planning, Executing, Cleanup, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn cancelled_is_terminal() {
        use PipelineState::*;
        assert!(Executing.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Idle));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn planning_requires_ready() {
        assert!(!PipelineState::Idle.can_transition_to(PipelineState::Planning));
        assert!(!PipelineState::Scanning.can_transition_to(PipelineState::Executing));
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn progress_mode_parses() {
        assert_eq!("json".parse::<ProgressMode>(), Ok(ProgressMode::Json));
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
