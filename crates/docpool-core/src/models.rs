//! Core data models.
//!
//! A [`Document`] is one unique piece of content living in the managed
//! workspace. Its identity is the fingerprint of its text slice; its
//! `path` follows the file around as the reorganizer moves it.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sparse::SparseRow;

/// A persisted, deduplicated document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Store-assigned id. Positive, unique, never reused within a store.
    pub id: i64,
    /// Lowercase hex SHA-256 of `text_slice`. Unique across the store.
    pub fingerprint: String,
    /// Current location of the file inside the workspace.
    pub path: PathBuf,
    /// Head/middle/tail sample of the cleaned text. May be empty when
    /// extraction failed at ingestion time.
    pub text_slice: String,
    /// TF-IDF row, absent until the corpus has been vectorized.
    pub vector: Option<SparseRow>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    /// Unix timestamp (seconds), bumped on path/vector/slice updates.
    pub updated_at: i64,
}

/// A document that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub fingerprint: String,
    pub path: PathBuf,
    pub text_slice: String,
}

/// A file skipped during ingestion because its fingerprint was already known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateFile {
    pub path: PathBuf,
    pub fingerprint: String,
}

/// One planned file move: `source` is renamed to `destination` and the
/// document's stored path follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub document_id: i64,
}

/// Kind of a recorded pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Ingestion,
    Vectorization,
    Clustering,
    Grouping,
    Cleanup,
    FilenameSearch,
    ContentSearch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Ingestion => "ingestion",
            TaskKind::Vectorization => "vectorization",
            TaskKind::Clustering => "clustering",
            TaskKind::Grouping => "grouping",
            TaskKind::Cleanup => "cleanup",
            TaskKind::FilenameSearch => "filename_search",
            TaskKind::ContentSearch => "content_search",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "ingestion" => TaskKind::Ingestion,
            "vectorization" => TaskKind::Vectorization,
            "clustering" => TaskKind::Clustering,
            "grouping" => TaskKind::Grouping,
            "cleanup" => TaskKind::Cleanup,
            "filename_search" => TaskKind::FilenameSearch,
            "content_search" => TaskKind::ContentSearch,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded pipeline run. `summary` is filled in when the run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRun {
    pub id: i64,
    pub kind: TaskKind,
    pub started_at: i64,
    pub summary: Option<String>,
}

/// Counters accumulated over one run.
///
/// For ingestion `processed + duplicates + skipped + failed` equals the
/// number of files scanned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Moves that landed under a counter-suffixed name.
    pub renamed: usize,
    /// Items left where they were because nothing was similar enough.
    pub unclustered: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn merge(&mut self, other: &RunSummary) {
        self.processed += other.processed;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.renamed += other.renamed;
        self.unclustered += other.unclustered;
        self.cancelled |= other.cancelled;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, duplicates {}, skipped {}, failed {}",
            self.processed, self.duplicates, self.skipped, self.failed
        )?;
        if self.renamed > 0 {
            write!(f, ", renamed {}", self.renamed)?;
        }
        if self.unclustered > 0 {
            write!(f, ", unclustered {}", self.unclustered)?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}
