//! # docpool
//!
//! Deduplicate a pool of documents, index their text and reorganize them
//! on disk into topic-named folders.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │  Source  │──▶│ Scan + Dedup  │──▶│Workspace │
//! │   tree   │   │ (fingerprint) │   │  copies  │
//! └──────────┘   └───────┬───────┘   └────┬─────┘
//!                        ▼                │
//!                  ┌──────────┐           │
//!                  │  SQLite  │◀── moves ─┤
//!                  │ docs+vec │           │
//!                  └────┬─────┘           │
//!                       ▼                 │
//!              ┌────────────────┐   ┌─────┴──────┐
//!              │ TF-IDF index   │──▶│  Cluster   │
//!              │ (primed cache) │   │ + Execute  │
//!              └────────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docpool init
//! docpool ingest --source ~/Documents/inbox
//! docpool similar 42
//! docpool cluster ./data/workspace --k 8
//! docpool search content "invoice"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite `DocumentStore` |
//! | [`scan`] | Source directory walking |
//! | [`extract`] | Text extraction per file format |
//! | [`executor`] | Move execution and empty-directory cleanup |
//! | [`orchestrator`] | Pipeline state, index cache, vectorization, similarity |
//! | [`ingest`] | Scan, dedup and workspace copy |
//! | [`reorganize`] | Clustering, grouping and cleanup runs |
//! | [`search`] | Keyword search with export |
//! | [`progress`] | Progress reporting and cancellation |
//! | [`tasks`] / [`tree_cmd`] | Read-only reports |

pub mod config;
pub mod db;
pub mod executor;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod reorganize;
pub mod scan;
pub mod search;
pub mod sqlite_store;
pub mod tasks;
pub mod tree_cmd;
