//! # docpool core
//!
//! Pure logic shared by the docpool pipeline: the document model,
//! content fingerprinting, the sparse TF-IDF feature index, cluster
//! planning and the storage abstraction.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Everything
//! that touches disk or the database lives in the `docpool` app crate,
//! which hands plain values to the functions defined here.

pub mod cache;
pub mod cluster;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod models;
pub mod naming;
pub mod sparse;
pub mod store;
pub mod tokenize;
pub mod tree;
