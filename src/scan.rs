//! Source directory scanning.
//!
//! Walks a source tree and returns every file whose extension is in the
//! configured list, skipping excluded paths and Office lock files
//! (`~$report.docx`). The result is sorted so ingestion order is
//! reproducible.

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**", "**/.DS_Store"];

pub fn scan_files(root: &Path, extensions: &[String], exclude_globs: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Source directory does not exist: {}", root.display());
    }

    let include_set = build_extension_set(extensions)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if exclude_set.is_match(relative) {
            continue;
        }
        if !include_set.is_match(relative) {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with("~$") {
            debug!(path = %path.display(), "skipping office lock file");
            continue;
        }

        files.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

/// `**/*.ext` for every extension, matched case-insensitively.
fn build_extension_set(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim_start_matches('.');
        let glob = GlobBuilder::new(&format!("**/*.{ext}"))
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid extension: {ext}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .with_context(|| format!("Invalid exclude glob: {pattern}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
