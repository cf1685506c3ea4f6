//! File and directory naming helpers.
//!
//! Cluster labels come from free text, so they are scrubbed of
//! characters that are illegal on common filesystems before becoming
//! directory names. File collisions are resolved with a counter suffix:
//! `report.txt` → `report (1).txt` → `report (2).txt`.

use std::path::{Path, PathBuf};

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

pub const DEFAULT_MAX_DIR_NAME_CHARS: usize = 64;

/// Turn a free-text label into a safe directory name.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_dir_name(raw: &str, max_chars: usize) -> Option<String> {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if ILLEGAL_CHARS.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(max_chars).collect();
    // Windows refuses names ending in a dot or space.
    let name = capped.trim_end_matches(&['.', ' '][..]).trim_start();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Fallback directory name for the cluster at 1-based position `ordinal`.
pub fn fallback_dir_name(ordinal: usize) -> String {
    format!("cluster_{ordinal}")
}

/// `name` with ` (counter)` inserted before the extension.
///
/// ```rust
/// use docpool_core::naming::suffixed_file_name;
///
/// assert_eq!(suffixed_file_name("report.txt", 1), "report (1).txt");
/// assert_eq!(suffixed_file_name("README", 2), "README (2)");
/// ```
pub fn suffixed_file_name(name: &str, counter: usize) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{stem} ({counter}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({counter})"),
    }
}

/// First of `path`, `stem (1).ext`, `stem (2).ext`, ... for which
/// `is_taken` returns false.
pub fn next_free_path(path: &Path, is_taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !is_taken(path) {
        return path.to_path_buf();
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let mut counter = 1;
    loop {
        let candidate = parent.join(suffixed_file_name(&name, counter));
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
