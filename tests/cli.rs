use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docpool_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docpool");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("notes")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    )
    .unwrap();
    fs::write(
        files_dir.join("notes/gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();
    // Same text as alpha.md under another name.
    fs::write(
        files_dir.join("notes/alpha copy.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docpool.sqlite"

[workspace]
root = "{root}/data/workspace"
source = "{root}/files"
extensions = [".md", ".txt"]

[clustering]
k = 2
similarity_threshold = 0.9

[search]
top_n = 5
export_dir = "{root}/exports"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docpool.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docpool(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docpool_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docpool binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn workspace_of(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data/workspace")
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docpool(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));

    let db_path = config_path.parent().unwrap().parent().unwrap().join("data/docpool.sqlite");
    assert!(db_path.exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docpool(&config_path, &["init"]);
    assert!(success, "first init failed: {}", stderr);
    let (_, stderr, success) = run_docpool(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docpool(&tmp.path().join("nope.toml"), &["tasks"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}

#[test]
fn test_ingest_dedups_and_copies() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docpool(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("processed: 3"), "stdout: {}", stdout);
    assert!(stdout.contains("duplicates: 1"), "stdout: {}", stdout);

    let workspace = workspace_of(&config_path);
    assert!(workspace.join("alpha.md").exists());
    assert!(workspace.join("beta.md").exists());
    assert!(workspace.join("notes/gamma.txt").exists());
    assert!(!workspace.join("notes/alpha copy.md").exists());

    // Nothing new the second time around.
    let (stdout, stderr, success) = run_docpool(&config_path, &["ingest"]);
    assert!(success, "second ingest failed: {}", stderr);
    assert!(stdout.contains("processed: 0"), "stdout: {}", stdout);
    assert!(stdout.contains("duplicates: 4"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_reset_starts_over() {
    let (_tmp, config_path) = setup_test_env();

    run_docpool(&config_path, &["ingest"]);
    let stray = workspace_of(&config_path).join("stray.txt");
    fs::write(&stray, "not from the source").unwrap();

    let (stdout, stderr, success) = run_docpool(&config_path, &["ingest", "--reset"]);
    assert!(success, "reset ingest failed: {}", stderr);
    assert!(stdout.contains("processed: 3"), "stdout: {}", stdout);
    assert!(!stray.exists());
}

#[test]
fn test_similar_excludes_the_document_itself() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_docpool(&config_path, &["similar", "1", "--top", "2"]);
    assert!(success, "similar failed: {}", stderr);
    assert!(!stdout.contains("] #1 "), "stdout: {}", stdout);
}

#[test]
fn test_similar_unknown_document_is_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);

    let (stdout, _, success) = run_docpool(&config_path, &["similar", "999"]);
    assert!(success);
    assert!(stdout.contains("No similar documents for 999."), "stdout: {}", stdout);
}

#[test]
fn test_vectorize_with_nothing_pending_is_skipped() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_docpool(&config_path, &["vectorize"]);
    assert!(success, "vectorize failed: {}", stderr);
    assert!(stdout.contains("skipped: nothing to vectorize"), "stdout: {}", stdout);

    let (stdout, stderr, success) =
        run_docpool(&config_path, &["vectorize", "--stopwords", "document,about"]);
    assert!(success, "vectorize with stopwords failed: {}", stderr);
    assert!(stdout.contains("processed: 3"), "stdout: {}", stdout);
}

#[test]
fn test_cluster_with_too_many_clusters_is_skipped() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);
    let workspace = workspace_of(&config_path);

    let (stdout, stderr, success) = run_docpool(
        &config_path,
        &["cluster", workspace.to_str().unwrap(), "--k", "10"],
    );
    assert!(success, "cluster failed: {}", stderr);
    assert!(stdout.contains("requested clusters"), "stdout: {}", stdout);
    assert!(workspace.join("alpha.md").exists());
}

#[test]
fn test_cluster_keeps_every_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);
    let workspace = workspace_of(&config_path);

    let (stdout, stderr, success) =
        run_docpool(&config_path, &["cluster", workspace.to_str().unwrap()]);
    assert!(success, "cluster failed: {}", stderr);
    assert!(stdout.contains("processed: 3"), "stdout: {}", stdout);

    let files = walkdir::WalkDir::new(&workspace)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(files, 3);
}

#[test]
fn test_threshold_flag_out_of_range_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);
    let workspace = workspace_of(&config_path);

    for args in [
        vec!["group", workspace.to_str().unwrap(), "--threshold", "1.5"],
        vec!["cluster", workspace.to_str().unwrap(), "--threshold", "0"],
    ] {
        let (_, stderr, success) = run_docpool(&config_path, &args);
        assert!(!success, "{:?} should fail", args);
        assert!(stderr.contains("similarity threshold"), "stderr: {}", stderr);
    }
    assert!(workspace.join("alpha.md").exists());
}

#[test]
fn test_search_exports_matches() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_docpool(&config_path, &["search", "filename", "alpha"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("alpha.md"), "stdout: {}", stdout);

    let exports = config_path.parent().unwrap().parent().unwrap().join("exports");
    assert!(exports.join("filename_alpha/alpha.md").exists());

    let (stdout, _, success) = run_docpool(&config_path, &["search", "content", "kubernetes"]);
    assert!(success);
    assert!(stdout.contains("gamma.txt"), "stdout: {}", stdout);
    assert!(exports.join("content_kubernetes/gamma.txt").exists());
}

#[test]
fn test_search_without_matches() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);

    let (stdout, _, success) = run_docpool(&config_path, &["search", "content", "zebra"]);
    assert!(success);
    assert!(stdout.contains("No documents match"), "stdout: {}", stdout);
}

#[test]
fn test_search_rejects_unknown_mode() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_docpool(&config_path, &["search", "title", "alpha"]);
    assert!(!success);
}

#[test]
fn test_cleanup_reports_removed_dirs() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);
    let workspace = workspace_of(&config_path);
    fs::create_dir_all(workspace.join("empty/inner")).unwrap();

    let (stdout, stderr, success) =
        run_docpool(&config_path, &["cleanup", workspace.to_str().unwrap()]);
    assert!(success, "cleanup failed: {}", stderr);
    assert!(stdout.contains("empty directories removed: 2"), "stdout: {}", stdout);
    assert!(!workspace.join("empty").exists());
    assert!(workspace.join("notes/gamma.txt").exists());
}

#[test]
fn test_tasks_lists_runs() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docpool(&config_path, &["tasks"]);
    assert!(success);
    assert!(stdout.contains("No task runs recorded yet."));

    run_docpool(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_docpool(&config_path, &["tasks"]);
    assert!(success, "tasks failed: {}", stderr);
    assert!(stdout.contains("documents:  3"), "stdout: {}", stdout);
    assert!(stdout.contains("ingestion"), "stdout: {}", stdout);
    assert!(stdout.contains("duplicates 1"), "stdout: {}", stdout);
}

#[test]
fn test_tree_shows_workspace_layout() {
    let (_tmp, config_path) = setup_test_env();
    run_docpool(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_docpool(&config_path, &["tree"]);
    assert!(success, "tree failed: {}", stderr);
    assert!(stdout.contains("workspace"), "stdout: {}", stdout);
    assert!(stdout.contains("notes"), "stdout: {}", stdout);
}
