use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sift_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sift"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/sift.sqlite"

[embedding]
provider = "hashing"

[vector]
backend = "local"
namespace = "test"
dimension = 64

[sources.filesystem.docs]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("sift.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sift(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_sift_with_env(config_path, args, &[])
}

fn run_sift_with_env(config_path: &Path, args: &[&str], env: &[(&str, &str)]) -> (String, String, bool) {
    let binary = sift_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .envs(env.iter().copied())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sift binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_sync_fails_when_vector_backend_is_down() {
    let (tmp, config_path) = setup_test_env();
    let config = fs::read_to_string(&config_path).unwrap().replace(
        "[vector]\nbackend = \"local\"",
        "[vector]\nbackend = \"remote\"\nmax_retries = 1\ninitial_backoff_ms = 1\nmax_backoff_ms = 2\ntimeout_secs = 2",
    );
    let config = format!(
        "{}\n[vector.remote]\nhost = \"http://127.0.0.1:9\"\napi_key_env = \"SIFT_TEST_VECTOR_KEY\"\n",
        config
    );
    fs::write(&config_path, config).unwrap();

    let env = [("SIFT_TEST_VECTOR_KEY", "test-key")];
    let run = |args: &[&str]| run_sift_with_env(&config_path, args, &env);

    let (_, stderr, success) = run(&["init"]);
    assert!(success, "init failed: {}", stderr);

    let (stdout, stderr, success) = run(&["sync", "filesystem:docs"]);
    assert!(!success, "sync should fail: stdout={}", stdout);
    assert!(stdout.contains("lexical: 3"), "got: {}", stdout);
    assert!(stdout.contains("vector writes deferred: 3"), "got: {}", stdout);
    assert!(!stdout.contains("\nok"), "got: {}", stdout);
    assert!(stderr.contains("vector backend unavailable"), "got: {}", stderr);
    assert!(tmp.path().join("data/sift.sqlite").exists());
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sift(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/sift.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_sift(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_sift(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_indexes_both_indices() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    let (stdout, stderr, success) = run_sift(&config_path, &["sync", "filesystem"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("fetched: 3 items"), "got: {}", stdout);
    assert!(stdout.contains("lexical: 3"), "got: {}", stdout);
    assert!(stdout.contains("vectors: 3"), "got: {}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_resync_full_does_not_duplicate() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    run_sift(&config_path, &["sync", "all", "--full"]);
    let (stdout, _, success) = run_sift(&config_path, &["sync", "all", "--full"]);
    assert!(success);
    assert!(stdout.contains("fetched: 3 items"));

    let (status, _, success) = run_sift(&config_path, &["status"]);
    assert!(success, "status failed: {}", status);
    assert!(status.contains("Lexical:     3 documents"), "got: {}", status);
    assert!(status.contains("Vectors:     3 in namespace 'test'"), "got: {}", status);
    assert!(status.contains("Id registry: 3 documents"), "got: {}", status);
}

#[test]
fn test_sync_incremental_picks_up_changes() {
    let (tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    run_sift(&config_path, &["sync", "filesystem:docs"]);

    let (stdout, _, success) = run_sift(&config_path, &["sync", "filesystem:docs"]);
    assert!(success);
    assert!(!stdout.contains("watermark: (none)"), "got: {}", stdout);

    std::thread::sleep(std::time::Duration::from_secs(1));
    fs::write(
        tmp.path().join("files/alpha.md"),
        "# Alpha Document Updated\n\nThis file was modified with zeppelin notes.",
    )
    .unwrap();

    let (stdout, _, success) = run_sift(&config_path, &["sync", "filesystem:docs"]);
    assert!(success);
    // Files sharing the watermark's mtime are fetched again, so only a lower
    // bound holds on coarse-grained filesystems.
    let fetched = fetched_count(&stdout);
    assert!((1..=3).contains(&fetched), "got: {}", stdout);

    let (stdout, _, _) = run_sift(&config_path, &["search", "zeppelin", "--mode", "keyword"]);
    assert!(stdout.contains("alpha.md"), "got: {}", stdout);

    let (status, _, _) = run_sift(&config_path, &["status"]);
    assert!(status.contains("Lexical:     3 documents"), "got: {}", status);
}

fn fetched_count(stdout: &str) -> usize {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("fetched: "))
        .and_then(|rest| rest.trim_end_matches(" items").parse().ok())
        .unwrap_or_else(|| panic!("no fetched line in: {}", stdout))
}

#[test]
fn test_search_modes() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    run_sift(&config_path, &["sync", "all"]);

    for mode in ["keyword", "semantic", "hybrid"] {
        let (stdout, stderr, success) =
            run_sift(&config_path, &["search", "Rust programming cargo crates", "--mode", mode]);
        assert!(success, "search failed in {} mode: {}", mode, stderr);
        let first = stdout.lines().next().unwrap_or_default();
        assert!(first.contains("alpha.md"), "mode {}: got {}", mode, stdout);
    }
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    let (stdout, _, success) = run_sift(&config_path, &["search", "nothing", "--mode", "keyword"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_invalid_mode() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    let (_, stderr, success) = run_sift(&config_path, &["search", "rust", "--mode", "fuzzy"]);
    assert!(!success);
    assert!(stderr.contains("Unknown search mode"));
}

#[test]
fn test_remove_documents() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    run_sift(&config_path, &["sync", "all"]);

    let (stdout, stderr, success) = run_sift(&config_path, &["remove", "docs", "gamma.txt"]);
    assert!(success, "remove failed: {}", stderr);
    assert!(stdout.contains("removed 1 of 1"));

    let (stdout, _, _) = run_sift(&config_path, &["search", "Kubernetes Docker", "--mode", "keyword"]);
    assert!(!stdout.contains("gamma.txt"), "got: {}", stdout);
}

#[test]
fn test_clear_requires_confirmation() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    run_sift(&config_path, &["sync", "all"]);

    let (_, stderr, success) = run_sift(&config_path, &["clear"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, _, success) = run_sift(&config_path, &["clear", "--yes"]);
    assert!(success);
    assert!(stdout.contains("Cleared"));

    let (stdout, _, _) = run_sift(&config_path, &["search", "document", "--mode", "keyword"]);
    assert!(stdout.contains("No results."));

    // Watermarks were reset, so the next sync fetches everything again.
    let (stdout, _, _) = run_sift(&config_path, &["sync", "all"]);
    assert!(stdout.contains("fetched: 3 items"), "got: {}", stdout);
}

#[test]
fn test_sync_unknown_source() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    let (_, stderr, success) = run_sift(&config_path, &["sync", "git:platform"]);
    assert!(!success);
    assert!(stderr.contains("No source matches"));
}

#[test]
fn test_sources_lists_configured_source() {
    let (_tmp, config_path) = setup_test_env();

    run_sift(&config_path, &["init"]);
    let (stdout, _, success) = run_sift(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("filesystem:docs"));
    assert!(stdout.contains("OK"));
    assert!(stdout.contains("never"));
}

#[test]
fn test_invalid_source_root_fails_before_fetch() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("files")).unwrap();

    run_sift(&config_path, &["init"]);
    let (_, stderr, success) = run_sift(&config_path, &["sync", "all"]);
    assert!(!success);
    assert!(stderr.contains("invalid configuration"), "got: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_sift(&tmp.path().join("absent.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
