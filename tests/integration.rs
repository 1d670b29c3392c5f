use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

fn relay_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("relay");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let snapshot = r#"{
        "metadata": {"exported_at": "2024-05-01T10:00:00", "total_rows": 3},
        "tables": {
            "products": {
                "structure": [
                    {"column_name": "id", "data_type": "INTEGER", "primary_key": true},
                    {"column_name": "name", "data_type": "TEXT", "not_null": true}
                ],
                "data": [
                    {"id": 1, "name": "Lamp", "price": 9.99, "active": true},
                    {"id": 2, "name": "Desk", "price": "N/A", "active": false}
                ],
                "row_count": 2
            },
            "usuarios": {
                "data": [{"id": 1, "email": "a@example.com"}],
                "row_count": 1
            }
        }
    }"#;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(snapshot.as_bytes()).unwrap();
    fs::write(root.join("backup.json.gz"), encoder.finish().unwrap()).unwrap();

    let config_content = format!(
        r#"[store]
dir = "{}/data/stores"

[mailbox]
subject = "manoli_backup"

[query]
max_rows = 50
blocked_tables = ["usuarios"]

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );

    let config_path = config_dir.join("relay.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_relay(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = relay_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run relay binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_status_before_any_load() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_relay(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("NOT_READY"));
    assert!(stdout.contains("no snapshot loaded yet"));
}

#[test]
fn test_query_before_any_load_is_not_ready() {
    let (_tmp, config_path) = setup_test_env();

    let (_stdout, stderr, success) = run_relay(&config_path, &["query", "SELECT 1"]);
    assert!(!success);
    assert!(stderr.contains("unavailable"), "stderr: {}", stderr);
}

#[test]
fn test_load_then_query() {
    let (tmp, config_path) = setup_test_env();
    let artifact = tmp.path().join("backup.json.gz");

    let (stdout, stderr, success) =
        run_relay(&config_path, &["load", artifact.to_str().unwrap()]);
    assert!(success, "load failed: {}", stderr);
    assert!(stdout.contains("Loaded 2 tables (3 rows)"));
    assert!(stdout.contains("products"));
    assert!(!stdout.contains("usuarios"));

    let (stdout, stderr, success) = run_relay(
        &config_path,
        &["query", "SELECT id, price, active FROM products ORDER BY id"],
    );
    assert!(success, "query failed: {}", stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["columns"], serde_json::json!(["id", "price", "active"]));
    assert_eq!(parsed["rows"][0], serde_json::json!([1, "9.99", true]));
    assert_eq!(parsed["rows"][1], serde_json::json!([2, "N/A", false]));
    assert_eq!(parsed["truncated"], serde_json::json!(false));
}

#[test]
fn test_query_rejects_writes_and_blocked_tables() {
    let (tmp, config_path) = setup_test_env();
    let artifact = tmp.path().join("backup.json.gz");
    run_relay(&config_path, &["load", artifact.to_str().unwrap()]);

    let (_stdout, stderr, success) = run_relay(&config_path, &["query", "DELETE FROM products"]);
    assert!(!success);
    assert!(stderr.contains("rejected"), "stderr: {}", stderr);

    let (_stdout, stderr, success) =
        run_relay(&config_path, &["query", "SELECT * FROM usuarios"]);
    assert!(!success);
    assert!(stderr.contains("rejected"), "stderr: {}", stderr);

    // Store content is unchanged.
    let (stdout, _stderr, success) =
        run_relay(&config_path, &["query", "SELECT COUNT(*) AS n FROM products"]);
    assert!(success);
    assert!(stdout.contains("2"));
}

#[test]
fn test_status_after_load() {
    let (tmp, config_path) = setup_test_env();
    let artifact = tmp.path().join("backup.json.gz");
    run_relay(&config_path, &["load", artifact.to_str().unwrap()]);

    let (stdout, stderr, success) = run_relay(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("READY"));
    assert!(stdout.contains("2024-05-01T10:00:00"));
    assert!(stdout.contains("products"));
}

#[test]
fn test_reload_replaces_store_file() {
    let (tmp, config_path) = setup_test_env();
    let artifact = tmp.path().join("backup.json.gz");
    run_relay(&config_path, &["load", artifact.to_str().unwrap()]);

    let plain = tmp.path().join("second.json");
    fs::write(&plain, r#"{"products": [{"id": 7, "name": "Chair"}]}"#).unwrap();
    let (_stdout, stderr, success) = run_relay(&config_path, &["load", plain.to_str().unwrap()]);
    assert!(success, "second load failed: {}", stderr);

    let stores: Vec<_> = fs::read_dir(tmp.path().join("data/stores"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".sqlite"))
        .collect();
    assert_eq!(stores.len(), 1);

    let (stdout, _stderr, success) =
        run_relay(&config_path, &["query", "SELECT name FROM products"]);
    assert!(success);
    assert!(stdout.contains("Chair"));
}

#[test]
fn test_load_missing_file_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope.json.gz");

    let (_stdout, stderr, success) = run_relay(&config_path, &["load", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read"));
}
