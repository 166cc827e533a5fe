//! CLI command contract tests
//!
//! Runs the `lk` binary against temp directories with fixture snapshots and
//! a config that points the store and backups into the temp dir.
//!
//! Contract guarantees tested:
//! - Deterministic exit codes
//! - Valid JSON on stdout with `--json`
//! - Actionable error messages for failure paths

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test fixture helpers
// =============================================================================

const SNAPSHOT_V2: &str = r#"{
  "v": 2,
  "ts": 1700000000000,
  "main": {
    "root": {
      "type": "split",
      "direction": "horizontal",
      "sizes": [60, 40],
      "children": [
        {"type": "tabGroup", "tabs": [{"path": "a.md", "active": true}]},
        {"type": "tabGroup", "tabs": [{"path": "b.md"}, {"path": "c.md", "active": true}]}
      ]
    }
  }
}"#;

const SNAPSHOT_V1: &str = r#"{"main": {"tabs": [{"path": "a.md", "active": true}, {"path": "b.md"}]}}"#;

/// Temp workspace with a config file and a v2 snapshot fixture.
/// Returns (TempDir guard, config path, snapshot path).
fn setup_workspace() -> (TempDir, String, String) {
    let dir = TempDir::new().expect("create temp dir");
    let data = dir.path().join("data");
    let backups = dir.path().join("backups");
    let config = format!(
        "[logging]\nlevel = \"warn\"\n\n[store]\ndata_dir = {:?}\n\n[backup]\ndir = {:?}\n",
        data.to_string_lossy(),
        backups.to_string_lossy()
    );
    let config_path = dir.path().join("layoutkeep.toml");
    std::fs::write(&config_path, config).expect("write config");

    let snapshot_path = dir.path().join("snapshot.json");
    std::fs::write(&snapshot_path, SNAPSHOT_V2).expect("write snapshot");

    let config_path = config_path.to_string_lossy().to_string();
    let snapshot_path = snapshot_path.to_string_lossy().to_string();
    (dir, config_path, snapshot_path)
}

#[allow(deprecated)]
fn lk_cmd() -> Command {
    Command::cargo_bin("lk").expect("lk binary")
}

fn lk(config: &str) -> Command {
    let mut cmd = lk_cmd();
    cmd.env_remove("RUST_LOG").args(["--config", config]);
    cmd
}

// =============================================================================
// Help
// =============================================================================

#[test]
fn help_lists_subcommands() {
    lk_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("backup"));
}

// =============================================================================
// Codec commands
// =============================================================================

#[test]
fn encode_then_decode_round_trips_paths() {
    let (_dir, config, snapshot) = setup_workspace();
    let output = lk(&config)
        .args(["encode", &snapshot])
        .output()
        .expect("run encode");
    assert!(output.status.success());
    let encoded = String::from_utf8(output.stdout).expect("utf8");
    assert!(!encoded.trim().contains('{'));

    lk(&config)
        .args(["decode", encoded.trim()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"a.md\""))
        .stdout(predicate::str::contains("\"c.md\""));
}

#[test]
fn decode_reads_stdin() {
    let (_dir, config, snapshot) = setup_workspace();
    let encoded = lk(&config)
        .args(["encode", &snapshot])
        .output()
        .expect("run encode")
        .stdout;
    lk(&config)
        .args(["decode", "-"])
        .write_stdin(encoded)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"b.md\""));
}

#[test]
fn decode_garbage_fails_with_remediation() {
    let (_dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["decode", "%%%not-base64%%%"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Codec error"))
        .stderr(predicate::str::contains("To fix:"));
}

#[test]
fn inspect_reports_original_version() {
    let (dir, config, snapshot) = setup_workspace();
    lk(&config)
        .args(["inspect", &snapshot])
        .assert()
        .success()
        .stdout(predicate::str::contains("version: 2"))
        .stdout(predicate::str::contains("main: h{60,40}([a.md] | [b.md, c.md*])"));

    let v1 = dir.path().join("v1.json");
    std::fs::write(&v1, SNAPSHOT_V1).expect("write v1");
    lk(&config)
        .args(["inspect", &v1.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("version: 1"))
        .stdout(predicate::str::contains("main: [a.md*, b.md]"));
}

#[test]
fn inspect_json_is_valid() {
    let (_dir, config, snapshot) = setup_workspace();
    let output = lk(&config)
        .args(["--json", "inspect", &snapshot])
        .output()
        .expect("run inspect");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["version"], 2);
    assert_eq!(value["tabs"], 3);
    assert_eq!(value["windows"][0]["groups"], 2);
}

// =============================================================================
// Geometry and dry runs
// =============================================================================

#[test]
fn tile_three_windows() {
    let (_dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["tile", "--count", "3", "--screen", "1000x800", "--source", "1000x800"])
        .assert()
        .success()
        .stdout(predicate::str::contains("needs tiling: false"))
        .stdout(predicate::str::contains("0 0 500 800"))
        .stdout(predicate::str::contains("500 0 500 400"))
        .stdout(predicate::str::contains("500 400 500 400"));
}

#[test]
fn tile_rejects_bad_size() {
    lk_cmd()
        .args(["tile", "--count", "2", "--screen", "wide"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("WIDTHxHEIGHT"));
}

#[test]
fn simulate_rebuilds_layout() {
    let (_dir, config, snapshot) = setup_workspace();
    lk(&config)
        .args(["simulate", &snapshot])
        .assert()
        .success()
        .stdout(predicate::str::contains("h{60,40}([a.md] | [b.md, c.md*])"))
        .stdout(predicate::str::contains("opened 3 tabs in 1 windows"));
}

#[test]
fn simulate_skips_missing_and_reports_moves() {
    let (_dir, config, snapshot) = setup_workspace();
    lk(&config)
        .args([
            "simulate",
            &snapshot,
            "--missing",
            "b.md",
            "--rename",
            "a.md=archive/a.md",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped 1 tabs"))
        .stdout(predicate::str::contains("moved: a.md -> archive/a.md"));
}

#[test]
fn simulate_json_is_valid() {
    let (_dir, config, snapshot) = setup_workspace();
    let output = lk(&config)
        .args(["--json", "simulate", &snapshot])
        .output()
        .expect("run simulate");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["tabsOpened"], 3);
    assert_eq!(value["tiled"], false);
}

// =============================================================================
// Store and backups
// =============================================================================

#[test]
fn empty_store_lists_nothing() {
    let (_dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["store", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no stored arrangements"));
}

#[test]
fn showing_unknown_key_fails() {
    let (_dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["store", "show", "missing.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No saved arrangement for missing.md"))
        .stderr(predicate::str::contains("lk store list"));
}

#[test]
fn backup_create_list_restore() {
    let (dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["backup", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(0 arrangements)"));

    let output = lk(&config)
        .args(["--json", "backup", "list"])
        .output()
        .expect("run backup list");
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let path = entries[0]["path"].as_str().expect("path").to_string();
    assert!(path.starts_with(&*dir.path().join("backups").to_string_lossy()));

    lk(&config)
        .args(["backup", "restore", &path, "--merge"])
        .assert()
        .success()
        .stdout(predicate::str::contains("restored 0 arrangements"));
}

#[test]
fn restoring_missing_backup_fails() {
    let (_dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["backup", "restore", "/nonexistent/backup.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Backup not found"));
}

// =============================================================================
// Documents and config
// =============================================================================

#[test]
fn doc_id_is_stable() {
    let (dir, config, _snapshot) = setup_workspace();
    std::fs::write(dir.path().join("note.md"), "# Note\n").expect("write note");
    let root = dir.path().to_string_lossy().to_string();

    let first = lk(&config)
        .args(["doc", "id", "note.md", "--root", &root])
        .output()
        .expect("run doc id");
    assert!(first.status.success());
    let second = lk(&config)
        .args(["doc", "id", "note.md", "--root", &root])
        .output()
        .expect("run doc id");
    assert_eq!(first.stdout, second.stdout);

    lk(&config)
        .args(["doc", "show", "note.md", "--root", &root])
        .assert()
        .success()
        .stdout(predicate::str::contains("layout-id:"))
        .stdout(predicate::str::contains("arrangement: none"));
}

#[test]
fn doc_show_missing_document_fails() {
    let (dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["doc", "show", "gone.md", "--root", &dir.path().to_string_lossy()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Document not found"));
}

#[test]
fn config_show_prints_sections() {
    let (_dir, config, _snapshot) = setup_workspace();
    lk(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[store]"))
        .stdout(predicate::str::contains("debounce_ms = 2000"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[store]\nmax_entries_limit = 9\n").expect("write config");
    lk(&path.to_string_lossy())
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config error"));
}
