//! Smoke tests to verify command wiring

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn repowatch(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("repowatch").unwrap();
    cmd.env("REPOWATCH_HOME", home)
        .env_remove("REPOWATCH_CONFIG")
        .env_remove("REPOWATCH_STORE_DIR")
        .env_remove("CRONJOB_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

// === Help ===

#[test]
fn test_top_level_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    repowatch(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_check_help_lists_passes() {
    let home = tempfile::tempdir().unwrap();
    repowatch(home.path())
        .args(["check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("storage"));
}

#[test]
fn test_serve_help() {
    let home = tempfile::tempdir().unwrap();
    repowatch(home.path())
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Address to bind to"));
}

#[test]
fn test_check_rejects_unknown_pass() {
    let home = tempfile::tempdir().unwrap();
    repowatch(home.path())
        .args(["check", "inventory"])
        .assert()
        .failure();
}

// === Config ===

#[test]
fn test_config_path_uses_home() {
    let home = tempfile::tempdir().unwrap();
    repowatch(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_then_refuses_overwrite() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("config.toml");

    repowatch(home.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config"));
    assert!(path.exists());

    repowatch(home.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    repowatch(home.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_show_masks_cron_key() {
    let home = tempfile::tempdir().unwrap();
    repowatch(home.path())
        .env("CRONJOB_KEY", "super-secret")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("super-secret").not());
}

#[test]
fn test_missing_explicit_config_fails() {
    let home = tempfile::tempdir().unwrap();
    repowatch(home.path())
        .arg("--config")
        .arg(home.path().join("nope.toml"))
        .args(["check", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

// === Check ===

#[test]
fn test_check_status_with_empty_store() {
    let home = tempfile::tempdir().unwrap();
    let store = home.path().join("store");
    let config = write_config(
        home.path(),
        &format!("[store]\ndir = {:?}\n", store.display().to_string()),
    );

    repowatch(home.path())
        .arg("--config")
        .arg(&config)
        .args(["check", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No repository to check"));
}

#[cfg(unix)]
#[test]
fn test_check_storage_updates_store() {
    let home = tempfile::tempdir().unwrap();
    let store = home.path().join("store");
    std::fs::create_dir_all(&store).unwrap();
    std::fs::write(
        store.join("repo.json"),
        r#"[{"repositoryName":"r1","alias":"prod","alert":0},{"repositoryName":"r2","alias":"dev","alert":0}]"#,
    )
    .unwrap();

    let config = write_config(
        home.path(),
        &format!(
            "[store]\ndir = {:?}\n\n[collector]\nstorage_command = [\"echo\", \"100 /repos/r1\"]\n",
            store.display().to_string()
        ),
    );

    repowatch(home.path())
        .arg("--config")
        .arg(&config)
        .args(["check", "storage"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 repositories updated"));

    let content = std::fs::read_to_string(store.join("repo.json")).unwrap();
    let repos: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(repos[0]["storageUsed"], 100);
    assert_eq!(repos[1]["storageUsed"], 0);
    assert!(!store.join(".store.lock").exists());
}

#[cfg(unix)]
#[test]
fn test_check_reports_collection_failure() {
    let home = tempfile::tempdir().unwrap();
    let store = home.path().join("store");
    std::fs::create_dir_all(&store).unwrap();
    std::fs::write(
        store.join("repo.json"),
        r#"[{"repositoryName":"r1","alias":"prod","alert":0}]"#,
    )
    .unwrap();

    let config = write_config(
        home.path(),
        &format!(
            "[store]\ndir = {:?}\n\n[collector]\nstorage_command = [\"false\"]\n",
            store.display().to_string()
        ),
    );

    repowatch(home.path())
        .arg("--config")
        .arg(&config)
        .args(["check", "storage"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}
