use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use cloudsync_core::config;
use cloudsync_sync::HostDocument;

fn cloudsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cloudsync"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

#[test]
fn help_lists_every_command() {
    let home = TempDir::new().expect("home");
    cloudsync_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("init"))
        .stdout(contains("pull"))
        .stdout(contains("push"))
        .stdout(contains("check"))
        .stdout(contains("daemon"));
}

#[test]
fn init_writes_config_and_empty_variables_file() {
    let home = TempDir::new().expect("home");
    cloudsync_cmd(home.path())
        .args(["init", "--server", "http://127.0.0.1:4000", "--prefix", "Cloud"])
        .assert()
        .success()
        .stdout(contains("config.yaml"));

    let loaded = config::load_at(home.path()).expect("config written");
    assert_eq!(loaded.server_url, "http://127.0.0.1:4000");
    assert_eq!(loaded.name_prefix, "Cloud");

    let variables = loaded.variables_path(home.path());
    let document: HostDocument =
        serde_json::from_str(&fs::read_to_string(&variables).expect("variables file"))
            .expect("variables json");
    assert!(document.variables.is_empty());
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let home = TempDir::new().expect("home");
    cloudsync_cmd(home.path()).arg("init").assert().success();

    cloudsync_cmd(home.path())
        .args(["init", "--server", "http://other:1"])
        .assert()
        .failure()
        .stderr(contains("--force"));

    cloudsync_cmd(home.path())
        .args(["init", "--server", "http://other:1", "--force"])
        .assert()
        .success();
    let loaded = config::load_at(home.path()).expect("config");
    assert_eq!(loaded.server_url, "http://other:1");
}

#[test]
fn init_keeps_existing_variables_file() {
    let home = TempDir::new().expect("home");
    let variables = home.path().join("vars.json");
    let existing = r#"{"variables":[{"id":"v1","name":"CloudScore","value":"7"}]}"#;
    fs::write(&variables, existing).expect("seed variables");

    cloudsync_cmd(home.path())
        .args(["init", "--variables"])
        .arg(&variables)
        .assert()
        .success();

    assert_eq!(fs::read_to_string(&variables).expect("read"), existing);
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");
    cloudsync_cmd(home.path())
        .args(["daemon", "status", "--json"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));

    cloudsync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("not running"));
}

#[test]
fn pull_against_unreachable_store_fails() {
    let home = TempDir::new().expect("home");
    cloudsync_cmd(home.path())
        .args(["init", "--server", "http://127.0.0.1:9"])
        .assert()
        .success();

    cloudsync_cmd(home.path())
        .arg("pull")
        .assert()
        .failure()
        .stderr(contains("failed to read variables"));
}

#[test]
fn corrupt_config_is_reported() {
    let home = TempDir::new().expect("home");
    let path = config::config_path_at(home.path());
    fs::create_dir_all(path.parent().expect("config dir")).expect("mkdir");
    fs::write(&path, "server_url: [unclosed").expect("corrupt config");

    cloudsync_cmd(home.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(contains("failed to load"));
}

#[test]
fn server_flag_overrides_configured_store() {
    let home = TempDir::new().expect("home");
    cloudsync_cmd(home.path())
        .args(["check", "--server", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .stderr(contains("http://127.0.0.1:9"));
}
