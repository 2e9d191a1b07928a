//! CLI tests: spawn the `decider` binary and check exit codes and written artifacts.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use decider::exit_codes;
use decider::io::config::{DeciderConfig, write_config};
use decider::io::session_store::{list_records, load_record};

/// Write a config whose sessions dir lives inside `root`.
fn write_test_config(root: &Path) -> DeciderConfig {
    let cfg = DeciderConfig {
        sessions_dir: root.join("sessions"),
        ..DeciderConfig::default()
    };
    write_config(&root.join("decider.toml"), &cfg).expect("write config");
    cfg
}

fn decider(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_decider"))
        .current_dir(root)
        .env_remove("DECIDER_API_KEY")
        .env_remove("DECIDER_PROVIDER")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn decider")
}

#[test]
fn run_writes_a_record_and_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = write_test_config(temp.path());

    let output = decider(
        temp.path(),
        &[
            "run",
            "--scenario",
            "Open a neighbourhood bakery",
            "--resources",
            "20k savings",
            "--calm",
            "0,0,1,0",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DONE"), "{stdout}");
    assert!(stdout.contains("decision index"), "{stdout}");

    let records = list_records(&cfg.sessions_dir, 10).expect("list");
    assert_eq!(records.len(), 1);
    let ctx = load_record(&records[0].path).expect("load");
    assert!(ctx.is_complete());
    assert!(ctx.extra().calmness.is_some());
}

#[test]
fn invalid_calmness_exits_invalid_before_running() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = write_test_config(temp.path());

    let output = decider(
        temp.path(),
        &["run", "--scenario", "Move abroad", "--calm", "0,3,0,0"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("calmness answers"), "{stderr}");
    assert!(!cfg.sessions_dir.exists());
}

#[test]
fn empty_scenario_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_test_config(temp.path());
    let output = decider(temp.path(), &["run", "--scenario", "  ", "--no-save"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn report_and_rescore_read_saved_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = write_test_config(temp.path());
    let run = decider(temp.path(), &["run", "--scenario", "Learn to fly"]);
    assert_eq!(run.status.code(), Some(exit_codes::OK));
    let record = list_records(&cfg.sessions_dir, 1).expect("list").remove(0);
    let record_path = record.path.to_string_lossy().to_string();

    let report_path = temp.path().join("out").join("report.md");
    let report = decider(
        temp.path(),
        &["report", &record_path, "--out", &report_path.to_string_lossy()],
    );
    assert_eq!(report.status.code(), Some(exit_codes::OK));
    let written = fs::read_to_string(&report_path).expect("read report");
    assert!(written.contains("## Decision Index"));

    let rescore = decider(temp.path(), &["rescore", &record_path, "--json"]);
    assert_eq!(rescore.status.code(), Some(exit_codes::OK));
    let value: serde_json::Value =
        serde_json::from_slice(&rescore.stdout).expect("rescore json");
    assert!(value["score"].is_u64());

    let sessions = decider(temp.path(), &["sessions"]);
    let listing = String::from_utf8_lossy(&sessions.stdout);
    assert!(listing.contains(&record.display_name), "{listing}");
}

#[test]
fn rescore_rejects_malformed_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_test_config(temp.path());
    let bad = temp.path().join("bad.json");
    fs::write(&bad, r#"{"stage_outputs": "nope"}"#).expect("write");

    let output = decider(temp.path(), &["rescore", &bad.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn expand_saves_one_record_per_variant() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = write_test_config(temp.path());
    let output = decider(
        temp.path(),
        &[
            "expand",
            "--scenario",
            "Launch a newsletter",
            "--months",
            "6",
            "--budget",
            "500",
            "--validation-weeks",
            "4",
            "--outputs-per-week",
            "2",
            "--max-loss",
            "3000",
            "--success-bar",
            "100",
            "--tolerance-pct",
            "10",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("recommended:"), "{stdout}");
    assert_eq!(list_records(&cfg.sessions_dir, 10).expect("list").len(), 3);
}

#[test]
fn init_config_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = decider(temp.path(), &["init-config"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("decider.toml").is_file());

    let second = decider(temp.path(), &["init-config"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));

    let forced = decider(temp.path(), &["init-config", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}
