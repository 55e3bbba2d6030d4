//! E2E tests for the CLI surface: exit codes and report files.

use std::path::Path;
use std::process::{Command, Output};

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

fn smartrecon(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--"])
        .args(args)
        .output()
        .expect("failed to execute command")
}

#[test]
fn run_writes_reports_and_prints_summary() {
    let dir = tempfile::tempdir().unwrap();
    let gl = dir.path().join("gl.csv");
    let bank = dir.path().join("bank.csv");
    let out = dir.path().join("out");
    write(
        &gl,
        "date,debit,credit,description,reference\n\
         2025-01-15,100.00,,payment to acme,INV001\n\
         2025-01-18,250.00,,wire out,\n",
    );
    write(
        &bank,
        "date,withdrawal,deposit,description,reference\n\
         2025-01-15,100.00,,ACME PMT,INV001\n",
    );

    let output = smartrecon(&[
        "run",
        "--gl",
        gl.to_str().unwrap(),
        "--bank",
        bank.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "command failed: {output:?}");
    assert!(stdout.contains("RECONCILIATION SUMMARY"));
    assert!(stdout.contains("1 exact, 0 fuzzy"));
    for name in [
        "result.json",
        "matches.csv",
        "exceptions.csv",
        "unmatched_gl.csv",
        "unmatched_bank.csv",
        "parse_errors.csv",
        "summary.txt",
    ] {
        assert!(out.join(name).exists(), "{name} missing");
    }
    let matches = std::fs::read_to_string(out.join("matches.csv")).unwrap();
    assert!(matches.contains("reference_exact"));
}

#[test]
fn run_honours_a_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let gl = dir.path().join("gl.csv");
    let bank = dir.path().join("bank.csv");
    let config = dir.path().join("recon.toml");
    let out = dir.path().join("out");
    write(
        &gl,
        "date,debit,credit,description,reference\n2025-01-15,250.00,,,\n",
    );
    write(
        &bank,
        "date,withdrawal,deposit,description,reference\n2025-01-17,250.00,,,\n",
    );
    // widening the exact date window turns the 2-day lag into an exact match
    write(&config, "[exact]\ndate_tolerance_days = 3\n");

    let output = smartrecon(&[
        "run",
        "--gl",
        gl.to_str().unwrap(),
        "--bank",
        bank.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--json",
    ]);
    assert!(output.status.success(), "command failed: {output:?}");
    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("summary should be JSON");
    assert_eq!(summary["exact_matches"], 1);
    let matches = std::fs::read_to_string(out.join("matches.csv")).unwrap();
    assert!(matches.contains("amount_date_window"));
}

#[test]
fn missing_required_column_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let gl = dir.path().join("gl.csv");
    let bank = dir.path().join("bank.csv");
    write(&gl, "description,debit,credit\nrent,100.00,\n");
    write(
        &bank,
        "date,withdrawal,deposit,description,reference\n2025-01-15,100.00,,,\n",
    );

    let output = smartrecon(&[
        "run",
        "--gl",
        gl.to_str().unwrap(),
        "--bank",
        bank.to_str().unwrap(),
        "--out",
        dir.path().join("out").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("date"));
}

#[test]
fn total_parse_failure_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let gl = dir.path().join("gl.csv");
    let bank = dir.path().join("bank.csv");
    write(
        &gl,
        "date,debit,credit,description,reference\n2025-01-15,N/A,,,\n",
    );
    write(
        &bank,
        "date,withdrawal,deposit,description,reference\n2025-01-15,pending,,,\n",
    );

    let output = smartrecon(&[
        "run",
        "--gl",
        gl.to_str().unwrap(),
        "--bank",
        bank.to_str().unwrap(),
        "--out",
        dir.path().join("out").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn check_reports_unknown_config_keys_without_failing() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("recon.toml");
    write(&config, "mystery_flag = true\n");

    let output = smartrecon(&["check", "--config", config.to_str().unwrap(), "--json"]);
    assert!(output.status.success(), "command failed: {output:?}");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["error_count"], 0);
    assert!(report["findings"][0]["message"]
        .as_str()
        .unwrap()
        .contains("mystery_flag"));
}

#[test]
fn check_flags_unmappable_headers() {
    let dir = tempfile::tempdir().unwrap();
    let gl = dir.path().join("gl.csv");
    write(&gl, "foo,bar\n1,2\n");

    let output = smartrecon(&["check", "--gl", gl.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("error"));
}

#[test]
fn schema_prints_the_config_schema() {
    let output = smartrecon(&["schema"]);
    assert!(output.status.success());
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema["properties"]["fuzzy"].is_object());
}

#[test]
fn invalid_config_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let gl = dir.path().join("gl.csv");
    let bank = dir.path().join("bank.csv");
    let config = dir.path().join("recon.toml");
    write(
        &gl,
        "date,debit,credit,description,reference\n2025-01-15,1.00,,,\n",
    );
    write(
        &bank,
        "date,withdrawal,deposit,description,reference\n2025-01-15,1.00,,,\n",
    );
    write(
        &config,
        "[fuzzy]\nauto_match_threshold = 0.5\nreview_required_threshold = 0.9\n",
    );

    let output = smartrecon(&[
        "run",
        "--gl",
        gl.to_str().unwrap(),
        "--bank",
        bank.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--out",
        dir.path().join("out").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("threshold"));
}
