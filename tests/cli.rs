//! End-to-end tests for the harrier binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn harrier() -> Command {
    let mut cmd = Command::cargo_bin("harrier").unwrap();
    // Tests control the CI plan explicitly.
    cmd.env_remove("TEST")
        .env_remove("PROJECTS")
        .env_remove("REFS")
        .env_remove("BUILD_NUMBER");
    cmd
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("harrier.toml");
    std::fs::write(&path, body).unwrap();
    path
}

const PASSING: &str = r#"
[harrier]
workers = 2
timeout_secs = 30

[tool]
list_command = "printf 'pkg/a\npkg/b\n'"
run_command = "sh -c 'exit 0' {package}"
"#;

const FAILING: &str = r#"
[harrier]
workers = 2
timeout_secs = 30

[tool]
list_command = "printf 'pkg/a\npkg/b\n'"
run_command = "sh -c 'case \"$0\" in pkg/b) exit 1;; *) exit 0;; esac' {package}"
"#;

#[test]
fn validate_accepts_a_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PASSING);

    harrier()
        .arg("-c")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn validate_rejects_a_missing_file() {
    harrier()
        .arg("-c")
        .arg("/definitely/not/here.toml")
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn validate_rejects_a_bad_run_command() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
        [harrier]
        [tool]
        list_command = "ls"
        run_command = "no placeholder"
    "#,
    );

    harrier()
        .arg("-c")
        .arg(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("{package}"));
}

#[test]
fn list_prints_matched_packages() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PASSING);

    harrier()
        .arg("-c")
        .arg(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("pkg/a").and(predicate::str::contains("pkg/b")));

    harrier()
        .arg("-c")
        .arg(&config)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""package": "pkg/a""#));
}

#[test]
fn list_marks_excluded_packages() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            "{PASSING}\n[[exclusions]]\npackage = \"pkg/b\"\nreason = \"known broken\"\n"
        ),
    );

    harrier()
        .arg("-c")
        .arg(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("pkg/b (excluded)"));
}

#[test]
fn run_writes_a_report_and_exits_zero_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PASSING);
    let output_dir = dir.path().join("results");

    harrier()
        .arg("-c")
        .arg(&config)
        .arg("run")
        .arg("--output-dir")
        .arg(&output_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("All packages passed"));

    let xunit = std::fs::read_to_string(output_dir.join("xunit.xml")).unwrap();
    assert!(xunit.contains("<testsuites"));
    assert!(xunit.contains(r#"name="pkg/a""#));
}

#[test]
fn run_exits_nonzero_when_a_package_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), FAILING);
    let output_dir = dir.path().join("results");

    harrier()
        .arg("-c")
        .arg(&config)
        .arg("run")
        .arg("--output-dir")
        .arg(&output_dir)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Some packages failed"));

    let xunit = std::fs::read_to_string(output_dir.join("xunit.xml")).unwrap();
    assert!(xunit.contains(r#"failures="1""#));
}

#[test]
fn run_respects_patterns() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), FAILING);
    let output_dir = dir.path().join("results");

    // Only the passing package is selected, so the run succeeds.
    harrier()
        .arg("-c")
        .arg(&config)
        .arg("run")
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("pkg/a")
        .assert()
        .success();
}

#[test]
fn poll_maps_projects_to_patterns() {
    harrier()
        .env("PROJECTS", "auth storage")
        .env("BUILD_NUMBER", "7")
        .arg("poll")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Build:    #7")
                .and(predicate::str::contains("auth/... storage/...")),
        );
}

#[test]
fn poll_json_includes_the_environment() {
    harrier()
        .env("TEST", "net/...")
        .args(["poll", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""patterns""#).and(predicate::str::contains("net/...")));
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();

    harrier()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created harrier.toml"));

    assert!(dir.path().join("harrier.toml").exists());

    harrier()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
