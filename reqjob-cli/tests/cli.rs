use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_profile(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn reqjob() -> Command {
    Command::cargo_bin("reqjob").unwrap()
}

const VALID: &str = r#"
name: demo
base_url: http://127.0.0.1:1
timeout: 2
jobs:
  - name: users
    tasks:
      - name: one
        url: /users/{id}
        kwargs: {id: 1}
      - name: two
        url: /users/2
"#;

#[test]
fn validate_accepts_a_well_formed_profile() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(&tmp, "profile.yaml", VALID);

    let out = reqjob()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(out).unwrap().trim(), "ok: 1 jobs, 2 tasks");
}

#[test]
fn validate_reports_located_violations() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(
        &tmp,
        "profile.yaml",
        "version: 2\njobs:\n  - name: j\n    tasks:\n      - url: /x\n        timeout: soon\n",
    );

    let out = reqjob()
        .args(["validate", path.to_str().unwrap(), "--format", "json"])
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let result: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(result["valid"], false);
    let errors: Vec<String> = result["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e.as_str().unwrap().to_string())
        .collect();
    assert!(errors.iter().any(|e| e.starts_with("version: ")), "{errors:?}");
    assert!(
        errors.iter().any(|e| e.starts_with("jobs[0].tasks[0].timeout: ")),
        "{errors:?}"
    );
}

#[test]
fn format_hint_overrides_the_extension() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(&tmp, "profile.txt", r#"{"jobs": [{"name": "j", "tasks": []}]}"#);

    reqjob()
        .args(["validate", path.to_str().unwrap(), "--format-hint", "json"])
        .assert()
        .success();
    reqjob()
        .args(["validate", path.to_str().unwrap(), "--format-hint", "toml"])
        .assert()
        .failure();
}

#[test]
fn run_reports_a_missing_file_as_a_runtime_error() {
    reqjob()
        .args(["run", "/nonexistent/profile.yaml"])
        .assert()
        .code(4);
}

#[test]
fn run_with_no_jobs_succeeds() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(&tmp, "empty.yml", "name: empty\njobs: []\n");

    let out = reqjob()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "0 tasks: 0 passed, 0 failed, 0 errored, 0 skipped\n"
    );
}

#[test]
fn unbound_url_keywords_abort_before_running() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(
        &tmp,
        "profile.yaml",
        "jobs:\n  - name: j\n    tasks:\n      - url: http://127.0.0.1:1/users/{id}\n",
    );

    let err = reqjob()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .code(2)
        .get_output()
        .stderr
        .clone();
    let err = String::from_utf8(err).unwrap();
    assert!(err.contains("jobs[0].tasks[0].url: missing keywords: id"), "{err}");
}

#[test]
fn unreachable_hosts_error_tasks_and_fail_the_run() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(
        &tmp,
        "profile.yaml",
        r#"
base_url: ${'http://127.0.0.1:' + env.PORT}
timeout: 2
jobs:
  - name: j
    tasks:
      - name: ping
        url: /ping
"#,
    );

    let out = reqjob()
        .args([
            "run",
            path.to_str().unwrap(),
            "--env",
            "PORT=1",
            "--format",
            "json",
        ])
        .assert()
        .code(3)
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let task = &report["jobs"][0]["tasks"][0];
    assert_eq!(task["name"], "ping");
    assert_eq!(task["status"], "errored");
    assert_eq!(task["failures"].as_array().unwrap().len(), 1);
}

#[test]
fn tag_filters_can_select_nothing() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(&tmp, "profile.yaml", VALID);

    reqjob()
        .args(["run", path.to_str().unwrap(), "--tag", "weekly", "--quiet"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn stdout_events_are_json_lines() {
    let tmp = TempDir::new().unwrap();
    let path = write_profile(&tmp, "empty.yaml", "name: empty\njobs: []\n");

    let out = reqjob()
        .args(["run", path.to_str().unwrap(), "--events", "stdout", "--quiet"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let types: Vec<String> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| {
            let event: serde_json::Value = serde_json::from_str(line).unwrap();
            event["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(types, vec!["run.started", "run.finished"]);
}
