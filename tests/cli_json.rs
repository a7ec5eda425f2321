// tests/cli_json.rs

mod common;

use std::fs;
use std::process::{Command, Stdio};

use common::{json, taskgrid};

const PLAN: &str = r#"
[task.schema]
title = "Schema"
role = "backend"

[task.api]
title = "API"
role = "backend"
blocked_by = ["schema"]

[task.ui]
title = "UI"
role = "frontend"
blocked_by = ["api"]
"#;

#[test]
fn plan_waves_and_claim_through_the_binary() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let plan = root.join("plan.toml");
    fs::write(&plan, PLAN).unwrap();

    let init = json(&taskgrid(root, &["init"]));
    assert_eq!(init["phase"], "planning");

    let imported = json(&taskgrid(root, &["plan", "import", "--file", plan.to_str().unwrap()]));
    assert_eq!(imported["created"], serde_json::json!(["schema", "api", "ui"]));

    let waves = json(&taskgrid(root, &["wave", "plan"]));
    assert_eq!(waves.as_array().unwrap().len(), 3);
    assert_eq!(waves[0]["tasks"], serde_json::json!(["schema"]));

    let claimed = json(&taskgrid(root, &["task", "claim", "--owner", "w1", "--role", "backend"]));
    assert_eq!(claimed["id"], "schema");
    assert_eq!(claimed["status"], "in_progress");

    // Nothing else is ready.
    let none = json(&taskgrid(root, &["task", "claim", "--owner", "w2"]));
    assert!(none.is_null());

    let resolved = json(&taskgrid(
        root,
        &["task", "resolve", "--id", "schema", "--owner", "w1", "--note", "migrated"],
    ));
    assert_eq!(resolved["status"], "resolved");

    let status = json(&taskgrid(root, &["status"]));
    assert_eq!(status["tasks"]["resolved"], 1);
    assert_eq!(status["tasks"]["ready"], 1);
}

#[test]
fn failures_exit_one_with_message_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    json(&taskgrid(root, &["init"]));

    let out = taskgrid(root, &["task", "get", "--id", "ghost"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("taskgrid error"), "stderr: {stderr}");
    assert!(stderr.contains("ghost"));
}

#[test]
fn unknown_config_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("taskgrid.toml"), "[lock]\ntimeout = 5\n").unwrap();

    let out = taskgrid(root, &["init"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn claims_from_separate_processes_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    json(&taskgrid(root, &["init"]));
    json(&taskgrid(root, &["task", "create", "--id", "T1", "--title", "only one"]));

    let children: Vec<_> = (0..6)
        .map(|i| {
            Command::new(env!("CARGO_BIN_EXE_taskgrid"))
                .arg("--root")
                .arg(root)
                .args(["--project", "acme", "--team", "core"])
                .args(["task", "claim", "--id", "T1", "--owner", &format!("w{i}")])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .unwrap()
        })
        .collect();

    let winners = children
        .into_iter()
        .map(|c| c.wait_with_output().unwrap())
        .filter(|out| out.status.success())
        .count();
    assert_eq!(winners, 1);

    let task = json(&taskgrid(root, &["task", "get", "--id", "T1"]));
    assert_eq!(task["status"], "in_progress");
}
