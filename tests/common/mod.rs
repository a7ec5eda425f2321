#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Output};

pub use taskgrid_test_utils::{TaskBuilder, TeamFixture, init_tracing};

/// Run the `taskgrid` binary against `root` with the fixture's project/team.
pub fn taskgrid(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskgrid"))
        .arg("--root")
        .arg(root)
        .args(["--project", "acme", "--team", "core"])
        .args(args)
        .env_remove("TASKGRID_LOG")
        .env_remove("TASKGRID_ACTOR")
        .output()
        .expect("spawn taskgrid")
}

/// Parse stdout of a successful run.
pub fn json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "taskgrid failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}
