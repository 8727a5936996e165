//! CLI smoke tests against the built binary.

use std::process::Command;

fn cloudtask() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cloudtask"))
}

fn run_report(args: &[&str]) -> serde_json::Value {
    let output = cloudtask()
        .arg("run")
        .args(args)
        .output()
        .expect("Failed to spawn cloudtask");
    assert!(
        output.status.success(),
        "STDERR: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not a JSON report")
}

#[test]
fn test_version() {
    let output = cloudtask().arg("version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("cloudtask "));
}

#[test]
fn test_run_sync_workload() {
    let report = run_report(&["--tasks", "4", "--tag", "compute", "--log-level", "error"]);
    assert_eq!(report["completed"], 4);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["retries"], 0);
    assert_eq!(report["stats"]["tasks_dispatched"], 4);
    assert_eq!(report["stats"]["tasks_async"], 0);
}

#[test]
fn test_run_async_workload_with_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cloudtask.toml");
    std::fs::write(&path, "name = \"cli\"\nworkers = 2\nlog_level = \"error\"\n").unwrap();

    let report = run_report(&[
        "--config",
        path.to_str().unwrap(),
        "--tasks",
        "6",
        "--async",
        "--work-ms",
        "5",
    ]);
    assert_eq!(report["manager"], "cli");
    assert_eq!(report["completed"], 6);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["retries"], 0);
    assert_eq!(report["stats"]["tasks_async"], 6);
}

#[test]
fn test_init_writes_loadable_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generated.toml");

    let status = cloudtask().arg("init").arg(&path).status().unwrap();
    assert!(status.success());

    let config = cloudtask::load_config(&path).unwrap();
    assert_eq!(config, cloudtask::ManagerConfig::default());
}
