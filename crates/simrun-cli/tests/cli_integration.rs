use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

/// Never matches a real process, so tests do not touch a running Simulator.
const FAKE_SIMULATOR_PROCESS: &str = "simrun-cli-test-no-such-process";

/// A temporary HOME with an app bundle and a config that keeps the real
/// Simulator out of reach.
struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "simrun_cli_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(root.join("Demo.app")).unwrap();
        std::fs::create_dir_all(root.join(".simrun")).unwrap();
        let config = serde_json::json!({ "simulator_process_names": [FAKE_SIMULATOR_PROCESS] });
        std::fs::write(root.join(".simrun").join("config.json"), config.to_string()).unwrap();
        Self { root }
    }

    fn app(&self) -> PathBuf {
        self.root.join("Demo.app")
    }

    #[cfg(unix)]
    fn launcher(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.root.join("fake-launcher.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn simrun(&self) -> Command {
        let mut cmd = Command::cargo_bin("simrun").unwrap();
        cmd.env("HOME", &self.root)
            .env_remove("SIMRUN_SDK")
            .env_remove("SIMRUN_LAUNCHER")
            .env_remove("SIMRUN_TIMEOUT")
            .env_remove("DEVELOPER_DIR");
        cmd
    }

    fn launch(&self, launcher: &Path) -> Command {
        let mut cmd = self.simrun();
        cmd.args(["launch", "--sdk", "17.0", "--launcher"])
            .arg(launcher)
            .arg(self.app());
        cmd
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

#[test]
fn test_help_exits_zero() {
    Command::cargo_bin("simrun")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simrun"));
}

#[test]
fn test_launch_help_lists_options() {
    Command::cargo_bin("simrun")
        .unwrap()
        .args(["launch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--auto-exit"))
        .stdout(predicate::str::contains("--unit-test"))
        .stdout(predicate::str::contains("--timeout"));
}

#[test]
fn test_launch_requires_sdk() {
    let sandbox = Sandbox::new("nosdk");
    sandbox
        .simrun()
        .arg("launch")
        .arg(sandbox.app())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--sdk"));
}

#[test]
fn test_missing_launcher_exits_4() {
    let sandbox = Sandbox::new("nolauncher");
    sandbox
        .launch(Path::new("/nonexistent/simrun/ios-sim"))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Launcher not found"));
}

#[cfg(unix)]
#[test]
fn test_missing_app_exits_4() {
    let sandbox = Sandbox::new("noapp");
    let launcher = sandbox.launcher("exit 0");
    sandbox
        .simrun()
        .args(["launch", "--sdk", "17.0", "--launcher"])
        .arg(&launcher)
        .arg(sandbox.root.join("Missing.app"))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("App not found"));
}

#[cfg(unix)]
#[test]
fn test_launch_streams_lines_and_succeeds() {
    let sandbox = Sandbox::new("success");
    let launcher = sandbox.launcher("echo hello from launcher\nexit 0");
    sandbox
        .launch(&launcher)
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished"))
        .stderr(predicate::str::contains("[stdout] hello from launcher"));
}

#[cfg(unix)]
#[test]
fn test_quiet_suppresses_lines() {
    let sandbox = Sandbox::new("quiet");
    let launcher = sandbox.launcher("echo hello from launcher\nexit 0");
    let mut cmd = sandbox.simrun();
    cmd.args(["--quiet", "launch", "--sdk", "17.0", "--launcher"])
        .arg(&launcher)
        .arg(sandbox.app())
        .assert()
        .success()
        .stderr(predicate::str::contains("hello from launcher").not());
}

#[cfg(unix)]
#[test]
fn test_json_outcome_with_test_results() {
    let sandbox = Sandbox::new("json");
    let launcher = sandbox.launcher(
        "echo '-- SIMRUN TEST RESULTS BEGIN --'\necho '{\"passed\": 4, \"failed\": 0}'\necho '-- SIMRUN TEST RESULTS END --'\nsleep 10",
    );
    let assert = sandbox
        .simrun()
        .args(["-f", "json", "launch", "--sdk", "17.0", "--unit-test", "--launcher"])
        .arg(&launcher)
        .arg(sandbox.app())
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["outcome"], "success");
    assert_eq!(value["payload"]["passed"], 4);
}

#[cfg(unix)]
#[test]
fn test_non_zero_exit_code() {
    let sandbox = Sandbox::new("nonzero");
    let launcher = sandbox.launcher("exit 7");
    sandbox
        .launch(&launcher)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Exited with code 7"));
}

#[cfg(unix)]
#[test]
fn test_timeout_exit_code() {
    let sandbox = Sandbox::new("timeout");
    let launcher = sandbox.launcher("sleep 10");
    sandbox
        .launch(&launcher)
        .args(["--timeout", "300"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("Timed out"));
}

#[cfg(unix)]
#[test]
fn test_app_args_and_env_reach_launcher() {
    let sandbox = Sandbox::new("args");
    let launcher = sandbox.launcher("echo \"$*\"\nexit 0");
    sandbox
        .launch(&launcher)
        .args(["--family", "ipad", "-e", "MODE=test", "--", "--verbose"])
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "--family ipad --setenv MODE=test --args --verbose",
        ));
}

#[test]
fn test_config_shows_simulator_override() {
    let sandbox = Sandbox::new("config");
    sandbox
        .simrun()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains(FAKE_SIMULATOR_PROCESS));
}

#[test]
fn test_stop_twice_exits_zero() {
    let sandbox = Sandbox::new("stop");
    sandbox.simrun().arg("stop").assert().success();
    sandbox.simrun().arg("stop").assert().success();
}
