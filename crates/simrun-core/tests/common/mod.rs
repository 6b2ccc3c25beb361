//! Shared test helpers for simrun-core integration tests.
//!
//! Each test gets a private directory tree (app bundle, crash directory,
//! simulator app-support directory) and a fake launcher: a shell script that
//! stands in for the real simulator launcher.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use simrun_core::config::LaunchEnvironment;
use simrun_core::router::{LogLine, Markers};
use simrun_core::session::{LaunchHandle, LaunchOutcome, LaunchRequest};
use simrun_core::toolchain::Toolchain;

pub const SDK: &str = "17.0";

/// Never matches a real process, so tests do not touch a running Simulator.
pub const FAKE_SIMULATOR_PROCESS: &str = "simrun-test-no-such-process";

/// Generate a unique directory name for test isolation.
pub fn unique_name() -> String {
    format!(
        "simrun_test_{}",
        uuid::Uuid::new_v4().to_string().replace('-', "")[..12].to_string()
    )
}

/// A throwaway directory tree for one launch.
pub struct Fixture {
    pub root: PathBuf,
    pub app: PathBuf,
    pub crash_dir: PathBuf,
    pub support_dir: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let root = std::env::temp_dir().join(unique_name());
        let app = root.join("build").join("Demo.app");
        let crash_dir = root.join("DiagnosticReports");
        let support_dir = root.join("iPhone Simulator");
        for dir in [&app, &crash_dir, &support_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        Self {
            root,
            app,
            crash_dir,
            support_dir,
        }
    }

    /// Writes an executable launcher script with `body` and returns its path.
    pub fn launcher(&self, body: &str) -> PathBuf {
        let path = self.root.join("fake-launcher.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// The directory the app log is written to for the install `uuid`.
    pub fn documents_dir(&self, uuid: &str) -> PathBuf {
        self.support_dir
            .join(SDK)
            .join("Applications")
            .join(uuid)
            .join("Documents")
    }

    /// Shell snippet that writes a crash report named `name`.
    pub fn write_crash_cmd(&self, name: &str) -> String {
        format!(
            "printf '%s\\n%s' '{{\"app_name\":\"Demo\"}}' '{{\"pid\": 42}}' > '{}'",
            self.crash_dir.join(name).display()
        )
    }

    pub fn environment(&self, launcher: PathBuf) -> LaunchEnvironment {
        self.environment_with_toolchains(launcher, Vec::new())
    }

    pub fn environment_with_toolchains(
        &self,
        launcher: PathBuf,
        toolchains: Vec<Toolchain>,
    ) -> LaunchEnvironment {
        LaunchEnvironment {
            launcher,
            toolchains,
            app_support_dir: self.support_dir.clone(),
            crash_dir: self.crash_dir.clone(),
            crash_extension: "ips".to_string(),
            log_poll_interval: Duration::from_millis(20),
            markers: Markers::default(),
            simulator_process_names: vec![FAKE_SIMULATOR_PROCESS.to_string()],
        }
    }

    pub fn request(&self) -> LaunchRequest {
        LaunchRequest::new(&self.app, SDK)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// Waits (bounded) for the outcome, then collects every forwarded line.
pub async fn finish(handle: &mut LaunchHandle) -> (LaunchOutcome, Vec<LogLine>) {
    let outcome = tokio::time::timeout(Duration::from_secs(15), handle.outcome())
        .await
        .expect("session did not complete");

    let mut lines = Vec::new();
    while let Ok(Some(line)) =
        tokio::time::timeout(Duration::from_secs(5), handle.lines.recv()).await
    {
        lines.push(line);
    }
    (outcome, lines)
}

pub fn texts(lines: &[LogLine]) -> Vec<&str> {
    lines.iter().map(|l| l.text.as_str()).collect()
}

pub fn path_str(path: &Path) -> String {
    path.display().to_string()
}
