//! Persistent configuration for simrun.
//!
//! Stores user settings in `~/.simrun/config.json`: where the launcher lives,
//! where the simulator keeps app sandboxes and crash reports, and the marker
//! texts apps print. Every field is optional; [`SimrunConfig::environment`]
//! fills in the macOS defaults.
//!
//! # Example
//!
//! ```no_run
//! use simrun_core::config::SimrunConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = SimrunConfig::load();
//!
//! // Resolve everything a launch needs
//! let env = config.environment(None, Vec::new()).expect("launcher not configured");
//! println!("crash reports: {}", env.crash_dir.display());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LaunchError;
use crate::router::Markers;
use crate::simctl::SIMULATOR_PROCESS_NAMES;
use crate::toolchain::Toolchain;

const CONFIG_FILENAME: &str = "config.json";

/// Default launcher executable name, looked up on `PATH`.
const DEFAULT_LAUNCHER: &str = "ios-sim";

/// Default crash report extension.
const DEFAULT_CRASH_EXTENSION: &str = "ips";

/// Default log file poll interval in milliseconds.
const DEFAULT_LOG_POLL_MS: u64 = 50;

/// Returns the simrun directory (`~/.simrun/`), creating it if needed.
pub fn simrun_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".simrun");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Persistent simrun configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SimrunConfig {
    /// Path to the launcher executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher_path: Option<PathBuf>,

    /// Directory holding per-SDK simulator app sandboxes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_support_dir: Option<PathBuf>,

    /// Directory the system crash reporter writes to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_dir: Option<PathBuf>,

    /// Extension of machine-readable crash reports (without the dot).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_extension: Option<String>,

    /// How often to look for (and re-read) the app's log file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_poll_interval_ms: Option<u64>,

    /// Marker texts, if the app prints something other than the defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<Markers>,

    /// Simulator process names to stop around a launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulator_process_names: Option<Vec<String>>,
}

impl SimrunConfig {
    /// Load config from `~/.simrun/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        let path = simrun_dir().join(CONFIG_FILENAME);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.simrun/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let path = simrun_dir().join(CONFIG_FILENAME);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Simulator process names to stop, defaulting to the known app names.
    pub fn simulator_process_names(&self) -> Vec<String> {
        self.simulator_process_names.clone().unwrap_or_else(|| {
            SIMULATOR_PROCESS_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }

    /// Resolves the launch environment.
    ///
    /// `launcher` overrides [`launcher_path`](Self::launcher_path); with
    /// neither set, `ios-sim` is looked up on `PATH`.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::LauncherNotFound`] if the launcher does not exist
    pub fn environment(
        &self,
        launcher: Option<PathBuf>,
        toolchains: Vec<Toolchain>,
    ) -> Result<LaunchEnvironment, LaunchError> {
        let launcher = launcher
            .or_else(|| self.launcher_path.clone())
            .or_else(|| find_on_path(DEFAULT_LAUNCHER))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LAUNCHER));
        if !launcher.is_file() {
            return Err(LaunchError::LauncherNotFound(launcher));
        }

        let home = dirs::home_dir().unwrap_or_default();
        let library = home.join("Library");

        Ok(LaunchEnvironment {
            launcher,
            toolchains,
            app_support_dir: self
                .app_support_dir
                .clone()
                .unwrap_or_else(|| library.join("Application Support").join("iPhone Simulator")),
            crash_dir: self
                .crash_dir
                .clone()
                .unwrap_or_else(|| library.join("Logs").join("DiagnosticReports")),
            crash_extension: self
                .crash_extension
                .clone()
                .unwrap_or_else(|| DEFAULT_CRASH_EXTENSION.to_string()),
            log_poll_interval: Duration::from_millis(
                self.log_poll_interval_ms.unwrap_or(DEFAULT_LOG_POLL_MS),
            ),
            markers: self.markers.clone().unwrap_or_default(),
            simulator_process_names: self.simulator_process_names(),
        })
    }
}

/// Everything a launch session needs from its surroundings.
#[derive(Debug, Clone)]
pub struct LaunchEnvironment {
    /// The launcher executable.
    pub launcher: PathBuf,
    /// Installed toolchains, as found by discovery.
    pub toolchains: Vec<Toolchain>,
    /// Directory holding per-SDK simulator app sandboxes.
    pub app_support_dir: PathBuf,
    /// Directory the system crash reporter writes to.
    pub crash_dir: PathBuf,
    /// Extension of machine-readable crash reports.
    pub crash_extension: String,
    /// Poll interval for the app log file.
    pub log_poll_interval: Duration,
    /// Marker texts.
    pub markers: Markers,
    /// Simulator process names stopped before and after a session.
    pub simulator_process_names: Vec<String>,
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
