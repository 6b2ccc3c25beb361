//! # simrun-core
//!
//! Launch an app in the iOS Simulator and observe it until it produces
//! exactly one terminal outcome.
//!
//! A launch races several independent signals: the launcher process exiting,
//! an inactivity watchdog, the app's own log file appearing some time after
//! start-up, and marker lines carrying structured test results. This crate
//! arbitrates between them and guarantees a single [`LaunchOutcome`].
//!
//! ## Modules
//!
//! - [`session`] - Launch sessions, requests, outcomes and the completion state machine
//! - [`router`] - Per-source line routing and control-marker recognition
//! - [`process`] - Launcher process supervision
//! - [`log_file`] - Discovery and tailing of the app's log file
//! - [`watchdog`] - Fixed-period inactivity check
//! - [`crash`] - Crash report snapshots and loading
//! - [`simctl`] - Best-effort Simulator shutdown
//! - [`toolchain`] - Installed toolchain records and selection
//! - [`config`] - Persistent configuration and the resolved launch environment
//!
//! ## External Dependencies
//!
//! - **Xcode** - provides the simulator runtimes
//! - **ios-sim** (or a compatible launcher) - starts the app in the simulator
//!
//! ## Example
//!
//! ```no_run
//! use simrun_core::{launch, LaunchOutcome, LaunchRequest, SimrunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let env = SimrunConfig::load().environment(None, Vec::new())?;
//!     let request = LaunchRequest::new("build/Demo.app", "17.0").unit_test_mode(true);
//!
//!     let mut handle = launch(request, env).await?;
//!     while let Some(line) = handle.lines.recv().await {
//!         println!("{}", line.text);
//!     }
//!     if let LaunchOutcome::Success { payload: Some(results) } = handle.outcome().await {
//!         println!("{results}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crash;
pub mod error;
pub mod log_file;
pub mod process;
pub mod router;
pub mod session;
pub mod simctl;
pub mod toolchain;
pub mod watchdog;

pub use config::{LaunchEnvironment, SimrunConfig};
pub use error::LaunchError;
pub use session::{launch, LaunchHandle, LaunchOutcome, LaunchRequest, SessionState};

/// Terminates any running Simulator application, using the process names
/// from `config`. Never fails.
pub async fn stop(config: &SimrunConfig) {
    simctl::Simctl::stop_named(&config.simulator_process_names()).await;
}
