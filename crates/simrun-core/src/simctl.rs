//! Best-effort control of the Simulator application.
//!
//! Only one Simulator instance can host a launch at a time, so a session
//! stops whatever is running before it starts and again when it completes.
//!
//! # Example
//!
//! ```no_run
//! use simrun_core::simctl::Simctl;
//!
//! # async fn example() {
//! // Safe to call when nothing is running, and safe to call twice.
//! Simctl::stop().await;
//! Simctl::stop().await;
//! # }
//! ```

use tokio::process::Command;
use tracing::debug;

/// Process names the Simulator application has shipped under.
pub const SIMULATOR_PROCESS_NAMES: &[&str] = &["Simulator", "iOS Simulator"];

/// Wrapper for Simulator process control.
pub struct Simctl;

impl Simctl {
    /// Terminates any running Simulator application.
    ///
    /// Never fails: a missing `killall`, or no matching process, is ignored.
    pub async fn stop() {
        Self::stop_named(SIMULATOR_PROCESS_NAMES).await;
    }

    /// Terminates every process with one of `names`, ignoring all errors.
    pub async fn stop_named<S: AsRef<str>>(names: &[S]) {
        for name in names {
            let name = name.as_ref();
            match Command::new("killall").args(["-9", name]).output().await {
                Ok(output) if output.status.success() => {
                    debug!(process = name, "simulator stopped");
                }
                Ok(output) => {
                    debug!(
                        process = name,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "nothing to stop"
                    );
                }
                Err(e) => {
                    debug!(process = name, error = %e, "killall unavailable");
                }
            }
        }
    }
}
