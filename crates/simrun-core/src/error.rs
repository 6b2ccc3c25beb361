//! Errors surfaced before a launch session reaches the running state.
//!
//! Everything that happens after the launcher is running (non-zero exits,
//! crashes, timeouts, signals) is reported as a
//! [`LaunchOutcome`](crate::session::LaunchOutcome) instead.

use std::path::PathBuf;

use thiserror::Error;

/// Environment errors that prevent a session from starting.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The application bundle to launch does not exist.
    #[error("App not found at path: {0}")]
    AppNotFound(PathBuf),

    /// The launcher executable does not exist.
    #[error("Launcher not found at path: {0}")]
    LauncherNotFound(PathBuf),

    /// The launcher process could not be spawned.
    #[error("Failed to spawn launcher: {0}")]
    Spawn(#[source] std::io::Error),
}
