//! Crash report detection by directory snapshots.
//!
//! The system crash reporter writes its reports asynchronously to process
//! termination, so a report for a crashed app may land moments after the
//! launcher exits. A [`CrashSnapshot`] is taken before launch and compared
//! against a fresh snapshot at every completion point; the first new file
//! name is loaded into a [`CrashReport`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use simrun_core::crash::{CrashReport, CrashSnapshot};
//!
//! let dir = Path::new("/Users/me/Library/Logs/DiagnosticReports");
//! let before = CrashSnapshot::capture(dir, "ips");
//! // ... run the app ...
//! let after = CrashSnapshot::capture(dir, "ips");
//! if let Some(name) = before.diff(&after) {
//!     let report = CrashReport::load(dir.join(name));
//!     println!("crashed: {}", report.path.display());
//! }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Extension of the human-readable companion report.
const READABLE_EXTENSION: &str = "crash";

/// The set of crash report file names present in a directory at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashSnapshot {
    names: BTreeSet<String>,
}

impl CrashSnapshot {
    /// Lists the files in `dir` whose extension equals `extension`.
    ///
    /// An unreadable or missing directory yields an empty snapshot.
    pub fn capture(dir: &Path, extension: &str) -> Self {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "crash directory unreadable");
                return Self::default();
            }
        };

        let names = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == extension))
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();

        Self { names }
    }

    /// Returns the first name in `after` that is not in `self`.
    pub fn diff<'a>(&self, after: &'a CrashSnapshot) -> Option<&'a str> {
        after
            .names
            .iter()
            .find(|name| !self.names.contains(*name))
            .map(String::as_str)
    }

    /// Number of reports in the snapshot.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the snapshot contains no reports.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A crash report written during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashReport {
    /// Path of the machine-readable report.
    pub path: PathBuf,

    /// Path of the companion human-readable report (same stem, `.crash`).
    pub readable_path: PathBuf,

    /// Parsed report contents, or `Null` if the report could not be parsed.
    pub contents: Value,
}

impl CrashReport {
    /// Loads the report at `path`.
    ///
    /// Never fails: a report that is still being flushed or is not valid JSON
    /// is returned with `Null` contents.
    pub fn load(path: PathBuf) -> Self {
        let contents = match std::fs::read_to_string(&path) {
            Ok(text) => parse_report(&text),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "crash report unreadable");
                Value::Null
            }
        };

        Self {
            readable_path: path.with_extension(READABLE_EXTENSION),
            path,
            contents,
        }
    }

    /// Convenience accessor for a top-level header field (e.g. `app_name`).
    pub fn header_field(&self, key: &str) -> Option<&Value> {
        self.contents
            .get("header")
            .unwrap_or(&self.contents)
            .get(key)
    }
}

/// Parses report text.
///
/// `.ips` reports are a one-line JSON header followed by a JSON body; those
/// become `{"header": .., "body": ..}`. A report that is a single JSON
/// document is returned as-is.
fn parse_report(text: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return value;
    }

    let Some((first, rest)) = text.split_once('\n') else {
        return Value::Null;
    };

    match (
        serde_json::from_str::<Value>(first),
        serde_json::from_str::<Value>(rest),
    ) {
        (Ok(header), Ok(body)) => serde_json::json!({ "header": header, "body": body }),
        (Ok(header), Err(_)) => serde_json::json!({ "header": header }),
        _ => Value::Null,
    }
}
