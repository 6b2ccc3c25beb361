//! Line routing and control-marker recognition.
//!
//! Every line the simulated app produces (launcher stdout, launcher stderr,
//! and the app's own log file) passes through one [`LogRouter`] per source.
//! The router records activity for the watchdog, recognizes the plain-text
//! control markers embedded in otherwise free-form output, buffers the lines
//! of a structured test-result block, and hands everything else back to be
//! forwarded to the caller.
//!
//! Control markers must match the whole line once surrounding whitespace is
//! trimmed. App-termination phrases match anywhere in the untrimmed line,
//! since the system prefixes them with the process name and pid.
//!
//! # Example
//!
//! ```
//! use simrun_core::router::{LogRouter, Markers, Route, RouterOptions};
//!
//! let options = RouterOptions { auto_exit: true, unit_test_mode: false, markers: Markers::default() };
//! let mut router = LogRouter::new(options);
//!
//! assert!(matches!(router.route("hello"), Route::Forward));
//! assert!(matches!(router.route(&Markers::default().auto_exit), Route::Finish(None)));
//! ```

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// The source a log line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The launcher's standard output.
    Stdout,
    /// The launcher's standard error.
    Stderr,
    /// The app's own log file inside the simulator sandbox.
    LogFile,
}

impl Channel {
    /// Human-readable label for the channel.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
            Channel::LogFile => "log file",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An ordinary log line forwarded to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    /// Where the line came from.
    pub channel: Channel,
    /// The line text, without its trailing newline.
    pub text: String,
    /// When the line was routed.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// The sentinel texts recognized in log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markers {
    /// Ends the session successfully when auto-exit is requested.
    pub auto_exit: String,
    /// Opens a structured test-result block.
    pub results_begin: String,
    /// Closes a structured test-result block.
    pub results_end: String,
    /// Substrings meaning the app handed control back to the home screen.
    pub app_terminated: Vec<String>,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            auto_exit: "-- SIMRUN AUTO EXIT --".to_string(),
            results_begin: "-- SIMRUN TEST RESULTS BEGIN --".to_string(),
            results_end: "-- SIMRUN TEST RESULTS END --".to_string(),
            app_terminated: vec![
                "Terminating in response to SpringBoard's termination".to_string(),
                "Application has exited from Simulator".to_string(),
            ],
        }
    }
}

/// Per-session switches shared by every router of the session.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub auto_exit: bool,
    pub unit_test_mode: bool,
    pub markers: Markers,
}

/// What the caller must do with a routed line.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Forward the line verbatim to the consumer.
    Forward,
    /// The line was consumed by the router.
    Swallow,
    /// Complete the session successfully with an optional structured payload.
    Finish(Option<Value>),
}

/// Mutable per-source routing state.
#[derive(Debug)]
pub struct RouterState {
    /// Last time any line was routed.
    pub last_activity: Instant,
    /// Whether a structured test-result block is open.
    pub in_block: bool,
    /// Lines captured inside the open block.
    pub block: Vec<String>,
}

impl RouterState {
    fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            in_block: false,
            block: Vec::new(),
        }
    }
}

/// Routes lines from a single source.
#[derive(Debug)]
pub struct LogRouter {
    options: RouterOptions,
    state: RouterState,
}

impl LogRouter {
    /// Creates a router with fresh state.
    pub fn new(options: RouterOptions) -> Self {
        Self {
            options,
            state: RouterState::new(),
        }
    }

    /// Last time this router saw a line.
    pub fn last_activity(&self) -> Instant {
        self.state.last_activity
    }

    /// Read-only view of the routing state.
    pub fn state(&self) -> &RouterState {
        &self.state
    }

    /// Routes one line.
    ///
    /// Activity is recorded before anything else, so a line that ends the
    /// session still counts as activity.
    pub fn route(&mut self, line: &str) -> Route {
        self.state.last_activity = Instant::now();

        let markers = &self.options.markers;
        let trimmed = line.trim();

        if self.options.auto_exit && trimmed == markers.auto_exit {
            debug!("auto-exit marker seen");
            return Route::Finish(None);
        }

        if markers
            .app_terminated
            .iter()
            .any(|phrase| line.contains(phrase.as_str()))
        {
            debug!("app termination phrase seen");
            return Route::Finish(None);
        }

        if self.options.unit_test_mode && trimmed == markers.results_begin {
            self.state.in_block = true;
            self.state.block.clear();
            return Route::Swallow;
        }

        if self.state.in_block {
            if trimmed == markers.results_end {
                self.state.in_block = false;
                let joined = std::mem::take(&mut self.state.block).join("\n");
                return Route::Finish(Some(parse_payload(&joined)));
            }
            self.state.block.push(line.to_string());
            return Route::Swallow;
        }

        Route::Forward
    }
}

/// Decodes one raw line: drops the line ending and replaces invalid UTF-8.
pub(crate) fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parses a structured result block; malformed input becomes an empty object.
fn parse_payload(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|e| {
        warn!(error = %e, "malformed test result payload");
        Value::Object(serde_json::Map::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router(auto_exit: bool, unit_test_mode: bool) -> LogRouter {
        LogRouter::new(RouterOptions {
            auto_exit,
            unit_test_mode,
            markers: Markers::default(),
        })
    }

    #[test]
    fn ordinary_lines_are_forwarded() {
        let mut r = router(false, false);
        assert_eq!(r.route("Demo[123:4567] starting up"), Route::Forward);
        assert_eq!(r.route(""), Route::Forward);
    }

    #[test]
    fn route_updates_last_activity() {
        let mut r = router(false, false);
        let before = r.last_activity();
        std::thread::sleep(std::time::Duration::from_millis(5));
        r.route("tick");
        assert!(r.last_activity() > before);
    }

    #[test]
    fn auto_exit_marker_finishes_when_enabled() {
        let mut r = router(true, false);
        assert_eq!(r.route("-- SIMRUN AUTO EXIT --"), Route::Finish(None));
    }

    #[test]
    fn auto_exit_marker_ignored_when_disabled() {
        let mut r = router(false, false);
        assert_eq!(r.route("-- SIMRUN AUTO EXIT --"), Route::Forward);
    }

    #[test]
    fn marker_comparison_ignores_surrounding_whitespace() {
        let mut r = router(true, false);
        assert_eq!(r.route("  -- SIMRUN AUTO EXIT --\r"), Route::Finish(None));
    }

    #[test]
    fn termination_phrase_finishes() {
        let mut r = router(false, false);
        let line = "Demo[42:1f03] Terminating in response to SpringBoard's termination.";
        assert_eq!(r.route(line), Route::Finish(None));
    }

    #[test]
    fn structured_block_is_parsed() {
        let mut r = router(false, true);
        assert_eq!(r.route("-- SIMRUN TEST RESULTS BEGIN --"), Route::Swallow);
        assert_eq!(r.route("{\"passed\": 3,"), Route::Swallow);
        assert_eq!(r.route("\"failed\": 1}"), Route::Swallow);
        assert!(!r.state().block.is_empty());

        let route = r.route("-- SIMRUN TEST RESULTS END --");
        assert_eq!(route, Route::Finish(Some(json!({"passed": 3, "failed": 1}))));
        assert!(!r.state().in_block);
        assert!(r.state().block.is_empty());
    }

    #[test]
    fn malformed_block_yields_empty_payload() {
        let mut r = router(false, true);
        r.route("-- SIMRUN TEST RESULTS BEGIN --");
        r.route("{ not json");
        let route = r.route("-- SIMRUN TEST RESULTS END --");
        assert_eq!(route, Route::Finish(Some(json!({}))));
    }

    #[test]
    fn empty_block_yields_empty_payload() {
        let mut r = router(false, true);
        r.route("-- SIMRUN TEST RESULTS BEGIN --");
        let route = r.route("-- SIMRUN TEST RESULTS END --");
        assert_eq!(route, Route::Finish(Some(json!({}))));
    }

    #[test]
    fn begin_marker_forwarded_outside_unit_test_mode() {
        let mut r = router(false, false);
        assert_eq!(r.route("-- SIMRUN TEST RESULTS BEGIN --"), Route::Forward);
        assert_eq!(r.route("-- SIMRUN TEST RESULTS END --"), Route::Forward);
    }

    #[test]
    fn end_marker_outside_block_is_forwarded() {
        let mut r = router(false, true);
        assert_eq!(r.route("-- SIMRUN TEST RESULTS END --"), Route::Forward);
    }

    #[test]
    fn second_begin_marker_restarts_block() {
        let mut r = router(false, true);
        r.route("-- SIMRUN TEST RESULTS BEGIN --");
        r.route("garbage");
        r.route("-- SIMRUN TEST RESULTS BEGIN --");
        r.route("[1, 2]");
        let route = r.route("-- SIMRUN TEST RESULTS END --");
        assert_eq!(route, Route::Finish(Some(json!([1, 2]))));
    }

    #[test]
    fn unclosed_block_holds_lines() {
        let mut r = router(false, true);
        r.route("-- SIMRUN TEST RESULTS BEGIN --");
        for i in 0..5 {
            assert_eq!(r.route(&format!("line {i}")), Route::Swallow);
        }
        assert!(r.state().in_block);
        assert_eq!(r.state().block.len(), 5);
    }

    #[test]
    fn auto_exit_takes_priority_inside_block() {
        let mut r = router(true, true);
        r.route("-- SIMRUN TEST RESULTS BEGIN --");
        assert_eq!(r.route("-- SIMRUN AUTO EXIT --"), Route::Finish(None));
    }

    #[test]
    fn channel_labels() {
        assert_eq!(Channel::Stdout.label(), "stdout");
        assert_eq!(Channel::Stderr.to_string(), "stderr");
        assert_eq!(Channel::LogFile.label(), "log file");
    }

    #[test]
    fn custom_markers() {
        let mut r = LogRouter::new(RouterOptions {
            auto_exit: true,
            unit_test_mode: false,
            markers: Markers {
                auto_exit: "TI_AUTO_EXIT".to_string(),
                ..Markers::default()
            },
        });
        assert_eq!(r.route("-- SIMRUN AUTO EXIT --"), Route::Forward);
        assert_eq!(r.route("TI_AUTO_EXIT"), Route::Finish(None));
    }

    #[test]
    fn termination_phrase_matches_inside_line() {
        let mut r = router(false, false);
        assert_eq!(
            r.route("  Demo[42:1f03] Application has exited from Simulator (code 0)  "),
            Route::Finish(None)
        );
    }

    #[test]
    fn decode_line_strips_endings() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"  padded  "), "  padded  ");
    }

    #[test]
    fn decode_line_replaces_invalid_utf8() {
        assert_eq!(decode_line(b"caf\xe9\n"), "caf\u{FFFD}");
    }
}
