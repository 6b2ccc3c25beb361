//! Launch sessions: run an app in the simulator until exactly one outcome.
//!
//! A session owns every moving part of a launch: the launcher process, one
//! [`LogRouter`] per output source, the app log file watcher, the inactivity
//! [`Watchdog`], and the crash directory baseline. Producers (stream readers,
//! the process supervisor, the log tailer) only send events; a single
//! dispatch task handles them one at a time, in arrival order, together with
//! watchdog ticks. The first terminal trigger wins and every later one is
//! discarded.
//!
//! # Architecture
//!
//! ```text
//!  launcher stdout ─┐
//!  launcher stderr ─┼──► events ──► dispatch loop ──► lines (LogLine)
//!  launcher exit   ─┤                  ▲     │
//!  app log file    ─┘     watchdog ────┘     └──► outcome (LaunchOutcome, once)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use simrun_core::config::SimrunConfig;
//! use simrun_core::session::{launch, LaunchRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let env = SimrunConfig::load().environment(None, Vec::new())?;
//!     let request = LaunchRequest::new("build/Demo.app", "17.0")
//!         .auto_exit(true)
//!         .timeout_ms(60_000);
//!
//!     let mut handle = launch(request, env).await?;
//!     while let Some(line) = handle.lines.recv().await {
//!         println!("[{}] {}", line.channel, line.text);
//!     }
//!     println!("{:?}", handle.outcome().await);
//!     Ok(())
//! }
//! ```

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::LaunchEnvironment;
use crate::crash::{CrashReport, CrashSnapshot};
use crate::error::LaunchError;
use crate::log_file::{log_file_pattern, LogFileBaseline, LogFileWatcher};
use crate::process::ProcessWatcher;
use crate::router::{Channel, LogLine, LogRouter, Route, RouterOptions};
use crate::simctl::Simctl;
use crate::toolchain::{self, DEVELOPER_DIR_ENV};
use crate::watchdog::{self, Watchdog};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Simulated device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    Iphone,
    Ipad,
}

impl DeviceFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::Iphone => "iphone",
            DeviceFamily::Ipad => "ipad",
        }
    }
}

impl FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "iphone" => Ok(DeviceFamily::Iphone),
            "ipad" => Ok(DeviceFamily::Ipad),
            other => Err(format!("unknown device family: {other}")),
        }
    }
}

/// What to launch and how to observe it. Immutable once launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Path to the `.app` bundle.
    pub app_path: PathBuf,
    /// Bundle base name without extension; names the app's log file.
    pub app_name: String,
    /// Platform/SDK identifier, e.g. `"17.0"`.
    pub sdk: String,
    /// Run without simulator chrome. Unset means "follow `auto_exit`".
    pub hide: Option<bool>,
    /// Finish successfully when the app prints the auto-exit marker.
    pub auto_exit: bool,
    /// Capture the structured test-result block as the outcome payload.
    pub unit_test_mode: bool,
    /// Inactivity timeout; no watchdog when unset.
    pub timeout_ms: Option<u64>,
    pub family: Option<DeviceFamily>,
    pub retina: bool,
    /// Arguments passed through to the app.
    pub app_args: Vec<String>,
    /// Environment variables set for the app.
    pub app_env: Vec<(String, String)>,
}

impl LaunchRequest {
    /// Creates a request for `app_path` on `sdk` with every option off.
    pub fn new(app_path: impl Into<PathBuf>, sdk: impl Into<String>) -> Self {
        let app_path = app_path.into();
        let app_name = app_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            app_path,
            app_name,
            sdk: sdk.into(),
            hide: None,
            auto_exit: false,
            unit_test_mode: false,
            timeout_ms: None,
            family: None,
            retina: false,
            app_args: Vec::new(),
            app_env: Vec::new(),
        }
    }

    pub fn hide(mut self, hide: bool) -> Self {
        self.hide = Some(hide);
        self
    }

    pub fn auto_exit(mut self, auto_exit: bool) -> Self {
        self.auto_exit = auto_exit;
        self
    }

    pub fn unit_test_mode(mut self, unit_test_mode: bool) -> Self {
        self.unit_test_mode = unit_test_mode;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn family(mut self, family: DeviceFamily) -> Self {
        self.family = Some(family);
        self
    }

    pub fn retina(mut self, retina: bool) -> Self {
        self.retina = retina;
        self
    }

    pub fn app_arg(mut self, arg: impl Into<String>) -> Self {
        self.app_args.push(arg.into());
        self
    }

    pub fn app_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.app_env.push((key.into(), value.into()));
        self
    }

    /// Whether the simulator runs hidden; defaults to `auto_exit`.
    pub fn should_hide(&self) -> bool {
        self.hide.unwrap_or(self.auto_exit)
    }

    /// The launcher command line for this request.
    pub fn launcher_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "launch".into(),
            self.app_path.clone().into_os_string(),
            "--sdk".into(),
            self.sdk.clone().into(),
        ];
        if let Some(family) = self.family {
            args.push("--family".into());
            args.push(family.as_str().into());
        }
        if self.retina {
            args.push("--retina".into());
        }
        if self.should_hide() {
            args.push("--hide".into());
        }
        for (key, value) in &self.app_env {
            args.push("--setenv".into());
            args.push(format!("{key}={value}").into());
        }
        // Everything after --args goes to the app.
        if !self.app_args.is_empty() {
            args.push("--args".into());
            args.extend(self.app_args.iter().map(OsString::from));
        }
        args
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The single terminal result of a launch session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// The app finished; `payload` holds structured test results, if any.
    Success { payload: Option<Value> },
    /// A new crash report appeared during the session.
    Crashed { report: CrashReport },
    /// No output for the whole inactivity timeout.
    TimedOut,
    /// The launcher was killed by a signal.
    SignalTerminated { signal: String },
    /// The launcher could not be observed.
    ProcessError { message: String },
    /// The launcher exited with a non-zero code.
    ExitedNonZero { code: i32 },
}

impl LaunchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LaunchOutcome::Success { .. })
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchOutcome::Success { .. } => "success",
            LaunchOutcome::Crashed { .. } => "crashed",
            LaunchOutcome::TimedOut => "timed_out",
            LaunchOutcome::SignalTerminated { .. } => "signal_terminated",
            LaunchOutcome::ProcessError { .. } => "process_error",
            LaunchOutcome::ExitedNonZero { .. } => "exited_non_zero",
        }
    }

    /// Process exit code a front end should report for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            LaunchOutcome::Success { .. } => 0,
            LaunchOutcome::ExitedNonZero { .. } | LaunchOutcome::SignalTerminated { .. } => 1,
            LaunchOutcome::Crashed { .. } => 2,
            LaunchOutcome::TimedOut => 3,
            LaunchOutcome::ProcessError { .. } => 4,
        }
    }

    fn process_error(message: impl Into<String>) -> Self {
        LaunchOutcome::ProcessError {
            message: message.into(),
        }
    }
}

/// Lifecycle of a session. `Completed` is entered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Launching,
    Running,
    Completed,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything producers report to the dispatch loop.
#[derive(Debug)]
pub(crate) enum Event {
    /// One line from a source.
    Line { channel: Channel, text: String },
    /// The app log file was found and is being tailed.
    LogFileOpened(PathBuf),
    /// The launcher exited; sent after its output streams closed.
    Exited {
        code: Option<i32>,
        signal: Option<String>,
    },
    /// Waiting on the launcher failed.
    ProcessError(String),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller side of a running session.
pub struct LaunchHandle {
    /// Ordinary log lines in arrival order. Ends when the session completes.
    pub lines: mpsc::UnboundedReceiver<LogLine>,
    pending: Option<oneshot::Receiver<LaunchOutcome>>,
    finished: Option<LaunchOutcome>,
    state: watch::Receiver<SessionState>,
    abort_token: CancellationToken,
}

impl LaunchHandle {
    /// Waits for the session's outcome.
    ///
    /// Cancel safe; calling it again returns the same outcome.
    pub async fn outcome(&mut self) -> LaunchOutcome {
        if let Some(rx) = self.pending.as_mut() {
            let outcome = rx
                .await
                .unwrap_or_else(|_| LaunchOutcome::process_error("session ended without outcome"));
            self.pending = None;
            self.finished = Some(outcome);
        }
        self.finished
            .clone()
            .unwrap_or_else(|| LaunchOutcome::process_error("session ended without outcome"))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Ends the session early; it completes with a process error.
    ///
    /// Does nothing once the session has completed.
    pub fn abort(&self) {
        self.abort_token.cancel();
    }
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

/// Launches `request` and returns a handle to observe it.
///
/// Stops any running simulator, resolves the toolchain, snapshots the crash
/// directory and any app log left by an earlier run, then starts the
/// launcher and the log file watcher.
///
/// # Errors
///
/// - [`LaunchError::AppNotFound`] if the app bundle does not exist
/// - [`LaunchError::Spawn`] if the launcher cannot be started
pub async fn launch(
    request: LaunchRequest,
    env: LaunchEnvironment,
) -> Result<LaunchHandle, LaunchError> {
    let span = info_span!("launch_session", app = %request.app_name, sdk = %request.sdk);
    let (session, events, handle) = start(request, env).instrument(span.clone()).await?;
    info!(parent: &span, "session running");

    let abort = handle.abort_token.clone();
    tokio::spawn(
        async move {
            session.run(events, abort).await;
        }
        .instrument(span),
    );
    Ok(handle)
}

/// Sets up a session up to the point where its dispatch loop can run.
async fn start(
    request: LaunchRequest,
    env: LaunchEnvironment,
) -> Result<(LaunchSession, mpsc::UnboundedReceiver<Event>, LaunchHandle), LaunchError> {
    if !request.app_path.exists() {
        return Err(LaunchError::AppNotFound(request.app_path));
    }

    let (state_tx, state_rx) = watch::channel(SessionState::Idle);
    state_tx.send_replace(SessionState::Launching);

    Simctl::stop_named(&env.simulator_process_names).await;

    let developer_dir = toolchain::select(&env.toolchains).map(|t| {
        debug!(version = %t.version, dir = %t.developer_dir.display(), "using toolchain");
        (DEVELOPER_DIR_ENV, t.developer_dir.clone())
    });

    let baseline = CrashSnapshot::capture(&env.crash_dir, &env.crash_extension);
    debug!(existing = baseline.len(), "crash baseline captured");

    let log_pattern = log_file_pattern(&env.app_support_dir, &request.sdk, &request.app_name);
    let log_baseline = LogFileBaseline::capture(&log_pattern);
    debug!(existing = log_baseline.len(), "app log baseline captured");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let process = ProcessWatcher::spawn(
        &env.launcher,
        &request.launcher_args(),
        developer_dir,
        events_tx.clone(),
    )?;
    let log_file = LogFileWatcher::spawn(
        log_pattern,
        log_baseline,
        env.log_poll_interval,
        events_tx,
    );
    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let abort_token = CancellationToken::new();

    let options = RouterOptions {
        auto_exit: request.auto_exit,
        unit_test_mode: request.unit_test_mode,
        markers: env.markers.clone(),
    };
    let stdout = LogRouter::new(options.clone());
    let stderr = LogRouter::new(options.clone());
    let log_router = LogRouter::new(options);
    // Started after the routers so the first tick measures from their creation.
    let watchdog = request
        .timeout_ms
        .map(|ms| Watchdog::new(Duration::from_millis(ms)));

    let session = LaunchSession {
        stdout,
        stderr,
        log_router,
        request,
        env,
        process,
        log_file,
        log_path: None,
        watchdog,
        baseline,
        lines: Some(lines_tx),
        outcome: Some(outcome_tx),
        state: state_tx,
        completed: false,
    };
    session.state.send_replace(SessionState::Running);

    let handle = LaunchHandle {
        lines: lines_rx,
        pending: Some(outcome_rx),
        finished: None,
        state: state_rx,
        abort_token,
    };
    Ok((session, events_rx, handle))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct LaunchSession {
    request: LaunchRequest,
    env: LaunchEnvironment,
    stdout: LogRouter,
    stderr: LogRouter,
    log_router: LogRouter,
    process: ProcessWatcher,
    log_file: LogFileWatcher,
    log_path: Option<PathBuf>,
    watchdog: Option<Watchdog>,
    baseline: CrashSnapshot,
    lines: Option<mpsc::UnboundedSender<LogLine>>,
    outcome: Option<oneshot::Sender<LaunchOutcome>>,
    state: watch::Sender<SessionState>,
    completed: bool,
}

impl LaunchSession {
    /// Dispatches events until completion, then hands the session back.
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        abort: CancellationToken,
    ) -> Self {
        while !self.completed {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    self.complete(LaunchOutcome::process_error("aborted by caller")).await;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        self.complete(LaunchOutcome::process_error("session ended without outcome")).await;
                    }
                },
                _ = watchdog::tick(&mut self.watchdog) => self.on_watchdog_tick().await,
            }
        }
        self
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::Line { channel, text } => self.on_line(channel, text).await,
            Event::LogFileOpened(path) => {
                debug!(path = %path.display(), "tailing app log");
                self.log_path = Some(path);
            }
            Event::Exited { code, signal } => self.on_close(code, signal).await,
            Event::ProcessError(message) => {
                self.complete(LaunchOutcome::ProcessError { message }).await;
            }
        }
    }

    async fn on_line(&mut self, channel: Channel, text: String) {
        let router = match channel {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
            Channel::LogFile => &mut self.log_router,
        };

        match router.route(&text) {
            Route::Forward => {
                if let Some(lines) = &self.lines {
                    let _ = lines.send(LogLine {
                        channel,
                        text,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            Route::Swallow => {}
            Route::Finish(payload) => {
                self.complete(LaunchOutcome::Success { payload }).await;
            }
        }
    }

    /// A crash report takes precedence over however the launcher exited.
    async fn on_close(&mut self, code: Option<i32>, signal: Option<String>) {
        let outcome = if let Some(report) = self.detect_crash().await {
            LaunchOutcome::Crashed { report }
        } else if let Some(signal) = signal {
            LaunchOutcome::SignalTerminated { signal }
        } else {
            match code {
                Some(code) if code != 0 => LaunchOutcome::ExitedNonZero { code },
                _ => LaunchOutcome::Success { payload: None },
            }
        };
        self.complete(outcome).await;
    }

    async fn on_watchdog_tick(&mut self) {
        let last_activity = self.last_activity();
        let Some(timeout) = self
            .watchdog
            .as_ref()
            .filter(|watchdog| watchdog.expired(last_activity, Instant::now()))
            .map(Watchdog::timeout)
        else {
            return;
        };

        info!(?timeout, "no activity within timeout");
        let outcome = match self.detect_crash().await {
            Some(report) => LaunchOutcome::Crashed { report },
            None => LaunchOutcome::TimedOut,
        };
        self.complete(outcome).await;
    }

    /// Most recent activity across every router.
    fn last_activity(&self) -> Instant {
        [&self.stdout, &self.stderr, &self.log_router]
            .into_iter()
            .map(LogRouter::last_activity)
            .max()
            .unwrap_or_else(Instant::now)
    }

    /// Rescans the crash directory on the blocking pool.
    fn detect_crash(&self) -> impl Future<Output = Option<CrashReport>> + Send + 'static {
        let dir = self.env.crash_dir.clone();
        let extension = self.env.crash_extension.clone();
        let baseline = self.baseline.clone();

        let scan = tokio::task::spawn_blocking(move || {
            let current = CrashSnapshot::capture(&dir, &extension);
            let name = baseline.diff(&current)?;
            info!(report = name, "new crash report");
            Some(CrashReport::load(dir.join(name)))
        });
        async move {
            scan.await.unwrap_or_else(|e| {
                warn!(error = %e, "crash directory scan failed");
                None
            })
        }
    }

    async fn complete(&mut self, outcome: LaunchOutcome) {
        if self.completed {
            debug!(outcome = outcome.kind(), "session already completed, discarding");
            return;
        }
        self.completed = true;
        info!(outcome = outcome.kind(), app = %self.request.app_name, "session completed");

        self.watchdog = None;
        self.process.stop().await;
        self.log_file.stop().await;
        if let Some(path) = self.log_path.take() {
            debug!(path = %path.display(), "closed app log");
        }
        Simctl::stop_named(&self.env.simulator_process_names).await;

        self.state.send_replace(SessionState::Completed);
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
        self.lines = None;
    }
}
