//! Discovery and tailing of the app's own log file.
//!
//! The simulator creates the app's sandbox (and the log file inside it) only
//! after the app process starts, so the file cannot be opened up front. The
//! watcher polls for it on a short fixed interval, then follows it, sending
//! each complete line as a session event.
//!
//! App sandboxes outlive a launch, so a log file from an earlier run may
//! already be in place. A [`LogFileBaseline`] taken before the launcher
//! starts records those files: an unchanged one is never picked, and one
//! that has grown is followed from where the earlier run left it.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, Instrument};

use crate::router::{decode_line, Channel};
use crate::session::Event;

/// The app log files that already existed when a launch started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFileBaseline {
    files: BTreeMap<PathBuf, u64>,
}

impl LogFileBaseline {
    /// Records every file currently matching `pattern`.
    pub fn capture(pattern: &str) -> Self {
        let files = matching_files(pattern)
            .filter_map(|path| file_len(&path).map(|len| (path, len)))
            .collect();
        Self { files }
    }

    /// Number of pre-existing log files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if no log file existed.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Where to start reading `path`, or `None` while it is unchanged.
    ///
    /// New files start at 0. A file that grew resumes at its recorded
    /// length; one that shrank was rewritten and starts over.
    fn start_offset(&self, path: &Path, len: u64) -> Option<u64> {
        match self.files.get(path) {
            None => Some(0),
            Some(&before) if len > before => Some(before),
            Some(&before) if len < before => Some(0),
            Some(_) => None,
        }
    }
}

/// Handle for a running log file watcher.
///
/// The tailed file is closed when the watcher is cancelled.
pub struct LogFileWatcher {
    cancel_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl LogFileWatcher {
    /// Starts searching for `pattern` every `interval`, skipping what
    /// `baseline` recorded.
    pub(crate) fn spawn(
        pattern: String,
        baseline: LogFileBaseline,
        interval: Duration,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let join_handle = tokio::spawn(
            async move {
                Self::run(pattern, baseline, interval, events, token_clone).await;
            }
            .instrument(debug_span!("log_file_watcher")),
        );

        Self {
            cancel_token,
            join_handle: Some(join_handle),
        }
    }

    /// Stops searching or tailing.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Cancels the watcher and waits for it to finish.
    pub async fn stop(&mut self) {
        self.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }

    /// Returns whether the watcher is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn run(
        pattern: String,
        baseline: LogFileBaseline,
        interval: Duration,
        events: mpsc::UnboundedSender<Event>,
        cancel_token: CancellationToken,
    ) {
        let (path, offset) = loop {
            if let Some(found) = find_log_file(&pattern, &baseline) {
                break found;
            }
            tokio::select! {
                _ = cancel_token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        };

        info!(path = %path.display(), offset, "app log file found");
        if events.send(Event::LogFileOpened(path.clone())).is_err() {
            return;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => {}
            result = tail(&path, offset, interval, &events) => {
                if let Err(e) = result {
                    debug!(path = %path.display(), error = %e, "stopped tailing app log");
                }
            }
        }
    }
}

/// Builds the glob pattern for `<app_name>.log` under any installed copy of
/// the app for `sdk`.
pub fn log_file_pattern(app_support_dir: &Path, sdk: &str, app_name: &str) -> String {
    let base = glob::Pattern::escape(&app_support_dir.join(sdk).to_string_lossy());
    let file = glob::Pattern::escape(&format!("{app_name}.log"));
    format!("{base}/Applications/*/Documents/{file}")
}

/// Returns the first file matching `pattern`, in sorted order, that is new or
/// changed since `baseline`, with the offset to start reading it from.
pub fn find_log_file(pattern: &str, baseline: &LogFileBaseline) -> Option<(PathBuf, u64)> {
    matching_files(pattern).find_map(|path| {
        let len = file_len(&path)?;
        let offset = baseline.start_offset(&path, len)?;
        Some((path, offset))
    })
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
}

fn matching_files(pattern: &str) -> impl Iterator<Item = PathBuf> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => Some(paths),
        Err(e) => {
            debug!(%pattern, error = %e, "invalid log file pattern");
            None
        }
    };
    paths.into_iter().flatten().filter_map(Result::ok)
}

/// Follows `path` from `offset`, sending every complete line.
///
/// Returns when the event receiver is gone. A partial trailing line is held
/// until its newline arrives; a truncated file is re-read from the start.
async fn tail(
    path: &Path,
    offset: u64,
    interval: Duration,
    events: &mpsc::UnboundedSender<Event>,
) -> std::io::Result<()> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut reader = BufReader::new(file);
    let mut position = offset;
    let mut line = Vec::new();

    loop {
        let n = reader.read_until(b'\n', &mut line).await?;
        position += n as u64;
        if n == 0 {
            let truncated = tokio::fs::metadata(path)
                .await
                .is_ok_and(|metadata| metadata.len() < position);
            if truncated {
                debug!(path = %path.display(), "app log truncated, reading from the start");
                reader.seek(SeekFrom::Start(0)).await?;
                position = 0;
                line.clear();
            }
            tokio::time::sleep(interval).await;
            continue;
        }
        if !line.ends_with(b"\n") {
            continue;
        }

        let text = decode_line(&line);
        line.clear();
        if events
            .send(Event::Line {
                channel: Channel::LogFile,
                text,
            })
            .is_err()
        {
            return Ok(());
        }
    }
}
