//! Launcher process supervision.
//!
//! [`ProcessWatcher::spawn`] starts the launcher executable immediately and
//! turns everything it does into session events: one event per line of
//! stdout/stderr, then exactly one exit or error event. The exit event is sent
//! only after both output streams have been drained (bounded by a short grace
//! period), so it always follows the last line the launcher printed.
//!
//! Output is read as raw bytes and decoded lossily, so a stray invalid byte
//! never ends the stream.

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, Instrument};

use crate::error::LaunchError;
use crate::router::{decode_line, Channel};
use crate::session::Event;

/// How long to wait for the output streams to close after the process exits.
const STREAM_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Handle to a running launcher process.
///
/// Dropping the handle does not kill the process; call [`kill`](Self::kill)
/// or [`stop`](Self::stop).
pub struct ProcessWatcher {
    pid: Option<u32>,
    cancel_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl ProcessWatcher {
    /// Spawns `program` with `args` and `envs`, streaming into `events`.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::Spawn`] if the process cannot be started
    pub(crate) fn spawn<I, K, V>(
        program: &Path,
        args: &[OsString],
        envs: I,
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<std::ffi::OsStr>,
        V: AsRef<std::ffi::OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        let pid = child.id();
        info!(program = %program.display(), ?pid, "launcher spawned");

        let stdout = child
            .stdout
            .take()
            .map(|s| spawn_reader(s, Channel::Stdout, events.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|s| spawn_reader(s, Channel::Stderr, events.clone()));

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let join_handle = tokio::spawn(
            async move {
                Self::supervise(child, stdout, stderr, events, token_clone).await;
            }
            .instrument(debug_span!("launcher", ?pid)),
        );

        Ok(Self {
            pid,
            cancel_token,
            join_handle: Some(join_handle),
        })
    }

    /// The OS process id, if the process was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Kills the launcher (if still running) and stops all event delivery.
    pub fn kill(&self) {
        self.cancel_token.cancel();
    }

    /// Kills the launcher and waits until supervision has ended.
    ///
    /// No event is sent once this returns.
    pub async fn stop(&mut self) {
        self.kill();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }

    /// Returns whether the supervising task is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn supervise(
        mut child: Child,
        stdout: Option<JoinHandle<()>>,
        stderr: Option<JoinHandle<()>>,
        events: mpsc::UnboundedSender<Event>,
        cancel_token: CancellationToken,
    ) {
        let status = tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("killing launcher");
                let _ = child.kill().await;
                abort_reader(stdout);
                abort_reader(stderr);
                return;
            }
            status = child.wait() => status,
        };

        // Output still buffered in the pipes belongs before the exit event.
        let readers: Vec<JoinHandle<()>> = [stdout, stderr].into_iter().flatten().collect();
        let aborts: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("stopped while draining launcher output");
                aborts.iter().for_each(AbortHandle::abort);
                return;
            }
            _ = drain(readers) => {}
        }

        let event = match status {
            Ok(status) => {
                let (code, signal) = describe_status(status);
                info!(?code, ?signal, "launcher exited");
                Event::Exited { code, signal }
            }
            Err(e) => Event::ProcessError(e.to_string()),
        };
        let _ = events.send(event);
    }
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(STREAM_DRAIN_GRACE, reader).await.is_err() {
            debug!("output stream still open after exit, abandoning it");
            abort.abort();
        }
    }
}

fn abort_reader(reader: Option<JoinHandle<()>>) {
    if let Some(reader) = reader {
        reader.abort();
    }
}

fn spawn_reader<R>(
    stream: R,
    channel: Channel,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = decode_line(&buf);
                    if events.send(Event::Line { channel, text }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(%channel, error = %e, "launcher stream read failed");
                    break;
                }
            }
        }
    })
}

/// Splits an exit status into an exit code and a signal name.
fn describe_status(status: ExitStatus) -> (Option<i32>, Option<String>) {
    (status.code(), signal_name(status))
}

#[cfg(unix)]
fn signal_name(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    let raw = status.signal()?;
    Some(match nix::sys::signal::Signal::try_from(raw) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("SIG{raw}"),
    })
}

#[cfg(not(unix))]
fn signal_name(_status: ExitStatus) -> Option<String> {
    None
}
