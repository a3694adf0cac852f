//! Supervision of a single ffmpeg subprocess.
//!
//! [`Runner::start`] claims the runner's single run slot, spawns a task that owns
//! the child process, and hands back a [`RunHandle`]. The handle yields an ordered
//! stream of [`RunEvent`]s that always ends with exactly one terminal event.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::Transcoder;
use super::commands::MediaCommand;
use super::probe::DurationProbe;
use super::progress::{
    LineSplitter, ProgressSnapshot, extract_error_summary, has_fatal_error, is_progress_complete,
    parse_progress_line,
};
use crate::error::{ConvertError, Result};

/// Time between the graceful and the forced termination signal
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Preparing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Preparing | RunState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Terminal outcome for one file
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub status: ConversionStatus,
    /// Wall-clock time from start to terminal state
    pub elapsed: Duration,
    pub output_size: u64,
    pub error: Option<String>,
}

impl ConversionResult {
    pub fn failed<E: Into<String>>(input_path: PathBuf, output_path: PathBuf, elapsed: Duration, error: E) -> Self {
        Self {
            input_path,
            output_path,
            status: ConversionStatus::Failed,
            elapsed,
            output_size: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Display-ready command line, sent once the duration probe is done
    Started { command_line: String },
    Progress(ProgressSnapshot),
    Completed(ConversionResult),
    Failed(ConversionResult),
    Cancelled(ConversionResult),
}

impl RunEvent {
    fn terminal(result: ConversionResult) -> Self {
        match result.status {
            ConversionStatus::Completed => RunEvent::Completed(result),
            ConversionStatus::Failed => RunEvent::Failed(result),
            ConversionStatus::Cancelled => RunEvent::Cancelled(result),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed(_) | RunEvent::Failed(_) | RunEvent::Cancelled(_))
    }

    pub fn into_result(self) -> Option<ConversionResult> {
        match self {
            RunEvent::Completed(r) | RunEvent::Failed(r) | RunEvent::Cancelled(r) => Some(r),
            RunEvent::Started { .. } | RunEvent::Progress(_) => None,
        }
    }
}

// CancelState::phase values
const LIVE: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const EXITED: u8 = 2;

#[derive(Debug, Default)]
struct CancelState {
    phase: AtomicU8,
    notify: Notify,
}

/// Cloneable cancellation switch for one run
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination. Returns `true` only for the first request made before the
    /// process exited; such a run always ends `Cancelled`.
    ///
    /// Returning does not mean the process has stopped; the run's terminal event does.
    pub fn cancel(&self) -> bool {
        if self
            .inner
            .phase
            .compare_exchange(LIVE, CANCEL_REQUESTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.inner.notify.notify_one();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.phase.load(Ordering::SeqCst) == CANCEL_REQUESTED
    }

    /// Close the window for cancellation. Returns whether a cancel got in first.
    fn mark_exited(&self) -> bool {
        match self
            .inner
            .phase
            .compare_exchange(LIVE, EXITED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => false,
            Err(phase) => phase == CANCEL_REQUESTED,
        }
    }

    async fn requested(&self) {
        self.inner.notify.notified().await;
    }
}

/// Ownership token for an active run
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancelHandle,
    input_path: PathBuf,
    output_path: PathBuf,
}

impl RunHandle {
    pub fn new(
        events: mpsc::UnboundedReceiver<RunEvent>,
        cancel: CancelHandle,
        input_path: PathBuf,
        output_path: PathBuf,
    ) -> Self {
        Self {
            events,
            cancel,
            input_path,
            output_path,
        }
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Next event in run order; `None` after the terminal event
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Drain remaining events and return the terminal result
    pub async fn finish(mut self) -> ConversionResult {
        while let Some(event) = self.events.recv().await {
            if let Some(result) = event.into_result() {
                return result;
            }
        }
        ConversionResult::failed(
            self.input_path,
            self.output_path,
            Duration::ZERO,
            "Conversion task ended without reporting a result",
        )
    }
}

/// Runs at most one ffmpeg process at a time
pub struct Runner {
    probe: Arc<dyn DurationProbe>,
    kill_grace: Duration,
    state: Arc<watch::Sender<RunState>>,
}

impl Runner {
    pub fn new(probe: Arc<dyn DurationProbe>) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            probe,
            kill_grace: DEFAULT_KILL_GRACE,
            state: Arc::new(state),
        }
    }

    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Spawn supervision of `command`. Fails with [`ConvertError::Busy`] while a run is active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, command: MediaCommand) -> Result<RunHandle> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            *state = RunState::Preparing;
            claimed = true;
            true
        });
        if !claimed {
            return Err(ConvertError::Busy);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancelHandle::new();
        let handle = RunHandle::new(
            events_rx,
            cancel.clone(),
            command.input_path.clone(),
            command.output_path.clone(),
        );

        let supervisor = Supervisor {
            command,
            probe: Arc::clone(&self.probe),
            kill_grace: self.kill_grace,
            state: Arc::clone(&self.state),
            cancel,
            events: events_tx,
        };
        tokio::spawn(supervisor.run());

        Ok(handle)
    }
}

impl Transcoder for Runner {
    fn start(&self, command: MediaCommand) -> Result<RunHandle> {
        Runner::start(self, command)
    }
}

/// Returns the slot to a terminal state if the supervisor dies early
struct SlotGuard(Arc<watch::Sender<RunState>>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            if state.is_active() {
                *state = RunState::Failed;
                true
            } else {
                false
            }
        });
    }
}

struct Supervisor {
    command: MediaCommand,
    probe: Arc<dyn DurationProbe>,
    kill_grace: Duration,
    state: Arc<watch::Sender<RunState>>,
    cancel: CancelHandle,
    events: mpsc::UnboundedSender<RunEvent>,
}

impl Supervisor {
    async fn run(self) {
        let _guard = SlotGuard(Arc::clone(&self.state));
        let started = Instant::now();

        let mut result = self.supervise().await;
        result.elapsed = started.elapsed();
        self.cancel.mark_exited();

        match result.status {
            ConversionStatus::Completed => info!(
                "Conversion completed: {} ({} bytes)",
                result.output_path.display(),
                result.output_size
            ),
            ConversionStatus::Failed => warn!(
                "Conversion failed: {}: {}",
                result.input_path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            ),
            ConversionStatus::Cancelled => info!("Conversion cancelled: {}", result.input_path.display()),
        }

        // Slot must be free by the time the terminal event is observed
        self.state.send_replace(match result.status {
            ConversionStatus::Completed => RunState::Completed,
            ConversionStatus::Failed => RunState::Failed,
            ConversionStatus::Cancelled => RunState::Cancelled,
        });
        self.emit(RunEvent::terminal(result));
    }

    fn emit(&self, event: RunEvent) {
        if self.events.send(event).is_err() {
            debug!("Run event dropped, handle was released");
        }
    }

    fn outcome(&self, status: ConversionStatus, output_size: u64, error: Option<String>) -> ConversionResult {
        ConversionResult {
            input_path: self.command.input_path.clone(),
            output_path: self.command.output_path.clone(),
            status,
            elapsed: Duration::ZERO,
            output_size,
            error,
        }
    }

    async fn supervise(&self) -> ConversionResult {
        let command = &self.command;

        let total_duration = match self.probe.duration(&command.input_path).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Could not determine duration of {}: {}", command.input_path.display(), e);
                0.0
            }
        };

        let command_line = command.to_string();
        info!("{}: {}", command.description, command.input_path.display());
        debug!("Executing media processing command: {}", command_line);
        self.emit(RunEvent::Started { command_line });

        if self.cancel.is_cancelled() {
            return self.outcome(ConversionStatus::Cancelled, 0, None);
        }

        let mut child = match Command::new(&command.binary_path)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                let error = ConvertError::Spawn {
                    program: command.binary_path.clone(),
                    source,
                };
                return self.outcome(ConversionStatus::Failed, 0, Some(error.to_string()));
            }
        };
        self.state.send_replace(RunState::Running);

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut stdout_buf = vec![0u8; READ_CHUNK];
        let mut stderr_buf = vec![0u8; READ_CHUNK];
        let mut stdout_lines = LineSplitter::new();
        let mut stderr_lines = LineSplitter::new();
        let mut tracker = ProgressTracker::new(total_duration);

        let mut exit: Option<std::io::Result<ExitStatus>> = None;
        let mut cancelled_before_exit = false;
        let mut terminate_sent = false;
        let mut kill_sent = false;
        let mut kill_deadline: Option<Instant> = None;

        while exit.is_none() || stdout.is_some() || stderr.is_some() {
            tokio::select! {
                read = read_chunk(&mut stderr, &mut stderr_buf), if stderr.is_some() => {
                    let lines = match read {
                        Some(n) => stderr_lines.push(&stderr_buf[..n]),
                        None => {
                            stderr = None;
                            stderr_lines.finish().into_iter().collect()
                        }
                    };
                    for line in lines {
                        tracker.record_diagnostic(&line);
                        self.forward(&mut tracker, &line);
                    }
                }
                read = read_chunk(&mut stdout, &mut stdout_buf), if stdout.is_some() => {
                    let lines = match read {
                        Some(n) => stdout_lines.push(&stdout_buf[..n]),
                        None => {
                            stdout = None;
                            stdout_lines.finish().into_iter().collect()
                        }
                    };
                    for line in lines {
                        self.forward(&mut tracker, &line);
                    }
                }
                status = child.wait(), if exit.is_none() => {
                    cancelled_before_exit = self.cancel.mark_exited();
                    debug!("ffmpeg exited: {:?}", status);
                    exit = Some(status);
                }
                _ = self.cancel.requested(), if !terminate_sent && exit.is_none() => {
                    terminate_sent = true;
                    info!("Cancelling conversion of {}", command.input_path.display());
                    terminate_gracefully(&mut child);
                    kill_deadline = Some(Instant::now() + self.kill_grace);
                }
                _ = wait_deadline(kill_deadline), if !kill_sent && exit.is_none() => {
                    kill_sent = true;
                    warn!("ffmpeg did not stop within {:?}, killing", self.kill_grace);
                    if let Err(e) = child.start_kill() {
                        debug!("Force kill failed: {}", e);
                    }
                }
                else => break,
            }
        }

        if cancelled_before_exit {
            return self.outcome(ConversionStatus::Cancelled, 0, None);
        }

        let status = match exit {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                let error = ConvertError::Runtime(format!("lost track of {}: {}", command.binary_path, e));
                return self.outcome(ConversionStatus::Failed, 0, Some(error.to_string()));
            }
            None => {
                return self.outcome(
                    ConversionStatus::Failed,
                    0,
                    Some(format!("{} exit status unavailable", command.binary_path)),
                );
            }
        };

        let diagnostics = tracker.diagnostics();
        if !status.success() || has_fatal_error(diagnostics) {
            let mut summary = extract_error_summary(diagnostics);
            if summary.is_empty() {
                summary = format!("{} exited with {}", command.binary_path, status);
            }
            return self.outcome(ConversionStatus::Failed, 0, Some(summary));
        }

        let output_size = match tokio::fs::metadata(&command.output_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!("Output {} not readable: {}", command.output_path.display(), e);
                0
            }
        };
        self.outcome(ConversionStatus::Completed, output_size, None)
    }

    fn forward(&self, tracker: &mut ProgressTracker, line: &str) {
        if let Some(snapshot) = tracker.observe(line) {
            self.emit(RunEvent::Progress(snapshot));
        }
    }
}

/// Keeps the last emitted snapshot and the stderr transcript for one run
struct ProgressTracker {
    total_duration: f64,
    last: Option<ProgressSnapshot>,
    completion_sent: bool,
    diagnostics: String,
}

impl ProgressTracker {
    fn new(total_duration: f64) -> Self {
        Self {
            total_duration,
            last: None,
            completion_sent: false,
            diagnostics: String::new(),
        }
    }

    fn record_diagnostic(&mut self, line: &str) {
        self.diagnostics.push_str(line);
        self.diagnostics.push('\n');
    }

    fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    /// Snapshot to forward for this line, if any
    fn observe(&mut self, line: &str) -> Option<ProgressSnapshot> {
        if is_progress_complete(line) {
            if self.completion_sent {
                return None;
            }
            self.completion_sent = true;

            let last = self.last.take().unwrap_or_default();
            let done = ProgressSnapshot {
                time: self.total_duration.max(last.time),
                percent: 100.0,
                speed: last.speed,
                fps: last.fps,
                ..ProgressSnapshot::default()
            };
            self.last = Some(done.clone());
            return Some(done);
        }

        let snapshot = parse_progress_line(line, self.total_duration)?;
        if let Some(last) = &self.last {
            if snapshot.time <= last.time {
                return None;
            }
        }
        self.last = Some(snapshot.clone());
        Some(snapshot)
    }
}

/// Next chunk from `stream`; `None` at EOF or on a read error
async fn read_chunk<R: AsyncRead + Unpin>(stream: &mut Option<R>, buf: &mut [u8]) -> Option<usize> {
    let reader = stream.as_mut()?;
    match reader.read(buf).await {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(e) => {
            debug!("Stream read failed: {}", e);
            None
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn terminate_gracefully(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // id() is None once the child has been reaped
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Terminate failed: {}", e);
    }
}
