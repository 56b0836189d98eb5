//! Process Runner
//!
//! Drives one external process at a time from launch to exit.
//! `start` returns as soon as the child is spawned; output and the final
//! status are delivered through callbacks from a single dispatcher task.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use super::error::{CancelError, ResetError, StartError};
use super::output_relay::{OutputChunk, OutputRelay, OutputStream};

/// Executable and arguments for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Path to the program. A bare name is looked up in PATH.
    pub executable: PathBuf,
    /// Positional arguments, in order
    pub args: Vec<String>,
    /// Working directory for the child
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new<I, S>(executable: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: executable.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Resolve the executable to an existing, executable file
    pub fn resolve_executable(&self) -> io::Result<PathBuf> {
        which::which(&self.executable).map_err(|e| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not an executable file ({})", self.executable.display(), e),
            )
        })
    }
}

/// Lifecycle of a [`ProcessRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Cancelling,
    Terminated,
}

impl RunState {
    /// Whether a child process is alive (or not yet reaped)
    pub fn is_busy(&self) -> bool {
        matches!(self, RunState::Running | RunState::Cancelling)
    }
}

/// Final status of a run, delivered once to the completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationResult {
    /// Exit code; `128 + signal` when killed by a signal
    pub exit_code: i32,
    /// Whether `cancel()` was requested during the run
    pub was_cancelled: bool,
}

impl TerminationResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.was_cancelled
    }
}

/// What to do with the child's stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Deliver through `on_output`, tagged as stderr
    #[default]
    Relay,
    /// Write lines to the log
    Log,
    /// Do not capture
    Discard,
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long to keep reading output after the process has exited
    pub drain_timeout: Duration,
    /// Stderr handling
    pub stderr: StderrMode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(500),
            stderr: StderrMode::Relay,
        }
    }
}

enum RunEvent {
    Output(OutputChunk),
    Exited { exit_code: i32 },
}

/// Resources of the run in flight. Dropped when the run completes.
struct ActiveRun {
    pid: Option<u32>,
    cancel: Arc<Notify>,
    /// Set once the child has been reaped, while output may still drain
    exited: bool,
}

struct Inner {
    state: RunState,
    active: Option<ActiveRun>,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<RunState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn transition(&self, inner: &mut Inner, next: RunState) {
        debug!(from = ?inner.state, to = ?next, "run state changed");
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    fn mark_exited(&self) {
        if let Some(run) = self.lock().active.as_mut() {
            run.exited = true;
        }
    }

    fn finish_run(&self, exit_code: i32) -> TerminationResult {
        let mut inner = self.lock();
        let was_cancelled = inner.state == RunState::Cancelling;
        inner.active = None;
        self.transition(&mut inner, RunState::Terminated);
        TerminationResult {
            exit_code,
            was_cancelled,
        }
    }
}

/// Runs at most one external process at a time
pub struct ProcessRunner {
    shared: Arc<Shared>,
    runtime: Handle,
    config: RunnerConfig,
}

impl ProcessRunner {
    /// Create an idle runner whose background work runs on `runtime`
    pub fn new(runtime: Handle, config: RunnerConfig) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: RunState::Idle,
                    active: None,
                }),
                state_tx,
            }),
            runtime,
            config,
        }
    }

    pub fn state(&self) -> RunState {
        self.shared.lock().state
    }

    /// Receive every state change from now on
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.shared.state_tx.subscribe()
    }

    /// OS id of the running child, if any
    pub fn pid(&self) -> Option<u32> {
        self.shared
            .lock()
            .active
            .as_ref()
            .filter(|run| !run.exited)
            .and_then(|run| run.pid)
    }

    /// Launch `spec` and return without waiting for it.
    ///
    /// `on_output` receives chunks in the order they were read;
    /// `on_complete` is called exactly once after the process exits.
    /// Both run on the same dispatcher task. On error neither is called.
    pub fn start<O, C>(&self, spec: ProcessSpec, on_output: O, on_complete: C) -> Result<(), StartError>
    where
        O: FnMut(OutputChunk) + Send + 'static,
        C: FnOnce(TerminationResult) + Send + 'static,
    {
        let mut inner = self.shared.lock();
        if inner.state != RunState::Idle {
            warn!(state = ?inner.state, "refusing to start a second process");
            return Err(StartError::AlreadyRunning);
        }

        let executable = spec
            .resolve_executable()
            .map_err(|e| StartError::spawn(&spec.executable, e))?;

        let mut command = Command::new(&executable);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        match self.config.stderr {
            StderrMode::Discard => command.stderr(Stdio::null()),
            StderrMode::Relay | StderrMode::Log => command.stderr(Stdio::piped()),
        };
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        for (k, v) in &spec.env {
            command.env(k, v);
        }

        let mut child = {
            let _guard = self.runtime.enter();
            command
                .spawn()
                .map_err(|e| StartError::spawn(&executable, e))?
        };
        let pid = child.id();

        let Some(stdout) = child.stdout.take() else {
            // Dropping the child kills it and closes any other pipe
            let _ = child.start_kill();
            return Err(StartError::spawn(
                &executable,
                io::Error::other("stdout pipe unavailable"),
            ));
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut relays = Vec::with_capacity(2);

        let tx = events_tx.clone();
        relays.push(OutputRelay::attach(
            &self.runtime,
            stdout,
            OutputStream::Stdout,
            move |chunk| {
                let _ = tx.send(RunEvent::Output(chunk));
            },
        ));

        if let Some(stderr) = child.stderr.take() {
            match self.config.stderr {
                StderrMode::Relay => {
                    let tx = events_tx.clone();
                    relays.push(OutputRelay::attach(
                        &self.runtime,
                        stderr,
                        OutputStream::Stderr,
                        move |chunk| {
                            let _ = tx.send(RunEvent::Output(chunk));
                        },
                    ));
                }
                StderrMode::Log => {
                    relays.push(OutputRelay::attach_log(
                        &self.runtime,
                        stderr,
                        OutputStream::Stderr,
                    ));
                }
                StderrMode::Discard => {}
            }
        }

        let cancel = Arc::new(Notify::new());
        inner.active = Some(ActiveRun {
            pid,
            cancel: cancel.clone(),
            exited: false,
        });
        self.shared.transition(&mut inner, RunState::Running);
        drop(inner);

        info!(
            executable = %executable.display(),
            args = ?spec.args,
            pid = ?pid,
            "process started"
        );

        self.runtime.spawn(dispatch(
            self.shared.clone(),
            events_rx,
            on_output,
            on_complete,
        ));
        self.runtime.spawn(drive(
            self.shared.clone(),
            child,
            relays,
            cancel,
            events_tx,
            self.config.drain_timeout,
        ));

        Ok(())
    }

    /// Ask the running process to terminate.
    ///
    /// Completion is still reported through `on_complete` once the
    /// process has actually exited. Calling this again while the request
    /// is pending has no effect. A process that has already exited, with
    /// its output still draining, can no longer be cancelled.
    pub fn cancel(&self) -> Result<(), CancelError> {
        let mut inner = self.shared.lock();
        match inner.state {
            RunState::Running => {
                let Some(run) = inner.active.as_ref().filter(|run| !run.exited) else {
                    debug!("process already exited, nothing to cancel");
                    return Err(CancelError::NotRunning);
                };
                run.cancel.notify_one();
                info!(pid = ?run.pid, "cancellation requested");
                self.shared.transition(&mut inner, RunState::Cancelling);
                Ok(())
            }
            RunState::Cancelling => Ok(()),
            RunState::Idle | RunState::Terminated => Err(CancelError::NotRunning),
        }
    }

    /// Return a terminated runner to idle so it can start again
    pub fn reset(&self) -> Result<(), ResetError> {
        let mut inner = self.shared.lock();
        if inner.state.is_busy() {
            return Err(ResetError::StillRunning);
        }
        if inner.state == RunState::Terminated {
            self.shared.transition(&mut inner, RunState::Idle);
        }
        Ok(())
    }
}

/// Consumer side of a run: the only place user callbacks are invoked
async fn dispatch<O, C>(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<RunEvent>,
    mut on_output: O,
    on_complete: C,
) where
    O: FnMut(OutputChunk) + Send + 'static,
    C: FnOnce(TerminationResult) + Send + 'static,
{
    let mut on_complete = Some(on_complete);

    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Output(chunk) => on_output(chunk),
            RunEvent::Exited { exit_code } => {
                let result = shared.finish_run(exit_code);
                if let Some(on_complete) = on_complete.take() {
                    on_complete(result);
                }
                break;
            }
        }
    }

    if let Some(on_complete) = on_complete.take() {
        warn!("process driver stopped without an exit status");
        on_complete(shared.finish_run(-1));
    }
}

/// Wait for the child to exit (killing it on request), let the output
/// drain, then report the exit code to the dispatcher.
async fn drive(
    shared: Arc<Shared>,
    mut child: Child,
    relays: Vec<OutputRelay>,
    cancel: Arc<Notify>,
    events: mpsc::UnboundedSender<RunEvent>,
    drain_timeout: Duration,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.notified() => {
            debug!(pid = ?child.id(), "terminating process");
            if let Err(error) = child.start_kill() {
                warn!(%error, "failed to signal process");
            }
            child.wait().await
        }
    };
    shared.mark_exited();

    let exit_code = match status {
        Ok(status) => exit_code(status),
        Err(error) => {
            warn!(%error, "failed to wait for process");
            -1
        }
    };

    futures::future::join_all(relays.into_iter().map(|relay| relay.finish(drain_timeout))).await;

    info!(exit_code, "process exited");
    let _ = events.send(RunEvent::Exited { exit_code });
}

/// Exit code of a finished child, using the shell's `128 + signal`
/// convention for signal deaths
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
