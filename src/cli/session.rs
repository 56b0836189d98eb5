//! Drives one run from the terminal: live output, Ctrl-C to cancel

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use super::exit_codes;
use crate::host::{
    OutputChunk, OutputStream, ProcessRunner, ProcessSpec, RunState, TerminationResult,
};

/// Summary printed after a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: TerminationResult,
}

impl RunReport {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Exit code for this tool
    pub fn exit_code(&self) -> i32 {
        if self.result.was_cancelled {
            exit_codes::CANCELLED
        } else if self.result.exit_code < 0 {
            exit_codes::UNEXPECTED_FAILURE
        } else {
            self.result.exit_code
        }
    }

    pub fn print(&self, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string(self)?);
        } else if self.result.was_cancelled {
            eprintln!("Cancelled after {:.1}s", self.duration_secs());
        } else if self.result.success() {
            eprintln!("Finished in {:.1}s", self.duration_secs());
        } else {
            eprintln!(
                "Failed with exit code {} after {:.1}s",
                self.result.exit_code,
                self.duration_secs()
            );
        }
        Ok(())
    }
}

fn write_chunk(chunk: &OutputChunk) {
    let text = chunk.text();
    let result = match chunk.stream {
        OutputStream::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes()).and_then(|_| out.flush())
        }
        OutputStream::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(text.as_bytes()).and_then(|_| err.flush())
        }
    };
    if let Err(error) = result {
        tracing::debug!(%error, "failed to write script output");
    }
}

/// Run `spec` to completion, echoing its output. Each time `interrupt`
/// resolves the run is cancelled; the report still waits for the real exit.
/// A runner left terminated by an earlier session is reset first.
pub async fn run_with_interrupt<I, F>(
    runner: &ProcessRunner,
    spec: ProcessSpec,
    mut interrupt: I,
) -> anyhow::Result<RunReport>
where
    I: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    let executable = spec.executable.clone();
    let args = spec.args.clone();
    let (done_tx, mut done_rx) = oneshot::channel();

    runner.reset()?;
    let mut states = runner.subscribe();
    let started_at = Utc::now();
    runner.start(
        spec,
        |chunk| write_chunk(&chunk),
        move |result| {
            let _ = done_tx.send(result);
        },
    )?;
    tracing::debug!(pid = ?runner.pid(), "waiting for process");

    let result = loop {
        tokio::select! {
            result = &mut done_rx => {
                break result.context("run ended without reporting a result")?;
            }
            signal = interrupt() => {
                signal.context("failed to listen for interrupts")?;
                if let Err(error) = runner.cancel() {
                    tracing::debug!(%error, "interrupt ignored");
                }
            }
            Ok(()) = states.changed() => {
                if *states.borrow_and_update() == RunState::Cancelling {
                    eprintln!("Cancelling...");
                }
            }
        }
    };

    Ok(RunReport {
        executable,
        args,
        started_at,
        finished_at: Utc::now(),
        result,
    })
}

/// Run `spec` with Ctrl-C mapped to cancel
pub async fn run(runner: &ProcessRunner, spec: ProcessSpec) -> anyhow::Result<RunReport> {
    run_with_interrupt(runner, spec, tokio::signal::ctrl_c).await
}
