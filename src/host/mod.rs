//! Host module for process management and output streaming

pub mod error;
pub mod output_relay;
pub mod process_runner;

pub use error::StartError;
pub use output_relay::{OutputChunk, OutputStream};
pub use process_runner::{
    ProcessRunner, ProcessSpec, RunState, RunnerConfig, StderrMode, TerminationResult,
};
