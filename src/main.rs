//! ipa-packager - run an Xcode packaging script and follow its output
//!
//! The script is launched as a managed child process:
//! - output is streamed to the terminal as it is produced
//! - Ctrl-C cancels the script and waits for it to exit
//! - the tool exits with the script's status

mod cli;
mod host;
mod logging;
mod packager;
mod settings;

use clap::Parser;
use cli::{exit_codes, Cli, Commands, MissingInput};

use crate::host::StartError;
use crate::packager::RequestError;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = logging::init(cli.verbose, cli.json_output) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_codes::UNEXPECTED_FAILURE;
    }

    // Create tokio runtime for the process runner
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Build(args) => {
            rt.block_on(cli::build::run_build(args, cli.config, cli.json_output))
        }
        Commands::Run(args) => {
            rt.block_on(cli::build::run_program(args, cli.config, cli.json_output))
        }
        Commands::Config => cli::config::run(cli.config).map(|()| exit_codes::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            categorize_error(&e)
        }
    }
}

/// Categorize an error into the appropriate exit code
fn categorize_error(e: &anyhow::Error) -> i32 {
    if e.downcast_ref::<MissingInput>().is_some() || e.downcast_ref::<RequestError>().is_some() {
        return exit_codes::INVALID_INPUT;
    }
    match e.downcast_ref::<StartError>() {
        Some(StartError::Spawn { .. }) => exit_codes::INVALID_INPUT,
        _ => exit_codes::UNEXPECTED_FAILURE,
    }
}
