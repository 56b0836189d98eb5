//! Command-line interface

pub mod build;
pub mod config;
pub mod session;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::Settings;

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const UNEXPECTED_FAILURE: i32 = 1;
    pub const INVALID_INPUT: i32 = 2;
    /// Script was cancelled with Ctrl-C (128 + SIGINT)
    pub const CANCELLED: i32 = 130;
}

#[derive(Parser, Debug)]
#[command(name = "ipa-packager", version, about = "Package an Xcode project into an .ipa archive")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON log lines and a JSON run summary
    #[arg(long = "json", global = true)]
    pub json_output: bool,

    /// Settings file to use instead of the default location
    #[arg(long, global = true, env = "IPA_PACKAGER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the packaging script for a project
    Build(BuildArgs),
    /// Run any program with live output (diagnostics)
    Run(RunArgs),
    /// Show the effective settings
    Config,
}

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Packaging script
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Project folder (or its .xcodeproj bundle)
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Xcode target name
    #[arg(long)]
    pub target: Option<String>,

    /// Folder that receives the archive
    #[arg(long)]
    pub destination: Option<PathBuf>,

    /// Remember these values for the next build
    #[arg(long)]
    pub save: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Extra environment variable for the program, as KEY=VALUE
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Program to run
    pub program: PathBuf,

    /// Program arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// A required value was given neither on the command line nor in settings
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("missing {0}: pass --{0} or set it in the settings file")]
pub struct MissingInput(pub &'static str);

/// Settings file in effect for this invocation
pub fn settings_path(cli_path: Option<&PathBuf>) -> Option<PathBuf> {
    cli_path.cloned().or_else(Settings::default_path)
}

pub fn load_settings(cli_path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    match settings_path(cli_path) {
        Some(path) => Settings::load_from(&path),
        None => Ok(Settings::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::parse_from([
            "ipa-packager",
            "build",
            "--project",
            "/p/Tasks",
            "--target",
            "Tasks",
            "--destination",
            "/tmp/out",
            "--save",
        ]);
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.project, Some(PathBuf::from("/p/Tasks")));
                assert_eq!(args.target.as_deref(), Some("Tasks"));
                assert!(args.save);
                assert!(args.script.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_keeps_hyphen_args() {
        let cli = Cli::parse_from(["ipa-packager", "--json", "run", "/bin/ls", "-la", "/tmp"]);
        assert!(cli.json_output);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.program, PathBuf::from("/bin/ls"));
                assert_eq!(args.args, vec!["-la", "/tmp"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_env() {
        let cli = Cli::parse_from([
            "ipa-packager",
            "run",
            "--env",
            "CONFIGURATION=Release",
            "--env",
            "EMPTY=",
            "/usr/bin/env",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(
                    args.env,
                    vec![
                        ("CONFIGURATION".to_string(), "Release".to_string()),
                        ("EMPTY".to_string(), String::new()),
                    ]
                );
                assert!(args.args.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(parse_env("NOVALUE").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_missing_input_message() {
        let err = MissingInput("target");
        assert!(err.to_string().contains("--target"));
    }
}
