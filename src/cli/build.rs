//! `build` and `run` commands

use std::path::PathBuf;

use tokio::runtime::Handle;
use tracing::info;

use super::{load_settings, session, settings_path, BuildArgs, MissingInput, RunArgs};
use crate::host::{ProcessRunner, ProcessSpec};
use crate::packager::BuildRequest;
use crate::settings::Settings;

/// Command-line values layered over saved settings
fn resolve(args: &BuildArgs, settings: &Settings) -> Result<(PathBuf, BuildRequest), MissingInput> {
    let script = args
        .script
        .clone()
        .or_else(|| settings.script_path.clone())
        .ok_or(MissingInput("script"))?;
    let project = args
        .project
        .clone()
        .or_else(|| settings.project_dir.clone())
        .ok_or(MissingInput("project"))?;
    let target = args
        .target
        .clone()
        .or_else(|| settings.target.clone())
        .ok_or(MissingInput("target"))?;
    let destination = args
        .destination
        .clone()
        .or_else(|| settings.destination.clone())
        .ok_or(MissingInput("destination"))?;

    Ok((script, BuildRequest::new(project, target, destination)))
}

pub async fn run_build(
    args: BuildArgs,
    config: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<i32> {
    let mut settings = load_settings(config.as_ref())?;
    let (script, request) = resolve(&args, &settings)?;
    let spec = request.to_process_spec(&script)?;

    if args.save {
        settings.script_path = Some(script);
        settings.project_dir = Some(request.project_dir.clone());
        settings.target = Some(request.target.clone());
        settings.destination = Some(request.destination.clone());
        if let Some(path) = settings_path(config.as_ref()) {
            settings.save_to(&path)?;
            info!(path = %path.display(), "saved build settings");
        }
    }

    info!(
        project = %request.project_dir.display(),
        target = %request.target,
        destination = %request.destination.display(),
        "packaging"
    );

    let runner = ProcessRunner::new(Handle::current(), settings.runner_config());
    let report = session::run(&runner, spec).await?;
    report.print(json)?;
    Ok(report.exit_code())
}

pub async fn run_program(args: RunArgs, config: Option<PathBuf>, json: bool) -> anyhow::Result<i32> {
    let settings = load_settings(config.as_ref())?;
    let runner = ProcessRunner::new(Handle::current(), settings.runner_config());

    let spec = args
        .env
        .into_iter()
        .fold(ProcessSpec::new(args.program, args.args), |spec, (key, value)| {
            spec.with_env(key, value)
        });
    let report = session::run(&runner, spec).await?;
    report.print(json)?;
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_values_override_settings() {
        let settings = Settings {
            script_path: Some(PathBuf::from("/saved/script")),
            project_dir: Some(PathBuf::from("/saved/App")),
            target: Some("Saved".to_string()),
            destination: Some(PathBuf::from("/saved/out")),
            ..Settings::default()
        };
        let args = BuildArgs {
            target: Some("Override".to_string()),
            ..BuildArgs::default()
        };

        let (script, request) = resolve(&args, &settings).unwrap();
        assert_eq!(script, PathBuf::from("/saved/script"));
        assert_eq!(request.project_dir, PathBuf::from("/saved/App"));
        assert_eq!(request.target, "Override");
    }

    #[test]
    fn test_missing_value_is_reported() {
        let args = BuildArgs {
            script: Some(PathBuf::from("/s")),
            project: Some(PathBuf::from("/p/App")),
            target: Some("App".to_string()),
            ..BuildArgs::default()
        };
        let err = resolve(&args, &Settings::default()).unwrap_err();
        assert_eq!(err, MissingInput("destination"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_runs_script_with_contract_args() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("settings.toml");
        std::fs::create_dir(dir.path().join("Tasks")).unwrap();
        let args = BuildArgs {
            script: Some(PathBuf::from("/bin/echo")),
            project: Some(dir.path().join("Tasks")),
            target: Some("Tasks".to_string()),
            destination: Some(dir.path().join("out")),
            save: true,
        };

        let code = run_build(args, Some(config.clone()), false).await.unwrap();
        assert_eq!(code, 0);

        let saved = Settings::load_from(&config).unwrap();
        assert_eq!(saved.target.as_deref(), Some("Tasks"));
        assert_eq!(saved.script_path, Some(PathBuf::from("/bin/echo")));
    }
}
