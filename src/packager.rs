//! Build requests
//!
//! Maps the user's choices (project folder, target, destination) onto the
//! five positional arguments the packaging script expects:
//! project file, target, build directory, project name, destination.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::ProcessSpec;

/// Extension of an Xcode project bundle
const PROJECT_EXTENSION: &str = "xcodeproj";

/// Name of the build products folder inside the project directory
const BUILD_DIR_NAME: &str = "build";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("target name is empty")]
    EmptyTarget,

    #[error("cannot derive a project name from '{}'", .0.display())]
    NoProjectName(PathBuf),
}

/// One packaging job, as chosen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Folder containing `<name>.xcodeproj`
    pub project_dir: PathBuf,
    /// Xcode target to build
    pub target: String,
    /// Where the finished archive is placed
    pub destination: PathBuf,
}

impl BuildRequest {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        target: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_dir: normalize_project_dir(project_dir.into()),
            target: target.into(),
            destination: destination.into(),
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.target.trim().is_empty() {
            return Err(RequestError::EmptyTarget);
        }
        self.project_name().map(|_| ())
    }

    /// Last component of the project folder
    pub fn project_name(&self) -> Result<String, RequestError> {
        self.project_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RequestError::NoProjectName(self.project_dir.clone()))
    }

    /// `<project_dir>/<name>.xcodeproj`
    pub fn project_file(&self) -> Result<PathBuf, RequestError> {
        let name = self.project_name()?;
        Ok(self
            .project_dir
            .join(format!("{}.{}", name, PROJECT_EXTENSION)))
    }

    /// `<project_dir>/build`
    pub fn build_dir(&self) -> PathBuf {
        self.project_dir.join(BUILD_DIR_NAME)
    }

    /// Arguments for the packaging script, in contract order
    pub fn script_args(&self) -> Result<Vec<String>, RequestError> {
        self.validate()?;
        Ok(vec![
            display(&self.project_file()?),
            self.target.trim().to_string(),
            display(&self.build_dir()),
            self.project_name()?,
            display(&self.destination),
        ])
    }

    pub fn to_process_spec(&self, script: impl Into<PathBuf>) -> Result<ProcessSpec, RequestError> {
        Ok(ProcessSpec::new(script, self.script_args()?).with_working_dir(&self.project_dir))
    }
}

/// Accept either the project folder or the `.xcodeproj` bundle itself
fn normalize_project_dir(path: PathBuf) -> PathBuf {
    let is_bundle = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(PROJECT_EXTENSION));
    if is_bundle {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            return parent.to_path_buf();
        }
    }
    path
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
