//! # Work Submission
//!
//! The scheduler side of the pipeline: a fully assembled work unit (template
//! written, every input file staged) is handed to a [`WorkSubmitter`], which
//! returns the name of the created work unit.
//!
//! [`CreateWorkCli`] runs the project's `bin/create_work` from the project
//! directory:
//!
//! ```text
//! bin/create_work --appname APP --wu_name NAME --wu_template TEMPLATE \
//!     --rsc_memory_bound M --rsc_disk_bound D [--key value ...] FILE...
//! ```

use crate::constants::{
    CREATE_WORK_BIN, CREATE_WORK_TIMEOUT, RSC_DISK_BOUND_KEY, RSC_MEMORY_BOUND_KEY, WU_NAME_KEY,
    WU_TEMPLATE_KEY,
};
use crate::error::{Error, Result};
use crate::process;
use crate::resources::ResourceBounds;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Everything needed to create one work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnitRequest {
    /// Application the work unit belongs to.
    pub appname: String,
    /// Resource bounds.
    pub bounds: ResourceBounds,
    /// Extra scheduler options, passed as `--key value` in order.
    pub options: Vec<(String, String)>,
    /// Job input template file.
    pub template_path: PathBuf,
    /// Input file names in the download hierarchy, in template order.
    pub files: Vec<String>,
}

impl WorkUnitRequest {
    /// Returns the value of an extra option, if set.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Creates work units on the scheduler.
#[async_trait]
pub trait WorkSubmitter: Send + Sync {
    /// Submits a work unit and returns its name.
    async fn submit(&self, request: &WorkUnitRequest) -> Result<String>;
}

/// Submitter backed by the project's `create_work` program.
#[derive(Debug, Clone)]
pub struct CreateWorkCli {
    binary: PathBuf,
    project_dir: PathBuf,
}

impl CreateWorkCli {
    /// Uses `<project_dir>/bin/create_work`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            binary: project_dir.join(CREATE_WORK_BIN),
            project_dir,
        }
    }

    /// Overrides the `create_work` binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Returns the project directory.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Builds the `create_work` argument list and the work-unit name.
    pub fn arguments(&self, request: &WorkUnitRequest) -> (String, Vec<String>) {
        let wu_name = request
            .option(WU_NAME_KEY)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_{}", request.appname, uuid::Uuid::new_v4().simple()));

        let mut args = vec![
            "--appname".to_string(),
            request.appname.clone(),
            format!("--{}", WU_NAME_KEY),
            wu_name.clone(),
            format!("--{}", WU_TEMPLATE_KEY),
            request.template_path.to_string_lossy().into_owned(),
            format!("--{}", RSC_MEMORY_BOUND_KEY),
            request.bounds.memory_bytes.to_string(),
            format!("--{}", RSC_DISK_BOUND_KEY),
            request.bounds.disk_bytes.to_string(),
        ];
        for (key, value) in &request.options {
            if key == WU_NAME_KEY {
                continue;
            }
            args.push(format!("--{}", key));
            args.push(value.clone());
        }
        args.extend(request.files.iter().cloned());
        (wu_name, args)
    }
}

#[async_trait]
impl WorkSubmitter for CreateWorkCli {
    async fn submit(&self, request: &WorkUnitRequest) -> Result<String> {
        let (wu_name, args) = self.arguments(request);

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).current_dir(&self.project_dir);

        info!("Submitting work unit {} ({} files)", wu_name, request.files.len());
        process::run(&mut cmd, CREATE_WORK_TIMEOUT)
            .await
            .map_err(|e| match e {
                Error::ProcessFailure { output, .. } => Error::SubmissionFailed(output),
                Error::ProcessSpawn { command, reason } => {
                    Error::SubmissionFailed(format!("{}: {}", command, reason))
                }
                other => other,
            })?;

        Ok(wu_name)
    }
}
