//! # Packaging Pipeline
//!
//! [`Packager`] turns one [`PackRequest`] into one submitted work unit:
//!
//! ```text
//! resolve image ─► resource bounds ─► export / reuse layer artifacts
//!                                              │
//!         launcher script + vbox_job.xml ◄─────┘
//!                        │
//!                        ▼
//!   assemble inputs ─► stage payloads ─► write template ─► submit
//! ```
//!
//! Nothing is submitted unless every input file is staged and the template
//! is written. All temporary files live in one [`WorkDir`] owned by the
//! running future: it is removed when the run finishes, fails or is
//! cancelled through [`Packager::run_until`].

use crate::constants::TEMPLATE_FILE_PREFIX;
use crate::error::{Error, Result};
use crate::export::{ArtifactCache, Exporter, WorkDir};
use crate::image::{ImageIdentity, ImageRef, ImageResolver, ResolveCache};
use crate::inputs::{self, InputFile, Payload};
use crate::jobconfig::{JobOption, VboxJob};
use crate::launcher::{CommandLine, LauncherScript};
use crate::resources::ResourceBounds;
use crate::runtime::ContainerRuntime;
use crate::storage::{DownloadHierarchy, write_atomic};
use crate::submit::{WorkSubmitter, WorkUnitRequest};
use crate::template::JobTemplate;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// One packaging request.
#[derive(Debug, Clone)]
pub struct PackRequest {
    /// Image to package.
    pub image: ImageRef,
    /// Command run in the container.
    pub command: CommandLine,
    /// Entrypoint override.
    pub entrypoint: Option<String>,
    /// Shell commands run in the VM before the container.
    pub prerun: Vec<String>,
    /// Shell commands run in the VM after the container.
    pub postrun: Vec<String>,
    /// Extra job input files, placed before the generated ones.
    pub inputs: Vec<InputFile>,
    /// Scheduler application.
    pub appname: String,
    /// Let the grid client decompress image archives.
    pub native_unzip: bool,
    /// Memory bound override in bytes.
    pub memory_bound: Option<u64>,
    /// Disk bound override in bytes.
    pub disk_bound: Option<u64>,
    /// Rebuild cached artifacts from a fresh export.
    pub force_reimport: bool,
    /// Disable the VM wrapper's automatic checkpoints.
    pub disable_automatic_checkpoints: bool,
    /// Progress file reported through `vbox_job.xml`.
    pub progress_file: Option<String>,
    /// Extra `vbox_job.xml` options.
    pub vbox_options: Vec<JobOption>,
    /// Extra work creation options, passed through.
    pub scheduler_options: Vec<(String, String)>,
}

impl PackRequest {
    /// Creates a request with default settings.
    pub fn new(image: ImageRef, appname: impl Into<String>) -> Self {
        Self {
            image,
            command: CommandLine::default(),
            entrypoint: None,
            prerun: Vec::new(),
            postrun: Vec::new(),
            inputs: Vec::new(),
            appname: appname.into(),
            native_unzip: false,
            memory_bound: None,
            disk_bound: None,
            force_reimport: false,
            disable_automatic_checkpoints: true,
            progress_file: None,
            vbox_options: Vec::new(),
            scheduler_options: Vec::new(),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Name of the created work unit.
    pub wu_name: String,
    /// Resolved image.
    pub identity: ImageIdentity,
    /// Submitted resource bounds.
    pub bounds: ResourceBounds,
    /// Submitted input files in template order, with their open names.
    pub files: Vec<InputFile>,
    /// Rendered job input template.
    pub template: String,
    /// Whether the image was exported from the runtime.
    pub exported: bool,
}

/// Result of [`Packager::inspect`].
#[derive(Debug, Clone)]
pub struct InspectReport {
    /// Resolved image.
    pub identity: ImageIdentity,
    /// Exact size in bytes as stored by the runtime.
    pub exact_size: u64,
    /// Bounds a default run would submit.
    pub bounds: ResourceBounds,
}

/// Packages images into work units.
pub struct Packager {
    runtime: Arc<dyn ContainerRuntime>,
    submitter: Arc<dyn WorkSubmitter>,
    store: DownloadHierarchy,
    workdir_parent: Option<PathBuf>,
}

impl Packager {
    /// Creates a packager.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        submitter: Arc<dyn WorkSubmitter>,
        store: DownloadHierarchy,
    ) -> Self {
        Self {
            runtime,
            submitter,
            store,
            workdir_parent: None,
        }
    }

    /// Creates working directories under `parent` instead of the system
    /// temp directory.
    pub fn with_workdir_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.workdir_parent = Some(parent.into());
        self
    }

    /// Returns the download hierarchy.
    pub fn store(&self) -> &DownloadHierarchy {
        &self.store
    }

    fn workdir(&self) -> WorkDir {
        match &self.workdir_parent {
            Some(parent) => WorkDir::in_dir(parent),
            None => WorkDir::new(),
        }
    }

    /// Packages and submits one request.
    pub async fn run(&self, request: &PackRequest) -> Result<Submission> {
        let mut cache = ResolveCache::new();
        self.run_with_cache(&mut cache, request).await
    }

    /// Like [`Packager::run`], but fails with [`Error::Cancelled`] as soon as
    /// `shutdown` completes. The working directory is removed either way.
    pub async fn run_until<F>(&self, request: &PackRequest, shutdown: F) -> Result<Submission>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(request) => result,
            () = shutdown => {
                info!("Cleaning up temporary files...");
                Err(Error::Cancelled)
            }
        }
    }

    /// Packages and submits one request, reusing image resolutions from
    /// `cache`. Useful when submitting many jobs for the same image.
    pub async fn run_with_cache(
        &self,
        cache: &mut ResolveCache,
        request: &PackRequest,
    ) -> Result<Submission> {
        let mut workdir = self.workdir();
        let resolver = ImageResolver::new(Arc::clone(&self.runtime));

        let identity = resolver.resolve(cache, &request.image).await?;
        let bounds = ResourceBounds::estimate(
            identity.size_bytes,
            request.memory_bound,
            request.disk_bound,
        );

        let exporter = Exporter::new(
            Arc::clone(&self.runtime),
            ArtifactCache::new(self.store.clone(), request.native_unzip),
        );
        let prepared = exporter
            .prepare(&request.image, &identity, &mut workdir, request.force_reimport)
            .await?;

        let mut job = VboxJob::new(bounds.memory_mb());
        job.disable_automatic_checkpoints = request.disable_automatic_checkpoints;
        job.progress_file = request.progress_file.clone();
        job.extra = request.vbox_options.clone();

        let launcher = LauncherScript {
            image: request.image.clone(),
            command: request.command.clone(),
            entrypoint: request.entrypoint.clone(),
            prerun: request.prerun.clone(),
            postrun: request.postrun.clone(),
        };

        let files = inputs::assemble(
            request.inputs.clone(),
            &job.render(),
            &launcher.render(),
            &prepared.layers,
            &prepared.metadata,
            request.native_unzip,
        );
        let files = self.stage(files)?;

        info!("Creating input template for job...");
        let template = JobTemplate::from_inputs(&files).render();
        let template_path = workdir
            .path()?
            .join(format!("{}{}", TEMPLATE_FILE_PREFIX, uuid::Uuid::new_v4().simple()));
        write_atomic(&template_path, |f| f.write_all(template.as_bytes()))?;

        let unit = WorkUnitRequest {
            appname: request.appname.clone(),
            bounds,
            options: request.scheduler_options.clone(),
            template_path,
            files: files
                .iter()
                .filter_map(|f| f.file_name().map(str::to_string))
                .collect(),
        };
        if unit.files.len() != files.len() {
            return Err(Error::Internal("unstaged input file".to_string()));
        }

        let wu_name = self.submitter.submit(&unit).await?;
        info!("Created work unit {}", wu_name);

        Ok(Submission {
            wu_name,
            identity,
            bounds,
            files,
            template,
            exported: prepared.exported,
        })
    }

    /// Writes inline payloads into the download hierarchy.
    fn stage(&self, files: Vec<InputFile>) -> Result<Vec<InputFile>> {
        files
            .into_iter()
            .map(|file| match file.payload {
                Payload::Inline { ref name, ref bytes } => {
                    let file_name = self.store.stage(name, bytes)?;
                    debug!("{} -> {}", file.open_name, file_name);
                    Ok(InputFile {
                        payload: Payload::Staged { file_name },
                        ..file
                    })
                }
                Payload::Staged { ref file_name } => {
                    if !self.store.contains(file_name) {
                        return Err(Error::Internal(format!(
                            "input file {} missing from download hierarchy",
                            file_name
                        )));
                    }
                    Ok(file)
                }
            })
            .collect()
    }

    /// Resolves an image and reports its size and default bounds.
    pub async fn inspect(&self, image: &ImageRef) -> Result<InspectReport> {
        inspect_image(Arc::clone(&self.runtime), image).await
    }
}

/// Resolves an image and reports its size and default bounds.
///
/// Only the runtime is queried: neither the download hierarchy nor the
/// scheduler is touched.
pub async fn inspect_image(
    runtime: Arc<dyn ContainerRuntime>,
    image: &ImageRef,
) -> Result<InspectReport> {
    let resolver = ImageResolver::new(runtime);
    let mut cache = ResolveCache::new();
    let identity = resolver.resolve(&mut cache, image).await?;
    let exact_size = resolver.exact_size(image).await?;
    let bounds = ResourceBounds::estimate(identity.size_bytes, None, None);
    Ok(InspectReport {
        identity,
        exact_size,
        bounds,
    })
}
