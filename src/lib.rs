//! # wupack
//!
//! **Container image to grid work-unit packager**
//!
//! Converts a local container image into the input files and job template
//! of a volunteer-computing work unit. The grid client boots a VM, downloads
//! the image as per-layer archives, reassembles and loads it, then runs the
//! requested command.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Packager                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ImageResolver ─► ResourceBounds ─► Exporter ─► inputs::assemble    │
//! │   (inspect,        (4×size+500MB,    (layer +     (user files,      │
//! │    pull+retry,      size+100MB)       image        vbox_job.xml,    │
//! │    size query)                        archives)    boinc_app,       │
//! │                                                    layers, image)   │
//! │                                          │              │           │
//! │                                          ▼              ▼           │
//! │                               DownloadHierarchy     JobTemplate     │
//! │                               (md5 fan-out tree,        │           │
//! │                                atomic writes)           ▼           │
//! │                                                   WorkSubmitter     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │             ContainerRuntime (DockerCli)   WorkSubmitter (create_work)│
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Layer Reuse
//!
//! Layer archives are named by layer ID and flagged `sticky`, so two images
//! sharing a base layer share its download on both the server and every
//! client. An image whose metadata archive is already present is not
//! exported again; `force_reimport` rebuilds everything.
//!
//! # Security
//!
//! - Saved images are unpacked with path-traversal checks
//! - File names in the download hierarchy must be plain path components
//! - Every value placed on the in-VM `docker run` line is shell-escaped
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wupack::{CreateWorkCli, DockerCli, DownloadHierarchy, ImageRef, PackRequest, Packager};
//!
//! #[tokio::main]
//! async fn main() -> wupack::Result<()> {
//!     let store = DownloadHierarchy::with_path("/home/boincadm/project/download".into())?;
//!     let packager = Packager::new(
//!         Arc::new(DockerCli::new()),
//!         Arc::new(CreateWorkCli::new("/home/boincadm/project")),
//!         store,
//!     );
//!
//!     let mut request = PackRequest::new(ImageRef::parse("python:3.12")?, "boinc2docker");
//!     request.command = "python -c print(42)".into();
//!     let submission = packager.run(&request).await?;
//!     println!("{}", submission.wu_name);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod export;
pub mod image;
pub mod inputs;
pub mod jobconfig;
pub mod launcher;
pub mod pipeline;
pub mod process;
pub mod resources;
pub mod runtime;
pub mod storage;
pub mod submit;
pub mod template;

pub mod runtimes;

// Re-exports
pub use config::PackConfig;
pub use error::{Error, Result};
pub use export::{ArtifactCache, ArtifactKind, CachedArtifact, Exporter, Manifest, WorkDir};
pub use image::{ImageIdentity, ImageRef, ImageResolver, ResolveCache, parse_reported_size};
pub use inputs::{FileFlag, InputFile, Payload};
pub use jobconfig::{JobOption, VboxJob};
pub use launcher::{CommandLine, LauncherScript, shell_escape};
pub use pipeline::{InspectReport, PackRequest, Packager, Submission, inspect_image};
pub use resources::{ResourceBounds, estimate_disk, estimate_memory};
pub use runtime::ContainerRuntime;
pub use runtimes::DockerCli;
pub use storage::DownloadHierarchy;
pub use submit::{CreateWorkCli, WorkSubmitter, WorkUnitRequest};
pub use template::JobTemplate;
