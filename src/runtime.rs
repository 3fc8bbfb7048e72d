//! Container runtime trait - the narrow interface this crate needs from a
//! local image store.
//!
//! The runtime is an external collaborator: this crate never pulls,
//! inspects or serializes images itself. It only asks for:
//! - `inspect_id`: content ID of a local image
//! - `inspect_size`: exact byte size of a local image
//! - `list_sizes`: human-readable sizes of every local image matching a reference
//! - `pull`: fetch an image into the local store
//! - `save`: write the full image (all layers + metadata) as a tar file
//!
//! # Failure Reporting
//!
//! Implementations report command failures as
//! [`Error::ProcessFailure`](crate::Error::ProcessFailure) with the runtime's
//! own output. The resolver inspects that output to tell "image not found"
//! apart from every other failure, so implementations must not rewrite it.

use crate::error::Result;
use crate::image::ImageRef;
use async_trait::async_trait;
use std::path::Path;

/// Local container image store interface.
///
/// # Implementations
///
/// - `DockerCli`: the `docker` command line client
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the runtime name.
    fn name(&self) -> &str;

    /// Returns the content ID of a local image (e.g. `sha256:abcd...`).
    async fn inspect_id(&self, image: &ImageRef) -> Result<String>;

    /// Returns the exact size in bytes of a local image.
    async fn inspect_size(&self, image: &ImageRef) -> Result<u64>;

    /// Lists the human-readable sizes (`"1.5GB"`, `"500MB"`) of all local
    /// images matching the reference, one entry per match.
    async fn list_sizes(&self, image: &ImageRef) -> Result<Vec<String>>;

    /// Pulls the image into the local store.
    async fn pull(&self, image: &ImageRef) -> Result<()>;

    /// Saves the full image as a tar archive at `dest`.
    ///
    /// The archive uses the `docker save` layout: a `manifest.json` listing
    /// the config file and the layer paths, plus the files they name.
    async fn save(&self, image: &ImageRef, dest: &Path) -> Result<()>;
}
