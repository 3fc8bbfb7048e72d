//! # Layer Cache & Exporter
//!
//! Turns a local image into per-layer and image-metadata archives that the
//! grid client can download once and keep across jobs.
//!
//! ## Cache Protocol
//!
//! Artifacts live at canonical paths in the [`DownloadHierarchy`]; presence
//! of the file is the only cache signal. The protocol is check-then-read:
//!
//! ```text
//! image_<id> artifact present? ──yes──► read manifest.json from it (fast path)
//!        │ no (or forced)                     │ unreadable: CorruptCacheArtifact
//!        ▼                                    │ layer artifact missing: export
//! runtime.save ─► unpack into WorkDir ─► manifest.json (slow path)
//!        │
//!        ▼
//! materialize each layer + metadata (skip existing unless forced)
//! ```
//!
//! A corrupt artifact is never silently rebuilt: the caller is told to
//! force a reimport, so real disk corruption does not go unnoticed.
//!
//! ## Artifact Naming
//!
//! | `native_unzip` | Referenced file          | Also written            | Flag   |
//! |----------------|--------------------------|-------------------------|--------|
//! | false          | `<kind>_<id>.tar.manual.gz` | -                    | -      |
//! | true           | `<kind>_<id>.tar`        | `<kind>_<id>.tar.gz`    | `gzip` |
//!
//! With native unzip the scheduler serves the `.gz` sibling and the client
//! unzips it. Otherwise the launcher script gunzips the `.manual.gz`
//! archives inside the VM.
//!
//! ## Determinism
//!
//! Archives are built with sorted entries and normalized headers and gzip
//! streams carry no name or timestamp, so rebuilding an artifact from the
//! same export yields identical bytes.
//!
//! ## Security
//!
//! Paths from the saved image and its manifest are validated against `..`
//! components and absolute paths before anything is unpacked or archived.

use crate::constants::{
    EXPORT_DIR, IMAGE_ARTIFACT_PREFIX, LAYER_ARTIFACT_PREFIX, MANIFEST_FILE, MANUAL_GZ_SUFFIX,
    NATIVE_GZ_SUFFIX, OCI_INDEX_FILE, OCI_LAYOUT_FILES, REPOSITORIES_FILE, SAVED_IMAGE_FILE,
};
use crate::error::{Error, Result};
use crate::image::{ImageIdentity, ImageRef, abbreviate};
use crate::runtime::ContainerRuntime;
use crate::storage::{DownloadHierarchy, write_atomic};
use flate2::Compression;
use flate2::GzBuilder;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tar::{Archive, Builder, HeaderMode};
use tempfile::TempDir;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

// =============================================================================
// Manifest
// =============================================================================

/// One image entry of a `docker save` manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path of the image config JSON inside the export.
    #[serde(rename = "Config")]
    pub config: String,
    /// Repository tags of the image.
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    /// Layer archive paths inside the export, base layer first.
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

/// Parsed `manifest.json` of a `docker save` export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parses manifest JSON.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let entries: Vec<ManifestEntry> = serde_json::from_slice(data)
            .map_err(|e| Error::InvalidManifest(format!("{}: {}", MANIFEST_FILE, e)))?;
        if entries.is_empty() {
            return Err(Error::InvalidManifest(format!(
                "{} lists no images",
                MANIFEST_FILE
            )));
        }
        Ok(Self { entries })
    }

    /// Returns the image entry used for packaging (the first one).
    pub fn image(&self) -> &ManifestEntry {
        &self.entries[0]
    }

    /// Returns the layers of the image in manifest order, deduplicated.
    pub fn layers(&self) -> Result<Vec<LayerRef>> {
        let mut seen = HashSet::new();
        let mut layers = Vec::new();
        for path in &self.image().layers {
            let layer = LayerRef::from_manifest_path(path)?;
            if seen.insert(layer.layer_id.clone()) {
                layers.push(layer);
            } else {
                debug!("Layer {} listed twice, shipping it once", layer.layer_id);
            }
        }
        Ok(layers)
    }
}

/// Index document of an OCI-layout export (`index.json` or an index blob).
///
/// Image manifests parse as an index with no entries.
#[derive(Debug, Deserialize)]
struct OciIndex {
    #[serde(default)]
    manifests: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
struct OciDescriptor {
    digest: String,
}

impl OciDescriptor {
    /// Path of the referenced blob inside the layout.
    fn blob_path(&self) -> Result<String> {
        let (algorithm, hash) = self.digest.split_once(':').ok_or_else(|| {
            Error::InvalidManifest(format!("malformed digest '{}'", self.digest))
        })?;
        let path = format!("blobs/{}/{}", algorithm, hash);
        validate_member(&path)?;
        Ok(path)
    }
}

/// A filesystem layer of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRef {
    /// Layer identifier used in artifact names.
    pub layer_id: String,
    /// Path inside the export that is archived for this layer.
    pub member: String,
}

impl LayerRef {
    /// Derives the layer unit from a manifest layer path.
    ///
    /// - classic layout `"<id>/layer.tar"`: the `<id>` directory is the unit
    /// - OCI layout `"blobs/sha256/<hex>"`: the blob file is the unit
    pub fn from_manifest_path(path: &str) -> Result<Self> {
        validate_member(path)?;
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            ["blobs", _algo, hash] => Ok(Self {
                layer_id: (*hash).to_string(),
                member: path.to_string(),
            }),
            [dir, ..] if parts.len() > 1 => Ok(Self {
                layer_id: (*dir).to_string(),
                member: (*dir).to_string(),
            }),
            [file] => Ok(Self {
                layer_id: file.trim_end_matches(".tar").to_string(),
                member: (*file).to_string(),
            }),
            _ => Err(Error::InvalidManifest(format!(
                "unusable layer path '{}'",
                path
            ))),
        }
    }

    /// Returns the abbreviated ID used in log messages.
    pub fn short_id(&self) -> &str {
        abbreviate(&self.layer_id)
    }
}

// =============================================================================
// Working Directory
// =============================================================================

/// Lazily created temporary working directory.
///
/// Nothing touches the disk until [`WorkDir::path`] is first called, so a
/// fully cached run never creates it. Dropping the `WorkDir` releases it:
/// blocking tasks holding a [`WorkLease`] stop at their next entry, and the
/// directory is removed once the last lease is gone. This holds on success,
/// on error, and when the owning future is cancelled.
#[derive(Debug, Default)]
pub struct WorkDir {
    parent: Option<PathBuf>,
    dir: Option<Arc<TempDir>>,
    released: Arc<AtomicBool>,
}

impl WorkDir {
    /// Creates a handle that will use the system temp directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle that will create its directory under `parent`.
    pub fn in_dir(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
            dir: None,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the directory, creating it on first use.
    pub fn path(&mut self) -> Result<&Path> {
        if self.dir.is_none() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("wupack-");
            let dir = match &self.parent {
                Some(parent) => builder.tempdir_in(parent)?,
                None => builder.tempdir()?,
            };
            debug!("Created working directory {}", dir.path().display());
            self.dir = Some(Arc::new(dir));
        }
        match &self.dir {
            Some(dir) => Ok(dir.path()),
            None => Err(Error::Internal("working directory not created".to_string())),
        }
    }

    /// Returns a handle that keeps the directory alive for blocking work.
    pub fn lease(&mut self) -> Result<WorkLease> {
        self.path()?;
        match &self.dir {
            Some(dir) => Ok(WorkLease {
                dir: Arc::clone(dir),
                released: Arc::clone(&self.released),
            }),
            None => Err(Error::Internal("working directory not created".to_string())),
        }
    }

    /// Returns the directory if it has been created.
    pub fn created(&self) -> Option<&Path> {
        self.dir.as_deref().map(TempDir::path)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Shared handle on a created [`WorkDir`].
///
/// The directory outlives the `WorkDir` until every lease is dropped, so a
/// blocking task never sees its tree removed underneath it.
#[derive(Debug, Clone)]
pub struct WorkLease {
    dir: Arc<TempDir>,
    released: Arc<AtomicBool>,
}

impl WorkLease {
    /// Returns the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns true once the owning [`WorkDir`] has been dropped.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn check(&self) -> io::Result<()> {
        if self.is_released() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "working directory released",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Cached Artifacts
// =============================================================================

/// Kind of cached artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// One filesystem layer.
    Layer,
    /// Image config, manifest and repository mapping.
    Image,
}

impl ArtifactKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Layer => LAYER_ARTIFACT_PREFIX,
            Self::Image => IMAGE_ARTIFACT_PREFIX,
        }
    }
}

/// A compressed archive at its canonical download path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Layer or image ID.
    pub id: String,
    /// File name referenced by the work unit.
    pub file_name: String,
    /// Canonical path of the referenced file.
    pub path: PathBuf,
}

impl CachedArtifact {
    /// Returns true if the artifact is present at its canonical path.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Path of the compressed sibling served under native unzip.
    fn native_gz_path(&self) -> PathBuf {
        let mut name = self.file_name.clone();
        name.push_str(NATIVE_GZ_SUFFIX);
        self.path.with_file_name(name)
    }
}

/// Canonical artifact naming and materialization.
///
/// Cheap to clone; materialization runs on blocking worker threads.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    store: DownloadHierarchy,
    native_unzip: bool,
}

impl ArtifactCache {
    /// Creates a cache over a download hierarchy.
    pub fn new(store: DownloadHierarchy, native_unzip: bool) -> Self {
        Self {
            store,
            native_unzip,
        }
    }

    /// Returns true if the grid client unzips archives itself.
    pub fn native_unzip(&self) -> bool {
        self.native_unzip
    }

    /// Returns the underlying download hierarchy.
    pub fn store(&self) -> &DownloadHierarchy {
        &self.store
    }

    /// Describes the artifact of a given kind and ID.
    pub fn artifact(&self, kind: ArtifactKind, id: &str) -> Result<CachedArtifact> {
        let mut file_name = format!("{}{}.tar", kind.prefix(), id);
        if !self.native_unzip {
            file_name.push_str(MANUAL_GZ_SUFFIX);
        }
        let path = self.store.path_for(&file_name)?;
        Ok(CachedArtifact {
            kind,
            id: id.to_string(),
            file_name,
            path,
        })
    }

    /// Reads `manifest.json` back out of a cached image artifact.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptCacheArtifact`] if the archive cannot be read or holds
    /// no valid manifest.
    pub fn read_manifest(&self, artifact: &CachedArtifact) -> Result<Manifest> {
        let corrupt = |reason: String| Error::CorruptCacheArtifact {
            path: artifact.path.clone(),
            reason,
        };

        let data = read_archive_member(&artifact.path, MANIFEST_FILE)
            .map_err(|e| corrupt(e.to_string()))?
            .ok_or_else(|| corrupt(format!("{} not found in archive", MANIFEST_FILE)))?;
        Manifest::from_slice(&data).map_err(|e| corrupt(e.to_string()))
    }

    /// Archives one layer from the export into its canonical artifact.
    ///
    /// A no-op when the artifact already exists and `force` is false.
    pub fn materialize_layer(
        &self,
        layer: &LayerRef,
        export_dir: &Path,
        force: bool,
    ) -> Result<CachedArtifact> {
        self.materialize_layer_checked(layer, export_dir, force, &uninterrupted)
    }

    fn materialize_layer_checked(
        &self,
        layer: &LayerRef,
        export_dir: &Path,
        force: bool,
        check: &dyn Fn() -> io::Result<()>,
    ) -> Result<CachedArtifact> {
        let artifact = self.artifact(ArtifactKind::Layer, &layer.layer_id)?;
        if artifact.exists() && !force {
            debug!("Layer {} already cached", layer.short_id());
            return Ok(artifact);
        }

        info!("Creating input file for layer {}...", layer.short_id());
        self.write_artifact(
            &artifact,
            export_dir,
            std::slice::from_ref(&layer.member),
            check,
        )?;
        Ok(artifact)
    }

    /// Archives the image config, manifest and repository mapping into the
    /// canonical image artifact.
    ///
    /// OCI-layout exports also ship `index.json`, `oci-layout` and every
    /// manifest or index blob reachable from the index.
    ///
    /// A no-op when the artifact already exists and `force` is false.
    pub fn materialize_image_metadata(
        &self,
        manifest: &Manifest,
        identity: &ImageIdentity,
        export_dir: &Path,
        force: bool,
    ) -> Result<CachedArtifact> {
        self.materialize_image_metadata_checked(
            manifest,
            identity,
            export_dir,
            force,
            &uninterrupted,
        )
    }

    fn materialize_image_metadata_checked(
        &self,
        manifest: &Manifest,
        identity: &ImageIdentity,
        export_dir: &Path,
        force: bool,
        check: &dyn Fn() -> io::Result<()>,
    ) -> Result<CachedArtifact> {
        let artifact = self.artifact(ArtifactKind::Image, &identity.content_id)?;
        if artifact.exists() && !force {
            debug!("Image metadata {} already cached", identity.short_id());
            return Ok(artifact);
        }

        let config = &manifest.image().config;
        validate_member(config)?;
        if !export_dir.join(config).exists() {
            return Err(Error::InvalidManifest(format!(
                "config '{}' missing from export",
                config
            )));
        }

        let mut members = vec![config.clone(), MANIFEST_FILE.to_string()];
        let optional = std::iter::once(REPOSITORIES_FILE).chain(OCI_LAYOUT_FILES.iter().copied());
        for name in optional {
            if export_dir.join(name).exists() {
                members.push(name.to_string());
            }
        }
        for blob in index_blobs(export_dir)? {
            if !members.contains(&blob) {
                members.push(blob);
            }
        }

        info!("Creating input file for image {}...", identity.short_id());
        self.write_artifact(&artifact, export_dir, &members, check)?;
        Ok(artifact)
    }

    fn write_artifact(
        &self,
        artifact: &CachedArtifact,
        export_dir: &Path,
        members: &[String],
        check: &dyn Fn() -> io::Result<()>,
    ) -> Result<()> {
        let archive_err = |e: io::Error| Error::ArchiveFailed {
            name: artifact.file_name.clone(),
            reason: e.to_string(),
        };

        let compressed = if self.native_unzip {
            artifact.native_gz_path()
        } else {
            artifact.path.clone()
        };

        write_atomic(&compressed, |file| {
            let mut encoder = GzBuilder::new().write(file, Compression::default());
            build_tar(&mut encoder, export_dir, members, check)?;
            encoder.finish()?.flush()
        })
        .map_err(|e| match e {
            Error::StorageWriteFailed(reason) => Error::ArchiveFailed {
                name: artifact.file_name.clone(),
                reason,
            },
            other => other,
        })?;

        if self.native_unzip {
            // The referenced .tar is written last: its presence marks the
            // pair as complete.
            check().map_err(archive_err)?;
            let source = File::open(&compressed).map_err(archive_err)?;
            write_atomic(&artifact.path, |file| {
                io::copy(&mut GzDecoder::new(BufReader::new(source)), file).map(|_| ())
            })?;
        }

        debug!("Wrote {}", artifact.path.display());
        Ok(())
    }
}

fn uninterrupted() -> io::Result<()> {
    Ok(())
}

// =============================================================================
// Exporter
// =============================================================================

/// Everything the work unit needs from the image, with artifacts in place.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Image manifest.
    pub manifest: Manifest,
    /// Layer artifacts in manifest order.
    pub layers: Vec<CachedArtifact>,
    /// Image metadata artifact.
    pub metadata: CachedArtifact,
    /// Whether the image had to be exported from the runtime.
    pub exported: bool,
}

/// Exports images from the runtime and keeps the artifact cache filled.
pub struct Exporter {
    runtime: Arc<dyn ContainerRuntime>,
    cache: ArtifactCache,
}

impl Exporter {
    /// Creates an exporter.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, cache: ArtifactCache) -> Self {
        Self { runtime, cache }
    }

    /// Returns the artifact cache.
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Returns the image manifest, exporting the image only when needed.
    ///
    /// On the fast path the manifest is read from the cached image artifact
    /// and the runtime is not touched. Otherwise the image is saved and
    /// unpacked into `workdir`; the returned path is the unpacked export.
    pub async fn ensure_exported(
        &self,
        image: &ImageRef,
        identity: &ImageIdentity,
        workdir: &mut WorkDir,
        force: bool,
    ) -> Result<(Manifest, Option<PathBuf>)> {
        let metadata = self.cache.artifact(ArtifactKind::Image, &identity.content_id)?;

        if !force && metadata.exists() {
            info!("Image already imported. Reading existing info...");
            let manifest = self.cache.read_manifest(&metadata)?;
            return Ok((manifest, None));
        }

        let (manifest, export_dir) = self.export(image, workdir).await?;
        Ok((manifest, Some(export_dir)))
    }

    /// Ensures every artifact of the image exists, building missing ones.
    pub async fn prepare(
        &self,
        image: &ImageRef,
        identity: &ImageIdentity,
        workdir: &mut WorkDir,
        force: bool,
    ) -> Result<PreparedImage> {
        let (mut manifest, mut export_dir) =
            self.ensure_exported(image, identity, workdir, force).await?;

        if export_dir.is_none() {
            let missing = manifest
                .layers()?
                .iter()
                .map(|layer| self.cache.artifact(ArtifactKind::Layer, &layer.layer_id))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .filter(|artifact| !artifact.exists())
                .count();
            if missing > 0 {
                warn!(
                    "{} layer artifact(s) of {} missing from cache, exporting again",
                    missing,
                    identity.short_id()
                );
                let (fresh, dir) = self.export(image, workdir).await?;
                manifest = fresh;
                export_dir = Some(dir);
            }
        }

        let layers = manifest.layers()?;
        let (layer_artifacts, metadata) = match &export_dir {
            Some(dir) => {
                let lease = workdir.lease()?;
                let artifacts = self.materialize_layers(&layers, dir, force, &lease).await?;
                let cache = self.cache.clone();
                let (m, id, d) = (manifest.clone(), identity.clone(), dir.clone());
                let metadata = tokio::task::spawn_blocking(move || {
                    let result = cache.materialize_image_metadata_checked(
                        &m,
                        &id,
                        &d,
                        force,
                        &|| lease.check(),
                    );
                    unless_released(&lease, result)
                })
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;
                (artifacts, metadata)
            }
            None => {
                let artifacts = layers
                    .iter()
                    .map(|layer| self.cache.artifact(ArtifactKind::Layer, &layer.layer_id))
                    .collect::<Result<Vec<_>>>()?;
                let metadata = self.cache.artifact(ArtifactKind::Image, &identity.content_id)?;
                (artifacts, metadata)
            }
        };

        Ok(PreparedImage {
            manifest,
            layers: layer_artifacts,
            metadata,
            exported: export_dir.is_some(),
        })
    }

    /// Saves and unpacks the image into the working directory.
    async fn export(&self, image: &ImageRef, workdir: &mut WorkDir) -> Result<(Manifest, PathBuf)> {
        info!("Exporting '{}' to tar file...", image);
        let lease = workdir.lease()?;
        let saved = lease.path().join(SAVED_IMAGE_FILE);
        let export_dir = lease.path().join(EXPORT_DIR);

        self.runtime.save(image, &saved).await?;

        // The task owns a lease: if this future is dropped mid-unpack, the
        // directory is removed only after the task stops.
        let (s, d) = (saved.clone(), export_dir.clone());
        tokio::task::spawn_blocking(move || {
            let result = unpack_checked(&s, &d, &|| lease.check());
            unless_released(&lease, result)
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
        // The unpacked tree is all that is needed from here on.
        let _ = tokio::fs::remove_file(&saved).await;

        let data = tokio::fs::read(export_dir.join(MANIFEST_FILE))
            .await
            .map_err(|e| Error::InvalidManifest(format!("{}: {}", MANIFEST_FILE, e)))?;
        let manifest = Manifest::from_slice(&data)?;
        Ok((manifest, export_dir))
    }

    /// Materializes layers concurrently; each writes its own canonical path.
    async fn materialize_layers(
        &self,
        layers: &[LayerRef],
        export_dir: &Path,
        force: bool,
        lease: &WorkLease,
    ) -> Result<Vec<CachedArtifact>> {
        let mut tasks = JoinSet::new();
        for (index, layer) in layers.iter().enumerate() {
            let cache = self.cache.clone();
            let layer = layer.clone();
            let dir = export_dir.to_path_buf();
            let lease = lease.clone();
            tasks.spawn_blocking(move || {
                let result =
                    cache.materialize_layer_checked(&layer, &dir, force, &|| lease.check());
                unless_released(&lease, result).map(|artifact| (index, artifact))
            });
        }

        let mut done = Vec::with_capacity(layers.len());
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| Error::Internal(e.to_string()))?;
            done.push(result?);
        }
        done.sort_by_key(|(index, _)| *index);
        Ok(done.into_iter().map(|(_, artifact)| artifact).collect())
    }
}

// =============================================================================
// Archive Helpers
// =============================================================================

/// Rejects archive member paths that could escape their root.
fn validate_member(path: &str) -> Result<()> {
    let p = Path::new(path);
    let escapes = path.is_empty()
        || p.is_absolute()
        || p.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(Error::PathTraversal {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Returns every manifest and index blob reachable from `index.json`.
///
/// Config and layer blobs are referenced from image manifests, never from
/// an index, so they are not returned. Empty when the export has no index.
fn index_blobs(export_dir: &Path) -> Result<Vec<String>> {
    if !export_dir.join(OCI_INDEX_FILE).is_file() {
        return Ok(Vec::new());
    }

    let mut blobs: Vec<String> = Vec::new();
    let mut pending = vec![OCI_INDEX_FILE.to_string()];
    while let Some(member) = pending.pop() {
        let data = fs::read(export_dir.join(&member))?;
        let index: OciIndex = serde_json::from_slice(&data)
            .map_err(|e| Error::InvalidManifest(format!("{}: {}", member, e)))?;
        for descriptor in &index.manifests {
            let blob = descriptor.blob_path()?;
            if blobs.contains(&blob) {
                continue;
            }
            if !export_dir.join(&blob).is_file() {
                return Err(Error::InvalidManifest(format!(
                    "{} references missing blob '{}'",
                    member, blob
                )));
            }
            pending.push(blob.clone());
            blobs.push(blob);
        }
    }
    Ok(blobs)
}

/// Maps any failure of a task whose working directory was released to
/// [`Error::Cancelled`].
fn unless_released<T>(lease: &WorkLease, result: Result<T>) -> Result<T> {
    match result {
        Err(_) if lease.is_released() => Err(Error::Cancelled),
        other => other,
    }
}

/// Unpacks a saved image archive, refusing entries that escape `dest`.
pub fn unpack_export(archive_path: &Path, dest: &Path) -> Result<()> {
    unpack_checked(archive_path, dest, &uninterrupted)
}

/// Like [`unpack_export`], calling `check` before every entry.
fn unpack_checked(
    archive_path: &Path,
    dest: &Path,
    check: &dyn Fn() -> io::Result<()>,
) -> Result<()> {
    check().map_err(|_| Error::Cancelled)?;
    fs::create_dir_all(dest)?;
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(BufReader::new(file));

    let export_err = |e: io::Error| Error::InvalidManifest(format!("bad image archive: {}", e));

    for entry in archive.entries().map_err(export_err)? {
        check().map_err(|_| Error::Cancelled)?;
        let mut entry = entry.map_err(export_err)?;
        let path = entry.path().map_err(export_err)?.into_owned();

        // SECURITY: Check for path traversal
        validate_member(&path.to_string_lossy())?;

        entry.unpack_in(dest).map_err(export_err)?;
    }
    Ok(())
}

/// Writes a deterministic tar of `members` (relative to `root`).
///
/// Directories are walked in sorted order, headers are normalized and
/// symlinks are stored as links.
fn build_tar<W: Write>(
    writer: W,
    root: &Path,
    members: &[String],
    check: &dyn Fn() -> io::Result<()>,
) -> io::Result<()> {
    let mut builder = Builder::new(writer);
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    for member in members {
        append_sorted(&mut builder, root, Path::new(member), check)?;
    }
    builder.into_inner()?;
    Ok(())
}

fn append_sorted<W: Write>(
    builder: &mut Builder<W>,
    root: &Path,
    rel: &Path,
    check: &dyn Fn() -> io::Result<()>,
) -> io::Result<()> {
    check()?;
    let full = root.join(rel);
    let meta = fs::symlink_metadata(&full)?;

    if meta.is_dir() {
        builder.append_dir(rel, &full)?;
        let mut children: Vec<_> = fs::read_dir(&full)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<_>>()?;
        children.sort();
        for child in children {
            append_sorted(builder, root, &rel.join(child), check)?;
        }
    } else {
        builder.append_path_with_name(&full, rel)?;
    }
    Ok(())
}

/// Reads one member of a (possibly gzipped) tar archive.
///
/// Returns `Ok(None)` if the archive is readable but has no such member.
pub fn read_archive_member(archive_path: &Path, member: &str) -> io::Result<Option<Vec<u8>>> {
    let mut file = BufReader::new(File::open(archive_path)?);
    let mut magic = [0u8; 2];
    let gzipped = file.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b];
    drop(file);

    let file = BufReader::new(File::open(archive_path)?);
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut archive = Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let normalized = path.strip_prefix(".").unwrap_or(path.as_path());
        if normalized == Path::new(member) {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}
