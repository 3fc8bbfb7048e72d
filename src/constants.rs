//! # Packaging Constants
//!
//! Resource formulas, timeouts, file names and layout defaults for the
//! image-to-work-unit pipeline. These constants are the **single source of
//! truth** for values that must agree between the files shipped to the
//! grid client and the launcher script that consumes them inside the VM.
//!
//! ## Modification Guidelines
//!
//! Before modifying any constant:
//! 1. Check whether the in-VM launcher script depends on it (paths, suffixes)
//! 2. Remember that cached artifacts on disk are keyed by these names
//! 3. Update dependent tests
//!
//! ## Cross-References
//!
//! - [`crate::resources`]: Uses the memory/disk formulas
//! - [`crate::export`]: Uses artifact names and suffixes
//! - [`crate::launcher`]: Uses in-VM paths
//! - [`crate::storage`]: Uses the download hierarchy fanout

use std::time::Duration;

// =============================================================================
// Resource Formulas
// =============================================================================
//
// The grid client must be able to `docker load` the image (and possibly
// gunzip it) inside the VM. Sizes are in bytes, base-1000.
// =============================================================================

/// Fixed memory overhead added on top of the image-size term (500 MB).
///
/// **Rationale**: covers the guest kernel, the docker daemon and the
/// diagnostics run before the job.
pub const MEMORY_BASE_BYTES: u64 = 500_000_000;

/// Multiplier applied to the image size for the memory estimate.
///
/// **Note**: this should shrink to 1 (maybe 2) once a VM-side image cache
/// disk is available; until then the image is held several times over
/// while it is reassembled and loaded.
pub const MEMORY_IMAGE_FACTOR: u64 = 4;

/// Fixed disk overhead added on top of the image size (100 MB).
pub const DISK_BASE_BYTES: u64 = 100_000_000;

/// Bytes per megabyte for the deprecated `--memory` option and for
/// `memory_size_mb` in the VM job description.
pub const BYTES_PER_MB: u64 = 1_000_000;

// =============================================================================
// Image Resolution
// =============================================================================

/// Tag appended to image references that carry none.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Maximum image reference length in bytes.
///
/// **Security**: image references end up in shell commands and file names.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Valid characters for image references.
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`, `/`, `:`, `@`
pub const IMAGE_REF_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_./:@";

/// Substrings in runtime failure output that mean "image not present locally".
pub const IMAGE_NOT_FOUND_MARKERS: &[&str] = &["No such image", "No such object"];

/// Unit multipliers for runtime-reported sizes.
///
/// **Compatibility**: base-1000, exactly as the runtime prints them. Work
/// unit sizing depends on these staying decimal.
pub const SIZE_UNITS: &[(&str, f64)] = &[
    ("B", 1.0),
    ("KB", 1e3),
    ("MB", 1e6),
    ("GB", 1e9),
    ("TB", 1e12),
];

// =============================================================================
// Timeouts
// =============================================================================

/// Timeout for quick runtime queries (inspect, images).
pub const RUNTIME_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for pulling an image (30 minutes).
///
/// **Rationale**: science images are frequently several GB.
pub const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Timeout for saving an image to a tar file (1 hour).
pub const IMAGE_SAVE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Timeout for the scheduler's work creation command.
pub const CREATE_WORK_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum captured command output (1 MiB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

// =============================================================================
// Artifact Naming
// =============================================================================
//
// Cached artifacts are named `layer_<id>.tar` / `image_<id>.tar` with a
// suffix that tells whether the grid client unzips them natively.
// =============================================================================

/// Prefix for per-layer artifacts.
pub const LAYER_ARTIFACT_PREFIX: &str = "layer_";

/// Prefix for image-metadata artifacts.
pub const IMAGE_ARTIFACT_PREFIX: &str = "image_";

/// Suffix for archives gunzipped by the launcher script inside the VM.
pub const MANUAL_GZ_SUFFIX: &str = ".manual.gz";

/// Suffix of the compressed sibling served when the client unzips natively.
pub const NATIVE_GZ_SUFFIX: &str = ".gz";

/// Manifest file name inside a `docker save` export.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Repository mapping file inside a `docker save` export.
pub const REPOSITORIES_FILE: &str = "repositories";

/// Top-level index of an OCI-layout export.
pub const OCI_INDEX_FILE: &str = "index.json";

/// Extra metadata files written by OCI-layout exports.
///
/// Shipped together with every manifest and index blob reachable from
/// [`OCI_INDEX_FILE`], so the rebuilt layout never references a missing blob.
pub const OCI_LAYOUT_FILES: &[&str] = &[OCI_INDEX_FILE, "oci-layout"];

/// File name of the saved image inside the working directory.
pub const SAVED_IMAGE_FILE: &str = "image.tar";

/// Directory the saved image is unpacked into inside the working directory.
pub const EXPORT_DIR: &str = "export";

// =============================================================================
// Input File Names
// =============================================================================

/// Open name of the VM job description.
pub const VBOX_JOB_OPEN_NAME: &str = "vbox_job.xml";

/// Open name of the launcher script.
pub const LAUNCHER_OPEN_NAME: &str = "shared/boinc_app";

/// Directory (open-name prefix) the image archives are shipped into.
pub const IMAGE_OPEN_DIR: &str = "shared/image";

/// Prefix of generated template file names.
pub const TEMPLATE_FILE_PREFIX: &str = "wupack_in_";

// =============================================================================
// In-VM Paths
// =============================================================================

/// Shared directory mounted into the VM and the container.
pub const VM_SHARED_DIR: &str = "/root/shared";

/// Where the image archives arrive inside the VM.
pub const VM_IMAGE_DIR: &str = "/root/shared/image";

/// Scratch directory for reassembling the image inside the VM.
pub const VM_SCRATCH_DIR: &str = "/tmp/image";

// =============================================================================
// Scheduler Defaults
// =============================================================================

/// Default application name for submitted work.
pub const DEFAULT_APPNAME: &str = "boinc2docker";

/// Default download hierarchy fanout.
pub const DEFAULT_FANOUT: u32 = 1024;

/// Subdirectory of the project holding the download hierarchy.
pub const DOWNLOAD_DIR: &str = "download";

/// Work creation binary, relative to the project directory.
pub const CREATE_WORK_BIN: &str = "bin/create_work";

/// Scheduler option key for the memory bound.
pub const RSC_MEMORY_BOUND_KEY: &str = "rsc_memory_bound";

/// Scheduler option key for the disk bound.
pub const RSC_DISK_BOUND_KEY: &str = "rsc_disk_bound";

/// Scheduler option key for the work unit name.
pub const WU_NAME_KEY: &str = "wu_name";

/// Scheduler option key for the input template path.
pub const WU_TEMPLATE_KEY: &str = "wu_template";

/// Number of hex characters of the content hash kept in staged file names.
pub const STAGED_HASH_LEN: usize = 16;
