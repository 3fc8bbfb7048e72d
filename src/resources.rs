//! Memory and disk bounds for a work unit.
//!
//! The grid client has to reassemble the image from its layer archives,
//! `docker load` it and run it, all inside a VM whose memory and disk are
//! fixed by the bounds in the work unit. The estimates below are the
//! smallest values known to be safe for that:
//!
//! | Bound  | Formula                        |
//! |--------|--------------------------------|
//! | memory | `4 × image size + 500 MB`      |
//! | disk   | `image size + 100 MB`          |
//!
//! Caller overrides always win, even when they are below the estimate;
//! in that case a warning is logged because the job may fail.

use crate::constants::{BYTES_PER_MB, DISK_BASE_BYTES, MEMORY_BASE_BYTES, MEMORY_IMAGE_FACTOR};
use tracing::{info, warn};

/// Resource bounds submitted with the work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBounds {
    /// Memory bound in bytes.
    pub memory_bytes: u64,
    /// Disk bound in bytes.
    pub disk_bytes: u64,
}

impl ResourceBounds {
    /// Computes both bounds for an image, honoring overrides.
    pub fn estimate(
        image_size: u64,
        memory_override: Option<u64>,
        disk_override: Option<u64>,
    ) -> Self {
        Self {
            memory_bytes: estimate_memory(image_size, memory_override),
            disk_bytes: estimate_disk(image_size, disk_override),
        }
    }

    /// Memory bound in whole megabytes (for the VM job description).
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / BYTES_PER_MB
    }
}

/// Minimum memory needed to load an image of the given size.
pub fn memory_needed(image_size: u64) -> u64 {
    image_size
        .saturating_mul(MEMORY_IMAGE_FACTOR)
        .saturating_add(MEMORY_BASE_BYTES)
}

/// Minimum disk needed to house the image input files.
pub fn disk_needed(image_size: u64) -> u64 {
    image_size.saturating_add(DISK_BASE_BYTES)
}

/// Returns the memory bound: the override if given, else the estimate.
pub fn estimate_memory(image_size: u64, memory: Option<u64>) -> u64 {
    check_bound("memory", memory_needed(image_size), memory)
}

/// Returns the disk bound: the override if given, else the estimate.
pub fn estimate_disk(image_size: u64, disk: Option<u64>) -> u64 {
    check_bound("disk space", disk_needed(image_size), disk)
}

/// Converts the deprecated megabyte memory option to a byte override.
pub fn memory_from_deprecated_mb(megabytes: u64) -> u64 {
    warn!("--memory is deprecated and will be removed in a future version. Use --rsc-memory-bound instead.");
    megabytes.saturating_mul(BYTES_PER_MB)
}

fn check_bound(what: &str, need: u64, requested: Option<u64>) -> u64 {
    match requested {
        None => {
            info!(
                "Automatically setting {} allocation for job to {}MB.",
                what,
                need / BYTES_PER_MB
            );
            need
        }
        Some(requested) if requested < need => {
            warn!(
                "You allocated {}MB of {} for this job which is less than the predicted minimum needed of {}MB; job may fail.",
                requested / BYTES_PER_MB,
                what,
                need / BYTES_PER_MB
            );
            requested
        }
        Some(requested) => requested,
    }
}
