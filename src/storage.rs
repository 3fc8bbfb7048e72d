//! # Download Hierarchy
//!
//! Durable storage for every file a work unit references. The scheduler
//! serves input files out of a fan-out directory tree ("download
//! hierarchy") where each file's directory is derived from its name alone:
//!
//! ```text
//! <project>/download/
//! ├── 1a3/
//! │   ├── layer_5f70bf18a086....tar.manual.gz
//! │   └── vbox_job_0c4b7d1e2f3a4b5c.xml
//! └── 2ff/
//!     └── image_9c7a54a9a43c....tar.manual.gz
//! ```
//!
//! The bucket is `md5(name)` hex digits 1..8 read as a number, modulo the
//! fanout, printed in lowercase hex. The same name therefore always lands
//! at the same canonical path, which is what makes file presence usable as
//! the cache signal for image artifacts.
//!
//! ## Atomic Writes
//!
//! Files are written to a unique temp name next to the destination and
//! renamed into place, so a concurrent reader never observes a partially
//! written artifact. Two writers racing on the same name both produce the
//! same content; the last rename wins.
//!
//! ## Staged Payloads
//!
//! Generated inputs (job description, launcher script, user files) are
//! content-addressed: [`DownloadHierarchy::stage`] names them
//! `<stem>_<sha256 prefix><ext>`. Scheduler input files must never change
//! once referenced, and content addressing guarantees that without any
//! bookkeeping.

use crate::constants::{DEFAULT_FANOUT, STAGED_HASH_LEN};
use crate::error::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fan-out directory tree of scheduler input files.
#[derive(Debug, Clone)]
pub struct DownloadHierarchy {
    /// Root of the hierarchy.
    base_dir: PathBuf,
    /// Number of bucket directories.
    fanout: u32,
}

impl DownloadHierarchy {
    /// Opens (creating if needed) a hierarchy with the default fanout.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        Self::with_fanout(base_dir, DEFAULT_FANOUT)
    }

    /// Opens (creating if needed) a hierarchy with a specific fanout.
    pub fn with_fanout(base_dir: PathBuf, fanout: u32) -> Result<Self> {
        if fanout == 0 {
            return Err(Error::InvalidInput(
                "download hierarchy fanout must be positive".to_string(),
            ));
        }
        fs::create_dir_all(&base_dir).map_err(|e| {
            Error::StorageWriteFailed(format!("{}: {}", base_dir.display(), e))
        })?;

        info!("Download hierarchy at: {}", base_dir.display());

        Ok(Self { base_dir, fanout })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the fanout.
    pub fn fanout(&self) -> u32 {
        self.fanout
    }

    /// Returns the bucket a file name hashes to.
    pub fn bucket(&self, file_name: &str) -> u32 {
        let digest = hex::encode(Md5::digest(file_name.as_bytes()));
        // hex digits 1..8 always parse: 7 hex chars fit in a u32
        let n = u32::from_str_radix(&digest[1..8], 16).unwrap_or(0);
        n % self.fanout
    }

    /// Returns the canonical path of a file name.
    ///
    /// # Security
    ///
    /// File names must be a single plain path component; anything that could
    /// escape the hierarchy is rejected.
    pub fn path_for(&self, file_name: &str) -> Result<PathBuf> {
        validate_file_name(file_name)?;
        Ok(self
            .base_dir
            .join(format!("{:x}", self.bucket(file_name)))
            .join(file_name))
    }

    /// Checks if a file is present at its canonical path.
    pub fn contains(&self, file_name: &str) -> bool {
        self.path_for(file_name)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Stages generated content under a content-addressed name.
    ///
    /// Returns the staged file name. Identical content staged twice is
    /// written once.
    pub fn stage(&self, name: &str, contents: &[u8]) -> Result<String> {
        let staged = staged_name(name, contents);
        let path = self.path_for(&staged)?;

        if path.exists() {
            debug!("Payload {} already staged", staged);
            return Ok(staged);
        }

        write_atomic(&path, |file| file.write_all(contents))?;
        debug!("Staged {} ({} bytes) as {}", name, contents.len(), staged);
        Ok(staged)
    }
}

/// Content-addressed name for a staged payload.
///
/// `vbox_job.xml` becomes `vbox_job_<hash>.xml`; names without an
/// extension get the hash appended.
pub fn staged_name(name: &str, contents: &[u8]) -> String {
    let hash = hex::encode(Sha256::digest(contents));
    let hash = &hash[..STAGED_HASH_LEN];
    match name.split_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, hash, ext),
        _ => format!("{}_{}", name, hash),
    }
}

/// Rejects names that are not a single, plain path component.
pub fn validate_file_name(file_name: &str) -> Result<()> {
    let bad = file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::StorageWriteFailed(format!(
            "invalid file name '{}'",
            file_name
        )));
    }
    Ok(())
}

/// Writes a file atomically: temp file in the same directory, then rename.
///
/// Parent directories are created as needed. On any failure the temp file
/// is removed and the destination is left untouched.
pub fn write_atomic(
    dest: &Path,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| Error::StorageWriteFailed(format!("{} has no parent", dest.display())))?;
    let file_name = dest
        .file_name()
        .ok_or_else(|| Error::StorageWriteFailed(format!("{} has no file name", dest.display())))?;
    fs::create_dir_all(parent).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;

    // Unique temp name: concurrent writers of the same artifact never share
    // a temp file, and the final rename is atomic.
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        uuid::Uuid::now_v7()
    ));

    let result = File::create(&temp_path)
        .and_then(|mut file| {
            write(&mut file)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temp_path, dest));

    result.map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::StorageWriteFailed(format!("{}: {}", dest.display(), e))
    })
}
