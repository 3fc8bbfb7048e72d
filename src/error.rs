//! Error types for the image packaging pipeline.

use std::path::PathBuf;

/// Result type alias for packaging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning an image into a work unit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Image Resolution Errors
    // =========================================================================
    /// Failed to parse an image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// No local image matched the size query.
    #[error("trying to get size of unknown image '{0}'")]
    UnknownImage(String),

    /// More than one local image matched the size query.
    #[error("trying to get size of ambiguous image name '{reference}' ({matches} matches)")]
    AmbiguousImage { reference: String, matches: usize },

    /// Image missing locally and the pull attempt failed too.
    #[error("image '{reference}' is not available locally and could not be pulled:\n{output}")]
    ImageUnavailable { reference: String, output: String },

    /// Size string reported by the runtime could not be parsed.
    #[error("invalid image size '{input}': {reason}")]
    InvalidSize { input: String, reason: String },

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// External command exited with a non-zero status.
    #[error("command '{command}' failed ({status}):\n{output}")]
    ProcessFailure {
        command: String,
        status: String,
        output: String,
    },

    /// External command could not be started at all.
    #[error("failed to spawn '{command}': {reason}")]
    ProcessSpawn { command: String, reason: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // Cache / Export Errors
    // =========================================================================
    /// A cached artifact exists but its manifest cannot be read.
    #[error(
        "cached artifact {path} is unreadable ({reason}); rerun with --force-reimport to rebuild it"
    )]
    CorruptCacheArtifact { path: PathBuf, reason: String },

    /// Exported manifest is missing or malformed.
    #[error("invalid image manifest: {0}")]
    InvalidManifest(String),

    /// Path traversal attempt detected in an exported archive.
    #[error("path traversal detected in export: {path}")]
    PathTraversal { path: String },

    /// Archive creation failed.
    #[error("failed to archive {name}: {reason}")]
    ArchiveFailed { name: String, reason: String },

    /// Download hierarchy write failed.
    #[error("failed to write to download hierarchy: {0}")]
    StorageWriteFailed(String),

    // =========================================================================
    // Input / Template Errors
    // =========================================================================
    /// File flag is not a usable template element name.
    #[error("invalid file flag '{0}': must be a plain XML element name")]
    InvalidFlag(String),

    /// Invalid caller-supplied input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded.
    #[error("configuration error at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    // =========================================================================
    // Submission Errors
    // =========================================================================
    /// Scheduler rejected or failed to create the work unit.
    #[error("work unit submission failed: {0}")]
    SubmissionFailed(String),

    /// The invocation was interrupted before completion.
    #[error("interrupted; temporary files cleaned up")]
    Cancelled,

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this is a runtime failure that reports a missing image.
    ///
    /// Only process failures are considered; the decision is made from the
    /// captured output, matching both the classic ("No such image") and the
    /// newer ("No such object") docker wording.
    pub fn is_image_not_found(&self) -> bool {
        match self {
            Self::ProcessFailure { output, .. } => {
                crate::constants::IMAGE_NOT_FOUND_MARKERS
                    .iter()
                    .any(|marker| output.contains(marker))
            }
            _ => false,
        }
    }

    /// Returns the captured process output if this error carries one.
    pub fn process_output(&self) -> Option<&str> {
        match self {
            Self::ProcessFailure { output, .. } | Self::ImageUnavailable { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}
