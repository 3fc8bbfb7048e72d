//! # Image Resolution
//!
//! Maps an image reference to the identity the rest of the pipeline keys
//! everything on: the content ID (cache artifact names) and the byte size
//! (resource bounds).
//!
//! ## Resolution Flow
//!
//! ```text
//! ImageRef ──► ResolveCache hit? ──yes──► ImageIdentity
//!                   │ no
//!                   ▼
//!            inspect_id ──"No such image"──► pull ──► inspect_id (once)
//!                   │
//!                   ▼
//!            list_sizes ──► 0 matches: UnknownImage
//!                   │       >1 matches: AmbiguousImage
//!                   ▼
//!            parse_reported_size (base-1000)
//! ```
//!
//! ## Memoization
//!
//! Lookups hit the runtime daemon, which is slow under load. Results are
//! memoized in a [`ResolveCache`] owned by the caller and scoped to one
//! request, so two packaging runs in the same process never share stale
//! identities.

use crate::constants::{
    DEFAULT_IMAGE_TAG, IMAGE_REF_VALID_CHARS, MAX_IMAGE_REF_LEN, SIZE_UNITS,
};
use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Image Reference
// =============================================================================

/// A validated image reference that always carries an explicit tag
/// (or digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    /// Parses and normalizes an image reference.
    ///
    /// `alpine` becomes `alpine:latest`. References pinned by digest
    /// (`alpine@sha256:...`) are kept as is. A registry port is not taken
    /// for a tag: `localhost:5000/app` becomes `localhost:5000/app:latest`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidImageReference`] if the reference is empty, too long,
    /// or contains characters outside [`IMAGE_REF_VALID_CHARS`].
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let invalid = |reason: &str| Error::InvalidImageReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if reference.len() > MAX_IMAGE_REF_LEN {
            return Err(invalid("reference exceeds maximum length"));
        }
        if !reference.chars().all(|c| IMAGE_REF_VALID_CHARS.contains(c)) {
            return Err(invalid("reference contains invalid characters"));
        }
        if reference.starts_with(['/', ':', '@']) || reference.ends_with(['/', ':', '@']) {
            return Err(invalid("reference is malformed"));
        }

        if reference.contains('@') {
            return Ok(Self(reference.to_string()));
        }

        let last_component = reference.rsplit('/').next().unwrap_or(reference);
        if last_component.contains(':') {
            Ok(Self(reference.to_string()))
        } else {
            Ok(Self(format!("{}:{}", reference, DEFAULT_IMAGE_TAG)))
        }
    }

    /// Returns the normalized reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ImageRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// =============================================================================
// Image Identity
// =============================================================================

/// Content identity of a resolved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIdentity {
    /// Image ID without its digest algorithm prefix.
    pub content_id: String,
    /// Image size in bytes, as reported by the runtime (base-1000 units).
    pub size_bytes: u64,
}

impl ImageIdentity {
    /// Returns the abbreviated ID used in log messages.
    pub fn short_id(&self) -> &str {
        abbreviate(&self.content_id)
    }
}

/// Returns the first 12 characters of an ID, cut on a character boundary.
pub(crate) fn abbreviate(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Strips the digest algorithm from a runtime-reported image ID.
///
/// `sha256:abcd...` becomes `abcd...`; an ID without a prefix is returned
/// unchanged.
pub fn content_id_from(raw: &str) -> String {
    let raw = raw.trim();
    raw.split_once(':')
        .map(|(_, hash)| hash)
        .unwrap_or(raw)
        .to_string()
}

/// Parses a runtime-reported size such as `"1.5GB"` into bytes.
///
/// The numeric part and the unit are split at the first alphabetic
/// character. Units are `B`, `KB`, `MB`, `GB` and `TB` in any case, with
/// base-1000 multipliers: the runtime prints decimal units and work unit
/// sizing relies on that.
///
/// # Examples
///
/// ```
/// use wupack::image::parse_reported_size;
///
/// assert_eq!(parse_reported_size("1.5GB").unwrap(), 1_500_000_000);
/// assert_eq!(parse_reported_size("500MB").unwrap(), 500_000_000);
/// assert_eq!(parse_reported_size("10B").unwrap(), 10);
/// assert_eq!(parse_reported_size("7.8kB").unwrap(), 7_800);
/// ```
pub fn parse_reported_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let invalid = |reason: String| Error::InvalidSize {
        input: input.to_string(),
        reason,
    };

    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| invalid("missing unit".to_string()))?;
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|e| invalid(format!("bad number '{}': {}", number.trim(), e)))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid("size must be a non-negative number".to_string()));
    }

    let unit = unit.trim().to_ascii_uppercase();
    let multiplier = SIZE_UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, multiplier)| *multiplier)
        .ok_or_else(|| invalid(format!("unknown unit '{}'", unit)))?;

    Ok((value * multiplier).round() as u64)
}

// =============================================================================
// Resolver
// =============================================================================

/// Request-scoped memo of resolved identities, keyed by normalized reference.
#[derive(Debug, Default)]
pub struct ResolveCache {
    entries: HashMap<String, ImageIdentity>,
}

impl ResolveCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized identity for a reference.
    pub fn get(&self, image: &ImageRef) -> Option<&ImageIdentity> {
        self.entries.get(image.as_str())
    }

    /// Returns the number of memoized references.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, image: &ImageRef, identity: ImageIdentity) {
        self.entries.insert(image.as_str().to_string(), identity);
    }
}

/// Resolves image references against a container runtime.
pub struct ImageResolver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageResolver {
    /// Creates a resolver over the given runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Resolves an image to its identity, pulling it once if missing.
    ///
    /// # Errors
    ///
    /// - [`Error::ImageUnavailable`] if the image is missing and the pull fails
    /// - [`Error::UnknownImage`] / [`Error::AmbiguousImage`] from the size query
    /// - any other runtime failure, unchanged
    pub async fn resolve(
        &self,
        cache: &mut ResolveCache,
        image: &ImageRef,
    ) -> Result<ImageIdentity> {
        if let Some(identity) = cache.get(image) {
            debug!("Using memoized identity for {}", image);
            return Ok(identity.clone());
        }

        let raw_id = match self.runtime.inspect_id(image).await {
            Ok(id) => id,
            Err(e) if e.is_image_not_found() => {
                info!("Image '{}' not found locally, pulling", image);
                self.runtime
                    .pull(image)
                    .await
                    .map_err(|pull_err| Error::ImageUnavailable {
                        reference: image.to_string(),
                        output: pull_err
                            .process_output()
                            .map(str::to_string)
                            .unwrap_or_else(|| pull_err.to_string()),
                    })?;
                self.runtime.inspect_id(image).await?
            }
            Err(e) => return Err(e),
        };

        let size_bytes = self.reported_size(image).await?;
        let identity = ImageIdentity {
            content_id: content_id_from(&raw_id),
            size_bytes,
        };
        debug!(
            "Resolved {} -> {} ({} bytes)",
            image,
            identity.short_id(),
            identity.size_bytes
        );

        cache.insert(image, identity.clone());
        Ok(identity)
    }

    /// Returns the exact image size reported by inspection.
    pub async fn exact_size(&self, image: &ImageRef) -> Result<u64> {
        self.runtime.inspect_size(image).await
    }

    async fn reported_size(&self, image: &ImageRef) -> Result<u64> {
        let sizes = self.runtime.list_sizes(image).await?;
        match sizes.as_slice() {
            [] => Err(Error::UnknownImage(image.to_string())),
            [size] => parse_reported_size(size),
            many => Err(Error::AmbiguousImage {
                reference: image.to_string(),
                matches: many.len(),
            }),
        }
    }
}
