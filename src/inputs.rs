//! Ordered input-file list of a work unit.
//!
//! Position in this list is the file's number in the job template, so the
//! order is fixed:
//!
//! 1. user-supplied files, as given
//! 2. `vbox_job.xml`
//! 3. `shared/boinc_app` (launcher script)
//! 4. layer archives, in manifest order
//! 5. image-metadata archive
//!
//! Image archives are `sticky` and `no_delete` so the grid client keeps them
//! across jobs that share layers.

use crate::constants::{IMAGE_OPEN_DIR, LAUNCHER_OPEN_NAME, VBOX_JOB_OPEN_NAME};
use crate::error::{Error, Result};
use crate::export::CachedArtifact;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Per-file scheduler flag, rendered as an empty XML element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileFlag {
    /// Client keeps the file after the job.
    Sticky,
    /// Server never deletes the file.
    NoDelete,
    /// Client decompresses the file after download.
    Gzip,
    /// Any other flag the scheduler understands.
    Other(String),
}

impl FileFlag {
    /// Returns the element name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sticky => "sticky",
            Self::NoDelete => "no_delete",
            Self::Gzip => "gzip",
            Self::Other(name) => name,
        }
    }
}

impl FromStr for FileFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sticky" => Ok(Self::Sticky),
            "no_delete" => Ok(Self::NoDelete),
            "gzip" => Ok(Self::Gzip),
            other if is_element_name(other) => Ok(Self::Other(other.to_string())),
            other => Err(Error::InvalidFlag(other.to_string())),
        }
    }
}

impl fmt::Display for FileFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conservative XML element name check: ASCII letter or underscore, then
/// letters, digits, `_`, `-` or `.`.
fn is_element_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !s.to_ascii_lowercase().starts_with("xml")
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Where an input file's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Generated content, staged under a content-addressed name before
    /// submission.
    Inline {
        /// Base name used to derive the staged name.
        name: String,
        /// File content.
        bytes: Vec<u8>,
    },
    /// File already in the download hierarchy.
    Staged {
        /// Name inside the download hierarchy.
        file_name: String,
    },
}

/// One input file of the work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Name the job sees the file under.
    pub open_name: String,
    /// File content.
    pub payload: Payload,
    /// Scheduler flags, without duplicates.
    pub flags: Vec<FileFlag>,
}

impl InputFile {
    /// Creates an input file from generated content.
    ///
    /// The staged base name is the last component of `open_name`.
    pub fn inline(open_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let open_name = open_name.into();
        let name = Path::new(&open_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| open_name.clone());
        Self {
            open_name,
            payload: Payload::Inline { name, bytes },
            flags: Vec::new(),
        }
    }

    /// Creates an input file for a file already in the download hierarchy.
    pub fn staged(open_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            open_name: open_name.into(),
            payload: Payload::Staged {
                file_name: file_name.into(),
            },
            flags: Vec::new(),
        }
    }

    /// Adds flags, keeping first occurrences in order.
    pub fn with_flags(mut self, flags: impl IntoIterator<Item = FileFlag>) -> Self {
        for flag in flags {
            if !self.flags.contains(&flag) {
                self.flags.push(flag);
            }
        }
        self
    }

    /// Returns the staged file name, if already known.
    pub fn file_name(&self) -> Option<&str> {
        match &self.payload {
            Payload::Staged { file_name } => Some(file_name),
            Payload::Inline { .. } => None,
        }
    }
}

/// Parses a `--input` argument: `open_name=path[:flag,flag]`.
///
/// Returns the open name, the local path and the flags.
pub fn parse_input_spec(spec: &str) -> Result<(String, String, Vec<FileFlag>)> {
    let (open_name, rest) = spec
        .split_once('=')
        .ok_or_else(|| Error::InvalidInput(format!("expected open_name=path, got '{}'", spec)))?;
    if open_name.is_empty() {
        return Err(Error::InvalidInput(format!("empty open name in '{}'", spec)));
    }

    let (path, flags) = match rest.rsplit_once(':') {
        Some((path, flags)) if !path.is_empty() => {
            let flags = flags
                .split(',')
                .filter(|f| !f.is_empty())
                .map(str::parse)
                .collect::<Result<Vec<FileFlag>>>()?;
            (path, flags)
        }
        _ => (rest, Vec::new()),
    };
    if path.is_empty() {
        return Err(Error::InvalidInput(format!("empty path in '{}'", spec)));
    }
    Ok((open_name.to_string(), path.to_string(), flags))
}

/// Builds the ordered input-file list.
pub fn assemble(
    user_files: Vec<InputFile>,
    job_config: &str,
    launcher: &str,
    layers: &[CachedArtifact],
    image: &CachedArtifact,
    native_unzip: bool,
) -> Vec<InputFile> {
    let mut archive_flags = vec![FileFlag::Sticky, FileFlag::NoDelete];
    if native_unzip {
        archive_flags.push(FileFlag::Gzip);
    }

    let mut files = user_files;
    files.push(InputFile::inline(VBOX_JOB_OPEN_NAME, job_config.as_bytes().to_vec()));
    files.push(InputFile::inline(LAUNCHER_OPEN_NAME, launcher.as_bytes().to_vec()));
    for artifact in layers.iter().chain(std::iter::once(image)) {
        files.push(
            InputFile::staged(
                format!("{}/{}", IMAGE_OPEN_DIR, artifact.file_name),
                artifact.file_name.clone(),
            )
            .with_flags(archive_flags.iter().cloned()),
        );
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_parsing() {
        assert_eq!("sticky".parse::<FileFlag>().unwrap(), FileFlag::Sticky);
        assert_eq!("no_delete".parse::<FileFlag>().unwrap(), FileFlag::NoDelete);
        assert_eq!(
            "report_on_rpc".parse::<FileFlag>().unwrap(),
            FileFlag::Other("report_on_rpc".to_string())
        );
        assert!("bad flag".parse::<FileFlag>().is_err());
        assert!("<x>".parse::<FileFlag>().is_err());
        assert!("1abc".parse::<FileFlag>().is_err());
    }

    #[test]
    fn test_flags_deduplicate() {
        let file = InputFile::staged("a", "a").with_flags([
            FileFlag::Sticky,
            FileFlag::NoDelete,
            FileFlag::Sticky,
        ]);
        assert_eq!(file.flags, vec![FileFlag::Sticky, FileFlag::NoDelete]);
    }

    #[test]
    fn test_inline_uses_basename() {
        let file = InputFile::inline("shared/boinc_app", b"#!/bin/sh".to_vec());
        match file.payload {
            Payload::Inline { name, .. } => assert_eq!(name, "boinc_app"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_parse_input_spec() {
        let (open, path, flags) = parse_input_spec("shared/data.bin=/tmp/data.bin:sticky,no_delete").unwrap();
        assert_eq!(open, "shared/data.bin");
        assert_eq!(path, "/tmp/data.bin");
        assert_eq!(flags, vec![FileFlag::Sticky, FileFlag::NoDelete]);

        let (_, path, flags) = parse_input_spec("in=./local").unwrap();
        assert_eq!(path, "./local");
        assert!(flags.is_empty());

        assert!(parse_input_spec("missing-separator").is_err());
        assert!(parse_input_spec("=path").is_err());
        assert!(parse_input_spec("in=/p:not a flag").is_err());
    }
}
