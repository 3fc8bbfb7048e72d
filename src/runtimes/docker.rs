//! # Docker CLI Runtime
//!
//! Implements [`ContainerRuntime`] by shelling out to the `docker` client.
//!
//! | Operation      | Command                                        | Timeout                 |
//! |----------------|------------------------------------------------|-------------------------|
//! | `inspect_id`   | `docker image inspect --format {{.Id}} REF`    | `RUNTIME_QUERY_TIMEOUT` |
//! | `inspect_size` | `docker image inspect --format {{.Size}} REF`  | `RUNTIME_QUERY_TIMEOUT` |
//! | `list_sizes`   | `docker images --format {{.Size}} REF`         | `RUNTIME_QUERY_TIMEOUT` |
//! | `pull`         | `docker pull REF`                              | `IMAGE_PULL_TIMEOUT`    |
//! | `save`         | `docker save -o DEST REF`                      | `IMAGE_SAVE_TIMEOUT`    |
//!
//! Arguments are passed directly to the process (no shell), so image
//! references never need escaping here.
//!
//! [`ContainerRuntime`]: crate::runtime::ContainerRuntime

use crate::constants::{IMAGE_PULL_TIMEOUT, IMAGE_SAVE_TIMEOUT, RUNTIME_QUERY_TIMEOUT};
use crate::error::{Error, Result};
use crate::image::ImageRef;
use crate::process;
use crate::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Docker command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    /// Path or name of the docker binary.
    binary: PathBuf,
}

impl DockerCli {
    /// Creates a client using `docker` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Creates a client using a specific binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Returns the configured binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    async fn inspect_id(&self, image: &ImageRef) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(["image", "inspect", "--format", "{{.Id}}", image.as_str()]);
        process::run(&mut cmd, RUNTIME_QUERY_TIMEOUT).await
    }

    async fn inspect_size(&self, image: &ImageRef) -> Result<u64> {
        let mut cmd = self.command();
        cmd.args(["image", "inspect", "--format", "{{.Size}}", image.as_str()]);
        let output = process::run(&mut cmd, RUNTIME_QUERY_TIMEOUT).await?;
        output.trim().parse::<u64>().map_err(|e| Error::InvalidSize {
            input: output.clone(),
            reason: e.to_string(),
        })
    }

    async fn list_sizes(&self, image: &ImageRef) -> Result<Vec<String>> {
        let mut cmd = self.command();
        cmd.args(["images", "--format", "{{.Size}}", image.as_str()]);
        let output = process::run(&mut cmd, RUNTIME_QUERY_TIMEOUT).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn pull(&self, image: &ImageRef) -> Result<()> {
        info!("Pulling '{}'...", image);
        let mut cmd = self.command();
        cmd.args(["pull", image.as_str()]);
        process::run(&mut cmd, IMAGE_PULL_TIMEOUT).await?;
        Ok(())
    }

    async fn save(&self, image: &ImageRef, dest: &Path) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("save").arg("-o").arg(dest).arg(image.as_str());
        process::run(&mut cmd, IMAGE_SAVE_TIMEOUT).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_override() {
        let cli = DockerCli::with_binary("/usr/local/bin/podman");
        assert_eq!(cli.binary(), Path::new("/usr/local/bin/podman"));
        assert_eq!(DockerCli::default().binary(), Path::new("docker"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_image_reported_as_not_found() {
        // A stand-in docker that fails like the real one does.
        let temp = tempfile::TempDir::new().unwrap();
        let fake = temp.path().join("docker");
        std::fs::write(&fake, "#!/bin/sh\necho \"Error: No such image: $5\" >&2\nexit 1\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = DockerCli::with_binary(&fake);
        let image = ImageRef::parse("missing").unwrap();
        let err = cli.inspect_id(&image).await.unwrap_err();
        assert!(err.is_image_not_found());
        assert!(err.process_output().unwrap().contains("missing:latest"));
    }
}
