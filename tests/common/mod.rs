//! Shared fakes for integration tests.
//!
//! `FakeRuntime` serves a synthetic image in `docker save` layout and
//! records every call; `FakeSubmitter` captures work unit requests together
//! with the template contents (the template file is gone once a run ends).

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tar::{Builder, Header};
use wupack::{ContainerRuntime, Error, ImageRef, Result, WorkSubmitter, WorkUnitRequest};

pub const IMAGE_HEX: &str = "9c7a54a9a43cca047013b82af109fe963fde787f63f9e016fdc3384500c2823d";

/// Image manifest blob referenced from `index.json` in OCI-layout saves.
pub const OCI_MANIFEST_HEX: &str =
    "e3b7a1d2c4f5061728394a5b6c7d8e9f00112233445566778899aabbccddeeff";

// =============================================================================
// Fake Runtime
// =============================================================================

pub struct FakeRuntime {
    pub image_id: String,
    pub reported_size: String,
    pub exact_size: u64,
    /// Layer IDs in manifest order; may repeat.
    pub layers: Vec<String>,
    /// Whether the image is present locally.
    pub present: AtomicBool,
    pub pull_fails: bool,
    /// Failure returned by inspect for reasons other than a missing image.
    pub inspect_error: Option<String>,
    /// Number of matches reported by the size query.
    pub size_matches: usize,
    /// Save blocks this long before writing anything.
    pub save_delay: Option<Duration>,
    /// Use the OCI layout (`blobs/sha256/<hex>`) instead of `<id>/layer.tar`.
    pub oci_layout: bool,
    pub calls: Mutex<Vec<String>>,
    pub save_dests: Mutex<Vec<PathBuf>>,
    /// Set once a save has written its archive.
    pub saved: AtomicBool,
}

impl FakeRuntime {
    /// A present two-layer image of reported size 2GB.
    pub fn new() -> Self {
        Self {
            image_id: format!("sha256:{}", IMAGE_HEX),
            reported_size: "2GB".to_string(),
            exact_size: 1_999_999_123,
            layers: vec![
                "5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef".to_string(),
                "a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4".to_string(),
            ],
            present: AtomicBool::new(true),
            pull_fails: false,
            inspect_error: None,
            size_matches: 1,
            save_delay: None,
            oci_layout: false,
            calls: Mutex::new(Vec::new()),
            save_dests: Mutex::new(Vec::new()),
            saved: AtomicBool::new(false),
        }
    }

    pub fn missing() -> Self {
        let runtime = Self::new();
        runtime.present.store(false, Ordering::SeqCst);
        runtime
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| *c == op).count()
    }

    fn record(&self, op: &str) {
        self.calls.lock().unwrap().push(op.to_string());
    }

    fn failure(&self, cmd: &str, output: &str) -> Error {
        Error::ProcessFailure {
            command: cmd.to_string(),
            status: "exit status: 1".to_string(),
            output: output.to_string(),
        }
    }

    fn layer_path(&self, id: &str) -> String {
        if self.oci_layout {
            format!("blobs/sha256/{}", id)
        } else {
            format!("{}/layer.tar", id)
        }
    }

    /// Builds the saved image archive.
    pub fn build_save(&self) -> Vec<u8> {
        let hex = self.image_id.trim_start_matches("sha256:");
        let config_path = if self.oci_layout {
            format!("blobs/sha256/{}", hex)
        } else {
            format!("{}.json", hex)
        };
        let layers: Vec<String> = self.layers.iter().map(|l| self.layer_path(l)).collect();
        let manifest = serde_json::json!([{
            "Config": config_path,
            "RepoTags": ["boinc/app:latest"],
            "Layers": layers,
        }]);

        let mut builder = Builder::new(Vec::new());
        let mut seen = std::collections::HashSet::new();
        for (id, path) in self.layers.iter().zip(&layers) {
            if !seen.insert(id.clone()) {
                continue;
            }
            append(&mut builder, path, format!("layer contents of {}", id).as_bytes());
            if !self.oci_layout {
                append(&mut builder, &format!("{}/VERSION", id), b"1.0");
                append(&mut builder, &format!("{}/json", id), b"{}");
            }
        }
        append(&mut builder, &config_path, br#"{"architecture":"amd64"}"#);
        append(
            &mut builder,
            "manifest.json",
            serde_json::to_vec(&manifest).unwrap().as_slice(),
        );
        if self.oci_layout {
            let image_manifest = serde_json::json!({
                "schemaVersion": 2,
                "config": { "digest": format!("sha256:{}", hex) },
                "layers": self
                    .layers
                    .iter()
                    .map(|l| serde_json::json!({ "digest": format!("sha256:{}", l) }))
                    .collect::<Vec<_>>(),
            });
            let index = serde_json::json!({
                "schemaVersion": 2,
                "manifests": [{ "digest": format!("sha256:{}", OCI_MANIFEST_HEX) }],
            });
            append(
                &mut builder,
                &format!("blobs/sha256/{}", OCI_MANIFEST_HEX),
                serde_json::to_vec(&image_manifest).unwrap().as_slice(),
            );
            append(&mut builder, "index.json", serde_json::to_vec(&index).unwrap().as_slice());
            append(&mut builder, "oci-layout", br#"{"imageLayoutVersion":"1.0.0"}"#);
        } else {
            append(&mut builder, "repositories", br#"{"boinc/app":{"latest":"x"}}"#);
        }
        builder.into_inner().unwrap()
    }
}

/// Appends a regular file to a tar under construction.
pub fn append(builder: &mut Builder<Vec<u8>>, path: &str, data: &[u8]) {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(1_700_000_000);
    header.set_cksum();
    builder.append_data(&mut header, path, data).unwrap();
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn inspect_id(&self, image: &ImageRef) -> Result<String> {
        self.record("inspect_id");
        if let Some(output) = &self.inspect_error {
            return Err(self.failure("docker image inspect", output));
        }
        if !self.present.load(Ordering::SeqCst) {
            return Err(self.failure(
                "docker image inspect",
                &format!("Error: No such image: {}", image),
            ));
        }
        Ok(self.image_id.clone())
    }

    async fn inspect_size(&self, _image: &ImageRef) -> Result<u64> {
        self.record("inspect_size");
        Ok(self.exact_size)
    }

    async fn list_sizes(&self, _image: &ImageRef) -> Result<Vec<String>> {
        self.record("list_sizes");
        Ok(vec![self.reported_size.clone(); self.size_matches])
    }

    async fn pull(&self, image: &ImageRef) -> Result<()> {
        self.record("pull");
        if self.pull_fails {
            return Err(self.failure(
                "docker pull",
                &format!("Error response from daemon: pull access denied for {}", image),
            ));
        }
        self.present.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn save(&self, _image: &ImageRef, dest: &Path) -> Result<()> {
        self.record("save");
        self.save_dests.lock().unwrap().push(dest.to_path_buf());
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        tokio::fs::write(dest, self.build_save()).await?;
        self.saved.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Fake Submitter
// =============================================================================

#[derive(Default)]
pub struct FakeSubmitter {
    pub fail_with: Option<String>,
    pub requests: Mutex<Vec<WorkUnitRequest>>,
    pub templates: Mutex<Vec<String>>,
}

impl FakeSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<WorkUnitRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn templates(&self) -> Vec<String> {
        self.templates.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkSubmitter for FakeSubmitter {
    async fn submit(&self, request: &WorkUnitRequest) -> Result<String> {
        let template = std::fs::read_to_string(&request.template_path)?;
        self.templates.lock().unwrap().push(template);
        self.requests.lock().unwrap().push(request.clone());
        match &self.fail_with {
            Some(output) => Err(Error::SubmissionFailed(output.clone())),
            None => Ok(format!("{}_wu{}", request.appname, self.requests.lock().unwrap().len())),
        }
    }
}
