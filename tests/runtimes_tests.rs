//! Tests for the docker CLI runtime and the create_work submitter.
//!
//! Both shell out to external programs; these tests substitute small shell
//! scripts that answer the way the real tools do.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wupack::{
    ContainerRuntime, CreateWorkCli, DockerCli, Error, ImageRef, ImageResolver, ResolveCache,
    ResourceBounds, WorkSubmitter, WorkUnitRequest,
};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const FAKE_DOCKER: &str = r#"
case "$1" in
  image)
    if [ "$4" = "{{.Id}}" ]; then echo "sha256:0123456789abcdef"; else echo "1499999999"; fi ;;
  images)
    echo "1.5GB" ;;
  pull)
    echo "Pulled $2" ;;
  save)
    printf 'saved %s' "$4" > "$3" ;;
  *)
    echo "unknown command $1" >&2; exit 2 ;;
esac
"#;

// =============================================================================
// DockerCli Tests
// =============================================================================

#[tokio::test]
async fn test_docker_cli_commands() {
    let temp = TempDir::new().unwrap();
    let docker = DockerCli::with_binary(write_script(temp.path(), "docker", FAKE_DOCKER));
    let image = ImageRef::parse("boinc/app").unwrap();

    assert_eq!(docker.inspect_id(&image).await.unwrap(), "sha256:0123456789abcdef");
    assert_eq!(docker.inspect_size(&image).await.unwrap(), 1_499_999_999);
    assert_eq!(docker.list_sizes(&image).await.unwrap(), vec!["1.5GB"]);
    docker.pull(&image).await.unwrap();

    let dest = temp.path().join("image.tar");
    docker.save(&image, &dest).await.unwrap();
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "saved boinc/app:latest");
}

#[tokio::test]
async fn test_resolver_over_docker_cli() {
    let temp = TempDir::new().unwrap();
    let docker = DockerCli::with_binary(write_script(temp.path(), "docker", FAKE_DOCKER));
    let resolver = ImageResolver::new(std::sync::Arc::new(docker));

    let identity = resolver
        .resolve(&mut ResolveCache::new(), &ImageRef::parse("boinc/app").unwrap())
        .await
        .unwrap();
    assert_eq!(identity.content_id, "0123456789abcdef");
    assert_eq!(identity.size_bytes, 1_500_000_000);
}

#[tokio::test]
async fn test_docker_failure_carries_output() {
    let temp = TempDir::new().unwrap();
    let docker = DockerCli::with_binary(write_script(
        temp.path(),
        "docker",
        "echo 'Cannot connect to the Docker daemon' >&2\nexit 1\n",
    ));

    let err = docker
        .list_sizes(&ImageRef::parse("boinc/app").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProcessFailure { .. }));
    assert!(err.process_output().unwrap().contains("Cannot connect"));
}

#[tokio::test]
async fn test_missing_docker_binary() {
    let docker = DockerCli::with_binary("/nonexistent/docker");
    let err = docker
        .inspect_id(&ImageRef::parse("alpine").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProcessSpawn { .. }));
}

// =============================================================================
// CreateWorkCli Tests
// =============================================================================

#[tokio::test]
async fn test_create_work_invocation() {
    let project = TempDir::new().unwrap();
    let bin = project.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    write_script(&bin, "create_work", "pwd > args.txt\nprintf '%s\\n' \"$@\" >> args.txt\n");

    let submitter = CreateWorkCli::new(project.path());
    let request = WorkUnitRequest {
        appname: "boinc2docker".to_string(),
        bounds: ResourceBounds {
            memory_bytes: 8_500_000_000,
            disk_bytes: 2_100_000_000,
        },
        options: vec![("wu_name".to_string(), "job_1".to_string())],
        template_path: PathBuf::from("/tmp/wupack_in_abc"),
        files: vec!["vbox_job_0011.xml".to_string(), "boinc_app_2233".to_string()],
    };

    let name = submitter.submit(&request).await.unwrap();
    assert_eq!(name, "job_1");

    let recorded = std::fs::read_to_string(project.path().join("args.txt")).unwrap();
    let lines: Vec<_> = recorded.lines().collect();
    assert_eq!(
        Path::new(lines[0]).canonicalize().unwrap(),
        project.path().canonicalize().unwrap()
    );
    assert_eq!(
        &lines[1..],
        &[
            "--appname",
            "boinc2docker",
            "--wu_name",
            "job_1",
            "--wu_template",
            "/tmp/wupack_in_abc",
            "--rsc_memory_bound",
            "8500000000",
            "--rsc_disk_bound",
            "2100000000",
            "vbox_job_0011.xml",
            "boinc_app_2233",
        ]
    );
}
