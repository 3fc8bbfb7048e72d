//! Tests for error types.
//!
//! Validates display formatting and not-found classification.

use std::path::PathBuf;
use std::time::Duration;
use wupack::Error;

fn process_failure(output: &str) -> Error {
    Error::ProcessFailure {
        command: "docker image inspect --format {{.Id}} x:latest".to_string(),
        status: "exit status: 1".to_string(),
        output: output.to_string(),
    }
}

// =============================================================================
// Classification Tests
// =============================================================================

#[test]
fn test_not_found_markers() {
    assert!(process_failure("Error: No such image: x:latest").is_image_not_found());
    assert!(process_failure("Error: No such object: x:latest").is_image_not_found());
    assert!(!process_failure("permission denied").is_image_not_found());
}

#[test]
fn test_only_process_failures_are_not_found() {
    assert!(!Error::UnknownImage("No such image".to_string()).is_image_not_found());
    assert!(!Error::SubmissionFailed("No such image".to_string()).is_image_not_found());
}

#[test]
fn test_process_output_accessor() {
    assert_eq!(process_failure("boom").process_output(), Some("boom"));
    assert_eq!(Error::Cancelled.process_output(), None);
}

// =============================================================================
// Display Tests
// =============================================================================

#[test]
fn test_process_failure_display_includes_output() {
    let msg = process_failure("daemon not running").to_string();
    assert!(msg.contains("docker image inspect"), "should include command");
    assert!(msg.contains("daemon not running"), "should include output");
}

#[test]
fn test_corrupt_artifact_suggests_reimport() {
    let err = Error::CorruptCacheArtifact {
        path: PathBuf::from("/download/1a/image_abc.tar.manual.gz"),
        reason: "unexpected end of file".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("image_abc.tar.manual.gz"));
    assert!(msg.contains("--force-reimport"));
}

#[test]
fn test_ambiguous_image_display() {
    let err = Error::AmbiguousImage {
        reference: "app:latest".to_string(),
        matches: 3,
    };
    let msg = err.to_string();
    assert!(msg.contains("ambiguous"));
    assert!(msg.contains("app:latest"));
}

#[test]
fn test_timeout_display() {
    let err = Error::Timeout {
        operation: "docker save".to_string(),
        duration: Duration::from_secs(3600),
    };
    assert!(err.to_string().contains("docker save"));
}

#[test]
fn test_io_conversion() {
    let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, Error::Io(_)));
}
