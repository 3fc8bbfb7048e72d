//! Tests for image resolution.
//!
//! Validates pull-and-retry on missing images, error propagation, size
//! query handling and request-scoped memoization.

mod common;

use common::{FakeRuntime, IMAGE_HEX};
use std::sync::Arc;
use wupack::{Error, ImageRef, ImageResolver, ResolveCache, parse_reported_size};

fn image() -> ImageRef {
    ImageRef::parse("boinc/app").unwrap()
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[tokio::test]
async fn test_resolve_present_image() {
    let runtime = Arc::new(FakeRuntime::new());
    let resolver = ImageResolver::new(runtime.clone());
    let mut cache = ResolveCache::new();

    let identity = resolver.resolve(&mut cache, &image()).await.unwrap();
    assert_eq!(identity.content_id, IMAGE_HEX);
    assert_eq!(identity.size_bytes, 2_000_000_000);
    assert_eq!(runtime.calls(), vec!["inspect_id", "list_sizes"]);
}

#[tokio::test]
async fn test_missing_image_pulled_and_retried_once() {
    let runtime = Arc::new(FakeRuntime::missing());
    let resolver = ImageResolver::new(runtime.clone());

    let identity = resolver
        .resolve(&mut ResolveCache::new(), &image())
        .await
        .unwrap();
    assert_eq!(identity.content_id, IMAGE_HEX);
    assert_eq!(
        runtime.calls(),
        vec!["inspect_id", "pull", "inspect_id", "list_sizes"]
    );
}

#[tokio::test]
async fn test_failed_pull_reports_output() {
    let runtime = Arc::new(FakeRuntime {
        pull_fails: true,
        ..FakeRuntime::missing()
    });
    let resolver = ImageResolver::new(runtime.clone());

    let err = resolver
        .resolve(&mut ResolveCache::new(), &image())
        .await
        .unwrap_err();
    match err {
        Error::ImageUnavailable { reference, output } => {
            assert_eq!(reference, "boinc/app:latest");
            assert!(output.contains("pull access denied"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(runtime.count("inspect_id"), 1);
}

#[tokio::test]
async fn test_other_inspect_failures_propagate() {
    let runtime = Arc::new(FakeRuntime {
        inspect_error: Some("Cannot connect to the Docker daemon".to_string()),
        ..FakeRuntime::new()
    });
    let resolver = ImageResolver::new(runtime.clone());

    let err = resolver
        .resolve(&mut ResolveCache::new(), &image())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProcessFailure { .. }));
    assert!(!err.is_image_not_found());
    assert_eq!(runtime.count("pull"), 0);
}

#[tokio::test]
async fn test_size_query_match_counts() {
    let unknown = Arc::new(FakeRuntime {
        size_matches: 0,
        ..FakeRuntime::new()
    });
    let err = ImageResolver::new(unknown)
        .resolve(&mut ResolveCache::new(), &image())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownImage(_)));

    let ambiguous = Arc::new(FakeRuntime {
        size_matches: 2,
        ..FakeRuntime::new()
    });
    let err = ImageResolver::new(ambiguous)
        .resolve(&mut ResolveCache::new(), &image())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AmbiguousImage { matches: 2, .. }));
}

// =============================================================================
// Memoization Tests
// =============================================================================

#[tokio::test]
async fn test_cache_hit_skips_runtime() {
    let runtime = Arc::new(FakeRuntime::new());
    let resolver = ImageResolver::new(runtime.clone());
    let mut cache = ResolveCache::new();

    let first = resolver.resolve(&mut cache, &image()).await.unwrap();
    // `boinc/app` and `boinc/app:latest` normalize to the same key.
    let second = resolver
        .resolve(&mut cache, &ImageRef::parse("boinc/app:latest").unwrap())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
    assert_eq!(runtime.count("inspect_id"), 1);
    assert_eq!(runtime.count("list_sizes"), 1);
}

#[tokio::test]
async fn test_separate_caches_do_not_share() {
    let runtime = Arc::new(FakeRuntime::new());
    let resolver = ImageResolver::new(runtime.clone());

    resolver.resolve(&mut ResolveCache::new(), &image()).await.unwrap();
    resolver.resolve(&mut ResolveCache::new(), &image()).await.unwrap();
    assert_eq!(runtime.count("inspect_id"), 2);
}

// =============================================================================
// Size Parsing Tests
// =============================================================================

#[test]
fn test_reported_size_examples() {
    assert_eq!(parse_reported_size("1.5GB").unwrap(), 1_500_000_000);
    assert_eq!(parse_reported_size("500MB").unwrap(), 500_000_000);
    assert_eq!(parse_reported_size("10B").unwrap(), 10);
    assert_eq!(parse_reported_size("1TB").unwrap(), 1_000_000_000_000);
    assert!(matches!(
        parse_reported_size("huge"),
        Err(Error::InvalidSize { .. })
    ));
}
