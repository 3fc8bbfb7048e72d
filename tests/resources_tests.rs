//! Tests for resource bound estimation.

use wupack::resources::{disk_needed, memory_from_deprecated_mb, memory_needed};
use wupack::{ResourceBounds, estimate_disk, estimate_memory};

#[test]
fn test_estimates_follow_formula() {
    for size in [0u64, 999, 123_456_789, 2_000_000_000, 40_000_000_000] {
        assert_eq!(estimate_memory(size, None), 4 * size + 500_000_000);
        assert_eq!(estimate_disk(size, None), size + 100_000_000);
        assert_eq!(memory_needed(size), estimate_memory(size, None));
        assert_eq!(disk_needed(size), estimate_disk(size, None));
    }
}

#[test]
fn test_overrides_win_in_both_directions() {
    let size = 2_000_000_000;
    assert_eq!(estimate_memory(size, Some(100)), 100);
    assert_eq!(estimate_memory(size, Some(16_000_000_000)), 16_000_000_000);
    assert_eq!(estimate_disk(size, Some(0)), 0);
    assert_eq!(estimate_disk(size, Some(3_000_000_000)), 3_000_000_000);
}

#[test]
fn test_bounds_bundle() {
    let bounds = ResourceBounds::estimate(72_800_000, Some(1_000_000_000), None);
    assert_eq!(bounds.memory_bytes, 1_000_000_000);
    assert_eq!(bounds.disk_bytes, 172_800_000);
    assert_eq!(bounds.memory_mb(), 1_000);
}

#[test]
fn test_memory_mb_truncates() {
    let bounds = ResourceBounds::estimate(1_234_567, None, None);
    assert_eq!(bounds.memory_bytes, 504_938_268);
    assert_eq!(bounds.memory_mb(), 504);
}

#[test]
fn test_huge_sizes_saturate() {
    assert_eq!(estimate_memory(u64::MAX / 2, None), u64::MAX);
    assert_eq!(estimate_disk(u64::MAX, None), u64::MAX);
}

#[test]
fn test_deprecated_megabytes() {
    assert_eq!(memory_from_deprecated_mb(512), 512_000_000);
    assert_eq!(memory_from_deprecated_mb(0), 0);
}
