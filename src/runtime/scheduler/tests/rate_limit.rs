//! RateLimits / RateLimiter 单元测试

use crate::runtime::scheduler::{RateLimiter, RateLimits};
use std::time::{Duration, Instant};

#[test]
fn test_interval_lookup() {
    let limits = RateLimits::per_call(0.5)
        .with_tag_secs("compute", 0.1)
        .with_tag("image", None);

    assert_eq!(limits.interval_for(None), Duration::from_millis(500));
    assert_eq!(limits.interval_for(Some("network")), Duration::from_millis(500));
    assert_eq!(limits.interval_for(Some("compute")), Duration::from_millis(100));
    assert_eq!(limits.interval_for(Some("image")), Duration::ZERO);
    assert!(!limits.is_unlimited());
}

#[test]
fn test_non_positive_rates_are_unlimited() {
    for seconds in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let limits = RateLimits::per_call(seconds);
        assert_eq!(limits.interval_for(None), Duration::ZERO, "seconds = {}", seconds);
        assert!(limits.is_unlimited());
    }
    assert!(RateLimits::unlimited().with_tag_secs("x", 0.0).is_unlimited());
}

#[test]
fn test_limiter_first_dispatch_is_immediate() {
    let mut limiter = RateLimiter::new(RateLimits::per_call(10.0));
    let start = Instant::now();
    assert_eq!(limiter.acquire(None), Duration::ZERO);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_limiter_spaces_same_tag() {
    let mut limiter = RateLimiter::new(
        RateLimits::unlimited().with_tag("compute", Some(Duration::from_millis(50))),
    );

    limiter.acquire(Some("compute"));
    let first = Instant::now();
    let waited = limiter.acquire(Some("compute"));
    assert!(first.elapsed() >= Duration::from_millis(45));
    assert!(waited > Duration::ZERO);
}

#[test]
fn test_limiter_tags_do_not_share_budget() {
    let mut limiter = RateLimiter::new(
        RateLimits::per_call(5.0).with_tag("image", None),
    );

    assert_eq!(limiter.acquire(Some("compute")), Duration::ZERO);
    // Unlimited tag.
    assert_eq!(limiter.acquire(Some("image")), Duration::ZERO);
    // Another tag falling back to the default interval has its own clock.
    assert_eq!(limiter.acquire(Some("volume")), Duration::ZERO);
    assert_eq!(limiter.acquire(None), Duration::ZERO);
}

#[test]
fn test_unlimited_limiter_never_sleeps() {
    let mut limiter = RateLimiter::new(RateLimits::unlimited());
    let start = Instant::now();
    for _ in 0..100 {
        assert_eq!(limiter.acquire(Some("compute")), Duration::ZERO);
    }
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(limiter.limits().is_unlimited());
}
