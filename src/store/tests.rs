use super::*;
use crate::config::{CacheTtls, RateLimits, WindowLimits};
use std::time::Duration;
use uuid::Uuid;

fn result(content: &str) -> ChatResult {
    ChatResult::answer(Uuid::new_v4(), content)
}

fn limits(per_minute: u32, per_day: u32) -> RateLimits {
    RateLimits {
        guest: WindowLimits {
            per_minute,
            per_day,
        },
        authenticated: WindowLimits {
            per_minute: per_minute * 4,
            per_day: per_day * 10,
        },
    }
}

#[tokio::test]
async fn test_exact_cache_uses_trimmed_key() {
    let store = MemoryStore::from_config(&ProviderConfig::default());
    store
        .set("  best tv deals ", &result("cached"), MatchKind::Exact)
        .await;

    let hit = store.get("best tv deals", MatchKind::Exact).await.unwrap();
    assert_eq!(hit.content, "cached");
    assert!(store.get("Best TV deals", MatchKind::Exact).await.is_none());
}

#[tokio::test]
async fn test_semantic_cache_normalizes_phrasing() {
    let store = MemoryStore::from_config(&ProviderConfig::default());
    store
        .set("Best TV deals?", &result("cached"), MatchKind::Semantic)
        .await;

    assert!(store.get("best  tv deals", MatchKind::Semantic).await.is_some());
    assert!(store.get("Best TV deals?", MatchKind::Exact).await.is_none());
}

#[test]
fn test_cache_entries_expire() {
    let cache = MemoryCache::new(&CacheTtls {
        exact_secs: 0,
        ..CacheTtls::default()
    });
    cache.set("hello", &result("hi"), MatchKind::Exact);
    assert!(cache.get("hello", MatchKind::Exact).is_none());
    assert_eq!(cache.len(MatchKind::Exact), 0);
}

#[test]
fn test_cache_evicts_oldest_at_capacity() {
    let cache = MemoryCache::new(&CacheTtls {
        max_entries: 2,
        ..CacheTtls::default()
    });
    cache.set("one", &result("1"), MatchKind::Exact);
    std::thread::sleep(Duration::from_millis(2));
    cache.set("two", &result("2"), MatchKind::Exact);
    std::thread::sleep(Duration::from_millis(2));
    cache.set("three", &result("3"), MatchKind::Exact);

    assert_eq!(cache.len(MatchKind::Exact), 2);
    assert!(cache.get("one", MatchKind::Exact).is_none());
    assert!(cache.get("three", MatchKind::Exact).is_some());
}

#[tokio::test]
async fn test_nth_request_allowed_next_limited() {
    let store = MemoryStore::new(
        MemoryCache::new(&CacheTtls::default()),
        SlidingWindowLimiter::new(limits(3, 100)),
    );
    let guest = Identity::Guest("10.0.0.1".to_string());

    for _ in 0..3 {
        assert!(!store.check_rate_limit(&guest).await.limited);
        store.increment_query_count(&guest, Window::Minute).await;
        store.increment_query_count(&guest, Window::Day).await;
    }

    let decision = store.check_rate_limit(&guest).await;
    assert!(decision.limited);
    assert!(decision.message.unwrap().contains("wait"));
    assert!(decision.retry_after.is_some());
}

#[test]
fn test_check_does_not_consume_quota() {
    let limiter = SlidingWindowLimiter::new(limits(1, 10));
    let guest = Identity::Guest("10.0.0.2".to_string());
    for _ in 0..5 {
        assert!(!limiter.check(&guest).limited);
    }
    assert_eq!(limiter.count(&guest, Window::Minute), 0);
}

#[test]
fn test_daily_limit_suggests_sign_in_for_guests() {
    let limiter = SlidingWindowLimiter::new(limits(100, 2));
    let guest = Identity::Guest("10.0.0.3".to_string());
    limiter.increment(&guest, Window::Day);
    limiter.increment(&guest, Window::Day);

    let decision = limiter.check(&guest);
    assert!(decision.limited);
    assert!(decision.message.unwrap().contains("Sign in"));
}

#[test]
fn test_identity_classes_have_separate_limits() {
    let limiter = SlidingWindowLimiter::new(limits(1, 10));
    let guest = Identity::Guest("shared".to_string());
    let user = Identity::User("shared".to_string());

    limiter.increment(&guest, Window::Minute);
    limiter.increment(&user, Window::Minute);

    assert!(limiter.check(&guest).limited);
    // Authenticated callers get four per minute here.
    assert!(!limiter.check(&user).limited);
}

#[test]
fn test_window_slides() {
    let limiter = SlidingWindowLimiter::with_windows(
        limits(1, 10),
        Duration::from_millis(20),
        Duration::from_secs(60),
    );
    let guest = Identity::Guest("10.0.0.4".to_string());
    limiter.increment(&guest, Window::Minute);
    assert!(limiter.check(&guest).limited);

    std::thread::sleep(Duration::from_millis(30));
    assert!(!limiter.check(&guest).limited);
}

#[test]
fn test_check_does_not_track_unknown_identities() {
    let limiter = SlidingWindowLimiter::new(limits(1, 10));
    for n in 0..50 {
        let guest = Identity::Guest(format!("10.1.0.{}", n));
        assert!(!limiter.check(&guest).limited);
    }
    assert_eq!(limiter.tracked(), 0);
}

#[test]
fn test_expired_identities_are_dropped() {
    let limiter = SlidingWindowLimiter::with_windows(
        limits(1, 10),
        Duration::from_millis(20),
        Duration::from_millis(20),
    );
    let first = Identity::Guest("10.2.0.1".to_string());
    let second = Identity::Guest("10.2.0.2".to_string());
    limiter.increment(&first, Window::Minute);
    limiter.increment(&first, Window::Day);
    limiter.increment(&second, Window::Minute);
    assert_eq!(limiter.tracked(), 2);

    let decision = limiter.check(&first);
    assert!(decision.limited);
    assert!(decision.retry_after.is_some());

    std::thread::sleep(Duration::from_millis(30));
    assert!(!limiter.check(&first).limited);
    assert_eq!(limiter.tracked(), 1);

    limiter.sweep();
    assert_eq!(limiter.tracked(), 0);
}
