//! In-process cache and rate limiter.
//!
//! Suitable for a single process. A deployment sharing state between
//! instances implements [`ResponseCache`] and [`RateLimitStore`] on top of
//! its own storage instead.

pub mod cache;
pub mod limiter;

#[cfg(test)]
pub mod tests;

pub use cache::MemoryCache;
pub use limiter::SlidingWindowLimiter;

use crate::config::ProviderConfig;
use crate::orchestrator::collaborators::{
    MatchKind, RateLimitDecision, RateLimitStore, ResponseCache, Window,
};
use crate::orchestrator::types::{ChatResult, Identity};
use async_trait::async_trait;

#[derive(Debug)]
pub struct MemoryStore {
    pub cache: MemoryCache,
    pub limiter: SlidingWindowLimiter,
}

impl MemoryStore {
    pub fn new(cache: MemoryCache, limiter: SlidingWindowLimiter) -> Self {
        Self { cache, limiter }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            MemoryCache::new(&config.cache_ttls),
            SlidingWindowLimiter::new(config.rate_limits.clone()),
        )
    }
}

#[async_trait]
impl ResponseCache for MemoryStore {
    async fn get(&self, key: &str, kind: MatchKind) -> Option<ChatResult> {
        self.cache.get(key, kind)
    }

    async fn set(&self, key: &str, value: &ChatResult, kind: MatchKind) {
        self.cache.set(key, value, kind)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn check_rate_limit(&self, identity: &Identity) -> RateLimitDecision {
        self.limiter.check(identity)
    }

    async fn increment_query_count(&self, identity: &Identity, window: Window) {
        self.limiter.increment(identity, window)
    }
}
