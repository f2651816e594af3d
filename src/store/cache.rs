use crate::config::CacheTtls;
use crate::orchestrator::collaborators::MatchKind;
use crate::orchestrator::types::ChatResult;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ChatResult,
    inserted_at: Instant,
}

/// TTL cache of chat results with a capacity bound.
///
/// Exact keys are the trimmed message. Semantic keys are normalized
/// (lower-cased, punctuation dropped, whitespace collapsed) so near-identical
/// phrasings share an entry; this stands in for embedding similarity.
#[derive(Debug)]
pub struct MemoryCache {
    exact: DashMap<String, CacheEntry>,
    semantic: DashMap<String, CacheEntry>,
    exact_ttl: Duration,
    semantic_ttl: Duration,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(ttls: &CacheTtls) -> Self {
        Self {
            exact: DashMap::new(),
            semantic: DashMap::new(),
            exact_ttl: ttls.exact(),
            semantic_ttl: ttls.semantic(),
            max_entries: ttls.max_entries.max(1),
        }
    }

    fn table(&self, kind: MatchKind) -> (&DashMap<String, CacheEntry>, Duration) {
        match kind {
            MatchKind::Exact => (&self.exact, self.exact_ttl),
            MatchKind::Semantic => (&self.semantic, self.semantic_ttl),
        }
    }

    pub fn normalize(key: &str, kind: MatchKind) -> String {
        match kind {
            MatchKind::Exact => key.trim().to_string(),
            MatchKind::Semantic => key
                .to_lowercase()
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { ' ' })
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn get(&self, key: &str, kind: MatchKind) -> Option<ChatResult> {
        let (table, ttl) = self.table(kind);
        let key = Self::normalize(key, kind);

        let expired = match table.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            table.remove(&key);
        }
        None
    }

    pub fn set(&self, key: &str, value: &ChatResult, kind: MatchKind) {
        let (table, ttl) = self.table(kind);
        let key = Self::normalize(key, kind);

        if !table.contains_key(&key) && table.len() >= self.max_entries {
            table.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
            if table.len() >= self.max_entries {
                let oldest = table
                    .iter()
                    .min_by_key(|entry| entry.inserted_at)
                    .map(|entry| entry.key().clone());
                if let Some(oldest) = oldest {
                    tracing::debug!("Evicting cache entry {:?}", oldest);
                    table.remove(&oldest);
                }
            }
        }

        table.insert(
            key,
            CacheEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self, kind: MatchKind) -> usize {
        self.table(kind).0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.semantic.is_empty()
    }
}
