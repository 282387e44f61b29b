// ABOUTME: Candidate pool builder querying the nutrition lookup per category under exclusions
// ABOUTME: TTL-cached by diet key and sorted exclusion terms, with an injectable clock
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Candidate Pool Builder and Cache
//!
//! Builds per-category ingredient candidate pools by searching the nutrition
//! lookup with representative terms, dropping candidates that match the
//! exclusion list. Pools are cached by (diet key, joined sorted exclusion
//! terms) with a TTL; a fresh entry is returned as-is, a stale one is rebuilt
//! synchronously and overwritten. The cache is advisory: concurrent rebuilds
//! for the same key race with last-writer-wins semantics.

use futures_util::future::try_join_all;
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::AppResult;
use crate::models::{IngredientCandidate, PoolMetrics};
use crate::nutrition::NutritionLookup;

/// Representative search terms per pool category
///
/// Terms are Dutch, matching the nutrition database's naming.
pub const CATEGORY_SEARCH_TERMS: &[(&str, &[&str])] = &[
    ("proteins", &["kip", "rund", "vis", "tofu", "ei"]),
    ("vegetables", &["broccoli", "spinazie", "paprika", "wortel", "courgette"]),
    ("carbs", &["rijst", "aardappel", "pasta", "brood", "havermout"]),
    ("fruit", &["appel", "banaan", "aardbei", "sinaasappel"]),
    ("dairy", &["yoghurt", "kwark", "melk"]),
    ("fats", &["olijfolie", "avocado", "noten"]),
];

/// Per-category candidate pools eligible under a diet and exclusion set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePool {
    /// Candidates per category, deduplicated by code
    pub categories: BTreeMap<String, Vec<IngredientCandidate>>,
}

impl CandidatePool {
    /// Candidates for one category, empty when the category is unknown
    #[must_use]
    pub fn category(&self, name: &str) -> &[IngredientCandidate] {
        self.categories.get(name).map_or(&[], Vec::as_slice)
    }

    /// Advisory metrics for response metadata
    #[must_use]
    pub fn metrics(&self, cache_hit: bool) -> PoolMetrics {
        PoolMetrics {
            cache_hit,
            category_counts: self
                .categories
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
        }
    }

}

/// Case-insensitive substring match against a term list
#[must_use]
pub fn matches_any_term(name: &str, terms: &[String]) -> bool {
    let lowered = name.to_lowercase();
    terms.iter().any(|term| lowered.contains(term.as_str()))
}

/// Injectable time source, so tests can verify eviction deterministically
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall-clock implementation used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct PoolEntry {
    pool: CandidatePool,
    built_at: Instant,
}

/// Candidate pool builder with TTL cache
pub struct CandidatePoolBuilder {
    lookup: Arc<dyn NutritionLookup>,
    clock: Arc<dyn Clock>,
    cache: RwLock<LruCache<String, PoolEntry>>,
    ttl: Duration,
    search_limit: u32,
}

impl CandidatePoolBuilder {
    /// Default cache capacity when the configured entry count is zero
    const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
        Some(n) => n,
        None => unreachable!(),
    };

    /// Create a builder over the given lookup
    #[must_use]
    pub fn new(
        lookup: Arc<dyn NutritionLookup>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        max_entries: usize,
        search_limit: u32,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(Self::DEFAULT_CACHE_CAPACITY);
        Self {
            lookup,
            clock,
            cache: RwLock::new(LruCache::new(capacity)),
            ttl,
            search_limit,
        }
    }

    /// Return the pool for the given diet key and exclusion terms
    ///
    /// The boolean reports whether a fresh cache entry was used. Exclusion
    /// terms are expected lowercase; the key joins them sorted so equivalent
    /// requests share an entry.
    ///
    /// # Errors
    ///
    /// Propagates nutrition lookup failures from a rebuild.
    pub async fn pool_for(
        &self,
        diet_key: &str,
        exclusion_terms: &[String],
    ) -> AppResult<(CandidatePool, bool)> {
        let key = Self::cache_key(diet_key, exclusion_terms);

        {
            let mut cache = self.cache.write().await;
            if let Some(entry) = cache.get(&key) {
                if self.clock.now().duration_since(entry.built_at) < self.ttl {
                    debug!("candidate pool cache hit for {key}");
                    return Ok((entry.pool.clone(), true));
                }
                // Stale: rebuilt below and overwritten, no partial invalidation
                cache.pop(&key);
            }
        }

        debug!("building candidate pool for {key}");
        let pool = self.build(exclusion_terms).await?;

        let mut cache = self.cache.write().await;
        cache.put(
            key,
            PoolEntry {
                pool: pool.clone(),
                built_at: self.clock.now(),
            },
        );
        Ok((pool, false))
    }

    fn cache_key(diet_key: &str, exclusion_terms: &[String]) -> String {
        let mut terms = exclusion_terms.to_vec();
        terms.sort_unstable();
        format!("{diet_key}|{}", terms.join(","))
    }

    /// Build the pool: concurrent category searches, exclusion filtering,
    /// dedup by code for multi-term categories
    async fn build(&self, exclusion_terms: &[String]) -> AppResult<CandidatePool> {
        let searches = CATEGORY_SEARCH_TERMS.iter().flat_map(|(category, terms)| {
            terms
                .iter()
                .map(move |term| async move {
                    let candidates = self.lookup.search(term, self.search_limit).await?;
                    Ok::<_, crate::errors::AppError>((*category, candidates))
                })
        });

        let results = try_join_all(searches).await?;

        let mut categories: BTreeMap<String, Vec<IngredientCandidate>> = BTreeMap::new();
        for (category, candidates) in results {
            let bucket = categories.entry(category.to_owned()).or_default();
            for candidate in candidates {
                if matches_any_term(&candidate.name, exclusion_terms) {
                    continue;
                }
                if bucket.iter().any(|existing| existing.code == candidate.code) {
                    continue;
                }
                bucket.push(candidate);
            }
        }

        Ok(CandidatePool { categories })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::MacroSummary;
    use crate::nutrition::InMemoryNutritionLookup;
    use std::sync::Mutex;

    /// Test clock advanced manually
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn seeded_lookup() -> Arc<InMemoryNutritionLookup> {
        let mut lookup = InMemoryNutritionLookup::new();
        for (code, name, tag) in [
            ("nevo-1", "Kipfilet", "proteins"),
            ("nevo-2", "Pindakaas", "fats"),
            ("nevo-3", "Broccoli", "vegetables"),
            ("nevo-4", "Zilvervliesrijst", "carbs"),
        ] {
            lookup.insert(InMemoryNutritionLookup::record(
                code,
                name,
                &[tag],
                MacroSummary::default(),
            ));
        }
        Arc::new(lookup)
    }

    fn builder(clock: Arc<dyn Clock>) -> CandidatePoolBuilder {
        CandidatePoolBuilder::new(seeded_lookup(), clock, Duration::from_secs(600), 8, 20)
    }

    #[tokio::test]
    async fn excluded_terms_never_enter_the_pool() {
        let builder = builder(Arc::new(SystemClock));
        let (pool, _) = builder
            .pool_for("standaard", &["pinda".into()])
            .await
            .unwrap();
        let all: Vec<&IngredientCandidate> =
            pool.categories.values().flatten().collect();
        assert!(all.iter().all(|c| !c.name.to_lowercase().contains("pinda")));
        assert!(all.iter().any(|c| c.name == "Kipfilet"));
    }

    #[tokio::test]
    async fn fresh_entries_hit_and_stale_entries_rebuild() {
        let clock = Arc::new(ManualClock::new());
        let builder = builder(clock.clone());

        let (_, hit) = builder.pool_for("standaard", &[]).await.unwrap();
        assert!(!hit);
        let (_, hit) = builder.pool_for("standaard", &[]).await.unwrap();
        assert!(hit);

        clock.advance(Duration::from_secs(601));
        let (_, hit) = builder.pool_for("standaard", &[]).await.unwrap();
        assert!(!hit, "expired entry must rebuild");
    }

    #[tokio::test]
    async fn cache_key_ignores_exclusion_order() {
        let builder = builder(Arc::new(SystemClock));
        let (_, hit) = builder
            .pool_for("standaard", &["b".into(), "a".into()])
            .await
            .unwrap();
        assert!(!hit);
        let (_, hit) = builder
            .pool_for("standaard", &["a".into(), "b".into()])
            .await
            .unwrap();
        assert!(hit);
    }

}
