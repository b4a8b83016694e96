//! "Who to follow" ranking over the follow graph.
//!
//! ## Algorithm
//!
//! 1. Walk `neighbors(user, 2)` breadth-first
//! 2. Depth-1 nodes are already followed; together with `user` they form the exclusion set
//! 3. Depth-2 nodes outside the exclusion set are candidates
//! 4. Score = number of distinct depth-1 nodes with an edge to the candidate
//! 5. Sort by score desc, then user id asc; truncate to `limit`
//!
//! Scoring reuses the successor lists fetched during the walk, so ranking a
//! user costs one store call per followed account plus one for the user.
//! Only the graph store is consulted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::RecommendationCache;
use crate::store::{EdgeStore, StoreError};
use crate::traversal::Neighbors;
use crate::types::{Recommendation, UserId};

/// Traversal bound for recommendations.
pub const RECOMMENDATION_DEPTH: u32 = 2;

/// Ranks accounts at exactly two hops by mutual-connection count.
pub struct RecommendationEngine<E: EdgeStore + ?Sized> {
    store: Arc<E>,
    cache: Option<Arc<RecommendationCache>>,
}

impl<E: EdgeStore + ?Sized> RecommendationEngine<E> {
    /// Create an engine without caching.
    pub fn new(store: Arc<E>) -> Self {
        Self { store, cache: None }
    }

    /// Create an engine that serves and fills `cache`.
    pub fn with_cache(store: Arc<E>, cache: Arc<RecommendationCache>) -> Self {
        Self {
            store,
            cache: Some(cache),
        }
    }

    /// Ranked recommendations for `user`, at most `limit`.
    ///
    /// Empty when the user follows nobody or every 2-hop account is already
    /// followed.
    pub async fn recommend(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Some(cache) = &self.cache else {
            let mut ranked = self.rank(user).await?;
            ranked.truncate(limit);
            return Ok(ranked);
        };

        if let Some(mut ranked) = cache.get(user) {
            debug!(user_id = %user, "Recommendation cache hit");
            ranked.truncate(limit);
            return Ok(ranked);
        }

        let ticket = cache.ticket();
        let ranked = self.rank(user).await?;
        cache.insert(user, ticket, ranked.clone());

        Ok(ranked.into_iter().take(limit).collect())
    }

    /// Full ranking for `user`, bypassing the cache.
    pub async fn rank(&self, user: UserId) -> Result<Vec<Recommendation>, StoreError> {
        let start = Instant::now();
        let mut walk = Neighbors::new(&*self.store, user, RECOMMENDATION_DEPTH);

        let mut direct: BTreeSet<UserId> = BTreeSet::new();
        let mut candidates: BTreeSet<UserId> = BTreeSet::new();
        while let Some(visit) = walk.next().await? {
            match visit.depth {
                1 => {
                    direct.insert(visit.node);
                }
                2 => {
                    candidates.insert(visit.node);
                }
                _ => {}
            }
        }

        // Exclusion set: the user plus everyone already followed.
        candidates.remove(&user);
        candidates.retain(|c| !direct.contains(c));

        let mut scores: BTreeMap<UserId, u32> = BTreeMap::new();
        for via in &direct {
            let Some(successors) = walk.successors_seen(*via) else {
                continue;
            };
            for candidate in successors {
                if candidates.contains(candidate) {
                    *scores.entry(*candidate).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<Recommendation> = scores
            .into_iter()
            .map(|(user_id, score)| Recommendation::new(user_id, score))
            .collect();
        ranked.sort_by(Recommendation::rank_order);

        debug!(
            user_id = %user,
            direct = direct.len(),
            candidates = ranked.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Ranked recommendations"
        );

        Ok(ranked)
    }

    /// Get the attached cache, if any.
    pub fn cache(&self) -> Option<&Arc<RecommendationCache>> {
        self.cache.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::InMemoryEdgeStore;
    use crate::types::FollowEdge;

    fn uid(id: i64) -> UserId {
        UserId::new(id)
    }

    fn graph(edges: &[(i64, i64)]) -> Arc<InMemoryEdgeStore> {
        Arc::new(InMemoryEdgeStore::with_edges(
            edges
                .iter()
                .map(|(a, b)| FollowEdge::new(uid(*a), uid(*b)).unwrap()),
        ))
    }

    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 3;
    const D: i64 = 4;

    #[tokio::test]
    async fn test_diamond_scores_mutuals() {
        let store = graph(&[(A, B), (A, C), (B, D), (C, D)]);
        let engine = RecommendationEngine::new(store);

        let recs = engine.recommend(uid(A), 10).await.unwrap();

        assert_eq!(recs, vec![Recommendation::new(uid(D), 2)]);
    }

    #[tokio::test]
    async fn test_excludes_self_and_followed() {
        // B follows A back and C; C is already followed by A.
        let store = graph(&[(A, B), (A, C), (B, A), (B, C), (C, D)]);
        let engine = RecommendationEngine::new(store);

        let recs = engine.recommend(uid(A), 10).await.unwrap();

        assert_eq!(recs, vec![Recommendation::new(uid(D), 1)]);
    }

    #[tokio::test]
    async fn test_isolated_user_gets_nothing() {
        let store = graph(&[(B, C)]);
        let engine = RecommendationEngine::new(store);

        assert!(engine.recommend(uid(A), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fully_connected_neighborhood_gets_nothing() {
        let store = graph(&[(A, B), (A, C), (B, C), (C, B)]);
        let engine = RecommendationEngine::new(store);

        assert!(engine.recommend(uid(A), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tie_break_by_id_and_truncate() {
        // A -> B, A -> C; B -> {7, 5}; C -> {5, 6}
        let store = graph(&[(A, B), (A, C), (B, 7), (B, 5), (C, 5), (C, 6)]);
        let engine = RecommendationEngine::new(store);

        let recs = engine.recommend(uid(A), 10).await.unwrap();
        assert_eq!(
            recs,
            vec![
                Recommendation::new(uid(5), 2),
                Recommendation::new(uid(6), 1),
                Recommendation::new(uid(7), 1),
            ]
        );

        let top = engine.recommend(uid(A), 2).await.unwrap();
        assert_eq!(top, recs[..2].to_vec());

        assert!(engine.recommend(uid(A), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deterministic() {
        let store = graph(&[(A, B), (A, C), (B, D), (C, D), (B, 9), (C, 8)]);
        let engine = RecommendationEngine::new(store);

        let first = engine.recommend(uid(A), 10).await.unwrap();
        let second = engine.recommend(uid(A), 10).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cache_serves_without_store_calls() {
        let store = graph(&[(A, B), (B, C)]);
        let cache = Arc::new(RecommendationCache::new(&CacheConfig::default()));
        let engine = RecommendationEngine::with_cache(Arc::clone(&store), Arc::clone(&cache));

        let first = engine.recommend(uid(A), 10).await.unwrap();
        let calls = store.faults().calls();

        let second = engine.recommend(uid(A), 10).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.faults().calls(), calls);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_cache_invalidation_recomputes() {
        let store = graph(&[(A, B), (B, C), (B, D)]);
        let cache = Arc::new(RecommendationCache::new(&CacheConfig::default()));
        let engine = RecommendationEngine::with_cache(Arc::clone(&store), Arc::clone(&cache));

        assert_eq!(engine.recommend(uid(A), 10).await.unwrap().len(), 2);

        store.add_edge(uid(A), uid(C)).await.unwrap();
        cache.invalidate(uid(A));

        let recs = engine.recommend(uid(A), 10).await.unwrap();
        assert_eq!(recs, vec![Recommendation::new(uid(D), 1)]);
    }
}
