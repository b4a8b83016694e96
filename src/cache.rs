//! Short-lived cache of ranked recommendations.
//!
//! Entries hold the full ranked list for a user so any `limit` can be served
//! from one computation. An entry is dropped eagerly when its user's
//! outbound edges change and otherwise expires after the configured TTL.
//!
//! Each invalidation stamps its user with a fresh epoch. A computation takes
//! a ticket before reading the graph and its result is only stored if that
//! user was not invalidated in between, so a slow read cannot resurrect
//! stale data. Other users' invalidations do not affect it.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::types::{Recommendation, UserId};

/// Invalidation stamps kept per cached entry slot.
const INVALIDATION_LOG_FACTOR: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

#[derive(Debug, Clone)]
struct CachedRanking {
    ranked: Vec<Recommendation>,
    inserted_at: Instant,
}

struct CacheState {
    entries: LruCache<UserId, CachedRanking>,
    /// Epoch of each user's latest invalidation.
    invalidated: LruCache<UserId, u64>,
    /// Tickets older than this are rejected for every user. Raised by
    /// `clear` and when a stamp falls out of the log.
    floor: u64,
}

impl CacheState {
    fn accepts(&self, user: UserId, ticket: CacheTicket) -> bool {
        if self.floor > ticket.0 {
            return false;
        }
        self.invalidated
            .peek(&user)
            .map_or(true, |&stamp| stamp <= ticket.0)
    }
}

/// Epoch observed before computing a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket(u64);

/// Per-user TTL cache of recommendation rankings.
pub struct RecommendationCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RecommendationCache {
    /// Create a cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let size = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(size),
                invalidated: LruCache::new(size.saturating_mul(INVALIDATION_LOG_FACTOR)),
                floor: 0,
            }),
            ttl: config.ttl,
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a cache only if configuration enables it.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config))
    }

    /// Take a ticket before reading the graph.
    pub fn ticket(&self) -> CacheTicket {
        CacheTicket(self.epoch.load(Ordering::SeqCst))
    }

    /// Fresh ranking for `user`, if cached.
    pub fn get(&self, user: UserId) -> Option<Vec<Recommendation>> {
        let mut state = self.state.lock();

        let fresh = match state.entries.get(&user) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.ranked.clone()),
            Some(_) => {
                state.entries.pop(&user);
                None
            }
            None => None,
        };

        let counter = if fresh.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    /// Store a ranking unless `user` was invalidated after `ticket` was taken.
    ///
    /// Returns whether the entry was stored.
    pub fn insert(&self, user: UserId, ticket: CacheTicket, ranked: Vec<Recommendation>) -> bool {
        let mut state = self.state.lock();
        if !state.accepts(user, ticket) {
            return false;
        }
        state.entries.put(
            user,
            CachedRanking {
                ranked,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    /// Drop the entry for `user` after its outbound edges changed.
    pub fn invalidate(&self, user: UserId) {
        let mut state = self.state.lock();
        let stamp = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        state.entries.pop(&user);
        if let Some((evicted, old)) = state.invalidated.push(user, stamp) {
            if evicted != user {
                state.floor = state.floor.max(old);
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let stamp = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        state.entries.clear();
        state.invalidated.clear();
        state.floor = stamp;
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            len: state.entries.len(),
            cap: state.entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
    /// Lookups served from cache.
    pub hits: u64,
    /// Lookups that missed or found an expired entry.
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking(ids: &[i64]) -> Vec<Recommendation> {
        ids.iter()
            .map(|id| Recommendation::new(UserId::new(*id), 1))
            .collect()
    }

    fn config(ttl: Duration) -> CacheConfig {
        CacheConfig {
            max_entries: 4,
            ttl,
            enabled: true,
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = RecommendationCache::new(&config(Duration::from_secs(60)));
        let user = UserId::new(1);

        assert!(cache.get(user).is_none());

        let ticket = cache.ticket();
        assert!(cache.insert(user, ticket, ranking(&[2, 3])));
        assert_eq!(cache.get(user).unwrap(), ranking(&[2, 3]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
        assert_eq!(stats.cap, 4);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = RecommendationCache::new(&config(Duration::ZERO));
        let user = UserId::new(1);

        cache.insert(user, cache.ticket(), ranking(&[2]));
        assert!(cache.get(user).is_none());
        assert_eq!(cache.stats().len, 0);
    }

    #[test]
    fn test_invalidate_drops_entry() {
        let cache = RecommendationCache::new(&config(Duration::from_secs(60)));
        let user = UserId::new(1);

        cache.insert(user, cache.ticket(), ranking(&[2]));
        cache.invalidate(user);
        assert!(cache.get(user).is_none());
    }

    #[test]
    fn test_stale_ticket_rejected() {
        let cache = RecommendationCache::new(&config(Duration::from_secs(60)));
        let user = UserId::new(1);

        let ticket = cache.ticket();
        cache.invalidate(user);

        assert!(!cache.insert(user, ticket, ranking(&[2])));
        assert!(cache.get(user).is_none());
    }

    #[test]
    fn test_other_users_invalidation_keeps_ticket_valid() {
        let cache = RecommendationCache::new(&config(Duration::from_secs(60)));

        let ticket = cache.ticket();
        cache.invalidate(UserId::new(2));

        assert!(cache.insert(UserId::new(1), ticket, ranking(&[3])));
        assert_eq!(cache.get(UserId::new(1)).unwrap(), ranking(&[3]));
    }

    #[test]
    fn test_ticket_taken_after_invalidation_accepted() {
        let cache = RecommendationCache::new(&config(Duration::from_secs(60)));
        let user = UserId::new(1);

        cache.invalidate(user);
        let ticket = cache.ticket();

        assert!(cache.insert(user, ticket, ranking(&[2])));
    }

    #[test]
    fn test_clear_rejects_outstanding_tickets() {
        let cache = RecommendationCache::new(&config(Duration::from_secs(60)));

        let ticket = cache.ticket();
        cache.clear();

        assert!(!cache.insert(UserId::new(1), ticket, ranking(&[2])));
        assert!(cache.insert(UserId::new(1), cache.ticket(), ranking(&[2])));
    }

    #[test]
    fn test_overflowing_invalidation_log_rejects_older_tickets() {
        let cache = RecommendationCache::new(&CacheConfig {
            max_entries: 1,
            ttl: Duration::from_secs(60),
            enabled: true,
        });
        let user = UserId::new(1);

        let ticket = cache.ticket();
        // Log holds 4 stamps; the fifth evicts user 10's, which is newer
        // than the ticket.
        for other in 10..15 {
            cache.invalidate(UserId::new(other));
        }

        assert!(!cache.insert(user, ticket, ranking(&[2])));
        assert!(cache.insert(user, cache.ticket(), ranking(&[2])));
    }

    #[test]
    fn test_disabled_config() {
        let disabled = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        assert!(RecommendationCache::from_config(&disabled).is_none());
    }
}
