//! Service state management.
//!
//! Stores are held as trait objects so one binary can run against
//! PostgreSQL + Neo4j or the in-memory backend.

use std::sync::Arc;

use crate::cache::RecommendationCache;
use crate::config::KernelConfig;
use crate::feed::FeedBuilder;
use crate::reconcile::Reconciler;
use crate::recommend::RecommendationEngine;
use crate::store::{
    EdgeStore, InMemoryEdgeStore, InMemoryPostStore, InMemorySubscriptionTable,
    InMemoryUserDirectory, PostSource, SubscriptionTable, UserDirectory,
};
use crate::sync::SyncCoordinator;

/// Coordinator over dynamically dispatched stores.
pub type DynCoordinator = SyncCoordinator<dyn EdgeStore, dyn SubscriptionTable>;
/// Reconciler over dynamically dispatched stores.
pub type DynReconciler = Reconciler<dyn EdgeStore, dyn SubscriptionTable>;
/// Feed builder over dynamically dispatched stores.
pub type DynFeedBuilder = FeedBuilder<dyn SubscriptionTable, dyn PostSource>;
/// Recommendation engine over a dynamically dispatched graph store.
pub type DynRecommendationEngine = RecommendationEngine<dyn EdgeStore>;

/// The four store handles the service runs against.
#[derive(Clone)]
pub struct Backends {
    /// Graph store.
    pub edges: Arc<dyn EdgeStore>,
    /// Subscription table.
    pub subscriptions: Arc<dyn SubscriptionTable>,
    /// Post collection.
    pub posts: Arc<dyn PostSource>,
    /// Username lookups.
    pub users: Arc<dyn UserDirectory>,
    /// Backend name reported by `/health`.
    pub name: &'static str,
}

impl Backends {
    /// Fresh, empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            edges: Arc::new(InMemoryEdgeStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionTable::new()),
            posts: Arc::new(InMemoryPostStore::new()),
            users: Arc::new(InMemoryUserDirectory::new()),
            name: "memory",
        }
    }
}

/// Shared service state.
///
/// Every component shares the same store handles; the coordinator and the
/// reconciler also share the pending-edge ledger and the recommendation cache.
#[derive(Clone)]
pub struct ServiceState {
    /// Store handles.
    pub backends: Backends,
    /// Sole writer of follow edges.
    pub coordinator: Arc<DynCoordinator>,
    /// Graph repair from the subscription table.
    pub reconciler: Arc<DynReconciler>,
    /// Feed assembly.
    pub feed: Arc<DynFeedBuilder>,
    /// "Who to follow" ranking.
    pub recommender: Arc<DynRecommendationEngine>,
    /// Runtime configuration.
    pub config: KernelConfig,
}

impl ServiceState {
    /// Wire every component over `backends`.
    pub fn new(backends: Backends, config: KernelConfig) -> Self {
        let cache = RecommendationCache::from_config(&config.cache).map(Arc::new);

        let mut coordinator = SyncCoordinator::new(
            Arc::clone(&backends.edges),
            Arc::clone(&backends.subscriptions),
            config.retry.clone(),
        );
        let recommender = match &cache {
            Some(cache) => {
                coordinator = coordinator.with_cache(Arc::clone(cache));
                RecommendationEngine::with_cache(Arc::clone(&backends.edges), Arc::clone(cache))
            }
            None => RecommendationEngine::new(Arc::clone(&backends.edges)),
        };
        let reconciler = coordinator.reconciler();
        let feed = FeedBuilder::new(
            Arc::clone(&backends.subscriptions),
            Arc::clone(&backends.posts),
        );

        Self {
            backends,
            coordinator: Arc::new(coordinator),
            reconciler: Arc::new(reconciler),
            feed: Arc::new(feed),
            recommender: Arc::new(recommender),
            config,
        }
    }

    /// State over fresh in-memory stores with default configuration.
    pub fn in_memory() -> Self {
        Self::new(Backends::in_memory(), KernelConfig::default())
    }
}
