//! # social-graph-kernel
//!
//! Dual-store follow graph for a social backend.
//!
//! Follow relationships live twice: as rows in a relational `subscriptions`
//! table (joined against posts to build feeds) and as `FOLLOWS` edges in a
//! graph store (walked to recommend accounts). The kernel answers:
//!
//! > How do both stores stay consistent, and what do users see from them?
//!
//! ## Core Contract
//!
//! 1. Every follow/unfollow goes through [`SyncCoordinator`]: relational first, then graph
//! 2. A graph write that fails is repaired by the [`Reconciler`] within one sweep interval
//! 3. Feeds read only the subscription table; recommendations read only the graph
//!
//! ## Architecture
//!
//! ```text
//! follow/unfollow → SyncCoordinator → SubscriptionTable ─┐
//!                         │         → EdgeStore          │
//!                         ↓                              │
//!                   PendingEdges → Reconciler ───────────┘ (graph repaired from table)
//!
//! feed            → FeedBuilder → SubscriptionTable → PostSource
//! recommendations → RecommendationEngine → Neighbors (BFS over EdgeStore)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Successor lists and traversal order are sorted by `UserId`
//! - Recommendations are ordered by score desc, then user id asc
//! - Feeds are ordered by creation time desc, then post id desc

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod feed;
pub mod recommend;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod sync;
pub mod traversal;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{FollowEdge, InvalidEdge, Post, PostId, Recommendation, User, UserId};
pub use config::{CacheConfig, KernelConfig, RetryPolicy};
pub use store::{
    EdgeStore, InMemoryEdgeStore, InMemoryPostStore, InMemorySubscriptionTable,
    InMemoryUserDirectory, PostSource, StoreError, SubscriptionTable, UserDirectory,
};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresStore};
#[cfg(feature = "neo4j")]
pub use store::{Neo4jConfig, Neo4jEdgeStore};
pub use traversal::{Neighbors, Visit};
pub use sync::{EdgeOp, StoreKind, SyncCoordinator, SyncError, SyncOutcome};
pub use reconcile::{PendingEdges, ReconcileReport, ReconciliationError, Reconciler};
pub use feed::{merge_newest_first, FeedBuilder};
pub use recommend::{RecommendationEngine, RECOMMENDATION_DEPTH};
pub use cache::{CacheStats, RecommendationCache};
pub use retry::with_retry;

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, Backends, ServiceState};
