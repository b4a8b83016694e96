//! Dual-store write coordination for follow edges.
//!
//! ## Protocol
//!
//! 1. Reject self-follows before touching any store
//! 2. Record the edge in the pending ledger, then write the subscription
//!    table (retried on transient failure). A failure here aborts the
//!    operation; the edge stays queued because a lost acknowledgement can
//!    hide a committed row
//! 3. Write the graph store (retried likewise). A failure here is
//!    compensatable: the relational write stands and the edge waits in the
//!    pending ledger for the next reconciliation sweep
//! 4. Record the edge in the ledger again and invalidate the follower's
//!    cached recommendations
//!
//! The relational side goes first because it drives feed correctness; graph
//! freshness only affects recommendation quality.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::RecommendationCache;
use crate::config::RetryPolicy;
use crate::reconcile::{PendingEdges, Reconciler};
use crate::retry::with_retry;
use crate::store::{EdgeStore, StoreError, SubscriptionTable};
use crate::types::{FollowEdge, InvalidEdge, UserId};

/// Which of the two edge stores an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// The subscription table.
    Relational,
    /// The graph store.
    Graph,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relational => write!(f, "relational"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// Failure of a logical follow/unfollow.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Self-follow attempt. Never retried.
    #[error(transparent)]
    InvalidEdge(#[from] InvalidEdge),
    /// One side of the dual write failed.
    #[error("{store} store write failed (compensatable: {compensatable}): {source}")]
    SyncFailed {
        /// Store whose write failed.
        store: StoreKind,
        /// Whether reconciliation will repair it.
        compensatable: bool,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    /// Whether the operation partially happened and will be repaired.
    pub fn is_compensatable(&self) -> bool {
        matches!(self, Self::SyncFailed { compensatable: true, .. })
    }
}

/// Result of a follow/unfollow that reached the subscription table.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Both stores hold the new state.
    Applied,
    /// The subscription table holds the new state; the graph write failed
    /// and the edge is queued for reconciliation.
    PendingReconciliation(SyncError),
}

impl SyncOutcome {
    /// Whether the graph side still needs repair.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingReconciliation(_))
    }
}

/// Kind of edge mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOp {
    /// Create the edge.
    Follow,
    /// Remove the edge.
    Unfollow,
}

impl fmt::Display for EdgeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follow => write!(f, "follow"),
            Self::Unfollow => write!(f, "unfollow"),
        }
    }
}

/// Sole writer of follow edges across both stores.
pub struct SyncCoordinator<E: EdgeStore + ?Sized, T: SubscriptionTable + ?Sized> {
    edges: Arc<E>,
    subscriptions: Arc<T>,
    pending: Arc<PendingEdges>,
    retry: RetryPolicy,
    cache: Option<Arc<RecommendationCache>>,
}

impl<E: EdgeStore + ?Sized, T: SubscriptionTable + ?Sized> SyncCoordinator<E, T> {
    /// Create a coordinator over the two stores.
    pub fn new(edges: Arc<E>, subscriptions: Arc<T>, retry: RetryPolicy) -> Self {
        Self {
            edges,
            subscriptions,
            pending: Arc::new(PendingEdges::new()),
            retry,
            cache: None,
        }
    }

    /// Invalidate entries in `cache` when a follower's edges change.
    pub fn with_cache(mut self, cache: Arc<RecommendationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Make `follower` follow `followee` in both stores.
    pub async fn follow(&self, follower: UserId, followee: UserId) -> Result<SyncOutcome, SyncError> {
        self.apply(EdgeOp::Follow, follower, followee).await
    }

    /// Remove `follower -> followee` from both stores. Absent edges are a no-op.
    pub async fn unfollow(&self, follower: UserId, followee: UserId) -> Result<SyncOutcome, SyncError> {
        self.apply(EdgeOp::Unfollow, follower, followee).await
    }

    async fn apply(
        &self,
        op: EdgeOp,
        follower: UserId,
        followee: UserId,
    ) -> Result<SyncOutcome, SyncError> {
        let edge = FollowEdge::new(follower, followee)?;

        // Marked before any store call: the relational write may commit even
        // when its acknowledgement is lost or this future is dropped.
        // Sweeping an edge the stores already agree on is a no-op.
        self.pending.mark(edge);

        let relational = match op {
            EdgeOp::Follow => {
                with_retry(&self.retry, "subscriptions.insert", || {
                    self.subscriptions.insert(follower, followee)
                })
                .await
            }
            EdgeOp::Unfollow => {
                with_retry(&self.retry, "subscriptions.delete", || {
                    self.subscriptions.delete(follower, followee)
                })
                .await
            }
        };

        if let Err(source) = relational {
            warn!(
                op = %op,
                follower = %follower,
                followee = %followee,
                error = %source,
                "Relational write failed; operation aborted, edge left for the next sweep"
            );
            return Err(SyncError::SyncFailed {
                store: StoreKind::Relational,
                compensatable: false,
                source,
            });
        }

        // A sweep may have drained the first mark while the relational
        // write was in flight.
        self.pending.mark(edge);

        let graph = match op {
            EdgeOp::Follow => {
                with_retry(&self.retry, "edges.add_edge", || {
                    self.edges.add_edge(follower, followee)
                })
                .await
            }
            EdgeOp::Unfollow => {
                with_retry(&self.retry, "edges.remove_edge", || {
                    self.edges.remove_edge(follower, followee)
                })
                .await
            }
        };

        // Marked again: a sweep may have drained it mid-write, and concurrent
        // follow/unfollow on one pair can interleave across the two stores.
        self.pending.mark(edge);
        if let Some(cache) = &self.cache {
            cache.invalidate(follower);
        }

        match graph {
            Ok(()) => {
                debug!(op = %op, edge = %edge, "Edge synced to both stores");
                Ok(SyncOutcome::Applied)
            }
            Err(source) => {
                warn!(
                    op = %op,
                    edge = %edge,
                    error = %source,
                    "Graph write failed; edge queued for reconciliation"
                );
                Ok(SyncOutcome::PendingReconciliation(SyncError::SyncFailed {
                    store: StoreKind::Graph,
                    compensatable: true,
                    source,
                }))
            }
        }
    }

    /// Reconciler sharing this coordinator's stores, ledger and cache.
    pub fn reconciler(&self) -> Reconciler<E, T> {
        Reconciler::new(
            Arc::clone(&self.edges),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.pending),
            self.cache.clone(),
        )
    }

    /// Edges touched since the last sweep.
    pub fn pending(&self) -> &Arc<PendingEdges> {
        &self.pending
    }
}
