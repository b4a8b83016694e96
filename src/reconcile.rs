//! Background repair of graph/relational divergence.
//!
//! The subscription table is the source of truth: wherever the two stores
//! disagree, the graph store is changed to match it. Two sweep kinds exist:
//!
//! - [`Reconciler::sweep`] re-checks only the edges recorded in the
//!   [`PendingEdges`] ledger by the sync coordinator
//! - [`Reconciler::full_sweep`] diffs the complete edge sets, for backfills
//!   and recovery after the ledger was lost (e.g. a restart)
//!
//! Edges that cannot be repaired stay in the ledger for the next cycle.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::RecommendationCache;
use crate::store::{EdgeStore, StoreError, SubscriptionTable};
use crate::sync::StoreKind;
use crate::types::FollowEdge;

/// Edges touched by a write since the last sweep.
#[derive(Debug, Default)]
pub struct PendingEdges {
    edges: Mutex<BTreeSet<FollowEdge>>,
}

impl PendingEdges {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge for re-checking.
    pub fn mark(&self, edge: FollowEdge) {
        self.edges.lock().insert(edge);
    }

    /// Take every recorded edge.
    pub fn drain(&self) -> BTreeSet<FollowEdge> {
        std::mem::take(&mut *self.edges.lock())
    }

    /// Put edges back after a failed repair.
    pub fn restore(&self, edges: impl IntoIterator<Item = FollowEdge>) {
        self.edges.lock().extend(edges);
    }

    /// Check whether `edge` is waiting for a sweep.
    pub fn contains(&self, edge: &FollowEdge) -> bool {
        self.edges.lock().contains(edge)
    }

    /// Number of recorded edges.
    pub fn len(&self) -> usize {
        self.edges.lock().len()
    }

    /// Check whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }
}

/// Reconciliation failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconciliationError {
    /// A store could not be read.
    #[error("Failed to read {store} store: {source}")]
    ReadFailed {
        /// Store that failed.
        store: StoreKind,
        /// Underlying error.
        #[source]
        source: StoreError,
    },
    /// The graph store rejected a repair write.
    #[error("Failed to repair {edge} in graph store: {source}")]
    RepairFailed {
        /// Edge being repaired.
        edge: FollowEdge,
        /// Underlying error.
        #[source]
        source: StoreError,
    },
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Edges checked.
    pub examined: usize,
    /// Edges added to the graph store.
    pub added: usize,
    /// Edges removed from the graph store.
    pub removed: usize,
    /// Edges left unrepaired.
    pub failed: usize,
}

impl ReconcileReport {
    /// Check whether the sweep changed anything or hit failures.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.failed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    InSync,
    Added,
    Removed,
}

/// Repairs the graph store from the subscription table.
pub struct Reconciler<E: EdgeStore + ?Sized, T: SubscriptionTable + ?Sized> {
    edges: Arc<E>,
    subscriptions: Arc<T>,
    pending: Arc<PendingEdges>,
    cache: Option<Arc<RecommendationCache>>,
}

impl<E: EdgeStore + ?Sized, T: SubscriptionTable + ?Sized> Reconciler<E, T> {
    /// Create a reconciler over the two stores and a shared ledger.
    pub fn new(
        edges: Arc<E>,
        subscriptions: Arc<T>,
        pending: Arc<PendingEdges>,
        cache: Option<Arc<RecommendationCache>>,
    ) -> Self {
        Self {
            edges,
            subscriptions,
            pending,
            cache,
        }
    }

    /// Ledger this reconciler drains.
    pub fn pending(&self) -> &Arc<PendingEdges> {
        &self.pending
    }

    /// Re-check every edge in the ledger.
    pub async fn sweep(&self) -> ReconcileReport {
        let start = Instant::now();
        let batch = self.pending.drain();
        let mut report = ReconcileReport::default();
        let mut failed = Vec::new();

        for edge in batch {
            report.examined += 1;
            match self.reconcile_edge(edge).await {
                Ok(Repair::InSync) => {}
                Ok(Repair::Added) => report.added += 1,
                Ok(Repair::Removed) => report.removed += 1,
                Err(e) => {
                    warn!(edge = %edge, error = %e, "Edge not reconciled; retrying next cycle");
                    report.failed += 1;
                    failed.push(edge);
                }
            }
        }

        self.pending.restore(failed);

        if report.is_noop() {
            debug!(examined = report.examined, "Reconciliation sweep found no drift");
        } else {
            info!(
                examined = report.examined,
                added = report.added,
                removed = report.removed,
                failed = report.failed,
                latency_ms = start.elapsed().as_millis() as u64,
                "Reconciliation sweep complete"
            );
        }

        report
    }

    /// Diff both stores in full and repair every difference.
    ///
    /// Fails only if either store cannot be listed; individual repair
    /// failures are counted and queued in the ledger.
    pub async fn full_sweep(&self) -> Result<ReconcileReport, ReconciliationError> {
        let start = Instant::now();

        let relational = self
            .subscriptions
            .all_edges()
            .await
            .map_err(|source| ReconciliationError::ReadFailed {
                store: StoreKind::Relational,
                source,
            })?;
        let graph = self
            .edges
            .all_edges()
            .await
            .map_err(|source| ReconciliationError::ReadFailed {
                store: StoreKind::Graph,
                source,
            })?;

        let mut report = ReconcileReport {
            examined: relational.union(&graph).count(),
            ..ReconcileReport::default()
        };

        for edge in relational.difference(&graph) {
            match self.edges.add_edge(edge.follower, edge.followee).await {
                Ok(()) => {
                    report.added += 1;
                    self.invalidate(edge);
                }
                Err(e) => {
                    warn!(edge = %edge, error = %e, "Failed to add missing graph edge");
                    report.failed += 1;
                    self.pending.mark(*edge);
                }
            }
        }

        for edge in graph.difference(&relational) {
            match self.edges.remove_edge(edge.follower, edge.followee).await {
                Ok(()) => {
                    report.removed += 1;
                    self.invalidate(edge);
                }
                Err(e) => {
                    warn!(edge = %edge, error = %e, "Failed to remove orphaned graph edge");
                    report.failed += 1;
                    self.pending.mark(*edge);
                }
            }
        }

        info!(
            examined = report.examined,
            added = report.added,
            removed = report.removed,
            failed = report.failed,
            latency_ms = start.elapsed().as_millis() as u64,
            "Full reconciliation complete"
        );

        Ok(report)
    }

    async fn reconcile_edge(&self, edge: FollowEdge) -> Result<Repair, ReconciliationError> {
        let FollowEdge { follower, followee } = edge;

        let wanted = self
            .subscriptions
            .contains(follower, followee)
            .await
            .map_err(|source| ReconciliationError::ReadFailed {
                store: StoreKind::Relational,
                source,
            })?;
        let present = self
            .edges
            .has_edge(follower, followee)
            .await
            .map_err(|source| ReconciliationError::ReadFailed {
                store: StoreKind::Graph,
                source,
            })?;

        let repair = match (wanted, present) {
            (true, false) => {
                self.edges
                    .add_edge(follower, followee)
                    .await
                    .map_err(|source| ReconciliationError::RepairFailed { edge, source })?;
                Repair::Added
            }
            (false, true) => {
                self.edges
                    .remove_edge(follower, followee)
                    .await
                    .map_err(|source| ReconciliationError::RepairFailed { edge, source })?;
                Repair::Removed
            }
            _ => Repair::InSync,
        };

        if repair != Repair::InSync {
            self.invalidate(&edge);
        }
        Ok(repair)
    }

    fn invalidate(&self, edge: &FollowEdge) {
        if let Some(cache) = &self.cache {
            cache.invalidate(edge.follower);
        }
    }
}

impl<E, T> Reconciler<E, T>
where
    E: EdgeStore + ?Sized + 'static,
    T: SubscriptionTable + ?Sized + 'static,
{
    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` flips to `true`.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let period = interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;

            info!(interval_ms = period.as_millis() as u64, "Reconciler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(pending = self.pending.len(), "Reconciler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::{InMemoryEdgeStore, InMemorySubscriptionTable};
    use crate::types::{Recommendation, UserId};

    fn edge(a: i64, b: i64) -> FollowEdge {
        FollowEdge::new(UserId::new(a), UserId::new(b)).unwrap()
    }

    fn setup() -> (
        Arc<InMemoryEdgeStore>,
        Arc<InMemorySubscriptionTable>,
        Reconciler<InMemoryEdgeStore, InMemorySubscriptionTable>,
    ) {
        let edges = Arc::new(InMemoryEdgeStore::new());
        let subs = Arc::new(InMemorySubscriptionTable::new());
        let reconciler = Reconciler::new(
            Arc::clone(&edges),
            Arc::clone(&subs),
            Arc::new(PendingEdges::new()),
            None,
        );
        (edges, subs, reconciler)
    }

    #[test]
    fn test_pending_ledger() {
        let pending = PendingEdges::new();
        pending.mark(edge(1, 2));
        pending.mark(edge(1, 2));
        pending.mark(edge(3, 4));
        assert_eq!(pending.len(), 2);

        let drained = pending.drain();
        assert_eq!(drained.len(), 2);
        assert!(pending.is_empty());

        pending.restore(drained);
        assert!(pending.contains(&edge(3, 4)));
    }

    #[tokio::test]
    async fn test_sweep_adds_missing_graph_edge() {
        let (edges, subs, reconciler) = setup();
        subs.seed(edge(1, 2));
        reconciler.pending().mark(edge(1, 2));

        let report = reconciler.sweep().await;

        assert_eq!(report.added, 1);
        assert!(edges.has_edge(UserId::new(1), UserId::new(2)).await.unwrap());
        assert!(reconciler.pending().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_orphaned_graph_edge() {
        let (edges, _subs, reconciler) = setup();
        edges.seed(edge(1, 2));
        reconciler.pending().mark(edge(1, 2));

        let report = reconciler.sweep().await;

        assert_eq!(report.removed, 1);
        assert_eq!(edges.num_edges(), 0);
    }

    #[tokio::test]
    async fn test_sweep_in_sync_is_noop() {
        let (edges, subs, reconciler) = setup();
        subs.seed(edge(1, 2));
        edges.seed(edge(1, 2));
        reconciler.pending().mark(edge(1, 2));

        let report = reconciler.sweep().await;

        assert_eq!(report.examined, 1);
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn test_failed_repair_stays_pending() {
        let (edges, subs, reconciler) = setup();
        subs.seed(edge(1, 2));
        reconciler.pending().mark(edge(1, 2));
        edges.faults().set_offline(true);

        let report = reconciler.sweep().await;
        assert_eq!(report.failed, 1);
        assert!(reconciler.pending().contains(&edge(1, 2)));

        edges.faults().set_offline(false);
        let report = reconciler.sweep().await;
        assert_eq!(report.added, 1);
        assert!(reconciler.pending().is_empty());
    }

    #[tokio::test]
    async fn test_full_sweep_converges() {
        let (edges, subs, reconciler) = setup();
        subs.seed(edge(1, 2));
        subs.seed(edge(2, 3));
        edges.seed(edge(2, 3));
        edges.seed(edge(3, 1));

        let report = reconciler.full_sweep().await.unwrap();

        assert_eq!(report.examined, 3);
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(
            edges.all_edges().await.unwrap(),
            subs.all_edges().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_full_sweep_read_failure() {
        let (_edges, subs, reconciler) = setup();
        subs.faults().set_offline(true);

        let err = reconciler.full_sweep().await.unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::ReadFailed { store: StoreKind::Relational, .. }
        ));
    }

    #[tokio::test]
    async fn test_repair_invalidates_cache() {
        let edges = Arc::new(InMemoryEdgeStore::new());
        let subs = Arc::new(InMemorySubscriptionTable::new());
        let cache = Arc::new(RecommendationCache::new(&CacheConfig::default()));
        let reconciler = Reconciler::new(
            Arc::clone(&edges),
            Arc::clone(&subs),
            Arc::new(PendingEdges::new()),
            Some(Arc::clone(&cache)),
        );

        let user = UserId::new(1);
        cache.insert(user, cache.ticket(), vec![Recommendation::new(UserId::new(9), 1)]);
        subs.seed(edge(1, 2));
        reconciler.pending().mark(edge(1, 2));

        reconciler.sweep().await;

        assert!(cache.get(user).is_none());
    }

    #[tokio::test]
    async fn test_spawned_loop_repairs_and_stops() {
        let (edges, subs, reconciler) = setup();
        subs.seed(edge(1, 2));
        reconciler.pending().mark(edge(1, 2));

        let (tx, rx) = watch::channel(false);
        let handle = Arc::new(reconciler).spawn(Duration::from_millis(10), rx);

        for _ in 0..100 {
            if edges.num_edges() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(edges.num_edges(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
