//! Bounded breadth-first traversal over follow edges.
//!
//! [`Neighbors`] is a pull-based cursor: each call to [`Neighbors::next`]
//! returns an already-discovered node if one is buffered, and only
//! otherwise expands the next frontier node with a store call. Dropping the
//! cursor (or the future polling it) stops all further store traffic.
//!
//! ## Guarantees
//!
//! - Every reachable node within `max_depth` hops is reported exactly once
//! - Each node is reported at the smallest depth at which it is reachable
//! - The origin is never reported, even when a cycle leads back to it
//! - Order is deterministic: depth ascending, then discovery order, with
//!   successors visited in ascending `UserId` order

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::store::{EdgeStore, StoreError};
use crate::types::UserId;

/// A node reached by the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Visit {
    /// The reached user.
    pub node: UserId,
    /// Minimal hop count from the origin (1 for direct followees).
    pub depth: u32,
}

/// Lazy breadth-first cursor over outbound follow edges.
pub struct Neighbors<'a, S: EdgeStore + ?Sized> {
    store: &'a S,
    max_depth: u32,
    visited: HashSet<UserId>,
    /// Nodes whose successors still need fetching.
    frontier: VecDeque<Visit>,
    /// Discovered nodes not yet handed to the caller.
    ready: VecDeque<Visit>,
    /// Successor lists fetched so far.
    expanded: BTreeMap<UserId, Vec<UserId>>,
}

impl<'a, S: EdgeStore + ?Sized> Neighbors<'a, S> {
    /// Start a traversal from `origin`, bounded at `max_depth` hops.
    pub fn new(store: &'a S, origin: UserId, max_depth: u32) -> Self {
        let mut visited = HashSet::new();
        visited.insert(origin);

        let mut frontier = VecDeque::new();
        if max_depth > 0 {
            frontier.push_back(Visit { node: origin, depth: 0 });
        }

        Self {
            store,
            max_depth,
            visited,
            frontier,
            ready: VecDeque::new(),
            expanded: BTreeMap::new(),
        }
    }

    /// Next reachable node, or `None` once the bounded neighborhood is exhausted.
    pub async fn next(&mut self) -> Result<Option<Visit>, StoreError> {
        loop {
            if let Some(visit) = self.ready.pop_front() {
                return Ok(Some(visit));
            }

            let Some(current) = self.frontier.pop_front() else {
                return Ok(None);
            };

            let successors = self.store.successors(current.node).await?;
            let depth = current.depth + 1;

            for node in &successors {
                if self.visited.insert(*node) {
                    let visit = Visit { node: *node, depth };
                    self.ready.push_back(visit);
                    if depth < self.max_depth {
                        self.frontier.push_back(visit);
                    }
                }
            }

            self.expanded.insert(current.node, successors);
        }
    }

    /// Drain the cursor into a vector.
    pub async fn collect(mut self) -> Result<Vec<Visit>, StoreError> {
        let mut visits = Vec::new();
        while let Some(visit) = self.next().await? {
            visits.push(visit);
        }
        Ok(visits)
    }

    /// Successors fetched for `node` during the walk, if it was expanded.
    ///
    /// Nodes at `max_depth` are never expanded.
    pub fn successors_seen(&self, node: UserId) -> Option<&[UserId]> {
        self.expanded.get(&node).map(Vec::as_slice)
    }

    /// Configured depth bound.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEdgeStore;
    use crate::types::FollowEdge;

    fn uid(id: i64) -> UserId {
        UserId::new(id)
    }

    fn graph(edges: &[(i64, i64)]) -> InMemoryEdgeStore {
        InMemoryEdgeStore::with_edges(
            edges
                .iter()
                .map(|(a, b)| FollowEdge::new(uid(*a), uid(*b)).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_reports_minimal_depth() {
        // 1 -> 2 -> 3 and 1 -> 3: node 3 must come back at depth 1.
        let store = graph(&[(1, 2), (2, 3), (1, 3)]);

        let visits = store.neighbors(uid(1), 2).collect().await.unwrap();

        assert_eq!(
            visits,
            vec![
                Visit { node: uid(2), depth: 1 },
                Visit { node: uid(3), depth: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_origin_never_reported_through_cycle() {
        let store = graph(&[(1, 2), (2, 1), (2, 3)]);

        let visits = store.neighbors(uid(1), 3).collect().await.unwrap();
        let nodes: Vec<_> = visits.iter().map(|v| v.node).collect();

        assert_eq!(nodes, vec![uid(2), uid(3)]);
    }

    #[tokio::test]
    async fn test_depth_bound() {
        let store = graph(&[(1, 2), (2, 3), (3, 4), (4, 5)]);

        let visits = store.neighbors(uid(1), 2).collect().await.unwrap();
        assert_eq!(visits.len(), 2);
        assert!(visits.iter().all(|v| v.depth <= 2));

        let none = store.neighbors(uid(1), 0).collect().await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_lazy_expansion() {
        let store = graph(&[(1, 2), (1, 3), (2, 4), (3, 5)]);
        let mut walk = store.neighbors(uid(1), 2);

        // First pull expands only the origin.
        let first = walk.next().await.unwrap().unwrap();
        assert_eq!(first, Visit { node: uid(2), depth: 1 });
        assert_eq!(store.faults().calls(), 1);

        // Second depth-1 node is already buffered.
        walk.next().await.unwrap();
        assert_eq!(store.faults().calls(), 1);

        drop(walk);
        assert_eq!(store.faults().calls(), 1);
    }

    #[tokio::test]
    async fn test_successors_seen_for_expanded_nodes() {
        let store = graph(&[(1, 2), (2, 3), (2, 4)]);
        let mut walk = store.neighbors(uid(1), 2);
        while walk.next().await.unwrap().is_some() {}

        assert_eq!(walk.successors_seen(uid(2)), Some(&[uid(3), uid(4)][..]));
        // Depth-2 nodes sit on the bound and are never expanded.
        assert_eq!(walk.successors_seen(uid(3)), None);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = graph(&[(1, 2)]);
        store.faults().set_offline(true);

        let err = store.neighbors(uid(1), 1).collect().await.unwrap_err();
        assert!(err.is_transient());
    }
}
