//! Storage backends.
//!
//! Four seams, each a trait so the kernel can run against real databases or
//! the in-memory stores used in tests:
//!
//! - [`EdgeStore`]: graph-backed follow edges (authoritative for traversal)
//! - [`SubscriptionTable`]: relational mirror of the same edges (authoritative for feeds)
//! - [`PostSource`]: read access to published posts
//! - [`UserDirectory`]: username lookups for display

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "neo4j")]
pub mod neo4j;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::feed::merge_newest_first;
use crate::traversal::Neighbors;
use crate::types::{FollowEdge, InvalidEdge, Post, UserId};

/// Error type shared by all store backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Self-follow rejected before reaching the store.
    #[error(transparent)]
    InvalidEdge(#[from] InvalidEdge),
    /// Connectivity loss. Transient; callers retry with backoff.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// Any other backend failure. Not retried.
    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a retry might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Graph store holding follow edges as directed relationships.
///
/// Single-edge writes are atomic and idempotent. Successor lists are
/// ordered by `UserId` so traversals are deterministic.
#[async_trait]
pub trait EdgeStore: Send + Sync {
    /// Insert `follower -> followee`. A no-op if it already exists.
    async fn add_edge(&self, follower: UserId, followee: UserId) -> Result<(), StoreError>;

    /// Delete `follower -> followee`. A no-op if absent.
    async fn remove_edge(&self, follower: UserId, followee: UserId) -> Result<(), StoreError>;

    /// Check whether `follower -> followee` exists.
    async fn has_edge(&self, follower: UserId, followee: UserId) -> Result<bool, StoreError>;

    /// Direct outbound neighbors of `user`, sorted ascending.
    async fn successors(&self, user: UserId) -> Result<Vec<UserId>, StoreError>;

    /// Every edge in the store.
    async fn all_edges(&self) -> Result<BTreeSet<FollowEdge>, StoreError>;

    /// Check whether the store is reachable.
    async fn is_healthy(&self) -> bool {
        true
    }

    /// Lazy breadth-first walk over outbound edges, up to `max_depth` hops.
    ///
    /// See [`Neighbors`] for the visiting guarantees.
    fn neighbors(&self, origin: UserId, max_depth: u32) -> Neighbors<'_, Self>
    where
        Self: Sized,
    {
        Neighbors::new(self, origin, max_depth)
    }
}

/// Relational mirror of follow edges.
///
/// Pure tabular CRUD keyed by the unique (follower, followee) pair.
#[async_trait]
pub trait SubscriptionTable: Send + Sync {
    /// Insert a row. A no-op if the pair already exists.
    async fn insert(&self, follower: UserId, followee: UserId) -> Result<(), StoreError>;

    /// Delete a row. A no-op if absent.
    async fn delete(&self, follower: UserId, followee: UserId) -> Result<(), StoreError>;

    /// Check whether the pair exists.
    async fn contains(&self, follower: UserId, followee: UserId) -> Result<bool, StoreError>;

    /// Users that `follower` follows.
    async fn followees_of(&self, follower: UserId) -> Result<BTreeSet<UserId>, StoreError>;

    /// Users following `followee`.
    async fn followers_of(&self, followee: UserId) -> Result<BTreeSet<UserId>, StoreError>;

    /// Every row in the table.
    async fn all_edges(&self) -> Result<BTreeSet<FollowEdge>, StoreError>;

    /// Check whether the store is reachable.
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Read access to the post collection.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Posts by one author, newest first, at most `limit`.
    async fn posts_by_author(&self, author: UserId, limit: usize) -> Result<Vec<Post>, StoreError>;

    /// Posts by any of `authors`, in feed order, at most `limit`.
    ///
    /// The default merges per-author streams. Backends that can sort
    /// server-side should override it.
    async fn posts_by_authors(
        &self,
        authors: &[UserId],
        limit: usize,
    ) -> Result<Vec<Post>, StoreError> {
        let mut streams = Vec::with_capacity(authors.len());
        for author in authors {
            streams.push(self.posts_by_author(*author, limit).await?);
        }
        Ok(merge_newest_first(streams, limit))
    }
}

/// Username lookups used to decorate results for display.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Username of `user`, if registered.
    async fn username_of(&self, user: UserId) -> Result<Option<String>, StoreError>;

    /// Usernames of several users. Unknown ids are omitted.
    async fn usernames_of(&self, users: &[UserId]) -> Result<HashMap<UserId, String>, StoreError> {
        let mut names = HashMap::with_capacity(users.len());
        for user in users {
            if let Some(name) = self.username_of(*user).await? {
                names.insert(*user, name);
            }
        }
        Ok(names)
    }
}

pub use memory::{
    InMemoryEdgeStore, InMemoryPostStore, InMemorySubscriptionTable, InMemoryUserDirectory,
};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresStore};

#[cfg(feature = "neo4j")]
pub use neo4j::{Neo4jConfig, Neo4jEdgeStore};
