//! In-memory stores for testing and local runs.
//!
//! Every store carries a [`FaultInjector`] so tests can simulate the
//! connectivity failures that drive partial dual writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{EdgeStore, PostSource, StoreError, SubscriptionTable, UserDirectory};
use crate::types::{FollowEdge, Post, User, UserId};

/// Switchable failure source shared by the in-memory stores.
#[derive(Debug, Default)]
pub struct FaultInjector {
    offline: AtomicBool,
    fail_next: AtomicU32,
    calls: AtomicU64,
}

impl FaultInjector {
    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of store calls observed so far, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{op}: store offline")));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable(format!("{op}: injected failure")));
        }

        Ok(())
    }
}

/// In-memory graph store.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order.
#[derive(Debug, Default)]
pub struct InMemoryEdgeStore {
    /// Follower -> followees.
    out: RwLock<BTreeMap<UserId, BTreeSet<UserId>>>,
    faults: FaultInjector,
}

impl InMemoryEdgeStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given edges.
    pub fn with_edges(edges: impl IntoIterator<Item = FollowEdge>) -> Self {
        let store = Self::new();
        for edge in edges {
            store.seed(edge);
        }
        store
    }

    /// Insert an edge directly, bypassing fault injection.
    pub fn seed(&self, edge: FollowEdge) {
        self.out
            .write()
            .entry(edge.follower)
            .or_default()
            .insert(edge.followee);
    }

    /// Fault injection controls.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Get number of edges.
    pub fn num_edges(&self) -> usize {
        self.out.read().values().map(BTreeSet::len).sum()
    }
}

#[async_trait]
impl EdgeStore for InMemoryEdgeStore {
    async fn add_edge(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        let edge = FollowEdge::new(follower, followee)?;
        self.faults.check("add_edge")?;
        self.seed(edge);
        Ok(())
    }

    async fn remove_edge(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        self.faults.check("remove_edge")?;
        let mut out = self.out.write();
        if let Some(followees) = out.get_mut(&follower) {
            followees.remove(&followee);
            if followees.is_empty() {
                out.remove(&follower);
            }
        }
        Ok(())
    }

    async fn has_edge(&self, follower: UserId, followee: UserId) -> Result<bool, StoreError> {
        self.faults.check("has_edge")?;
        Ok(self
            .out
            .read()
            .get(&follower)
            .is_some_and(|set| set.contains(&followee)))
    }

    async fn successors(&self, user: UserId) -> Result<Vec<UserId>, StoreError> {
        self.faults.check("successors")?;
        Ok(self
            .out
            .read()
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn all_edges(&self) -> Result<BTreeSet<FollowEdge>, StoreError> {
        self.faults.check("all_edges")?;
        Ok(self
            .out
            .read()
            .iter()
            .flat_map(|(follower, followees)| {
                followees.iter().map(move |followee| FollowEdge {
                    follower: *follower,
                    followee: *followee,
                })
            })
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        !self.faults.offline.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct SubscriptionRows {
    by_follower: BTreeMap<UserId, BTreeSet<UserId>>,
    by_followee: BTreeMap<UserId, BTreeSet<UserId>>,
}

/// In-memory subscription table with a reverse index for follower lookups.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionTable {
    rows: RwLock<SubscriptionRows>,
    faults: FaultInjector,
}

impl InMemorySubscriptionTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding the given edges.
    pub fn with_edges(edges: impl IntoIterator<Item = FollowEdge>) -> Self {
        let table = Self::new();
        for edge in edges {
            table.seed(edge);
        }
        table
    }

    /// Insert a row directly, bypassing fault injection.
    pub fn seed(&self, edge: FollowEdge) {
        let mut rows = self.rows.write();
        rows.by_follower
            .entry(edge.follower)
            .or_default()
            .insert(edge.followee);
        rows.by_followee
            .entry(edge.followee)
            .or_default()
            .insert(edge.follower);
    }

    /// Fault injection controls.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Get number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.read().by_follower.values().map(BTreeSet::len).sum()
    }
}

fn remove_pair(index: &mut BTreeMap<UserId, BTreeSet<UserId>>, key: UserId, value: UserId) {
    if let Some(set) = index.get_mut(&key) {
        set.remove(&value);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}

#[async_trait]
impl SubscriptionTable for InMemorySubscriptionTable {
    async fn insert(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        let edge = FollowEdge::new(follower, followee)?;
        self.faults.check("insert")?;
        self.seed(edge);
        Ok(())
    }

    async fn delete(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        self.faults.check("delete")?;
        let mut rows = self.rows.write();
        remove_pair(&mut rows.by_follower, follower, followee);
        remove_pair(&mut rows.by_followee, followee, follower);
        Ok(())
    }

    async fn contains(&self, follower: UserId, followee: UserId) -> Result<bool, StoreError> {
        self.faults.check("contains")?;
        Ok(self
            .rows
            .read()
            .by_follower
            .get(&follower)
            .is_some_and(|set| set.contains(&followee)))
    }

    async fn followees_of(&self, follower: UserId) -> Result<BTreeSet<UserId>, StoreError> {
        self.faults.check("followees_of")?;
        Ok(self
            .rows
            .read()
            .by_follower
            .get(&follower)
            .cloned()
            .unwrap_or_default())
    }

    async fn followers_of(&self, followee: UserId) -> Result<BTreeSet<UserId>, StoreError> {
        self.faults.check("followers_of")?;
        Ok(self
            .rows
            .read()
            .by_followee
            .get(&followee)
            .cloned()
            .unwrap_or_default())
    }

    async fn all_edges(&self) -> Result<BTreeSet<FollowEdge>, StoreError> {
        self.faults.check("all_edges")?;
        Ok(self
            .rows
            .read()
            .by_follower
            .iter()
            .flat_map(|(follower, followees)| {
                followees.iter().map(move |followee| FollowEdge {
                    follower: *follower,
                    followee: *followee,
                })
            })
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        !self.faults.offline.load(Ordering::SeqCst)
    }
}

/// In-memory post collection, one stream per author.
#[derive(Debug, Default)]
pub struct InMemoryPostStore {
    /// Author -> posts in feed order.
    by_author: RwLock<BTreeMap<UserId, Vec<Post>>>,
    faults: FaultInjector,
}

impl InMemoryPostStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a post to its author's stream.
    pub fn add_post(&self, post: Post) {
        let mut by_author = self.by_author.write();
        let stream = by_author.entry(post.author_id).or_default();
        stream.push(post);
        stream.sort_by(Post::feed_order);
    }

    /// Fault injection controls.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

#[async_trait]
impl PostSource for InMemoryPostStore {
    async fn posts_by_author(&self, author: UserId, limit: usize) -> Result<Vec<Post>, StoreError> {
        self.faults.check("posts_by_author")?;
        Ok(self
            .by_author
            .read()
            .get(&author)
            .map(|stream| stream.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory user directory.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, String>>,
}

impl InMemoryUserDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn add_user(&self, user: User) {
        self.users.write().insert(user.id, user.username);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn username_of(&self, user: UserId) -> Result<Option<String>, StoreError> {
        Ok(self.users.read().get(&user).cloned())
    }
}
