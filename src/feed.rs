//! Chronological feed assembly.
//!
//! A feed is the newest posts of every account the user follows, ordered by
//! creation time descending with post id descending as the tie-break. It is
//! logically a k-way merge of per-author streams; [`merge_newest_first`]
//! implements that merge for post sources that cannot sort server-side.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::debug;

use crate::store::{PostSource, StoreError, SubscriptionTable};
use crate::types::{Post, UserId};

/// Head of one author stream inside the merge heap.
struct StreamHead {
    post: Post,
    stream: usize,
}

impl PartialEq for StreamHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StreamHead {}

impl PartialOrd for StreamHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Max-heap: the post that comes first in the feed is the greatest.
impl Ord for StreamHead {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .post
            .feed_order(&self.post)
            .then_with(|| other.stream.cmp(&self.stream))
    }
}

/// Merge streams that are each already in feed order, keeping at most `limit` posts.
pub fn merge_newest_first(streams: Vec<Vec<Post>>, limit: usize) -> Vec<Post> {
    let mut iters: Vec<_> = streams.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());

    for (stream, iter) in iters.iter_mut().enumerate() {
        if let Some(post) = iter.next() {
            heap.push(StreamHead { post, stream });
        }
    }

    let mut merged = Vec::with_capacity(limit.min(64));
    while merged.len() < limit {
        let Some(StreamHead { post, stream }) = heap.pop() else {
            break;
        };
        if let Some(next) = iters[stream].next() {
            heap.push(StreamHead { post: next, stream });
        }
        merged.push(post);
    }

    merged
}

/// Builds feeds from the subscription table and the post collection.
pub struct FeedBuilder<T: SubscriptionTable + ?Sized, P: PostSource + ?Sized> {
    subscriptions: Arc<T>,
    posts: Arc<P>,
}

impl<T: SubscriptionTable + ?Sized, P: PostSource + ?Sized> FeedBuilder<T, P> {
    /// Create a new feed builder.
    pub fn new(subscriptions: Arc<T>, posts: Arc<P>) -> Self {
        Self {
            subscriptions,
            posts,
        }
    }

    /// Newest posts by accounts `user` follows, at most `limit`.
    ///
    /// Empty (not an error) when the user follows nobody.
    pub async fn build_feed(&self, user: UserId, limit: usize) -> Result<Vec<Post>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let followees = self.subscriptions.followees_of(user).await?;
        if followees.is_empty() {
            debug!(user_id = %user, "Feed requested with no subscriptions");
            return Ok(Vec::new());
        }

        let authors: Vec<UserId> = followees.into_iter().collect();
        let mut posts = self.posts.posts_by_authors(&authors, limit).await?;

        // Collaborators promise feed order; enforce it for the tie-break too.
        posts.sort_by(Post::feed_order);
        posts.truncate(limit);

        debug!(
            user_id = %user,
            authors = authors.len(),
            posts = posts.len(),
            "Built feed"
        );

        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::store::{InMemoryPostStore, InMemorySubscriptionTable};
    use crate::types::{FollowEdge, PostId};

    fn uid(id: i64) -> UserId {
        UserId::new(id)
    }

    fn post(id: i64, author: i64, ts: i64) -> Post {
        Post::new(
            PostId::new(id),
            uid(author),
            format!("post {id}"),
            Utc.timestamp_opt(ts, 0).unwrap(),
        )
    }

    fn ids(posts: &[Post]) -> Vec<i64> {
        posts.iter().map(|p| p.id.as_i64()).collect()
    }

    #[test]
    fn test_merge_interleaves_streams() {
        let streams = vec![
            vec![post(5, 1, 500), post(1, 1, 100)],
            vec![post(4, 2, 400), post(2, 2, 200)],
            vec![post(3, 3, 300)],
        ];

        let merged = merge_newest_first(streams, 10);
        assert_eq!(ids(&merged), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_merge_respects_limit_and_tie_break() {
        let streams = vec![
            vec![post(10, 1, 100)],
            vec![post(11, 2, 100)],
            vec![post(12, 3, 50)],
        ];

        let merged = merge_newest_first(streams, 2);
        assert_eq!(ids(&merged), vec![11, 10]);
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_newest_first(vec![], 5).is_empty());
        assert!(merge_newest_first(vec![vec![], vec![]], 5).is_empty());
        assert!(merge_newest_first(vec![vec![post(1, 1, 1)]], 0).is_empty());
    }

    #[tokio::test]
    async fn test_feed_only_followed_authors() {
        const U: i64 = 100;
        let subs = Arc::new(InMemorySubscriptionTable::with_edges([
            FollowEdge::new(uid(U), uid(1)).unwrap(),
            FollowEdge::new(uid(U), uid(2)).unwrap(),
        ]));
        let posts = Arc::new(InMemoryPostStore::new());
        posts.add_post(post(1, 1, 100));
        posts.add_post(post(2, 2, 300));
        posts.add_post(post(3, 3, 500)); // not followed

        let builder = FeedBuilder::new(subs, posts);
        let feed = builder.build_feed(uid(U), 10).await.unwrap();

        assert_eq!(ids(&feed), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_feed_empty_without_subscriptions() {
        let subs = Arc::new(InMemorySubscriptionTable::new());
        let posts = Arc::new(InMemoryPostStore::new());
        posts.add_post(post(1, 1, 100));

        let builder = FeedBuilder::new(subs, Arc::clone(&posts));
        assert!(builder.build_feed(uid(5), 10).await.unwrap().is_empty());
        // Post store never consulted.
        assert_eq!(posts.faults().calls(), 0);
    }

    #[tokio::test]
    async fn test_feed_store_failure_propagates() {
        let subs = Arc::new(InMemorySubscriptionTable::new());
        subs.faults().set_offline(true);
        let builder = FeedBuilder::new(subs, Arc::new(InMemoryPostStore::new()));

        let err = builder.build_feed(uid(1), 10).await.unwrap_err();
        assert!(err.is_transient());
    }
}
