//! Post types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::user::UserId;

/// Unique numeric identifier of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(i64);

impl PostId {
    /// Create a new PostId.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw numeric id.
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Post id.
    pub id: PostId,
    /// Author of the post.
    pub author_id: UserId,
    /// Text body.
    pub content: String,
    /// Optional media reference (URL or storage key).
    pub media: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Create a new post without media.
    pub fn new(
        id: PostId,
        author_id: UserId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            author_id,
            content: content.into(),
            media: None,
            created_at,
        }
    }

    /// Attach a media reference.
    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }

    /// Feed order: newest first, post id descending on equal timestamps.
    ///
    /// `Ordering::Less` means `self` comes before `other` in a feed.
    pub fn feed_order(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}
