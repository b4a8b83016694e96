//! Follow edge types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::user::UserId;

/// Rejected attempt to build an edge from a user to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid edge: user {user} cannot follow itself")]
pub struct InvalidEdge {
    /// The user on both ends of the rejected edge.
    pub user: UserId,
}

/// Directed follow relationship: `follower` receives `followee`'s posts.
///
/// Represented identically as a `subscriptions` row and as a graph
/// `FOLLOWS` relationship. Orders by (follower, followee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FollowEdge {
    /// The user who follows.
    pub follower: UserId,
    /// The user being followed.
    pub followee: UserId,
}

impl FollowEdge {
    /// Create a new edge, rejecting self-follows.
    pub fn new(follower: UserId, followee: UserId) -> Result<Self, InvalidEdge> {
        if follower == followee {
            return Err(InvalidEdge { user: follower });
        }
        Ok(Self { follower, followee })
    }
}

impl fmt::Display for FollowEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.follower, self.followee)
    }
}
