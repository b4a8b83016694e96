//! Recommendation result types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::user::UserId;

/// A "who to follow" candidate.
///
/// `score` is the number of distinct accounts the requesting user follows
/// that themselves follow the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recommendation {
    /// Candidate account.
    pub user_id: UserId,
    /// Mutual connection count.
    pub score: u32,
}

impl Recommendation {
    /// Create a new recommendation.
    pub fn new(user_id: UserId, score: u32) -> Self {
        Self { user_id, score }
    }

    /// Rank order: score descending, then user id ascending.
    pub fn rank_order(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.user_id.cmp(&other.user_id))
    }
}
