//! User identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique numeric identifier of a user.
///
/// Implements `Ord` so that sets and maps of users iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Create a new UserId.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw numeric id.
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A registered user.
///
/// Created by the registration path and immutable here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique id.
    pub id: UserId,
    /// Unique display handle.
    pub username: String,
}

impl User {
    /// Create a new user.
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}
