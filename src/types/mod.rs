//! Core types for the social graph kernel.

pub mod user;
pub mod edge;
pub mod post;
pub mod recommendation;

pub use user::{User, UserId};
pub use edge::{FollowEdge, InvalidEdge};
pub use post::{Post, PostId};
pub use recommendation::Recommendation;
