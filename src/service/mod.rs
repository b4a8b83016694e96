//! Social Graph REST Service
//!
//! Thin HTTP transport over the kernel components.
//!
//! ## Endpoints
//!
//! - `POST /subscriptions` - Follow a user
//! - `DELETE /subscriptions?follower_id=&followee_id=` - Unfollow a user
//! - `GET /subscriptions?user_id=` - Accounts a user follows
//! - `GET /subscriptions/followers?user_id=` - Accounts following a user
//! - `GET /feed?user_id=&limit=` - Chronological feed of followed authors
//! - `GET /recommendations?user_id=&limit=` - "Who to follow"
//! - `POST /admin/reconcile?full=` - Run a reconciliation sweep now
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{
    metrics_middleware, record_recommendation, record_reconcile, record_sync_outcome,
};
pub use routes::{create_router, AppState, ErrorResponse};
pub use state::{Backends, ServiceState};
