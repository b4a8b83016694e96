//! Axum routes for the social graph service.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::reconcile::ReconcileReport;
use crate::store::StoreError;
use crate::sync::{EdgeOp, SyncError, SyncOutcome};
use crate::types::{Post, PostId, UserId};

use super::middleware::{record_recommendation, record_reconcile, record_sync_outcome};
use super::state::ServiceState;

/// Shared state handed to every handler.
pub type AppState = Arc<ServiceState>;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request/Response Types
// ============================================================================

/// Follow request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// User who follows.
    pub follower_id: UserId,
    /// User being followed.
    pub followee_id: UserId,
}

/// Result of a follow or unfollow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    /// User who follows.
    pub follower_id: UserId,
    /// User being followed.
    pub followee_id: UserId,
    /// The graph store lags and will be repaired by the next sweep.
    pub pending_reconciliation: bool,
}

/// `?user_id=` query.
#[derive(Debug, Clone, Deserialize)]
pub struct UserQuery {
    /// Subject user.
    pub user_id: UserId,
}

/// `?user_id=&limit=` query.
#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    /// Subject user.
    pub user_id: UserId,
    /// Maximum results; clamped by configuration.
    pub limit: Option<usize>,
}

/// `?full=` query for on-demand reconciliation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileQuery {
    /// Diff both stores in full instead of draining the ledger.
    #[serde(default)]
    pub full: bool,
}

/// List of user ids related to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListResponse {
    /// Subject user.
    pub user_id: UserId,
    /// Related users, ascending.
    pub users: Vec<UserId>,
}

/// One feed entry, decorated with the author's username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    /// Post id.
    pub id: PostId,
    /// Author id.
    pub author_id: UserId,
    /// Author username, if known.
    pub author: Option<String>,
    /// Post body.
    pub content: String,
    /// Attached media reference.
    pub media: Option<String>,
    /// Creation time.
    pub date: DateTime<Utc>,
}

/// Feed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    /// Feed owner.
    pub user_id: UserId,
    /// Posts, newest first.
    pub items: Vec<FeedItem>,
}

/// One recommended account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    /// Recommended user.
    pub user_id: UserId,
    /// Username, if known.
    pub username: Option<String>,
    /// Mutual-connection count.
    pub score: u32,
}

/// Recommendations response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationsResponse {
    /// Ranked recommendations.
    pub recommendations: Vec<RecommendationItem>,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Store backend in use.
    pub backend: String,
    /// Subscription table reachable.
    pub relational: bool,
    /// Graph store reachable.
    pub graph: bool,
    /// Edges waiting for the next sweep.
    pub pending_reconciliation: usize,
    /// Recommendation cache statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub relational: bool,
    pub graph: bool,
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

fn api_error(status: StatusCode, body: ErrorResponse) -> ApiError {
    tracing::warn!(
        status = status.as_u16(),
        code = %body.code,
        error = %body.error,
        details = ?body.details,
        "Request error"
    );
    (status, Json(body))
}

fn store_failure(err: StoreError) -> ApiError {
    match err {
        StoreError::InvalidEdge(e) => api_error(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("INVALID_EDGE", e.to_string()),
        ),
        StoreError::Unavailable(msg) => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("STORE_UNAVAILABLE", "Store temporarily unavailable")
                .with_details(msg),
        ),
        StoreError::Backend(msg) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new("STORE_ERROR", "Store operation failed").with_details(msg),
        ),
    }
}

fn sync_failure(err: SyncError) -> ApiError {
    match err {
        SyncError::InvalidEdge(e) => api_error(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("INVALID_EDGE", e.to_string()),
        ),
        SyncError::SyncFailed { store, source, .. } => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new("SYNC_FAILED", format!("{store} store write failed"))
                .with_details(source.to_string()),
        ),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn apply_edge(
    state: &ServiceState,
    op: EdgeOp,
    request: SubscriptionRequest,
) -> Result<SubscriptionResponse, ApiError> {
    let SubscriptionRequest {
        follower_id,
        followee_id,
    } = request;

    let result = match op {
        EdgeOp::Follow => state.coordinator.follow(follower_id, followee_id).await,
        EdgeOp::Unfollow => state.coordinator.unfollow(follower_id, followee_id).await,
    };
    record_sync_outcome(op, &result);

    let outcome = result.map_err(sync_failure)?;
    Ok(SubscriptionResponse {
        follower_id,
        followee_id,
        pending_reconciliation: matches!(outcome, SyncOutcome::PendingReconciliation(_)),
    })
}

/// Follow a user.
async fn follow_handler(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    let response = apply_edge(&state, EdgeOp::Follow, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Unfollow a user. Idempotent.
async fn unfollow_handler(
    State(state): State<AppState>,
    Query(request): Query<SubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    apply_edge(&state, EdgeOp::Unfollow, request).await.map(Json)
}

/// Accounts the user follows.
async fn subscriptions_handler(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let followees = state
        .backends
        .subscriptions
        .followees_of(query.user_id)
        .await
        .map_err(store_failure)?;

    Ok(Json(UserListResponse {
        user_id: query.user_id,
        users: followees.into_iter().collect(),
    }))
}

/// Accounts following the user.
async fn followers_handler(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let followers = state
        .backends
        .subscriptions
        .followers_of(query.user_id)
        .await
        .map_err(store_failure)?;

    Ok(Json(UserListResponse {
        user_id: query.user_id,
        users: followers.into_iter().collect(),
    }))
}

/// Chronological feed of followed authors.
async fn feed_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<FeedResponse>, ApiError> {
    let limit = state.config.feed_limit(query.limit);
    let posts = state
        .feed
        .build_feed(query.user_id, limit)
        .await
        .map_err(store_failure)?;

    let authors: Vec<UserId> = posts
        .iter()
        .map(|p| p.author_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let names = state
        .backends
        .users
        .usernames_of(&authors)
        .await
        .map_err(store_failure)?;

    let items = posts
        .into_iter()
        .map(|post: Post| FeedItem {
            author: names.get(&post.author_id).cloned(),
            id: post.id,
            author_id: post.author_id,
            content: post.content,
            media: post.media,
            date: post.created_at,
        })
        .collect();

    Ok(Json(FeedResponse {
        user_id: query.user_id,
        items,
    }))
}

/// "Who to follow" for the user.
async fn recommendations_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<RecommendationsResponse>, ApiError> {
    let start = Instant::now();
    let limit = state.config.recommendation_limit(query.limit);

    let ranked = state
        .recommender
        .recommend(query.user_id, limit)
        .await
        .map_err(store_failure)?;

    let ids: Vec<UserId> = ranked.iter().map(|r| r.user_id).collect();
    let names = state
        .backends
        .users
        .usernames_of(&ids)
        .await
        .map_err(store_failure)?;

    record_recommendation(query.user_id, ranked.len(), start.elapsed().as_millis() as u64);

    Ok(Json(RecommendationsResponse {
        recommendations: ranked
            .into_iter()
            .map(|r| RecommendationItem {
                username: names.get(&r.user_id).cloned(),
                user_id: r.user_id,
                score: r.score,
            })
            .collect(),
    }))
}

/// Run a reconciliation sweep on demand.
async fn reconcile_handler(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let report = if query.full {
        state.reconciler.full_sweep().await.map_err(|e| {
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("RECONCILE_FAILED", "Full reconciliation failed")
                    .with_details(e.to_string()),
            )
        })?
    } else {
        state.reconciler.sweep().await
    };

    record_reconcile(&report, query.full);
    Ok(Json(report))
}

/// Health check endpoint (detailed).
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let relational = state.backends.subscriptions.is_healthy().await;
    let graph = state.backends.edges.is_healthy().await;

    Json(HealthResponse {
        status: if relational && graph { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.backends.name.to_string(),
        relational,
        graph,
        pending_reconciliation: state.reconciler.pending().len(),
        cache: state.recommender.cache().map(|c| c.stats()),
    })
}

/// Liveness probe endpoint.
///
/// Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Ready while the subscription table is reachable. A graph outage only
/// delays recommendations, so it is reported but does not fail the probe.
async fn readiness_handler(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let relational = state.backends.subscriptions.is_healthy().await;
    let graph = state.backends.edges.is_healthy().await;

    if relational {
        Ok(Json(ReadinessResponse {
            ready: true,
            relational,
            graph,
            details: (!graph).then(|| "Graph store unavailable; writes are queued".to_string()),
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                relational,
                graph,
                details: Some("Relational store connection failed".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the social graph service.
pub fn create_router(state: ServiceState) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Follow edges
        .route(
            "/subscriptions",
            get(subscriptions_handler)
                .post(follow_handler)
                .delete(unfollow_handler),
        )
        .route("/subscriptions/followers", get(followers_handler))
        // Read views
        .route("/feed", get(feed_handler))
        .route("/recommendations", get(recommendations_handler))
        // Operations
        .route("/admin/reconcile", post(reconcile_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::TimeZone;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    use crate::config::KernelConfig;
    use crate::service::state::Backends;
    use crate::store::{
        InMemoryEdgeStore, InMemoryPostStore, InMemorySubscriptionTable, InMemoryUserDirectory,
    };
    use crate::types::User;

    struct Fixture {
        router: Router,
        edges: Arc<InMemoryEdgeStore>,
        subscriptions: Arc<InMemorySubscriptionTable>,
        posts: Arc<InMemoryPostStore>,
        users: Arc<InMemoryUserDirectory>,
    }

    fn fixture() -> Fixture {
        let edges = Arc::new(InMemoryEdgeStore::new());
        let subscriptions = Arc::new(InMemorySubscriptionTable::new());
        let posts = Arc::new(InMemoryPostStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());

        let mut config = KernelConfig::default();
        config.retry = crate::config::RetryPolicy::none();

        let backends = Backends {
            edges: edges.clone(),
            subscriptions: subscriptions.clone(),
            posts: posts.clone(),
            users: users.clone(),
            name: "memory",
        };

        Fixture {
            router: create_router(ServiceState::new(backends, config)),
            edges,
            subscriptions,
            posts,
            users,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn json<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn follow(router: &Router, a: i64, b: i64) -> (StatusCode, Vec<u8>) {
        let body = format!(r#"{{"follower_id":{a},"followee_id":{b}}}"#);
        send(router, "POST", "/subscriptions", Some(&body)).await
    }

    #[tokio::test]
    async fn test_follow_and_list() {
        let fx = fixture();

        let (status, body) = follow(&fx.router, 1, 2).await;
        assert_eq!(status, StatusCode::CREATED);
        let resp: SubscriptionResponse = json(&body);
        assert!(!resp.pending_reconciliation);

        let (status, body) = send(&fx.router, "GET", "/subscriptions?user_id=1", None).await;
        assert_eq!(status, StatusCode::OK);
        let list: UserListResponse = json(&body);
        assert_eq!(list.users, vec![UserId::new(2)]);

        let (_, body) = send(&fx.router, "GET", "/subscriptions/followers?user_id=2", None).await;
        let list: UserListResponse = json(&body);
        assert_eq!(list.users, vec![UserId::new(1)]);
    }

    #[tokio::test]
    async fn test_self_follow_is_bad_request() {
        let fx = fixture();

        let (status, body) = follow(&fx.router, 7, 7).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = json(&body);
        assert_eq!(err.code, "INVALID_EDGE");
        assert_eq!(fx.subscriptions.num_rows(), 0);
    }

    #[tokio::test]
    async fn test_relational_outage_is_sync_failed() {
        let fx = fixture();
        fx.subscriptions.faults().set_offline(true);

        let (status, body) = follow(&fx.router, 1, 2).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let err: ErrorResponse = json(&body);
        assert_eq!(err.code, "SYNC_FAILED");
        assert_eq!(fx.edges.num_edges(), 0);
    }

    #[tokio::test]
    async fn test_graph_outage_reported_then_reconciled() {
        let fx = fixture();
        fx.edges.faults().set_offline(true);

        let (status, body) = follow(&fx.router, 1, 2).await;
        assert_eq!(status, StatusCode::CREATED);
        let resp: SubscriptionResponse = json(&body);
        assert!(resp.pending_reconciliation);

        fx.edges.faults().set_offline(false);
        let (status, body) = send(&fx.router, "POST", "/admin/reconcile", None).await;
        assert_eq!(status, StatusCode::OK);
        let report: ReconcileReport = json(&body);
        assert_eq!(report.added, 1);
        assert_eq!(fx.edges.num_edges(), 1);
    }

    #[tokio::test]
    async fn test_full_reconcile_failure() {
        let fx = fixture();
        fx.edges.faults().set_offline(true);

        let (status, body) = send(&fx.router, "POST", "/admin/reconcile?full=true", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let err: ErrorResponse = json(&body);
        assert_eq!(err.code, "RECONCILE_FAILED");
    }

    #[tokio::test]
    async fn test_unfollow_idempotent() {
        let fx = fixture();
        follow(&fx.router, 1, 2).await;

        for _ in 0..2 {
            let (status, _) =
                send(&fx.router, "DELETE", "/subscriptions?follower_id=1&followee_id=2", None).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(fx.subscriptions.num_rows(), 0);
        assert_eq!(fx.edges.num_edges(), 0);
    }

    #[tokio::test]
    async fn test_feed_decorated_with_usernames() {
        let fx = fixture();
        fx.users.add_user(User::new(UserId::new(2), "bob"));
        fx.posts.add_post(
            Post::new(
                PostId::new(10),
                UserId::new(2),
                "hello",
                Utc.timestamp_opt(1_000, 0).unwrap(),
            )
            .with_media("img.png"),
        );
        fx.posts.add_post(Post::new(
            PostId::new(11),
            UserId::new(3),
            "unfollowed",
            Utc.timestamp_opt(2_000, 0).unwrap(),
        ));
        follow(&fx.router, 1, 2).await;

        let (status, body) = send(&fx.router, "GET", "/feed?user_id=1", None).await;
        assert_eq!(status, StatusCode::OK);
        let feed: FeedResponse = json(&body);
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].id, PostId::new(10));
        assert_eq!(feed.items[0].author.as_deref(), Some("bob"));
        assert_eq!(feed.items[0].media.as_deref(), Some("img.png"));
    }

    #[tokio::test]
    async fn test_feed_store_outage() {
        let fx = fixture();
        fx.subscriptions.faults().set_offline(true);

        let (status, body) = send(&fx.router, "GET", "/feed?user_id=1", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let err: ErrorResponse = json(&body);
        assert_eq!(err.code, "STORE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_recommendations_diamond() {
        let fx = fixture();
        fx.users.add_user(User::new(UserId::new(4), "dana"));
        for (a, b) in [(1, 2), (1, 3), (2, 4), (3, 4)] {
            follow(&fx.router, a, b).await;
        }

        let (status, body) = send(&fx.router, "GET", "/recommendations?user_id=1", None).await;
        assert_eq!(status, StatusCode::OK);
        let recs: RecommendationsResponse = json(&body);
        assert_eq!(recs.recommendations.len(), 1);
        assert_eq!(recs.recommendations[0].user_id, UserId::new(4));
        assert_eq!(recs.recommendations[0].username.as_deref(), Some("dana"));
        assert_eq!(recs.recommendations[0].score, 2);
    }

    #[tokio::test]
    async fn test_follow_invalidates_cached_recommendations() {
        let fx = fixture();
        for (a, b) in [(1, 2), (2, 3), (2, 4)] {
            follow(&fx.router, a, b).await;
        }

        let (_, body) = send(&fx.router, "GET", "/recommendations?user_id=1", None).await;
        let before: RecommendationsResponse = json(&body);
        assert_eq!(before.recommendations.len(), 2);

        follow(&fx.router, 1, 3).await;

        let (_, body) = send(&fx.router, "GET", "/recommendations?user_id=1", None).await;
        let after: RecommendationsResponse = json(&body);
        assert_eq!(after.recommendations.len(), 1);
        assert_eq!(after.recommendations[0].user_id, UserId::new(4));
    }

    #[tokio::test]
    async fn test_health_probes() {
        let fx = fixture();

        let (status, _) = send(&fx.router, "GET", "/health/live", None).await;
        assert_eq!(status, StatusCode::OK);

        fx.edges.faults().set_offline(true);
        let (status, body) = send(&fx.router, "GET", "/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        let ready: ReadinessResponse = json(&body);
        assert!(!ready.graph);

        let (_, body) = send(&fx.router, "GET", "/health", None).await;
        let health: serde_json::Value = json(&body);
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["backend"], "memory");

        fx.subscriptions.faults().set_offline(true);
        let (status, _) = send(&fx.router, "GET", "/health/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
