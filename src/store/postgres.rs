//! PostgreSQL store for subscriptions, posts and users.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Tables
//!
//! ```sql
//! users(id BIGINT PRIMARY KEY, username TEXT UNIQUE)
//! posts(id BIGINT PRIMARY KEY, author_id BIGINT, content TEXT, media TEXT NULL, created_at TIMESTAMPTZ)
//! subscriptions(follower_id BIGINT, followee_id BIGINT, created_at TIMESTAMPTZ DEFAULT now(),
//!               PRIMARY KEY (follower_id, followee_id))
//! ```

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::{PostSource, StoreError, SubscriptionTable, UserDirectory};
use crate::config::env_or;
use crate::types::{FollowEdge, Post, PostId, UserId};

/// Configuration for PostgreSQL connection pool.
///
/// Timeouts are short so a degraded database surfaces as `Unavailable`
/// quickly and the caller's retry policy takes over.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/social".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// PostgreSQL-backed subscription table, post source and user directory.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await
            .map_err(store_error)?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    fn parse_post_row(row: &PgRow) -> Result<Post, sqlx::Error> {
        let id: i64 = row.try_get("id")?;
        let author_id: i64 = row.try_get("author_id")?;
        let content: String = row.try_get("content")?;
        let media: Option<String> = row.try_get("media")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        let post = Post::new(PostId::new(id), UserId::new(author_id), content, created_at);
        Ok(match media {
            Some(media) => post.with_media(media),
            None => post,
        })
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// Connectivity errors are transient; everything else is a backend failure.
fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn user_ids(rows: &[PgRow], column: &str) -> Result<BTreeSet<UserId>, StoreError> {
    rows.iter()
        .map(|row| row.try_get::<i64, _>(column).map(UserId::new))
        .collect::<Result<_, _>>()
        .map_err(store_error)
}

#[async_trait]
impl SubscriptionTable for PostgresStore {
    async fn insert(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        FollowEdge::new(follower, followee)?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (follower_id, followee_id)
            VALUES ($1, $2)
            ON CONFLICT (follower_id, followee_id) DO NOTHING
            "#,
        )
        .bind(follower.as_i64())
        .bind(followee.as_i64())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::debug!(follower = %follower, followee = %followee, "Subscription row written");
        Ok(())
    }

    async fn delete(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM subscriptions WHERE follower_id = $1 AND followee_id = $2")
            .bind(follower.as_i64())
            .bind(followee.as_i64())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        tracing::debug!(follower = %follower, followee = %followee, "Subscription row deleted");
        Ok(())
    }

    async fn contains(&self, follower: UserId, followee: UserId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM subscriptions WHERE follower_id = $1 AND followee_id = $2
            ) AS present
            "#,
        )
        .bind(follower.as_i64())
        .bind(followee.as_i64())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        row.try_get("present").map_err(store_error)
    }

    async fn followees_of(&self, follower: UserId) -> Result<BTreeSet<UserId>, StoreError> {
        let rows = sqlx::query(
            "SELECT followee_id FROM subscriptions WHERE follower_id = $1 ORDER BY followee_id",
        )
        .bind(follower.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        user_ids(&rows, "followee_id")
    }

    async fn followers_of(&self, followee: UserId) -> Result<BTreeSet<UserId>, StoreError> {
        let rows = sqlx::query(
            "SELECT follower_id FROM subscriptions WHERE followee_id = $1 ORDER BY follower_id",
        )
        .bind(followee.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        user_ids(&rows, "follower_id")
    }

    async fn all_edges(&self) -> Result<BTreeSet<FollowEdge>, StoreError> {
        let rows = sqlx::query(
            "SELECT follower_id, followee_id FROM subscriptions ORDER BY follower_id, followee_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(|row| {
                Ok(FollowEdge {
                    follower: UserId::new(row.try_get("follower_id")?),
                    followee: UserId::new(row.try_get("followee_id")?),
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(store_error)
    }

    async fn is_healthy(&self) -> bool {
        self.ping().await
    }
}

#[async_trait]
impl PostSource for PostgresStore {
    async fn posts_by_author(&self, author: UserId, limit: usize) -> Result<Vec<Post>, StoreError> {
        self.posts_by_authors(&[author], limit).await
    }

    async fn posts_by_authors(
        &self,
        authors: &[UserId],
        limit: usize,
    ) -> Result<Vec<Post>, StoreError> {
        if authors.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = authors.iter().map(|id| id.as_i64()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, author_id, content, media, created_at
            FROM posts
            WHERE author_id = ANY($1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(&ids)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(Self::parse_post_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    async fn username_of(&self, user: UserId) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT username FROM users WHERE id = $1")
            .bind(user.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.map(|r| r.try_get("username"))
            .transpose()
            .map_err(store_error)
    }

    async fn usernames_of(&self, users: &[UserId]) -> Result<HashMap<UserId, String>, StoreError> {
        if users.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<i64> = users.iter().map(|id| id.as_i64()).collect();
        let rows = sqlx::query("SELECT id, username FROM users WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        rows.iter()
            .map(|row| Ok((UserId::new(row.try_get("id")?), row.try_get("username")?)))
            .collect::<Result<_, sqlx::Error>>()
            .map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors_are_transient() {
        assert!(store_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(store_error(sqlx::Error::PoolClosed).is_transient());
        assert!(!store_error(sqlx::Error::RowNotFound).is_transient());
    }
}
