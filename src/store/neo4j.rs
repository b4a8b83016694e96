//! Neo4j graph store for follow edges.
//!
//! Graph model: `(:User {id})-[:FOLLOWS]->(:User {id})`, with `id` the
//! numeric user id. Node creation is folded into the edge `MERGE`, so
//! writing an edge never requires a prior user sync.
//!
//! ## Configuration
//!
//! - `NEO4J_URI`: Bolt endpoint (default: `bolt://localhost:7687`)
//! - `NEO4J_USER`: Username (default: `neo4j`)
//! - `NEO4J_PASSWORD`: Password (default: `neo4j`)

use std::collections::BTreeSet;

use async_trait::async_trait;
use neo4rs::{query, Graph, Query};

use super::{EdgeStore, StoreError};
use crate::types::{FollowEdge, UserId};

/// Connection settings for Neo4j.
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    /// Bolt URI.
    pub uri: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Neo4jConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            uri: std::env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            user: std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: std::env::var("NEO4J_PASSWORD").unwrap_or_else(|_| "neo4j".to_string()),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Neo4j-backed [`EdgeStore`].
///
/// Every driver error maps to [`StoreError::Unavailable`]: the driver does
/// not separate connectivity loss from query failure reliably, and all
/// Cypher here is fixed, so a failure is assumed to be the connection.
pub struct Neo4jEdgeStore {
    graph: Graph,
}

impl Neo4jEdgeStore {
    /// Connect with the given configuration.
    pub async fn new(config: Neo4jConfig) -> Result<Self, StoreError> {
        tracing::info!(uri = %config.uri, "Connecting to Neo4j");

        let graph = Graph::new(&config.uri, &config.user, &config.password)
            .await
            .map_err(unavailable)?;

        Ok(Self { graph })
    }

    /// Connect using environment variables.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(Neo4jConfig::from_env()).await
    }

    /// Create the uniqueness constraint on `User.id` if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.graph
            .run(query(
                "CREATE CONSTRAINT user_id_unique IF NOT EXISTS FOR (u:User) REQUIRE u.id IS UNIQUE",
            ))
            .await
            .map_err(unavailable)
    }

    async fn fetch_ids(&self, q: Query, column: &str) -> Result<Vec<UserId>, StoreError> {
        let mut rows = self.graph.execute(q).await.map_err(unavailable)?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(unavailable)? {
            let id: i64 = row.get(column).map_err(unavailable)?;
            ids.push(UserId::new(id));
        }
        Ok(ids)
    }
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("neo4j: {err}"))
}

fn edge_query(cypher: &str, follower: UserId, followee: UserId) -> Query {
    query(cypher)
        .param("follower", follower.as_i64())
        .param("followee", followee.as_i64())
}

#[async_trait]
impl EdgeStore for Neo4jEdgeStore {
    async fn add_edge(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        FollowEdge::new(follower, followee)?;

        self.graph
            .run(edge_query(
                r#"
                MERGE (a:User {id: $follower})
                MERGE (b:User {id: $followee})
                MERGE (a)-[r:FOLLOWS]->(b)
                ON CREATE SET r.created_at = timestamp()
                "#,
                follower,
                followee,
            ))
            .await
            .map_err(unavailable)?;

        tracing::debug!(follower = %follower, followee = %followee, "FOLLOWS edge merged");
        Ok(())
    }

    async fn remove_edge(&self, follower: UserId, followee: UserId) -> Result<(), StoreError> {
        self.graph
            .run(edge_query(
                r#"
                MATCH (a:User {id: $follower})-[r:FOLLOWS]->(b:User {id: $followee})
                DELETE r
                "#,
                follower,
                followee,
            ))
            .await
            .map_err(unavailable)?;

        tracing::debug!(follower = %follower, followee = %followee, "FOLLOWS edge deleted");
        Ok(())
    }

    async fn has_edge(&self, follower: UserId, followee: UserId) -> Result<bool, StoreError> {
        let mut rows = self
            .graph
            .execute(edge_query(
                r#"
                OPTIONAL MATCH (a:User {id: $follower})-[r:FOLLOWS]->(b:User {id: $followee})
                RETURN count(r) AS n
                "#,
                follower,
                followee,
            ))
            .await
            .map_err(unavailable)?;

        match rows.next().await.map_err(unavailable)? {
            Some(row) => {
                let n: i64 = row.get("n").map_err(unavailable)?;
                Ok(n > 0)
            }
            None => Ok(false),
        }
    }

    async fn successors(&self, user: UserId) -> Result<Vec<UserId>, StoreError> {
        self.fetch_ids(
            query(
                r#"
                MATCH (:User {id: $id})-[:FOLLOWS]->(b:User)
                RETURN b.id AS id
                ORDER BY id
                "#,
            )
            .param("id", user.as_i64()),
            "id",
        )
        .await
    }

    async fn all_edges(&self) -> Result<BTreeSet<FollowEdge>, StoreError> {
        let mut rows = self
            .graph
            .execute(query(
                "MATCH (a:User)-[:FOLLOWS]->(b:User) RETURN a.id AS follower, b.id AS followee",
            ))
            .await
            .map_err(unavailable)?;

        let mut edges = BTreeSet::new();
        while let Some(row) = rows.next().await.map_err(unavailable)? {
            let follower: i64 = row.get("follower").map_err(unavailable)?;
            let followee: i64 = row.get("followee").map_err(unavailable)?;
            edges.insert(FollowEdge {
                follower: UserId::new(follower),
                followee: UserId::new(followee),
            });
        }
        Ok(edges)
    }

    async fn is_healthy(&self) -> bool {
        match self.graph.execute(query("RETURN 1 AS ok")).await {
            Ok(mut rows) => matches!(rows.next().await, Ok(Some(_))),
            Err(_) => false,
        }
    }
}
