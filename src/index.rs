//! Vector Index Client.
//!
//! Typed façade over a Redis + RediSearch vector index: one operation,
//! `knn`, that submits the embedding's raw float32 bytes as a `FT.SEARCH
//! ... KNN` query and parses rows into [`Neighbour`]. Connection loss or
//! query error degrades to an empty neighbour list rather than propagating
//! — the scoring kernel treats that as "no anchor", so failures here are
//! never fatal to a request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{redis::cmd, Config as PoolConfig, Pool, Runtime};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{EMBEDDING_DIM, KNN_K};

/// Errors constructing the pooled Redis connection. Query-time failures do
/// not use this type — they degrade to an empty result (see module docs).
#[derive(Debug, Error)]
pub enum IndexError {
    /// The pool configuration was rejected (malformed URL, bad pool size).
    #[error("failed to build redis connection pool: {0}")]
    PoolConfig(#[from] deadpool_redis::CreatePoolError),
    /// The initial startup ping failed.
    #[error("redis ping failed: {0}")]
    Ping(#[from] deadpool_redis::PoolError),
}

/// One result row from a KNN query against the vector index.
pub use crate::model::Neighbour;

/// Abstracts the KNN query so the scoring kernel can be tested against a
/// fake index without a live Redis instance.
#[async_trait]
pub trait VectorIndexClient: Send + Sync {
    /// Query up to `k` nearest neighbours by embedding. Always returns
    /// `<= k` rows sorted by ascending distance; never propagates
    /// transient errors — returns an empty vector and logs instead.
    async fn knn(&self, embedding: &[f32; EMBEDDING_DIM], k: usize) -> Vec<Neighbour>;
}

/// Soft timeout on a single KNN query: past this, the client behaves as
/// if the query returned no rows.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis + RediSearch backed implementation.
pub struct RedisIndexClient {
    pool: Pool,
    index_name: String,
}

impl RedisIndexClient {
    /// Build a connection pool against `redis://host:port/db` (with an
    /// optional password) and ping it once at startup. Pool size is
    /// clamped to a modest ceiling (8-32 connections).
    pub async fn connect(
        host: &str,
        port: u16,
        db: i64,
        password: Option<&str>,
        index_name: impl Into<String>,
        pool_size: usize,
    ) -> Result<Self, IndexError> {
        let url = match password {
            Some(pw) if !pw.is_empty() => format!("redis://:{pw}@{host}:{port}/{db}"),
            _ => format!("redis://{host}:{port}/{db}"),
        };
        let mut cfg = PoolConfig::from_url(url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size.clamp(8, 32)));
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;

        {
            let mut conn = pool.get().await?;
            let _: String = cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(deadpool_redis::PoolError::Backend)?;
        }

        Ok(Self {
            pool,
            index_name: index_name.into(),
        })
    }

    async fn query(&self, embedding: &[f32; EMBEDDING_DIM], k: usize) -> redis::RedisResult<Vec<Neighbour>> {
        let mut bytes = Vec::with_capacity(EMBEDDING_DIM * 4);
        for v in embedding {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let mut conn = self.pool.get().await.map_err(|e| {
            redis::RedisError::from((redis::ErrorKind::IoError, "pool exhausted", e.to_string()))
        })?;

        let query_expr = format!("*=>[KNN {k} @vector $vec AS similarity_score]");
        let raw: redis::Value = cmd("FT.SEARCH")
            .arg(&self.index_name)
            .arg(&query_expr)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(bytes)
            .arg("SORTBY")
            .arg("similarity_score")
            .arg("ASC")
            .arg("DIALECT")
            .arg(2)
            .arg("LIMIT")
            .arg(0)
            .arg(k)
            .query_async(&mut conn)
            .await?;

        Ok(parse_search_reply(raw, k))
    }
}

#[async_trait]
impl VectorIndexClient for RedisIndexClient {
    async fn knn(&self, embedding: &[f32; EMBEDDING_DIM], k: usize) -> Vec<Neighbour> {
        let k = k.min(KNN_K);
        match tokio::time::timeout(QUERY_TIMEOUT, self.query(embedding, k)).await {
            Ok(Ok(neighbours)) => neighbours,
            Ok(Err(err)) => {
                warn!(error = %err, "vector index query failed, treating as no neighbours");
                Vec::new()
            }
            Err(_) => {
                warn!("vector index query timed out after {:?}", QUERY_TIMEOUT);
                Vec::new()
            }
        }
    }
}

/// Parse a `FT.SEARCH` reply into `Neighbour` rows.
///
/// The reply shape is `[total_count, id_1, fields_1, id_2, fields_2, ...]`
/// where `fields_N` is a flat array of alternating field name/value pairs.
/// Rows missing both `id`/`entity_id` are dropped with a debug log.
fn parse_search_reply(value: redis::Value, limit: usize) -> Vec<Neighbour> {
    let redis::Value::Bulk(items) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut i = 1; // items[0] is the total result count
    while i + 1 < items.len() && out.len() < limit {
        let fields = &items[i + 1];
        if let Some(neighbour) = parse_fields(fields) {
            out.push(neighbour);
        } else {
            debug!("dropping KNN row with no id/entity_id field");
        }
        i += 2;
    }
    out
}

fn parse_fields(fields: &redis::Value) -> Option<Neighbour> {
    let redis::Value::Bulk(pairs) = fields else {
        return None;
    };
    let mut id = None;
    let mut distance = None;
    let mut label = None;

    let mut j = 0;
    while j + 1 < pairs.len() {
        let key = bulk_to_string(&pairs[j])?;
        let value = &pairs[j + 1];
        match key.as_str() {
            "id" | "entity_id" => id = bulk_to_string(value),
            "similarity_score" => distance = bulk_to_string(value).and_then(|s| s.parse::<f64>().ok()),
            "label" => label = bulk_to_string(value).and_then(|s| s.parse::<i8>().ok()),
            _ => {}
        }
        j += 2;
    }

    Some(Neighbour {
        id: id?,
        distance: distance?,
        label,
    })
}

fn bulk_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::Status(s) => Some(s.clone()),
        redis::Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// In-memory stub for tests and for the synchronous scoring surface's demo
/// mode — always returns a fixed, pre-seeded neighbour set.
pub struct StaticIndexClient {
    neighbours: Vec<Neighbour>,
}

impl StaticIndexClient {
    /// Build a stub client that always returns `neighbours` (truncated to
    /// the requested `k`), regardless of the query embedding.
    pub fn new(neighbours: Vec<Neighbour>) -> Arc<Self> {
        Arc::new(Self { neighbours })
    }

    /// A stub client that always returns no neighbours, for exercising the
    /// "no anchor" edge case deterministically.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            neighbours: Vec::new(),
        })
    }
}

#[async_trait]
impl VectorIndexClient for StaticIndexClient {
    async fn knn(&self, _embedding: &[f32; EMBEDDING_DIM], k: usize) -> Vec<Neighbour> {
        self.neighbours.iter().take(k).cloned().collect()
    }
}
