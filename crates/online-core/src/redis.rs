//! Redis-backed [`PresenceStore`].
//!
//! Buckets are plain Redis sets. Writes go through `MULTI`/`EXEC` so that an
//! identifier never lands in a bucket without its expiry; reads and removals
//! are pipelined.

use crate::error::StoreError;
use crate::store::{Batch, PresenceStore, Reply, StoreOp};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, FromRedisValue, Value};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, trace};

/// Presence store over a shared Redis connection.
///
/// The underlying [`ConnectionManager`] multiplexes requests and reconnects
/// on failure; cloning the store shares the connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis presence store");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn decode(op: &StoreOp, value: &Value) -> Result<Reply, StoreError> {
        Ok(match op {
            StoreOp::AddMember { .. } | StoreOp::RemoveMember { .. } | StoreOp::ExpireAt { .. } => {
                Reply::Done
            }
            StoreOp::IsMember { .. } => Reply::Bool(bool::from_redis_value(value)?),
            StoreOp::Members { .. } => {
                Reply::Members(HashSet::<String>::from_redis_value(value)?)
            }
        })
    }
}

#[async_trait]
impl PresenceStore for RedisStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(key, member).await?)
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn set_expire_at(&self, key: &str, at: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire_at(key, at).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = ::redis::pipe();
        if batch.is_atomic() {
            pipe.atomic();
        }

        for op in batch.ops() {
            match op {
                StoreOp::AddMember { key, member } => pipe.sadd(key, member),
                StoreOp::RemoveMember { key, member } => pipe.srem(key, member),
                StoreOp::IsMember { key, member } => pipe.sismember(key, member),
                StoreOp::Members { key } => pipe.smembers(key),
                StoreOp::ExpireAt { key, at } => pipe.expire_at(key, *at),
            };
        }

        trace!(
            commands = batch.len(),
            atomic = batch.is_atomic(),
            "Sending Redis pipeline"
        );

        let mut conn = self.conn.clone();
        let values: Vec<Value> = pipe.query_async(&mut conn).await?;
        if values.len() != batch.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "{} replies for {} commands",
                values.len(),
                batch.len()
            )));
        }

        batch
            .ops()
            .iter()
            .zip(values.iter())
            .map(|(op, value)| Self::decode(op, value))
            .collect()
    }
}
