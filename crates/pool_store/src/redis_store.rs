use async_trait::async_trait;
use rand::seq::SliceRandom;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::kv::KvStore;

/// A single Redis hash used as one logical named table (e.g. `proxy_pool`,
/// `ip_risk`). Reuses one `ConnectionManager` across calls; the manager
/// reconnects transparently on drop.
pub struct RedisStore {
    table: String,
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, table: impl Into<String>) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            table: table.into(),
            conn,
        })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(&self.table, key).await?;
        Ok(value)
    }

    async fn get_random(&self) -> anyhow::Result<Option<String>> {
        let keys = self.keys().await?;
        let Some(key) = keys.choose(&mut rand::thread_rng()) else {
            debug!(target: "pool::store", table = %self.table, "get_random on empty table");
            return Ok(None);
        };
        self.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.hset(&self.table, key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.hdel(&self.table, key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.hexists(&self.table, key).await?;
        Ok(exists)
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.hkeys(&self.table).await?;
        Ok(keys)
    }

    async fn values(&self) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.hvals(&self.table).await?;
        Ok(values)
    }

    async fn all(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let items: Vec<(String, String)> = conn.hgetall(&self.table).await?;
        Ok(items)
    }

    async fn len(&self) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.hlen(&self.table).await?;
        Ok(len)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.del(&self.table).await?;
        Ok(())
    }
}
