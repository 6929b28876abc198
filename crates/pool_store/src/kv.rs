use async_trait::async_trait;

/// Hash-table contract over one named collection in the KV store.
///
/// Values are opaque strings; callers that store structured data JSON-encode
/// it first. `get_random` must not fail on an empty collection — it simply
/// returns `None`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn get_random(&self) -> anyhow::Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
    async fn keys(&self) -> anyhow::Result<Vec<String>>;
    async fn values(&self) -> anyhow::Result<Vec<String>>;
    async fn all(&self) -> anyhow::Result<Vec<(String, String)>>;
    async fn len(&self) -> anyhow::Result<u64>;
    async fn clear(&self) -> anyhow::Result<()>;
}
