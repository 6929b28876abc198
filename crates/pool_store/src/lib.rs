mod kv;
mod redis_store;

pub use kv::KvStore;
pub use redis_store::RedisStore;
