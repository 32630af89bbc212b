mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

use std::collections::HashMap;
use std::{env, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
#[cfg(not(feature = "redis-store"))]
use tracing::warn;

pub use memory::MemoryStorage;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStorage;

/// Property that opts a stored object into optimistic concurrency.
pub const ETAG: &str = "eTag";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("eTag conflict on {key}. Original: {original}, Current: {current}")]
    EtagConflict {
        key: String,
        original: String,
        current: String,
    },
    #[error("storage serialization failed")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend failed")]
    Backend(#[source] anyhow::Error),
}

/// Key/value persistence for bot state and transcripts.
///
/// Values that are JSON objects carrying an `eTag` property take part in
/// optimistic concurrency: a write whose `eTag` is neither `*` nor the stored
/// value fails with [`StorageError::EtagConflict`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Missing keys are absent from the result.
    async fn read(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError>;
    async fn write(&self, changes: HashMap<String, Value>) -> Result<(), StorageError>;
    async fn delete(&self, keys: &[&str]) -> Result<(), StorageError>;
}

pub type SharedStorage = Arc<dyn Storage>;

pub fn shared_memory_storage() -> SharedStorage {
    Arc::new(MemoryStorage::new())
}

/// Picks Redis when `REDIS_URL` is set and the `redis-store` feature is
/// enabled, and memory otherwise.
pub async fn storage_from_env() -> Result<SharedStorage, StorageError> {
    match env::var("REDIS_URL") {
        Ok(url) => {
            let namespace = env::var("STORAGE_NAMESPACE").unwrap_or_else(|_| "bot".into());
            build_redis_storage(&url, &namespace).await
        }
        Err(_) => Ok(shared_memory_storage()),
    }
}

#[cfg(feature = "redis-store")]
async fn build_redis_storage(url: &str, namespace: &str) -> Result<SharedStorage, StorageError> {
    let storage = RedisStorage::connect(url, namespace).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "redis-store"))]
async fn build_redis_storage(_url: &str, _namespace: &str) -> Result<SharedStorage, StorageError> {
    warn!("redis-store feature disabled; using in-memory storage");
    Ok(shared_memory_storage())
}

/// The concurrency token a change asks for, if it takes part at all.
pub(crate) fn requested_etag(value: &Value) -> Option<String> {
    match value.as_object()?.get(ETAG)? {
        Value::String(tag) => Some(tag.clone()),
        Value::Null => Some(String::new()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn stored_etag(value: &Value) -> Option<String> {
    match value.as_object()?.get(ETAG)? {
        Value::String(tag) => Some(tag.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
