use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use super::{ETAG, Storage, StorageError, requested_etag, stored_etag};

#[derive(Default)]
struct Inner {
    items: HashMap<String, Value>,
    next_etag: u64,
}

/// Process-local storage. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: HashMap<String, Value>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items,
                next_etag: 0,
            }),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                inner
                    .items
                    .get(*key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect())
    }

    /// Applies the whole batch or nothing.
    async fn write(&self, changes: HashMap<String, Value>) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;

        for (key, value) in &changes {
            let (Some(requested), Some(current)) = (
                requested_etag(value),
                inner.items.get(key).and_then(stored_etag),
            ) else {
                continue;
            };
            if requested != "*" && requested != current {
                warn!(key, original = %requested, current = %current, "eTag conflict");
                return Err(StorageError::EtagConflict {
                    key: key.clone(),
                    original: requested,
                    current,
                });
            }
        }

        for (key, mut value) in changes {
            if requested_etag(&value).is_some() {
                let tag = inner.next_etag;
                inner.next_etag += 1;
                if let Some(object) = value.as_object_mut() {
                    object.insert(ETAG.into(), Value::String(tag.to_string()));
                }
            }
            inner.items.insert(key, value);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        for key in keys {
            inner.items.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(key: &str, value: Value) -> HashMap<String, Value> {
        HashMap::from([(key.to_string(), value)])
    }

    #[tokio::test]
    async fn read_skips_missing_keys() {
        let storage = MemoryStorage::new();
        storage
            .write(change("a", json!({ "count": 1 })))
            .await
            .unwrap();
        let items = storage.read(&["a", "missing"]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items["a"], json!({ "count": 1 }));
    }

    #[tokio::test]
    async fn plain_objects_are_last_write_wins() {
        let storage = MemoryStorage::new();
        storage.write(change("a", json!({ "v": 1 }))).await.unwrap();
        storage.write(change("a", json!({ "v": 2 }))).await.unwrap();
        assert_eq!(storage.read(&["a"]).await.unwrap()["a"], json!({ "v": 2 }));
    }

    #[tokio::test]
    async fn etag_items_detect_conflicts() {
        let storage = MemoryStorage::new();
        storage
            .write(change("item", json!({ "v": 1, "eTag": "*" })))
            .await
            .unwrap();
        let stored = storage.read(&["item"]).await.unwrap().remove("item").unwrap();
        let tag = stored["eTag"].as_str().unwrap().to_string();

        storage
            .write(change("item", json!({ "v": 2, "eTag": tag })))
            .await
            .unwrap();

        let err = storage
            .write(change("item", json!({ "v": 3, "eTag": tag })))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EtagConflict { ref key, .. } if key == "item"));

        storage
            .write(change("item", json!({ "v": 4, "eTag": "*" })))
            .await
            .unwrap();
        let latest = storage.read(&["item"]).await.unwrap().remove("item").unwrap();
        assert_eq!(latest["v"], json!(4));
        assert_ne!(latest["eTag"], json!(tag));
    }

    #[tokio::test]
    async fn conflicting_batch_writes_nothing() {
        let storage = MemoryStorage::new();
        storage
            .write(change("locked", json!({ "eTag": "*" })))
            .await
            .unwrap();
        let batch = HashMap::from([
            ("fresh".to_string(), json!({ "v": 1 })),
            ("locked".to_string(), json!({ "eTag": "stale" })),
        ]);
        assert!(storage.write(batch).await.is_err());
        assert!(storage.read(&["fresh"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_keys() {
        let storage = MemoryStorage::new();
        storage.write(change("a", json!(1))).await.unwrap();
        storage.delete(&["a", "never"]).await.unwrap();
        assert!(storage.read(&["a"]).await.unwrap().is_empty());
    }
}
