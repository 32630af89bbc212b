use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use super::{ETAG, Storage, StorageError, requested_etag};

/// Writes the payload unless the stored object carries a different eTag.
/// Returns an empty string on success and the stored eTag on conflict.
const CHECK_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
local expected = ARGV[1]
if current and expected ~= '*' and expected ~= '' then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and type(decoded) == 'table' and decoded['eTag'] and tostring(decoded['eTag']) ~= expected then
    return tostring(decoded['eTag'])
  end
end
redis.call('SET', KEYS[1], ARGV[2])
return ''
"#;

pub struct RedisStorage {
    namespace: String,
    connection: Mutex<redis::aio::ConnectionManager>,
    script: redis::Script,
}

fn backend(err: redis::RedisError) -> StorageError {
    StorageError::Backend(err.into())
}

impl RedisStorage {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(backend)?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(backend)?;
        Ok(Self {
            namespace: namespace.into(),
            connection: Mutex::new(manager),
            script: redis::Script::new(CHECK_AND_SET),
        })
    }

    fn item_key(&self, key: &str) -> String {
        format!("{}:state:{}", self.namespace, key)
    }

    fn etag_counter_key(&self) -> String {
        format!("{}:etag", self.namespace)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn read(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let redis_keys: Vec<String> = keys.iter().map(|key| self.item_key(key)).collect();
        let mut conn = self.connection.lock().await;
        let payloads: Vec<Option<String>> = conn.mget(&redis_keys).await.map_err(backend)?;
        let mut items = HashMap::new();
        for (key, payload) in keys.iter().zip(payloads) {
            if let Some(raw) = payload {
                items.insert(key.to_string(), serde_json::from_str(&raw)?);
            }
        }
        Ok(items)
    }

    /// Each key is checked and written atomically; a conflict stops the
    /// batch at that key.
    async fn write(&self, changes: HashMap<String, Value>) -> Result<(), StorageError> {
        let mut conn = self.connection.lock().await;
        for (key, mut value) in changes {
            let requested = requested_etag(&value);
            if requested.is_some() {
                let tag: u64 = conn.incr(self.etag_counter_key(), 1).await.map_err(backend)?;
                if let Some(object) = value.as_object_mut() {
                    object.insert(ETAG.into(), Value::String(tag.to_string()));
                }
            }
            let payload = serde_json::to_string(&value)?;
            let current: String = self
                .script
                .key(self.item_key(&key))
                .arg(requested.clone().unwrap_or_default())
                .arg(payload)
                .invoke_async(&mut *conn)
                .await
                .map_err(backend)?;
            if !current.is_empty() {
                let original = requested.unwrap_or_default();
                warn!(key, original = %original, current = %current, "eTag conflict");
                return Err(StorageError::EtagConflict {
                    key,
                    original,
                    current,
                });
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let redis_keys: Vec<String> = keys.iter().map(|key| self.item_key(key)).collect();
        let mut conn = self.connection.lock().await;
        conn.del::<_, ()>(redis_keys).await.map_err(backend)?;
        Ok(())
    }
}
