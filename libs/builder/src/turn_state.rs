use std::any::{Any, type_name};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde_json::{Map, Value};

/// Well-known turn state keys populated by adapters.
pub mod keys {
    pub const BOT_IDENTITY: &str = "BotIdentity";
    pub const CONNECTOR_CLIENT: &str = "ConnectorClient";
    pub const USER_TOKEN_CLIENT: &str = "UserTokenClient";
    pub const INVOKE_RESPONSE: &str = "BotFrameworkAdapter.InvokeResponse";
    pub const OAUTH_SCOPE: &str = "Microsoft.Bot.Builder.BotAdapter.OAuthScope";
    pub const TELEMETRY_CLIENT: &str = "TelemetryClient";
}

/// Values scoped to a single turn.
///
/// Entries are cloned out on read, so shared values should be stored behind
/// an `Arc`. The `turn` memory map backs the dialog `turn.*` scope.
#[derive(Default)]
pub struct TurnState {
    values: DashMap<String, Arc<dyn Any + Send + Sync>>,
    turn_memory: Mutex<Map<String, Value>>,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Inserts only when `key` is not already present.
    pub fn insert_if_absent<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> bool {
        let mut inserted = false;
        self.values.entry(key.into()).or_insert_with(|| {
            inserted = true;
            Arc::new(value)
        });
        inserted
    }

    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Stores a value under its type name.
    pub fn insert_typed<T: Any + Send + Sync>(&self, value: T) {
        self.insert(type_name::<T>(), value);
    }

    pub fn get_typed<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.get(type_name::<T>())
    }

    /// Runs `f` against the JSON `turn` memory.
    pub fn with_turn_memory<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut memory = self
            .turn_memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut memory)
    }

    pub fn turn_memory_snapshot(&self) -> Value {
        self.with_turn_memory(|memory| Value::Object(memory.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_values_downcast_by_key() {
        let state = TurnState::new();
        state.insert("count", 3_u32);
        state.insert_typed(Arc::new(String::from("shared")));

        assert_eq!(state.get::<u32>("count"), Some(3));
        assert_eq!(state.get::<String>("count"), None);
        assert_eq!(
            state.get_typed::<Arc<String>>().as_deref().map(String::as_str),
            Some("shared")
        );
        assert!(!state.insert_if_absent("count", 9_u32));
        assert_eq!(state.get::<u32>("count"), Some(3));
    }

    #[test]
    fn turn_memory_is_mutable_in_place() {
        let state = TurnState::new();
        state.with_turn_memory(|memory| {
            memory.insert("activityProcessed".into(), json!(true));
        });
        assert_eq!(
            state.turn_memory_snapshot(),
            json!({ "activityProcessed": true })
        );
    }
}
