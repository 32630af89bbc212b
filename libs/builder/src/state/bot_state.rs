use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use bot_schema::Activity;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::property::StatePropertyAccessor;
use crate::storage::{Storage, StorageError};
use crate::turn_context::TurnContext;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid activity: missing {0}")]
    MissingKeyPart(&'static str),
    #[error("property name cannot be empty")]
    EmptyPropertyName,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("state value could not be converted")]
    Serialization(#[from] serde_json::Error),
}

/// Per-turn copy of one state object plus the hash it had when loaded.
#[derive(Debug, Clone, Default)]
pub struct CachedBotState {
    pub state: Map<String, Value>,
    hash: String,
}

impl CachedBotState {
    fn new(state: Map<String, Value>) -> Self {
        let hash = compute_hash(&state);
        Self { state, hash }
    }

    pub fn is_changed(&self) -> bool {
        self.hash != compute_hash(&self.state)
    }
}

fn compute_hash(state: &Map<String, Value>) -> String {
    let bytes = serde_json::to_vec(state).unwrap_or_default();
    hex::encode(Sha256::digest(bytes))
}

type SharedCache = Arc<Mutex<CachedBotState>>;
type StorageKeyFn = fn(&Activity) -> Result<String, StateError>;

struct BotStateInner {
    storage: Arc<dyn Storage>,
    context_service_key: String,
    storage_key: StorageKeyFn,
}

/// A named slice of persisted state, cached in turn state between `load`
/// and `save_changes`.
#[derive(Clone)]
pub struct BotState {
    inner: Arc<BotStateInner>,
}

impl BotState {
    pub fn new(
        storage: Arc<dyn Storage>,
        context_service_key: impl Into<String>,
        storage_key: StorageKeyFn,
    ) -> Self {
        Self {
            inner: Arc::new(BotStateInner {
                storage,
                context_service_key: context_service_key.into(),
                storage_key,
            }),
        }
    }

    /// Key under which the cached copy lives in turn state.
    pub fn name(&self) -> &str {
        &self.inner.context_service_key
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn storage_key(&self, ctx: &TurnContext) -> Result<String, StateError> {
        (self.inner.storage_key)(ctx.activity())
    }

    pub fn create_property<T>(&self, name: impl Into<String>) -> StatePropertyAccessor<T> {
        StatePropertyAccessor::new(self.clone(), name.into())
    }

    fn cache(&self, ctx: &TurnContext) -> Option<SharedCache> {
        ctx.turn_state().get::<SharedCache>(self.name())
    }

    /// Reads state from storage unless a cached copy exists.
    pub async fn load(&self, ctx: &TurnContext, force: bool) -> Result<(), StateError> {
        if !force && self.cache(ctx).is_some() {
            return Ok(());
        }
        let key = self.storage_key(ctx)?;
        let mut items = self.inner.storage.read(&[key.as_str()]).await?;
        let state = match items.remove(&key) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        debug!(state = self.name(), key, "loaded bot state");
        ctx.turn_state().insert(
            self.name().to_string(),
            Arc::new(Mutex::new(CachedBotState::new(state))),
        );
        Ok(())
    }

    /// Writes the cached state when it changed since it was loaded.
    pub async fn save_changes(&self, ctx: &TurnContext, force: bool) -> Result<(), StateError> {
        let Some(cache) = self.cache(ctx) else {
            return Ok(());
        };
        let snapshot = {
            let cached = cache.lock().unwrap_or_else(PoisonError::into_inner);
            (force || cached.is_changed()).then(|| cached.state.clone())
        };
        let Some(state) = snapshot else {
            return Ok(());
        };

        let key = self.storage_key(ctx)?;
        let hash = compute_hash(&state);
        self.inner
            .storage
            .write(HashMap::from([(key.clone(), Value::Object(state))]))
            .await?;
        cache.lock().unwrap_or_else(PoisonError::into_inner).hash = hash;
        debug!(state = self.name(), key, "saved bot state");
        Ok(())
    }

    /// Replaces the cached copy with an empty object. Storage is untouched
    /// until the next save.
    pub fn clear_state(&self, ctx: &TurnContext) {
        let cleared = CachedBotState {
            state: Map::new(),
            hash: match self.cache(ctx) {
                Some(cache) => cache.lock().unwrap_or_else(PoisonError::into_inner).hash.clone(),
                None => String::new(),
            },
        };
        ctx.turn_state()
            .insert(self.name().to_string(), Arc::new(Mutex::new(cleared)));
    }

    pub async fn delete(&self, ctx: &TurnContext) -> Result<(), StateError> {
        let key = self.storage_key(ctx)?;
        self.inner.storage.delete(&[key.as_str()]).await?;
        ctx.turn_state().remove(self.name());
        Ok(())
    }

    /// Snapshot of the cached state, if loaded.
    pub fn get(&self, ctx: &TurnContext) -> Option<Value> {
        self.cache(ctx).map(|cache| {
            Value::Object(
                cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .state
                    .clone(),
            )
        })
    }

    /// Runs `f` against the cached state map. Returns `None` when the state
    /// has not been loaded this turn.
    pub fn with_cached_state<R>(
        &self,
        ctx: &TurnContext,
        f: impl FnOnce(&mut Map<String, Value>) -> R,
    ) -> Option<R> {
        let cache = self.cache(ctx)?;
        let mut cached = cache.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut cached.state))
    }

    pub(crate) fn get_property_value(&self, ctx: &TurnContext, name: &str) -> Option<Value> {
        let cache = self.cache(ctx)?;
        let cached = cache.lock().unwrap_or_else(PoisonError::into_inner);
        cached.state.get(name).cloned()
    }

    pub(crate) fn set_property_value(&self, ctx: &TurnContext, name: &str, value: Value) {
        if let Some(cache) = self.cache(ctx) {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state
                .insert(name.to_string(), value);
        }
    }

    pub(crate) fn delete_property_value(&self, ctx: &TurnContext, name: &str) {
        if let Some(cache) = self.cache(ctx) {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state
                .remove(name);
        }
    }
}

fn channel_id(activity: &Activity) -> Result<&str, StateError> {
    activity
        .channel_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(StateError::MissingKeyPart("channel id"))
}

fn conversation_id(activity: &Activity) -> Result<&str, StateError> {
    activity
        .conversation_id()
        .filter(|id| !id.is_empty())
        .ok_or(StateError::MissingKeyPart("conversation id"))
}

fn user_id(activity: &Activity) -> Result<&str, StateError> {
    activity
        .from_id()
        .filter(|id| !id.is_empty())
        .ok_or(StateError::MissingKeyPart("from id"))
}

fn conversation_key(activity: &Activity) -> Result<String, StateError> {
    Ok(format!(
        "{}/conversations/{}",
        channel_id(activity)?,
        conversation_id(activity)?
    ))
}

fn user_key(activity: &Activity) -> Result<String, StateError> {
    Ok(format!("{}/users/{}", channel_id(activity)?, user_id(activity)?))
}

fn private_conversation_key(activity: &Activity) -> Result<String, StateError> {
    Ok(format!(
        "{}/conversations/{}/users/{}",
        channel_id(activity)?,
        conversation_id(activity)?,
        user_id(activity)?
    ))
}

macro_rules! scoped_state {
    ($(#[$meta:meta])* $name:ident, $key_fn:path) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(BotState);

        impl $name {
            pub fn new(storage: Arc<dyn Storage>) -> Self {
                Self(BotState::new(storage, stringify!($name), $key_fn))
            }
        }

        impl Deref for $name {
            type Target = BotState;

            fn deref(&self) -> &BotState {
                &self.0
            }
        }

        impl From<$name> for BotState {
            fn from(state: $name) -> Self {
                state.0
            }
        }
    };
}

scoped_state!(
    /// State shared by everyone in a conversation.
    ConversationState,
    conversation_key
);
scoped_state!(
    /// State that follows a user across conversations on one channel.
    UserState,
    user_key
);
scoped_state!(
    /// State for one user within one conversation.
    PrivateConversationState,
    private_conversation_key
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use crate::storage::MemoryStorage;
    use bot_schema::{ChannelAccount, ConversationAccount};
    use serde_json::json;

    fn activity() -> Activity {
        Activity {
            channel_id: Some("test".into()),
            from: Some(ChannelAccount::new("user-1")),
            conversation: Some(ConversationAccount::new("conv-1")),
            ..Activity::message("hi")
        }
    }

    fn ctx(activity: Activity) -> TurnContext {
        TurnContext::new(RecordingAdapter::new(), activity)
    }

    #[test]
    fn storage_keys_follow_scope() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let turn = ctx(activity());
        assert_eq!(
            ConversationState::new(storage.clone()).storage_key(&turn).unwrap(),
            "test/conversations/conv-1"
        );
        assert_eq!(
            UserState::new(storage.clone()).storage_key(&turn).unwrap(),
            "test/users/user-1"
        );
        assert_eq!(
            PrivateConversationState::new(storage).storage_key(&turn).unwrap(),
            "test/conversations/conv-1/users/user-1"
        );
    }

    #[test]
    fn missing_ids_are_errors() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let turn = ctx(Activity {
            from: None,
            ..activity()
        });
        let err = UserState::new(storage).storage_key(&turn).unwrap_err();
        assert!(matches!(err, StateError::MissingKeyPart("from id")));
    }

    #[tokio::test]
    async fn save_writes_only_when_changed() {
        let storage = Arc::new(MemoryStorage::new());
        let state = ConversationState::new(storage.clone());
        let turn = ctx(activity());

        state.load(&turn, false).await.unwrap();
        state.save_changes(&turn, false).await.unwrap();
        assert!(storage.read(&["test/conversations/conv-1"]).await.unwrap().is_empty());

        state.set_property_value(&turn, "count", json!(1));
        state.save_changes(&turn, false).await.unwrap();
        let stored = storage.read(&["test/conversations/conv-1"]).await.unwrap();
        assert_eq!(stored["test/conversations/conv-1"], json!({ "count": 1 }));

        let next_turn = ctx(activity());
        state.load(&next_turn, false).await.unwrap();
        assert_eq!(state.get(&next_turn), Some(json!({ "count": 1 })));
    }

    #[tokio::test]
    async fn clear_then_save_empties_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let state = UserState::new(storage.clone());
        let turn = ctx(activity());
        state.load(&turn, false).await.unwrap();
        state.set_property_value(&turn, "name", json!("Ada"));
        state.save_changes(&turn, false).await.unwrap();

        state.clear_state(&turn);
        state.save_changes(&turn, false).await.unwrap();
        assert_eq!(
            storage.read(&["test/users/user-1"]).await.unwrap()["test/users/user-1"],
            json!({})
        );

        state.delete(&turn).await.unwrap();
        assert!(storage.read(&["test/users/user-1"]).await.unwrap().is_empty());
        assert_eq!(state.get(&turn), None);
    }
}
