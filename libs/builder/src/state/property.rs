use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::bot_state::{BotState, StateError};
use crate::turn_context::TurnContext;

/// Typed handle to one property of a [`BotState`].
///
/// Values are copied in and out of the cached state, so changes made to a
/// value returned by `get` must be written back with `set`.
pub struct StatePropertyAccessor<T> {
    state: BotState,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StatePropertyAccessor<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> StatePropertyAccessor<T> {
    pub(crate) fn new(state: BotState, name: String) -> Self {
        Self {
            state,
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_name(&self) -> Result<(), StateError> {
        if self.name.is_empty() {
            return Err(StateError::EmptyPropertyName);
        }
        Ok(())
    }
}

impl<T: Serialize + DeserializeOwned> StatePropertyAccessor<T> {
    pub async fn get_opt(&self, ctx: &TurnContext) -> Result<Option<T>, StateError> {
        self.check_name()?;
        self.state.load(ctx, false).await?;
        self.state
            .get_property_value(ctx, &self.name)
            .map(serde_json::from_value)
            .transpose()
            .map_err(StateError::from)
    }

    /// Returns the stored value, storing and returning `default()` when the
    /// property is unset.
    pub async fn get(&self, ctx: &TurnContext, default: impl FnOnce() -> T) -> Result<T, StateError> {
        if let Some(value) = self.get_opt(ctx).await? {
            return Ok(value);
        }
        let value = default();
        self.set(ctx, &value).await?;
        Ok(value)
    }

    pub async fn set(&self, ctx: &TurnContext, value: &T) -> Result<(), StateError> {
        self.check_name()?;
        self.state.load(ctx, false).await?;
        self.state
            .set_property_value(ctx, &self.name, serde_json::to_value(value)?);
        Ok(())
    }

    pub async fn delete(&self, ctx: &TurnContext) -> Result<(), StateError> {
        self.check_name()?;
        self.state.load(ctx, false).await?;
        self.state.delete_property_value(ctx, &self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use crate::state::{ConversationState, UserState};
    use crate::storage::MemoryStorage;
    use bot_schema::{Activity, ChannelAccount, ConversationAccount};
    use serde::Deserialize;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    fn turn() -> TurnContext {
        TurnContext::new(
            RecordingAdapter::new(),
            Activity {
                channel_id: Some("test".into()),
                from: Some(ChannelAccount::new("user-1")),
                conversation: Some(ConversationAccount::new("conv-1")),
                ..Activity::message("hi")
            },
        )
    }

    #[tokio::test]
    async fn get_with_default_stores_the_default() {
        let state = UserState::new(Arc::new(MemoryStorage::new()));
        let profile = state.create_property::<Profile>("profile");
        let ctx = turn();

        assert_eq!(profile.get_opt(&ctx).await.unwrap(), None);
        let created = profile
            .get(&ctx, || Profile {
                name: "Ada".into(),
                age: 36,
            })
            .await
            .unwrap();
        assert_eq!(created.name, "Ada");
        assert_eq!(profile.get_opt(&ctx).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn values_survive_across_turns_after_save() {
        let storage = Arc::new(MemoryStorage::new());
        let state = ConversationState::new(storage);
        let counter = state.create_property::<u32>("turns");

        for expected in 1..=3 {
            let ctx = turn();
            let count = counter.get(&ctx, || 0).await.unwrap() + 1;
            counter.set(&ctx, &count).await.unwrap();
            state.save_changes(&ctx, false).await.unwrap();
            assert_eq!(count, expected);
        }
    }

    #[tokio::test]
    async fn delete_removes_the_property() {
        let state = ConversationState::new(Arc::new(MemoryStorage::new()));
        let flag = state.create_property::<bool>("flag");
        let ctx = turn();
        flag.set(&ctx, &true).await.unwrap();
        flag.delete(&ctx).await.unwrap();
        assert_eq!(flag.get_opt(&ctx).await.unwrap(), None);
    }
}
