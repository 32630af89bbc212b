use async_trait::async_trait;
use bot_builder::{BotState, ConversationState, UserState};
use serde_json::{Map, Value, json};

use crate::dialog_context::DialogContext;
use crate::error::DialogError;

/// Scope names understood by [`super::DialogStateManager`].
pub mod names {
    pub const TURN: &str = "turn";
    pub const DIALOG: &str = "dialog";
    pub const THIS: &str = "this";
    pub const CONVERSATION: &str = "conversation";
    pub const USER: &str = "user";
    pub const SETTINGS: &str = "settings";
    pub const DIALOG_CONTEXT: &str = "dialogcontext";
}

/// Turn state key holding the JSON object exposed as `settings`.
pub const SETTINGS_KEY: &str = "DialogStateManager.Settings";

/// One named root of the dialog memory tree.
#[async_trait]
pub trait MemoryScope: Send + Sync {
    fn name(&self) -> &str;

    fn include_in_snapshot(&self) -> bool {
        true
    }

    fn get_memory(&self, dc: &DialogContext) -> Option<Value>;

    fn set_memory(&self, dc: &DialogContext, memory: Value) -> Result<(), DialogError>;

    async fn load(&self, _dc: &DialogContext, _force: bool) -> Result<(), DialogError> {
        Ok(())
    }

    async fn save_changes(&self, _dc: &DialogContext, _force: bool) -> Result<(), DialogError> {
        Ok(())
    }
}

fn into_object(memory: Value) -> Map<String, Value> {
    match memory {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `turn`: scratch memory that lives for one turn.
pub struct TurnMemoryScope;

impl MemoryScope for TurnMemoryScope {
    fn name(&self) -> &str {
        names::TURN
    }

    fn get_memory(&self, dc: &DialogContext) -> Option<Value> {
        Some(dc.context().turn_state().turn_memory_snapshot())
    }

    fn set_memory(&self, dc: &DialogContext, memory: Value) -> Result<(), DialogError> {
        let memory = into_object(memory);
        dc.context()
            .turn_state()
            .with_turn_memory(|current| *current = memory);
        Ok(())
    }
}

/// `this`: state of the active dialog.
pub struct ThisMemoryScope;

impl MemoryScope for ThisMemoryScope {
    fn name(&self) -> &str {
        names::THIS
    }

    fn get_memory(&self, dc: &DialogContext) -> Option<Value> {
        dc.active_dialog()
            .map(|instance| Value::Object(instance.state))
    }

    fn set_memory(&self, dc: &DialogContext, memory: Value) -> Result<(), DialogError> {
        let memory = into_object(memory);
        dc.with_active_state(|state| *state = memory)
            .ok_or_else(|| DialogError::InvalidPath("this".into()))
    }
}

/// `dialog`: state of the enclosing container dialog, so that every step
/// of a component sees the same values.
pub struct DialogMemoryScope;

impl DialogMemoryScope {
    fn target(dc: &DialogContext) -> Option<DialogContext> {
        let instance = dc.active_dialog()?;
        let is_container = dc
            .find_dialog(&instance.id)
            .is_some_and(|dialog| dialog.as_container().is_some());
        if is_container {
            return Some(dc.clone());
        }
        match dc.parent() {
            Some(parent) if parent.active_dialog().is_some() => Some(parent.clone()),
            _ => Some(dc.clone()),
        }
    }
}

impl MemoryScope for DialogMemoryScope {
    fn name(&self) -> &str {
        names::DIALOG
    }

    fn get_memory(&self, dc: &DialogContext) -> Option<Value> {
        Self::target(dc)?
            .active_dialog()
            .map(|instance| Value::Object(instance.state))
    }

    fn set_memory(&self, dc: &DialogContext, memory: Value) -> Result<(), DialogError> {
        let memory = into_object(memory);
        Self::target(dc)
            .and_then(|target| target.with_active_state(|state| *state = memory))
            .ok_or_else(|| DialogError::InvalidPath("dialog".into()))
    }
}

/// `conversation` and `user`: the cached bot state registered in turn
/// state for this turn.
pub struct BotStateMemoryScope {
    name: &'static str,
    state: fn(&DialogContext) -> Option<BotState>,
}

impl BotStateMemoryScope {
    pub fn conversation() -> Self {
        Self {
            name: names::CONVERSATION,
            state: |dc| {
                dc.context()
                    .turn_state()
                    .get_typed::<ConversationState>()
                    .map(BotState::from)
            },
        }
    }

    pub fn user() -> Self {
        Self {
            name: names::USER,
            state: |dc| {
                dc.context()
                    .turn_state()
                    .get_typed::<UserState>()
                    .map(BotState::from)
            },
        }
    }
}

#[async_trait]
impl MemoryScope for BotStateMemoryScope {
    fn name(&self) -> &str {
        self.name
    }

    fn get_memory(&self, dc: &DialogContext) -> Option<Value> {
        (self.state)(dc)?.get(dc.context())
    }

    fn set_memory(&self, dc: &DialogContext, memory: Value) -> Result<(), DialogError> {
        let state = (self.state)(dc).ok_or_else(|| DialogError::UnknownScope(self.name.into()))?;
        let memory = into_object(memory);
        state
            .with_cached_state(dc.context(), |cached| *cached = memory)
            .ok_or_else(|| DialogError::UnknownScope(self.name.into()))
    }

    async fn load(&self, dc: &DialogContext, force: bool) -> Result<(), DialogError> {
        if let Some(state) = (self.state)(dc) {
            state.load(dc.context(), force).await?;
        }
        Ok(())
    }

    async fn save_changes(&self, dc: &DialogContext, force: bool) -> Result<(), DialogError> {
        if let Some(state) = (self.state)(dc) {
            state.save_changes(dc.context(), force).await?;
        }
        Ok(())
    }
}

/// `settings`: read-only bot configuration.
pub struct SettingsMemoryScope;

impl MemoryScope for SettingsMemoryScope {
    fn name(&self) -> &str {
        names::SETTINGS
    }

    fn include_in_snapshot(&self) -> bool {
        false
    }

    fn get_memory(&self, dc: &DialogContext) -> Option<Value> {
        Some(
            dc.context()
                .turn_state()
                .get::<Value>(SETTINGS_KEY)
                .unwrap_or_else(|| Value::Object(Map::new())),
        )
    }

    fn set_memory(&self, _dc: &DialogContext, _memory: Value) -> Result<(), DialogError> {
        Err(DialogError::ReadOnlyScope(names::SETTINGS.into()))
    }
}

/// `dialogcontext`: read-only view of the stack, the active dialog and the
/// parent's active dialog.
pub struct DialogContextMemoryScope;

impl MemoryScope for DialogContextMemoryScope {
    fn name(&self) -> &str {
        names::DIALOG_CONTEXT
    }

    fn get_memory(&self, dc: &DialogContext) -> Option<Value> {
        let mut stack = Vec::new();
        let mut current = Some(dc.clone());
        while let Some(context) = current {
            stack.extend(
                context
                    .stack()
                    .into_iter()
                    .map(|instance| Value::String(instance.id)),
            );
            current = context.parent().cloned();
        }
        let active = dc.active_dialog().map(|instance| instance.id);
        let parent = dc
            .parent()
            .and_then(DialogContext::active_dialog)
            .map(|instance| instance.id);
        Some(json!({
            "stack": stack,
            "activeDialog": active,
            "parent": parent,
        }))
    }

    fn set_memory(&self, _dc: &DialogContext, _memory: Value) -> Result<(), DialogError> {
        Err(DialogError::ReadOnlyScope(names::DIALOG_CONTEXT.into()))
    }
}
