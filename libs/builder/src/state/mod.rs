mod bot_state;
mod property;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::try_join_all;

pub use bot_state::{
    BotState, CachedBotState, ConversationState, PrivateConversationState, StateError, UserState,
};
pub use property::StatePropertyAccessor;

use crate::middleware::{Middleware, Next};
use crate::turn_context::TurnContext;

/// A group of states loaded and saved together.
#[derive(Clone, Default)]
pub struct BotStateSet {
    states: Vec<BotState>,
}

impl BotStateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, state: impl Into<BotState>) -> Self {
        self.states.push(state.into());
        self
    }

    pub fn states(&self) -> &[BotState] {
        &self.states
    }

    pub async fn load_all(&self, ctx: &TurnContext, force: bool) -> Result<(), StateError> {
        try_join_all(self.states.iter().map(|state| state.load(ctx, force))).await?;
        Ok(())
    }

    pub async fn save_all_changes(&self, ctx: &TurnContext, force: bool) -> Result<(), StateError> {
        try_join_all(self.states.iter().map(|state| state.save_changes(ctx, force))).await?;
        Ok(())
    }
}

/// Saves every state in the set once the rest of the turn succeeds.
pub struct AutoSaveStateMiddleware {
    states: BotStateSet,
}

impl AutoSaveStateMiddleware {
    pub fn new(states: BotStateSet) -> Self {
        Self { states }
    }

    pub fn states(&self) -> &BotStateSet {
        &self.states
    }
}

#[async_trait]
impl Middleware for AutoSaveStateMiddleware {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        next.run(ctx).await?;
        self.states.save_all_changes(ctx, false).await?;
        Ok(())
    }
}
