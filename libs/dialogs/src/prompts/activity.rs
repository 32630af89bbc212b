use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_schema::Activity;
use serde_json::{Map, Value};

use super::{Prompt, PromptKind, PromptOptions, PromptRecognizerResult, PromptValidator, send_prompt};

/// Hands every incoming activity, of any type, to the validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityKind;

#[async_trait]
impl PromptKind for ActivityKind {
    type Value = Activity;

    async fn on_prompt(
        &self,
        ctx: &TurnContext,
        _state: &Map<String, Value>,
        options: &PromptOptions,
        is_retry: bool,
    ) -> Result<()> {
        send_prompt(ctx, options, is_retry).await
    }

    async fn on_recognize(
        &self,
        ctx: &TurnContext,
        _state: &Map<String, Value>,
        _options: &PromptOptions,
    ) -> Result<PromptRecognizerResult<Activity>> {
        Ok(PromptRecognizerResult::succeeded(ctx.activity().clone()))
    }

    fn accepts_any_activity(&self) -> bool {
        true
    }
}

pub type ActivityPrompt = Prompt<ActivityKind>;

impl Prompt<ActivityKind> {
    /// Every activity is recognized, so the validator alone decides what
    /// counts as an answer.
    pub fn new(id: impl Into<String>, validator: PromptValidator<Activity>) -> Self {
        Self::with_kind(id, ActivityKind).with_validator(validator)
    }
}
