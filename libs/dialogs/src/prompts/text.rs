use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_schema::ActivityTypes;
use serde_json::{Map, Value};

use super::{Prompt, PromptKind, PromptOptions, PromptRecognizerResult, send_prompt};

/// Accepts any message text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextKind;

#[async_trait]
impl PromptKind for TextKind {
    type Value = String;

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
    ) -> Result<PromptRecognizerResult<String>> {
        let activity = ctx.activity();
        Ok(match &activity.text {
            Some(text) if activity.is_type(&ActivityTypes::Message) => {
                PromptRecognizerResult::succeeded(text.clone())
            }
            _ => PromptRecognizerResult::failed(),
        })
    }
}

pub type TextPrompt = Prompt<TextKind>;

impl Prompt<TextKind> {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_kind(id, TextKind)
    }
}
