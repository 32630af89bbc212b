use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_schema::{ActivityTypes, Attachment};
use serde_json::{Map, Value};

use super::{Prompt, PromptKind, PromptOptions, PromptRecognizerResult, send_prompt};

/// Accepts a message carrying at least one attachment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentKind;

#[async_trait]
impl PromptKind for AttachmentKind {
    type Value = Vec<Attachment>;

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
    ) -> Result<PromptRecognizerResult<Vec<Attachment>>> {
        let activity = ctx.activity();
        if activity.is_type(&ActivityTypes::Message) && !activity.attachments.is_empty() {
            return Ok(PromptRecognizerResult::succeeded(activity.attachments.clone()));
        }
        Ok(PromptRecognizerResult::failed())
    }
}

pub type AttachmentPrompt = Prompt<AttachmentKind>;

impl Prompt<AttachmentKind> {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_kind(id, AttachmentKind)
    }
}
