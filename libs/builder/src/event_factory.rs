//! Events that hand a conversation over to a human agent hub.

use anyhow::{Context, Result, ensure};
use bot_schema::{Activity, Attachment, ConversationAccount, Transcript};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::turn_context::TurnContext;

pub mod handoff_events {
    pub const INITIATE_HANDOFF: &str = "handoff.initiate";
    pub const HANDOFF_STATUS: &str = "handoff.status";
}

/// Values an agent hub reports through [`EventFactory::create_handoff_status`].
pub mod handoff_states {
    pub const ACCEPTED: &str = "accepted";
    pub const FAILED: &str = "failed";
    pub const COMPLETED: &str = "completed";
}

const TRANSCRIPT_ATTACHMENT: &str = "Transcript";

pub struct EventFactory;

impl EventFactory {
    /// Asks the channel to route the current conversation to an agent hub.
    /// `handoff_context` is hub specific; a `transcript` travels as a JSON
    /// attachment.
    pub fn create_handoff_initiation<T: Serialize>(
        ctx: &TurnContext,
        handoff_context: &T,
        transcript: Option<&Transcript>,
    ) -> Result<Activity> {
        let incoming = ctx.activity();
        let value = serde_json::to_value(handoff_context).context("serializing handoff context")?;
        let mut event = handoff_event(
            handoff_events::INITIATE_HANDOFF,
            value,
            incoming.conversation.clone(),
        );
        event.from = incoming.from.clone();
        event.relates_to = Some(incoming.get_conversation_reference());
        event.reply_to_id = incoming.id.clone();
        event.service_url = incoming.service_url.clone();
        event.channel_id = incoming.channel_id.clone();

        if let Some(transcript) = transcript {
            event.attachments.push(Attachment {
                content_type: "application/json".into(),
                content: Some(serde_json::to_value(transcript).context("serializing transcript")?),
                name: Some(TRANSCRIPT_ATTACHMENT.into()),
                ..Default::default()
            });
        }
        Ok(event)
    }

    /// Reports the outcome of a handoff for `conversation`. `message`
    /// usually explains a failure.
    pub fn create_handoff_status(
        conversation: &ConversationAccount,
        state: &str,
        message: Option<&str>,
    ) -> Result<Activity> {
        ensure!(!state.trim().is_empty(), "handoff state cannot be empty");

        let mut value = Map::new();
        value.insert("state".into(), Value::String(state.to_string()));
        if let Some(message) = message.filter(|message| !message.trim().is_empty()) {
            value.insert("message".into(), Value::String(message.to_string()));
        }
        Ok(handoff_event(
            handoff_events::HANDOFF_STATUS,
            Value::Object(value),
            Some(conversation.clone()),
        ))
    }
}

fn handoff_event(name: &str, value: Value, conversation: Option<ConversationAccount>) -> Activity {
    let mut event = Activity::create_event_activity(name);
    event.value = Some(value);
    event.id = Some(Uuid::new_v4().to_string());
    event.timestamp = Some(Utc::now());
    event.conversation = conversation;
    event
}
