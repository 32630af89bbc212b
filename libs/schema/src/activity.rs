use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::accounts::{
    ChannelAccount, ConversationAccount, ConversationReference, MessageReaction, ResourceResponse,
};
use crate::cards::{Attachment, Entity, Mention, SemanticAction, SuggestedActions};
use crate::enums::{ActivityTypes, DeliveryModes, EndOfConversationCodes, InputHints};

/// The envelope exchanged between a channel and a bot.
///
/// Every field except `type` is optional on the wire. Properties this crate
/// does not model are kept in [`Activity::properties`] so they survive a
/// round-trip.
///
/// ```
/// use bot_schema::{Activity, ActivityTypes};
///
/// let incoming: Activity = serde_json::from_value(serde_json::json!({
///     "type": "message",
///     "id": "a1",
///     "text": "hi",
///     "from": { "id": "user" },
///     "recipient": { "id": "bot" },
///     "conversation": { "id": "conv" },
///     "channelId": "test"
/// })).unwrap();
/// let reply = incoming.create_reply("hello");
/// assert_eq!(reply.activity_type, ActivityTypes::Message);
/// assert_eq!(reply.reply_to_id.as_deref(), Some("a1"));
/// assert_eq!(reply.from.unwrap().id.as_deref(), Some("bot"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type", default)]
    pub activity_type: ActivityTypes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_layout: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_removed: Vec<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions_added: Vec<MessageReaction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions_removed: Vec<MessageReaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_disclosed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speak: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hint: Option<InputHints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<SuggestedActions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<ConversationReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<EndOfConversationCodes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<DeliveryModes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen_for: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_action: Option<SemanticAction>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Activity {
    pub fn new(activity_type: ActivityTypes) -> Self {
        Self {
            activity_type,
            ..Default::default()
        }
    }

    pub fn create_message_activity() -> Self {
        Self::new(ActivityTypes::Message)
    }

    pub fn create_typing_activity() -> Self {
        Self::new(ActivityTypes::Typing)
    }

    pub fn create_end_of_conversation_activity() -> Self {
        Self::new(ActivityTypes::EndOfConversation)
    }

    pub fn create_event_activity(name: impl Into<String>) -> Self {
        Self {
            activity_type: ActivityTypes::Event,
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn create_conversation_update_activity() -> Self {
        Self::new(ActivityTypes::ConversationUpdate)
    }

    /// Builds a standalone trace activity. The value type defaults to
    /// `name` when a value is present and no type is given.
    pub fn create_trace_activity(
        name: impl Into<String>,
        value_type: Option<&str>,
        value: Option<Value>,
        label: Option<&str>,
    ) -> Self {
        let name = name.into();
        let value_type = match (value_type, &value) {
            (Some(value_type), _) => Some(value_type.to_string()),
            (None, Some(_)) => Some(name.clone()),
            (None, None) => None,
        };
        Self {
            activity_type: ActivityTypes::Trace,
            name: Some(name),
            label: label.map(str::to_string),
            value_type,
            value,
            ..Default::default()
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::create_message_activity()
        }
    }

    pub fn is_type(&self, activity_type: &ActivityTypes) -> bool {
        &self.activity_type == activity_type
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn channel_id(&self) -> &str {
        self.channel_id.as_deref().unwrap_or_default()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().and_then(|c| c.id.as_deref())
    }

    pub fn from_id(&self) -> Option<&str> {
        self.from.as_ref().and_then(|f| f.id.as_deref())
    }

    pub fn recipient_id(&self) -> Option<&str> {
        self.recipient.as_ref().and_then(|r| r.id.as_deref())
    }

    /// Builds a message addressed back to the sender of this activity.
    pub fn create_reply(&self, text: impl Into<String>) -> Activity {
        Activity {
            activity_type: ActivityTypes::Message,
            timestamp: Some(Utc::now()),
            text: Some(text.into()),
            locale: self.locale.clone(),
            ..self.reply_envelope()
        }
    }

    /// Builds a trace activity addressed back to the sender of this activity.
    pub fn create_trace(
        &self,
        name: impl Into<String>,
        value: Option<Value>,
        value_type: Option<&str>,
        label: Option<&str>,
    ) -> Activity {
        let trace = Activity::create_trace_activity(name, value_type, value, label);
        Activity {
            activity_type: trace.activity_type,
            name: trace.name,
            label: trace.label,
            value_type: trace.value_type,
            value: trace.value,
            ..self.reply_envelope()
        }
    }

    fn reply_envelope(&self) -> Activity {
        let swap = |account: &Option<ChannelAccount>| {
            account
                .as_ref()
                .map(|a| ChannelAccount {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    ..Default::default()
                })
                .unwrap_or_default()
        };
        Activity {
            from: Some(swap(&self.recipient)),
            recipient: Some(swap(&self.from)),
            reply_to_id: self.id.clone(),
            service_url: self.service_url.clone(),
            channel_id: self.channel_id.clone(),
            conversation: Some(
                self.conversation
                    .as_ref()
                    .map(|c| ConversationAccount {
                        is_group: c.is_group,
                        id: c.id.clone(),
                        name: c.name.clone(),
                        ..Default::default()
                    })
                    .unwrap_or_default(),
            ),
            ..Default::default()
        }
    }

    pub fn get_conversation_reference(&self) -> ConversationReference {
        ConversationReference {
            activity_id: self.id.clone(),
            user: self.from.clone(),
            bot: self.recipient.clone(),
            conversation: self.conversation.clone(),
            channel_id: self.channel_id.clone(),
            locale: self.locale.clone(),
            service_url: self.service_url.clone(),
        }
    }

    /// Reference for a reply that was already sent, keyed by the reply id.
    pub fn get_reply_conversation_reference(
        &self,
        reply: &ResourceResponse,
    ) -> ConversationReference {
        ConversationReference {
            activity_id: Some(reply.id.clone()),
            ..self.get_conversation_reference()
        }
    }

    /// Addresses this activity using `reference`. Incoming activities come
    /// from the user; outgoing activities come from the bot and reply to the
    /// referenced activity.
    pub fn apply_conversation_reference(
        &mut self,
        reference: &ConversationReference,
        is_incoming: bool,
    ) -> &mut Self {
        self.channel_id = reference.channel_id.clone();
        self.service_url = reference.service_url.clone();
        self.conversation = reference.conversation.clone();
        if self.locale.is_none() {
            self.locale = reference.locale.clone();
        }

        if is_incoming {
            self.from = reference.user.clone();
            self.recipient = reference.bot.clone();
            if reference.activity_id.is_some() {
                self.id = reference.activity_id.clone();
            }
        } else {
            self.from = reference.bot.clone();
            self.recipient = reference.user.clone();
            if reference.activity_id.is_some() {
                self.reply_to_id = reference.activity_id.clone();
            }
        }
        self
    }

    pub fn has_content(&self) -> bool {
        let non_blank = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        non_blank(&self.text)
            || non_blank(&self.summary)
            || !self.attachments.is_empty()
            || self.channel_data.is_some()
    }

    pub fn get_mentions(&self) -> Vec<Mention> {
        self.entities
            .iter()
            .filter(|entity| entity.is_type("mention"))
            .filter_map(|entity| entity.get_as::<Mention>().ok())
            .collect()
    }

    /// Text with every mention of `id` stripped out.
    pub fn mention_free_text(&self, id: &str) -> Option<String> {
        let mut text = self.text.clone()?;
        if id.is_empty() || text.is_empty() {
            return Some(text);
        }
        for mention in self.get_mentions() {
            if mention.mentioned.id.as_deref() != Some(id) {
                continue;
            }
            let pattern = match mention.text.as_deref() {
                Some(t) if !t.is_empty() => t.to_string(),
                _ => format!(
                    "<at>{}</at>",
                    mention.mentioned.name.as_deref().unwrap_or_default()
                ),
            };
            text = text.replace(&pattern, "").trim().to_string();
        }
        Some(text)
    }

    pub fn remove_mention_text(&mut self, id: &str) -> Option<&str> {
        self.text = self.mention_free_text(id);
        self.text.as_deref()
    }

    pub fn remove_recipient_mention(&mut self) -> Option<&str> {
        match self.recipient_id().map(str::to_string) {
            Some(id) => self.remove_mention_text(&id),
            None => self.text.as_deref(),
        }
    }

    pub fn get_channel_data<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.channel_data
            .clone()
            .map(serde_json::from_value)
            .transpose()
    }

    pub fn expects_replies(&self) -> bool {
        matches!(self.delivery_mode, Some(DeliveryModes::ExpectReplies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn incoming() -> Activity {
        serde_json::from_value(json!({
            "type": "message",
            "id": "act-1",
            "text": "<at>Echo</at> hello there",
            "locale": "en-US",
            "serviceUrl": "https://smba.example.com/",
            "channelId": "msteams",
            "from": { "id": "user-1", "name": "Ada", "role": "user" },
            "recipient": { "id": "bot-1", "name": "Echo" },
            "conversation": { "id": "conv-1", "isGroup": true },
            "entities": [{
                "type": "mention",
                "mentioned": { "id": "bot-1", "name": "Echo" },
                "text": "<at>Echo</at>"
            }],
            "someChannelExtension": { "x": 1 }
        }))
        .unwrap()
    }

    #[test]
    fn unknown_properties_survive_round_trip() {
        let activity = incoming();
        assert_eq!(activity.properties["someChannelExtension"]["x"], 1);
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["someChannelExtension"]["x"], 1);
        assert_eq!(value["serviceUrl"], "https://smba.example.com/");
    }

    #[test]
    fn reply_swaps_accounts_and_keeps_conversation() {
        let reply = incoming().create_reply("pong");
        assert_eq!(reply.from_id(), Some("bot-1"));
        assert_eq!(reply.recipient_id(), Some("user-1"));
        assert_eq!(reply.conversation_id(), Some("conv-1"));
        assert_eq!(reply.conversation.unwrap().is_group, Some(true));
        assert_eq!(reply.locale.as_deref(), Some("en-US"));
        assert_eq!(reply.reply_to_id.as_deref(), Some("act-1"));
    }

    #[test]
    fn applying_reference_for_outgoing_sets_reply_to() {
        let reference = incoming().get_conversation_reference();
        let mut outgoing = Activity::message("hi");
        outgoing.apply_conversation_reference(&reference, false);
        assert_eq!(outgoing.from_id(), Some("bot-1"));
        assert_eq!(outgoing.recipient_id(), Some("user-1"));
        assert_eq!(outgoing.reply_to_id.as_deref(), Some("act-1"));
        assert_eq!(outgoing.id, None);

        let mut incoming_again = Activity::message("hi");
        incoming_again.apply_conversation_reference(&reference, true);
        assert_eq!(incoming_again.id.as_deref(), Some("act-1"));
        assert_eq!(incoming_again.from_id(), Some("user-1"));
    }

    #[test]
    fn removes_recipient_mention() {
        let mut activity = incoming();
        assert_eq!(activity.remove_recipient_mention(), Some("hello there"));
    }

    #[test]
    fn trace_activity_defaults_value_type_to_name() {
        let trace = Activity::create_trace_activity("Dialog", None, Some(json!({"a": 1})), None);
        assert_eq!(trace.activity_type, ActivityTypes::Trace);
        assert_eq!(trace.value_type.as_deref(), Some("Dialog"));
        assert!(Activity::create_trace_activity("x", None, None, None).value_type.is_none());
    }

    #[test]
    fn continuation_activity_points_back_at_reference() {
        let reference = incoming().get_conversation_reference();
        let activity = reference.get_continuation_activity();
        assert_eq!(activity.activity_type, ActivityTypes::Event);
        assert_eq!(activity.name.as_deref(), Some("ContinueConversation"));
        assert_eq!(activity.relates_to.as_ref(), Some(&reference));
        assert_eq!(activity.from_id(), Some("user-1"));
    }

    #[test]
    fn has_content_checks_text_and_attachments() {
        assert!(!Activity::message("   ").has_content());
        assert!(Activity::message("x").has_content());
    }
}
