use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::accounts::ChannelAccount;
use crate::enums::ActionTypes;
use crate::tokens::TokenExchangeResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAction {
    #[serde(rename = "type")]
    pub action_type: ActionTypes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
}

impl CardAction {
    /// An `imBack` action whose title and value are both `text`.
    pub fn im_back(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            action_type: ActionTypes::ImBack,
            title: Some(text.clone()),
            image: None,
            text: None,
            display_text: None,
            value: Some(Value::String(text)),
            channel_data: None,
        }
    }

    pub fn with_type(mut self, action_type: ActionTypes) -> Self {
        self.action_type = action_type;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestedActions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default)]
    pub actions: Vec<CardAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap: Option<CardAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeroCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<CardImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<CardAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap: Option<CardAction>,
}

impl HeroCard {
    pub const CONTENT_TYPE: &'static str = "application/vnd.microsoft.card.hero";

    pub fn to_attachment(&self) -> Attachment {
        card_attachment(Self::CONTENT_TYPE, self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub connection_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<CardAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_exchange_resource: Option<TokenExchangeResource>,
}

impl OAuthCard {
    pub const CONTENT_TYPE: &'static str = "application/vnd.microsoft.card.oauth";

    pub fn to_attachment(&self) -> Attachment {
        card_attachment(Self::CONTENT_TYPE, self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigninCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<CardAction>,
}

impl SigninCard {
    pub const CONTENT_TYPE: &'static str = "application/vnd.microsoft.card.signin";

    pub fn to_attachment(&self) -> Attachment {
        card_attachment(Self::CONTENT_TYPE, self)
    }
}

fn card_attachment<T: Serialize>(content_type: &str, card: &T) -> Attachment {
    Attachment {
        content_type: content_type.to_string(),
        content: serde_json::to_value(card).ok(),
        ..Default::default()
    }
}

/// Free-form metadata attached to an activity, such as mentions or places.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Entity {
    pub fn is_type(&self, entity_type: &str) -> bool {
        self.entity_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(entity_type))
            .unwrap_or(false)
    }

    /// Reinterprets the entity as a strongly typed value.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }

    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).and_then(serde_json::from_value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub mentioned: ChannelAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "type", default = "mention_type")]
    pub mention_type: String,
}

fn mention_type() -> String {
    "mention".into()
}

impl Mention {
    pub fn new(mentioned: ChannelAccount, text: impl Into<String>) -> Self {
        Self {
            mentioned,
            text: Some(text.into()),
            mention_type: mention_type(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticAction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}
