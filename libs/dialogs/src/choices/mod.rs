//! Choice rendering and fuzzy choice recognition.

mod channel;
mod factory;
mod find;
mod recognizers;
mod tokenizer;

use bot_schema::CardAction;
use serde::{Deserialize, Serialize};

pub use channel::Channel;
pub use factory::{ChoiceFactory, ChoiceFactoryOptions};
pub use find::{
    FindChoicesOptions, FindValuesOptions, SortedValue, find_choices, find_choices_from_strings,
    find_values,
};
pub use recognizers::{recognize_choices, recognize_choices_from_strings};
pub use tokenizer::{Token, TokenizerFn, default_tokenizer};

/// One option offered to the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<CardAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

impl Choice {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_synonyms<I, S>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms = synonyms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_action(mut self, action: CardAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Text shown to the user: the action title when set, else the value.
    pub fn title(&self) -> &str {
        self.action
            .as_ref()
            .and_then(|action| action.title.as_deref())
            .unwrap_or(&self.value)
    }
}

impl From<&str> for Choice {
    fn from(value: &str) -> Self {
        Choice::new(value)
    }
}

impl From<String> for Choice {
    fn from(value: String) -> Self {
        Choice::new(value)
    }
}

/// How a prompt renders its choices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListStyle {
    None,
    #[default]
    Auto,
    Inline,
    List,
    SuggestedAction,
    HeroCard,
}

/// A recognized span of an utterance. `start` and `end` are inclusive
/// character offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResult<T> {
    pub start: usize,
    pub end: usize,
    pub type_name: String,
    pub text: String,
    pub resolution: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundValue {
    pub value: String,
    pub index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundChoice {
    pub value: String,
    pub index: usize,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonym: Option<String>,
}

/// Turns plain strings into choices, skipping blank entries.
pub fn to_choices<I, S>(values: I) -> Vec<Choice>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter(|value| !value.as_ref().trim().is_empty())
        .map(|value| Choice::new(value.as_ref()))
        .collect()
}
