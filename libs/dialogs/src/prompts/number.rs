use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_schema::ActivityTypes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::culture::ENGLISH_CULTURE;
use super::{Prompt, PromptKind, PromptOptions, PromptRecognizerResult, send_prompt};
use crate::recognizers::recognize_numbers;

/// Numeric types a [`NumberPrompt`] can produce.
pub trait PromptNumber: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Converts a normalized recognizer value such as `"12"` or `"3.5"`.
    fn from_recognized(value: &str) -> Option<Self>;
}

macro_rules! prompt_number {
    ($($ty:ty),*) => {
        $(impl PromptNumber for $ty {
            fn from_recognized(value: &str) -> Option<Self> {
                value.parse().ok()
            }
        })*
    };
}

prompt_number!(i32, i64, u32, u64, f32, f64);

/// Reads the first number in the message, in the user's culture.
pub struct NumberKind<T> {
    default_locale: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for NumberKind<T> {
    fn default() -> Self {
        Self {
            default_locale: None,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: PromptNumber> PromptKind for NumberKind<T> {
    type Value = T;

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
    ) -> Result<PromptRecognizerResult<T>> {
        let activity = ctx.activity();
        let utterance = activity.text();
        if !activity.is_type(&ActivityTypes::Message) || utterance.is_empty() {
            return Ok(PromptRecognizerResult::failed());
        }
        let culture = activity
            .locale
            .as_deref()
            .or(self.default_locale.as_deref())
            .unwrap_or(ENGLISH_CULTURE);
        Ok(recognize_numbers(utterance, culture)
            .first()
            .and_then(|found| T::from_recognized(&found.value))
            .map(PromptRecognizerResult::succeeded)
            .unwrap_or_else(PromptRecognizerResult::failed))
    }
}

pub type NumberPrompt<T> = Prompt<NumberKind<T>>;

impl<T: PromptNumber> Prompt<NumberKind<T>> {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_kind(id, NumberKind::default())
    }

    /// Culture used when the activity carries no locale.
    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.kind_mut().default_locale = Some(locale.into());
        self
    }
}
