use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_schema::{Activity, ActivityTypes};
use serde_json::{Map, Value};

use super::culture::{ENGLISH_CULTURE, PromptCultureModels};
use super::{Prompt, PromptKind, PromptOptions, PromptRecognizerResult, append_choices};
use crate::choices::{ChoiceFactoryOptions, FindChoicesOptions, FoundChoice, ListStyle, recognize_choices};

/// Offers `PromptOptions::choices` and recognizes the one picked, by name,
/// synonym, ordinal or number.
#[derive(Debug, Clone, Default)]
pub struct ChoiceKind {
    default_locale: Option<String>,
    style: ListStyle,
    choice_options: Option<ChoiceFactoryOptions>,
    recognizer_options: Option<FindChoicesOptions>,
}

impl ChoiceKind {
    /// Activity locale, then the recognizer locale, then the default
    /// locale, mapped to a supported culture.
    fn determine_culture(&self, activity: &Activity) -> String {
        let supported = |locale: Option<&str>| {
            locale
                .map(PromptCultureModels::map_to_nearest_language)
                .filter(|culture| PromptCultureModels::get(culture).is_some())
        };
        supported(activity.locale.as_deref())
            .or_else(|| {
                supported(
                    self.recognizer_options
                        .as_ref()
                        .and_then(|options| options.values.locale.as_deref()),
                )
            })
            .or_else(|| supported(self.default_locale.as_deref()))
            .unwrap_or_else(|| ENGLISH_CULTURE.to_string())
    }

    fn factory_options(&self, culture: &str) -> Option<ChoiceFactoryOptions> {
        self.choice_options.clone().or_else(|| {
            PromptCultureModels::get(culture).map(|model| {
                ChoiceFactoryOptions::new(model.separator, model.inline_or, model.inline_or_more, true)
            })
        })
    }
}

#[async_trait]
impl PromptKind for ChoiceKind {
    type Value = FoundChoice;

    async fn on_prompt(
        &self,
        ctx: &TurnContext,
        _state: &Map<String, Value>,
        options: &PromptOptions,
        is_retry: bool,
    ) -> Result<()> {
        let culture = self.determine_culture(ctx.activity());
        let factory_options = self.factory_options(&culture);
        let style = options.style.unwrap_or(self.style);
        let prompt = if is_retry && options.retry_prompt.is_some() {
            options.retry_prompt.as_ref()
        } else {
            options.prompt.as_ref()
        };
        let activity = append_choices(
            prompt,
            ctx.activity().channel_id(),
            &options.choices,
            style,
            factory_options.as_ref(),
        );
        ctx.send_activity(activity).await?;
        Ok(())
    }

    async fn on_recognize(
        &self,
        ctx: &TurnContext,
        _state: &Map<String, Value>,
        options: &PromptOptions,
    ) -> Result<PromptRecognizerResult<FoundChoice>> {
        let activity = ctx.activity();
        let utterance = activity.text();
        if !activity.is_type(&ActivityTypes::Message) || utterance.is_empty() {
            return Ok(PromptRecognizerResult::failed());
        }

        let mut find_options = self.recognizer_options.clone().unwrap_or_default();
        find_options.values.locale = Some(self.determine_culture(activity));
        Ok(recognize_choices(utterance, &options.choices, Some(&find_options))
            .into_iter()
            .next()
            .map(|found| PromptRecognizerResult::succeeded(found.resolution))
            .unwrap_or_else(PromptRecognizerResult::failed))
    }
}

pub type ChoicePrompt = Prompt<ChoiceKind>;

impl Prompt<ChoiceKind> {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_kind(id, ChoiceKind::default())
    }

    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.kind_mut().default_locale = Some(locale.into());
        self
    }

    pub fn with_style(mut self, style: ListStyle) -> Self {
        self.kind_mut().style = style;
        self
    }

    pub fn with_choice_options(mut self, options: ChoiceFactoryOptions) -> Self {
        self.kind_mut().choice_options = Some(options);
        self
    }

    pub fn with_recognizer_options(mut self, options: FindChoicesOptions) -> Self {
        self.kind_mut().recognizer_options = Some(options);
        self
    }
}
