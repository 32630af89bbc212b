use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_schema::{Activity, ActivityTypes};
use serde_json::{Map, Value};

use super::culture::{ENGLISH, ENGLISH_CULTURE, PromptCultureModel, PromptCultureModels};
use super::{Prompt, PromptKind, PromptOptions, PromptRecognizerResult, append_choices};
use crate::choices::{Choice, ChoiceFactoryOptions, ListStyle, recognize_choices};
use crate::recognizers::recognize_boolean;

/// Yes/no question, answered in words or by picking one of two choices.
#[derive(Debug, Clone, Default)]
pub struct ConfirmKind {
    default_locale: Option<String>,
    style: ListStyle,
    choice_options: Option<ChoiceFactoryOptions>,
    confirm_choices: Option<(Choice, Choice)>,
}

fn culture_model(culture: &str) -> &'static PromptCultureModel {
    PromptCultureModels::get(culture).unwrap_or(&ENGLISH)
}

impl ConfirmKind {
    fn determine_culture(&self, activity: &Activity) -> String {
        let locale = activity
            .locale
            .as_deref()
            .or(self.default_locale.as_deref())
            .unwrap_or_default();
        let culture = PromptCultureModels::map_to_nearest_language(locale);
        if PromptCultureModels::get(&culture).is_some() {
            culture
        } else {
            ENGLISH_CULTURE.to_string()
        }
    }

    fn choices(&self, model: &PromptCultureModel) -> [Choice; 2] {
        match &self.confirm_choices {
            Some((yes, no)) => [yes.clone(), no.clone()],
            None => [
                Choice::new(model.yes_in_language),
                Choice::new(model.no_in_language),
            ],
        }
    }

    fn factory_options(&self, model: &PromptCultureModel) -> ChoiceFactoryOptions {
        self.choice_options.clone().unwrap_or_else(|| {
            ChoiceFactoryOptions::new(model.separator, model.inline_or, model.inline_or_more, true)
        })
    }
}

#[async_trait]
impl PromptKind for ConfirmKind {
    type Value = bool;

    async fn on_prompt(
        &self,
        ctx: &TurnContext,
        _state: &Map<String, Value>,
        options: &PromptOptions,
        is_retry: bool,
    ) -> Result<()> {
        let model = culture_model(&self.determine_culture(ctx.activity()));
        let choices = self.choices(model);
        let factory_options = self.factory_options(model);
        let style = options.style.unwrap_or(self.style);
        let prompt = if is_retry && options.retry_prompt.is_some() {
            options.retry_prompt.as_ref()
        } else {
            options.prompt.as_ref()
        };
        let activity = append_choices(
            prompt,
            ctx.activity().channel_id(),
            &choices,
            style,
            Some(&factory_options),
        );
        ctx.send_activity(activity).await?;
        Ok(())
    }

    async fn on_recognize(
        &self,
        ctx: &TurnContext,
        _state: &Map<String, Value>,
        _options: &PromptOptions,
    ) -> Result<PromptRecognizerResult<bool>> {
        let activity = ctx.activity();
        let utterance = activity.text();
        if !activity.is_type(&ActivityTypes::Message) || utterance.is_empty() {
            return Ok(PromptRecognizerResult::failed());
        }

        let culture = self.determine_culture(activity);
        if let Some(found) = recognize_boolean(utterance, &culture) {
            return Ok(PromptRecognizerResult::succeeded(found.value == "true"));
        }

        // The choices may have been rendered with numbers, so "1" or "2"
        // counts as an answer too.
        let model = culture_model(&culture);
        if self.factory_options(model).include_numbers.unwrap_or(true) {
            let choices = self.choices(model);
            if let Some(found) = recognize_choices(utterance, &choices, None).first() {
                return Ok(PromptRecognizerResult::succeeded(found.resolution.index == 0));
            }
        }
        Ok(PromptRecognizerResult::failed())
    }
}

pub type ConfirmPrompt = Prompt<ConfirmKind>;

impl Prompt<ConfirmKind> {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_kind(id, ConfirmKind::default())
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

    /// Replaces the culture's yes/no words; the first choice means yes.
    pub fn with_confirm_choices(mut self, yes: Choice, no: Choice) -> Self {
        self.kind_mut().confirm_choices = Some((yes, no));
        self
    }
}
