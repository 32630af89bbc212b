//! Prompts: single-question dialogs that validate the user's answer and
//! return it to the dialog that started them.

mod activity;
mod attachment;
mod choice;
mod confirm;
pub mod culture;
mod number;
mod oauth;
mod text;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_builder::MessageFactory;
use bot_schema::{Activity, ActivityTypes, InputHints};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::choices::{Choice, ChoiceFactory, ChoiceFactoryOptions, ListStyle};
use crate::dialog::{Dialog, DialogEvent, DialogInstance, DialogReason, DialogTurnResult, events};
use crate::dialog_context::DialogContext;
use crate::error::DialogError;

pub use activity::{ActivityKind, ActivityPrompt};
pub use attachment::{AttachmentKind, AttachmentPrompt};
pub use choice::{ChoiceKind, ChoicePrompt};
pub use confirm::{ConfirmKind, ConfirmPrompt};
pub use culture::{PromptCultureModel, PromptCultureModels};
pub use number::{NumberKind, NumberPrompt, PromptNumber};
pub use oauth::{OAuthPrompt, OAuthPromptSettings};
pub use text::{TextKind, TextPrompt};

pub(crate) const PERSISTED_OPTIONS: &str = "options";
pub(crate) const PERSISTED_STATE: &str = "state";
pub(crate) const ATTEMPT_COUNT: &str = "AttemptCount";

/// What to ask, how to ask again, and which choices to offer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_prompt: Option<Activity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ListStyle>,
    /// Free-form data for validators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validations: Option<Value>,
}

impl PromptOptions {
    pub fn new(prompt: Activity) -> Self {
        Self {
            prompt: Some(prompt),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MessageFactory::text(text))
    }

    pub fn with_retry_prompt(mut self, retry_prompt: Activity) -> Self {
        self.retry_prompt = Some(retry_prompt);
        self
    }

    pub fn with_retry_text(self, text: impl Into<String>) -> Self {
        self.with_retry_prompt(MessageFactory::text(text))
    }

    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_style(mut self, style: ListStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_validations(mut self, validations: Value) -> Self {
        self.validations = Some(validations);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptRecognizerResult<T> {
    pub succeeded: bool,
    pub value: Option<T>,
}

impl<T> PromptRecognizerResult<T> {
    pub fn failed() -> Self {
        Self {
            succeeded: false,
            value: None,
        }
    }

    pub fn succeeded(value: T) -> Self {
        Self {
            succeeded: true,
            value: Some(value),
        }
    }
}

/// Input to a custom prompt validator.
pub struct PromptValidatorContext<T> {
    pub context: TurnContext,
    pub recognized: PromptRecognizerResult<T>,
    pub state: Map<String, Value>,
    pub options: PromptOptions,
}

impl<T> PromptValidatorContext<T> {
    /// Number of answers received so far, including the current one.
    pub fn attempt_count(&self) -> u32 {
        attempt_count(&self.state)
    }
}

pub(crate) fn attempt_count(state: &Map<String, Value>) -> u32 {
    state
        .get(ATTEMPT_COUNT)
        .and_then(Value::as_u64)
        .and_then(|count| u32::try_from(count).ok())
        .unwrap_or(0)
}

pub type PromptValidator<T> = Arc<
    dyn for<'a> Fn(&'a PromptValidatorContext<T>) -> BoxFuture<'a, Result<bool>> + Send + Sync,
>;

pub fn prompt_validator<T, F>(validator: F) -> PromptValidator<T>
where
    F: for<'a> Fn(&'a PromptValidatorContext<T>) -> BoxFuture<'a, Result<bool>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(validator)
}

/// How one kind of prompt asks its question and reads the answer.
#[async_trait]
pub trait PromptKind: Send + Sync + 'static {
    type Value: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    async fn on_prompt(
        &self,
        ctx: &TurnContext,
        state: &Map<String, Value>,
        options: &PromptOptions,
        is_retry: bool,
    ) -> Result<()>;

    async fn on_recognize(
        &self,
        ctx: &TurnContext,
        state: &Map<String, Value>,
        options: &PromptOptions,
    ) -> Result<PromptRecognizerResult<Self::Value>>;

    /// Whether non-message activities are recognized too. Such prompts
    /// re-prompt after every rejected activity.
    fn accepts_any_activity(&self) -> bool {
        false
    }
}

/// Sends the retry prompt on retries when there is one, else the prompt.
pub(crate) async fn send_prompt(ctx: &TurnContext, options: &PromptOptions, is_retry: bool) -> Result<()> {
    let activity = if is_retry {
        options.retry_prompt.as_ref().or(options.prompt.as_ref())
    } else {
        options.prompt.as_ref()
    };
    if let Some(activity) = activity {
        ctx.send_activity(activity.clone()).await?;
    }
    Ok(())
}

/// Merges rendered `choices` into `prompt`, keeping the prompt's own
/// attachments and properties.
pub(crate) fn append_choices(
    prompt: Option<&Activity>,
    channel_id: &str,
    choices: &[Choice],
    style: ListStyle,
    options: Option<&ChoiceFactoryOptions>,
) -> Activity {
    let text = prompt
        .and_then(|prompt| prompt.text.as_deref())
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_default();
    let text_arg = Some(text);

    let rendered = match style {
        ListStyle::Inline => ChoiceFactory::inline(choices, text_arg, None, options),
        ListStyle::List => ChoiceFactory::list(choices, text_arg, None, options),
        ListStyle::SuggestedAction => ChoiceFactory::suggested_action(choices, text_arg, None),
        ListStyle::HeroCard => ChoiceFactory::hero_card(choices, text_arg, None),
        ListStyle::None => Activity::message(text),
        ListStyle::Auto => ChoiceFactory::for_channel(channel_id, choices, text_arg, None, options),
    };

    let Some(prompt) = prompt else {
        let mut rendered = rendered;
        rendered.input_hint = Some(InputHints::ExpectingInput);
        return rendered;
    };

    let mut prompt = prompt.clone();
    prompt.text = rendered.text;
    if rendered
        .suggested_actions
        .as_ref()
        .is_some_and(|actions| !actions.actions.is_empty())
    {
        prompt.suggested_actions = rendered.suggested_actions;
    }
    prompt.attachments.extend(rendered.attachments);
    prompt
}

/// A dialog that asks one question until it gets a valid answer.
pub struct Prompt<K: PromptKind> {
    id: String,
    kind: K,
    validator: Option<PromptValidator<K::Value>>,
}

impl<K: PromptKind> Prompt<K> {
    pub fn with_kind(id: impl Into<String>, kind: K) -> Self {
        Self {
            id: id.into(),
            kind,
            validator: None,
        }
    }

    /// Replaces the default check (recognition succeeded) with `validator`.
    pub fn with_validator(mut self, validator: PromptValidator<K::Value>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut K {
        &mut self.kind
    }

    fn read_instance(state: &Map<String, Value>) -> (Map<String, Value>, PromptOptions) {
        let prompt_state = state
            .get(PERSISTED_STATE)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let options = state
            .get(PERSISTED_OPTIONS)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        (prompt_state, options)
    }

    fn read_active(dc: &DialogContext) -> (Map<String, Value>, PromptOptions) {
        dc.with_active_state(|state| Self::read_instance(state))
            .unwrap_or_default()
    }
}

#[async_trait]
impl<K: PromptKind> Dialog for Prompt<K> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(&self, dc: &DialogContext, options: Option<Value>) -> Result<DialogTurnResult> {
        let mut options: PromptOptions = match options {
            None | Some(Value::Null) => PromptOptions::default(),
            Some(value) => serde_json::from_value(value).map_err(|err| {
                DialogError::InvalidOptions(format!("prompt options are required for prompt dialogs: {err}"))
            })?,
        };
        for activity in [&mut options.prompt, &mut options.retry_prompt]
            .into_iter()
            .flatten()
        {
            activity.input_hint.get_or_insert(InputHints::ExpectingInput);
        }

        let mut state = Map::new();
        state.insert(ATTEMPT_COUNT.into(), json!(0));
        let persisted_options = serde_json::to_value(&options).map_err(DialogError::from)?;
        dc.with_active_state(|instance| {
            instance.insert(PERSISTED_OPTIONS.into(), persisted_options);
            instance.insert(PERSISTED_STATE.into(), Value::Object(state.clone()));
        });

        self.kind
            .on_prompt(dc.context(), &state, &options, false)
            .await?;
        Ok(DialogTurnResult::END_OF_TURN)
    }

    async fn continue_dialog(&self, dc: &DialogContext) -> Result<DialogTurnResult> {
        let ctx = dc.context();
        if !self.kind.accepts_any_activity() && !ctx.activity().is_type(&ActivityTypes::Message) {
            return Ok(DialogTurnResult::END_OF_TURN);
        }

        let (mut state, options) = Self::read_active(dc);
        let recognized = self.kind.on_recognize(ctx, &state, &options).await?;

        state.insert(ATTEMPT_COUNT.into(), json!(attempt_count(&state) + 1));
        let persisted_state = Value::Object(state.clone());
        dc.with_active_state(|instance| instance.insert(PERSISTED_STATE.into(), persisted_state));

        let is_valid = match &self.validator {
            Some(validator) => {
                let prompt_context = PromptValidatorContext {
                    context: ctx.clone(),
                    recognized: recognized.clone(),
                    state: state.clone(),
                    options: options.clone(),
                };
                validator(&prompt_context).await?
            }
            None => recognized.succeeded,
        };

        if is_valid {
            let value = recognized
                .value
                .map(serde_json::to_value)
                .transpose()
                .map_err(DialogError::from)?;
            debug!(dialog_id = %self.id, "prompt answered");
            return dc.end_dialog(value).await;
        }

        if self.kind.accepts_any_activity() || !ctx.responded() {
            self.kind.on_prompt(ctx, &state, &options, true).await?;
        }
        Ok(DialogTurnResult::END_OF_TURN)
    }

    /// A prompt only resumes when something it started ended or when the
    /// stack was rearranged, so it simply asks again.
    async fn resume_dialog(
        &self,
        dc: &DialogContext,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> Result<DialogTurnResult> {
        if let Some(instance) = dc.active_dialog() {
            self.reprompt_dialog(dc.context(), &instance).await?;
        }
        Ok(DialogTurnResult::END_OF_TURN)
    }

    async fn reprompt_dialog(&self, ctx: &TurnContext, instance: &DialogInstance) -> Result<()> {
        let (state, options) = Self::read_instance(&instance.state);
        self.kind.on_prompt(ctx, &state, &options, false).await
    }

    /// Recognizes incoming messages early so interruptions can tell an
    /// answer from a new request.
    async fn on_pre_bubble_event(&self, dc: &DialogContext, event: &DialogEvent) -> Result<bool> {
        if event.name != events::ACTIVITY_RECEIVED
            || self.kind.accepts_any_activity()
            || !dc.context().activity().is_type(&ActivityTypes::Message)
        {
            return Ok(false);
        }
        let (state, options) = Self::read_active(dc);
        let recognized = self.kind.on_recognize(dc.context(), &state, &options).await?;
        Ok(recognized.succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choices::to_choices;
    use bot_schema::{HeroCard, channels};

    #[test]
    fn prompt_options_round_trip_with_camel_case_names() {
        let options = PromptOptions::text("Name?").with_retry_text("Please tell me your name.");
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["retryPrompt"]["text"], "Please tell me your name.");
        let back: PromptOptions = serde_json::from_value(value).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn append_choices_keeps_the_prompt_and_adds_rendering() {
        let mut prompt = MessageFactory::text("Pick a color");
        prompt.input_hint = Some(InputHints::ExpectingInput);
        let choices = to_choices(["red", "green"]);

        let inline = append_choices(Some(&prompt), channels::TEST, &choices, ListStyle::Auto, None);
        assert_eq!(inline.text(), "Pick a color (1) red or (2) green");
        assert_eq!(inline.input_hint, Some(InputHints::ExpectingInput));

        let card = append_choices(Some(&prompt), channels::TEST, &choices, ListStyle::HeroCard, None);
        assert_eq!(card.attachments.len(), 1);
        assert_eq!(card.attachments[0].content_type, HeroCard::CONTENT_TYPE);

        let plain = append_choices(None, channels::TEST, &choices, ListStyle::None, None);
        assert_eq!(plain.text(), "");
        assert_eq!(plain.input_hint, Some(InputHints::ExpectingInput));
    }
}
