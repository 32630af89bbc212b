use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_builder::turn_state::keys;
use bot_connector::UserTokenApi;
use bot_connector::auth::{ClaimsIdentity, SkillValidation};
use bot_schema::{
    ActionTypes, Activity, ActivityTypes, CardAction, InputHints, InvokeResponse, OAuthCard,
    SigninCard, TokenExchangeInvokeRequest, TokenExchangeInvokeResponse, TokenExchangeRequest,
    TokenResponse, channels, signin,
};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{
    ATTEMPT_COUNT, PERSISTED_OPTIONS, PERSISTED_STATE, PromptOptions, PromptRecognizerResult,
    PromptValidator, PromptValidatorContext, attempt_count,
};
use crate::dialog::{Dialog, DialogInstance, DialogReason, DialogTurnResult};
use crate::dialog_context::DialogContext;
use crate::error::DialogError;

const PERSISTED_EXPIRES: &str = "expires";
const DEFAULT_TIMEOUT_MS: u64 = 900_000;

static MAGIC_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{6})").expect("magic code pattern must compile"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthPromptSettings {
    pub connection_name: String,
    pub text: Option<String>,
    pub title: Option<String>,
    /// How long the prompt waits for the user to sign in, in milliseconds.
    pub timeout: u64,
    /// End the prompt with no result when the user sends a message that is
    /// not a magic code.
    pub end_on_invalid_message: bool,
}

impl OAuthPromptSettings {
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            text: None,
            title: None,
            timeout: DEFAULT_TIMEOUT_MS,
            end_on_invalid_message: false,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_end_on_invalid_message(mut self, end: bool) -> Self {
        self.end_on_invalid_message = end;
        self
    }
}

/// Asks the user to sign in and returns a [`TokenResponse`].
///
/// A token already cached by the token service ends the prompt right away.
/// Otherwise the prompt sends a sign-in card and waits for one of:
/// a `tokens/response` event, a `signin/verifyState` invoke carrying a
/// magic code, a `signin/tokenExchange` invoke (SSO), or a message holding
/// a six digit magic code.
pub struct OAuthPrompt {
    id: String,
    settings: OAuthPromptSettings,
    validator: Option<PromptValidator<TokenResponse>>,
}

impl OAuthPrompt {
    pub fn new(id: impl Into<String>, settings: OAuthPromptSettings) -> Self {
        Self {
            id: id.into(),
            settings,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: PromptValidator<TokenResponse>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn settings(&self) -> &OAuthPromptSettings {
        &self.settings
    }

    /// Token already held by the token service for the current user.
    pub async fn get_user_token(&self, ctx: &TurnContext) -> Result<Option<TokenResponse>> {
        let client = token_client(ctx)?;
        let (user_id, channel_id) = user_and_channel(ctx.activity())?;
        Ok(client
            .get_user_token(&user_id, &self.settings.connection_name, &channel_id, None)
            .await?)
    }

    pub async fn sign_out_user(&self, ctx: &TurnContext) -> Result<()> {
        let client = token_client(ctx)?;
        let (user_id, channel_id) = user_and_channel(ctx.activity())?;
        client
            .sign_out_user(&user_id, Some(&self.settings.connection_name), &channel_id)
            .await?;
        Ok(())
    }

    async fn send_oauth_card(&self, ctx: &TurnContext, prompt: Option<&Activity>) -> Result<()> {
        let mut activity = prompt.cloned().unwrap_or_else(|| Activity::message(""));
        let text = self.settings.text.clone();
        let title = self
            .settings
            .title
            .clone()
            .unwrap_or_else(|| "Sign In".to_string());

        let channel_id = ctx.activity().channel_id().to_string();
        if channel_requires_signin_card(&channel_id) {
            let has_card = activity
                .attachments
                .iter()
                .any(|attachment| attachment.content_type == SigninCard::CONTENT_TYPE);
            if !has_card {
                let client = token_client(ctx)?;
                let resource = client
                    .get_sign_in_resource(&self.settings.connection_name, ctx.activity(), None)
                    .await?;
                let card = SigninCard {
                    text,
                    buttons: vec![signin_action(title, Some(resource.sign_in_link))],
                };
                activity.attachments.push(card.to_attachment());
            }
        } else {
            let has_card = activity
                .attachments
                .iter()
                .any(|attachment| attachment.content_type == OAuthCard::CONTENT_TYPE);
            if !has_card {
                let client = token_client(ctx)?;
                let resource = client
                    .get_sign_in_resource(&self.settings.connection_name, ctx.activity(), None)
                    .await?;
                let identity = ctx.turn_state().get::<ClaimsIdentity>(keys::BOT_IDENTITY);
                let from_skill = identity
                    .as_ref()
                    .is_some_and(|identity| SkillValidation::is_skill_claim(identity.claims()));

                // Teams and callers without a channel-side OAuth flow need the
                // link on the button itself.
                let action = if from_skill || channel_id == channels::EMULATOR {
                    signin_action(title, Some(resource.sign_in_link.clone()))
                        .with_type(ActionTypes::OpenUrl)
                } else if channel_id == channels::MSTEAMS {
                    signin_action(title, Some(resource.sign_in_link.clone()))
                } else {
                    signin_action(title, None)
                };

                let card = OAuthCard {
                    text,
                    connection_name: self.settings.connection_name.clone(),
                    buttons: vec![action],
                    token_exchange_resource: resource.token_exchange_resource,
                };
                activity.attachments.push(card.to_attachment());
            }
        }

        activity.input_hint.get_or_insert(InputHints::AcceptingInput);
        ctx.send_activity(activity).await?;
        Ok(())
    }

    async fn recognize_token(&self, dc: &DialogContext) -> Result<PromptRecognizerResult<TokenResponse>> {
        let ctx = dc.context();
        let activity = ctx.activity();

        if is_token_response_event(activity) {
            let token = activity
                .value
                .clone()
                .and_then(|value| serde_json::from_value::<TokenResponse>(value).ok());
            return Ok(token
                .map(PromptRecognizerResult::succeeded)
                .unwrap_or_else(PromptRecognizerResult::failed));
        }

        if is_verify_state_invoke(activity) {
            return self.recognize_verify_state(ctx).await;
        }

        if is_token_exchange_invoke(activity) {
            return self.recognize_token_exchange(ctx).await;
        }

        if activity.is_type(&ActivityTypes::Message) {
            if let Some(code) = MAGIC_CODE
                .captures(activity.text())
                .and_then(|captures| captures.get(1))
            {
                let client = token_client(ctx)?;
                let (user_id, channel_id) = user_and_channel(activity)?;
                let token = client
                    .get_user_token(
                        &user_id,
                        &self.settings.connection_name,
                        &channel_id,
                        Some(code.as_str()),
                    )
                    .await?;
                if let Some(token) = token {
                    return Ok(PromptRecognizerResult::succeeded(token));
                }
            }
        }

        Ok(PromptRecognizerResult::failed())
    }

    async fn recognize_verify_state(&self, ctx: &TurnContext) -> Result<PromptRecognizerResult<TokenResponse>> {
        let activity = ctx.activity();
        let magic_code = activity
            .value
            .as_ref()
            .and_then(|value| value.get("state"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let outcome = async {
            let client = token_client(ctx)?;
            let (user_id, channel_id) = user_and_channel(activity)?;
            Ok::<_, anyhow::Error>(
                client
                    .get_user_token(
                        &user_id,
                        &self.settings.connection_name,
                        &channel_id,
                        magic_code.as_deref(),
                    )
                    .await?,
            )
        }
        .await;

        match outcome {
            Ok(Some(token)) => {
                send_invoke_response(ctx, 200, None).await?;
                Ok(PromptRecognizerResult::succeeded(token))
            }
            Ok(None) => {
                send_invoke_response(ctx, 404, None).await?;
                Ok(PromptRecognizerResult::failed())
            }
            Err(err) => {
                warn!(error = %err, connection = %self.settings.connection_name, "verify state failed");
                send_invoke_response(ctx, 500, None).await?;
                Ok(PromptRecognizerResult::failed())
            }
        }
    }

    async fn recognize_token_exchange(&self, ctx: &TurnContext) -> Result<PromptRecognizerResult<TokenResponse>> {
        let activity = ctx.activity();
        let request = activity
            .value
            .clone()
            .and_then(|value| serde_json::from_value::<TokenExchangeInvokeRequest>(value).ok());
        let connection_name = &self.settings.connection_name;

        let Some(request) = request else {
            let body = exchange_failure(
                None,
                connection_name,
                "The bot received an InvokeActivity that is missing a TokenExchangeInvokeRequest value. This is required to be sent with the InvokeActivity.",
            );
            send_invoke_response(ctx, 400, Some(body)).await?;
            return Ok(PromptRecognizerResult::failed());
        };

        if request.connection_name != *connection_name {
            let body = exchange_failure(
                Some(&request.id),
                connection_name,
                "The bot received an InvokeActivity with a TokenExchangeInvokeRequest containing a ConnectionName that does not match the ConnectionName expected by the bot's active OAuthPrompt. Ensure these names match when sending the InvokeActivityInvalid ConnectionName in the TokenExchangeInvokeRequest",
            );
            send_invoke_response(ctx, 400, Some(body)).await?;
            return Ok(PromptRecognizerResult::failed());
        }

        let exchanged = async {
            let client = token_client(ctx)?;
            let (user_id, channel_id) = user_and_channel(activity)?;
            let exchange = TokenExchangeRequest {
                uri: None,
                token: Some(request.token.clone()),
            };
            Ok::<_, anyhow::Error>(
                client
                    .exchange_token(&user_id, connection_name, &channel_id, &exchange)
                    .await?,
            )
        }
        .await;

        match exchanged {
            Ok(Some(token)) if !token.token.is_empty() => {
                let body = serde_json::to_value(TokenExchangeInvokeResponse {
                    id: request.id.clone(),
                    connection_name: connection_name.clone(),
                    failure_detail: None,
                })
                .map_err(DialogError::from)?;
                send_invoke_response(ctx, 200, Some(body)).await?;
                Ok(PromptRecognizerResult::succeeded(token))
            }
            outcome => {
                if let Err(err) = outcome {
                    debug!(error = %err, "token exchange failed");
                }
                let body = exchange_failure(
                    Some(&request.id),
                    connection_name,
                    "The bot is unable to exchange token. Proceed with regular login.",
                );
                send_invoke_response(ctx, 412, Some(body)).await?;
                Ok(PromptRecognizerResult::failed())
            }
        }
    }
}

#[async_trait]
impl Dialog for OAuthPrompt {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(&self, dc: &DialogContext, options: Option<Value>) -> Result<DialogTurnResult> {
        let mut options: PromptOptions = match options {
            None | Some(Value::Null) => PromptOptions::default(),
            Some(value) => serde_json::from_value(value)
                .map_err(|err| DialogError::InvalidOptions(format!("invalid OAuth prompt options: {err}")))?,
        };
        for activity in [&mut options.prompt, &mut options.retry_prompt]
            .into_iter()
            .flatten()
        {
            activity.input_hint.get_or_insert(InputHints::AcceptingInput);
        }

        let expires = i64::try_from(self.settings.timeout)
            .ok()
            .and_then(Duration::try_milliseconds)
            .and_then(|timeout| Utc::now().checked_add_signed(timeout));
        let mut state = Map::new();
        state.insert(ATTEMPT_COUNT.into(), json!(0));
        let persisted_options = serde_json::to_value(&options).map_err(DialogError::from)?;
        dc.with_active_state(|instance| {
            instance.insert(PERSISTED_OPTIONS.into(), persisted_options);
            instance.insert(PERSISTED_STATE.into(), Value::Object(state));
            if let Some(expires) = expires {
                instance.insert(PERSISTED_EXPIRES.into(), Value::String(expires.to_rfc3339()));
            }
        });

        if let Some(token) = self.get_user_token(dc.context()).await? {
            debug!(dialog_id = %self.id, "user already signed in");
            let token = serde_json::to_value(token).map_err(DialogError::from)?;
            return dc.end_dialog(Some(token)).await;
        }

        self.send_oauth_card(dc.context(), options.prompt.as_ref())
            .await?;
        Ok(DialogTurnResult::END_OF_TURN)
    }

    async fn continue_dialog(&self, dc: &DialogContext) -> Result<DialogTurnResult> {
        let ctx = dc.context();
        let (mut state, options, expires) = dc
            .with_active_state(|instance| {
                let state = instance
                    .get(PERSISTED_STATE)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let options: PromptOptions = instance
                    .get(PERSISTED_OPTIONS)
                    .cloned()
                    .and_then(|value| serde_json::from_value(value).ok())
                    .unwrap_or_default();
                let expires = instance
                    .get(PERSISTED_EXPIRES)
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|at| at.with_timezone(&Utc));
                (state, options, expires)
            })
            .unwrap_or_default();

        let activity = ctx.activity();
        let is_message = activity.is_type(&ActivityTypes::Message);
        let timed_out = expires.is_some_and(|expires| Utc::now() > expires);
        let awaited = is_message
            || is_token_response_event(activity)
            || is_verify_state_invoke(activity)
            || is_token_exchange_invoke(activity);
        if timed_out && awaited {
            debug!(dialog_id = %self.id, "sign-in timed out");
            return dc.end_dialog(None).await;
        }

        let recognized = self.recognize_token(dc).await?;
        state.insert(ATTEMPT_COUNT.into(), json!(attempt_count(&state) + 1));
        let persisted_state = Value::Object(state.clone());
        dc.with_active_state(|instance| instance.insert(PERSISTED_STATE.into(), persisted_state));

        let is_valid = match &self.validator {
            Some(validator) => {
                let prompt_context = PromptValidatorContext {
                    context: ctx.clone(),
                    recognized: recognized.clone(),
                    state,
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
            return dc.end_dialog(value).await;
        }

        if is_message && self.settings.end_on_invalid_message {
            return dc.end_dialog(None).await;
        }

        if !ctx.responded() && is_message {
            if let Some(retry) = options.retry_prompt.as_ref() {
                ctx.send_activity(retry.clone()).await?;
            }
        }
        Ok(DialogTurnResult::END_OF_TURN)
    }

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
        let options: PromptOptions = instance
            .state
            .get(PERSISTED_OPTIONS)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        self.send_oauth_card(ctx, options.prompt.as_ref()).await
    }
}

fn token_client(ctx: &TurnContext) -> Result<Arc<dyn UserTokenApi>> {
    ctx.turn_state()
        .get::<Arc<dyn UserTokenApi>>(keys::USER_TOKEN_CLIENT)
        .ok_or_else(|| DialogError::Unsupported("OAuth prompt needs a user token client").into())
}

fn user_and_channel(activity: &Activity) -> Result<(String, String)> {
    let user_id = activity
        .from_id()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DialogError::InvalidOptions("the activity has no sender id".into()))?;
    Ok((user_id.to_string(), activity.channel_id().to_string()))
}

fn channel_requires_signin_card(channel_id: &str) -> bool {
    matches!(
        channel_id,
        channels::CORTANA | channels::SKYPE | channels::SKYPE_FOR_BUSINESS
    )
}

fn signin_action(title: String, link: Option<String>) -> CardAction {
    CardAction {
        action_type: ActionTypes::Signin,
        title: Some(title.clone()),
        image: None,
        text: Some(title),
        display_text: None,
        value: link.map(Value::String),
        channel_data: None,
    }
}

fn is_token_response_event(activity: &Activity) -> bool {
    activity.is_type(&ActivityTypes::Event)
        && activity.name.as_deref() == Some(signin::TOKEN_RESPONSE_EVENT_NAME)
}

fn is_verify_state_invoke(activity: &Activity) -> bool {
    activity.is_type(&ActivityTypes::Invoke)
        && activity.name.as_deref() == Some(signin::VERIFY_STATE_OPERATION_NAME)
}

fn is_token_exchange_invoke(activity: &Activity) -> bool {
    activity.is_type(&ActivityTypes::Invoke)
        && activity.name.as_deref() == Some(signin::TOKEN_EXCHANGE_OPERATION_NAME)
}

fn exchange_failure(id: Option<&str>, connection_name: &str, detail: &str) -> Value {
    json!(TokenExchangeInvokeResponse {
        id: id.unwrap_or_default().to_string(),
        connection_name: connection_name.to_string(),
        failure_detail: Some(detail.to_string()),
    })
}

async fn send_invoke_response(ctx: &TurnContext, status: u16, body: Option<Value>) -> Result<()> {
    let mut activity = Activity::new(ActivityTypes::InvokeResponse);
    activity.value = Some(json!(InvokeResponse::new(status, body)));
    ctx.send_activity(activity).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_a_fifteen_minute_timeout() {
        let settings = OAuthPromptSettings::new("graph").with_title("Login");
        assert_eq!(settings.timeout, 900_000);
        assert_eq!(settings.title.as_deref(), Some("Login"));
        assert!(!settings.end_on_invalid_message);
    }

    #[test]
    fn magic_codes_are_six_digits() {
        let code = MAGIC_CODE
            .captures("my code is 123456")
            .and_then(|captures| captures.get(1))
            .map(|code| code.as_str());
        assert_eq!(code, Some("123456"));
        assert!(MAGIC_CODE.captures("12345").is_none());
    }

    #[test]
    fn legacy_channels_get_signin_cards() {
        assert!(channel_requires_signin_card(channels::CORTANA));
        assert!(channel_requires_signin_card(channels::SKYPE_FOR_BUSINESS));
        assert!(!channel_requires_signin_card(channels::MSTEAMS));
        assert!(!channel_requires_signin_card(channels::WEBCHAT));
    }

    #[test]
    fn exchange_failures_carry_the_request_id() {
        let body = exchange_failure(Some("req-1"), "graph", "nope");
        assert_eq!(body["id"], "req-1");
        assert_eq!(body["connectionName"], "graph");
        assert_eq!(body["failureDetail"], "nope");
    }
}
