use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bot_connector::auth::{
    ClaimsIdentity, JwtTokenValidation, SkillValidation, constants, get_app_id_from_claims,
};
use bot_connector::{
    AppCredentials, AuthenticationError, ConnectorApi, ConnectorError, MicrosoftAppCredentials,
    RestConnectorClient, RestUserTokenClient, SimpleCredentialProvider, UserTokenApi,
};
use bot_schema::{
    Activity, ActivityTypes, ConversationReference, ExpectedReplies, InvokeResponse,
    ResourceResponse, channels,
};
use metrics::counter;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::adapter::{AdapterCore, BotAdapter};
use crate::bot::Bot;
use crate::middleware::Middleware;
use crate::turn_context::TurnContext;
use crate::turn_state::keys;

pub const DEFAULT_DELAY_MS: u64 = 1000;

const CALLER_ID_AZURE: &str = "urn:botframework:azure";
const CALLER_ID_SKILL_PREFIX: &str = "urn:botframework:aadappid:";

pub type SharedConnector = Arc<dyn ConnectorApi>;
pub type SharedUserTokenClient = Arc<dyn UserTokenApi>;

/// Authenticates inbound requests and builds the clients a turn uses to
/// talk back to the channel.
#[async_trait]
pub trait BotFrameworkAuthentication: Send + Sync {
    async fn authenticate_request(
        &self,
        activity: &Activity,
        auth_header: Option<&str>,
    ) -> Result<ClaimsIdentity, AuthenticationError>;

    fn create_connector_client(
        &self,
        service_url: &str,
        identity: &ClaimsIdentity,
    ) -> Result<SharedConnector, ConnectorError>;

    fn create_user_token_client(
        &self,
        identity: &ClaimsIdentity,
    ) -> Result<SharedUserTokenClient, ConnectorError>;

    fn bot_app_id(&self) -> &str;
}

/// Public-cloud authentication configured from app id and password.
pub struct ConfigurationBotFrameworkAuthentication {
    provider: SimpleCredentialProvider,
    credentials: Arc<MicrosoftAppCredentials>,
    validation: JwtTokenValidation,
    client: Client,
    token_service_url: String,
}

impl ConfigurationBotFrameworkAuthentication {
    pub fn new(app_id: &str, password: &str) -> Self {
        let client = Client::new();
        Self {
            provider: SimpleCredentialProvider::new(app_id, password),
            credentials: Arc::new(
                MicrosoftAppCredentials::new(app_id, password).with_client(client.clone()),
            ),
            validation: JwtTokenValidation::default(),
            client,
            token_service_url: constants::TOKEN_SERVICE_URL.into(),
        }
    }

    /// Reads the app credentials from the environment. `OAUTH_URL`
    /// overrides the token service endpoint.
    pub fn from_env() -> Self {
        let provider = SimpleCredentialProvider::from_env();
        let client = Client::new();
        let credentials = MicrosoftAppCredentials::from_env().with_client(client.clone());
        Self {
            provider,
            credentials: Arc::new(credentials),
            validation: JwtTokenValidation::default(),
            client,
            token_service_url: env::var("OAUTH_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| constants::TOKEN_SERVICE_URL.into()),
        }
    }

    pub fn with_validation(mut self, validation: JwtTokenValidation) -> Self {
        self.validation = validation;
        self
    }
}

#[async_trait]
impl BotFrameworkAuthentication for ConfigurationBotFrameworkAuthentication {
    async fn authenticate_request(
        &self,
        activity: &Activity,
        auth_header: Option<&str>,
    ) -> Result<ClaimsIdentity, AuthenticationError> {
        self.validation
            .authenticate_request(activity, auth_header, &self.provider)
            .await
    }

    fn create_connector_client(
        &self,
        service_url: &str,
        _identity: &ClaimsIdentity,
    ) -> Result<SharedConnector, ConnectorError> {
        let credentials: Arc<dyn AppCredentials> = self.credentials.clone();
        Ok(Arc::new(RestConnectorClient::new(
            self.client.clone(),
            service_url,
            credentials,
        )?))
    }

    fn create_user_token_client(
        &self,
        _identity: &ClaimsIdentity,
    ) -> Result<SharedUserTokenClient, ConnectorError> {
        let credentials: Arc<dyn AppCredentials> = self.credentials.clone();
        Ok(Arc::new(RestUserTokenClient::new(
            self.client.clone(),
            &self.token_service_url,
            credentials,
        )?))
    }

    fn bot_app_id(&self) -> &str {
        self.provider.app_id()
    }
}

/// Adapter for bots hosted behind an HTTP endpoint that the Bot Framework
/// channel service posts activities to.
#[derive(Clone)]
pub struct CloudAdapter {
    core: AdapterCore,
    auth: Arc<dyn BotFrameworkAuthentication>,
}

impl CloudAdapter {
    pub fn new(auth: Arc<dyn BotFrameworkAuthentication>) -> Self {
        Self {
            core: AdapterCore::new(),
            auth,
        }
    }

    pub fn from_env() -> Self {
        Self::new(Arc::new(ConfigurationBotFrameworkAuthentication::from_env()))
    }

    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.core.use_middleware(middleware);
        self
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut AdapterCore {
        &mut self.core
    }

    /// Authenticates and runs one inbound activity.
    ///
    /// Returns the body the HTTP layer should answer with: the invoke
    /// response for invokes, the buffered replies for `expectReplies`, and
    /// `None` otherwise. Authentication failures surface as
    /// [`AuthenticationError`] inside the returned error.
    #[instrument(skip_all, fields(
        channel_id = activity.channel_id(),
        conversation_id = activity.conversation_id().unwrap_or_default(),
        activity_type = %activity.activity_type,
    ))]
    pub async fn process_activity(
        &self,
        auth_header: Option<&str>,
        mut activity: Activity,
        bot: &dyn Bot,
    ) -> Result<Option<InvokeResponse>> {
        let identity = self.auth.authenticate_request(&activity, auth_header).await?;
        activity.caller_id = Some(caller_id(&identity));
        counter!(
            "bot_activities_received_total",
            "channel" => activity.channel_id().to_string(),
            "type" => activity.activity_type.to_string()
        )
        .increment(1);

        let ctx = self.create_context(activity, identity)?;
        self.core.run_pipeline(&ctx, bot).await?;

        let activity = ctx.activity();
        if activity.is_type(&ActivityTypes::Invoke) {
            let stashed = ctx.turn_state().get::<Activity>(keys::INVOKE_RESPONSE);
            let response = match stashed.and_then(|stashed| stashed.value) {
                Some(value) => serde_json::from_value(value)
                    .context("invoke response activity carried an invalid value")?,
                None => InvokeResponse::not_implemented(),
            };
            return Ok(Some(response));
        }
        if activity.expects_replies() {
            let replies = ExpectedReplies {
                activities: ctx.take_buffered_replies(),
            };
            return Ok(Some(InvokeResponse::ok(Some(serde_json::to_value(replies)?))));
        }
        Ok(None)
    }

    fn create_context(&self, activity: Activity, identity: ClaimsIdentity) -> Result<TurnContext> {
        let connector = match activity.service_url.as_deref() {
            Some(url) if !url.is_empty() => {
                Some(self.auth.create_connector_client(url, &identity)?)
            }
            _ => None,
        };
        let user_tokens = self.auth.create_user_token_client(&identity)?;

        let ctx = TurnContext::new(Arc::new(self.clone()), activity);
        let state = ctx.turn_state();
        state.insert(keys::BOT_IDENTITY, identity);
        if let Some(connector) = connector {
            state.insert(keys::CONNECTOR_CLIENT, connector);
        }
        state.insert(keys::USER_TOKEN_CLIENT, user_tokens);
        state.insert(keys::OAUTH_SCOPE, constants::TO_CHANNEL_FROM_BOT_OAUTH_SCOPE.to_string());
        Ok(ctx)
    }

    fn connector(ctx: &TurnContext) -> Result<SharedConnector> {
        ctx.turn_state()
            .get::<SharedConnector>(keys::CONNECTOR_CLIENT)
            .ok_or_else(|| anyhow!("no connector client available for this turn"))
    }
}

fn caller_id(identity: &ClaimsIdentity) -> String {
    if SkillValidation::is_skill_claim(identity.claims()) {
        let app_id = get_app_id_from_claims(identity.claims()).unwrap_or_default();
        format!("{CALLER_ID_SKILL_PREFIX}{app_id}")
    } else {
        CALLER_ID_AZURE.to_string()
    }
}

fn conversation_id(activity: &Activity) -> Result<&str> {
    activity
        .conversation_id()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("activity has no conversation id"))
}

#[async_trait]
impl BotAdapter for CloudAdapter {
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>> {
        let mut responses = Vec::with_capacity(activities.len());
        for mut activity in activities {
            activity.id = None;
            let response = match activity.activity_type.clone() {
                ActivityTypes::Delay => {
                    let millis = activity
                        .value
                        .as_ref()
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_DELAY_MS);
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    ResourceResponse::default()
                }
                ActivityTypes::InvokeResponse => {
                    ctx.turn_state().insert(keys::INVOKE_RESPONSE, activity);
                    ResourceResponse::default()
                }
                ActivityTypes::Trace if activity.channel_id() != channels::EMULATOR => {
                    ResourceResponse::default()
                }
                _ => {
                    let connector = Self::connector(ctx)?;
                    let conversation = conversation_id(&activity)?;
                    let sent = match activity.reply_to_id.as_deref() {
                        Some(reply_to) if !reply_to.is_empty() => {
                            connector
                                .reply_to_activity(conversation, reply_to, &activity)
                                .await?
                        }
                        _ => connector.send_to_conversation(conversation, &activity).await?,
                    };
                    debug!(activity_id = %sent.id, "activity sent");
                    sent
                }
            };
            responses.push(response);
        }
        Ok(responses)
    }

    async fn update_activity(&self, ctx: &TurnContext, activity: Activity) -> Result<ResourceResponse> {
        let connector = Self::connector(ctx)?;
        let activity_id = activity
            .id
            .as_deref()
            .ok_or_else(|| anyhow!("activity to update has no id"))?;
        Ok(connector
            .update_activity(conversation_id(&activity)?, activity_id, &activity)
            .await?)
    }

    async fn delete_activity(&self, ctx: &TurnContext, reference: ConversationReference) -> Result<()> {
        let connector = Self::connector(ctx)?;
        let conversation = reference
            .conversation
            .as_ref()
            .and_then(|c| c.id.as_deref())
            .ok_or_else(|| anyhow!("reference has no conversation id"))?;
        let activity_id = reference
            .activity_id
            .as_deref()
            .ok_or_else(|| anyhow!("reference has no activity id"))?;
        connector.delete_activity(conversation, activity_id).await?;
        Ok(())
    }

    /// Runs `bot` against a synthetic `ContinueConversation` event, acting
    /// as the configured bot app.
    async fn continue_conversation(&self, reference: ConversationReference, bot: &dyn Bot) -> Result<()> {
        let app_id = self.auth.bot_app_id().to_string();
        let identity = ClaimsIdentity::new("ContinueConversation", Default::default())
            .with_claim(constants::AUDIENCE_CLAIM, app_id.clone())
            .with_claim(constants::APPID_CLAIM, app_id);
        let activity = reference.get_continuation_activity();
        info!(
            conversation_id = activity.conversation_id().unwrap_or_default(),
            "continuing conversation"
        );
        let ctx = self.create_context(activity, identity)?;
        self.core.run_pipeline(&ctx, bot).await
    }
}
