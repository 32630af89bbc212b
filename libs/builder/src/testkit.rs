//! In-process adapter and scripted conversations for testing bots.
//!
//! ```ignore
//! use bot_builder::bot::bot_fn;
//! use bot_builder::testkit::{TestAdapter, TestFlow};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let bot = bot_fn(|ctx| {
//!     Box::pin(async move {
//!         let text = format!("echo: {}", ctx.activity().text());
//!         ctx.send_text(text, None, None).await?;
//!         Ok(())
//!     })
//! });
//! TestFlow::new(TestAdapter::new(), bot)
//!     .send("hi")
//!     .assert_reply("echo: hi")
//!     .start_test()
//!     .await
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail, ensure};
use async_trait::async_trait;
use bot_connector::{ConnectorError, UserTokenApi};
use bot_schema::{
    Activity, ActivityTypes, ChannelAccount, ConversationAccount, ConversationReference,
    ResourceResponse, SignInResource, TokenExchangeRequest, TokenExchangeResource, TokenResponse,
    TokenStatus, channels,
};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::adapter::{AdapterCore, BotAdapter};
use crate::bot::Bot;
use crate::middleware::Middleware;
use crate::turn_context::TurnContext;
use crate::turn_state::keys;

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    connection_name: String,
    channel_id: String,
    user_id: String,
}

impl TokenKey {
    fn new(connection_name: &str, channel_id: &str, user_id: &str) -> Self {
        Self {
            connection_name: connection_name.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        }
    }
}

#[derive(Default)]
struct TokenStore {
    tokens: HashMap<TokenKey, String>,
    magic_codes: Vec<(TokenKey, String, String)>,
    exchangeable: HashMap<(TokenKey, String), String>,
}

/// In-memory token service. A stored exchangeable token of `"exception"`
/// makes the exchange fail.
#[derive(Default)]
pub struct TestUserTokenClient {
    store: Mutex<TokenStore>,
}

impl TestUserTokenClient {
    pub fn add_user_token(
        &self,
        connection_name: &str,
        channel_id: &str,
        user_id: &str,
        token: &str,
        magic_code: Option<&str>,
    ) {
        let key = TokenKey::new(connection_name, channel_id, user_id);
        let mut store = lock(&self.store);
        match magic_code {
            Some(code) => store
                .magic_codes
                .push((key, code.to_string(), token.to_string())),
            None => {
                store.tokens.insert(key, token.to_string());
            }
        }
    }

    pub fn add_exchangeable_token(
        &self,
        connection_name: &str,
        channel_id: &str,
        user_id: &str,
        exchangeable_item: &str,
        token: &str,
    ) {
        let key = TokenKey::new(connection_name, channel_id, user_id);
        lock(&self.store)
            .exchangeable
            .insert((key, exchangeable_item.to_string()), token.to_string());
    }
}

fn token_response(key: &TokenKey, token: String) -> TokenResponse {
    TokenResponse {
        channel_id: Some(key.channel_id.clone()),
        connection_name: key.connection_name.clone(),
        token,
        expiration: None,
    }
}

#[async_trait]
impl UserTokenApi for TestUserTokenClient {
    async fn get_user_token(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        magic_code: Option<&str>,
    ) -> Result<Option<TokenResponse>, ConnectorError> {
        let key = TokenKey::new(connection_name, channel_id, user_id);
        let mut store = lock(&self.store);
        if let Some(token) = store.tokens.get(&key) {
            return Ok(Some(token_response(&key, token.clone())));
        }
        let Some(code) = magic_code else {
            return Ok(None);
        };
        let position = store
            .magic_codes
            .iter()
            .position(|(k, magic, _)| *k == key && magic == code);
        Ok(position.map(|index| {
            let (key, _, token) = store.magic_codes.remove(index);
            store.tokens.insert(key.clone(), token.clone());
            token_response(&key, token)
        }))
    }

    async fn get_sign_in_resource(
        &self,
        connection_name: &str,
        activity: &Activity,
        _final_redirect: Option<&str>,
    ) -> Result<SignInResource, ConnectorError> {
        Ok(SignInResource {
            sign_in_link: format!(
                "https://fake.com/oauthsignin/{connection_name}/{}/{}",
                activity.channel_id(),
                activity.from_id().unwrap_or_default()
            ),
            token_exchange_resource: Some(TokenExchangeResource {
                id: Some(uuid::Uuid::new_v4().to_string()),
                provider_id: None,
                uri: Some(format!("api://{connection_name}/resource")),
            }),
        })
    }

    async fn sign_out_user(
        &self,
        user_id: &str,
        connection_name: Option<&str>,
        channel_id: &str,
    ) -> Result<(), ConnectorError> {
        lock(&self.store).tokens.retain(|key, _| {
            !(key.user_id == user_id
                && key.channel_id == channel_id
                && connection_name.is_none_or(|name| key.connection_name == name))
        });
        Ok(())
    }

    async fn get_token_status(
        &self,
        user_id: &str,
        channel_id: &str,
        _include_filter: Option<&str>,
    ) -> Result<Vec<TokenStatus>, ConnectorError> {
        Ok(lock(&self.store)
            .tokens
            .keys()
            .filter(|key| key.user_id == user_id && key.channel_id == channel_id)
            .map(|key| TokenStatus {
                channel_id: Some(key.channel_id.clone()),
                connection_name: key.connection_name.clone(),
                has_token: true,
                service_provider_display_name: None,
            })
            .collect())
    }

    async fn exchange_token(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        request: &TokenExchangeRequest,
    ) -> Result<Option<TokenResponse>, ConnectorError> {
        let key = TokenKey::new(connection_name, channel_id, user_id);
        let item = request
            .token
            .clone()
            .or_else(|| request.uri.clone())
            .unwrap_or_default();
        let token = lock(&self.store).exchangeable.get(&(key.clone(), item)).cloned();
        match token {
            Some(token) if token == "exception" => {
                Err(ConnectorError::Token("exception during token exchange".into()))
            }
            Some(token) => Ok(Some(token_response(&key, token))),
            None => Ok(None),
        }
    }
}

/// Adapter that queues the bot's replies in memory.
#[derive(Clone)]
pub struct TestAdapter {
    core: AdapterCore,
    reference: ConversationReference,
    replies: Arc<Mutex<VecDeque<Activity>>>,
    next_id: Arc<AtomicU64>,
    user_tokens: Arc<TestUserTokenClient>,
    send_trace_activities: bool,
}

impl Default for TestAdapter {
    fn default() -> Self {
        Self::with_reference(Self::create_conversation_reference("Convo1", "user1", "bot"))
    }
}

impl TestAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(reference: ConversationReference) -> Self {
        Self {
            core: AdapterCore::new(),
            reference,
            replies: Arc::default(),
            next_id: Arc::default(),
            user_tokens: Arc::default(),
            send_trace_activities: false,
        }
    }

    pub fn create_conversation_reference(
        name: &str,
        user: &str,
        bot: &str,
    ) -> ConversationReference {
        ConversationReference {
            activity_id: None,
            channel_id: Some(channels::TEST.into()),
            service_url: Some("https://test.com".into()),
            conversation: Some(ConversationAccount {
                is_group: Some(false),
                name: Some(name.into()),
                ..ConversationAccount::new(name)
            }),
            user: Some(ChannelAccount::new(user).with_name(capitalize(user))),
            bot: Some(ChannelAccount::new(bot).with_name(capitalize(bot))),
            locale: Some("en-us".into()),
        }
    }

    pub fn use_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.core.use_middleware(middleware);
        self
    }

    pub fn with_trace_activities(mut self, send: bool) -> Self {
        self.send_trace_activities = send;
        self
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.reference.locale = Some(locale.to_string());
        self
    }

    pub fn core_mut(&mut self) -> &mut AdapterCore {
        &mut self.core
    }

    pub fn conversation_reference(&self) -> &ConversationReference {
        &self.reference
    }

    pub fn user_token_client(&self) -> Arc<TestUserTokenClient> {
        self.user_tokens.clone()
    }

    fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// A message from the test user, optionally carrying `text`.
    pub fn make_activity(&self, text: Option<&str>) -> Activity {
        let mut activity = Activity::create_message_activity();
        activity.text = text.map(str::to_string);
        self.address(&mut activity);
        activity
    }

    fn address(&self, activity: &mut Activity) {
        let reference = &self.reference;
        activity.channel_id.get_or_insert_with(|| reference.channel_id.clone().unwrap_or_default());
        if activity.from.is_none() || activity.from_id() == Some("unknown") {
            activity.from = reference.user.clone();
        }
        activity.recipient.get_or_insert_with(|| reference.bot.clone().unwrap_or_default());
        activity
            .conversation
            .get_or_insert_with(|| reference.conversation.clone().unwrap_or_default());
        activity
            .service_url
            .get_or_insert_with(|| reference.service_url.clone().unwrap_or_default());
        if activity.locale.is_none() {
            activity.locale = reference.locale.clone();
        }
        if activity.id.is_none() {
            activity.id = Some(self.next_id());
        }
        if activity.timestamp.is_none() {
            activity.timestamp = Some(Utc::now());
        }
    }

    /// Runs one inbound activity through middleware and `bot`.
    pub async fn process_activity(&self, mut activity: Activity, bot: &dyn Bot) -> Result<()> {
        self.address(&mut activity);
        let ctx = self.context_for(activity);
        self.core.run_pipeline(&ctx, bot).await
    }

    pub async fn send_text_to_bot(&self, text: &str, bot: &dyn Bot) -> Result<()> {
        self.process_activity(self.make_activity(Some(text)), bot).await
    }

    fn context_for(&self, activity: Activity) -> TurnContext {
        let ctx = TurnContext::new(Arc::new(self.clone()), activity);
        let tokens: Arc<dyn UserTokenApi> = self.user_tokens.clone();
        ctx.turn_state().insert(keys::USER_TOKEN_CLIENT, tokens);
        ctx
    }

    pub fn get_next_reply(&self) -> Option<Activity> {
        lock(&self.replies).pop_front()
    }

    pub fn active_queue(&self) -> Vec<Activity> {
        lock(&self.replies).iter().cloned().collect()
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl BotAdapter for TestAdapter {
    async fn send_activities(
        &self,
        _ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>> {
        let mut responses = Vec::with_capacity(activities.len());
        for mut activity in activities {
            let id = match activity.id.as_deref() {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => uuid::Uuid::new_v4().to_string(),
            };
            activity.id = Some(id.clone());
            activity.timestamp.get_or_insert_with(Utc::now);

            match activity.activity_type {
                ActivityTypes::Delay => {
                    let millis = activity.value.as_ref().and_then(Value::as_u64).unwrap_or(1000);
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }
                ActivityTypes::Trace if !self.send_trace_activities => {}
                _ => lock(&self.replies).push_back(activity),
            }
            responses.push(ResourceResponse::new(id));
        }
        Ok(responses)
    }

    async fn update_activity(&self, _ctx: &TurnContext, activity: Activity) -> Result<ResourceResponse> {
        let id = activity.id.clone().unwrap_or_default();
        let mut replies = lock(&self.replies);
        if let Some(slot) = replies.iter_mut().find(|reply| reply.id.as_deref() == Some(&id)) {
            *slot = activity;
        }
        Ok(ResourceResponse::new(id))
    }

    async fn delete_activity(&self, _ctx: &TurnContext, reference: ConversationReference) -> Result<()> {
        lock(&self.replies).retain(|reply| reply.id != reference.activity_id);
        Ok(())
    }

    async fn continue_conversation(&self, reference: ConversationReference, bot: &dyn Bot) -> Result<()> {
        let ctx = self.context_for(reference.get_continuation_activity());
        self.core.run_pipeline(&ctx, bot).await
    }
}

type Step = Box<dyn FnOnce(TestAdapter, Arc<dyn Bot>) -> BoxFuture<'static, Result<()>> + Send>;

/// A scripted exchange between a test user and a bot. Steps run in order
/// when [`TestFlow::start_test`] is awaited.
pub struct TestFlow {
    adapter: TestAdapter,
    bot: Arc<dyn Bot>,
    steps: Vec<Step>,
    timeout: Duration,
}

impl TestFlow {
    pub fn new(adapter: TestAdapter, bot: impl Bot + 'static) -> Self {
        Self::with_shared_bot(adapter, Arc::new(bot))
    }

    pub fn with_shared_bot(adapter: TestAdapter, bot: Arc<dyn Bot>) -> Self {
        Self {
            adapter,
            bot,
            steps: Vec::new(),
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn step<F>(mut self, step: F) -> Self
    where
        F: FnOnce(TestAdapter, Arc<dyn Bot>) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    pub fn send(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.step(move |adapter, bot| {
            Box::pin(async move { adapter.send_text_to_bot(&text, bot.as_ref()).await })
        })
    }

    pub fn send_activity(self, activity: Activity) -> Self {
        self.step(move |adapter, bot| {
            Box::pin(async move { adapter.process_activity(activity, bot.as_ref()).await })
        })
    }

    pub fn delay(self, duration: Duration) -> Self {
        self.step(move |_, _| {
            Box::pin(async move {
                tokio::time::sleep(duration).await;
                Ok(())
            })
        })
    }

    pub fn assert_reply(self, expected: impl Into<String>) -> Self {
        let expected = expected.into();
        self.assert_reply_with(move |reply| {
            ensure!(
                reply.text() == expected,
                "expected reply {expected:?} but got {:?}",
                reply.text()
            );
            Ok(())
        })
    }

    pub fn assert_reply_with<F>(self, check: F) -> Self
    where
        F: Fn(&Activity) -> Result<()> + Send + 'static,
    {
        let timeout = self.timeout;
        self.step(move |adapter, _| {
            Box::pin(async move {
                let reply = wait_for_reply(&adapter, timeout).await?;
                debug!(text = reply.text(), "asserting reply");
                check(&reply)
            })
        })
    }

    pub fn assert_reply_one_of<S: AsRef<str>>(self, candidates: &[S]) -> Self {
        let candidates: Vec<String> = candidates.iter().map(|c| c.as_ref().to_string()).collect();
        self.assert_reply_with(move |reply| {
            ensure!(
                candidates.iter().any(|candidate| candidate == reply.text()),
                "reply {:?} matched none of {candidates:?}",
                reply.text()
            );
            Ok(())
        })
    }

    pub fn assert_no_reply(self) -> Self {
        self.step(|adapter, _| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                match adapter.get_next_reply() {
                    Some(reply) => bail!(
                        "expected no reply but got {} {:?}",
                        reply.activity_type,
                        reply.text()
                    ),
                    None => Ok(()),
                }
            })
        })
    }

    /// Sends `user_says` and expects `expected` back.
    pub fn test(self, user_says: impl Into<String>, expected: impl Into<String>) -> Self {
        self.send(user_says).assert_reply(expected)
    }

    pub async fn start_test(self) -> Result<()> {
        for (index, step) in self.steps.into_iter().enumerate() {
            step(self.adapter.clone(), self.bot.clone())
                .await
                .map_err(|err| err.context(format!("test step {index} failed")))?;
        }
        Ok(())
    }
}

async fn wait_for_reply(adapter: &TestAdapter, timeout: Duration) -> Result<Activity> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(reply) = adapter.get_next_reply() {
            return Ok(reply);
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("no reply received within {timeout:?}"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::bot_fn;

    fn echo() -> impl Bot {
        bot_fn(|ctx| {
            Box::pin(async move {
                if ctx.activity().is_type(&ActivityTypes::Message) {
                    let text = format!("echo: {}", ctx.activity().text());
                    ctx.send_text(text, None, None).await?;
                }
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn scripted_echo() {
        TestFlow::new(TestAdapter::new(), echo())
            .test("hello", "echo: hello")
            .send("again")
            .assert_reply_one_of(&["echo: nope", "echo: again"])
            .assert_no_reply()
            .start_test()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mismatched_reply_fails_the_flow() {
        let err = TestFlow::new(TestAdapter::new(), echo())
            .test("hello", "something else")
            .start_test()
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("expected reply"));
    }

    #[tokio::test]
    async fn activities_are_addressed_from_the_reference() {
        let adapter = TestAdapter::new();
        let activity = adapter.make_activity(Some("hi"));
        assert_eq!(activity.channel_id(), "test");
        assert_eq!(activity.from_id(), Some("user1"));
        assert_eq!(activity.recipient_id(), Some("bot"));
        assert_eq!(activity.conversation_id(), Some("Convo1"));
        assert_eq!(activity.id.as_deref(), Some("1"));
        assert_eq!(adapter.make_activity(None).id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn magic_codes_redeem_once() {
        let tokens = TestUserTokenClient::default();
        tokens.add_user_token("conn", "test", "user1", "tok", Some("123456"));
        assert!(
            tokens
                .get_user_token("user1", "conn", "test", None)
                .await
                .unwrap()
                .is_none()
        );
        let token = tokens
            .get_user_token("user1", "conn", "test", Some("123456"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.token, "tok");
        assert!(
            tokens
                .get_user_token("user1", "conn", "test", None)
                .await
                .unwrap()
                .is_some()
        );
        tokens.sign_out_user("user1", None, "test").await.unwrap();
        assert!(tokens.get_token_status("user1", "test", None).await.unwrap().is_empty());
    }
}
