use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::bot::bot_fn;
use bot_builder::cloud_adapter::{SharedConnector, SharedUserTokenClient};
use bot_builder::{BotFrameworkAuthentication, CloudAdapter, TurnContext};
use bot_connector::auth::ClaimsIdentity;
use bot_connector::{AuthenticationError, ConnectorApi, ConnectorError, UserTokenApi};
use bot_schema::{
    Activity, ActivityTypes, ChannelAccount, ConversationAccount, ConversationParameters,
    ConversationResourceResponse, DeliveryModes, ExpectedReplies, InvokeResponse,
    ResourceResponse, SignInResource, TokenExchangeRequest, TokenResponse, TokenStatus,
};
use serde_json::json;

#[derive(Default)]
struct RecordingConnector {
    sent: Mutex<Vec<(String, Option<String>, Activity)>>,
}

#[async_trait]
impl ConnectorApi for RecordingConnector {
    async fn send_to_conversation(
        &self,
        conversation_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((conversation_id.into(), None, activity.clone()));
        Ok(ResourceResponse::new(format!("posted-{}", sent.len())))
    }

    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((conversation_id.into(), Some(activity_id.into()), activity.clone()));
        Ok(ResourceResponse::new(format!("reply-{}", sent.len())))
    }

    async fn update_activity(
        &self,
        _conversation_id: &str,
        activity_id: &str,
        _activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError> {
        Ok(ResourceResponse::new(activity_id))
    }

    async fn delete_activity(&self, _: &str, _: &str) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn get_conversation_members(&self, _: &str) -> Result<Vec<ChannelAccount>, ConnectorError> {
        Ok(Vec::new())
    }

    async fn get_activity_members(
        &self,
        _: &str,
        _: &str,
    ) -> Result<Vec<ChannelAccount>, ConnectorError> {
        Ok(Vec::new())
    }

    async fn delete_conversation_member(&self, _: &str, _: &str) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn create_conversation(
        &self,
        _: &ConversationParameters,
    ) -> Result<ConversationResourceResponse, ConnectorError> {
        Ok(ConversationResourceResponse::default())
    }
}

struct NoTokens;

#[async_trait]
impl UserTokenApi for NoTokens {
    async fn get_user_token(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: Option<&str>,
    ) -> Result<Option<TokenResponse>, ConnectorError> {
        Ok(None)
    }

    async fn get_sign_in_resource(
        &self,
        _: &str,
        _: &Activity,
        _: Option<&str>,
    ) -> Result<SignInResource, ConnectorError> {
        Ok(SignInResource::default())
    }

    async fn sign_out_user(&self, _: &str, _: Option<&str>, _: &str) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn get_token_status(
        &self,
        _: &str,
        _: &str,
        _: Option<&str>,
    ) -> Result<Vec<TokenStatus>, ConnectorError> {
        Ok(Vec::new())
    }

    async fn exchange_token(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &TokenExchangeRequest,
    ) -> Result<Option<TokenResponse>, ConnectorError> {
        Ok(None)
    }
}

/// Accepts the literal header `Bearer good` and nothing else.
struct FakeAuth {
    connector: Arc<RecordingConnector>,
}

#[async_trait]
impl BotFrameworkAuthentication for FakeAuth {
    async fn authenticate_request(
        &self,
        _activity: &Activity,
        auth_header: Option<&str>,
    ) -> Result<ClaimsIdentity, AuthenticationError> {
        match auth_header {
            Some("Bearer good") => Ok(ClaimsIdentity::new(
                "Bearer",
                HashMap::from([("aud".to_string(), "bot-app".to_string())]),
            )),
            Some(_) => Err(AuthenticationError::NotAuthenticated),
            None => Err(AuthenticationError::MissingAuthHeader),
        }
    }

    fn create_connector_client(
        &self,
        _service_url: &str,
        _identity: &ClaimsIdentity,
    ) -> Result<SharedConnector, ConnectorError> {
        Ok(self.connector.clone())
    }

    fn create_user_token_client(
        &self,
        _identity: &ClaimsIdentity,
    ) -> Result<SharedUserTokenClient, ConnectorError> {
        Ok(Arc::new(NoTokens))
    }

    fn bot_app_id(&self) -> &str {
        "bot-app"
    }
}

fn adapter() -> (CloudAdapter, Arc<RecordingConnector>) {
    let connector = Arc::new(RecordingConnector::default());
    let auth = FakeAuth {
        connector: connector.clone(),
    };
    (CloudAdapter::new(Arc::new(auth)), connector)
}

fn inbound(activity_type: ActivityTypes) -> Activity {
    let mut activity = Activity::new(activity_type);
    activity.id = Some("in-1".into());
    activity.channel_id = Some("msteams".into());
    activity.service_url = Some("https://smba.example.com/".into());
    activity.conversation = Some(ConversationAccount::new("conv-1"));
    activity.from = Some(ChannelAccount::new("user-1"));
    activity.recipient = Some(ChannelAccount::new("bot-app"));
    activity.text = Some("hi".into());
    activity
}

fn echo() -> impl bot_builder::Bot {
    bot_fn(|ctx: &TurnContext| {
        Box::pin(async move {
            ctx.send_text(format!("echo: {}", ctx.activity().text()), None, None)
                .await?;
            ctx.trace_activity("debug", None, None, None).await?;
            Ok(())
        })
    })
}

#[tokio::test]
async fn replies_go_through_the_connector() {
    let (adapter, connector) = adapter();
    let body = adapter
        .process_activity(Some("Bearer good"), inbound(ActivityTypes::Message), &echo())
        .await
        .unwrap();
    assert!(body.is_none());

    let sent = connector.sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "trace activities stay off non-emulator channels");
    let (conversation, reply_to, activity) = &sent[0];
    assert_eq!(conversation, "conv-1");
    assert_eq!(reply_to.as_deref(), Some("in-1"));
    assert_eq!(activity.text(), "echo: hi");
}

#[tokio::test]
async fn rejects_unauthenticated_requests() {
    let (adapter, connector) = adapter();
    let err = adapter
        .process_activity(Some("Bearer bad"), inbound(ActivityTypes::Message), &echo())
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<AuthenticationError>().is_some());
    assert!(connector.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unanswered_invoke_is_not_implemented() {
    let (adapter, _) = adapter();
    let silent = bot_fn(|_ctx: &TurnContext| Box::pin(async { Ok(()) }));
    let body = adapter
        .process_activity(Some("Bearer good"), inbound(ActivityTypes::Invoke), &silent)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body.status, 501);
}

#[tokio::test]
async fn invoke_response_is_returned_to_the_caller() {
    let (adapter, connector) = adapter();
    let answering = bot_fn(|ctx: &TurnContext| {
        Box::pin(async move {
            let mut response = Activity::new(ActivityTypes::InvokeResponse);
            response.value = Some(serde_json::to_value(InvokeResponse::new(
                200,
                Some(json!({ "ok": true })),
            ))?);
            ctx.send_activity(response).await?;
            Ok(())
        })
    });
    let body = adapter
        .process_activity(Some("Bearer good"), inbound(ActivityTypes::Invoke), &answering)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body.status, 200);
    assert_eq!(body.body, Some(json!({ "ok": true })));
    assert!(connector.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn expect_replies_are_buffered_into_the_response() {
    let (adapter, connector) = adapter();
    let mut activity = inbound(ActivityTypes::Message);
    activity.delivery_mode = Some(DeliveryModes::ExpectReplies);
    let body = adapter
        .process_activity(Some("Bearer good"), activity, &echo())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(body.status, 200);
    let replies: ExpectedReplies = serde_json::from_value(body.body.unwrap()).unwrap();
    assert_eq!(replies.activities[0].text(), "echo: hi");
    assert!(connector.sent.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delay_activities_pause_without_sending() {
    let (adapter, connector) = adapter();
    let pausing = bot_fn(|ctx: &TurnContext| {
        Box::pin(async move {
            let mut delay = Activity::new(ActivityTypes::Delay);
            delay.value = Some(json!(250));
            ctx.send_activities(vec![delay, Activity::message("after")])
                .await?;
            Ok(())
        })
    });
    let started = tokio::time::Instant::now();
    adapter
        .process_activity(Some("Bearer good"), inbound(ActivityTypes::Message), &pausing)
        .await
        .unwrap();

    assert!(started.elapsed() >= std::time::Duration::from_millis(250));
    let sent = connector.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].2.text(), "after");
}

#[tokio::test]
async fn continue_conversation_acts_as_the_bot() -> Result<()> {
    let (adapter, connector) = adapter();
    let reference = inbound(ActivityTypes::Message).get_conversation_reference();
    let proactive = bot_fn(|ctx: &TurnContext| {
        Box::pin(async move {
            assert_eq!(ctx.activity().name.as_deref(), Some("ContinueConversation"));
            ctx.send_text("ping", None, None).await?;
            Ok(())
        })
    });
    bot_builder::BotAdapter::continue_conversation(&adapter, reference, &proactive).await?;

    let sent = connector.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "conv-1");
    assert_eq!(sent[0].2.text(), "ping");
    Ok(())
}
