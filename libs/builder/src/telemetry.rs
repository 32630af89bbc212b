use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_schema::{Activity, ActivityTypes};

use crate::middleware::{Middleware, Next};
use crate::turn_context::TurnContext;
use crate::turn_state::keys;

pub type TelemetryProperties = HashMap<String, String>;
pub type TelemetryMetrics = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

/// Sink for bot usage events. Calls must not block; implementations
/// buffer or forward as they see fit.
pub trait BotTelemetryClient: Send + Sync {
    fn track_event(&self, name: &str, properties: &TelemetryProperties, metrics: &TelemetryMetrics);

    fn track_exception(&self, error: &anyhow::Error, properties: &TelemetryProperties);

    fn track_trace(&self, message: &str, severity: Severity, properties: &TelemetryProperties);

    fn track_page_view(&self, name: &str, properties: &TelemetryProperties);

    fn flush(&self) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBotTelemetryClient;

impl BotTelemetryClient for NullBotTelemetryClient {
    fn track_event(&self, _name: &str, _properties: &TelemetryProperties, _metrics: &TelemetryMetrics) {}

    fn track_exception(&self, _error: &anyhow::Error, _properties: &TelemetryProperties) {}

    fn track_trace(&self, _message: &str, _severity: Severity, _properties: &TelemetryProperties) {}

    fn track_page_view(&self, _name: &str, _properties: &TelemetryProperties) {}
}

pub type SharedTelemetryClient = Arc<dyn BotTelemetryClient>;

pub fn null_telemetry_client() -> SharedTelemetryClient {
    Arc::new(NullBotTelemetryClient)
}

pub mod events {
    pub const BOT_MESSAGE_RECEIVED: &str = "BotMessageReceived";
    pub const BOT_MESSAGE_SEND: &str = "BotMessageSend";
    pub const BOT_MESSAGE_UPDATE: &str = "BotMessageUpdate";
    pub const BOT_MESSAGE_DELETE: &str = "BotMessageDelete";
}

pub mod properties {
    pub const ACTIVITY_ID: &str = "activityId";
    pub const ATTACHMENTS: &str = "attachments";
    pub const CONVERSATION_ID: &str = "conversationId";
    pub const CONVERSATION_NAME: &str = "conversationName";
    pub const DIALOG_ID: &str = "dialogId";
    pub const FROM_ID: &str = "fromId";
    pub const FROM_NAME: &str = "fromName";
    pub const INSTANCE_ID: &str = "instanceId";
    pub const LOCALE: &str = "locale";
    pub const RECIPIENT_ID: &str = "recipientId";
    pub const RECIPIENT_NAME: &str = "recipientName";
    pub const REPLY_ACTIVITY_ID: &str = "replyActivityId";
    pub const SPEAK: &str = "speak";
    pub const STEP_NAME: &str = "stepName";
    pub const TEXT: &str = "text";
}

/// Emits one telemetry event per received, sent, updated and deleted
/// activity. Text, speak, attachments and display names are only recorded
/// when `log_personal_information` is set.
pub struct TelemetryLoggerMiddleware {
    client: SharedTelemetryClient,
    log_personal_information: bool,
}

fn put(props: &mut TelemetryProperties, key: &str, value: Option<&str>) {
    props.insert(key.to_string(), value.unwrap_or_default().to_string());
}

fn put_non_empty(props: &mut TelemetryProperties, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        props.insert(key.to_string(), value.to_string());
    }
}

fn conversation_name(activity: &Activity) -> Option<&str> {
    activity.conversation.as_ref().and_then(|c| c.name.as_deref())
}

impl TelemetryLoggerMiddleware {
    pub fn new(client: SharedTelemetryClient, log_personal_information: bool) -> Self {
        Self {
            client,
            log_personal_information,
        }
    }

    pub fn telemetry_client(&self) -> &SharedTelemetryClient {
        &self.client
    }

    pub fn receive_properties(&self, activity: &Activity) -> TelemetryProperties {
        let mut props = TelemetryProperties::new();
        put(&mut props, properties::FROM_ID, activity.from_id());
        put(&mut props, properties::CONVERSATION_NAME, conversation_name(activity));
        put(&mut props, properties::LOCALE, activity.locale.as_deref());
        put(&mut props, properties::RECIPIENT_ID, activity.recipient_id());
        put(
            &mut props,
            properties::RECIPIENT_NAME,
            activity.recipient.as_ref().and_then(|r| r.name.as_deref()),
        );
        if self.log_personal_information {
            put_non_empty(
                &mut props,
                properties::FROM_NAME,
                activity.from.as_ref().and_then(|f| f.name.as_deref()),
            );
            put_non_empty(&mut props, properties::TEXT, activity.text.as_deref());
            put_non_empty(&mut props, properties::SPEAK, activity.speak.as_deref());
            if !activity.attachments.is_empty() {
                if let Ok(json) = serde_json::to_string(&activity.attachments) {
                    props.insert(properties::ATTACHMENTS.to_string(), json);
                }
            }
        }
        props
    }

    pub fn send_properties(&self, activity: &Activity) -> TelemetryProperties {
        let mut props = TelemetryProperties::new();
        put(&mut props, properties::REPLY_ACTIVITY_ID, activity.reply_to_id.as_deref());
        put(&mut props, properties::RECIPIENT_ID, activity.recipient_id());
        put(&mut props, properties::CONVERSATION_NAME, conversation_name(activity));
        put(&mut props, properties::LOCALE, activity.locale.as_deref());
        if self.log_personal_information {
            put_non_empty(
                &mut props,
                properties::RECIPIENT_NAME,
                activity.recipient.as_ref().and_then(|r| r.name.as_deref()),
            );
            put_non_empty(&mut props, properties::TEXT, activity.text.as_deref());
            put_non_empty(&mut props, properties::SPEAK, activity.speak.as_deref());
        }
        props
    }

    pub fn update_properties(&self, activity: &Activity) -> TelemetryProperties {
        let mut props = TelemetryProperties::new();
        put(&mut props, properties::RECIPIENT_ID, activity.recipient_id());
        put(&mut props, properties::CONVERSATION_ID, activity.conversation_id());
        put(&mut props, properties::CONVERSATION_NAME, conversation_name(activity));
        put(&mut props, properties::LOCALE, activity.locale.as_deref());
        if self.log_personal_information {
            put_non_empty(&mut props, properties::TEXT, activity.text.as_deref());
        }
        props
    }

    pub fn delete_properties(&self, activity: &Activity) -> TelemetryProperties {
        let mut props = TelemetryProperties::new();
        put(&mut props, properties::RECIPIENT_ID, activity.recipient_id());
        put(&mut props, properties::CONVERSATION_ID, activity.conversation_id());
        put(&mut props, properties::CONVERSATION_NAME, conversation_name(activity));
        props
    }
}

#[async_trait]
impl Middleware for TelemetryLoggerMiddleware {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        ctx.turn_state()
            .insert_if_absent(keys::TELEMETRY_CLIENT, self.client.clone());

        let no_metrics = TelemetryMetrics::new();
        self.client.track_event(
            events::BOT_MESSAGE_RECEIVED,
            &self.receive_properties(ctx.activity()),
            &no_metrics,
        );

        let logger = Arc::new(Self {
            client: self.client.clone(),
            log_personal_information: self.log_personal_information,
        });

        let send_logger = logger.clone();
        ctx.on_send_activities(move |_ctx, activities, next| {
            let logger = send_logger.clone();
            Box::pin(async move {
                let responses = next.run(activities.clone()).await?;
                for activity in &activities {
                    logger.client.track_event(
                        events::BOT_MESSAGE_SEND,
                        &logger.send_properties(activity),
                        &TelemetryMetrics::new(),
                    );
                }
                Ok(responses)
            })
        });

        let update_logger = logger.clone();
        ctx.on_update_activity(move |_ctx, activity, next| {
            let logger = update_logger.clone();
            Box::pin(async move {
                let response = next.run(activity.clone()).await?;
                logger.client.track_event(
                    events::BOT_MESSAGE_UPDATE,
                    &logger.update_properties(&activity),
                    &TelemetryMetrics::new(),
                );
                Ok(response)
            })
        });

        let delete_logger = logger;
        ctx.on_delete_activity(move |_ctx, reference, next| {
            let logger = delete_logger.clone();
            Box::pin(async move {
                next.run(reference.clone()).await?;
                let mut deleted = Activity::new(ActivityTypes::MessageDelete);
                deleted.apply_conversation_reference(&reference, false);
                deleted.id = reference.activity_id.clone();
                logger.client.track_event(
                    events::BOT_MESSAGE_DELETE,
                    &logger.delete_properties(&deleted),
                    &TelemetryMetrics::new(),
                );
                Ok(())
            })
        });

        next.run(ctx).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use crate::bot::bot_fn;
    use crate::middleware::MiddlewareSet;
    use bot_schema::{ChannelAccount, ConversationAccount};

    /// Keeps every tracked event for later inspection.
    #[derive(Default)]
    pub(crate) struct RecordingTelemetry {
        pub(crate) events: Mutex<Vec<(String, TelemetryProperties)>>,
    }

    impl BotTelemetryClient for RecordingTelemetry {
        fn track_event(&self, name: &str, properties: &TelemetryProperties, _metrics: &TelemetryMetrics) {
            self.events
                .lock()
                .unwrap()
                .push((name.to_string(), properties.clone()));
        }

        fn track_exception(&self, _error: &anyhow::Error, _properties: &TelemetryProperties) {}

        fn track_trace(&self, _message: &str, _severity: Severity, _properties: &TelemetryProperties) {}

        fn track_page_view(&self, _name: &str, _properties: &TelemetryProperties) {}
    }

    fn incoming() -> Activity {
        Activity {
            id: Some("in-1".into()),
            channel_id: Some("test".into()),
            from: Some(ChannelAccount::new("user").with_name("Ada")),
            recipient: Some(ChannelAccount::new("bot").with_name("Bot")),
            conversation: Some(ConversationAccount::new("conv")),
            ..Activity::message("my secret")
        }
    }

    async fn run(log_personal_information: bool) -> Vec<(String, TelemetryProperties)> {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let mut pipeline = MiddlewareSet::new();
        pipeline.use_middleware(Arc::new(TelemetryLoggerMiddleware::new(
            telemetry.clone(),
            log_personal_information,
        )));
        let bot = bot_fn(|ctx| {
            Box::pin(async move {
                let sent = ctx.send_text("reply", None, None).await?;
                ctx.delete_activity(&sent.id).await?;
                Ok(())
            })
        });
        let ctx = TurnContext::new(RecordingAdapter::new(), incoming());
        pipeline.receive_activity(&ctx, &bot).await.unwrap();
        let events = telemetry.events.lock().unwrap().clone();
        events
    }

    #[tokio::test]
    async fn events_follow_the_turn() {
        let events = run(false).await;
        let names: Vec<_> = events.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                events::BOT_MESSAGE_RECEIVED,
                events::BOT_MESSAGE_SEND,
                events::BOT_MESSAGE_DELETE
            ]
        );
        let received = &events[0].1;
        assert_eq!(received[properties::FROM_ID], "user");
        assert!(!received.contains_key(properties::TEXT));
        assert!(!received.contains_key(properties::FROM_NAME));
        assert_eq!(events[1].1[properties::REPLY_ACTIVITY_ID], "in-1");
    }

    #[tokio::test]
    async fn personal_information_is_opt_in() {
        let events = run(true).await;
        let received = &events[0].1;
        assert_eq!(received[properties::TEXT], "my secret");
        assert_eq!(received[properties::FROM_NAME], "Ada");
        assert_eq!(events[1].1[properties::TEXT], "reply");
    }
}
