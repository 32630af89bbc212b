use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_schema::{Activity, ConversationReference, ResourceResponse};
use futures::future::BoxFuture;
use tracing::{error, warn};

use crate::bot::Bot;
use crate::middleware::{Middleware, MiddlewareSet};
use crate::turn_context::TurnContext;

/// Channel-facing side of the turn pipeline.
#[async_trait]
pub trait BotAdapter: Send + Sync {
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>>;

    async fn update_activity(&self, ctx: &TurnContext, activity: Activity) -> Result<ResourceResponse>;

    async fn delete_activity(&self, ctx: &TurnContext, reference: ConversationReference) -> Result<()>;

    /// Resumes a conversation outside of an inbound request.
    async fn continue_conversation(&self, reference: ConversationReference, bot: &dyn Bot) -> Result<()>;
}

pub type OnTurnErrorHandler =
    Arc<dyn Fn(TurnContext, anyhow::Error) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Middleware and error handling shared by every adapter.
#[derive(Clone, Default)]
pub struct AdapterCore {
    middleware: MiddlewareSet,
    on_turn_error: Option<OnTurnErrorHandler>,
}

impl AdapterCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.use_middleware(Arc::new(middleware));
        self
    }

    pub fn use_shared_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.use_middleware(middleware);
        self
    }

    pub fn middleware(&self) -> &MiddlewareSet {
        &self.middleware
    }

    pub fn set_on_turn_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(TurnContext, anyhow::Error) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.on_turn_error = Some(Arc::new(handler));
        self
    }

    pub fn on_turn_error(&self) -> Option<&OnTurnErrorHandler> {
        self.on_turn_error.as_ref()
    }

    /// Runs middleware and then `bot`. Failures go to the turn error
    /// handler when one is set and propagate otherwise.
    pub async fn run_pipeline(&self, ctx: &TurnContext, bot: &dyn Bot) -> Result<()> {
        let outcome = self.middleware.receive_activity(ctx, bot).await;
        let Err(err) = outcome else {
            return Ok(());
        };
        match &self.on_turn_error {
            Some(handler) => {
                warn!(
                    conversation_id = ctx.activity().conversation_id().unwrap_or_default(),
                    channel_id = ctx.activity().channel_id(),
                    error = %err,
                    "turn failed; invoking error handler"
                );
                handler(ctx.clone(), err).await
            }
            None => {
                error!(
                    conversation_id = ctx.activity().conversation_id().unwrap_or_default(),
                    error = %err,
                    "turn failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bot::bot_fn;
    use std::sync::Mutex;

    /// Adapter that records outbound traffic instead of delivering it.
    #[derive(Default)]
    pub(crate) struct RecordingAdapter {
        sent: Mutex<Vec<Activity>>,
        deleted: Mutex<Vec<String>>,
    }

    impl RecordingAdapter {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn sent(&self) -> Vec<Activity> {
            self.sent.lock().unwrap().clone()
        }

        pub(crate) fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BotAdapter for RecordingAdapter {
        async fn send_activities(
            &self,
            _ctx: &TurnContext,
            activities: Vec<Activity>,
        ) -> Result<Vec<ResourceResponse>> {
            let mut sent = self.sent.lock().unwrap();
            let mut responses = Vec::new();
            for activity in activities {
                responses.push(ResourceResponse::new(format!("sent-{}", sent.len())));
                sent.push(activity);
            }
            Ok(responses)
        }

        async fn update_activity(
            &self,
            _ctx: &TurnContext,
            activity: Activity,
        ) -> Result<ResourceResponse> {
            Ok(ResourceResponse::new(activity.id.unwrap_or_default()))
        }

        async fn delete_activity(
            &self,
            _ctx: &TurnContext,
            reference: ConversationReference,
        ) -> Result<()> {
            self.deleted
                .lock()
                .unwrap()
                .push(reference.activity_id.unwrap_or_default());
            Ok(())
        }

        async fn continue_conversation(
            &self,
            _reference: ConversationReference,
            _bot: &dyn Bot,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn on_turn_error_receives_failures() {
        let mut core = AdapterCore::new();
        core.set_on_turn_error(|ctx, err| {
            Box::pin(async move {
                ctx.send_text(format!("oops: {err}"), None, None).await?;
                Ok(())
            })
        });
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), Activity::message("hi"));
        let bot = bot_fn(|_ctx| Box::pin(async { Err(anyhow::anyhow!("boom")) }));

        core.run_pipeline(&ctx, &bot).await.unwrap();
        assert_eq!(adapter.sent()[0].text(), "oops: boom");
    }

    #[tokio::test]
    async fn failures_propagate_without_handler() {
        let core = AdapterCore::new();
        let ctx = TurnContext::new(RecordingAdapter::new(), Activity::message("hi"));
        let bot = bot_fn(|_ctx| Box::pin(async { Err(anyhow::anyhow!("boom")) }));
        let err = core.run_pipeline(&ctx, &bot).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
