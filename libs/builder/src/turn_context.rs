use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use bot_schema::{
    Activity, ActivityTypes, ConversationReference, InputHints, Mention, ResourceResponse,
};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::adapter::BotAdapter;
use crate::turn_state::{TurnState, keys};

type Handler<I, O> =
    Arc<dyn Fn(TurnContext, I, HandlerNext<I, O>) -> BoxFuture<'static, Result<O>> + Send + Sync>;
type Terminal<I, O> = Arc<dyn Fn(TurnContext, I) -> BoxFuture<'static, Result<O>> + Send + Sync>;

/// Continuation handed to send/update/delete interceptors. Calling
/// [`HandlerNext::run`] invokes the next interceptor, or the adapter once
/// the chain is exhausted. Not calling it suppresses the operation.
pub struct HandlerNext<I, O> {
    ctx: TurnContext,
    handlers: Arc<[Handler<I, O>]>,
    index: usize,
    terminal: Terminal<I, O>,
}

impl<I: Send + 'static, O: Send + 'static> HandlerNext<I, O> {
    pub fn run(self, input: I) -> BoxFuture<'static, Result<O>> {
        match self.handlers.get(self.index).cloned() {
            Some(handler) => {
                let ctx = self.ctx.clone();
                let next = HandlerNext {
                    index: self.index + 1,
                    ..self
                };
                handler(ctx, input, next)
            }
            None => (self.terminal)(self.ctx, input),
        }
    }
}

pub type SendNext = HandlerNext<Vec<Activity>, Vec<ResourceResponse>>;
pub type UpdateNext = HandlerNext<Activity, ResourceResponse>;
pub type DeleteNext = HandlerNext<ConversationReference, ()>;

struct Inner {
    activity: Activity,
    turn: Arc<Turn>,
}

/// Everything but the incoming activity, shared by derived contexts.
struct Turn {
    adapter: Arc<dyn BotAdapter>,
    responded: AtomicBool,
    state: TurnState,
    buffered_replies: Mutex<Vec<Activity>>,
    send_handlers: Mutex<Vec<Handler<Vec<Activity>, Vec<ResourceResponse>>>>,
    update_handlers: Mutex<Vec<Handler<Activity, ResourceResponse>>>,
    delete_handlers: Mutex<Vec<Handler<ConversationReference, ()>>>,
}

/// Everything a bot sees during one turn: the incoming activity, the
/// adapter that delivered it, and per-turn state.
///
/// Cloning is cheap and every clone refers to the same turn.
#[derive(Clone)]
pub struct TurnContext {
    inner: Arc<Inner>,
}

fn snapshot<T: Clone>(handlers: &Mutex<Vec<T>>) -> Arc<[T]> {
    handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .into()
}

impl TurnContext {
    pub fn new(adapter: Arc<dyn BotAdapter>, activity: Activity) -> Self {
        Self {
            inner: Arc::new(Inner {
                activity,
                turn: Arc::new(Turn {
                    adapter,
                    responded: AtomicBool::new(false),
                    state: TurnState::new(),
                    buffered_replies: Mutex::new(Vec::new()),
                    send_handlers: Mutex::new(Vec::new()),
                    update_handlers: Mutex::new(Vec::new()),
                    delete_handlers: Mutex::new(Vec::new()),
                }),
            }),
        }
    }

    /// The same turn seen through a rewritten incoming activity. Turn
    /// state, interceptors and the responded flag stay shared with `self`.
    pub fn with_activity(&self, activity: Activity) -> TurnContext {
        Self {
            inner: Arc::new(Inner {
                activity,
                turn: self.inner.turn.clone(),
            }),
        }
    }

    pub fn activity(&self) -> &Activity {
        &self.inner.activity
    }

    pub fn adapter(&self) -> &Arc<dyn BotAdapter> {
        &self.inner.turn.adapter
    }

    pub fn turn_state(&self) -> &TurnState {
        &self.inner.turn.state
    }

    /// True once a non-trace activity has been sent during this turn.
    pub fn responded(&self) -> bool {
        self.inner.turn.responded.load(Ordering::SeqCst)
    }

    pub fn mark_responded(&self) {
        self.inner.turn.responded.store(true, Ordering::SeqCst);
    }

    pub fn locale(&self) -> Option<&str> {
        self.inner.activity.locale.as_deref()
    }

    /// Replies buffered for an `expectReplies` turn, drained on read.
    pub fn take_buffered_replies(&self) -> Vec<Activity> {
        std::mem::take(
            &mut *self
                .inner
                .turn
                .buffered_replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn on_send_activities<F>(&self, handler: F) -> &Self
    where
        F: Fn(TurnContext, Vec<Activity>, SendNext) -> BoxFuture<'static, Result<Vec<ResourceResponse>>>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .turn
            .send_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
        self
    }

    pub fn on_update_activity<F>(&self, handler: F) -> &Self
    where
        F: Fn(TurnContext, Activity, UpdateNext) -> BoxFuture<'static, Result<ResourceResponse>>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .turn
            .update_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
        self
    }

    pub fn on_delete_activity<F>(&self, handler: F) -> &Self
    where
        F: Fn(TurnContext, ConversationReference, DeleteNext) -> BoxFuture<'static, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .turn
            .delete_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
        self
    }

    pub async fn send_text(
        &self,
        text: impl Into<String>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Result<ResourceResponse> {
        let mut activity = Activity::message(text);
        activity.speak = speak.map(str::to_string);
        activity.input_hint = input_hint;
        self.send_activity(activity).await
    }

    /// Sends a single activity. An interceptor that swallows the send yields
    /// an empty response.
    pub async fn send_activity(&self, activity: Activity) -> Result<ResourceResponse> {
        let responses = self.send_activities(vec![activity]).await?;
        Ok(responses.into_iter().next().unwrap_or_default())
    }

    pub async fn send_activities(&self, activities: Vec<Activity>) -> Result<Vec<ResourceResponse>> {
        if activities.is_empty() {
            bail!("activities cannot be empty");
        }
        let reference = self.activity().get_conversation_reference();
        let activities = activities
            .into_iter()
            .map(|mut activity| {
                activity.apply_conversation_reference(&reference, false);
                activity
            })
            .collect();

        let next = HandlerNext {
            ctx: self.clone(),
            handlers: snapshot(&self.inner.turn.send_handlers),
            index: 0,
            terminal: Arc::new(|ctx: TurnContext, activities: Vec<Activity>| {
                Box::pin(async move { ctx.deliver(activities).await })
                    as BoxFuture<'static, Result<Vec<ResourceResponse>>>
            }),
        };
        next.run(activities).await
    }

    async fn deliver(&self, activities: Vec<Activity>) -> Result<Vec<ResourceResponse>> {
        let sent_non_trace = activities
            .iter()
            .any(|activity| !activity.is_type(&ActivityTypes::Trace));

        let responses = if self.activity().expects_replies() {
            let mut buffered = self
                .inner
                .turn
                .buffered_replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut responses = Vec::with_capacity(activities.len());
            for activity in activities {
                if activity.is_type(&ActivityTypes::InvokeResponse) {
                    self.turn_state()
                        .insert(keys::INVOKE_RESPONSE, activity.clone());
                }
                buffered.push(activity);
                responses.push(ResourceResponse::default());
            }
            responses
        } else {
            self.inner
                .turn
                .adapter
                .send_activities(self, activities)
                .await?
        };

        if sent_non_trace {
            self.mark_responded();
        }
        Ok(responses)
    }

    pub async fn update_activity(&self, mut activity: Activity) -> Result<ResourceResponse> {
        let reference = self.activity().get_conversation_reference();
        activity.apply_conversation_reference(&reference, false);

        let next = HandlerNext {
            ctx: self.clone(),
            handlers: snapshot(&self.inner.turn.update_handlers),
            index: 0,
            terminal: Arc::new(|ctx: TurnContext, activity: Activity| {
                Box::pin(async move {
                    let adapter = ctx.adapter().clone();
                    adapter.update_activity(&ctx, activity).await
                }) as BoxFuture<'static, Result<ResourceResponse>>
            }),
        };
        next.run(activity).await
    }

    pub async fn delete_activity(&self, activity_id: &str) -> Result<()> {
        if activity_id.trim().is_empty() {
            bail!("activity id cannot be empty");
        }
        let mut reference = self.activity().get_conversation_reference();
        reference.activity_id = Some(activity_id.to_string());
        self.delete_activity_by_reference(reference).await
    }

    pub async fn delete_activity_by_reference(&self, reference: ConversationReference) -> Result<()> {
        debug!(activity_id = ?reference.activity_id, "deleting activity");
        let next = HandlerNext {
            ctx: self.clone(),
            handlers: snapshot(&self.inner.turn.delete_handlers),
            index: 0,
            terminal: Arc::new(|ctx: TurnContext, reference: ConversationReference| {
                Box::pin(async move {
                    let adapter = ctx.adapter().clone();
                    adapter.delete_activity(&ctx, reference).await
                }) as BoxFuture<'static, Result<()>>
            }),
        };
        next.run(reference).await
    }

    /// Sends a trace activity. Channels other than the emulator drop traces.
    pub async fn trace_activity(
        &self,
        name: &str,
        value: Option<Value>,
        value_type: Option<&str>,
        label: Option<&str>,
    ) -> Result<ResourceResponse> {
        let trace = Activity::create_trace_activity(name, value_type, value, label);
        self.send_activity(trace).await
    }

    pub fn get_mentions(&self) -> Vec<Mention> {
        self.activity().get_mentions()
    }

    /// Incoming text with any mention of the bot stripped.
    pub fn remove_recipient_mention(&self) -> Option<String> {
        match self.activity().recipient_id() {
            Some(id) => self.activity().mention_free_text(id),
            None => self.activity().text.clone(),
        }
    }

    pub fn get_reply_conversation_reference(&self, reply: &ResourceResponse) -> ConversationReference {
        self.activity().get_reply_conversation_reference(reply)
    }
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("activity_id", &self.inner.activity.id)
            .field("responded", &self.responded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use bot_schema::{ChannelAccount, ConversationAccount, DeliveryModes};

    fn incoming() -> Activity {
        Activity {
            id: Some("in-1".into()),
            channel_id: Some("test".into()),
            service_url: Some("https://test.com/".into()),
            from: Some(ChannelAccount::new("user")),
            recipient: Some(ChannelAccount::new("bot")),
            conversation: Some(ConversationAccount::new("conv")),
            ..Activity::message("hi")
        }
    }

    #[tokio::test]
    async fn send_applies_reference_and_marks_responded() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), incoming());
        assert!(!ctx.responded());

        let response = ctx.send_text("hello", None, None).await.unwrap();
        assert_eq!(response.id, "sent-0");
        assert!(ctx.responded());

        let sent = adapter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].conversation_id(), Some("conv"));
        assert_eq!(sent[0].from_id(), Some("bot"));
        assert_eq!(sent[0].recipient_id(), Some("user"));
        assert_eq!(sent[0].reply_to_id.as_deref(), Some("in-1"));
    }

    #[tokio::test]
    async fn trace_does_not_mark_responded() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), incoming());
        ctx.trace_activity("diagnostics", None, None, None).await.unwrap();
        assert!(!ctx.responded());
        assert_eq!(adapter.sent().len(), 1);
    }

    #[tokio::test]
    async fn send_handlers_run_in_registration_order() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), incoming());
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = order.clone();
            ctx.on_send_activities(move |_ctx, mut activities, next| {
                order.lock().unwrap().push(tag);
                for activity in &mut activities {
                    let text = format!("{}+{tag}", activity.text());
                    activity.text = Some(text);
                }
                next.run(activities)
            });
        }

        ctx.send_text("x", None, None).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(adapter.sent()[0].text(), "x+first+second");
    }

    #[tokio::test]
    async fn handler_can_swallow_send() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), incoming());
        ctx.on_send_activities(|_ctx, _activities, _next| {
            Box::pin(async { anyhow::Ok(Vec::<ResourceResponse>::new()) })
        });

        let response = ctx.send_text("dropped", None, None).await.unwrap();
        assert_eq!(response, ResourceResponse::default());
        assert!(adapter.sent().is_empty());
        assert!(!ctx.responded());
    }

    #[tokio::test]
    async fn expect_replies_buffers_instead_of_sending() {
        let adapter = RecordingAdapter::new();
        let activity = Activity {
            delivery_mode: Some(DeliveryModes::ExpectReplies),
            ..incoming()
        };
        let ctx = TurnContext::new(adapter.clone(), activity);
        ctx.send_text("one", None, None).await.unwrap();
        ctx.send_text("two", None, None).await.unwrap();

        assert!(adapter.sent().is_empty());
        assert!(ctx.responded());
        let buffered = ctx.take_buffered_replies();
        assert_eq!(buffered.len(), 2);
        assert!(ctx.take_buffered_replies().is_empty());
    }

    #[tokio::test]
    async fn delete_builds_reference_from_incoming() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), incoming());
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        ctx.on_delete_activity(move |_ctx, reference, next| {
            *captured.lock().unwrap() = reference.activity_id.clone();
            next.run(reference)
        });

        ctx.delete_activity("old-7").await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("old-7"));
        assert_eq!(adapter.deleted(), vec!["old-7".to_string()]);
        assert!(ctx.delete_activity("  ").await.is_err());
    }
}
