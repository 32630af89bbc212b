use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bot_schema::{Activity, ActivityTypes, RoleTypes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::middleware::{Middleware, Next};
use crate::turn_context::TurnContext;

pub const PAGE_SIZE: usize = 20;

/// One page of results. `continuation_token` is set when more may follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl<T> Default for PagedResult<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            continuation_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptInfo {
    pub channel_id: String,
    pub id: String,
    pub created: DateTime<Utc>,
}

#[async_trait]
pub trait TranscriptLogger: Send + Sync {
    async fn log_activity(&self, activity: Activity) -> Result<()>;
}

/// A transcript logger that can also read conversations back.
#[async_trait]
pub trait TranscriptStore: TranscriptLogger {
    async fn get_transcript_activities(
        &self,
        channel_id: &str,
        conversation_id: &str,
        continuation_token: Option<&str>,
        start_date: Option<DateTime<Utc>>,
    ) -> Result<PagedResult<Activity>>;

    async fn list_transcripts(
        &self,
        channel_id: &str,
        continuation_token: Option<&str>,
    ) -> Result<PagedResult<TranscriptInfo>>;

    async fn delete_transcript(&self, channel_id: &str, conversation_id: &str) -> Result<()>;
}

/// Takes a page from an ordered sequence, resuming after the item whose id
/// matches `token`.
fn page<T>(
    items: impl Iterator<Item = T>,
    token: Option<&str>,
    id_of: impl Fn(&T) -> Option<&str>,
) -> PagedResult<T> {
    let mut items = items;
    if let Some(token) = token {
        for item in items.by_ref() {
            if id_of(&item) == Some(token) {
                break;
            }
        }
    }
    let items: Vec<T> = items.take(PAGE_SIZE).collect();
    let continuation_token = if items.len() == PAGE_SIZE {
        items.last().and_then(|last| id_of(last).map(str::to_string))
    } else {
        None
    };
    PagedResult {
        items,
        continuation_token,
    }
}

type Conversations = HashMap<String, Vec<Activity>>;

/// Transcript store kept in process memory.
#[derive(Default)]
pub struct MemoryTranscriptStore {
    channels: RwLock<HashMap<String, Conversations>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptLogger for MemoryTranscriptStore {
    async fn log_activity(&self, activity: Activity) -> Result<()> {
        let Some(conversation_id) = activity.conversation_id().map(str::to_string) else {
            bail!("activity must have a conversation id to be logged");
        };
        let channel_id = activity.channel_id().to_string();
        let mut channels = self.channels.write().await;
        channels
            .entry(channel_id)
            .or_default()
            .entry(conversation_id)
            .or_default()
            .push(activity);
        Ok(())
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn get_transcript_activities(
        &self,
        channel_id: &str,
        conversation_id: &str,
        continuation_token: Option<&str>,
        start_date: Option<DateTime<Utc>>,
    ) -> Result<PagedResult<Activity>> {
        if channel_id.is_empty() {
            bail!("missing channel id");
        }
        if conversation_id.is_empty() {
            bail!("missing conversation id");
        }
        let channels = self.channels.read().await;
        let Some(transcript) = channels
            .get(channel_id)
            .and_then(|conversations| conversations.get(conversation_id))
        else {
            return Ok(PagedResult::default());
        };

        let mut sorted: Vec<&Activity> = transcript
            .iter()
            .filter(|activity| match (start_date, activity.timestamp) {
                (Some(start), Some(stamp)) => stamp >= start,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();
        sorted.sort_by_key(|activity| activity.timestamp);

        let result = page(sorted.into_iter(), continuation_token, |activity| {
            activity.id.as_deref()
        });
        Ok(PagedResult {
            items: result.items.into_iter().cloned().collect(),
            continuation_token: result.continuation_token,
        })
    }

    async fn list_transcripts(
        &self,
        channel_id: &str,
        continuation_token: Option<&str>,
    ) -> Result<PagedResult<TranscriptInfo>> {
        if channel_id.is_empty() {
            bail!("missing channel id");
        }
        let channels = self.channels.read().await;
        let Some(conversations) = channels.get(channel_id) else {
            return Ok(PagedResult::default());
        };

        let mut infos: Vec<TranscriptInfo> = conversations
            .iter()
            .map(|(id, activities)| TranscriptInfo {
                channel_id: channel_id.to_string(),
                id: id.clone(),
                created: activities
                    .first()
                    .and_then(|activity| activity.timestamp)
                    .unwrap_or_else(Utc::now),
            })
            .collect();
        infos.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

        Ok(page(infos.into_iter(), continuation_token, |info| {
            Some(info.id.as_str())
        }))
    }

    async fn delete_transcript(&self, channel_id: &str, conversation_id: &str) -> Result<()> {
        if channel_id.is_empty() || conversation_id.is_empty() {
            bail!("channel id and conversation id are required");
        }
        if let Some(conversations) = self.channels.write().await.get_mut(channel_id) {
            conversations.remove(conversation_id);
        }
        Ok(())
    }
}

type Queue = Arc<Mutex<Vec<Activity>>>;

fn enqueue(queue: &Queue, mut activity: Activity) {
    if activity.timestamp.is_none() {
        activity.timestamp = Some(Utc::now());
    }
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(activity);
}

/// Records every activity that passes through a turn and hands them to a
/// [`TranscriptLogger`] once the turn is over.
pub struct TranscriptLoggerMiddleware {
    logger: Arc<dyn TranscriptLogger>,
}

impl TranscriptLoggerMiddleware {
    pub fn new(logger: Arc<dyn TranscriptLogger>) -> Self {
        Self { logger }
    }

    async fn flush(&self, queue: &Queue) {
        let pending = std::mem::take(&mut *queue.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(count = pending.len(), "flushing transcript");
        for activity in pending {
            if let Err(err) = self.logger.log_activity(activity).await {
                warn!(error = %err, "transcript logger failed");
            }
        }
    }
}

fn is_continue_conversation(activity: &Activity) -> bool {
    activity.is_type(&ActivityTypes::Event)
        && activity.name.as_deref() == Some("ContinueConversation")
}

#[async_trait]
impl Middleware for TranscriptLoggerMiddleware {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> anyhow::Result<()> {
        let queue: Queue = Arc::default();

        if !is_continue_conversation(ctx.activity()) {
            let mut incoming = ctx.activity().clone();
            let from = incoming.from.get_or_insert_with(Default::default);
            if from.role.is_none() {
                from.role = Some(RoleTypes::User);
            }
            enqueue(&queue, incoming);
        }

        let send_queue = queue.clone();
        ctx.on_send_activities(move |_ctx, activities, next| {
            let queue = send_queue.clone();
            Box::pin(async move {
                let responses = next.run(activities.clone()).await?;
                for (index, mut activity) in activities.into_iter().enumerate() {
                    if let Some(response) = responses.get(index).filter(|r| !r.id.is_empty()) {
                        activity.id = Some(response.id.clone());
                    }
                    enqueue(&queue, activity);
                }
                Ok(responses)
            })
        });

        let update_queue = queue.clone();
        ctx.on_update_activity(move |_ctx, activity, next| {
            let queue = update_queue.clone();
            Box::pin(async move {
                let response = next.run(activity.clone()).await?;
                let mut update = activity;
                update.activity_type = ActivityTypes::MessageUpdate;
                enqueue(&queue, update);
                Ok(response)
            })
        });

        let delete_queue = queue.clone();
        ctx.on_delete_activity(move |_ctx, reference, next| {
            let queue = delete_queue.clone();
            Box::pin(async move {
                next.run(reference.clone()).await?;
                let mut deleted = Activity::new(ActivityTypes::MessageDelete);
                deleted.apply_conversation_reference(&reference, false);
                deleted.id = reference.activity_id.clone();
                enqueue(&queue, deleted);
                Ok(())
            })
        });

        let outcome = next.run(ctx).await;
        self.flush(&queue).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use crate::bot::bot_fn;
    use crate::middleware::MiddlewareSet;
    use bot_schema::{ChannelAccount, ConversationAccount};
    use chrono::Duration;

    fn activity(id: &str, conversation: &str, stamp: DateTime<Utc>) -> Activity {
        Activity {
            id: Some(id.into()),
            channel_id: Some("test".into()),
            conversation: Some(ConversationAccount::new(conversation)),
            timestamp: Some(stamp),
            ..Activity::message(id)
        }
    }

    #[tokio::test]
    async fn activities_page_in_timestamp_order() {
        let store = MemoryTranscriptStore::new();
        let base = Utc::now();
        for i in (0..25).rev() {
            store
                .log_activity(activity(&format!("a{i}"), "c1", base + Duration::seconds(i)))
                .await
                .unwrap();
        }

        let first = store
            .get_transcript_activities("test", "c1", None, None)
            .await
            .unwrap();
        assert_eq!(first.items.len(), PAGE_SIZE);
        assert_eq!(first.items[0].id.as_deref(), Some("a0"));
        assert_eq!(first.continuation_token.as_deref(), Some("a19"));

        let second = store
            .get_transcript_activities("test", "c1", first.continuation_token.as_deref(), None)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 5);
        assert_eq!(second.items[0].id.as_deref(), Some("a20"));
        assert_eq!(second.continuation_token, None);

        let recent = store
            .get_transcript_activities("test", "c1", None, Some(base + Duration::seconds(22)))
            .await
            .unwrap();
        assert_eq!(recent.items.len(), 3);
    }

    #[tokio::test]
    async fn list_and_delete_transcripts() {
        let store = MemoryTranscriptStore::new();
        let base = Utc::now();
        store.log_activity(activity("x", "c1", base)).await.unwrap();
        store
            .log_activity(activity("y", "c2", base + Duration::seconds(1)))
            .await
            .unwrap();

        let listed = store.list_transcripts("test", None).await.unwrap();
        let ids: Vec<_> = listed.items.iter().map(|info| info.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        store.delete_transcript("test", "c1").await.unwrap();
        let listed = store.list_transcripts("test", None).await.unwrap();
        assert_eq!(listed.items.len(), 1);
        assert!(store.get_transcript_activities("", "c1", None, None).await.is_err());
    }

    #[tokio::test]
    async fn middleware_logs_incoming_and_outgoing() {
        let store = Arc::new(MemoryTranscriptStore::new());
        let mut pipeline = MiddlewareSet::new();
        pipeline.use_middleware(Arc::new(TranscriptLoggerMiddleware::new(store.clone())));

        let bot = bot_fn(|ctx| {
            Box::pin(async move {
                let sent = ctx.send_text("echo", None, None).await?;
                let mut update = Activity::message("edited");
                update.id = Some(sent.id.clone());
                ctx.update_activity(update).await?;
                ctx.delete_activity(&sent.id).await?;
                Ok(())
            })
        });

        let incoming = Activity {
            id: Some("in-1".into()),
            channel_id: Some("test".into()),
            from: Some(ChannelAccount::new("user")),
            recipient: Some(ChannelAccount::new("bot")),
            conversation: Some(ConversationAccount::new("conv")),
            ..Activity::message("hi")
        };
        let ctx = TurnContext::new(RecordingAdapter::new(), incoming);
        pipeline.receive_activity(&ctx, &bot).await.unwrap();

        let logged = store
            .get_transcript_activities("test", "conv", None, None)
            .await
            .unwrap()
            .items;
        let kinds: Vec<_> = logged
            .iter()
            .map(|activity| activity.activity_type.to_string())
            .collect();
        assert_eq!(kinds, vec!["message", "message", "messageUpdate", "messageDelete"]);
        assert_eq!(logged[0].from.as_ref().unwrap().role, Some(RoleTypes::User));
        assert_eq!(logged[1].id.as_deref(), Some("sent-0"));
        assert_eq!(logged[3].id.as_deref(), Some("sent-0"));
        assert!(logged.iter().all(|activity| activity.timestamp.is_some()));
    }
}
