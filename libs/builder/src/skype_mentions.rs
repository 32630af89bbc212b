use anyhow::Result;
use async_trait::async_trait;
use bot_schema::{Activity, ActivityTypes, channels};
use serde_json::Value;

use crate::middleware::{Middleware, Next};
use crate::turn_context::TurnContext;

/// Skype sends mention text wrapped in markup such as
/// `<at id="28:..">Bot</at>`. Rewrites every mention entity on an incoming
/// Skype message to the bare name so mention stripping can match it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkypeMentionNormalizeMiddleware;

impl SkypeMentionNormalizeMiddleware {
    /// Returns whether any mention text was rewritten.
    pub fn normalize_skype_mention_text(activity: &mut Activity) -> bool {
        if activity.channel_id.as_deref() != Some(channels::SKYPE)
            || !activity.is_type(&ActivityTypes::Message)
        {
            return false;
        }

        let mut changed = false;
        for entity in activity.entities.iter_mut().filter(|entity| entity.is_type("mention")) {
            let Some(text) = entity.properties.get("text").and_then(Value::as_str) else {
                continue;
            };
            if let Some(name) = inner_text(text) {
                entity.properties.insert("text".into(), Value::String(name));
                changed = true;
            }
        }
        changed
    }
}

/// Text between the first `>` and the next `<`, trimmed.
fn inner_text(markup: &str) -> Option<String> {
    let start = markup.find('>')? + 1;
    let end = start + markup[start..].find('<')?;
    Some(markup[start..end].trim().to_string())
}

#[async_trait]
impl Middleware for SkypeMentionNormalizeMiddleware {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        let mut activity = ctx.activity().clone();
        if Self::normalize_skype_mention_text(&mut activity) {
            return next.run(&ctx.with_activity(activity)).await;
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use crate::bot::bot_fn;
    use crate::middleware::MiddlewareSet;
    use bot_schema::{ChannelAccount, Entity};
    use serde_json::json;

    fn skype_message(mention_text: &str) -> Activity {
        let mut activity = Activity::message(format!("{mention_text} what's up?"));
        activity.channel_id = Some(channels::SKYPE.into());
        activity.recipient = Some(ChannelAccount::new("28:bot").with_name("Bot"));
        activity.entities.push(
            serde_json::from_value::<Entity>(json!({
                "type": "mention",
                "mentioned": {"id": "28:bot", "name": "Bot"},
                "text": mention_text,
            }))
            .unwrap(),
        );
        activity
    }

    #[test]
    fn markup_is_reduced_to_the_name() {
        let mut activity = skype_message("<at id=\"28:bot\"> Bot </at>");
        assert!(SkypeMentionNormalizeMiddleware::normalize_skype_mention_text(&mut activity));
        assert_eq!(activity.entities[0].properties["text"], json!("Bot"));
    }

    #[test]
    fn other_channels_and_plain_text_are_untouched() {
        let mut plain = skype_message("Bot");
        assert!(!SkypeMentionNormalizeMiddleware::normalize_skype_mention_text(&mut plain));

        let mut teams = skype_message("<at>Bot</at>");
        teams.channel_id = Some(channels::MSTEAMS.into());
        assert!(!SkypeMentionNormalizeMiddleware::normalize_skype_mention_text(&mut teams));
        assert_eq!(teams.entities[0].properties["text"], json!("<at>Bot</at>"));
    }

    #[tokio::test]
    async fn the_bot_sees_normalized_mentions() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), skype_message("<at id=\"28:bot\">Bot</at>"));
        let mut set = MiddlewareSet::new();
        set.use_middleware(Arc::new(SkypeMentionNormalizeMiddleware));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let bot = bot_fn(move |ctx| {
            let record = record.clone();
            Box::pin(async move {
                let mentions = ctx.get_mentions();
                record
                    .lock()
                    .unwrap()
                    .extend(mentions.into_iter().filter_map(|mention| mention.text));
                ctx.send_text("ok", None, None).await?;
                Ok(())
            })
        });

        set.receive_activity(&ctx, &bot).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), ["Bot"]);
        assert_eq!(adapter.sent()[0].text(), "ok");
        assert!(ctx.responded());
    }
}
