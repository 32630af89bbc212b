use std::time::Duration;

use anyhow::{Result, ensure};
use async_trait::async_trait;
use bot_connector::auth::{ClaimsIdentity, SkillValidation};
use bot_schema::{Activity, ActivityTypes};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::middleware::{Middleware, Next};
use crate::turn_context::TurnContext;
use crate::turn_state::keys;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(2000);

/// Sends typing indicators while a message turn is running.
///
/// The first indicator goes out after `delay` and repeats every `period`
/// until the rest of the pipeline finishes. Indicators go straight to the
/// adapter, so they neither run send handlers nor mark the turn responded.
#[derive(Debug, Clone)]
pub struct ShowTypingMiddleware {
    delay: Duration,
    period: Duration,
}

impl Default for ShowTypingMiddleware {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            period: DEFAULT_PERIOD,
        }
    }
}

impl ShowTypingMiddleware {
    pub fn new(delay: Duration, period: Duration) -> Result<Self> {
        ensure!(!period.is_zero(), "repeat period must be greater than zero");
        Ok(Self { delay, period })
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn is_skill_turn(ctx: &TurnContext) -> bool {
    ctx.turn_state()
        .get::<ClaimsIdentity>(keys::BOT_IDENTITY)
        .is_some_and(|identity| SkillValidation::is_skill_claim(identity.claims()))
}

async fn send_typing(ctx: &TurnContext) -> Result<()> {
    let mut typing = Activity::create_typing_activity();
    typing.relates_to = ctx.activity().relates_to.clone();
    typing.apply_conversation_reference(&ctx.activity().get_conversation_reference(), false);
    ctx.adapter().send_activities(ctx, vec![typing]).await?;
    Ok(())
}

#[async_trait]
impl Middleware for ShowTypingMiddleware {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        if !ctx.activity().is_type(&ActivityTypes::Message) || is_skill_turn(ctx) {
            return next.run(ctx).await;
        }

        let typing_ctx = ctx.clone();
        let (delay, period) = (self.delay, self.period);
        let _typing = AbortOnDrop(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                if let Err(err) = send_typing(&typing_ctx).await {
                    debug!(error = %err, "typing indicator failed");
                    return;
                }
                tokio::time::sleep(period).await;
            }
        }));

        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use crate::bot::bot_fn;
    use crate::middleware::MiddlewareSet;
    use std::collections::HashMap;

    fn pipeline(delay: u64, period: u64) -> MiddlewareSet {
        let mut set = MiddlewareSet::new();
        set.use_middleware(Arc::new(
            ShowTypingMiddleware::new(Duration::from_millis(delay), Duration::from_millis(period))
                .unwrap(),
        ));
        set
    }

    fn slow_bot() -> impl crate::bot::Bot {
        bot_fn(|ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                ctx.send_text("done", None, None).await?;
                Ok(())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn typing_precedes_a_slow_reply() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), Activity::message("hi"));
        pipeline(100, 100).receive_activity(&ctx, &slow_bot()).await.unwrap();

        let sent = adapter.sent();
        let last = sent.last().unwrap();
        assert_eq!(last.text(), "done");
        let typing = sent
            .iter()
            .filter(|activity| activity.is_type(&ActivityTypes::Typing))
            .count();
        assert!(typing >= 2, "expected repeated typing, got {typing}");
        assert!(ctx.responded());
    }

    #[tokio::test(start_paused = true)]
    async fn no_typing_for_skills_or_non_messages() {
        let adapter = RecordingAdapter::new();
        let ctx = TurnContext::new(adapter.clone(), Activity::create_event_activity("ping"));
        pipeline(10, 10).receive_activity(&ctx, &slow_bot()).await.unwrap();

        let skill_ctx = TurnContext::new(adapter.clone(), Activity::message("hi"));
        let claims = HashMap::from([
            ("ver".to_string(), "1.0".to_string()),
            ("aud".to_string(), "skill-app".to_string()),
            ("appid".to_string(), "parent-app".to_string()),
        ]);
        skill_ctx
            .turn_state()
            .insert(keys::BOT_IDENTITY, ClaimsIdentity::new("Bearer", claims));
        pipeline(10, 10)
            .receive_activity(&skill_ctx, &slow_bot())
            .await
            .unwrap();

        assert!(
            adapter
                .sent()
                .iter()
                .all(|activity| !activity.is_type(&ActivityTypes::Typing))
        );
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(ShowTypingMiddleware::new(Duration::ZERO, Duration::ZERO).is_err());
    }
}
