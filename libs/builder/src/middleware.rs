use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::bot::Bot;
use crate::turn_context::TurnContext;

/// A component that wraps every turn. Implementations call
/// [`Next::run`] to continue the pipeline; returning without calling it
/// short-circuits the turn.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()>;
}

/// The remainder of the pipeline after the current middleware.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    bot: &'a dyn Bot,
}

impl Next<'_> {
    pub async fn run(self, ctx: &TurnContext) -> Result<()> {
        match self.rest.split_first() {
            Some((head, tail)) => {
                head.on_turn(
                    ctx,
                    Next {
                        rest: tail,
                        bot: self.bot,
                    },
                )
                .await
            }
            None => self.bot.on_turn(ctx).await,
        }
    }
}

/// Ordered middleware pipeline owned by an adapter.
#[derive(Clone, Default)]
pub struct MiddlewareSet {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Runs every middleware in order and then `bot`.
    pub async fn receive_activity(&self, ctx: &TurnContext, bot: &dyn Bot) -> Result<()> {
        Next {
            rest: &self.middleware,
            bot,
        }
        .run(ctx)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::RecordingAdapter;
    use crate::bot::bot_fn;
    use bot_schema::Activity;
    use std::sync::Mutex;

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            if self.short_circuit {
                return Ok(());
            }
            next.run(ctx).await?;
            self.log.lock().unwrap().push(format!("{}:after", self.name));
            Ok(())
        }
    }

    fn set_with(log: &Arc<Mutex<Vec<String>>>, short_circuit_second: bool) -> MiddlewareSet {
        let mut set = MiddlewareSet::new();
        set.use_middleware(Arc::new(Tag {
            name: "a",
            log: log.clone(),
            short_circuit: false,
        }))
        .use_middleware(Arc::new(Tag {
            name: "b",
            log: log.clone(),
            short_circuit: short_circuit_second,
        }));
        set
    }

    #[tokio::test]
    async fn middleware_wraps_the_bot_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = set_with(&log, false);
        let bot_log = log.clone();
        let bot = bot_fn(move |_ctx| {
            let bot_log = bot_log.clone();
            Box::pin(async move {
                bot_log.lock().unwrap().push("bot".into());
                Ok(())
            })
        });
        let ctx = TurnContext::new(RecordingAdapter::new(), Activity::message("hi"));

        set.receive_activity(&ctx, &bot).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:before", "b:before", "bot", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = set_with(&log, true);
        let bot_log = log.clone();
        let bot = bot_fn(move |_ctx| {
            let bot_log = bot_log.clone();
            Box::pin(async move {
                bot_log.lock().unwrap().push("bot".into());
                Ok(())
            })
        });
        let ctx = TurnContext::new(RecordingAdapter::new(), Activity::message("hi"));

        set.receive_activity(&ctx, &bot).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a:before", "b:before", "a:after"]);
    }
}
