use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::activity_handler::ActivityHandler;
use crate::turn_context::TurnContext;

/// The application logic invoked once per turn, after middleware.
///
/// Every [`ActivityHandler`] is a `Bot`; implement `ActivityHandler` rather
/// than this trait.
#[async_trait]
pub trait Bot: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext) -> Result<()>;
}

/// Bot backed by a closure, mostly handy in tests and samples.
pub struct BotFn<F>(F);

pub fn bot_fn<F>(f: F) -> BotFn<F>
where
    F: for<'a> Fn(&'a TurnContext) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    BotFn(f)
}

#[async_trait]
impl<F> ActivityHandler for BotFn<F>
where
    F: for<'a> Fn(&'a TurnContext) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
        (self.0)(ctx).await
    }
}
