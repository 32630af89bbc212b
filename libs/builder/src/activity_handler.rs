use anyhow::Result;
use async_trait::async_trait;
use bot_schema::signin::{TOKEN_EXCHANGE_OPERATION_NAME, TOKEN_RESPONSE_EVENT_NAME, VERIFY_STATE_OPERATION_NAME};
use bot_schema::{Activity, ActivityTypes, ChannelAccount, InvokeResponse, MessageReaction};
use serde_json::Value;
use thiserror::Error;

use crate::bot::Bot;
use crate::turn_context::TurnContext;
use crate::turn_state::keys;

/// Raised from invoke handlers to answer with a specific status.
#[derive(Debug, Error)]
#[error("invoke failed with status {status}")]
pub struct InvokeResponseError {
    pub status: u16,
    pub body: Option<Value>,
}

impl InvokeResponseError {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn not_implemented() -> Self {
        Self::new(501, None)
    }

    pub fn to_response(&self) -> InvokeResponse {
        InvokeResponse::new(self.status, self.body.clone())
    }
}

fn has_members_other_than_bot(members: &[ChannelAccount], activity: &Activity) -> bool {
    let Some(bot_id) = activity.recipient_id() else {
        return false;
    };
    members.iter().any(|member| member.id.as_deref() != Some(bot_id))
}

/// Routes each activity type to an overridable hook.
///
/// Every hook defaults to doing nothing; invoke hooks default to
/// `501 Not Implemented`.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
        let activity_type = ctx.activity().activity_type.clone();
        match activity_type {
            ActivityTypes::Message => self.on_message_activity(ctx).await,
            ActivityTypes::ConversationUpdate => self.on_conversation_update_activity(ctx).await,
            ActivityTypes::MessageReaction => self.on_message_reaction_activity(ctx).await,
            ActivityTypes::Event => self.on_event_activity(ctx).await,
            ActivityTypes::InstallationUpdate => self.on_installation_update(ctx).await,
            ActivityTypes::Command => self.on_command_activity(ctx).await,
            ActivityTypes::CommandResult => self.on_command_result_activity(ctx).await,
            ActivityTypes::EndOfConversation => self.on_end_of_conversation_activity(ctx).await,
            ActivityTypes::Typing => self.on_typing_activity(ctx).await,
            ActivityTypes::Invoke => {
                let response = match self.on_invoke_activity(ctx).await {
                    Ok(response) => response,
                    Err(err) => match err.downcast::<InvokeResponseError>() {
                        Ok(invoke) => invoke.to_response(),
                        Err(err) => return Err(err),
                    },
                };
                if !ctx.turn_state().contains_key(keys::INVOKE_RESPONSE) {
                    let mut reply = Activity::new(ActivityTypes::InvokeResponse);
                    reply.value = Some(serde_json::to_value(&response)?);
                    ctx.send_activity(reply).await?;
                }
                Ok(())
            }
            _ => self.on_unrecognized_activity_type(ctx).await,
        }
    }

    async fn on_message_activity(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    /// Dispatches to the members hooks, ignoring updates that only concern
    /// the bot itself.
    async fn on_conversation_update_activity(&self, ctx: &TurnContext) -> Result<()> {
        let activity = ctx.activity();
        if has_members_other_than_bot(&activity.members_added, activity) {
            self.on_members_added(&activity.members_added, ctx).await
        } else if has_members_other_than_bot(&activity.members_removed, activity) {
            self.on_members_removed(&activity.members_removed, ctx).await
        } else {
            Ok(())
        }
    }

    async fn on_members_added(&self, _members: &[ChannelAccount], _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_members_removed(
        &self,
        _members: &[ChannelAccount],
        _ctx: &TurnContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_message_reaction_activity(&self, ctx: &TurnContext) -> Result<()> {
        let activity = ctx.activity();
        if !activity.reactions_added.is_empty() {
            self.on_reactions_added(&activity.reactions_added, ctx).await?;
        }
        if !activity.reactions_removed.is_empty() {
            self.on_reactions_removed(&activity.reactions_removed, ctx)
                .await?;
        }
        Ok(())
    }

    async fn on_reactions_added(
        &self,
        _reactions: &[MessageReaction],
        _ctx: &TurnContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_reactions_removed(
        &self,
        _reactions: &[MessageReaction],
        _ctx: &TurnContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_event_activity(&self, ctx: &TurnContext) -> Result<()> {
        if ctx.activity().name.as_deref() == Some(TOKEN_RESPONSE_EVENT_NAME) {
            return self.on_token_response_event(ctx).await;
        }
        self.on_event(ctx).await
    }

    async fn on_token_response_event(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_event(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_invoke_activity(&self, ctx: &TurnContext) -> Result<InvokeResponse> {
        let name = ctx.activity().name.as_deref();
        if name == Some(VERIFY_STATE_OPERATION_NAME) || name == Some(TOKEN_EXCHANGE_OPERATION_NAME)
        {
            return Ok(match self.on_sign_in_invoke(ctx).await {
                Ok(()) => InvokeResponse::ok(None),
                Err(err) => match err.downcast_ref::<InvokeResponseError>() {
                    Some(invoke) => invoke.to_response(),
                    None => InvokeResponse::new(500, None),
                },
            });
        }
        Err(InvokeResponseError::not_implemented().into())
    }

    async fn on_sign_in_invoke(&self, _ctx: &TurnContext) -> Result<()> {
        Err(InvokeResponseError::not_implemented().into())
    }

    async fn on_installation_update(&self, ctx: &TurnContext) -> Result<()> {
        match ctx.activity().action.as_deref() {
            Some("add") | Some("add-upgrade") => self.on_installation_update_add(ctx).await,
            Some("remove") | Some("remove-upgrade") => {
                self.on_installation_update_remove(ctx).await
            }
            _ => Ok(()),
        }
    }

    async fn on_installation_update_add(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_installation_update_remove(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_command_activity(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_command_result_activity(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_end_of_conversation_activity(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_typing_activity(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }

    async fn on_unrecognized_activity_type(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: ActivityHandler> Bot for T {
    async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
        ActivityHandler::on_turn(self, ctx).await
    }
}
