use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bot_builder::telemetry::SharedTelemetryClient;
use bot_builder::turn_state::keys;
use bot_builder::{BotStateSet, ConversationState, StatePropertyAccessor, TurnContext, UserState};
use bot_connector::auth::{ClaimsIdentity, SkillValidation};
use bot_schema::{Activity, ActivityTypes, EndOfConversationCodes};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::dialog::{Dialog, DialogState, DialogTurnResult, DialogTurnStatus, events};
use crate::dialog_context::DialogContext;
use crate::dialog_set::DialogSet;
use crate::memory::SETTINGS_KEY;

/// Conversation state property that holds the root dialog stack.
pub const DIALOG_STATE_PROPERTY: &str = "DialogState";
const LAST_ACCESS_PROPERTY: &str = "_lastAccess";
const BOT_STATE_TRACE_TYPE: &str = "https://www.botframework.com/schemas/botState";

#[derive(Debug, Clone, PartialEq)]
pub struct DialogManagerResult {
    pub turn_result: DialogTurnResult,
}

/// Runs a root dialog for every turn and takes care of loading and saving
/// the state it needs.
pub struct DialogManager {
    root_dialog_id: String,
    dialogs: Arc<DialogSet>,
    conversation_state: ConversationState,
    user_state: Option<UserState>,
    dialog_state: StatePropertyAccessor<DialogState>,
    last_access: StatePropertyAccessor<DateTime<Utc>>,
    expire_after: Option<Duration>,
    settings: Option<Value>,
}

impl DialogManager {
    pub fn new(root_dialog: impl Dialog + 'static, conversation_state: ConversationState) -> Self {
        Self::with_shared_root(Arc::new(root_dialog), conversation_state)
    }

    pub fn with_shared_root(root_dialog: Arc<dyn Dialog>, conversation_state: ConversationState) -> Self {
        let dialog_state = conversation_state.create_property(DIALOG_STATE_PROPERTY);
        let last_access = conversation_state.create_property(LAST_ACCESS_PROPERTY);
        let dialogs = Arc::new(DialogSet::new(dialog_state.clone()));
        let root_dialog_id = dialogs.add_shared(root_dialog);
        Self {
            root_dialog_id,
            dialogs,
            conversation_state,
            user_state: None,
            dialog_state,
            last_access,
            expire_after: None,
            settings: None,
        }
    }

    pub fn with_user_state(mut self, user_state: UserState) -> Self {
        self.user_state = Some(user_state);
        self
    }

    /// Drops the dialog stack of conversations idle for longer than `after`.
    pub fn with_expire_after(mut self, after: Duration) -> Self {
        self.expire_after = Some(after);
        self
    }

    /// JSON exposed read-only through the `settings` memory scope.
    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_telemetry_client(self, client: SharedTelemetryClient) -> Self {
        self.dialogs.set_telemetry_client(client);
        self
    }

    pub fn root_dialog_id(&self) -> &str {
        &self.root_dialog_id
    }

    pub fn dialogs(&self) -> &Arc<DialogSet> {
        &self.dialogs
    }

    fn state_set(&self) -> BotStateSet {
        let states = BotStateSet::new().add(self.conversation_state.clone());
        match &self.user_state {
            Some(user_state) => states.add(user_state.clone()),
            None => states,
        }
    }

    pub async fn on_turn(&self, ctx: &TurnContext) -> Result<DialogManagerResult> {
        let turn_state = ctx.turn_state();
        turn_state.insert_typed(self.conversation_state.clone());
        if let Some(user_state) = &self.user_state {
            turn_state.insert_typed(user_state.clone());
        }
        if let Some(settings) = &self.settings {
            turn_state.insert(SETTINGS_KEY, settings.clone());
        }

        let states = self.state_set();
        states.load_all(ctx, false).await?;

        let now = Utc::now();
        if let (Some(expire_after), Some(last_access)) =
            (self.expire_after, self.last_access.get_opt(ctx).await?)
        {
            let idle = now.signed_duration_since(last_access).to_std().unwrap_or_default();
            if idle > expire_after {
                debug!(idle_ms = idle.as_millis() as u64, "dialog state expired");
                self.dialog_state.delete(ctx).await?;
            }
        }
        self.last_access.set(ctx, &now).await?;

        let dc = self.dialogs.create_context(ctx).await?;
        let turn_result = run_turn(&dc, &self.root_dialog_id).await?;

        states.save_all_changes(ctx, false).await?;
        Ok(DialogManagerResult { turn_result })
    }
}

/// Runs `dialog` for one turn against the stack stored in `accessor`. The
/// caller saves conversation state afterwards.
pub async fn run_dialog(
    dialog: Arc<dyn Dialog>,
    ctx: &TurnContext,
    accessor: StatePropertyAccessor<DialogState>,
) -> Result<DialogTurnResult> {
    let dialogs = Arc::new(DialogSet::new(accessor));
    let root_id = dialogs.add_shared(dialog);
    let dc = dialogs.create_context(ctx).await?;
    run_turn(&dc, &root_id).await
}

async fn run_turn(dc: &DialogContext, root_id: &str) -> Result<DialogTurnResult> {
    let ctx = dc.context();
    let from_skill = is_from_skill(ctx);

    if from_skill && ctx.activity().is_type(&ActivityTypes::EndOfConversation) && dc.stack_len() > 0 {
        debug!("parent bot ended the conversation");
        return dc.cancel_all_dialogs(true, None, None).await;
    }

    let result = match continue_or_begin(dc, root_id).await {
        Ok(result) => result,
        Err(err) => {
            let handled = dc
                .emit_event(events::ERROR, Some(json!(err.to_string())), true, true)
                .await?;
            if !handled {
                return Err(err);
            }
            warn!(error = %err, "dialog error handled by an error event");
            DialogTurnResult::END_OF_TURN
        }
    };

    let snapshot = dc.state().get_memory_snapshot();
    ctx.trace_activity("BotState", Some(snapshot), Some(BOT_STATE_TRACE_TYPE), Some("Bot State"))
        .await?;

    if from_skill {
        let code = match result.status {
            DialogTurnStatus::Complete => Some(EndOfConversationCodes::CompletedSuccessfully),
            DialogTurnStatus::Cancelled => Some(EndOfConversationCodes::UserCancelled),
            _ => None,
        };
        if let Some(code) = code {
            let mut end = Activity::create_end_of_conversation_activity();
            end.value = result.result.clone();
            end.locale = ctx.activity().locale.clone();
            end.code = Some(code);
            ctx.send_activity(end).await?;
        }
    }
    Ok(result)
}

async fn continue_or_begin(dc: &DialogContext, root_id: &str) -> Result<DialogTurnResult> {
    let result = dc.continue_dialog().await?;
    if result.status == DialogTurnStatus::Empty {
        return dc.begin_dialog(root_id, None).await;
    }
    Ok(result)
}

fn is_from_skill(ctx: &TurnContext) -> bool {
    ctx.turn_state()
        .get::<ClaimsIdentity>(keys::BOT_IDENTITY)
        .is_some_and(|identity| SkillValidation::is_skill_claim(identity.claims()))
}
