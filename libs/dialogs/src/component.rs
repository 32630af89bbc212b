use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_builder::telemetry::{Severity, SharedTelemetryClient};
use serde_json::{Value, json};
use tracing::warn;

use crate::dialog::{
    Dialog, DialogContainer, DialogEvent, DialogInstance, DialogReason, DialogState,
    DialogTurnResult, DialogTurnStatus, TelemetrySlot, bubble_event, events,
};
use crate::dialog_context::{CHILD_STACK_KEY, DialogContext};
use crate::dialog_set::DialogSet;

/// A dialog made of other dialogs.
///
/// The inner dialogs run on their own stack, stored in this dialog's
/// instance state, and the component ends once that stack empties.
pub struct ComponentDialog {
    id: String,
    initial_dialog_id: Option<String>,
    dialogs: Arc<DialogSet>,
    telemetry: TelemetrySlot,
}

impl ComponentDialog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            initial_dialog_id: None,
            dialogs: Arc::new(DialogSet::detached()),
            telemetry: TelemetrySlot::default(),
        }
    }

    /// Adds an inner dialog. The first one added becomes the initial
    /// dialog unless [`ComponentDialog::with_initial_dialog_id`] says
    /// otherwise.
    pub fn add_dialog(mut self, dialog: impl Dialog + 'static) -> Self {
        let key = self.dialogs.add(dialog);
        self.initial_dialog_id.get_or_insert(key);
        self
    }

    pub fn with_initial_dialog_id(mut self, dialog_id: impl Into<String>) -> Self {
        self.initial_dialog_id = Some(dialog_id.into());
        self
    }

    pub fn initial_dialog_id(&self) -> Option<&str> {
        self.initial_dialog_id.as_deref()
    }

    pub fn find_dialog(&self, dialog_id: &str) -> Option<Arc<dyn Dialog>> {
        self.dialogs.find(dialog_id)
    }

    /// Stamps the active instance with the current inner version and
    /// raises `versionChanged` when a stored stack came from another one.
    async fn check_for_version_change(&self, outer: &DialogContext) -> Result<()> {
        let version = self.dialogs.get_version();
        let previous = outer.with_stack(|stack| {
            stack
                .first_mut()
                .and_then(|instance| instance.version.replace(version.clone()))
        });
        if previous.is_some_and(|previous| previous != version) {
            outer
                .emit_event(events::VERSION_CHANGED, Some(json!(self.id)), true, false)
                .await?;
        }
        Ok(())
    }

    fn inner_context(&self, outer: &DialogContext) -> Result<DialogContext> {
        DialogContext::nested(self.dialogs.clone(), outer)
            .ok_or_else(|| anyhow::anyhow!("component '{}' has no active instance", self.id))
    }

    /// Context over the child stack kept in `instance`, detached from the
    /// outer stack.
    fn detached_context(&self, ctx: &TurnContext, instance: &DialogInstance) -> DialogContext {
        let stack = DialogState::stack_from_value(instance.state.get(CHILD_STACK_KEY));
        DialogContext::root(self.dialogs.clone(), ctx.clone(), stack, None)
    }

    async fn end_component(&self, outer: &DialogContext, result: Option<Value>) -> Result<DialogTurnResult> {
        outer.end_dialog(result).await
    }
}

#[async_trait]
impl Dialog for ComponentDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(&self, outer: &DialogContext, options: Option<Value>) -> Result<DialogTurnResult> {
        self.check_for_version_change(outer).await?;
        let inner = self.inner_context(outer)?;
        let initial = self
            .initial_dialog_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("component '{}' has no dialogs", self.id))?;
        let turn = inner.begin_dialog(&initial, options).await?;
        if turn.status != DialogTurnStatus::Waiting {
            return self.end_component(outer, turn.result).await;
        }
        Ok(DialogTurnResult::END_OF_TURN)
    }

    async fn continue_dialog(&self, outer: &DialogContext) -> Result<DialogTurnResult> {
        self.check_for_version_change(outer).await?;
        let inner = self.inner_context(outer)?;
        let turn = inner.continue_dialog().await?;
        if turn.status != DialogTurnStatus::Waiting {
            return self.end_component(outer, turn.result).await;
        }
        Ok(DialogTurnResult::END_OF_TURN)
    }

    /// Inner dialogs only resume through the child stack, so being resumed
    /// from outside means something replaced the top of the outer stack.
    async fn resume_dialog(
        &self,
        outer: &DialogContext,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> Result<DialogTurnResult> {
        self.check_for_version_change(outer).await?;
        if let Some(instance) = outer.active_dialog() {
            self.reprompt_dialog(outer.context(), &instance).await?;
        }
        Ok(DialogTurnResult::END_OF_TURN)
    }

    async fn reprompt_dialog(&self, ctx: &TurnContext, instance: &DialogInstance) -> Result<()> {
        self.detached_context(ctx, instance).reprompt_dialog().await
    }

    async fn end_dialog(&self, ctx: &TurnContext, instance: &DialogInstance, reason: DialogReason) -> Result<()> {
        if reason == DialogReason::CancelCalled {
            self.detached_context(ctx, instance)
                .cancel_all_dialogs(false, None, None)
                .await?;
        }
        Ok(())
    }

    async fn on_dialog_event(&self, dc: &DialogContext, event: &DialogEvent) -> Result<bool> {
        let handled = bubble_event(self, dc, event).await?;
        if !handled && event.name == events::VERSION_CHANGED {
            let active = dc.active_dialog().map(|instance| instance.id).unwrap_or_default();
            let message = format!("Unhandled dialog event: {}. Active Dialog: {active}", event.name);
            warn!(dialog_id = %self.id, %message);
            self.telemetry
                .get()
                .track_trace(&message, Severity::Warning, &Default::default());
            dc.context().trace_activity(&message, None, None, None).await?;
        }
        Ok(handled)
    }

    fn telemetry_client(&self) -> SharedTelemetryClient {
        self.telemetry.get()
    }

    fn set_telemetry_client(&self, client: SharedTelemetryClient) {
        self.dialogs.set_telemetry_client(client.clone());
        self.telemetry.set(client);
    }

    fn as_container(&self) -> Option<&dyn DialogContainer> {
        Some(self)
    }
}

impl DialogContainer for ComponentDialog {
    fn dialogs(&self) -> &Arc<DialogSet> {
        &self.dialogs
    }

    fn create_child_context(&self, dc: &DialogContext) -> Option<DialogContext> {
        let instance = dc.active_dialog()?;
        let owns_instance = dc
            .find_dialog(&instance.id)
            .is_some_and(|dialog| dialog.id() == self.id);
        if !owns_instance {
            return None;
        }
        DialogContext::nested(self.dialogs.clone(), dc)
    }
}
