use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_builder::telemetry::{SharedTelemetryClient, null_telemetry_client};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dialog_context::DialogContext;
use crate::dialog_set::DialogSet;

/// Names of the events raised through [`DialogContext::emit_event`].
pub mod events {
    pub const BEGIN_DIALOG: &str = "beginDialog";
    pub const REPROMPT_DIALOG: &str = "repromptDialog";
    pub const CANCEL_DIALOG: &str = "cancelDialog";
    pub const ACTIVITY_RECEIVED: &str = "activityReceived";
    pub const VERSION_CHANGED: &str = "versionChanged";
    pub const ERROR: &str = "error";
}

/// One entry on a dialog stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogInstance {
    pub id: String,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DialogInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Persisted form of a dialog stack. The active dialog is at index 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogState {
    #[serde(default)]
    pub dialog_stack: Vec<DialogInstance>,
}

impl DialogState {
    pub(crate) fn stack_from_value(value: Option<&Value>) -> Vec<DialogInstance> {
        value
            .cloned()
            .and_then(|value| serde_json::from_value::<DialogState>(value).ok())
            .map(|state| state.dialog_stack)
            .unwrap_or_default()
    }

    pub(crate) fn stack_to_value(stack: &[DialogInstance]) -> Value {
        let mut map = Map::new();
        map.insert(
            "dialogStack".into(),
            Value::Array(
                stack
                    .iter()
                    .filter_map(|instance| serde_json::to_value(instance).ok())
                    .collect(),
            ),
        );
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialogTurnStatus {
    /// Nothing was on the stack.
    Empty,
    /// The active dialog is waiting for input.
    Waiting,
    Complete,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogTurnResult {
    pub status: DialogTurnStatus,
    pub result: Option<Value>,
    /// Set when a child context finished and its parent ended as well.
    pub parent_ended: bool,
}

impl DialogTurnResult {
    pub const END_OF_TURN: DialogTurnResult = DialogTurnResult {
        status: DialogTurnStatus::Waiting,
        result: None,
        parent_ended: false,
    };

    pub fn new(status: DialogTurnStatus) -> Self {
        Self {
            status,
            result: None,
            parent_ended: false,
        }
    }

    pub fn with_result(status: DialogTurnStatus, result: Option<Value>) -> Self {
        Self {
            status,
            result,
            parent_ended: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogReason {
    BeginCalled,
    ContinueCalled,
    EndCalled,
    ReplaceCalled,
    CancelCalled,
    NextCalled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogEvent {
    pub name: String,
    pub value: Option<Value>,
    pub bubble: bool,
}

/// A conversational unit that can span several turns.
///
/// Implementations keep no per-conversation data in `self`: everything
/// that must survive a turn lives in the [`DialogInstance`] state on the
/// stack.
#[async_trait]
pub trait Dialog: Send + Sync {
    fn id(&self) -> &str;

    /// Changes when the dialog's shape changes, so persisted stacks can
    /// detect that they were created by an older version.
    fn version(&self) -> String {
        self.id().to_string()
    }

    async fn begin_dialog(&self, dc: &DialogContext, options: Option<Value>) -> Result<DialogTurnResult>;

    async fn continue_dialog(&self, dc: &DialogContext) -> Result<DialogTurnResult> {
        dc.end_dialog(None).await
    }

    /// Called when a child dialog ended and this one is active again.
    async fn resume_dialog(
        &self,
        dc: &DialogContext,
        _reason: DialogReason,
        result: Option<Value>,
    ) -> Result<DialogTurnResult> {
        dc.end_dialog(result).await
    }

    async fn reprompt_dialog(&self, _ctx: &TurnContext, _instance: &DialogInstance) -> Result<()> {
        Ok(())
    }

    async fn end_dialog(
        &self,
        _ctx: &TurnContext,
        _instance: &DialogInstance,
        _reason: DialogReason,
    ) -> Result<()> {
        Ok(())
    }

    /// Handles an event in three stages: `on_pre_bubble_event`, then the
    /// parent context when the event bubbles, then `on_post_bubble_event`.
    /// Returns true once any stage handled it.
    async fn on_dialog_event(&self, dc: &DialogContext, event: &DialogEvent) -> Result<bool> {
        bubble_event(self, dc, event).await
    }

    async fn on_pre_bubble_event(&self, _dc: &DialogContext, _event: &DialogEvent) -> Result<bool> {
        Ok(false)
    }

    async fn on_post_bubble_event(&self, _dc: &DialogContext, _event: &DialogEvent) -> Result<bool> {
        Ok(false)
    }

    fn telemetry_client(&self) -> SharedTelemetryClient {
        null_telemetry_client()
    }

    fn set_telemetry_client(&self, _client: SharedTelemetryClient) {}

    /// Dialogs that own a child stack return themselves here.
    fn as_container(&self) -> Option<&dyn DialogContainer> {
        None
    }
}

/// The pre-bubble, bubble, post-bubble sequence behind
/// [`Dialog::on_dialog_event`].
pub(crate) async fn bubble_event<D: Dialog + ?Sized>(
    dialog: &D,
    dc: &DialogContext,
    event: &DialogEvent,
) -> Result<bool> {
    let mut handled = dialog.on_pre_bubble_event(dc, event).await?;
    if !handled && event.bubble {
        if let Some(parent) = dc.parent() {
            handled = parent
                .emit_event(&event.name, event.value.clone(), true, false)
                .await?;
        }
    }
    if !handled {
        handled = dialog.on_post_bubble_event(dc, event).await?;
    }
    Ok(handled)
}

/// A dialog that runs its own [`DialogSet`] on a nested stack.
pub trait DialogContainer: Send + Sync {
    fn dialogs(&self) -> &std::sync::Arc<DialogSet>;

    /// Context for the nested stack of the active instance in `dc`, if
    /// that instance belongs to this container.
    fn create_child_context(&self, dc: &DialogContext) -> Option<DialogContext>;
}

/// Telemetry client slot shared by dialog implementations.
pub(crate) struct TelemetrySlot(RwLock<SharedTelemetryClient>);

impl TelemetrySlot {
    pub(crate) fn get(&self) -> SharedTelemetryClient {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set(&self, client: SharedTelemetryClient) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = client;
    }
}

impl Default for TelemetrySlot {
    fn default() -> Self {
        Self(RwLock::new(null_telemetry_client()))
    }
}
