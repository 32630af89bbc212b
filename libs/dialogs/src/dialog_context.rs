use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use bot_builder::{StatePropertyAccessor, TurnContext};
use serde_json::{Map, Value};
use tracing::debug;

use crate::dialog::{
    Dialog, DialogEvent, DialogInstance, DialogReason, DialogState, DialogTurnResult,
    DialogTurnStatus, events,
};
use crate::dialog_set::DialogSet;
use crate::error::DialogError;
use crate::memory::DialogStateManager;
use crate::prompts::PromptOptions;
use crate::prompts::culture::ENGLISH_CULTURE;

/// Key under which a container keeps its child stack in its own state.
pub(crate) const CHILD_STACK_KEY: &str = "dialogs";
const ACTIVITY_RECEIVED_EMITTED: &str = "activityReceivedEmitted";

/// Well-known entries of the `turn` memory scope.
pub mod turn_path {
    pub const LAST_RESULT: &str = "lastresult";
    pub const REPEAT_DIALOG_ID: &str = "__repeatDialogId";
    pub const LOCALE: &str = "locale";
}

enum StackSource {
    Owned {
        stack: Mutex<Vec<DialogInstance>>,
        accessor: Option<StatePropertyAccessor<DialogState>>,
    },
    /// Lives in the state of the parent's instance found `depth` entries
    /// above the bottom of the parent stack.
    Nested { depth: usize },
}

struct Inner {
    dialogs: Arc<DialogSet>,
    turn: TurnContext,
    source: StackSource,
    parent: Option<DialogContext>,
}

/// A dialog stack bound to one turn.
///
/// Cloning is cheap; clones share the same stack. Every public operation
/// writes the stack back to the state accessor of the root context before
/// returning, so the caller only has to save conversation state.
#[derive(Clone)]
pub struct DialogContext {
    inner: Arc<Inner>,
}

impl DialogContext {
    /// A context over `state` that is not written back anywhere.
    pub fn new(dialogs: Arc<DialogSet>, turn: TurnContext, state: DialogState) -> Self {
        Self::root(dialogs, turn, state.dialog_stack, None)
    }

    pub(crate) fn root(
        dialogs: Arc<DialogSet>,
        turn: TurnContext,
        stack: Vec<DialogInstance>,
        accessor: Option<StatePropertyAccessor<DialogState>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dialogs,
                turn,
                source: StackSource::Owned {
                    stack: Mutex::new(stack),
                    accessor,
                },
                parent: None,
            }),
        }
    }

    /// Child context over the stack stored in the parent's active instance.
    pub(crate) fn nested(dialogs: Arc<DialogSet>, parent: &DialogContext) -> Option<Self> {
        let depth = parent.stack_len().checked_sub(1)?;
        Some(Self {
            inner: Arc::new(Inner {
                dialogs,
                turn: parent.context().clone(),
                source: StackSource::Nested { depth },
                parent: Some(parent.clone()),
            }),
        })
    }

    pub fn context(&self) -> &TurnContext {
        &self.inner.turn
    }

    pub fn dialogs(&self) -> &Arc<DialogSet> {
        &self.inner.dialogs
    }

    pub fn parent(&self) -> Option<&DialogContext> {
        self.inner.parent.as_ref()
    }

    /// Copy of the stack, active dialog first.
    pub fn stack(&self) -> Vec<DialogInstance> {
        self.load_stack()
    }

    pub fn active_dialog(&self) -> Option<DialogInstance> {
        self.load_stack().into_iter().next()
    }

    /// Runs `f` against the active instance's state.
    pub fn with_active_state<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> Option<R> {
        self.with_stack(|stack| stack.first_mut().map(|instance| f(&mut instance.state)))
    }

    pub fn state(&self) -> DialogStateManager {
        DialogStateManager::new(self.clone())
    }

    /// Context of the active container dialog's child stack, if any.
    pub fn child(&self) -> Option<DialogContext> {
        let instance = self.active_dialog()?;
        let dialog = self.find_dialog(&instance.id)?;
        dialog.as_container()?.create_child_context(self)
    }

    /// Looks `dialog_id` up in this context's set, then in the parents'.
    pub fn find_dialog(&self, dialog_id: &str) -> Option<Arc<dyn Dialog>> {
        self.inner
            .dialogs
            .find(dialog_id)
            .or_else(|| self.parent().and_then(|parent| parent.find_dialog(dialog_id)))
    }

    /// Locale from `turn.locale`, else the activity, else `en-us`.
    pub fn get_locale(&self) -> String {
        self.context()
            .turn_state()
            .with_turn_memory(|memory| {
                memory
                    .get(turn_path::LOCALE)
                    .and_then(Value::as_str)
                    .filter(|locale| !locale.is_empty())
                    .map(str::to_string)
            })
            .or_else(|| {
                self.context()
                    .locale()
                    .filter(|locale| !locale.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| ENGLISH_CULTURE.to_string())
    }

    /// Pushes `dialog_id` onto the stack and starts it.
    pub async fn begin_dialog(&self, dialog_id: &str, options: Option<Value>) -> Result<DialogTurnResult> {
        if dialog_id.is_empty() {
            return Err(DialogError::InvalidOptions("a dialog id is required".into()).into());
        }
        let dialog = self
            .find_dialog(dialog_id)
            .ok_or_else(|| DialogError::NotFound(dialog_id.to_string()))?;

        debug!(dialog_id, "begin dialog");
        self.with_stack(|stack| stack.insert(0, DialogInstance::new(dialog_id)));
        let result = dialog.begin_dialog(self, options).await?;
        self.persist().await?;
        Ok(result)
    }

    /// Starts a prompt with the given options.
    pub async fn prompt(&self, dialog_id: &str, options: PromptOptions) -> Result<DialogTurnResult> {
        let options = serde_json::to_value(options).map_err(DialogError::from)?;
        self.begin_dialog(dialog_id, Some(options)).await
    }

    /// Routes the current activity to the active dialog. Returns `Empty`
    /// when nothing is on the stack.
    pub async fn continue_dialog(&self) -> Result<DialogTurnResult> {
        if self
            .context()
            .turn_state()
            .insert_if_absent(ACTIVITY_RECEIVED_EMITTED, true)
        {
            let activity = serde_json::to_value(self.context().activity()).map_err(DialogError::from)?;
            self.emit_event(events::ACTIVITY_RECEIVED, Some(activity), true, true)
                .await?;
        }

        let result = match self.active_dialog() {
            Some(instance) => {
                let dialog = self
                    .find_dialog(&instance.id)
                    .ok_or_else(|| DialogError::ContinueTargetNotFound(instance.id.clone()))?;
                dialog.continue_dialog(self).await?
            }
            None => DialogTurnResult::new(DialogTurnStatus::Empty),
        };
        self.persist().await?;
        Ok(result)
    }

    /// Ends the active dialog and resumes the one below it with `result`.
    /// With nothing left, the turn completes with `result`.
    pub async fn end_dialog(&self, result: Option<Value>) -> Result<DialogTurnResult> {
        self.end_active_dialog(DialogReason::EndCalled, result.clone())
            .await?;

        let outcome = match self.active_dialog() {
            Some(instance) => {
                let dialog = self
                    .find_dialog(&instance.id)
                    .ok_or_else(|| DialogError::ResumeTargetNotFound(instance.id.clone()))?;
                dialog
                    .resume_dialog(self, DialogReason::EndCalled, result)
                    .await?
            }
            None => DialogTurnResult::with_result(DialogTurnStatus::Complete, result),
        };
        self.persist().await?;
        Ok(outcome)
    }

    /// Pops every dialog, giving each one below the first a chance to stop
    /// the cancellation by handling `event_name` (default `cancelDialog`).
    /// With `cancel_parents` the parent stacks are unwound too.
    pub async fn cancel_all_dialogs(
        &self,
        cancel_parents: bool,
        event_name: Option<&str>,
        event_value: Option<Value>,
    ) -> Result<DialogTurnResult> {
        let event_name = event_name.unwrap_or(events::CANCEL_DIALOG);
        if self.stack_len() == 0 && self.parent().is_none() {
            return Ok(DialogTurnResult::new(DialogTurnStatus::Empty));
        }

        let mut notify = false;
        let mut current = Some(self.clone());
        while let Some(dc) = current.clone() {
            if dc.stack_len() > 0 {
                if notify
                    && dc
                        .emit_event(event_name, event_value.clone(), false, false)
                        .await?
                {
                    break;
                }
                dc.end_active_dialog(DialogReason::CancelCalled, None).await?;
            } else {
                current = if cancel_parents {
                    dc.parent().cloned()
                } else {
                    None
                };
            }
            notify = true;
        }
        self.persist().await?;
        Ok(DialogTurnResult::new(DialogTurnStatus::Cancelled))
    }

    /// Ends the active dialog and starts `dialog_id` in its place.
    pub async fn replace_dialog(&self, dialog_id: &str, options: Option<Value>) -> Result<DialogTurnResult> {
        self.end_active_dialog(DialogReason::ReplaceCalled, None)
            .await?;
        self.context().turn_state().with_turn_memory(|memory| {
            memory.insert(
                turn_path::REPEAT_DIALOG_ID.into(),
                Value::String(dialog_id.to_string()),
            )
        });
        self.begin_dialog(dialog_id, options).await
    }

    /// Asks the active dialog to prompt again, unless a `repromptDialog`
    /// handler takes care of it.
    pub async fn reprompt_dialog(&self) -> Result<()> {
        let Some(instance) = self.active_dialog() else {
            return Ok(());
        };
        if !self
            .emit_event(events::REPROMPT_DIALOG, None, false, false)
            .await?
        {
            let dialog = self
                .find_dialog(&instance.id)
                .ok_or_else(|| DialogError::NotFound(instance.id.clone()))?;
            dialog.reprompt_dialog(self.context(), &instance).await?;
        }
        self.persist().await?;
        Ok(())
    }

    /// Raises an event on the active dialog, starting at the deepest child
    /// when `from_leaf` is set. Returns whether a dialog handled it.
    pub async fn emit_event(
        &self,
        name: &str,
        value: Option<Value>,
        bubble: bool,
        from_leaf: bool,
    ) -> Result<bool> {
        let event = DialogEvent {
            name: name.to_string(),
            value,
            bubble,
        };
        let mut dc = self.clone();
        if from_leaf {
            while let Some(child) = dc.child() {
                dc = child;
            }
        }
        let Some(instance) = dc.active_dialog() else {
            return Ok(false);
        };
        match dc.find_dialog(&instance.id) {
            Some(dialog) => dialog.on_dialog_event(&dc, &event).await,
            None => Ok(false),
        }
    }

    pub(crate) async fn end_active_dialog(&self, reason: DialogReason, result: Option<Value>) -> Result<()> {
        let Some(instance) = self.active_dialog() else {
            return Ok(());
        };
        if let Some(dialog) = self.find_dialog(&instance.id) {
            dialog.end_dialog(self.context(), &instance, reason).await?;
        }
        debug!(dialog_id = %instance.id, ?reason, "end dialog");
        self.with_stack(|stack| {
            if !stack.is_empty() {
                stack.remove(0);
            }
        });
        self.context().turn_state().with_turn_memory(|memory| {
            memory.insert(
                turn_path::LAST_RESULT.into(),
                result.unwrap_or(Value::Null),
            )
        });
        Ok(())
    }

    pub(crate) fn stack_len(&self) -> usize {
        self.load_stack().len()
    }

    /// Runs `f` against the instance `position` entries above the bottom
    /// of the stack. Positions stay valid while dialogs are pushed on top.
    pub(crate) fn with_instance_from_bottom<R>(
        &self,
        position: usize,
        f: impl FnOnce(&mut DialogInstance) -> R,
    ) -> Option<R> {
        self.with_stack(|stack| {
            let index = stack.len().checked_sub(position + 1)?;
            stack.get_mut(index).map(f)
        })
    }

    pub(crate) fn with_stack<R>(&self, f: impl FnOnce(&mut Vec<DialogInstance>) -> R) -> R {
        let mut stack = self.load_stack();
        let out = f(&mut stack);
        self.store_stack(stack);
        out
    }

    fn load_stack(&self) -> Vec<DialogInstance> {
        match &self.inner.source {
            StackSource::Owned { stack, .. } => {
                stack.lock().unwrap_or_else(PoisonError::into_inner).clone()
            }
            StackSource::Nested { depth } => {
                let Some(parent) = self.parent() else {
                    return Vec::new();
                };
                let parent_stack = parent.load_stack();
                parent_stack
                    .len()
                    .checked_sub(depth + 1)
                    .and_then(|index| parent_stack.get(index))
                    .map(|owner| DialogState::stack_from_value(owner.state.get(CHILD_STACK_KEY)))
                    .unwrap_or_default()
            }
        }
    }

    fn store_stack(&self, new_stack: Vec<DialogInstance>) {
        match &self.inner.source {
            StackSource::Owned { stack, .. } => {
                *stack.lock().unwrap_or_else(PoisonError::into_inner) = new_stack;
            }
            StackSource::Nested { depth } => {
                let Some(parent) = self.parent() else {
                    return;
                };
                let mut parent_stack = parent.load_stack();
                let Some(index) = parent_stack.len().checked_sub(depth + 1) else {
                    return;
                };
                if let Some(owner) = parent_stack.get_mut(index) {
                    owner.state.insert(
                        CHILD_STACK_KEY.into(),
                        DialogState::stack_to_value(&new_stack),
                    );
                    parent.store_stack(parent_stack);
                }
            }
        }
    }

    /// Writes the root stack to its state accessor, if it has one.
    pub(crate) async fn persist(&self) -> Result<(), DialogError> {
        let mut root = self;
        while let Some(parent) = root.parent() {
            root = parent;
        }
        if let StackSource::Owned {
            stack,
            accessor: Some(accessor),
        } = &root.inner.source
        {
            let dialog_stack = stack.lock().unwrap_or_else(PoisonError::into_inner).clone();
            accessor
                .set(root.context(), &DialogState { dialog_stack })
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DialogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogContext")
            .field("stack", &self.load_stack())
            .field("has_parent", &self.parent().is_some())
            .finish()
    }
}
