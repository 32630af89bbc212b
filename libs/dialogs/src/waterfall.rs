use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_builder::telemetry::{SharedTelemetryClient, TelemetryMetrics, TelemetryProperties, properties};
use bot_schema::ActivityTypes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::dialog::{Dialog, DialogInstance, DialogReason, DialogTurnResult, TelemetrySlot};
use crate::dialog_context::DialogContext;
use crate::error::DialogError;

const OPTIONS: &str = "options";
const VALUES: &str = "values";
const INSTANCE_ID: &str = "instanceId";
const STEP_INDEX: &str = "stepIndex";

/// Telemetry event names raised by [`WaterfallDialog`].
pub mod events {
    pub const WATERFALL_START: &str = "WaterfallStart";
    pub const WATERFALL_STEP: &str = "WaterfallStep";
    pub const WATERFALL_COMPLETE: &str = "WaterfallComplete";
    pub const WATERFALL_CANCEL: &str = "WaterfallCancel";
}

pub type WaterfallStep = Arc<
    dyn for<'a> Fn(&'a mut WaterfallStepContext) -> BoxFuture<'a, Result<DialogTurnResult>>
        + Send
        + Sync,
>;

/// A dialog that runs a fixed sequence of steps, one or more per turn.
///
/// Each step either waits (usually by starting a prompt), moves on with
/// [`WaterfallStepContext::next`], or ends the dialog. The result of a
/// child dialog becomes the `result` of the following step.
#[derive(Clone)]
pub struct WaterfallDialog {
    id: String,
    steps: Vec<WaterfallStep>,
    telemetry: Arc<TelemetrySlot>,
}

impl WaterfallDialog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            telemetry: Arc::new(TelemetrySlot::default()),
        }
    }

    pub fn add_step<F>(mut self, step: F) -> Self
    where
        F: for<'a> Fn(&'a mut WaterfallStepContext) -> BoxFuture<'a, Result<DialogTurnResult>>
            + Send
            + Sync
            + 'static,
    {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn steps(&self) -> usize {
        self.steps.len()
    }

    fn step_name(&self, index: usize) -> String {
        format!("Step{}of{}", index + 1, self.steps.len())
    }

    fn track(&self, event: &str, properties: TelemetryProperties) {
        self.telemetry
            .get()
            .track_event(event, &properties, &TelemetryMetrics::new());
    }

    /// `dialog_id` is the key the instance was pushed under, which differs
    /// from [`Dialog::id`] when the set had to re-key a colliding id.
    fn base_properties(&self, dialog_id: &str, instance_id: Option<&str>) -> TelemetryProperties {
        let mut props = TelemetryProperties::new();
        props.insert(properties::DIALOG_ID.into(), dialog_id.to_string());
        props.insert(
            properties::INSTANCE_ID.into(),
            instance_id.unwrap_or_default().to_string(),
        );
        props
    }

    fn stack_key(&self, dc: &DialogContext) -> String {
        dc.active_dialog()
            .map(|instance| instance.id)
            .unwrap_or_else(|| self.id.clone())
    }

    async fn run_step(
        &self,
        dc: &DialogContext,
        index: usize,
        reason: DialogReason,
        result: Option<Value>,
    ) -> Result<DialogTurnResult> {
        if index >= self.steps.len() {
            return dc.end_dialog(result).await;
        }
        let dialog_id = self.stack_key(dc);

        let position = dc
            .stack_len()
            .checked_sub(1)
            .ok_or_else(|| DialogError::ContinueTargetNotFound(self.id.clone()))?;
        let (options, values, instance_id) = dc
            .with_active_state(|state| {
                state.insert(STEP_INDEX.into(), json!(index));
                (
                    state.get(OPTIONS).cloned().filter(|value| !value.is_null()),
                    state
                        .get(VALUES)
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default(),
                    state
                        .get(INSTANCE_ID)
                        .and_then(Value::as_str)
                        .map(str::to_string),
                )
            })
            .unwrap_or_default();

        let mut step = WaterfallStepContext {
            dc: dc.clone(),
            waterfall: self.clone(),
            index,
            position,
            options,
            reason,
            result,
            values,
            next_called: false,
        };

        let mut props = self.base_properties(&dialog_id, instance_id.as_deref());
        props.insert(properties::STEP_NAME.into(), self.step_name(index));
        self.track(events::WATERFALL_STEP, props);
        debug!(%dialog_id, step = index, ?reason, "running waterfall step");

        let run = self.steps[index].clone();
        run(&mut step).await
    }
}

#[async_trait]
impl Dialog for WaterfallDialog {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> String {
        format!("{}:{}", self.id, self.steps.len())
    }

    async fn begin_dialog(&self, dc: &DialogContext, options: Option<Value>) -> Result<DialogTurnResult> {
        let instance_id = Uuid::new_v4().to_string();
        dc.with_active_state(|state| {
            state.insert(OPTIONS.into(), options.unwrap_or(Value::Null));
            state.insert(VALUES.into(), Value::Object(Map::new()));
            state.insert(INSTANCE_ID.into(), Value::String(instance_id.clone()));
        });
        self.track(
            events::WATERFALL_START,
            self.base_properties(&self.stack_key(dc), Some(&instance_id)),
        );
        self.run_step(dc, 0, DialogReason::BeginCalled, None).await
    }

    /// Only messages advance a waiting waterfall; the message text becomes
    /// the next step's result.
    async fn continue_dialog(&self, dc: &DialogContext) -> Result<DialogTurnResult> {
        let activity = dc.context().activity();
        if !activity.is_type(&ActivityTypes::Message) {
            return Ok(DialogTurnResult::END_OF_TURN);
        }
        let text = activity.text.clone().map(Value::String);
        self.resume_dialog(dc, DialogReason::ContinueCalled, text)
            .await
    }

    async fn resume_dialog(
        &self,
        dc: &DialogContext,
        reason: DialogReason,
        result: Option<Value>,
    ) -> Result<DialogTurnResult> {
        let index = dc
            .with_active_state(|state| state.get(STEP_INDEX).and_then(Value::as_u64))
            .flatten()
            .and_then(|index| usize::try_from(index).ok())
            .unwrap_or(0);
        self.run_step(dc, index + 1, reason, result).await
    }

    async fn end_dialog(&self, _ctx: &TurnContext, instance: &DialogInstance, reason: DialogReason) -> Result<()> {
        let instance_id = instance.state.get(INSTANCE_ID).and_then(Value::as_str);
        match reason {
            DialogReason::CancelCalled => {
                let index = instance
                    .state
                    .get(STEP_INDEX)
                    .and_then(Value::as_u64)
                    .and_then(|index| usize::try_from(index).ok())
                    .unwrap_or(0);
                let mut props = self.base_properties(&instance.id, instance_id);
                props.insert(properties::STEP_NAME.into(), self.step_name(index));
                self.track(events::WATERFALL_CANCEL, props);
            }
            DialogReason::EndCalled => {
                self.track(
                    events::WATERFALL_COMPLETE,
                    self.base_properties(&instance.id, instance_id),
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn telemetry_client(&self) -> SharedTelemetryClient {
        self.telemetry.get()
    }

    fn set_telemetry_client(&self, client: SharedTelemetryClient) {
        self.telemetry.set(client);
    }
}

/// What a waterfall step sees. Derefs to the [`DialogContext`] the
/// waterfall runs in, so steps can start prompts and child dialogs.
pub struct WaterfallStepContext {
    dc: DialogContext,
    waterfall: WaterfallDialog,
    index: usize,
    position: usize,
    options: Option<Value>,
    reason: DialogReason,
    result: Option<Value>,
    values: Map<String, Value>,
    next_called: bool,
}

impl WaterfallStepContext {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn options(&self) -> Option<&Value> {
        self.options.as_ref()
    }

    pub fn options_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.options
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn reason(&self) -> DialogReason {
        self.reason
    }

    /// Result of the previous step or of the child dialog that just ended.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn result_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.result
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Values persisted across the steps of this waterfall instance.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
        let values = Value::Object(self.values.clone());
        self.dc.with_instance_from_bottom(self.position, |instance| {
            instance.state.insert(VALUES.into(), values);
        });
    }

    /// Skips to the next step with `result`. Callable once per step.
    pub async fn next(&mut self, result: Option<Value>) -> Result<DialogTurnResult> {
        self.advance()?;
        self.waterfall
            .resume_dialog(&self.dc, DialogReason::NextCalled, result)
            .await
    }

    /// Runs the first step again on this instance. Unlike
    /// [`DialogContext::replace_dialog`], state and values are kept.
    pub async fn restart(&mut self) -> Result<DialogTurnResult> {
        self.advance()?;
        self.waterfall
            .run_step(&self.dc, 0, DialogReason::BeginCalled, None)
            .await
    }

    fn advance(&mut self) -> Result<(), DialogError> {
        if self.next_called {
            return Err(DialogError::StepAlreadyAdvanced {
                dialog: self.waterfall.id.clone(),
                index: self.index,
            });
        }
        self.next_called = true;
        Ok(())
    }
}

impl Deref for WaterfallStepContext {
    type Target = DialogContext;

    fn deref(&self) -> &DialogContext {
        &self.dc
    }
}
