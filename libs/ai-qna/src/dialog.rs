//! A dialog that answers from a knowledge base.
//!
//! Each question is sent to QnA Maker. Close-scoring answers are offered
//! as "did you mean" suggestions when active learning is on, and the
//! user's pick is sent back as training feedback. Answers with follow-up
//! prompts keep the dialog running so the next question is asked in the
//! context of the previous answer.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::TurnContext;
use bot_builder::telemetry::SharedTelemetryClient;
use bot_dialogs::dialog::events;
use bot_dialogs::{
    Dialog, DialogContext, DialogEvent, DialogInstance, DialogReason, DialogTurnResult,
    WaterfallDialog, WaterfallStepContext,
};
use bot_schema::{Activity, ActivityTypes};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::active_learning::MAXIMUM_SCORE_FOR_LOW_SCORE_VARIATION;
use crate::cards::QnACardBuilder;
use crate::error::QnaError;
use crate::models::{FeedbackRecord, FeedbackRecords, Metadata, QnARequestContext, QueryResult, QueryResults};
use crate::options::QnAMakerOptions;
use crate::qna_maker::QnAMaker;

pub const DEFAULT_THRESHOLD: f64 = 0.3;
pub const DEFAULT_TOP_N: u32 = 3;
pub const DEFAULT_NO_ANSWER: &str = "No QnAMaker answers found.";
pub const DEFAULT_CARD_TITLE: &str = "Did you mean:";
pub const DEFAULT_CARD_NO_MATCH_TEXT: &str = "None of the above.";
pub const DEFAULT_CARD_NO_MATCH_RESPONSE: &str = "Thanks for the feedback.";

const OPTIONS: &str = "options";
const QNA_CONTEXT_DATA: &str = "qnaContextData";
const PREVIOUS_QNA_ID: &str = "prevQnAId";
const SUGGESTED_QUESTIONS: &str = "suggestedQuestions";

const CURRENT_QUERY: &str = "currentQuery";
const QNA_DATA: &str = "qnaData";

/// What the dialog says besides the answers themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnADialogResponseOptions {
    pub active_learning_card_title: String,
    pub card_no_match_text: String,
    pub no_answer: Activity,
    pub card_no_match_response: Activity,
}

impl Default for QnADialogResponseOptions {
    fn default() -> Self {
        Self {
            active_learning_card_title: DEFAULT_CARD_TITLE.into(),
            card_no_match_text: DEFAULT_CARD_NO_MATCH_TEXT.into(),
            no_answer: Activity::message(DEFAULT_NO_ANSWER),
            card_no_match_response: Activity::message(DEFAULT_CARD_NO_MATCH_RESPONSE),
        }
    }
}

/// Persisted with the dialog instance when it begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnAMakerDialogOptions {
    pub qna_maker_options: QnAMakerOptions,
    pub response_options: QnADialogResponseOptions,
}

/// Answers questions from a knowledge base until an answer without
/// follow-up prompts has been shown.
///
/// Add it to a [`bot_dialogs::DialogSet`] or hand it to a
/// [`bot_dialogs::DialogManager`] like any other dialog.
pub struct QnAMakerDialog {
    waterfall: WaterfallDialog,
    threshold: f64,
    top: u32,
    strict_filters: Vec<Metadata>,
    ranker_type: Option<String>,
    is_test: bool,
    responses: QnADialogResponseOptions,
    qna: Arc<QnAMaker>,
}

impl QnAMakerDialog {
    pub fn new(id: impl Into<String>, qna: Arc<QnAMaker>) -> Self {
        let steps = Arc::new(Steps { qna: qna.clone() });
        let (generate, train, prompts) = (steps.clone(), steps.clone(), steps);
        let waterfall = WaterfallDialog::new(id)
            .add_step(move |step| {
                let steps = generate.clone();
                Box::pin(async move { steps.call_generate_answer(step).await })
            })
            .add_step(move |step| {
                let steps = train.clone();
                Box::pin(async move { steps.call_train(step).await })
            })
            .add_step(move |step| {
                let steps = prompts.clone();
                Box::pin(async move { steps.check_for_multi_turn_prompt(step).await })
            })
            .add_step(|step| Box::pin(display_qna_result(step)));

        Self {
            waterfall,
            threshold: DEFAULT_THRESHOLD,
            top: DEFAULT_TOP_N,
            strict_filters: Vec::new(),
            ranker_type: None,
            is_test: false,
            responses: QnADialogResponseOptions::default(),
            qna,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_top(mut self, top: u32) -> Self {
        self.top = top;
        self
    }

    pub fn with_strict_filters(mut self, filters: Vec<Metadata>) -> Self {
        self.strict_filters = filters;
        self
    }

    pub fn with_ranker_type(mut self, ranker_type: impl Into<String>) -> Self {
        self.ranker_type = Some(ranker_type.into());
        self
    }

    pub fn with_is_test(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    pub fn with_no_answer(mut self, no_answer: Activity) -> Self {
        self.responses.no_answer = no_answer;
        self
    }

    /// Title and "none of these" button of the suggestions card, and the
    /// reply sent when the user picks that button.
    pub fn with_active_learning_card(
        mut self,
        title: impl Into<String>,
        no_match_text: impl Into<String>,
        no_match_response: Activity,
    ) -> Self {
        self.responses.active_learning_card_title = title.into();
        self.responses.card_no_match_text = no_match_text.into();
        self.responses.card_no_match_response = no_match_response;
        self
    }

    fn dialog_options(&self) -> QnAMakerDialogOptions {
        let mut qna_maker_options = QnAMakerOptions {
            score_threshold: self.threshold,
            top: self.top,
            strict_filters: self.strict_filters.clone(),
            is_test: self.is_test,
            context: Some(QnARequestContext::default()),
            qna_id: Some(0),
            ..QnAMakerOptions::default()
        };
        if let Some(ranker_type) = &self.ranker_type {
            qna_maker_options.ranker_type = ranker_type.clone();
        }
        QnAMakerDialogOptions {
            qna_maker_options,
            response_options: self.responses.clone(),
        }
    }
}

#[async_trait]
impl Dialog for QnAMakerDialog {
    fn id(&self) -> &str {
        self.waterfall.id()
    }

    fn version(&self) -> String {
        self.waterfall.version()
    }

    /// Only a message starts a query; any other activity leaves the dialog
    /// waiting for one.
    async fn begin_dialog(&self, dc: &DialogContext, _options: Option<Value>) -> Result<DialogTurnResult> {
        if !dc.context().activity().is_type(&ActivityTypes::Message) {
            return Ok(DialogTurnResult::END_OF_TURN);
        }
        let options = serde_json::to_value(self.dialog_options()).map_err(QnaError::from)?;
        self.waterfall.begin_dialog(dc, Some(options)).await
    }

    async fn continue_dialog(&self, dc: &DialogContext) -> Result<DialogTurnResult> {
        if read_options(dc)?.is_none() {
            return self.begin_dialog(dc, None).await;
        }
        self.waterfall.continue_dialog(dc).await
    }

    async fn resume_dialog(
        &self,
        dc: &DialogContext,
        reason: DialogReason,
        result: Option<Value>,
    ) -> Result<DialogTurnResult> {
        self.waterfall.resume_dialog(dc, reason, result).await
    }

    async fn end_dialog(&self, ctx: &TurnContext, instance: &DialogInstance, reason: DialogReason) -> Result<()> {
        self.waterfall.end_dialog(ctx, instance, reason).await
    }

    /// Claims an incoming message when it answers one of our cards or the
    /// knowledge base has an answer for it, so parents don't interrupt.
    /// The answers are kept for the first step of this turn.
    async fn on_pre_bubble_event(&self, dc: &DialogContext, event: &DialogEvent) -> Result<bool> {
        let activity = dc.context().activity();
        if event.name != events::ACTIVITY_RECEIVED || !activity.is_type(&ActivityTypes::Message) {
            return Ok(false);
        }
        let Some(mut options) = read_options(dc)? else {
            return Ok(false);
        };
        let reply = activity.text().trim();
        if reply.is_empty() {
            return Ok(false);
        }
        if reply.eq_ignore_ascii_case(&options.response_options.card_no_match_text) {
            return Ok(true);
        }
        let suggested = dc
            .with_active_state(|state| state.get(SUGGESTED_QUESTIONS).cloned())
            .flatten()
            .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
            .unwrap_or_default();
        if suggested.iter().any(|question| question.eq_ignore_ascii_case(reply)) {
            return Ok(true);
        }

        reset_options(dc, &mut options);
        let results = self
            .qna
            .get_answers_raw(dc.context(), Some(&options.qna_maker_options), None, None)
            .await?;
        let handled = !results.answers.is_empty();
        dc.context().turn_state().insert(cached_results_key(dc), results);
        Ok(handled)
    }

    fn telemetry_client(&self) -> SharedTelemetryClient {
        self.waterfall.telemetry_client()
    }

    fn set_telemetry_client(&self, client: SharedTelemetryClient) {
        self.waterfall.set_telemetry_client(client);
    }
}

struct Steps {
    qna: Arc<QnAMaker>,
}

impl Steps {
    async fn call_generate_answer(&self, step: &mut WaterfallStepContext) -> Result<DialogTurnResult> {
        let mut options = required_options(step)?;
        reset_options(step, &mut options);
        step.with_active_state(|state| state.remove(SUGGESTED_QUESTIONS));

        let query = step.context().activity().text().to_string();
        step.set_value(CURRENT_QUERY, Value::String(query));

        let key = cached_results_key(step);
        let cached = step.context().turn_state().get::<QueryResults>(&key);
        let mut response = match cached {
            Some(results) => {
                step.context().turn_state().remove(&key);
                results
            }
            None => {
                self.qna
                    .get_answers_raw(step.context(), Some(&options.qna_maker_options), None, None)
                    .await?
            }
        };

        step.with_active_state(|state| state.insert(PREVIOUS_QNA_ID.into(), json!(-1)));
        step.set_value(QNA_DATA, serde_json::to_value(&response.answers).map_err(QnaError::from)?);

        let close_call = response
            .answers
            .first()
            .is_some_and(|top| top.score <= MAXIMUM_SCORE_FOR_LOW_SCORE_VARIATION / 100.0);
        if close_call {
            response.answers = self.qna.get_low_score_variation(&response.answers);
            if response.answers.len() > 1 && response.active_learning_enabled {
                let suggestions: Vec<String> = response
                    .answers
                    .iter()
                    .filter_map(|answer| answer.questions.first().cloned())
                    .collect();
                let responses = &options.response_options;
                let card = QnACardBuilder::get_suggestions_card(
                    &suggestions,
                    &responses.active_learning_card_title,
                    &responses.card_no_match_text,
                );
                step.context().send_activity(card).await?;
                debug!(suggestions = suggestions.len(), "offered qna suggestions");

                let options = serde_json::to_value(&options).map_err(QnaError::from)?;
                step.with_active_state(|state| {
                    state.insert(OPTIONS.into(), options);
                    state.insert(SUGGESTED_QUESTIONS.into(), json!(suggestions));
                });
                return Ok(DialogTurnResult::END_OF_TURN);
            }
        }

        let result: Vec<QueryResult> = response.answers.into_iter().take(1).collect();
        let result = serde_json::to_value(result).map_err(QnaError::from)?;
        step.set_value(QNA_DATA, result.clone());
        store_options(step, &options)?;
        step.next(Some(result)).await
    }

    /// Handles the reply to a suggestions card. Picking a suggestion sends
    /// feedback and continues with that answer; anything else but the
    /// "none of these" button is taken as a new question.
    async fn call_train(&self, step: &mut WaterfallStepContext) -> Result<DialogTurnResult> {
        let options = required_options(step)?;
        let offered: Vec<QueryResult> = step
            .values()
            .get(QNA_DATA)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        if offered.len() <= 1 {
            let result = step.result().cloned();
            return step.next(result).await;
        }

        let activity = step.context().activity();
        let reply = activity.text().to_string();
        let picked = offered
            .into_iter()
            .find(|answer| answer.questions.first().is_some_and(|question| *question == reply));
        if let Some(picked) = picked {
            let feedback = FeedbackRecords {
                records: vec![FeedbackRecord {
                    user_id: activity.id.clone().unwrap_or_default(),
                    user_question: step
                        .values()
                        .get(CURRENT_QUERY)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    qna_id: picked.id.unwrap_or_default(),
                }],
            };
            if let Err(err) = self.qna.call_train(&feedback).await {
                warn!(error = %err, "qna feedback was not accepted");
            }
            let result = serde_json::to_value(vec![picked]).map_err(QnaError::from)?;
            step.set_value(QNA_DATA, result.clone());
            return step.next(Some(result)).await;
        }

        if reply.eq_ignore_ascii_case(&options.response_options.card_no_match_text) {
            step.context()
                .send_activity(options.response_options.card_no_match_response.clone())
                .await?;
            return step.end_dialog(None).await;
        }
        step.restart().await
    }

    /// Shows an answer that has follow-up prompts and remembers which
    /// knowledge base entry each prompt points at.
    async fn check_for_multi_turn_prompt(&self, step: &mut WaterfallStepContext) -> Result<DialogTurnResult> {
        let answers: Vec<QueryResult> = step.result_as().unwrap_or_default();
        let Some(answer) = answers
            .into_iter()
            .next()
            .filter(|answer| answer.context.as_ref().is_some_and(|context| !context.prompts.is_empty()))
        else {
            let result = step.result().cloned();
            return step.next(result).await;
        };

        let prompts: Map<String, Value> = answer
            .context
            .iter()
            .flat_map(|context| &context.prompts)
            .map(|prompt| (prompt.display_text.clone(), json!(prompt.qna_id)))
            .collect();
        let previous = answer.id.unwrap_or_default();
        step.with_active_state(|state| {
            state.insert(QNA_CONTEXT_DATA.into(), Value::Object(prompts));
            state.insert(PREVIOUS_QNA_ID.into(), json!(previous));
        });

        step.context()
            .send_activity(QnACardBuilder::get_qna_prompts_card(&answer))
            .await?;
        Ok(DialogTurnResult::END_OF_TURN)
    }
}

async fn display_qna_result(step: &mut WaterfallStepContext) -> Result<DialogTurnResult> {
    let options = required_options(step)?;
    let responses = &options.response_options;
    let reply = step.context().activity().text().to_string();
    if reply.eq_ignore_ascii_case(&responses.card_no_match_text) {
        step.context()
            .send_activity(responses.card_no_match_response.clone())
            .await?;
        return step.end_dialog(None).await;
    }

    let previous = step
        .with_active_state(|state| state.get(PREVIOUS_QNA_ID).and_then(Value::as_i64))
        .flatten()
        .unwrap_or_default();
    if previous > 0 {
        return step.restart().await;
    }

    let answers: Vec<QueryResult> = step.result_as().unwrap_or_default();
    match answers.first() {
        Some(answer) => {
            step.context().send_text(&answer.answer, None, None).await?;
        }
        None => {
            step.context().send_activity(responses.no_answer.clone()).await?;
        }
    }
    let result = step.result().cloned();
    step.end_dialog(result).await
}

fn read_options(dc: &DialogContext) -> Result<Option<QnAMakerDialogOptions>> {
    let Some(value) = dc
        .with_active_state(|state| state.get(OPTIONS).cloned())
        .flatten()
        .filter(|value| !value.is_null())
    else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(value).map_err(QnaError::from)?))
}

fn required_options(dc: &DialogContext) -> Result<QnAMakerDialogOptions> {
    let id = dc.active_dialog().map(|instance| instance.id).unwrap_or_default();
    read_options(dc)?.ok_or_else(|| QnaError::MissingDialogOptions(id).into())
}

fn store_options(dc: &DialogContext, options: &QnAMakerDialogOptions) -> Result<()> {
    let value = serde_json::to_value(options).map_err(QnaError::from)?;
    dc.with_active_state(|state| state.insert(OPTIONS.into(), value));
    Ok(())
}

/// Clears the multi-turn context unless the previous answer offered
/// prompts, in which case a prompt's text selects its entry directly.
fn reset_options(dc: &DialogContext, options: &mut QnAMakerDialogOptions) {
    let qna_options = &mut options.qna_maker_options;
    qna_options.qna_id = Some(0);
    qna_options.context = Some(QnARequestContext::default());

    let (previous, prompts) = dc
        .with_active_state(|state| {
            (
                state.get(PREVIOUS_QNA_ID).and_then(Value::as_i64).unwrap_or_default(),
                state
                    .get(QNA_CONTEXT_DATA)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            )
        })
        .unwrap_or_default();
    if previous > 0 {
        qna_options.context = Some(QnARequestContext {
            previous_qna_id: previous,
            previous_user_query: None,
        });
        let text = dc.context().activity().text();
        qna_options.qna_id = Some(prompts.get(text).and_then(Value::as_i64).unwrap_or_default());
    }
}

fn cached_results_key(dc: &DialogContext) -> String {
    let id = dc.active_dialog().map(|instance| instance.id).unwrap_or_default();
    format!("qnaresult{id}")
}
