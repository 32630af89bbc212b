use anyhow::Result;
use async_trait::async_trait;
use bot_builder::telemetry::TelemetryProperties;
use bot_builder::{IntentScore, Recognizer, RecognizerResult, TurnContext};
use serde_json::{Value, json};

use crate::models::{JoinOperator, Metadata, QnARequestContext, ranker_types};
use crate::options::QnAMakerOptions;
use crate::qna_maker::QnAMaker;

pub const QNA_MATCH_INTENT: &str = "QnAMatch";
const INTENT_PREFIX: &str = "intent=";
const RESULT_EVENT: &str = "QnAMakerRecognizerResult";

/// Exposes a knowledge base as a [`Recognizer`].
///
/// The best answer becomes the `QnAMatch` intent, or a named intent when
/// the answer reads `intent=<name>`, and its text lands in the `answer`
/// entity. No answer yields `None` with a score of 1.
pub struct QnAMakerRecognizer {
    qna: QnAMaker,
    top: u32,
    threshold: f64,
    is_test: bool,
    ranker_type: String,
    strict_filters_join_operator: Option<JoinOperator>,
    dialog_name: Option<String>,
    metadata: Vec<Metadata>,
    context: Option<QnARequestContext>,
    qna_id: Option<i64>,
}

impl QnAMakerRecognizer {
    pub fn new(qna: QnAMaker) -> Self {
        Self {
            qna,
            top: 3,
            threshold: 0.3,
            is_test: false,
            ranker_type: ranker_types::DEFAULT.to_string(),
            strict_filters_join_operator: None,
            dialog_name: None,
            metadata: Vec::new(),
            context: None,
            qna_id: None,
        }
    }

    pub fn with_top(mut self, top: u32) -> Self {
        self.top = top;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_ranker_type(mut self, ranker_type: impl Into<String>) -> Self {
        self.ranker_type = ranker_type.into();
        self
    }

    pub fn with_test_index(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    pub fn with_join_operator(mut self, operator: JoinOperator) -> Self {
        self.strict_filters_join_operator = Some(operator);
        self
    }

    /// Restricts answers to entries tagged `dialogName=<name>`.
    pub fn with_dialog_name(mut self, name: impl Into<String>) -> Self {
        self.dialog_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_context(mut self, context: QnARequestContext, qna_id: Option<i64>) -> Self {
        self.context = Some(context);
        self.qna_id = qna_id;
        self
    }

    fn query_options(&self) -> QnAMakerOptions {
        let filters = self
            .dialog_name
            .iter()
            .map(|name| Metadata::new("dialogName", name.as_str()))
            .chain(self.metadata.iter().cloned())
            .collect();
        QnAMakerOptions {
            score_threshold: self.threshold,
            top: self.top,
            context: self.context.clone(),
            qna_id: self.qna_id,
            strict_filters: filters,
            is_test: self.is_test,
            ranker_type: self.ranker_type.clone(),
            strict_filters_join_operator: self.strict_filters_join_operator,
            ..Default::default()
        }
    }

    fn track_result(&self, result: &RecognizerResult) {
        let mut properties = TelemetryProperties::new();
        if let Some(top) = result.get_top_scoring_intent() {
            properties.insert("TopIntent".into(), top.intent);
            properties.insert("TopIntentScore".into(), top.score.to_string());
        }
        properties.insert(
            "Intents".into(),
            serde_json::to_string(&result.intents).unwrap_or_default(),
        );
        properties.insert(
            "Entities".into(),
            serde_json::to_string(&result.entities).unwrap_or_default(),
        );
        if self.qna.log_personal_information() {
            properties.insert("Text".into(), result.text.clone());
        }
        self.qna
            .telemetry_client()
            .track_event(RESULT_EVENT, &properties, &Default::default());
    }
}

#[async_trait]
impl Recognizer for QnAMakerRecognizer {
    async fn recognize(&self, ctx: &TurnContext) -> Result<RecognizerResult> {
        let text = ctx.activity().text().to_string();
        let mut result = RecognizerResult {
            text: text.clone(),
            ..Default::default()
        };
        if text.is_empty() {
            result.intents.insert("None".into(), IntentScore::default());
            return Ok(result);
        }

        let answers = self
            .qna
            .get_answers(ctx, Some(&self.query_options()), None, None)
            .await?;

        let best = answers
            .iter()
            .fold(None::<&crate::QueryResult>, |best, answer| match best {
                Some(best) if best.score >= answer.score => Some(best),
                _ => Some(answer),
            });
        match best {
            Some(best) => {
                let trimmed = best.answer.trim();
                let intent = match trimmed.get(..INTENT_PREFIX.len()) {
                    Some(prefix) if prefix.eq_ignore_ascii_case(INTENT_PREFIX) => {
                        trimmed[INTENT_PREFIX.len()..].trim().to_string()
                    }
                    _ => QNA_MATCH_INTENT.to_string(),
                };
                result.intents.insert(intent, IntentScore::new(best.score));
                result
                    .entities
                    .insert("answer".into(), json!([best.answer]));
                result.entities.insert(
                    "$instance".into(),
                    json!({
                        "answer": [{ "startIndex": 0, "endIndex": text.chars().count() }]
                    }),
                );
                result
                    .properties
                    .insert("answers".into(), serde_json::to_value(&answers)?);
            }
            None => {
                result.intents.insert("None".into(), IntentScore::new(1.0));
            }
        }

        self.track_result(&result);
        Ok(result)
    }
}

/// The `answer` entity of a result produced by [`QnAMakerRecognizer`].
pub fn recognized_answer(result: &RecognizerResult) -> Option<&str> {
    result
        .entities
        .get("answer")
        .and_then(Value::as_array)
        .and_then(|answers| answers.first())
        .and_then(Value::as_str)
}
