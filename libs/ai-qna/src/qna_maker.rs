use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bot_builder::TurnContext;
use bot_builder::telemetry::{
    SharedTelemetryClient, TelemetryMetrics, TelemetryProperties, null_telemetry_client,
};
use bot_connector::{HttpTransport, JsonRequest, ReqwestTransport};
use bot_schema::ActivityTypes;
use metrics::counter;
use serde_json::{Value, json};
use tracing::debug;

use crate::active_learning;
use crate::error::QnaError;
use crate::models::{FeedbackRecords, QnAMakerEndpoint, QnAMakerTraceInfo, QueryResult, QueryResults};
use crate::options::QnAMakerOptions;

pub const QNA_MAKER_NAME: &str = "QnAMaker";
pub const QNA_MAKER_TRACE_TYPE: &str = "https://www.qnamaker.ai/schemas/trace";
pub const QNA_MAKER_TRACE_LABEL: &str = "QnAMaker Trace";

const PERCENTAGE_DIVISOR: f64 = 100.0;

/// Names used in the `QnaMessage` telemetry event.
pub mod telemetry {
    pub const QNA_MSG_EVENT: &str = "QnaMessage";
    pub const KNOWLEDGE_BASE_ID: &str = "knowledgeBaseId";
    pub const ANSWER: &str = "answer";
    pub const ARTICLE_FOUND: &str = "articleFound";
    pub const MATCHED_QUESTION: &str = "matchedQuestion";
    pub const QUESTION: &str = "question";
    pub const QUESTION_ID: &str = "questionId";
    pub const SCORE: &str = "score";
    pub const USERNAME: &str = "username";
}

/// Client for a QnA Maker knowledge base.
pub struct QnAMaker {
    endpoint: QnAMakerEndpoint,
    options: QnAMakerOptions,
    transport: Arc<dyn HttpTransport>,
    telemetry: SharedTelemetryClient,
    log_personal_information: bool,
}

impl QnAMaker {
    pub fn new(endpoint: QnAMakerEndpoint, options: Option<QnAMakerOptions>) -> Result<Self, QnaError> {
        endpoint.validate()?;
        let options = options.unwrap_or_default().validated()?;
        Ok(Self {
            endpoint,
            options,
            transport: Arc::new(ReqwestTransport::new(reqwest::Client::new(), "qna")),
            telemetry: null_telemetry_client(),
            log_personal_information: false,
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Question text and user names are only logged when
    /// `log_personal_information` is set.
    pub fn with_telemetry_client(mut self, client: SharedTelemetryClient, log_personal_information: bool) -> Self {
        self.telemetry = client;
        self.log_personal_information = log_personal_information;
        self
    }

    pub fn endpoint(&self) -> &QnAMakerEndpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &QnAMakerOptions {
        &self.options
    }

    pub fn telemetry_client(&self) -> &SharedTelemetryClient {
        &self.telemetry
    }

    pub fn log_personal_information(&self) -> bool {
        self.log_personal_information
    }

    /// Answers to the current message, best first.
    pub async fn get_answers(
        &self,
        ctx: &TurnContext,
        options: Option<&QnAMakerOptions>,
        telemetry_properties: Option<TelemetryProperties>,
        telemetry_metrics: Option<TelemetryMetrics>,
    ) -> Result<Vec<QueryResult>> {
        Ok(self
            .get_answers_raw(ctx, options, telemetry_properties, telemetry_metrics)
            .await?
            .answers)
    }

    pub async fn get_answers_raw(
        &self,
        ctx: &TurnContext,
        options: Option<&QnAMakerOptions>,
        telemetry_properties: Option<TelemetryProperties>,
        telemetry_metrics: Option<TelemetryMetrics>,
    ) -> Result<QueryResults> {
        let activity = ctx.activity();
        if !activity.is_type(&ActivityTypes::Message) {
            return Err(QnaError::NotAMessage.into());
        }
        if activity.text().trim().is_empty() {
            return Err(QnaError::EmptyText.into());
        }

        let options = self.options.hydrate(options).validated()?;
        let results = self.query_service(activity.text(), &options).await?;

        let trace = QnAMakerTraceInfo {
            message: activity.clone(),
            query_results: results.answers.clone(),
            knowledge_base_id: self.endpoint.knowledge_base_id.clone(),
            score_threshold: options.score_threshold,
            top: options.top,
            strict_filters: options.strict_filters.clone(),
            context: options.context.clone(),
            qna_id: options.qna_id,
            is_test: options.is_test,
            ranker_type: options.ranker_type.clone(),
        };
        let trace = serde_json::to_value(trace).map_err(QnaError::from)?;
        ctx.trace_activity(
            QNA_MAKER_NAME,
            Some(trace),
            Some(QNA_MAKER_TRACE_TYPE),
            Some(QNA_MAKER_TRACE_LABEL),
        )
        .await?;

        let (properties, metrics) =
            self.fill_qna_event(&results.answers, ctx, telemetry_properties, telemetry_metrics);
        self.telemetry
            .track_event(telemetry::QNA_MSG_EVENT, &properties, &metrics);
        Ok(results)
    }

    async fn query_service(&self, question: &str, options: &QnAMakerOptions) -> Result<QueryResults, QnaError> {
        let body = json!({
            "question": question,
            "top": options.top,
            "strictFilters": options.strict_filters,
            "scoreThreshold": options.score_threshold,
            "context": options.context,
            "qnaId": options.qna_id,
            "isTest": options.is_test,
            "rankerType": options.ranker_type,
            "StrictFiltersCompoundOperationType": options.strict_filters_join_operator,
        });
        let request = self
            .request("generateanswer", body)
            .with_timeout(Duration::from_millis(options.timeout as u64));
        let response = self.transport.post_json(request).await.inspect_err(|_| {
            counter!("bot_qna_queries_total", "outcome" => "error").increment(1);
        })?;

        let mut results: QueryResults = serde_json::from_value(response)?;
        for answer in &mut results.answers {
            answer.score /= PERCENTAGE_DIVISOR;
        }
        results
            .answers
            .retain(|answer| answer.score > options.score_threshold);

        let outcome = if results.answers.is_empty() { "no_match" } else { "match" };
        counter!("bot_qna_queries_total", "outcome" => outcome).increment(1);
        debug!(
            knowledge_base_id = %self.endpoint.knowledge_base_id,
            answers = results.answers.len(),
            "qna query"
        );
        Ok(results)
    }

    fn request(&self, operation: &str, body: Value) -> JsonRequest {
        let key = &self.endpoint.endpoint_key;
        JsonRequest::post(self.endpoint.knowledge_base_url(operation), body)
            .with_header("Authorization", format!("EndpointKey {key}"))
            .with_header("Ocp-Apim-Subscription-Key", key.clone())
    }

    /// Answers close enough to the best one to offer as suggestions.
    pub fn get_low_score_variation(&self, results: &[QueryResult]) -> Vec<QueryResult> {
        active_learning::get_low_score_variation(results)
    }

    /// Sends active learning feedback to the knowledge base.
    pub async fn call_train(&self, feedback: &FeedbackRecords) -> Result<(), QnaError> {
        let body = serde_json::to_value(feedback)?;
        self.transport.post_json(self.request("train", body)).await?;
        debug!(records = feedback.records.len(), "qna feedback sent");
        Ok(())
    }

    /// Properties and metrics for the `QnaMessage` event. Caller-supplied
    /// values override the computed ones.
    pub fn fill_qna_event(
        &self,
        results: &[QueryResult],
        ctx: &TurnContext,
        telemetry_properties: Option<TelemetryProperties>,
        telemetry_metrics: Option<TelemetryMetrics>,
    ) -> (TelemetryProperties, TelemetryMetrics) {
        let activity = ctx.activity();
        let mut properties = TelemetryProperties::new();
        let mut metrics = TelemetryMetrics::new();
        properties.insert(
            telemetry::KNOWLEDGE_BASE_ID.into(),
            self.endpoint.knowledge_base_id.clone(),
        );

        if self.log_personal_information {
            let text = activity.text();
            if !text.trim().is_empty() {
                properties.insert(telemetry::QUESTION.into(), text.to_string());
            }
            if let Some(name) = activity
                .from
                .as_ref()
                .and_then(|from| from.name.as_deref())
                .filter(|name| !name.trim().is_empty())
            {
                properties.insert(telemetry::USERNAME.into(), name.to_string());
            }
        }

        match results.first() {
            Some(top) => {
                properties.insert(
                    telemetry::MATCHED_QUESTION.into(),
                    serde_json::to_string(&top.questions).unwrap_or_default(),
                );
                properties.insert(
                    telemetry::QUESTION_ID.into(),
                    top.id.map(|id| id.to_string()).unwrap_or_default(),
                );
                properties.insert(telemetry::ANSWER.into(), top.answer.clone());
                properties.insert(telemetry::ARTICLE_FOUND.into(), "true".into());
                metrics.insert(telemetry::SCORE.into(), top.score);
            }
            None => {
                properties.insert(telemetry::MATCHED_QUESTION.into(), "No Qna Question matched".into());
                properties.insert(telemetry::QUESTION_ID.into(), "No QnA Question Id matched".into());
                properties.insert(telemetry::ANSWER.into(), "No Qna Answer matched".into());
                properties.insert(telemetry::ARTICLE_FOUND.into(), "false".into());
            }
        }

        properties.extend(telemetry_properties.unwrap_or_default());
        metrics.extend(telemetry_metrics.unwrap_or_default());
        (properties, metrics)
    }
}
