use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bot_builder::telemetry::{
    SharedTelemetryClient, TelemetryMetrics, TelemetryProperties, null_telemetry_client,
};
use bot_builder::{Recognizer, RecognizerResult, TurnContext};
use bot_connector::{HttpTransport, JsonRequest, ReqwestTransport};
use metrics::counter;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::application::LuisApplication;
use crate::error::LuisError;
use crate::mapping;
use crate::options::LuisRecognizerOptionsV3;

pub const LUIS_TRACE_NAME: &str = "LuisRecognizer";
pub const LUIS_TRACE_TYPE: &str = "https://www.luis.ai/schemas/trace";
pub const LUIS_TRACE_LABEL: &str = "LuisV3 Trace";

/// Names used in the `LuisResult` telemetry event.
pub mod telemetry {
    pub const LUIS_RESULT: &str = "LuisResult";
    pub const APPLICATION_ID: &str = "applicationId";
    pub const INTENT: &str = "intent";
    pub const INTENT_SCORE: &str = "intentScore";
    pub const INTENT_2: &str = "intent2";
    pub const INTENT_SCORE_2: &str = "intentScore2";
    pub const FROM_ID: &str = "fromId";
    pub const SENTIMENT_LABEL: &str = "sentimentLabel";
    pub const SENTIMENT_SCORE: &str = "sentimentScore";
    pub const ENTITIES: &str = "entities";
    pub const QUESTION: &str = "question";
}

/// Recognizes intents and entities with a LUIS v3 prediction endpoint.
pub struct LuisRecognizer {
    application: LuisApplication,
    options: LuisRecognizerOptionsV3,
    transport: Arc<dyn HttpTransport>,
    telemetry: SharedTelemetryClient,
    log_personal_information: bool,
}

impl LuisRecognizer {
    pub fn new(application: LuisApplication, options: LuisRecognizerOptionsV3) -> Self {
        Self {
            application,
            options,
            transport: Arc::new(ReqwestTransport::new(reqwest::Client::new(), "luis")),
            telemetry: null_telemetry_client(),
            log_personal_information: false,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_telemetry_client(mut self, client: SharedTelemetryClient, log_personal_information: bool) -> Self {
        self.telemetry = client;
        self.log_personal_information = log_personal_information;
        self
    }

    pub fn application(&self) -> &LuisApplication {
        &self.application
    }

    pub fn options(&self) -> &LuisRecognizerOptionsV3 {
        &self.options
    }

    /// Recognizes the current message, optionally with one-off options and
    /// extra telemetry. Caller properties override the computed ones.
    pub async fn recognize_with(
        &self,
        ctx: &TurnContext,
        options: Option<&LuisRecognizerOptionsV3>,
        telemetry_properties: Option<TelemetryProperties>,
        telemetry_metrics: Option<TelemetryMetrics>,
    ) -> Result<RecognizerResult> {
        let options = options.unwrap_or(&self.options);
        let utterance = ctx.activity().text().to_string();

        let mut result = RecognizerResult {
            text: utterance.clone(),
            ..Default::default()
        };
        let mut response = Value::Null;
        if !utterance.is_empty() {
            response = self.predict(&utterance, options).await?;
            let prediction = response.get("prediction").ok_or(LuisError::MissingPrediction)?;

            result.altered_text = prediction
                .get("alteredQuery")
                .and_then(Value::as_str)
                .map(str::to_string);
            result.intents = mapping::intents(prediction);
            result.entities = mapping::entities(prediction);
            if let Some(sentiment) = mapping::sentiment(prediction) {
                result.properties.insert("sentiment".into(), sentiment);
            }
            if options.include_api_results {
                result.properties.insert("luisResult".into(), response.clone());
            }
            if options.include_instance_data {
                result
                    .entities
                    .entry("$instance")
                    .or_insert_with(|| json!({}));
            }
        }

        self.send_trace(ctx, &result, response, options).await?;
        self.on_recognizer_result(&result, ctx, telemetry_properties, telemetry_metrics);
        Ok(result)
    }

    async fn predict(&self, utterance: &str, options: &LuisRecognizerOptionsV3) -> Result<Value, LuisError> {
        let endpoint = format!(
            "{}{}",
            self.application.endpoint,
            options.prediction_path(&self.application.application_id)
        );
        let mut url = Url::parse(&endpoint).map_err(|_| LuisError::InvalidEndpoint(endpoint.clone()))?;
        url.query_pairs_mut().extend_pairs(options.query_params());

        let request = JsonRequest::post(url.as_str(), options.request_body(utterance)?)
            .with_header("Ocp-Apim-Subscription-Key", self.application.endpoint_key.clone())
            .with_timeout(options.timeout);
        let response = self.transport.post_json(request).await.inspect_err(|_| {
            counter!("bot_luis_predictions_total", "outcome" => "error").increment(1);
        })?;
        counter!("bot_luis_predictions_total", "outcome" => "ok").increment(1);
        debug!(application_id = %self.application.application_id, "luis prediction");
        Ok(response)
    }

    async fn send_trace(
        &self,
        ctx: &TurnContext,
        result: &RecognizerResult,
        response: Value,
        options: &LuisRecognizerOptionsV3,
    ) -> Result<()> {
        let trace = json!({
            "recognizerResult": serde_json::to_string_pretty(result)?,
            "luisResult": response,
            "luisModel": { "ModelId": self.application.application_id },
            "luisOptions": options.trace_value(),
        });
        ctx.trace_activity(
            LUIS_TRACE_NAME,
            Some(trace),
            Some(LUIS_TRACE_TYPE),
            Some(LUIS_TRACE_LABEL),
        )
        .await?;
        Ok(())
    }

    /// Tracks the `LuisResult` event for a finished recognition.
    pub fn on_recognizer_result(
        &self,
        result: &RecognizerResult,
        ctx: &TurnContext,
        telemetry_properties: Option<TelemetryProperties>,
        telemetry_metrics: Option<TelemetryMetrics>,
    ) {
        let properties = self.fill_luis_event_properties(result, ctx, telemetry_properties);
        self.telemetry.track_event(
            telemetry::LUIS_RESULT,
            &properties,
            &telemetry_metrics.unwrap_or_default(),
        );
    }

    fn fill_luis_event_properties(
        &self,
        result: &RecognizerResult,
        ctx: &TurnContext,
        telemetry_properties: Option<TelemetryProperties>,
    ) -> TelemetryProperties {
        let mut ranked: Vec<(&String, f64)> = result
            .intents
            .iter()
            .map(|(name, intent)| (name, intent.score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let intent_at = |index: usize| ranked.get(index).map(|(name, _)| name.to_string()).unwrap_or_default();
        let score_at = |index: usize| {
            ranked
                .get(index)
                .map(|(_, score)| score.to_string())
                .unwrap_or_else(|| "0.00".to_string())
        };

        let mut properties = TelemetryProperties::from([
            (telemetry::APPLICATION_ID.to_string(), self.application.application_id.clone()),
            (telemetry::INTENT.to_string(), intent_at(0)),
            (telemetry::INTENT_SCORE.to_string(), score_at(0)),
            (telemetry::INTENT_2.to_string(), intent_at(1)),
            (telemetry::INTENT_SCORE_2.to_string(), score_at(1)),
            (
                telemetry::FROM_ID.to_string(),
                ctx.activity()
                    .from
                    .as_ref()
                    .and_then(|from| from.id.clone())
                    .unwrap_or_default(),
            ),
            (
                telemetry::ENTITIES.to_string(),
                Value::Object(result.entities.clone()).to_string(),
            ),
        ]);

        if let Some(sentiment) = result.properties.get("sentiment") {
            if let Some(label) = sentiment.get("label").and_then(Value::as_str) {
                properties.insert(telemetry::SENTIMENT_LABEL.into(), label.to_string());
            }
            if let Some(score) = sentiment.get("score").filter(|score| !score.is_null()) {
                properties.insert(telemetry::SENTIMENT_SCORE.into(), score.to_string());
            }
        }

        let text = ctx.activity().text();
        if self.log_personal_information && !text.trim().is_empty() {
            properties.insert(telemetry::QUESTION.into(), text.to_string());
        }

        properties.extend(telemetry_properties.unwrap_or_default());
        properties
    }
}

#[async_trait]
impl Recognizer for LuisRecognizer {
    async fn recognize(&self, ctx: &TurnContext) -> Result<RecognizerResult> {
        self.recognize_with(ctx, None, None, None).await
    }
}

/// The best intent scoring at least `min_score`, or `default_intent`.
pub fn top_intent(result: &RecognizerResult, default_intent: &str, min_score: f64) -> String {
    let default_intent = if default_intent.is_empty() { "None" } else { default_intent };
    result
        .intents
        .iter()
        .filter(|(_, intent)| intent.score >= min_score)
        .fold(None::<(&String, f64)>, |best, (name, intent)| match best {
            Some((_, score)) if score >= intent.score => best,
            _ => Some((name, intent.score)),
        })
        .map(|(name, _)| name.clone())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| default_intent.to_string())
}
