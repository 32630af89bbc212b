use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bot_ai_luis::{
    LUIS_TRACE_LABEL, LuisApplication, LuisRecognizer, LuisRecognizerOptionsV3, telemetry,
    top_intent,
};
use bot_builder::bot::bot_fn;
use bot_builder::telemetry::{BotTelemetryClient, Severity, TelemetryMetrics, TelemetryProperties};
use bot_builder::testkit::{TestAdapter, TestFlow};
use bot_builder::{Recognizer, RecognizerResult};
use bot_connector::{ConnectorError, HttpTransport, JsonRequest};
use bot_schema::ActivityTypes;
use serde_json::{Value, json};

const APP_ID: &str = "b31aeaf3-3511-495b-a07f-571fc873214b";
const KEY: &str = "048ec46dc58e495482b0c447cfdbd291";

struct CannedTransport {
    response: Value,
    requests: Mutex<Vec<JsonRequest>>,
}

impl CannedTransport {
    fn answering(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<JsonRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for CannedTransport {
    async fn post_json(&self, request: JsonRequest) -> Result<Value, ConnectorError> {
        self.requests.lock().unwrap().push(request);
        Ok(self.response.clone())
    }
}

#[derive(Default)]
struct RecordingTelemetry {
    events: Mutex<Vec<(String, TelemetryProperties)>>,
}

impl BotTelemetryClient for RecordingTelemetry {
    fn track_event(&self, name: &str, properties: &TelemetryProperties, _metrics: &TelemetryMetrics) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), properties.clone()));
    }

    fn track_exception(&self, _error: &anyhow::Error, _properties: &TelemetryProperties) {}

    fn track_trace(&self, _message: &str, _severity: Severity, _properties: &TelemetryProperties) {}

    fn track_page_view(&self, _name: &str, _properties: &TelemetryProperties) {}
}

fn prediction() -> Value {
    json!({
        "query": "book a flight to seattle",
        "prediction": {
            "topIntent": "Travel.BookFlight",
            "intents": {
                "Travel.BookFlight": { "score": 0.96 },
                "None": { "score": 0.02 }
            },
            "entities": {
                "geographyV2": [{ "type": "city", "value": "seattle" }],
                "$instance": {
                    "geographyV2": [{
                        "type": "builtin.geographyV2.city",
                        "text": "seattle",
                        "startIndex": 17,
                        "length": 7,
                        "modelTypeId": 2,
                        "modelType": "Prebuilt Entity Extractor"
                    }]
                }
            },
            "sentiment": { "label": "neutral", "score": 0.5 }
        }
    })
}

fn recognizer(transport: Arc<CannedTransport>, options: LuisRecognizerOptionsV3) -> LuisRecognizer {
    let application = LuisApplication::new(APP_ID, KEY, "https://westus.api.cognitive.microsoft.com").unwrap();
    LuisRecognizer::new(application, options).with_transport(transport)
}

/// Runs `recognizer` on one message and reports the result as a reply.
fn recognizing_bot(recognizer: LuisRecognizer, results: Arc<Mutex<Vec<RecognizerResult>>>) -> impl bot_builder::Bot {
    let recognizer = Arc::new(recognizer);
    bot_fn(move |ctx| {
        let recognizer = recognizer.clone();
        let results = results.clone();
        Box::pin(async move {
            let result = recognizer.recognize(ctx).await?;
            ctx.send_text(top_intent(&result, "None", 0.0), None, None).await?;
            results.lock().unwrap().push(result);
            Ok(())
        })
    })
}

#[tokio::test]
async fn posts_the_utterance_and_maps_the_prediction() {
    let transport = CannedTransport::answering(prediction());
    let results = Arc::new(Mutex::new(Vec::new()));
    let bot = recognizing_bot(
        recognizer(transport.clone(), LuisRecognizerOptionsV3::default().with_all_intents(true)),
        results.clone(),
    );

    TestFlow::new(TestAdapter::new(), bot)
        .test("book a flight to seattle", "Travel_BookFlight")
        .start_test()
        .await
        .unwrap();

    let request = &transport.requests()[0];
    assert_eq!(
        request.url,
        format!(
            "https://westus.api.cognitive.microsoft.com/luis/prediction/v3.0/apps/{APP_ID}/slots/production/predict?verbose=true&log=true&show-all-intents=true"
        )
    );
    assert!(
        request
            .headers
            .contains(&("Ocp-Apim-Subscription-Key".to_string(), KEY.to_string()))
    );
    assert_eq!(request.body["query"], "book a flight to seattle");
    assert_eq!(request.body["options"]["preferExternalEntities"], true);

    let result = results.lock().unwrap().remove(0);
    assert_eq!(result.intents["Travel_BookFlight"].score, 0.96);
    assert_eq!(
        result.entities["geographyV2"],
        json!([{ "location": "seattle", "type": "city" }])
    );
    assert_eq!(result.entities["$instance"]["geographyV2"][0]["endIndex"], 24);
    assert!(result.entities["$instance"]["geographyV2"][0].get("modelTypeId").is_none());
    assert_eq!(result.properties["sentiment"], json!({ "label": "neutral", "score": 0.5 }));
    assert!(!result.properties.contains_key("luisResult"));
}

#[tokio::test]
async fn empty_utterances_skip_the_service() {
    let transport = CannedTransport::answering(prediction());
    let results = Arc::new(Mutex::new(Vec::new()));
    let bot = recognizing_bot(
        recognizer(transport.clone(), LuisRecognizerOptionsV3::default()),
        results.clone(),
    );

    TestFlow::new(TestAdapter::new(), bot)
        .test("", "None")
        .start_test()
        .await
        .unwrap();

    assert!(transport.requests().is_empty());
    let result = results.lock().unwrap().remove(0);
    assert!(result.intents.is_empty());
    assert!(result.entities.is_empty());
}

#[tokio::test]
async fn emits_a_trace_with_the_raw_response() {
    let transport = CannedTransport::answering(prediction());
    let results = Arc::new(Mutex::new(Vec::new()));
    let options = LuisRecognizerOptionsV3::default()
        .with_version("0.3")
        .with_api_results(true);
    let bot = recognizing_bot(recognizer(transport.clone(), options), results.clone());

    let adapter = TestAdapter::new().with_trace_activities(true);
    adapter
        .send_text_to_bot("book a flight to seattle", &bot)
        .await
        .unwrap();

    assert!(transport.requests()[0].url.contains("/versions/0.3/predict"));

    let trace = adapter.get_next_reply().unwrap();
    assert!(trace.is_type(&ActivityTypes::Trace));
    assert_eq!(trace.label.as_deref(), Some(LUIS_TRACE_LABEL));
    let value = trace.value.unwrap();
    assert_eq!(value["luisModel"]["ModelId"], APP_ID);
    assert_eq!(value["luisOptions"]["version"], "0.3");
    assert_eq!(value["luisResult"], prediction());
    assert!(value["recognizerResult"].as_str().unwrap().contains("Travel_BookFlight"));

    let reply = adapter.get_next_reply().unwrap();
    assert_eq!(reply.text(), "Travel_BookFlight");
    let result = results.lock().unwrap().remove(0);
    assert_eq!(result.properties["luisResult"], prediction());
}

#[tokio::test]
async fn telemetry_ranks_intents_and_respects_overrides() {
    let transport = CannedTransport::answering(prediction());
    let telemetry_client = Arc::new(RecordingTelemetry::default());
    let recognizer = Arc::new(
        recognizer(transport, LuisRecognizerOptionsV3::default())
            .with_telemetry_client(telemetry_client.clone(), true),
    );

    let bot = bot_fn(move |ctx| {
        let recognizer = recognizer.clone();
        Box::pin(async move {
            let overrides = TelemetryProperties::from([
                (telemetry::INTENT_2.to_string(), "Override".to_string()),
                ("extra".to_string(), "value".to_string()),
            ]);
            recognizer
                .recognize_with(ctx, None, Some(overrides), None)
                .await?;
            Ok(())
        })
    });
    TestAdapter::new()
        .send_text_to_bot("book a flight to seattle", &bot)
        .await
        .unwrap();

    let events = telemetry_client.events.lock().unwrap();
    let (name, properties) = &events[0];
    assert_eq!(name, telemetry::LUIS_RESULT);
    assert_eq!(properties[telemetry::APPLICATION_ID], APP_ID);
    assert_eq!(properties[telemetry::INTENT], "Travel_BookFlight");
    assert_eq!(properties[telemetry::INTENT_SCORE], "0.96");
    assert_eq!(properties[telemetry::INTENT_2], "Override");
    assert_eq!(properties[telemetry::FROM_ID], "user1");
    assert_eq!(properties[telemetry::SENTIMENT_LABEL], "neutral");
    assert_eq!(properties[telemetry::QUESTION], "book a flight to seattle");
    assert_eq!(properties["extra"], "value");
}
