//! Reshapes a v3 prediction into a [`RecognizerResult`](bot_builder::RecognizerResult).

use std::collections::HashMap;

use bot_builder::IntentScore;
use serde_json::{Map, Value, json};

const METADATA_KEY: &str = "$instance";
const DATE_SUBTYPES: &[&str] = &[
    "date",
    "daterange",
    "datetime",
    "datetimerange",
    "duration",
    "set",
    "time",
    "timerange",
];
const GEOGRAPHY_SUBTYPES: &[&str] = &["poi", "city", "countryRegion", "continent", "state"];

/// Intent names with `.` and spaces replaced by `_`.
pub(crate) fn intents(prediction: &Value) -> HashMap<String, IntentScore> {
    prediction
        .get("intents")
        .and_then(Value::as_object)
        .map(|intents| {
            intents
                .iter()
                .map(|(name, intent)| {
                    let score = intent.get("score").and_then(Value::as_f64).unwrap_or_default();
                    (normalize(name), IntentScore::new(score))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn entities(prediction: &Value) -> Map<String, Value> {
    match prediction.get("entities") {
        Some(entities) => match map_entities(entities, false) {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        None => Map::new(),
    }
}

/// `{label, score}` of the prediction's sentiment, when the app has
/// sentiment analysis turned on.
pub(crate) fn sentiment(prediction: &Value) -> Option<Value> {
    prediction.get("sentiment").map(|sentiment| {
        json!({
            "label": sentiment.get("label").cloned().unwrap_or(Value::Null),
            "score": sentiment.get("score").cloned().unwrap_or(Value::Null),
        })
    })
}

// `Type::Role` names keep only the role.
fn normalize_entity(name: &str) -> String {
    normalize(name.rsplit(':').next().unwrap_or(name))
}

fn normalize(name: &str) -> String {
    name.replace(['.', ' '], "_")
}

fn map_entities(source: &Value, in_instance: bool) -> Value {
    match source {
        Value::Object(object) => {
            let kind = object.get("type").and_then(Value::as_str);
            match kind {
                Some(kind) if !in_instance && DATE_SUBTYPES.contains(&kind) => {
                    simplify_datetime(object, kind)
                }
                _ => Value::Object(map_properties(object, in_instance)),
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match geography_subtype(item) {
                    Some(subtype) if !in_instance => geography(item, subtype),
                    _ => map_entities(item, in_instance),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

// Datetime resolutions collapse to their distinct timex expressions.
fn simplify_datetime(object: &Map<String, Value>, kind: &str) -> Value {
    let mut mapped = Map::new();
    if let Some(values) = object.get("values").and_then(Value::as_array) {
        let mut timexes: Vec<Value> = Vec::new();
        for timex in values.iter().filter_map(|value| value.get("timex")) {
            if !timexes.contains(timex) {
                timexes.push(timex.clone());
            }
        }
        mapped.insert("timex".into(), Value::Array(timexes));
    }
    mapped.insert("type".into(), json!(kind));
    Value::Object(mapped)
}

fn map_properties(object: &Map<String, Value>, in_instance: bool) -> Map<String, Value> {
    let mut mapped = Map::new();
    for (key, value) in object {
        let name = normalize_entity(key);
        let child = map_entities(value, in_instance || name == METADATA_KEY);

        if name == "datetime" && value.is_array() {
            mapped.insert("datetimeV1".into(), child);
        } else if name == "datetimeV2" && value.is_array() {
            mapped.insert("datetime".into(), child);
        } else if in_instance {
            match (name.as_str(), value) {
                ("length", Value::Number(length)) if length.is_i64() => {
                    let start = object.get("startIndex").and_then(Value::as_i64).unwrap_or(0);
                    let end = length.as_i64().unwrap_or(0) + start;
                    mapped.insert("endIndex".into(), json!(end));
                }
                ("modelTypeId", Value::Number(_)) | ("role", Value::String(_)) => {}
                _ => {
                    mapped.insert(name, child);
                }
            }
        } else if name == "unit" && value.is_string() {
            mapped.insert("units".into(), child);
        } else {
            mapped.insert(name, child);
        }
    }
    mapped
}

fn geography_subtype(item: &Value) -> Option<&str> {
    item.as_object()?
        .iter()
        .filter(|(key, _)| key.contains("type"))
        .filter_map(|(_, value)| value.as_str())
        .find(|value| GEOGRAPHY_SUBTYPES.contains(value))
}

fn geography(item: &Value, subtype: &str) -> Value {
    let mut entity = Map::new();
    if let Some(object) = item.as_object() {
        for (key, value) in object {
            if key.contains("value") {
                entity.insert("location".into(), value.clone());
            }
        }
    }
    entity.insert("type".into(), json!(subtype));
    Value::Object(entity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_names_are_normalized() {
        let prediction = json!({
            "intents": {
                "Travel.Book flight": { "score": 0.9 },
                "None": { "score": 0.1 }
            }
        });
        let intents = intents(&prediction);
        assert_eq!(intents["Travel_Book_flight"].score, 0.9);
        assert_eq!(intents.len(), 2);
    }

    #[test]
    fn datetimes_collapse_to_timex() {
        let prediction = json!({
            "entities": {
                "datetimeV2": [{
                    "type": "date",
                    "values": [
                        { "timex": "XXXX-07-04", "resolution": [] },
                        { "timex": "XXXX-07-04", "resolution": [] }
                    ]
                }],
                "$instance": {
                    "datetimeV2": [{
                        "type": "builtin.datetimeV2.date",
                        "text": "july 4",
                        "startIndex": 5,
                        "length": 6,
                        "modelTypeId": 2,
                        "modelType": "Prebuilt Entity Extractor",
                        "recognitionSources": ["model"]
                    }]
                }
            }
        });
        let entities = Value::Object(entities(&prediction));
        insta::assert_json_snapshot!(entities, @r#"
        {
          "$instance": {
            "datetime": [
              {
                "endIndex": 11,
                "modelType": "Prebuilt Entity Extractor",
                "recognitionSources": [
                  "model"
                ],
                "startIndex": 5,
                "text": "july 4",
                "type": "builtin.datetimeV2.date"
              }
            ]
          },
          "datetime": [
            {
              "timex": [
                "XXXX-07-04"
              ],
              "type": "date"
            }
          ]
        }
        "#);
    }

    #[test]
    fn geography_roles_and_units_are_reshaped() {
        let prediction = json!({
            "entities": {
                "geographyV2": [{ "type": "city", "value": "seattle" }],
                "Airport::Destination": ["SEA"],
                "money": [{ "number": 4, "unit": "Dollar" }]
            }
        });
        let entities = entities(&prediction);
        assert_eq!(entities["geographyV2"], json!([{ "location": "seattle", "type": "city" }]));
        assert_eq!(entities["Destination"], json!(["SEA"]));
        assert_eq!(entities["money"], json!([{ "number": 4, "units": "Dollar" }]));
    }

    #[test]
    fn sentiment_keeps_label_and_score() {
        let prediction = json!({ "sentiment": { "label": "positive", "score": 0.8 } });
        assert_eq!(
            sentiment(&prediction),
            Some(json!({ "label": "positive", "score": 0.8 }))
        );
        assert_eq!(sentiment(&json!({})), None);
    }
}
