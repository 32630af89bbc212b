use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::turn_context::TurnContext;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    #[serde(default)]
    pub score: f64,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl IntentScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            properties: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopIntent {
    pub intent: String,
    pub score: f64,
}

/// Output of a [`Recognizer`]: scored intents plus extracted entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizerResult {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altered_text: Option<String>,
    #[serde(default)]
    pub intents: HashMap<String, IntentScore>,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl RecognizerResult {
    /// Highest scoring intent. Ties keep whichever was seen first; an empty
    /// result yields `None`.
    pub fn get_top_scoring_intent(&self) -> Option<TopIntent> {
        self.intents
            .iter()
            .fold(None::<(&String, f64)>, |best, (name, intent)| match best {
                Some((_, score)) if score >= intent.score => best,
                _ => Some((name, intent.score)),
            })
            .map(|(intent, score)| TopIntent {
                intent: intent.clone(),
                score,
            })
    }
}

/// Turns an utterance into intents and entities.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, ctx: &TurnContext) -> Result<RecognizerResult>;
}
