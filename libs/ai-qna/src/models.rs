use std::env;

use bot_schema::Activity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QnaError;

/// Where a knowledge base lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnAMakerEndpoint {
    pub knowledge_base_id: String,
    pub endpoint_key: String,
    pub host: String,
}

impl QnAMakerEndpoint {
    pub fn new(
        knowledge_base_id: impl Into<String>,
        endpoint_key: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            endpoint_key: endpoint_key.into(),
            host: host.into(),
        }
    }

    /// Reads `QNA_KNOWLEDGE_BASE_ID`, `QNA_ENDPOINT_KEY` and `QNA_HOST`.
    pub fn from_env() -> Result<Self, QnaError> {
        let read = |name: &'static str, field: &'static str| {
            env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or(QnaError::MissingEndpointValue(field))
        };
        Ok(Self {
            knowledge_base_id: read("QNA_KNOWLEDGE_BASE_ID", "knowledgeBaseId")?,
            endpoint_key: read("QNA_ENDPOINT_KEY", "endpointKey")?,
            host: read("QNA_HOST", "host")?,
        })
    }

    pub(crate) fn validate(&self) -> Result<(), QnaError> {
        if self.knowledge_base_id.trim().is_empty() {
            return Err(QnaError::MissingEndpointValue("knowledgeBaseId"));
        }
        if self.host.trim().is_empty() {
            return Err(QnaError::MissingEndpointValue("host"));
        }
        if self.endpoint_key.trim().is_empty() {
            return Err(QnaError::MissingEndpointValue("endpointKey"));
        }
        if self.host.ends_with("v2.0") || self.host.ends_with("v3.0") {
            return Err(QnaError::UnsupportedVersion);
        }
        Ok(())
    }

    pub(crate) fn knowledge_base_url(&self, operation: &str) -> String {
        format!(
            "{}/knowledgebases/{}/{operation}",
            self.host.trim_end_matches('/'),
            self.knowledge_base_id
        )
    }
}

/// A name/value pair attached to knowledge base entries and used as a
/// filter or boost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub value: String,
}

impl Metadata {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// How strict filters combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinOperator {
    And,
    Or,
}

pub mod ranker_types {
    pub const DEFAULT: &str = "Default";
    pub const QUESTION_ONLY: &str = "QuestionOnly";
    pub const AUTO_SUGGEST_QUESTION: &str = "AutoSuggestQuestion";
}

/// The previous turn of a multi-turn conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnARequestContext {
    #[serde(rename = "previousQnAId", default)]
    pub previous_qna_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_user_query: Option<String>,
}

/// A follow-up question offered with an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnAMakerPrompt {
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub qna_id: i64,
    #[serde(default)]
    pub display_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qna: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnAResponseContext {
    #[serde(default)]
    pub is_context_only: bool,
    #[serde(default)]
    pub prompts: Vec<QnAMakerPrompt>,
}

/// One answer from the knowledge base. `score` is in `[0, 1]` once it
/// leaves [`crate::QnAMaker`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<QnAResponseContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    #[serde(default)]
    pub answers: Vec<QueryResult>,
    #[serde(default)]
    pub active_learning_enabled: bool,
}

/// Value of the `QnAMaker` trace activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnAMakerTraceInfo {
    pub message: Activity,
    pub query_results: Vec<QueryResult>,
    pub knowledge_base_id: String,
    pub score_threshold: f64,
    pub top: u32,
    pub strict_filters: Vec<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<QnARequestContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qna_id: Option<i64>,
    pub is_test: bool,
    pub ranker_type: String,
}

/// Active learning feedback: which answer a user picked for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub user_id: String,
    pub user_question: String,
    pub qna_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecords {
    #[serde(rename = "feedbackRecords")]
    pub records: Vec<FeedbackRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_rejects_retired_hosts() {
        let endpoint = QnAMakerEndpoint::new("kb", "key", "https://westus.api.cognitive.microsoft.com/qnamaker/v3.0");
        assert!(matches!(endpoint.validate(), Err(QnaError::UnsupportedVersion)));

        let blank = QnAMakerEndpoint::new(" ", "key", "https://host/qnamaker");
        assert!(matches!(
            blank.validate(),
            Err(QnaError::MissingEndpointValue("knowledgeBaseId"))
        ));
    }

    #[test]
    fn answers_read_the_service_shape() {
        let results: QueryResults = serde_json::from_value(json!({
            "answers": [{
                "questions": ["how do I reset?"],
                "answer": "Hold the button.",
                "score": 87.5,
                "id": 12,
                "source": "faq.tsv",
                "metadata": [{ "name": "product", "value": "router" }],
                "context": {
                    "isContextOnly": false,
                    "prompts": [{ "displayOrder": 0, "qnaId": 13, "displayText": "Still broken?" }]
                }
            }],
            "activeLearningEnabled": true
        }))
        .unwrap();
        let answer = &results.answers[0];
        assert_eq!(answer.id, Some(12));
        assert_eq!(answer.metadata[0], Metadata::new("product", "router"));
        assert_eq!(answer.context.as_ref().unwrap().prompts[0].display_text, "Still broken?");
        assert!(results.active_learning_enabled);
    }
}
