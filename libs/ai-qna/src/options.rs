use serde::{Deserialize, Serialize};

use crate::error::QnaError;
use crate::models::{JoinOperator, Metadata, QnARequestContext, ranker_types};

pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.3;
pub const DEFAULT_TOP: u32 = 1;
pub const DEFAULT_TIMEOUT_MS: f64 = 100_000.0;

/// Query settings for [`crate::QnAMaker`].
///
/// A zero threshold, top or timeout means "use the default", so per-call
/// options only need the fields they change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnAMakerOptions {
    pub score_threshold: f64,
    /// Request timeout in milliseconds.
    pub timeout: f64,
    pub top: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<QnARequestContext>,
    #[serde(rename = "qnAId", default, skip_serializing_if = "Option::is_none")]
    pub qna_id: Option<i64>,
    #[serde(default)]
    pub strict_filters: Vec<Metadata>,
    #[serde(default)]
    pub metadata_boost: Vec<Metadata>,
    #[serde(default)]
    pub is_test: bool,
    pub ranker_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_filters_join_operator: Option<JoinOperator>,
}

impl Default for QnAMakerOptions {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            timeout: DEFAULT_TIMEOUT_MS,
            top: DEFAULT_TOP,
            context: None,
            qna_id: None,
            strict_filters: Vec::new(),
            metadata_boost: Vec::new(),
            is_test: false,
            ranker_type: ranker_types::DEFAULT.to_string(),
            strict_filters_join_operator: None,
        }
    }
}

impl QnAMakerOptions {
    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
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

    pub fn with_context(mut self, context: QnARequestContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Fills unset values with defaults and checks the ranges.
    pub fn validated(mut self) -> Result<Self, QnaError> {
        if self.score_threshold == 0.0 {
            self.score_threshold = DEFAULT_SCORE_THRESHOLD;
        }
        if self.top == 0 {
            self.top = DEFAULT_TOP;
        }
        if self.timeout == 0.0 {
            self.timeout = DEFAULT_TIMEOUT_MS;
        }
        if self.ranker_type.is_empty() {
            self.ranker_type = ranker_types::DEFAULT.to_string();
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(QnaError::InvalidOptions(format!(
                "the score threshold {} should be a value between 0 and 1",
                self.score_threshold
            )));
        }
        if !self.timeout.is_finite() || self.timeout < 0.0 {
            return Err(QnaError::InvalidOptions(format!(
                "the timeout {} should be a positive number of milliseconds",
                self.timeout
            )));
        }
        Ok(self)
    }

    /// Overlays per-call `query` options on these instance options.
    pub fn hydrate(&self, query: Option<&QnAMakerOptions>) -> QnAMakerOptions {
        let mut hydrated = self.clone();
        let Some(query) = query else {
            return hydrated;
        };
        if query.score_threshold != 0.0 {
            hydrated.score_threshold = query.score_threshold;
        }
        if query.top != 0 {
            hydrated.top = query.top;
        }
        if !query.strict_filters.is_empty() {
            hydrated.strict_filters = query.strict_filters.clone();
        }
        hydrated.context = query.context.clone();
        hydrated.qna_id = query.qna_id;
        hydrated.is_test = query.is_test;
        hydrated.ranker_type = if query.ranker_type.is_empty() {
            ranker_types::DEFAULT.to_string()
        } else {
            query.ranker_type.clone()
        };
        hydrated.strict_filters_join_operator = query.strict_filters_join_operator;
        hydrated
    }
}
