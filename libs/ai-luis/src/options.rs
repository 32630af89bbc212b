use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::LuisError;

pub mod slots {
    pub const PRODUCTION: &str = "production";
    pub const STAGING: &str = "staging";
}

/// An entity the caller already recognized, passed along with the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEntity {
    #[serde(rename = "entityName")]
    pub entity: String,
    #[serde(rename = "startIndex")]
    pub start: usize,
    #[serde(rename = "entityLength")]
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Value>,
}

impl ExternalEntity {
    pub fn new(entity: impl Into<String>, start: usize, length: usize, resolution: Option<Value>) -> Self {
        Self {
            entity: entity.into(),
            start,
            length,
            resolution,
        }
    }

    fn validate(&self) -> Result<(), LuisError> {
        if self.entity.trim().is_empty() || self.length == 0 {
            return Err(LuisError::InvalidExternalEntity(self.entity.clone()));
        }
        Ok(())
    }
}

/// Extra list entity values supplied for a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicList {
    #[serde(rename = "listEntityName")]
    pub entity: String,
    pub request_lists: Vec<ListElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListElement {
    pub canonical_form: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

/// Prediction settings for the v3 endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LuisRecognizerOptionsV3 {
    /// Return scores for every intent, not just the top one.
    pub include_all_intents: bool,
    /// Return `$instance` metadata for entities.
    pub include_instance_data: bool,
    /// Let LUIS keep the utterance for active learning.
    pub log: bool,
    pub prefer_external_entities: bool,
    pub datetime_reference: Option<String>,
    pub slot: String,
    /// Targets a specific version instead of a slot when set.
    pub version: Option<String>,
    pub external_entities: Vec<ExternalEntity>,
    pub dynamic_lists: Vec<DynamicList>,
    /// Copies the raw service response into the `luisResult` property.
    pub include_api_results: bool,
    pub timeout: Duration,
}

impl Default for LuisRecognizerOptionsV3 {
    fn default() -> Self {
        Self {
            include_all_intents: false,
            include_instance_data: true,
            log: true,
            prefer_external_entities: true,
            datetime_reference: None,
            slot: slots::PRODUCTION.to_string(),
            version: None,
            external_entities: Vec::new(),
            dynamic_lists: Vec::new(),
            include_api_results: false,
            timeout: Duration::from_secs(100),
        }
    }
}

impl LuisRecognizerOptionsV3 {
    pub fn with_all_intents(mut self, include: bool) -> Self {
        self.include_all_intents = include;
        self
    }

    pub fn with_instance_data(mut self, include: bool) -> Self {
        self.include_instance_data = include;
        self
    }

    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_datetime_reference(mut self, reference: impl Into<String>) -> Self {
        self.datetime_reference = Some(reference.into());
        self
    }

    pub fn with_external_entities(mut self, entities: Vec<ExternalEntity>) -> Self {
        self.external_entities = entities;
        self
    }

    pub fn with_dynamic_lists(mut self, lists: Vec<DynamicList>) -> Self {
        self.dynamic_lists = lists;
        self
    }

    pub fn with_api_results(mut self, include: bool) -> Self {
        self.include_api_results = include;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn prediction_path(&self, application_id: &str) -> String {
        match &self.version {
            Some(version) => format!("/luis/prediction/v3.0/apps/{application_id}/versions/{version}/predict"),
            None => format!("/luis/prediction/v3.0/apps/{application_id}/slots/{}/predict", self.slot),
        }
    }

    pub(crate) fn query_params(&self) -> [(&'static str, String); 3] {
        [
            ("verbose", self.include_instance_data.to_string()),
            ("log", self.log.to_string()),
            ("show-all-intents", self.include_all_intents.to_string()),
        ]
    }

    pub(crate) fn request_body(&self, utterance: &str) -> Result<Value, LuisError> {
        let mut options = Map::new();
        options.insert("preferExternalEntities".into(), json!(self.prefer_external_entities));
        if let Some(reference) = self.datetime_reference.as_deref().filter(|r| !r.trim().is_empty()) {
            options.insert("datetimeReference".into(), json!(reference));
        }

        let mut body = json!({ "query": utterance, "options": options });
        if !self.dynamic_lists.is_empty() {
            body["dynamicLists"] = serde_json::to_value(&self.dynamic_lists)?;
        }
        if !self.external_entities.is_empty() {
            for entity in &self.external_entities {
                entity.validate()?;
            }
            body["externalEntities"] = serde_json::to_value(&self.external_entities)?;
        }
        Ok(body)
    }

    /// The options echoed back in the trace activity.
    pub(crate) fn trace_value(&self) -> Value {
        json!({
            "includeAllIntents": self.include_all_intents,
            "includeInstanceData": self.include_instance_data,
            "log": self.log,
            "preferExternalEntities": self.prefer_external_entities,
            "dateTimeReference": self.datetime_reference,
            "slot": self.slot,
            "version": self.version,
            "externalEntities": self.external_entities,
            "dynamicLists": self.dynamic_lists,
        })
    }
}
