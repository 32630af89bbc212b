use std::env;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::LuisError;

pub const DEFAULT_ENDPOINT: &str = "https://westus.api.cognitive.microsoft.com";

/// A published LUIS application and the key used to query it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LuisApplication {
    pub application_id: String,
    pub endpoint_key: String,
    pub endpoint: String,
}

impl LuisApplication {
    /// Application id and key must be GUIDs, with or without dashes. A blank
    /// endpoint falls back to the West US region.
    pub fn new(
        application_id: impl Into<String>,
        endpoint_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, LuisError> {
        let application_id = application_id.into();
        let endpoint_key = endpoint_key.into();
        let mut endpoint = endpoint.into();

        if !is_guid(&application_id) {
            return Err(LuisError::InvalidApplicationId(application_id));
        }
        if !is_guid(&endpoint_key) {
            return Err(LuisError::InvalidEndpointKey(endpoint_key));
        }
        if endpoint.trim().is_empty() {
            endpoint = DEFAULT_ENDPOINT.to_string();
        }
        if Url::parse(&endpoint).is_err() {
            return Err(LuisError::InvalidEndpoint(endpoint));
        }

        Ok(Self {
            application_id,
            endpoint_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Parses the endpoint URL shown in the LUIS portal, e.g.
    /// `https://westus.api.cognitive.microsoft.com/luis/prediction/v3.0/apps/<id>/slots/production/predict?subscription-key=<key>`.
    pub fn from_endpoint_url(application_endpoint: &str) -> Result<Self, LuisError> {
        let url = Url::parse(application_endpoint)
            .map_err(|_| LuisError::InvalidEndpoint(application_endpoint.to_string()))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();
        let application_id = segments
            .windows(2)
            .find(|pair| pair[0] == "apps")
            .map(|pair| pair[1].trim())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LuisError::MissingApplicationId(application_endpoint.to_string()))?;

        let endpoint_key = url
            .query_pairs()
            .find(|(name, _)| name == "subscription-key")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        let host = url
            .host_str()
            .ok_or_else(|| LuisError::InvalidEndpoint(application_endpoint.to_string()))?;
        Self::new(application_id, endpoint_key, format!("{}://{host}", url.scheme()))
    }

    /// Reads `LUIS_APP_ID`, `LUIS_API_KEY` and the optional `LUIS_ENDPOINT`.
    pub fn from_env() -> Result<Self, LuisError> {
        let application_id = env::var("LUIS_APP_ID").map_err(|_| LuisError::MissingEnv("LUIS_APP_ID"))?;
        let endpoint_key = env::var("LUIS_API_KEY").map_err(|_| LuisError::MissingEnv("LUIS_API_KEY"))?;
        let endpoint = env::var("LUIS_ENDPOINT").unwrap_or_default();
        Self::new(application_id, endpoint_key, endpoint)
    }
}

fn is_guid(value: &str) -> bool {
    Uuid::try_parse(value).is_ok()
}
