use bot_connector::ConnectorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LuisError {
    #[error("{0} is not a valid LUIS application id")]
    InvalidApplicationId(String),
    #[error("{0} is not a valid LUIS subscription key")]
    InvalidEndpointKey(String),
    #[error("{0} is not a valid LUIS endpoint")]
    InvalidEndpoint(String),
    #[error("could not find an application id in {0}")]
    MissingApplicationId(String),
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("external entity {0:?} needs a name and a length")]
    InvalidExternalEntity(String),
    #[error("LUIS response has no prediction")]
    MissingPrediction,
    #[error("LUIS request failed")]
    Service(#[from] ConnectorError),
    #[error("unexpected LUIS response")]
    Decode(#[from] serde_json::Error),
}
