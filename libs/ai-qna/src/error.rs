use bot_connector::ConnectorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QnaError {
    #[error("QnA Maker endpoint has no {0}")]
    MissingEndpointValue(&'static str),
    #[error("v2.0 and v3.0 of QnA Maker service is no longer supported")]
    UnsupportedVersion,
    #[error("invalid QnA Maker options: {0}")]
    InvalidOptions(String),
    #[error("activity type is not a message")]
    NotAMessage,
    #[error("null or empty text")]
    EmptyText,
    #[error("QnA dialog '{0}' has no options in its state")]
    MissingDialogOptions(String),
    #[error("QnA Maker request failed")]
    Service(#[from] ConnectorError),
    #[error("unexpected QnA Maker response")]
    Decode(#[from] serde_json::Error),
}
