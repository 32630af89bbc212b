use bot_builder::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DialogError {
    #[error(
        "A dialog with an id of '{0}' wasn't found. The dialog must be included in the current \
         or parent DialogSet."
    )]
    NotFound(String),
    #[error("Can't resume previous dialog. A dialog with an id of '{0}' wasn't found.")]
    ResumeTargetNotFound(String),
    #[error("Failed to continue dialog. A dialog with id {0} could not be found.")]
    ContinueTargetNotFound(String),
    #[error("next() already called for dialog and step '{dialog}[{index}]'")]
    StepAlreadyAdvanced { dialog: String, index: usize },
    #[error("invalid dialog options: {0}")]
    InvalidOptions(String),
    #[error("the dialog set has no state property accessor")]
    MissingStateAccessor,
    #[error("{0} is not supported by the current adapter")]
    Unsupported(&'static str),
    #[error("memory scope '{0}' not found")]
    UnknownScope(String),
    #[error("memory scope '{0}' is read-only")]
    ReadOnlyScope(String),
    #[error("memory path '{0}' is invalid")]
    InvalidPath(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("dialog state could not be converted")]
    Serialization(#[from] serde_json::Error),
}
