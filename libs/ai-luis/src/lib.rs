//! LUIS v3 prediction as a [`bot_builder::Recognizer`].
//!
//! [`LuisRecognizer`] posts the current utterance to a published app,
//! reshapes the prediction into a [`bot_builder::RecognizerResult`] and
//! reports it through a trace activity and a `LuisResult` telemetry event.

mod application;
mod error;
mod mapping;
mod options;
mod recognizer;

pub use application::{DEFAULT_ENDPOINT, LuisApplication};
pub use error::LuisError;
pub use options::{DynamicList, ExternalEntity, ListElement, LuisRecognizerOptionsV3, slots};
pub use recognizer::{
    LUIS_TRACE_LABEL, LUIS_TRACE_NAME, LUIS_TRACE_TYPE, LuisRecognizer, telemetry, top_intent,
};
