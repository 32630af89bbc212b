//! Turn pipeline for Bot Framework bots.
//!
//! An adapter turns each inbound [`Activity`](bot_schema::Activity) into a
//! [`TurnContext`], runs it through the [`MiddlewareSet`] and hands it to a
//! [`Bot`]. State, storage, transcripts and telemetry hang off that pipeline
//! as middleware or turn-scoped services.
pub mod activity_handler;
pub mod adapter;
pub mod bot;
pub mod cloud_adapter;
pub mod event_factory;
pub mod message_factory;
pub mod middleware;
pub mod recognizer;
pub mod set_speak;
pub mod skype_mentions;
pub mod state;
pub mod storage;
pub mod telemetry;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod transcript;
pub mod turn_context;
pub mod turn_state;
pub mod typing;

pub use activity_handler::{ActivityHandler, InvokeResponseError};
pub use adapter::{AdapterCore, BotAdapter, OnTurnErrorHandler};
pub use bot::{Bot, BotFn, bot_fn};
pub use cloud_adapter::{
    BotFrameworkAuthentication, CloudAdapter, ConfigurationBotFrameworkAuthentication,
};
pub use event_factory::EventFactory;
pub use message_factory::MessageFactory;
pub use middleware::{Middleware, MiddlewareSet, Next};
pub use recognizer::{IntentScore, Recognizer, RecognizerResult, TopIntent};
pub use set_speak::SetSpeakMiddleware;
pub use skype_mentions::SkypeMentionNormalizeMiddleware;
pub use state::{
    AutoSaveStateMiddleware, BotState, BotStateSet, ConversationState, PrivateConversationState,
    StateError, StatePropertyAccessor, UserState,
};
pub use storage::{MemoryStorage, SharedStorage, Storage, StorageError};
pub use telemetry::{
    BotTelemetryClient, NullBotTelemetryClient, SharedTelemetryClient, TelemetryLoggerMiddleware,
};
pub use transcript::{
    MemoryTranscriptStore, TranscriptLogger, TranscriptLoggerMiddleware, TranscriptStore,
};
pub use turn_context::TurnContext;
pub use turn_state::TurnState;
pub use typing::ShowTypingMiddleware;
