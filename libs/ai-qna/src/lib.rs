//! Question answering against QnA Maker knowledge bases.
//!
//! [`QnAMaker`] queries a knowledge base for the current message, emits a
//! trace activity and a telemetry event, and hands back scored answers.
//! [`QnAMakerRecognizer`] wraps it as a [`bot_builder::Recognizer`] and
//! [`QnAMakerDialog`] runs it as a multi-turn dialog.

pub mod active_learning;
mod cards;
mod dialog;
mod error;
mod models;
mod options;
mod qna_maker;
mod recognizer;

pub use cards::QnACardBuilder;
pub use dialog::{
    DEFAULT_CARD_NO_MATCH_RESPONSE, DEFAULT_CARD_NO_MATCH_TEXT, DEFAULT_CARD_TITLE, DEFAULT_NO_ANSWER,
    QnADialogResponseOptions, QnAMakerDialog, QnAMakerDialogOptions,
};
pub use error::QnaError;
pub use models::{
    FeedbackRecord, FeedbackRecords, JoinOperator, Metadata, QnAMakerEndpoint, QnAMakerPrompt,
    QnAMakerTraceInfo, QnARequestContext, QnAResponseContext, QueryResult, QueryResults,
    ranker_types,
};
pub use options::QnAMakerOptions;
pub use qna_maker::{QNA_MAKER_NAME, QNA_MAKER_TRACE_LABEL, QNA_MAKER_TRACE_TYPE, QnAMaker, telemetry};
pub use recognizer::{QNA_MATCH_INTENT, QnAMakerRecognizer, recognized_answer};
