//! Activity protocol types shared by the connector, builder and dialog crates.

mod accounts;
mod activity;
mod cards;
mod enums;
mod tokens;

pub use accounts::{
    ChannelAccount, ConversationAccount, ConversationParameters, ConversationReference,
    ConversationResourceResponse, ExpectedReplies, InvokeResponse, MessageReaction,
    ResourceResponse, Transcript,
};
pub use activity::Activity;
pub use cards::{
    Attachment, CardAction, CardImage, Entity, HeroCard, Mention, OAuthCard, SemanticAction,
    SigninCard, SuggestedActions,
};
pub use enums::{
    ActionTypes, ActivityTypes, AttachmentLayoutTypes, DeliveryModes, EndOfConversationCodes,
    InputHints, RoleTypes, TextFormatTypes,
};
pub use tokens::{
    SignInResource, TokenExchangeInvokeRequest, TokenExchangeInvokeResponse,
    TokenExchangeRequest, TokenExchangeResource, TokenResponse, TokenStatus,
};

/// Well-known channel ids.
pub mod channels {
    pub const CONSOLE: &str = "console";
    pub const CORTANA: &str = "cortana";
    pub const DIRECTLINE: &str = "directline";
    pub const DIRECTLINE_SPEECH: &str = "directlinespeech";
    pub const EMAIL: &str = "email";
    pub const EMULATOR: &str = "emulator";
    pub const FACEBOOK: &str = "facebook";
    pub const GROUPME: &str = "groupme";
    pub const KIK: &str = "kik";
    pub const LINE: &str = "line";
    pub const MSTEAMS: &str = "msteams";
    pub const SKYPE: &str = "skype";
    pub const SKYPE_FOR_BUSINESS: &str = "skypeforbusiness";
    pub const SLACK: &str = "slack";
    pub const SMS: &str = "sms";
    pub const TELEGRAM: &str = "telegram";
    pub const TELEPHONY: &str = "telephony";
    pub const TEST: &str = "test";
    pub const TWILIO: &str = "twilio-sms";
    pub const WEBCHAT: &str = "webchat";
}

/// Invoke and event names with reserved meaning.
pub mod signin {
    pub const VERIFY_STATE_OPERATION_NAME: &str = "signin/verifyState";
    pub const TOKEN_EXCHANGE_OPERATION_NAME: &str = "signin/tokenExchange";
    pub const TOKEN_RESPONSE_EVENT_NAME: &str = "tokens/response";
}
