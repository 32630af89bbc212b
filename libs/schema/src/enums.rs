//! Open string enumerations used across the activity protocol.
//!
//! Channels are free to send values this crate does not know about, so every
//! enumeration keeps an `Other` variant that round-trips the raw string.

use std::fmt;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)*
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $value,)*
                    Self::Other(value) => value.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $(
                    if value.eq_ignore_ascii_case($value) {
                        return Self::$variant;
                    }
                )*
                Self::Other(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Activity `type` values.
    ActivityTypes {
        Message => "message",
        ContactRelationUpdate => "contactRelationUpdate",
        ConversationUpdate => "conversationUpdate",
        Typing => "typing",
        EndOfConversation => "endOfConversation",
        Event => "event",
        Invoke => "invoke",
        InvokeResponse => "invokeResponse",
        DeleteUserData => "deleteUserData",
        MessageUpdate => "messageUpdate",
        MessageDelete => "messageDelete",
        InstallationUpdate => "installationUpdate",
        MessageReaction => "messageReaction",
        Suggestion => "suggestion",
        Trace => "trace",
        Handoff => "handoff",
        Command => "command",
        CommandResult => "commandResult",
        Delay => "delay",
    }
);

impl Default for ActivityTypes {
    fn default() -> Self {
        ActivityTypes::Message
    }
}

string_enum!(
    /// Hints describing whether the bot is waiting for input after a message.
    InputHints {
        AcceptingInput => "acceptingInput",
        IgnoringInput => "ignoringInput",
        ExpectingInput => "expectingInput",
    }
);

string_enum!(
    DeliveryModes {
        Normal => "normal",
        Notification => "notification",
        ExpectReplies => "expectReplies",
        Ephemeral => "ephemeral",
    }
);

string_enum!(
    EndOfConversationCodes {
        Unknown => "unknown",
        CompletedSuccessfully => "completedSuccessfully",
        UserCancelled => "userCancelled",
        BotTimedOut => "botTimedOut",
        BotIssuedInvalidMessage => "botIssuedInvalidMessage",
        ChannelFailed => "channelFailed",
    }
);

string_enum!(
    /// Card action kinds.
    ActionTypes {
        OpenUrl => "openUrl",
        ImBack => "imBack",
        PostBack => "postBack",
        PlayAudio => "playAudio",
        PlayVideo => "playVideo",
        ShowImage => "showImage",
        DownloadFile => "downloadFile",
        Signin => "signin",
        Call => "call",
        MessageBack => "messageBack",
    }
);

string_enum!(
    TextFormatTypes {
        Markdown => "markdown",
        Plain => "plain",
        Xml => "xml",
    }
);

string_enum!(
    RoleTypes {
        User => "user",
        Bot => "bot",
        Skill => "skill",
    }
);

string_enum!(
    AttachmentLayoutTypes {
        List => "list",
        Carousel => "carousel",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values_parse_case_insensitively() {
        assert_eq!(
            ActivityTypes::from("ConversationUpdate"),
            ActivityTypes::ConversationUpdate
        );
        assert_eq!(InputHints::from("expectinginput"), InputHints::ExpectingInput);
    }

    #[test]
    fn unknown_values_round_trip() {
        let parsed: ActivityTypes = serde_json::from_str("\"custom/thing\"").unwrap();
        assert_eq!(parsed, ActivityTypes::Other("custom/thing".into()));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"custom/thing\"");
    }
}
