use bot_builder::TurnContext;
use bot_schema::channels;

/// What a channel can render.
pub struct Channel;

impl Channel {
    /// Whether `channel_id` shows suggested actions for `button_count`
    /// buttons.
    pub fn supports_suggested_actions(channel_id: &str, button_count: usize) -> bool {
        match channel_id {
            channels::FACEBOOK | channels::SKYPE => button_count <= 10,
            channels::LINE => button_count <= 13,
            channels::KIK => button_count <= 20,
            channels::TELEGRAM
            | channels::EMULATOR
            | channels::DIRECTLINE
            | channels::DIRECTLINE_SPEECH
            | channels::WEBCHAT => button_count <= 100,
            _ => false,
        }
    }

    /// Whether `channel_id` shows card actions for `button_count` buttons.
    pub fn supports_card_actions(channel_id: &str, button_count: usize) -> bool {
        match channel_id {
            channels::FACEBOOK | channels::SKYPE => button_count <= 3,
            channels::MSTEAMS => button_count <= 50,
            channels::LINE => button_count <= 99,
            channels::SLACK
            | channels::TELEGRAM
            | channels::EMULATOR
            | channels::DIRECTLINE
            | channels::DIRECTLINE_SPEECH
            | channels::WEBCHAT => button_count <= 100,
            _ => false,
        }
    }

    pub fn has_message_feed(channel_id: &str) -> bool {
        channel_id != channels::CORTANA
    }

    pub fn max_action_title_length(_channel_id: &str) -> usize {
        20
    }

    pub fn get_channel_id(ctx: &TurnContext) -> &str {
        ctx.activity().channel_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggested_action_limits() {
        assert!(Channel::supports_suggested_actions(channels::FACEBOOK, 10));
        assert!(!Channel::supports_suggested_actions(channels::FACEBOOK, 11));
        assert!(Channel::supports_suggested_actions(channels::WEBCHAT, 100));
        assert!(!Channel::supports_suggested_actions(channels::MSTEAMS, 1));
        assert!(!Channel::supports_suggested_actions(channels::TEST, 1));
    }

    #[test]
    fn card_action_limits() {
        assert!(Channel::supports_card_actions(channels::MSTEAMS, 50));
        assert!(!Channel::supports_card_actions(channels::SKYPE, 4));
        assert!(!Channel::has_message_feed(channels::CORTANA));
    }
}
