use bot_builder::MessageFactory;
use bot_schema::{Activity, CardAction, HeroCard, InputHints};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use super::Choice;
use super::channel::Channel;

/// Separators used when choices are rendered inline. Unset fields fall
/// back to English.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceFactoryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_or: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_or_more: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_numbers: Option<bool>,
}

impl ChoiceFactoryOptions {
    pub fn new(separator: &str, inline_or: &str, inline_or_more: &str, include_numbers: bool) -> Self {
        Self {
            inline_separator: Some(separator.to_string()),
            inline_or: Some(inline_or.to_string()),
            inline_or_more: Some(inline_or_more.to_string()),
            include_numbers: Some(include_numbers),
        }
    }
}

/// Renders a list of choices in the best form a channel supports.
pub struct ChoiceFactory;

impl ChoiceFactory {
    /// Picks a rendering for `channel_id`: a hero card when only card
    /// actions are available, suggested actions when supported, an inline
    /// list for up to three short choices, else a numbered list.
    pub fn for_channel(
        channel_id: &str,
        choices: &[Choice],
        text: Option<&str>,
        speak: Option<&str>,
        options: Option<&ChoiceFactoryOptions>,
    ) -> Activity {
        let max_title_length = choices
            .iter()
            .map(|choice| choice.title().graphemes(true).count())
            .max()
            .unwrap_or(0);

        let supports_suggested = Channel::supports_suggested_actions(channel_id, choices.len());
        let supports_cards = Channel::supports_card_actions(channel_id, choices.len());
        let long_titles = max_title_length > Channel::max_action_title_length(channel_id);

        if !long_titles && !supports_suggested && supports_cards {
            Self::hero_card(choices, text, speak)
        } else if !long_titles && supports_suggested {
            Self::suggested_action(choices, text, speak)
        } else if !long_titles && choices.len() <= 3 {
            Self::inline(choices, text, speak, options)
        } else {
            Self::list(choices, text, speak, options)
        }
    }

    /// `text (1) red, (2) green, or (3) blue`
    pub fn inline(
        choices: &[Choice],
        text: Option<&str>,
        speak: Option<&str>,
        options: Option<&ChoiceFactoryOptions>,
    ) -> Activity {
        let defaults = ChoiceFactoryOptions::default();
        let options = options.unwrap_or(&defaults);
        let separator = options.inline_separator.as_deref().unwrap_or(", ");
        let inline_or = options.inline_or.as_deref().unwrap_or(" or ");
        let inline_or_more = options.inline_or_more.as_deref().unwrap_or(", or ");
        let include_numbers = options.include_numbers.unwrap_or(true);

        let mut out = String::new();
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            out.push_str(text);
            out.push(' ');
        }
        let mut connector = "";
        for (index, choice) in choices.iter().enumerate() {
            out.push_str(connector);
            if include_numbers {
                out.push_str(&format!("({}) ", index + 1));
            }
            out.push_str(choice.title());
            connector = if index + 2 == choices.len() {
                if index == 0 { inline_or } else { inline_or_more }
            } else {
                separator
            };
        }
        MessageFactory::text_with_speak(out, speak, Some(InputHints::ExpectingInput))
    }

    /// Text followed by one choice per line, numbered or bulleted.
    pub fn list(
        choices: &[Choice],
        text: Option<&str>,
        speak: Option<&str>,
        options: Option<&ChoiceFactoryOptions>,
    ) -> Activity {
        let include_numbers = options.and_then(|o| o.include_numbers).unwrap_or(true);
        let mut out = String::from(text.unwrap_or_default());
        out.push_str("\n\n   ");
        let mut connector = "";
        for (index, choice) in choices.iter().enumerate() {
            out.push_str(connector);
            if include_numbers {
                out.push_str(&format!("{}. ", index + 1));
            } else {
                out.push_str("- ");
            }
            out.push_str(choice.title());
            connector = "\n   ";
        }
        MessageFactory::text_with_speak(out, speak, Some(InputHints::ExpectingInput))
    }

    pub fn suggested_action(choices: &[Choice], text: Option<&str>, speak: Option<&str>) -> Activity {
        MessageFactory::suggested_card_actions(
            extract_actions(choices),
            text,
            speak,
            Some(InputHints::ExpectingInput),
        )
    }

    pub fn hero_card(choices: &[Choice], text: Option<&str>, speak: Option<&str>) -> Activity {
        let card = HeroCard {
            text: text.map(str::to_string),
            buttons: extract_actions(choices),
            ..Default::default()
        };
        MessageFactory::attachment(
            card.to_attachment(),
            None,
            speak,
            Some(InputHints::ExpectingInput),
        )
    }
}

fn extract_actions(choices: &[Choice]) -> Vec<CardAction> {
    choices
        .iter()
        .map(|choice| {
            choice
                .action
                .clone()
                .unwrap_or_else(|| CardAction::im_back(choice.value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choices::to_choices;
    use bot_schema::channels;

    fn colors() -> Vec<Choice> {
        to_choices(["red", "green", "blue"])
    }

    #[test]
    fn inline_uses_or_before_the_last_choice() {
        let activity = ChoiceFactory::inline(&colors(), Some("Pick one:"), None, None);
        assert_eq!(activity.text(), "Pick one: (1) red, (2) green, or (3) blue");
        assert_eq!(activity.input_hint, Some(InputHints::ExpectingInput));

        let two = ChoiceFactory::inline(&colors()[..2], None, None, None);
        assert_eq!(two.text(), "(1) red or (2) green");
    }

    #[test]
    fn inline_honors_culture_separators() {
        let options = ChoiceFactoryOptions::new(", ", " oder ", ", oder ", false);
        let activity = ChoiceFactory::inline(&colors(), None, None, Some(&options));
        assert_eq!(activity.text(), "red, green, oder blue");
    }

    #[test]
    fn list_puts_each_choice_on_its_own_line() {
        let activity = ChoiceFactory::list(&colors(), Some("Pick one:"), None, None);
        assert_eq!(activity.text(), "Pick one:\n\n   1. red\n   2. green\n   3. blue");
    }

    #[test]
    fn channel_decides_the_rendering() {
        let suggested = ChoiceFactory::for_channel(channels::WEBCHAT, &colors(), Some("Pick"), None, None);
        assert_eq!(suggested.suggested_actions.unwrap().actions.len(), 3);

        let card = ChoiceFactory::for_channel(channels::MSTEAMS, &colors(), Some("Pick"), None, None);
        assert_eq!(card.attachments[0].content_type, HeroCard::CONTENT_TYPE);

        let inline = ChoiceFactory::for_channel(channels::TEST, &colors(), Some("Pick"), None, None);
        assert_eq!(inline.text(), "Pick (1) red, (2) green, or (3) blue");

        let many = to_choices(["a", "b", "c", "d"]);
        let list = ChoiceFactory::for_channel(channels::TEST, &many, Some("Pick"), None, None);
        assert!(list.text().starts_with("Pick\n\n   1. a"));
    }

    #[test]
    fn long_titles_fall_back_to_a_list() {
        let choices = to_choices(["a choice title that is far too long", "short"]);
        let activity = ChoiceFactory::for_channel(channels::WEBCHAT, &choices, None, None, None);
        assert!(activity.suggested_actions.is_none());
        assert!(activity.text().contains("1. a choice title"));
    }
}
