//! Shorthand constructors for common outgoing messages.
//!
//! Every message defaults its input hint to `acceptingInput`.

use bot_schema::{
    Activity, ActionTypes, Attachment, AttachmentLayoutTypes, CardAction, InputHints,
    SuggestedActions, TextFormatTypes,
};
use serde_json::Value;

pub struct MessageFactory;

impl MessageFactory {
    pub fn text(text: impl Into<String>) -> Activity {
        Self::text_with_speak(text, None, None)
    }

    pub fn text_with_speak(
        text: impl Into<String>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        let mut activity = Activity::message(text);
        activity.text_format = Some(TextFormatTypes::Plain.to_string());
        set_speak_and_hint(&mut activity, speak, input_hint);
        activity
    }

    /// A message whose suggested actions are `imBack` buttons for `actions`.
    pub fn suggested_actions<S: AsRef<str>>(
        actions: &[S],
        text: Option<&str>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        let card_actions = actions
            .iter()
            .map(|action| CardAction::im_back(action.as_ref()))
            .collect();
        Self::suggested_card_actions(card_actions, text, speak, input_hint)
    }

    pub fn suggested_card_actions(
        actions: Vec<CardAction>,
        text: Option<&str>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        let mut activity = Activity::create_message_activity();
        activity.text = text.map(str::to_string);
        activity.suggested_actions = Some(SuggestedActions {
            to: Vec::new(),
            actions,
        });
        set_speak_and_hint(&mut activity, speak, input_hint);
        activity
    }

    pub fn attachment(
        attachment: Attachment,
        text: Option<&str>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        Self::attachments(
            vec![attachment],
            AttachmentLayoutTypes::List,
            text,
            speak,
            input_hint,
        )
    }

    /// Several attachments laid out as a list.
    pub fn attachment_list(
        attachments: Vec<Attachment>,
        text: Option<&str>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        Self::attachments(attachments, AttachmentLayoutTypes::List, text, speak, input_hint)
    }

    /// Several attachments shown side by side.
    pub fn carousel(
        attachments: Vec<Attachment>,
        text: Option<&str>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        Self::attachments(
            attachments,
            AttachmentLayoutTypes::Carousel,
            text,
            speak,
            input_hint,
        )
    }

    /// A message carrying a single file or media link.
    pub fn content_url(
        url: impl Into<String>,
        content_type: impl Into<String>,
        name: Option<&str>,
        text: Option<&str>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        let attachment = Attachment {
            content_type: content_type.into(),
            content_url: Some(url.into()),
            name: name.map(str::to_string),
            ..Default::default()
        };
        Self::attachment(attachment, text, speak, input_hint)
    }

    fn attachments(
        attachments: Vec<Attachment>,
        layout: AttachmentLayoutTypes,
        text: Option<&str>,
        speak: Option<&str>,
        input_hint: Option<InputHints>,
    ) -> Activity {
        let mut activity = Activity::create_message_activity();
        activity.attachment_layout = Some(layout.to_string());
        activity.attachments = attachments;
        activity.text = text.map(str::to_string);
        set_speak_and_hint(&mut activity, speak, input_hint);
        activity
    }
}

fn set_speak_and_hint(activity: &mut Activity, speak: Option<&str>, input_hint: Option<InputHints>) {
    activity.speak = speak.map(str::to_string);
    activity.input_hint = Some(input_hint.unwrap_or(InputHints::AcceptingInput));
}

/// `openUrl` action, a common companion to suggested actions.
pub fn open_url_action(title: impl Into<String>, url: impl Into<String>) -> CardAction {
    CardAction {
        action_type: ActionTypes::OpenUrl,
        title: Some(title.into()),
        image: None,
        text: None,
        display_text: None,
        value: Some(Value::String(url.into())),
        channel_data: None,
    }
}
