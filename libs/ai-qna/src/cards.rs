use bot_schema::{Activity, CardAction, HeroCard};

use crate::models::QueryResult;

/// Hero cards for active learning suggestions and multi-turn prompts.
pub struct QnACardBuilder;

impl QnACardBuilder {
    /// A "did you mean" card: one button per suggestion plus a final
    /// button for "none of these".
    pub fn get_suggestions_card<S: AsRef<str>>(
        suggestions: &[S],
        card_title: &str,
        card_no_match_text: &str,
    ) -> Activity {
        let buttons = suggestions
            .iter()
            .map(|suggestion| CardAction::im_back(suggestion.as_ref()))
            .chain(std::iter::once(CardAction::im_back(card_no_match_text)))
            .collect();
        card_activity(card_title, buttons)
    }

    /// The answer text with one button per follow-up prompt.
    pub fn get_qna_prompts_card(result: &QueryResult) -> Activity {
        let buttons = result
            .context
            .iter()
            .flat_map(|context| &context.prompts)
            .map(|prompt| CardAction::im_back(prompt.display_text.as_str()))
            .collect();
        card_activity(&result.answer, buttons)
    }
}

fn card_activity(text: &str, buttons: Vec<CardAction>) -> Activity {
    let card = HeroCard {
        buttons,
        ..Default::default()
    };
    let mut activity = Activity::message(text);
    activity.attachments.push(card.to_attachment());
    activity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QnAMakerPrompt, QnAResponseContext};

    #[test]
    fn suggestions_end_with_the_no_match_button() {
        let card = QnACardBuilder::get_suggestions_card(
            &["Reset the router", "Update firmware"],
            "Did you mean:",
            "None of the above.",
        );
        assert_eq!(card.text(), "Did you mean:");
        let content = card.attachments[0].content.clone().unwrap();
        insta::assert_json_snapshot!(content, @r#"
        {
          "buttons": [
            {
              "type": "imBack",
              "title": "Reset the router",
              "value": "Reset the router"
            },
            {
              "type": "imBack",
              "title": "Update firmware",
              "value": "Update firmware"
            },
            {
              "type": "imBack",
              "title": "None of the above.",
              "value": "None of the above."
            }
          ]
        }
        "#);
    }

    #[test]
    fn prompts_card_lists_follow_ups() {
        let result = QueryResult {
            answer: "Hold the reset button.".into(),
            context: Some(QnAResponseContext {
                is_context_only: false,
                prompts: vec![QnAMakerPrompt {
                    display_text: "Still broken?".into(),
                    qna_id: 13,
                    ..Default::default()
                }],
            }),
            ..Default::default()
        };
        let card = QnACardBuilder::get_qna_prompts_card(&result);
        assert_eq!(card.text(), "Hold the reset button.");
        let content = card.attachments[0].content.clone().unwrap();
        assert_eq!(content["buttons"][0]["value"], "Still broken?");
    }
}
