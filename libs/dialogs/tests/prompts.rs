use std::sync::Arc;

use bot_builder::bot::bot_fn;
use bot_builder::testkit::{TestAdapter, TestFlow};
use bot_builder::{Bot, ConversationState, MemoryStorage};
use bot_dialogs::choices::Choice;
use bot_dialogs::{
    ActivityPrompt, AttachmentPrompt, ChoicePrompt, ComponentDialog, ConfirmPrompt, Dialog,
    DialogManager, NumberPrompt, PromptOptions, TextPrompt, WaterfallDialog, prompt_validator,
};
use bot_schema::{ActivityTypes, Attachment};
use serde_json::Value;

/// Asks with `options`, then reports the prompt's result as `describe`
/// renders it.
fn prompt_bot(
    prompt: impl Dialog + 'static,
    options: PromptOptions,
    describe: fn(Option<&Value>) -> String,
) -> impl Bot {
    let waterfall = WaterfallDialog::new("main")
        .add_step(move |step| {
            let options = options.clone();
            Box::pin(async move { step.prompt("prompt", options).await })
        })
        .add_step(move |step| {
            Box::pin(async move {
                let reply = describe(step.result());
                step.context().send_text(reply, None, None).await?;
                step.end_dialog(None).await
            })
        });
    let root = ComponentDialog::new("root").add_dialog(waterfall).add_dialog(prompt);
    let state = ConversationState::new(Arc::new(MemoryStorage::new()));
    let manager = Arc::new(DialogManager::new(root, state));
    bot_fn(move |ctx| {
        let manager = manager.clone();
        Box::pin(async move {
            manager.on_turn(ctx).await?;
            Ok(())
        })
    })
}

fn as_text(result: Option<&Value>) -> String {
    match result {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "nothing".into(),
    }
}

#[tokio::test]
async fn text_prompt_returns_the_answer() {
    let bot = prompt_bot(
        TextPrompt::new("prompt"),
        PromptOptions::text("Your name?"),
        as_text,
    );
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Your name?")
        .test("Ann", "Ann")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn text_prompt_retries_until_the_validator_accepts() {
    let validator = prompt_validator(|prompt: &bot_dialogs::PromptValidatorContext<String>| {
        Box::pin(async move {
            let long_enough = prompt
                .recognized
                .value
                .as_deref()
                .is_some_and(|name| name.chars().count() >= 3);
            Ok(prompt.recognized.succeeded && long_enough)
        })
    });
    let bot = prompt_bot(
        TextPrompt::new("prompt").with_validator(validator),
        PromptOptions::text("Your name?").with_retry_text("At least three letters, please."),
        as_text,
    );
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Your name?")
        .test("Al", "At least three letters, please.")
        .test("Alice", "Alice")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn validators_see_the_attempt_count() {
    let validator = prompt_validator(|prompt: &bot_dialogs::PromptValidatorContext<String>| {
        Box::pin(async move { Ok(prompt.attempt_count() >= 2) })
    });
    let bot = prompt_bot(
        TextPrompt::new("prompt").with_validator(validator),
        PromptOptions::text("Say anything twice"),
        as_text,
    );
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Say anything twice")
        .test("one", "Say anything twice")
        .test("two", "two")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn number_prompt_reads_numbers_inside_sentences() {
    let bot = prompt_bot(
        NumberPrompt::<i64>::new("prompt"),
        PromptOptions::text("How many?"),
        as_text,
    );
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "How many?")
        .test("hello", "How many?")
        .test("I'd like 42 please", "42")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn number_prompt_uses_the_retry_prompt() {
    let bot = prompt_bot(
        NumberPrompt::<f64>::new("prompt"),
        PromptOptions::text("Temperature?").with_retry_text("A number, please."),
        as_text,
    );
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Temperature?")
        .test("warm", "A number, please.")
        .test("twenty one", "21.0")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn confirm_prompt_accepts_words_and_numbers() {
    let bot = prompt_bot(
        ConfirmPrompt::new("prompt"),
        PromptOptions::text("Please confirm."),
        as_text,
    );
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Please confirm. (1) Yes or (2) No")
        .test("yes", "true")
        .test("again", "Please confirm. (1) Yes or (2) No")
        .test("2", "false")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn confirm_prompt_reprompts_on_gibberish() {
    let bot = prompt_bot(
        ConfirmPrompt::new("prompt"),
        PromptOptions::text("Please confirm.").with_retry_text("Yes or no?"),
        as_text,
    );
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Please confirm. (1) Yes or (2) No")
        .test("banana", "Yes or no? (1) Yes or (2) No")
        .test("nope", "false")
        .start_test()
        .await
        .unwrap();
}

fn chosen_value(result: Option<&Value>) -> String {
    result
        .and_then(|found| found.get("value"))
        .and_then(Value::as_str)
        .unwrap_or("nothing")
        .to_string()
}

fn colors() -> PromptOptions {
    PromptOptions::text("Pick a color.").with_choices(
        ["red", "green", "blue"]
            .into_iter()
            .map(Choice::new)
            .collect(),
    )
}

#[tokio::test]
async fn choice_prompt_matches_names_numbers_and_ordinals() {
    let bot = prompt_bot(ChoicePrompt::new("prompt"), colors(), chosen_value);
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Pick a color. (1) red, (2) green, or (3) blue")
        .test("I'll take blue", "blue")
        .test("again", "Pick a color. (1) red, (2) green, or (3) blue")
        .test("1", "red")
        .test("again", "Pick a color. (1) red, (2) green, or (3) blue")
        .test("the second", "green")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn choice_prompt_reprompts_with_the_choices() {
    let bot = prompt_bot(ChoicePrompt::new("prompt"), colors(), chosen_value);
    TestFlow::new(TestAdapter::new(), bot)
        .test("hi", "Pick a color. (1) red, (2) green, or (3) blue")
        .test("purple", "Pick a color. (1) red, (2) green, or (3) blue")
        .test("7", "Pick a color. (1) red, (2) green, or (3) blue")
        .test("red", "red")
        .start_test()
        .await
        .unwrap();
}

fn attachment_count(result: Option<&Value>) -> String {
    let count = result.and_then(Value::as_array).map_or(0, Vec::len);
    format!("{count} attachment(s)")
}

#[tokio::test]
async fn attachment_prompt_waits_for_an_attachment() {
    let bot = prompt_bot(
        AttachmentPrompt::new("prompt"),
        PromptOptions::text("Send a picture."),
        attachment_count,
    );
    let adapter = TestAdapter::new();
    let mut upload = adapter.make_activity(Some("here"));
    upload.attachments.push(Attachment {
        content_type: "image/png".into(),
        content_url: Some("https://example.com/cat.png".into()),
        ..Default::default()
    });

    TestFlow::new(adapter, bot)
        .test("hi", "Send a picture.")
        .test("no picture", "Send a picture.")
        .send_activity(upload)
        .assert_reply("1 attachment(s)")
        .start_test()
        .await
        .unwrap();
}

fn activity_type(result: Option<&Value>) -> String {
    result
        .and_then(|activity| activity.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("nothing")
        .to_string()
}

#[tokio::test]
async fn activity_prompt_hands_every_activity_to_the_validator() {
    let validator = prompt_validator(|prompt: &bot_dialogs::PromptValidatorContext<bot_schema::Activity>| {
        Box::pin(async move {
            Ok(prompt
                .recognized
                .value
                .as_ref()
                .is_some_and(|activity| activity.is_type(&ActivityTypes::Event)))
        })
    });
    let bot = prompt_bot(
        ActivityPrompt::new("prompt", validator),
        PromptOptions::text("Waiting for an event.").with_retry_text("Still waiting."),
        activity_type,
    );
    let adapter = TestAdapter::new();
    let mut typing = adapter.make_activity(None);
    typing.activity_type = ActivityTypes::Typing;
    let mut event = adapter.make_activity(None);
    event.activity_type = ActivityTypes::Event;
    event.name = Some("ready".into());

    TestFlow::new(adapter, bot)
        .test("hi", "Waiting for an event.")
        .test("a message", "Still waiting.")
        .send_activity(typing)
        .assert_reply("Still waiting.")
        .send_activity(event)
        .assert_reply("event")
        .start_test()
        .await
        .unwrap();
}
