use anyhow::Result;
use async_trait::async_trait;
use bot_builder::{
    ActivityHandler, ConversationState, SharedStorage, SharedTelemetryClient, StatePropertyAccessor,
    TurnContext, UserState,
};
use bot_dialogs::{
    ComponentDialog, DialogManager, NumberPrompt, PromptOptions, PromptValidatorContext, TextPrompt,
    WaterfallDialog, prompt_validator,
};
use bot_schema::ChannelAccount;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

pub const PROFILE_DIALOG: &str = "profile";
pub const PROFILE_PROPERTY: &str = "UserProfile";
const STEPS: &str = "profile-steps";
const NAME_PROMPT: &str = "name-prompt";
const AGE_PROMPT: &str = "age-prompt";
const RESET_COMMAND: &str = "reset";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub age: i64,
}

/// Asks for a name and an age, then stores them through `profile`.
pub fn profile_dialog(profile: StatePropertyAccessor<UserProfile>) -> ComponentDialog {
    let steps = WaterfallDialog::new(STEPS)
        .add_step(|step| {
            Box::pin(async move {
                step.prompt(NAME_PROMPT, PromptOptions::text("What is your name?"))
                    .await
            })
        })
        .add_step(|step| {
            Box::pin(async move {
                let name = step.result_as::<String>().unwrap_or_default();
                step.set_value("name", json!(name));
                let options = PromptOptions::text(format!("Nice to meet you, {name}. How old are you?"))
                    .with_retry_text("Please enter an age between 1 and 149.");
                step.prompt(AGE_PROMPT, options).await
            })
        })
        .add_step(move |step| {
            let profile = profile.clone();
            Box::pin(async move {
                let saved = UserProfile {
                    name: step
                        .values()
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    age: step.result_as::<i64>().unwrap_or_default(),
                };
                profile.set(step.context(), &saved).await?;
                info!(age = saved.age, "profile collected");
                step.context()
                    .send_text(
                        format!("Thanks {}, I'll remember you are {}.", saved.name, saved.age),
                        None,
                        None,
                    )
                    .await?;
                step.end_dialog(Some(serde_json::to_value(&saved)?)).await
            })
        });

    let age_validator = prompt_validator(|prompt: &PromptValidatorContext<i64>| {
        Box::pin(async move {
            Ok(prompt.recognized.succeeded
                && prompt.recognized.value.is_some_and(|age| age > 0 && age < 150))
        })
    });

    ComponentDialog::new(PROFILE_DIALOG)
        .add_dialog(steps)
        .add_dialog(TextPrompt::new(NAME_PROMPT))
        .add_dialog(NumberPrompt::<i64>::new(AGE_PROMPT).with_validator(age_validator))
}

/// Greets new members, collects a profile, then echoes every message.
/// `reset` forgets the profile and any half-finished dialog.
pub struct EchoBot {
    conversation_state: ConversationState,
    user_state: UserState,
    profile: StatePropertyAccessor<UserProfile>,
    dialogs: DialogManager,
}

impl EchoBot {
    pub fn new(storage: SharedStorage) -> Self {
        let conversation_state = ConversationState::new(storage.clone());
        let user_state = UserState::new(storage);
        let profile = user_state.create_property(PROFILE_PROPERTY);
        let dialogs = DialogManager::new(profile_dialog(profile.clone()), conversation_state.clone())
            .with_user_state(user_state.clone());
        Self {
            conversation_state,
            user_state,
            profile,
            dialogs,
        }
    }

    pub fn with_telemetry_client(mut self, client: SharedTelemetryClient) -> Self {
        self.dialogs = self.dialogs.with_telemetry_client(client);
        self
    }
}

#[async_trait]
impl ActivityHandler for EchoBot {
    async fn on_message_activity(&self, ctx: &TurnContext) -> Result<()> {
        let text = ctx.activity().text().trim().to_string();
        if text.eq_ignore_ascii_case(RESET_COMMAND) {
            self.conversation_state.delete(ctx).await?;
            self.user_state.delete(ctx).await?;
            ctx.send_text("Your profile has been cleared.", None, None)
                .await?;
            return Ok(());
        }

        match self.profile.get_opt(ctx).await? {
            Some(profile) => {
                ctx.send_text(format!("{} said: {text}", profile.name), None, None)
                    .await?;
            }
            None => {
                let result = self.dialogs.on_turn(ctx).await?;
                debug!(status = ?result.turn_result.status, "profile dialog turn");
            }
        }
        Ok(())
    }

    async fn on_members_added(&self, members: &[ChannelAccount], ctx: &TurnContext) -> Result<()> {
        let bot_id = ctx.activity().recipient_id().map(str::to_string);
        for member in members {
            if member.id.is_none() || member.id == bot_id {
                continue;
            }
            let greeting = match member.name.as_deref().filter(|name| !name.is_empty()) {
                Some(name) => format!("Hello and welcome, {name}! Say anything to get started."),
                None => "Hello and welcome! Say anything to get started.".to_string(),
            };
            ctx.send_text(greeting, None, None).await?;
        }
        Ok(())
    }
}
