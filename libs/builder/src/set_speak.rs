use anyhow::Result;
use async_trait::async_trait;
use bot_schema::{Activity, ActivityTypes, channels};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::middleware::{Middleware, Next};
use crate::turn_context::TurnContext;

static SPEAK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*speak\b").expect("valid speak regex"));
static VOICE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*voice\b").expect("valid voice regex"));

const DEFAULT_LOCALE: &str = "en-US";

/// Fills in `speak` on outgoing messages and, on speech channels, wraps it
/// in SSML with the configured voice.
///
/// Speak text that already carries a `<speak>` element is left alone; one
/// that carries a `<voice>` element only gets the outer `<speak>`.
#[derive(Debug, Clone, Default)]
pub struct SetSpeakMiddleware {
    voice_name: Option<String>,
    fallback_to_text_for_speak: bool,
}

impl SetSpeakMiddleware {
    pub fn new(voice_name: Option<&str>, fallback_to_text_for_speak: bool) -> Self {
        Self {
            voice_name: voice_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            fallback_to_text_for_speak,
        }
    }

    fn apply(&self, channel_id: &str, activity: &mut Activity) {
        if !activity.is_type(&ActivityTypes::Message) {
            return;
        }
        let blank_speak = activity.speak.as_deref().is_none_or(|speak| speak.trim().is_empty());
        if self.fallback_to_text_for_speak && blank_speak {
            activity.speak = activity.text.clone();
        }

        let Some(voice) = self.voice_name.as_deref() else {
            return;
        };
        if !is_speech_channel(channel_id) {
            return;
        }
        let Some(speak) = activity.speak.as_deref().filter(|speak| !speak.trim().is_empty()) else {
            return;
        };
        if SPEAK_TAG.is_match(speak) {
            return;
        }

        let voiced = if VOICE_TAG.is_match(speak) {
            speak.to_string()
        } else {
            format!("<voice name='{voice}'>{speak}</voice>")
        };
        let locale = activity.locale.as_deref().unwrap_or(DEFAULT_LOCALE);
        activity.speak = Some(format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{locale}'>{voiced}</speak>"
        ));
    }
}

fn is_speech_channel(channel_id: &str) -> bool {
    [channels::DIRECTLINE_SPEECH, channels::EMULATOR, channels::TELEPHONY]
        .iter()
        .any(|channel| channel.eq_ignore_ascii_case(channel_id))
}

#[async_trait]
impl Middleware for SetSpeakMiddleware {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        let speak = self.clone();
        let channel_id = ctx.activity().channel_id.clone().unwrap_or_default();
        ctx.on_send_activities(move |_ctx, mut activities, next| {
            for activity in &mut activities {
                speak.apply(&channel_id, activity);
            }
            next.run(activities)
        });
        next.run(ctx).await
    }
}
