//! Multi-turn conversations for Bot Framework bots.
//!
//! A [`DialogSet`] names the dialogs a bot can run and a [`DialogContext`]
//! drives the persisted stack of running ones for a single turn. Waterfalls,
//! prompts and component dialogs are the building blocks; the
//! [`DialogManager`] wires a root dialog to conversation and user state.
pub mod choices;
pub mod component;
pub mod dialog;
pub mod dialog_context;
pub mod dialog_set;
pub mod error;
pub mod manager;
pub mod memory;
pub mod prompts;
pub mod recognizers;
pub mod waterfall;

pub use component::ComponentDialog;
pub use dialog::{
    Dialog, DialogContainer, DialogEvent, DialogInstance, DialogReason, DialogState,
    DialogTurnResult, DialogTurnStatus,
};
pub use dialog_context::DialogContext;
pub use dialog_set::DialogSet;
pub use error::DialogError;
pub use manager::{DialogManager, DialogManagerResult, run_dialog};
pub use memory::DialogStateManager;
pub use prompts::{
    ActivityPrompt, AttachmentPrompt, ChoicePrompt, ConfirmPrompt, NumberPrompt, OAuthPrompt,
    OAuthPromptSettings, PromptOptions, PromptValidator, PromptValidatorContext, TextPrompt,
    prompt_validator,
};
pub use waterfall::{WaterfallDialog, WaterfallStepContext};
