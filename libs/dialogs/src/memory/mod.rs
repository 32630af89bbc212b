//! Path-addressed access to everything a dialog can remember.

pub mod object_path;
mod scopes;
mod state_manager;

pub use object_path::{PathSegment, get_path_value, parse_path, remove_path_value, set_path_value};
pub use scopes::{
    BotStateMemoryScope, DialogContextMemoryScope, DialogMemoryScope, MemoryScope, SETTINGS_KEY,
    SettingsMemoryScope, ThisMemoryScope, TurnMemoryScope, names,
};
pub use state_manager::{DialogStateManager, PathResolver};
