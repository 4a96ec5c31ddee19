use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::shortcut;

/// Key press captured at the document level
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyEvent {
    /// `KeyboardEvent.key`
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    /// Cmd on macOS
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
}

impl KeyEvent {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutCommand {
    ToggleBlur,
}

/// Recognize Ctrl/Cmd + Shift + toggle key
pub fn match_shortcut(event: &KeyEvent) -> Option<ShortcutCommand> {
    let mut chars = event.key.chars();
    let is_toggle_key = match (chars.next(), chars.next()) {
        (Some(c), None) => c.eq_ignore_ascii_case(&shortcut::TOGGLE_KEY),
        _ => false,
    };

    if (event.ctrl || event.meta) && event.shift && is_toggle_key {
        debug!(key = %event.key, ctrl = event.ctrl, meta = event.meta, "Toggle shortcut pressed");
        Some(ShortcutCommand::ToggleBlur)
    } else {
        None
    }
}
