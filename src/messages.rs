//! Message types exchanged between the control surface and a page runtime

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::settings::StoredSettings;

/// What the sender wants the page to do
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageAction {
    /// Popup toggle button
    ToggleBlur,
    /// Any settings panel change
    UpdateSettings,
}

/// Request sent to a page runtime
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub action: MessageAction,
    /// Fields to merge into the page's settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<StoredSettings>,
}

impl Message {
    pub fn toggle_blur(is_blur: bool) -> Self {
        Self {
            action: MessageAction::ToggleBlur,
            settings: Some(StoredSettings {
                is_blur: Some(is_blur),
                ..StoredSettings::default()
            }),
        }
    }

    pub fn update_settings(patch: StoredSettings) -> Self {
        Self {
            action: MessageAction::UpdateSettings,
            settings: Some(patch),
        }
    }

    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse message JSON")
    }
}

/// Reply from a page runtime
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}
