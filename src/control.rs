//! Settings control surface
//!
//! Popup and settings-panel behavior without any rendering: every edit is
//! written to the store first and then announced to the active page. A
//! failed write restores the previous local state and nothing is sent.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::messages::{Message, MessageResponse};
use crate::runtime::PageHandle;
use crate::settings::{clamp_intensity, Settings, SiteRule, StoredSettings};
use crate::site_rules::PageLocation;
use crate::store::{load_settings, SettingsStore};

/// What happened to the notification sent after a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered(MessageResponse),
    /// No page, or no runtime listening on it
    NoRecipient,
}

pub struct ControlSurface {
    store: Arc<dyn SettingsStore>,
    page: Option<PageHandle>,
    settings: Settings,
    last_error: Option<String>,
}

impl ControlSurface {
    pub async fn load(store: Arc<dyn SettingsStore>, page: Option<PageHandle>) -> Result<Self> {
        let settings = load_settings(store.as_ref()).await.map_err(|e| {
            error!(error = ?e, "Failed to load settings");
            e
        })?;
        debug!(settings = ?settings, "Control surface loaded");
        Ok(Self {
            store,
            page,
            settings,
            last_error: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// User-facing message from the last failed save
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Flip `isBlur` immediately, persist, then notify the page
    pub async fn toggle(&mut self) -> Result<Delivery> {
        let enabled = !self.settings.blur_enabled;
        let message = Message::toggle_blur(enabled);
        let patch = message.settings.clone().unwrap_or_default();
        self.commit(patch).await?;
        info!(blur_enabled = enabled, "Blur toggled");
        self.notify(&message).await
    }

    pub async fn set_intensity(&mut self, px: i64) -> Result<Delivery> {
        let px = clamp_intensity(px);
        self.apply_change(StoredSettings {
            blur_intensity: Some(i64::from(px)),
            ..StoredSettings::default()
        })
        .await
    }

    /// Add `tag` to the target set, or remove it when present
    pub async fn toggle_element(&mut self, tag: &str) -> Result<Delivery> {
        let tags = self.settings.toggle_target_element(tag);
        self.apply_change(StoredSettings {
            target_elements: Some(tags),
            ..StoredSettings::default()
        })
        .await
    }

    pub async fn add_site_rule(&mut self, pattern: &str) -> Result<Delivery> {
        let rules = self
            .settings
            .add_site_rule(pattern)
            .ok_or_else(|| anyhow!("Site pattern must not be empty"))?;
        self.save_site_list(rules).await
    }

    pub async fn remove_site_rule(&mut self, index: usize) -> Result<Delivery> {
        let rules = self
            .settings
            .remove_site_rule(index)
            .ok_or_else(|| anyhow!("No site rule at index {index}"))?;
        self.save_site_list(rules).await
    }

    pub async fn toggle_site_rule(&mut self, index: usize) -> Result<Delivery> {
        let rules = self
            .settings
            .toggle_site_rule(index)
            .ok_or_else(|| anyhow!("No site rule at index {index}"))?;
        self.save_site_list(rules).await
    }

    /// Add an enabled rule for the host of `url`
    pub async fn add_current_site(&mut self, url: &str) -> Result<Delivery> {
        let location = PageLocation::parse(url);
        if location.host.is_empty() {
            return Err(anyhow!("Cannot derive a host name from {url:?}"));
        }
        self.add_site_rule(&location.host).await
    }

    async fn save_site_list(&mut self, rules: Vec<SiteRule>) -> Result<Delivery> {
        self.apply_change(StoredSettings {
            site_list: Some(rules),
            ..StoredSettings::default()
        })
        .await
    }

    /// Persist `patch` and forward it to the page as an update
    pub async fn apply_change(&mut self, patch: StoredSettings) -> Result<Delivery> {
        if patch.is_empty() {
            debug!("Empty settings change, nothing to save");
            return Ok(Delivery::NoRecipient);
        }
        self.commit(patch.clone()).await?;
        info!(fields = ?patch, "Settings saved");
        self.notify(&Message::update_settings(patch)).await
    }

    async fn commit(&mut self, patch: StoredSettings) -> Result<()> {
        let previous = self.settings.clone();
        self.settings = self.settings.merge(&patch);

        if let Err(e) = self.store.set(patch).await {
            error!(error = ?e, "Failed to save settings, restoring previous values");
            self.settings = previous;
            self.last_error = Some("Failed to save settings".to_string());
            return Err(e.context("Failed to save settings"));
        }
        self.last_error = None;
        Ok(())
    }

    /// Send `message` to the page; a missing recipient is not an error
    pub async fn notify(&self, message: &Message) -> Result<Delivery> {
        let Some(page) = &self.page else {
            debug!("No active page to notify");
            return Ok(Delivery::NoRecipient);
        };
        match page.send_message(message).await? {
            Some(response) => {
                if !response.success {
                    debug!(error = ?response.error, "Page rejected settings update");
                }
                Ok(Delivery::Delivered(response))
            }
            None => {
                debug!("Content script not available on the page");
                Ok(Delivery::NoRecipient)
            }
        }
    }
}
