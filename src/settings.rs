//! Blur settings data model
//!
//! `StoredSettings` mirrors the persistent store schema (every key optional,
//! camelCase). `Settings` is the fully defaulted, validated form the runtime
//! works with. Updates always replace whole fields; list edits return new
//! vectors instead of mutating one a reader may hold.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::warn;

use crate::constants::settings::{
    DEFAULT_INTENSITY, DEFAULT_TARGET_ELEMENTS, MAX_INTENSITY, MIN_INTENSITY,
};
use crate::constants::store_keys;

/// Ordered pattern + enabled pair deciding whether blurring applies to a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRule {
    pub pattern: String,
    pub enabled: bool,
}

impl SiteRule {
    pub fn new(pattern: impl Into<String>, enabled: bool) -> Self {
        Self {
            pattern: pattern.into(),
            enabled,
        }
    }
}

/// Top-level store keys, used to request a subset of fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsKey {
    IsBlur,
    BlurIntensity,
    TargetElements,
    SiteList,
}

/// Partial settings in store schema form
///
/// Used for store reads/writes and as the `settings` payload of update
/// messages. Deserialization is lenient: a malformed field is dropped with a
/// warning and later defaulted, it never fails the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Map<String, Value>")]
pub struct StoredSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_blur: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur_intensity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_elements: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_list: Option<Vec<SiteRule>>,
}

impl From<Map<String, Value>> for StoredSettings {
    fn from(map: Map<String, Value>) -> Self {
        Self::from_map(&map)
    }
}

impl StoredSettings {
    /// Parse each known key independently, skipping malformed values
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut stored = StoredSettings::default();

        if let Some(value) = map.get(store_keys::IS_BLUR) {
            match value.as_bool() {
                Some(flag) => stored.is_blur = Some(flag),
                None => warn!(key = store_keys::IS_BLUR, value = %value, "Malformed setting, using default"),
            }
        }

        if let Some(value) = map.get(store_keys::BLUR_INTENSITY) {
            // JSON numbers coming from a slider may be floats
            let parsed = value
                .as_i64()
                .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64));
            match parsed {
                Some(px) => stored.blur_intensity = Some(px),
                None => warn!(key = store_keys::BLUR_INTENSITY, value = %value, "Malformed setting, using default"),
            }
        }

        if let Some(value) = map.get(store_keys::TARGET_ELEMENTS) {
            match serde_json::from_value::<Vec<String>>(value.clone()) {
                Ok(tags) => stored.target_elements = Some(tags),
                Err(e) => warn!(key = store_keys::TARGET_ELEMENTS, error = %e, "Malformed setting, using default"),
            }
        }

        if let Some(value) = map.get(store_keys::SITE_LIST) {
            match serde_json::from_value::<Vec<SiteRule>>(value.clone()) {
                Ok(rules) => stored.site_list = Some(rules),
                Err(e) => warn!(key = store_keys::SITE_LIST, error = %e, "Malformed setting, using default"),
            }
        }

        stored
    }

    /// Serialize into a JSON object holding only the present keys
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Keep only the requested keys
    pub fn restrict(mut self, keys: &[SettingsKey]) -> Self {
        if !keys.contains(&SettingsKey::IsBlur) {
            self.is_blur = None;
        }
        if !keys.contains(&SettingsKey::BlurIntensity) {
            self.blur_intensity = None;
        }
        if !keys.contains(&SettingsKey::TargetElements) {
            self.target_elements = None;
        }
        if !keys.contains(&SettingsKey::SiteList) {
            self.site_list = None;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.is_blur.is_none()
            && self.blur_intensity.is_none()
            && self.target_elements.is_none()
            && self.site_list.is_none()
    }
}

/// Fully defaulted blur settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub blur_enabled: bool,
    pub blur_intensity: u8,
    /// Tag names, insertion order preserved, no duplicates
    pub target_elements: Vec<String>,
    pub site_rules: Vec<SiteRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blur_enabled: false,
            blur_intensity: DEFAULT_INTENSITY,
            target_elements: DEFAULT_TARGET_ELEMENTS.iter().map(|t| t.to_string()).collect(),
            site_rules: Vec::new(),
        }
    }
}

impl Settings {
    /// Build settings from a store read, defaulting every absent key
    pub fn from_stored(stored: &StoredSettings) -> Self {
        Settings::default().merge(stored)
    }

    /// Shallow merge: each present field replaces the current one wholesale
    pub fn merge(&self, patch: &StoredSettings) -> Self {
        let mut merged = self.clone();

        if let Some(flag) = patch.is_blur {
            merged.blur_enabled = flag;
        }
        if let Some(px) = patch.blur_intensity {
            merged.blur_intensity = clamp_intensity(px);
        }
        if let Some(tags) = &patch.target_elements {
            merged.target_elements = normalize_tags(tags);
        }
        if let Some(rules) = &patch.site_list {
            merged.site_rules = rules.clone();
        }

        merged
    }

    /// Full store representation
    pub fn to_stored(&self) -> StoredSettings {
        StoredSettings {
            is_blur: Some(self.blur_enabled),
            blur_intensity: Some(i64::from(self.blur_intensity)),
            target_elements: Some(self.target_elements.clone()),
            site_list: Some(self.site_rules.clone()),
        }
    }

    pub fn target_selector(&self) -> TargetSelector {
        TargetSelector::new(&self.target_elements)
    }

    /// Target list with `tag` added (appended) or removed
    pub fn toggle_target_element(&self, tag: &str) -> Vec<String> {
        let tag = tag.trim().to_ascii_lowercase();
        if self.target_elements.contains(&tag) {
            self.target_elements.iter().filter(|t| **t != tag).cloned().collect()
        } else if tag.is_empty() {
            self.target_elements.clone()
        } else {
            let mut tags = self.target_elements.clone();
            tags.push(tag);
            tags
        }
    }

    /// Rule list with a new enabled rule appended; `None` for a blank pattern
    pub fn add_site_rule(&self, pattern: &str) -> Option<Vec<SiteRule>> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }
        let mut rules = self.site_rules.clone();
        rules.push(SiteRule::new(pattern, true));
        Some(rules)
    }

    /// Rule list without the rule at `index`; `None` when out of range
    pub fn remove_site_rule(&self, index: usize) -> Option<Vec<SiteRule>> {
        if index >= self.site_rules.len() {
            return None;
        }
        let mut rules = self.site_rules.clone();
        rules.remove(index);
        Some(rules)
    }

    /// Rule list with the rule at `index` flipped; `None` when out of range
    pub fn toggle_site_rule(&self, index: usize) -> Option<Vec<SiteRule>> {
        let mut rules = self.site_rules.clone();
        let rule = rules.get_mut(index)?;
        rule.enabled = !rule.enabled;
        Some(rules)
    }
}

/// Clamp a raw intensity into the accepted range
pub fn clamp_intensity(px: i64) -> u8 {
    let clamped = px.clamp(i64::from(MIN_INTENSITY), i64::from(MAX_INTENSITY));
    if clamped != px {
        warn!(blur_intensity = px, min = MIN_INTENSITY, max = MAX_INTENSITY, "blurIntensity out of range, clamping");
    }
    // In range by construction
    clamped as u8
}

/// Trim, lower-case and dedupe tag names, keeping first occurrences in order
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_ascii_lowercase();
        if tag.is_empty() {
            warn!("Ignoring empty target element name");
            continue;
        }
        if seen.insert(tag.clone()) {
            normalized.push(tag);
        }
    }
    normalized
}

/// Tag-name membership test built from the target element set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSelector {
    tags: BTreeSet<String>,
}

impl TargetSelector {
    pub fn new<S: AsRef<str>>(tags: &[S]) -> Self {
        Self {
            tags: tags
                .iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// CSS selector list equivalent (`h1,p,span`)
    pub fn to_css(&self) -> String {
        self.tags.iter().map(String::as_str).collect::<Vec<_>>().join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(value: Value) -> StoredSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_for_empty_store() {
        let settings = Settings::from_stored(&StoredSettings::default());
        assert!(!settings.blur_enabled);
        assert_eq!(settings.blur_intensity, 5);
        assert_eq!(settings.target_elements.len(), 13);
        assert_eq!(settings.target_elements[0], "h1");
        assert_eq!(settings.target_elements[12], "code");
        assert!(settings.site_rules.is_empty());
    }

    #[test]
    fn test_malformed_fields_fall_back_to_defaults() {
        let raw = stored(json!({
            "isBlur": "yes",
            "blurIntensity": 9,
            "targetElements": 42,
            "siteList": [{"pattern": "a.com"}]
        }));
        assert_eq!(raw.is_blur, None);
        assert_eq!(raw.blur_intensity, Some(9));
        assert_eq!(raw.target_elements, None);
        assert_eq!(raw.site_list, None);

        let settings = Settings::from_stored(&raw);
        assert!(!settings.blur_enabled);
        assert_eq!(settings.blur_intensity, 9);
        assert_eq!(settings.target_elements.len(), 13);
    }

    #[test]
    fn test_intensity_is_clamped() {
        let low = Settings::from_stored(&stored(json!({"blurIntensity": 0})));
        assert_eq!(low.blur_intensity, 2);
        let high = Settings::from_stored(&stored(json!({"blurIntensity": 99})));
        assert_eq!(high.blur_intensity, 15);
        let float = Settings::from_stored(&stored(json!({"blurIntensity": 7.6})));
        assert_eq!(float.blur_intensity, 8);
    }

    #[test]
    fn test_target_elements_deduped_in_order() {
        let settings = Settings::from_stored(&stored(json!({
            "targetElements": ["P", "span", "p", " ", "a"]
        })));
        assert_eq!(settings.target_elements, vec!["p", "span", "a"]);
    }

    #[test]
    fn test_merge_replaces_site_list_wholesale() {
        let base = Settings::from_stored(&stored(json!({
            "isBlur": true,
            "siteList": [{"pattern": "a.com", "enabled": false}, {"pattern": "b.com", "enabled": true}]
        })));
        let patch = stored(json!({"siteList": [{"pattern": "c.com", "enabled": true}]}));
        let merged = base.merge(&patch);
        assert_eq!(merged.site_rules, vec![SiteRule::new("c.com", true)]);
        assert!(merged.blur_enabled);
        // The original is untouched
        assert_eq!(base.site_rules.len(), 2);
    }

    #[test]
    fn test_site_rule_edits_are_copy_on_write() {
        let settings = Settings {
            site_rules: vec![SiteRule::new("a.com", true)],
            ..Settings::default()
        };

        let toggled = settings.toggle_site_rule(0).unwrap();
        assert!(!toggled[0].enabled);
        assert!(settings.site_rules[0].enabled);

        assert_eq!(settings.add_site_rule("   "), None);
        let added = settings.add_site_rule(" docs.rs ").unwrap();
        assert_eq!(added[1], SiteRule::new("docs.rs", true));

        assert_eq!(settings.remove_site_rule(3), None);
        assert!(settings.remove_site_rule(0).unwrap().is_empty());
        assert_eq!(settings.toggle_site_rule(5), None);
    }

    #[test]
    fn test_toggle_target_element() {
        let settings = Settings {
            target_elements: vec!["p".into(), "a".into()],
            ..Settings::default()
        };
        assert_eq!(settings.toggle_target_element("P"), vec!["a"]);
        assert_eq!(settings.toggle_target_element("li"), vec!["p", "a", "li"]);
    }

    #[test]
    fn test_stored_round_trip_skips_absent_keys() {
        let patch = StoredSettings {
            is_blur: Some(true),
            ..StoredSettings::default()
        };
        let map = patch.to_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("isBlur"), Some(&json!(true)));
    }

    #[test]
    fn test_restrict_keys() {
        let full = Settings::default().to_stored();
        let only = full.restrict(&[SettingsKey::IsBlur]);
        assert_eq!(only.is_blur, Some(false));
        assert!(only.blur_intensity.is_none());
        assert!(only.site_list.is_none());
    }

    #[test]
    fn test_target_selector_matching() {
        let selector = TargetSelector::new(&["P", "span"]);
        assert!(selector.matches("p"));
        assert!(selector.matches("SPAN"));
        assert!(!selector.matches("div"));
        assert_eq!(selector.to_css(), "p,span");
        assert!(TargetSelector::new::<&str>(&[]).is_empty());
    }
}
