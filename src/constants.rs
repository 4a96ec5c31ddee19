//! Application-wide constants
//!
//! Class names, bounds, defaults and file locations shared across modules.

/// Stylesheet vocabulary shared by the style controller and snapshots
pub mod style {
    /// Id of the single `<style>` block the runtime installs
    pub const STYLE_ID: &str = "blur-focus-styles";

    /// Class carried by every blur target
    pub const BLUR_CLASS: &str = "blur-focus-element";

    /// Class carried by blur targets that are temporarily revealed
    pub const HOVER_CLASS: &str = "blur-focus-hover";

    /// Duration of the filter transition
    pub const TRANSITION: &str = "filter 0.2s ease";
}

/// Settings bounds and defaults
pub mod settings {
    /// Smallest accepted blur radius in pixels
    pub const MIN_INTENSITY: u8 = 2;

    /// Largest accepted blur radius in pixels
    pub const MAX_INTENSITY: u8 = 15;

    /// Blur radius used when none is stored
    pub const DEFAULT_INTENSITY: u8 = 5;

    /// Text-bearing tags blurred out of the box
    pub const DEFAULT_TARGET_ELEMENTS: [&str; 13] = [
        "h1", "h2", "h3", "h4", "h5", "h6", "p", "a", "span", "ul", "li", "label", "code",
    ];
}

/// Keys of the persistent store schema
pub mod store_keys {
    pub const IS_BLUR: &str = "isBlur";
    pub const BLUR_INTENSITY: &str = "blurIntensity";
    pub const TARGET_ELEMENTS: &str = "targetElements";
    pub const SITE_LIST: &str = "siteList";
}

/// Keyboard shortcut (Ctrl/Cmd + Shift + key)
pub mod shortcut {
    /// Letter that toggles blurring, compared case-insensitively
    pub const TOGGLE_KEY: char = 'f';
}

/// Config file locations
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "blur-focus";

    /// Settings file name
    pub const FILENAME: &str = "settings.json";

    /// Environment variable overriding the settings file path
    pub const STORE_ENV: &str = "BLUR_FOCUS_STORE";

    /// Environment variable selecting the log level
    pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
}
