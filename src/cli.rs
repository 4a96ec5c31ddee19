//! Command line definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blur-focus")]
#[command(about = "Blur page text until the pointer reveals it")]
#[command(version)]
pub(crate) struct Cli {
    /// Settings file (defaults to $BLUR_FOCUS_STORE, then the user config dir)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Inspect or edit stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Evaluate the site rules for a URL
    Check {
        url: String,
    },

    /// Replay an event script against a page description
    Simulate {
        /// Page description (JSON)
        #[arg(long)]
        page: PathBuf,

        /// Event script (JSON array of steps)
        #[arg(long)]
        script: PathBuf,

        /// Location the page is loaded from
        #[arg(long, default_value = "https://example.com/")]
        url: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum SettingsAction {
    /// Print the effective settings
    Show,

    /// Turn blurring on or off
    Toggle,

    /// Set the blur radius in pixels (clamped to 2..=15)
    Intensity {
        #[arg(allow_negative_numbers = true)]
        px: i64,
    },

    /// Add or remove a tag name from the blurred elements
    Element {
        tag: String,
    },

    /// Append an enabled site rule
    AddSite {
        pattern: String,
    },

    /// Delete the site rule at an index
    RemoveSite {
        index: usize,
    },

    /// Flip the site rule at an index
    ToggleSite {
        index: usize,
    },

    /// Append an enabled rule for the host of a URL
    AddCurrentSite {
        url: String,
    },
}
