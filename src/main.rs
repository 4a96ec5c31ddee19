#![forbid(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use blur_focus::constants::config;
use blur_focus::control::{ControlSurface, Delivery};
use blur_focus::simulate::{load_page, load_script, run_simulation};
use blur_focus::site_rules::{first_match, PageLocation};
use blur_focus::store::{load_settings, JsonFileStore, SettingsStore};
use cli::{Cli, Commands, SettingsAction};

fn init_logging() -> Result<()> {
    let log_level = match std::env::var(config::LOG_LEVEL_ENV)
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    // stdout carries command output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}

async fn run_settings(store: Arc<dyn SettingsStore>, action: SettingsAction) -> Result<()> {
    let mut control = ControlSurface::load(store, None).await?;
    let delivery = match action {
        SettingsAction::Show => None,
        SettingsAction::Toggle => Some(control.toggle().await?),
        SettingsAction::Intensity { px } => Some(control.set_intensity(px).await?),
        SettingsAction::Element { tag } => Some(control.toggle_element(&tag).await?),
        SettingsAction::AddSite { pattern } => Some(control.add_site_rule(&pattern).await?),
        SettingsAction::RemoveSite { index } => Some(control.remove_site_rule(index).await?),
        SettingsAction::ToggleSite { index } => Some(control.toggle_site_rule(index).await?),
        SettingsAction::AddCurrentSite { url } => Some(control.add_current_site(&url).await?),
    };
    if let Some(Delivery::NoRecipient) = delivery {
        debug!("Saved without a page to notify");
    }
    print_json(&control.settings().to_stored())
}

async fn run_check(store: Arc<dyn SettingsStore>, url: &str) -> Result<()> {
    let settings = load_settings(store.as_ref()).await?;
    let location = PageLocation::parse(url);
    let matched = first_match(&settings.site_rules, &location.url, &location.host);
    let enabled = matched.is_none_or(|index| settings.site_rules[index].enabled);

    print_json(&json!({
        "url": location.url,
        "host": location.host,
        "enabled": enabled,
        "matchedRule": matched.map(|index| json!({
            "index": index,
            "pattern": settings.site_rules[index].pattern,
            "enabled": settings.site_rules[index].enabled,
        })),
    }))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let file_store = JsonFileStore::resolve(cli.store);
    info!(path = %file_store.path().display(), "Using settings store");
    let store: Arc<dyn SettingsStore> = Arc::new(file_store);

    match cli.command {
        Commands::Settings { action } => run_settings(store, action).await,
        Commands::Check { url } => run_check(store, &url).await,
        Commands::Simulate { page, script, url } => {
            let page = load_page(&page).await?;
            let steps = load_script(&script).await?;
            let snapshots = run_simulation(store, &url, &page, &steps).await?;
            print_json(&snapshots)
        }
    }
}
