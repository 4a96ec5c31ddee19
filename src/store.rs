//! Persistent key-value store for settings
//!
//! Two backends share one async interface: a JSON file under the user's
//! config directory (used by the CLI) and an in-memory map with failure
//! injection (used by tests and simulations).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::settings::{Settings, SettingsKey, StoredSettings};

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the requested keys (all keys for `None`); absent keys stay `None`
    async fn get(&self, keys: Option<&[SettingsKey]>) -> Result<StoredSettings>;

    /// Write the present fields, leaving other keys untouched
    async fn set(&self, fields: StoredSettings) -> Result<()>;
}

/// Read every key and default whatever is missing
pub async fn load_settings(store: &dyn SettingsStore) -> Result<Settings> {
    let stored = store.get(None).await.context("Failed to read settings from store")?;
    Ok(Settings::from_stored(&stored))
}

fn restrict(stored: StoredSettings, keys: Option<&[SettingsKey]>) -> StoredSettings {
    match keys {
        Some(keys) => stored.restrict(keys),
        None => stored,
    }
}

/// Settings kept in a JSON object on disk
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// `<config dir>/blur-focus/settings.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::FILENAME);
        path
    }

    /// Explicit path, else the environment override, else the default path
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let path = explicit
            .or_else(|| std::env::var_os(crate::constants::config::STORE_ENV).map(PathBuf::from))
            .unwrap_or_else(Self::default_path);
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<Map<String, Value>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Settings file not found, using defaults");
                return Ok(Map::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings from {:?}", self.path));
            }
        };

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON from {:?}", self.path))?;
        match value {
            Value::Object(map) => Ok(map),
            other => bail!("Settings file {:?} holds {} instead of an object", self.path, json_kind(&other)),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn get(&self, keys: Option<&[SettingsKey]>) -> Result<StoredSettings> {
        let map = self.read_map().await?;
        Ok(restrict(StoredSettings::from_map(&map), keys))
    }

    async fn set(&self, fields: StoredSettings) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // Unknown keys written by other tools survive the merge
        let mut map = self.read_map().await?;
        map.extend(fields.to_map());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(&Value::Object(map))
            .context("Failed to serialize settings to JSON")?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write settings to {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to move settings into place at {:?}", self.path))?;

        info!(path = %self.path.display(), "Saved settings");
        Ok(())
    }
}

/// In-memory store with switchable failures
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<Map<String, Value>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(initial: StoredSettings) -> Self {
        Self {
            map: Mutex::new(initial.to_map()),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Result<StoredSettings> {
        let map = self.map.lock().map_err(|_| anyhow!("Settings map lock poisoned"))?;
        Ok(StoredSettings::from_map(&map))
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, keys: Option<&[SettingsKey]>) -> Result<StoredSettings> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("Simulated store read failure");
        }
        Ok(restrict(self.snapshot()?, keys))
    }

    async fn set(&self, fields: StoredSettings) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("Simulated store write failure");
        }
        let mut map = self.map.lock().map_err(|_| anyhow!("Settings map lock poisoned"))?;
        map.extend(fields.to_map());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
