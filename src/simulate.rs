//! Scripted page sessions
//!
//! Replays pointer, keyboard, mutation and message events against a page
//! runtime. Elements are addressed by their `id` attribute; `body` names the
//! document body.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dom::{Document, NodeId, PageNode};
use crate::hotkeys::KeyEvent;
use crate::hover::PointerEvent;
use crate::runtime::{PageEvent, PageRuntime, PageSnapshot, Phase};
use crate::site_rules::PageLocation;
use crate::store::SettingsStore;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum ScriptStep {
    /// Pointer enters `target`
    Enter { target: String },
    /// Pointer leaves `target`, moving onto `related` (or off the page)
    Leave {
        target: String,
        #[serde(default)]
        related: Option<String>,
    },
    /// Append `node` under `parent`
    Insert { parent: String, node: PageNode },
    Remove { target: String },
    /// Deliver pending insertion records
    Flush,
    Key(KeyEvent),
    /// Raw message payload, delivered as-is
    Message { message: Value },
    /// Wait for outstanding store writes
    Settle,
    Snapshot {
        #[serde(default)]
        label: Option<String>,
    },
}

pub async fn load_page(path: &Path) -> Result<PageNode> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read page description from {:?}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse page description from {:?}", path))
}

pub async fn load_script(path: &Path) -> Result<Vec<ScriptStep>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read script from {:?}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse script from {:?}", path))
}

fn resolve(doc: &Document, name: &str) -> Result<NodeId> {
    if name == "body" {
        return Ok(doc.body());
    }
    doc.element_by_id(name)
        .ok_or_else(|| anyhow!("No element with id {name:?} on the page"))
}

/// Load a page at `url`, replay `steps`, then unload it
///
/// Returns one snapshot per `snapshot` step.
pub async fn run_simulation(
    store: Arc<dyn SettingsStore>,
    url: &str,
    page: &PageNode,
    steps: &[ScriptStep],
) -> Result<Vec<PageSnapshot>> {
    let doc = Document::from_page(page).context("Failed to build page")?;
    let (mut runtime, _handle, mut rx) = PageRuntime::new(PageLocation::parse(url), doc, store);
    let phase = runtime.init().await;
    info!(phase = ?phase, url, steps = steps.len(), "Running script");

    let snapshots = run_script(&mut runtime, &mut rx, steps).await?;

    runtime.settle(&mut rx).await;
    runtime.handle_event(PageEvent::Unload);
    Ok(snapshots)
}

/// Replay `steps` against an initialized runtime
pub async fn run_script(
    runtime: &mut PageRuntime,
    rx: &mut mpsc::UnboundedReceiver<PageEvent>,
    steps: &[ScriptStep],
) -> Result<Vec<PageSnapshot>> {
    if runtime.phase() == Phase::Uninitialized {
        runtime.init().await;
    }

    let mut snapshots = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        debug!(index, step = ?step, "Script step");
        match step {
            ScriptStep::Enter { target } => {
                let target = resolve(runtime.document(), target)?;
                runtime.handle_event(PageEvent::Pointer(PointerEvent::Enter { target }));
            }
            ScriptStep::Leave { target, related } => {
                let target = resolve(runtime.document(), target)?;
                let related = related
                    .as_deref()
                    .map(|name| resolve(runtime.document(), name))
                    .transpose()?;
                runtime.handle_event(PageEvent::Pointer(PointerEvent::Leave { target, related }));
            }
            ScriptStep::Insert { parent, node } => {
                let parent = resolve(runtime.document(), parent)?;
                runtime
                    .document_mut()
                    .build(parent, node)
                    .with_context(|| format!("Step {index}: insert failed"))?;
            }
            ScriptStep::Remove { target } => {
                let target = resolve(runtime.document(), target)?;
                runtime
                    .document_mut()
                    .remove(target)
                    .with_context(|| format!("Step {index}: remove failed"))?;
            }
            ScriptStep::Flush => {
                let count = runtime.queue_mutations();
                debug!(count, "Flushing insertion records");
                runtime.pump(rx);
            }
            ScriptStep::Key(key) => {
                runtime.handle_event(PageEvent::Key(key.clone()));
            }
            ScriptStep::Message { message } => match runtime.handle_message(message.clone()) {
                Some(response) => info!(success = response.success, error = ?response.error, "Message handled"),
                None => info!("Message had no recipient"),
            },
            ScriptStep::Settle => {
                runtime.settle(rx).await;
            }
            ScriptStep::Snapshot { label } => {
                runtime.pump(rx);
                snapshots.push(runtime.snapshot(label.clone()));
            }
        }
    }
    Ok(snapshots)
}
