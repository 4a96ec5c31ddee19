//! Page runtime
//!
//! One runtime per page load. It owns the document handle, the style
//! controller, the hover coordinator and the mutation watcher, and drives
//! them from a single event channel. Every event runs to completion before
//! the next one is taken. Store writes run as spawned tasks and report back
//! through the same channel, so the page keeps handling events while a write
//! is in flight and completions may arrive in any order.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dom::{Document, ListenerKind, MutationBatch, NodeId};
use crate::hotkeys::{match_shortcut, KeyEvent, ShortcutCommand};
use crate::hover::{HoverCoordinator, PointerEvent};
use crate::messages::{Message, MessageResponse};
use crate::mutation::MutationWatcher;
use crate::settings::{Settings, StoredSettings, TargetSelector};
use crate::site_rules::{is_site_enabled, PageLocation};
use crate::store::{load_settings, SettingsStore};
use crate::style::StyleController;

/// Why a runtime stopped reacting for the rest of the page load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InertReason {
    /// A site rule disabled blurring when the page loaded
    SiteExcluded,
    /// Settings could not be read when the page loaded
    LoadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "phase", content = "reason")]
pub enum Phase {
    Uninitialized,
    Loading,
    Disabled,
    Active,
    /// No listeners registered; a reload is needed to re-evaluate
    Inert(InertReason),
}

#[derive(Debug)]
pub enum PageEvent {
    Pointer(PointerEvent),
    Key(KeyEvent),
    /// Insertion records handed over by the document
    Mutations(Vec<MutationBatch>),
    /// Cross-surface message; the reply is dropped when nothing listens
    Message {
        payload: Value,
        reply: Option<oneshot::Sender<MessageResponse>>,
    },
    /// A spawned `isBlur` write finished
    PersistDone {
        seq: u64,
        previous: bool,
        result: Result<()>,
    },
    Unload,
}

/// Sending side of a page's event channel
#[derive(Debug, Clone)]
pub struct PageHandle {
    tx: mpsc::UnboundedSender<PageEvent>,
}

impl PageHandle {
    /// Queue an event; false when the page is gone
    pub fn send(&self, event: PageEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Deliver `message` and wait for the reply
    ///
    /// `Ok(None)` means no runtime was listening on the page.
    pub async fn send_message(&self, message: &Message) -> Result<Option<MessageResponse>> {
        let payload = serde_json::to_value(message).context("Failed to serialize message")?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.send(PageEvent::Message {
            payload,
            reply: Some(reply_tx),
        }) {
            debug!("Page runtime gone, message not delivered");
            return Ok(None);
        }
        match reply_rx.await {
            Ok(response) => Ok(Some(response)),
            Err(_) => {
                debug!("No message listener on the page");
                Ok(None)
            }
        }
    }
}

/// Observable state of a page, for logs, tests and the simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub phase: Phase,
    pub blur_enabled: bool,
    pub blur_intensity: u8,
    pub stylesheets: usize,
    pub root_listeners: usize,
    pub marked: Vec<String>,
    pub revealed: Vec<String>,
    pub obscured: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hover_anchor: Option<String>,
}

pub struct PageRuntime {
    location: PageLocation,
    doc: Document,
    store: Arc<dyn SettingsStore>,
    events: mpsc::UnboundedSender<PageEvent>,
    phase: Phase,
    settings: Settings,
    selector: TargetSelector,
    styles: StyleController,
    hover: HoverCoordinator,
    watcher: MutationWatcher,
    listening: bool,
    toggle_seq: u64,
    pending_writes: usize,
}

impl PageRuntime {
    pub fn new(
        location: PageLocation,
        doc: Document,
        store: Arc<dyn SettingsStore>,
    ) -> (Self, PageHandle, mpsc::UnboundedReceiver<PageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = Settings::default();
        let runtime = Self {
            location,
            doc,
            store,
            events: tx.clone(),
            phase: Phase::Uninitialized,
            selector: settings.target_selector(),
            settings,
            styles: StyleController::new(),
            hover: HoverCoordinator::new(),
            watcher: MutationWatcher::new(),
            listening: false,
            toggle_seq: 0,
            pending_writes: 0,
        };
        (runtime, PageHandle { tx }, rx)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn location(&self) -> &PageLocation {
        &self.location
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn styles(&self) -> &StyleController {
        &self.styles
    }

    pub fn hover(&self) -> &HoverCoordinator {
        &self.hover
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    /// Load settings and decide whether this page participates at all
    pub async fn init(&mut self) -> Phase {
        if self.phase != Phase::Uninitialized {
            warn!(phase = ?self.phase, "Runtime already initialized");
            return self.phase;
        }
        self.phase = Phase::Loading;
        info!(url = %self.location.url, "Initializing page runtime");

        let settings = match load_settings(self.store.as_ref()).await {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = ?e, "Initialization failed, blurring stays off for this page");
                self.phase = Phase::Inert(InertReason::LoadFailed);
                return self.phase;
            }
        };
        debug!(settings = ?settings, "Settings loaded");
        self.replace_settings(settings);

        if !self.site_enabled() {
            // Nothing is registered, so later updates cannot re-enable this page
            info!(host = %self.location.host, "Blurring disabled for this site");
            self.phase = Phase::Inert(InertReason::SiteExcluded);
            return self.phase;
        }

        self.listening = true;
        self.doc.add_root_listener(ListenerKind::KeyDown);
        info!("Message and keyboard shortcut listeners registered");

        self.phase = Phase::Disabled;
        if self.settings.blur_enabled {
            self.activate();
        }
        self.phase
    }

    fn replace_settings(&mut self, settings: Settings) {
        self.selector = settings.target_selector();
        self.settings = settings;
    }

    fn site_enabled(&self) -> bool {
        is_site_enabled(&self.settings.site_rules, &self.location.url, &self.location.host)
    }

    fn activate(&mut self) {
        if self.phase == Phase::Active {
            return;
        }
        self.styles.activate(&mut self.doc, self.settings.blur_intensity);
        self.styles.sweep(&self.doc, &self.selector);
        self.hover.attach(&mut self.doc);
        if let Err(e) = self.watcher.start(&mut self.doc, self.selector.clone()) {
            error!(error = ?e, "Failed to start mutation watcher");
        }
        self.phase = Phase::Active;
        info!(
            intensity = self.settings.blur_intensity,
            marked = self.styles.marked_count(&self.doc),
            "Blur activated"
        );
    }

    fn deactivate(&mut self) {
        if self.phase != Phase::Active {
            return;
        }
        self.watcher.stop(&mut self.doc);
        self.hover.detach(&mut self.doc, &mut self.styles);
        self.styles.deactivate(&mut self.doc);
        self.phase = Phase::Disabled;
        info!("Blur deactivated");
    }

    /// Bring the page in line with the current settings
    ///
    /// An already active page is torn down and rebuilt, never patched.
    fn apply_policy(&mut self) {
        if !self.site_enabled() {
            info!(host = %self.location.host, "Site rules exclude this page");
            self.deactivate();
            return;
        }
        if self.settings.blur_enabled {
            self.deactivate();
            self.activate();
        } else {
            self.deactivate();
        }
    }

    /// Process one event; false once the page has unloaded
    pub fn handle_event(&mut self, event: PageEvent) -> bool {
        match event {
            PageEvent::Pointer(pointer) => {
                if self.phase == Phase::Active {
                    self.hover.handle(&self.doc, &mut self.styles, pointer);
                }
            }
            PageEvent::Key(key) => {
                self.handle_key(&key);
            }
            PageEvent::Mutations(batches) => {
                for batch in &batches {
                    self.watcher.process(&self.doc, &mut self.styles, batch);
                }
            }
            PageEvent::Message { payload, reply } => {
                if let Some(response) = self.handle_message(payload) {
                    if let Some(reply) = reply {
                        // Sender stopped waiting
                        let _ = reply.send(response);
                    }
                }
            }
            PageEvent::PersistDone {
                seq,
                previous,
                result,
            } => self.on_persist_done(seq, previous, result),
            PageEvent::Unload => {
                self.teardown();
                return false;
            }
        }
        true
    }

    /// Apply an update message; `None` when no listener is registered
    pub fn handle_message(&mut self, payload: Value) -> Option<MessageResponse> {
        if !self.listening {
            debug!("Message ignored, no listener registered on this page");
            return None;
        }
        let message: Message = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed settings message");
                return Some(MessageResponse::error(format!("Malformed message: {e}")));
            }
        };

        let patch = message.settings.unwrap_or_default();
        info!(action = ?message.action, fields = ?patch, "Settings update received");
        let merged = self.settings.merge(&patch);
        self.replace_settings(merged);
        self.apply_policy();
        Some(MessageResponse::ok())
    }

    /// Handle a key press; returns whether default handling was prevented
    pub fn handle_key(&mut self, event: &KeyEvent) -> bool {
        if !self.listening {
            return false;
        }
        match match_shortcut(event) {
            Some(ShortcutCommand::ToggleBlur) => {
                self.toggle_blur();
                true
            }
            None => false,
        }
    }

    fn toggle_blur(&mut self) {
        let previous = self.settings.blur_enabled;
        let patch = StoredSettings {
            is_blur: Some(!previous),
            ..StoredSettings::default()
        };
        let merged = self.settings.merge(&patch);
        self.replace_settings(merged);
        self.toggle_seq += 1;
        info!(blur_enabled = !previous, seq = self.toggle_seq, "Blur toggled from keyboard");
        self.apply_policy();
        self.persist(self.toggle_seq, previous, patch);
    }

    fn persist(&mut self, seq: u64, previous: bool, patch: StoredSettings) {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        self.pending_writes += 1;
        tokio::spawn(async move {
            let result = store.set(patch).await;
            // Receiver gone means the page unloaded
            let _ = events.send(PageEvent::PersistDone {
                seq,
                previous,
                result,
            });
        });
    }

    fn on_persist_done(&mut self, seq: u64, previous: bool, result: Result<()>) {
        self.pending_writes = self.pending_writes.saturating_sub(1);
        let Err(e) = result else {
            debug!(seq, "Toggle persisted");
            return;
        };

        error!(error = ?e, seq, "Failed to persist blur toggle");
        if seq != self.toggle_seq {
            warn!(seq, latest = self.toggle_seq, "Newer toggle issued since, keeping current state");
            return;
        }
        if !self.listening {
            return;
        }
        info!(blur_enabled = previous, "Rolling back blur toggle");
        let rolled_back = self.settings.merge(&StoredSettings {
            is_blur: Some(previous),
            ..StoredSettings::default()
        });
        self.replace_settings(rolled_back);
        self.apply_policy();
    }

    /// Hand queued insertion records to the event loop for later delivery
    pub fn queue_mutations(&mut self) -> usize {
        let batches = self.doc.take_mutation_batches();
        let count: usize = batches.iter().map(|b| b.added_nodes.len()).sum();
        if !batches.is_empty() {
            let _ = self.events.send(PageEvent::Mutations(batches));
        }
        count
    }

    /// Process every event already queued without waiting
    pub fn pump(&mut self, rx: &mut mpsc::UnboundedReceiver<PageEvent>) -> bool {
        while let Ok(event) = rx.try_recv() {
            if !self.handle_event(event) {
                return false;
            }
        }
        true
    }

    /// Process events until every spawned store write has reported back
    pub async fn settle(&mut self, rx: &mut mpsc::UnboundedReceiver<PageEvent>) -> bool {
        while self.pending_writes > 0 {
            match rx.recv().await {
                Some(event) => {
                    if !self.handle_event(event) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        self.pump(rx)
    }

    /// Event loop: runs until an `Unload` event
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PageEvent>) -> Self {
        if self.phase == Phase::Uninitialized {
            self.init().await;
        }
        while let Some(event) = rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self
    }

    fn teardown(&mut self) {
        info!("Page unloading");
        self.deactivate();
        self.listening = false;
        self.doc.remove_root_listener(ListenerKind::KeyDown);
    }

    pub fn snapshot(&self, label: Option<String>) -> PageSnapshot {
        let doc = &self.doc;
        let marked = self.styles.marked_elements(doc);
        let revealed: Vec<NodeId> = marked
            .iter()
            .copied()
            .filter(|n| self.styles.is_revealed(doc, *n))
            .collect();
        let obscured: Vec<NodeId> = doc
            .descendants(doc.body())
            .into_iter()
            .filter(|n| doc.is_element(*n) && self.styles.is_obscured(doc, *n))
            .collect();

        PageSnapshot {
            label,
            phase: self.phase,
            blur_enabled: self.settings.blur_enabled,
            blur_intensity: self.settings.blur_intensity,
            stylesheets: doc.styles().len(),
            root_listeners: doc.root_listener_count(),
            marked: describe_all(doc, &marked),
            revealed: describe_all(doc, &revealed),
            obscured: describe_all(doc, &obscured),
            hover_anchor: self.hover.anchor().map(|n| doc.describe(n)),
        }
    }
}

fn describe_all(doc: &Document, nodes: &[NodeId]) -> Vec<String> {
    nodes.iter().map(|n| doc.describe(*n)).collect()
}
