//! Marks late-arriving elements
//!
//! The watcher only executes against the selector it was started with; it
//! never decides whether blurring should be active.

use anyhow::Result;
use tracing::{debug, trace};

use crate::dom::{Document, MutationBatch, NodeId, ObserverHandle};
use crate::settings::TargetSelector;
use crate::style::StyleController;

#[derive(Debug, Default)]
pub struct MutationWatcher {
    observer: Option<ObserverHandle>,
    selector: Option<TargetSelector>,
}

impl MutationWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe insertions under body with `selector`, restarting if running
    pub fn start(&mut self, doc: &mut Document, selector: TargetSelector) -> Result<()> {
        self.stop(doc);
        let handle = doc.observe_subtree(doc.body())?;
        debug!(selector = %selector.to_css(), "Mutation watcher started");
        self.observer = Some(handle);
        self.selector = Some(selector);
        Ok(())
    }

    /// Disconnect and forget the selector
    pub fn stop(&mut self, doc: &mut Document) {
        if let Some(handle) = self.observer.take() {
            doc.disconnect(handle);
            debug!("Mutation watcher stopped");
        }
        self.selector = None;
    }

    /// Restart with a new selector
    pub fn update_target_selector(&mut self, doc: &mut Document, selector: TargetSelector) -> Result<()> {
        self.stop(doc);
        self.start(doc, selector)
    }

    pub fn is_running(&self) -> bool {
        self.observer.is_some()
    }

    pub fn observer(&self) -> Option<ObserverHandle> {
        self.observer
    }

    /// Mark inserted elements (and their descendants) matching the selector
    ///
    /// Batches for another observer, or arriving after `stop`, are ignored.
    /// Returns how many elements were newly marked.
    pub fn process(&self, doc: &Document, styles: &mut StyleController, batch: &MutationBatch) -> usize {
        let (Some(handle), Some(selector)) = (self.observer, self.selector.as_ref()) else {
            trace!(count = batch.added_nodes.len(), "Dropping mutation batch, watcher stopped");
            return 0;
        };
        if batch.observer != handle {
            trace!("Dropping mutation batch from a previous observer");
            return 0;
        }

        let mut marked = 0;
        for node in &batch.added_nodes {
            marked += mark_subtree(doc, styles, selector, *node);
        }
        if marked > 0 {
            debug!(marked, inserted = batch.added_nodes.len(), "Marked inserted elements");
        }
        marked
    }
}

fn mark_subtree(doc: &Document, styles: &mut StyleController, selector: &TargetSelector, node: NodeId) -> usize {
    // Inserted and removed again before delivery
    if !doc.is_connected(node) || !doc.is_element(node) {
        return 0;
    }
    std::iter::once(node)
        .chain(doc.descendants(node))
        .filter(|n| doc.tag(*n).is_some_and(|tag| selector.matches(tag)))
        .filter(|n| styles.mark(doc, *n))
        .count()
}
