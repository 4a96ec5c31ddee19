//! Blur stylesheet and per-element markers
//!
//! The controller owns the only `<style>` block the runtime installs and the
//! marker side table. Markers are keyed by generational node ids, so an
//! entry for an element that has left the document is never reported as
//! marked; the document decides element lifetime, the table only looks up.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::constants::style::{BLUR_CLASS, HOVER_CLASS, STYLE_ID, TRANSITION};
use crate::dom::{Document, NodeId};
use crate::settings::TargetSelector;

/// Marker facets of one element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Markers {
    pub blurred: bool,
    pub revealed: bool,
}

/// Stylesheet text for a blur radius
pub fn stylesheet_css(intensity_px: u8) -> String {
    format!(
        ".{BLUR_CLASS} {{\n  filter: blur({intensity_px}px) !important;\n  transition: {TRANSITION} !important;\n}}\n\
         .{BLUR_CLASS}.{HOVER_CLASS},\n.{BLUR_CLASS}.{HOVER_CLASS} * {{\n  filter: none !important;\n}}\n"
    )
}

#[derive(Debug, Default)]
pub struct StyleController {
    markers: HashMap<NodeId, Markers>,
    installed_intensity: Option<u8>,
}

impl StyleController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the stylesheet, replacing any previously installed one
    pub fn activate(&mut self, doc: &mut Document, intensity_px: u8) {
        doc.remove_style(STYLE_ID);
        doc.install_style(STYLE_ID, stylesheet_css(intensity_px));
        self.installed_intensity = Some(intensity_px);
        info!(intensity = intensity_px, "Installed blur stylesheet");
    }

    /// Remove the stylesheet and strip every marker
    ///
    /// Returns how many live elements lost a marker.
    pub fn deactivate(&mut self, doc: &mut Document) -> usize {
        doc.remove_style(STYLE_ID);
        self.installed_intensity = None;
        let cleared = self.markers.keys().filter(|id| doc.is_live(**id)).count();
        self.markers.clear();
        info!(cleared, "Removed blur stylesheet and markers");
        cleared
    }

    pub fn installed_intensity(&self) -> Option<u8> {
        self.installed_intensity
    }

    fn markers(&self, doc: &Document, node: NodeId) -> Markers {
        if !doc.is_live(node) {
            return Markers::default();
        }
        self.markers.get(&node).copied().unwrap_or_default()
    }

    fn update(&mut self, node: NodeId, apply: impl FnOnce(&mut Markers)) -> bool {
        let entry = self.markers.entry(node).or_default();
        let before = *entry;
        apply(entry);
        let changed = before != *entry;
        if *entry == Markers::default() {
            self.markers.remove(&node);
        }
        changed
    }

    /// Mark `node` as a blur target; no-op when already marked
    pub fn mark(&mut self, doc: &Document, node: NodeId) -> bool {
        if !doc.is_element(node) {
            return false;
        }
        self.update(node, |m| m.blurred = true)
    }

    /// Clear both facets of `node`
    pub fn unmark(&mut self, node: NodeId) -> bool {
        self.update(node, |m| *m = Markers::default())
    }

    pub fn reveal(&mut self, doc: &Document, node: NodeId) -> bool {
        if !doc.is_element(node) {
            return false;
        }
        self.update(node, |m| m.revealed = true)
    }

    pub fn unreveal(&mut self, node: NodeId) -> bool {
        self.update(node, |m| m.revealed = false)
    }

    pub fn is_marked(&self, doc: &Document, node: NodeId) -> bool {
        self.markers(doc, node).blurred
    }

    pub fn is_revealed(&self, doc: &Document, node: NodeId) -> bool {
        self.markers(doc, node).revealed
    }

    /// Mark every element under body matching `selector`
    pub fn sweep(&mut self, doc: &Document, selector: &TargetSelector) -> usize {
        self.prune(doc);
        if selector.is_empty() {
            return 0;
        }
        let mut marked = 0;
        for node in doc.descendants(doc.body()) {
            if doc.tag(node).is_some_and(|tag| selector.matches(tag)) && self.mark(doc, node) {
                marked += 1;
            }
        }
        debug!(marked, selector = %selector.to_css(), "Marked existing elements");
        marked
    }

    /// Drop entries whose elements no longer exist
    pub fn prune(&mut self, doc: &Document) {
        self.markers.retain(|id, _| doc.is_live(*id));
    }

    pub fn marked_elements(&self, doc: &Document) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .markers
            .iter()
            .filter(|(id, m)| m.blurred && doc.is_live(**id))
            .map(|(id, _)| *id)
            .collect();
        nodes.sort();
        nodes
    }

    pub fn marked_count(&self, doc: &Document) -> usize {
        self.marked_elements(doc).len()
    }

    /// Elements carrying either facet
    pub fn any_marker_count(&self, doc: &Document) -> usize {
        self.markers.keys().filter(|id| doc.is_live(**id)).count()
    }

    /// Class names the element would carry in a real page
    pub fn class_list(&self, doc: &Document, node: NodeId) -> Vec<&'static str> {
        let markers = self.markers(doc, node);
        let mut classes = Vec::new();
        if markers.blurred {
            classes.push(BLUR_CLASS);
        }
        if markers.revealed {
            classes.push(HOVER_CLASS);
        }
        classes
    }

    fn blur_filter_active(&self, doc: &Document, node: NodeId, under_revealed: bool) -> bool {
        let markers = self.markers(doc, node);
        markers.blurred && !markers.revealed && !under_revealed
    }

    /// Whether `node` renders blurred under the installed stylesheet
    ///
    /// A node is obscured when it or any ancestor has an active blur filter.
    /// The filter is off on revealed targets and on every descendant of one.
    pub fn is_obscured(&self, doc: &Document, node: NodeId) -> bool {
        if self.installed_intensity.is_none() || !doc.is_live(node) {
            return false;
        }

        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            path.push(id);
            current = doc.parent(id);
        }

        let mut under_revealed = false;
        for id in path.into_iter().rev() {
            if self.blur_filter_active(doc, id, under_revealed) {
                return true;
            }
            let markers = self.markers(doc, id);
            if markers.blurred && markers.revealed {
                under_revealed = true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::PageNode;

    fn page() -> (Document, NodeId, NodeId, NodeId) {
        let page = PageNode::element("body")
            .with_child(
                PageNode::element("p")
                    .with_id("outer")
                    .with_child(PageNode::element("a").with_id("inner").with_text("link")),
            )
            .with_child(PageNode::element("div").with_id("plain"));
        let doc = Document::from_page(&page).unwrap();
        let outer = doc.element_by_id("outer").unwrap();
        let inner = doc.element_by_id("inner").unwrap();
        let plain = doc.element_by_id("plain").unwrap();
        (doc, outer, inner, plain)
    }

    #[test]
    fn test_stylesheet_text() {
        let css = stylesheet_css(7);
        assert!(css.contains(".blur-focus-element {"));
        assert!(css.contains("filter: blur(7px) !important;"));
        assert!(css.contains("transition: filter 0.2s ease !important;"));
        assert!(css.contains(".blur-focus-element.blur-focus-hover *"));
        assert!(css.contains("filter: none !important;"));
    }

    #[test]
    fn test_reactivation_keeps_single_stylesheet() {
        let (mut doc, ..) = page();
        let mut styles = StyleController::new();
        styles.activate(&mut doc, 5);
        styles.activate(&mut doc, 12);
        assert_eq!(doc.styles().len(), 1);
        assert!(doc.style(STYLE_ID).unwrap().css.contains("blur(12px)"));
        assert_eq!(styles.installed_intensity(), Some(12));
    }

    #[test]
    fn test_mark_and_reveal_are_idempotent() {
        let (doc, outer, ..) = page();
        let mut styles = StyleController::new();
        assert!(styles.mark(&doc, outer));
        assert!(!styles.mark(&doc, outer));
        assert!(styles.is_marked(&doc, outer));

        assert!(styles.reveal(&doc, outer));
        assert!(!styles.reveal(&doc, outer));
        assert!(styles.is_revealed(&doc, outer));

        assert!(styles.unreveal(outer));
        assert!(!styles.unreveal(outer));
        assert!(styles.is_marked(&doc, outer));

        assert!(styles.unmark(outer));
        assert!(!styles.unmark(outer));
        assert!(!styles.is_marked(&doc, outer));
    }

    #[test]
    fn test_text_nodes_are_never_marked() {
        let (doc, _, inner, _) = page();
        let text = doc.children(inner)[0];
        let mut styles = StyleController::new();
        assert!(!styles.mark(&doc, text));
        assert!(!styles.is_marked(&doc, text));
    }

    #[test]
    fn test_sweep_marks_matching_tags() {
        let (doc, outer, inner, plain) = page();
        let mut styles = StyleController::new();
        let marked = styles.sweep(&doc, &TargetSelector::new(&["p", "a"]));
        assert_eq!(marked, 2);
        assert!(styles.is_marked(&doc, outer));
        assert!(styles.is_marked(&doc, inner));
        assert!(!styles.is_marked(&doc, plain));
        assert_eq!(styles.class_list(&doc, inner), vec![BLUR_CLASS]);
    }

    #[test]
    fn test_markers_vanish_with_removed_element() {
        let (mut doc, outer, inner, _) = page();
        let mut styles = StyleController::new();
        styles.sweep(&doc, &TargetSelector::new(&["p", "a"]));
        doc.remove(outer).unwrap();
        assert!(!styles.is_marked(&doc, outer));
        assert!(!styles.is_marked(&doc, inner));
        assert_eq!(styles.marked_count(&doc), 0);

        // A new element reusing the slot starts unmarked
        let fresh = doc.create_element("p");
        assert!(!styles.is_marked(&doc, fresh));
    }

    #[test]
    fn test_deactivate_clears_everything() {
        let (mut doc, outer, inner, _) = page();
        let mut styles = StyleController::new();
        styles.activate(&mut doc, 5);
        styles.sweep(&doc, &TargetSelector::new(&["p", "a"]));
        styles.reveal(&doc, inner);

        // Marked directly, outside any sweep
        let late = doc.create_element("span");
        doc.append_child(outer, late).unwrap();
        styles.mark(&doc, late);

        assert_eq!(styles.deactivate(&mut doc), 3);
        assert!(doc.styles().is_empty());
        assert_eq!(styles.any_marker_count(&doc), 0);
        assert!(!styles.is_revealed(&doc, inner));
    }

    #[test]
    fn test_obscured_state_follows_reveal_scope() {
        let (mut doc, outer, inner, plain) = page();
        let mut styles = StyleController::new();
        styles.sweep(&doc, &TargetSelector::new(&["p", "a"]));

        // Without a stylesheet markers are visually inert
        assert!(!styles.is_obscured(&doc, inner));

        styles.activate(&mut doc, 5);
        assert!(styles.is_obscured(&doc, outer));
        assert!(styles.is_obscured(&doc, inner));
        assert!(!styles.is_obscured(&doc, plain));

        // Revealing only the inner element leaves the outer filter active
        styles.reveal(&doc, inner);
        assert!(styles.is_obscured(&doc, inner));

        // Revealing the outer element clears the whole subtree
        styles.reveal(&doc, outer);
        assert!(!styles.is_obscured(&doc, outer));
        assert!(!styles.is_obscured(&doc, inner));

        // Descendants of a revealed target are unblurred even when not revealed
        styles.unreveal(inner);
        assert!(!styles.is_obscured(&doc, inner));
    }
}
