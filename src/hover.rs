//! Hover reveal coordination
//!
//! Listens once on the document root and tracks the chain of marked
//! ancestors under the pointer, innermost first. Revealing the whole chain
//! matters: a revealed inner element still sits inside its blurred parent's
//! filter.

use tracing::{debug, trace};

use crate::dom::{Document, ListenerKind, NodeId};
use crate::style::StyleController;

/// Pointer transition delivered by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    /// Pointer moved onto `target` (bubbling `mouseover`)
    Enter { target: NodeId },
    /// Pointer left `target` for `related`, if it is still over the page
    Leave { target: NodeId, related: Option<NodeId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HoverState {
    #[default]
    Idle,
    /// Revealed chain, innermost first; `chain[0]` is the hovered anchor
    Revealing { chain: Vec<NodeId> },
}

#[derive(Debug, Default)]
pub struct HoverCoordinator {
    state: HoverState,
    attached: bool,
}

impl HoverCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &HoverState {
        &self.state
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Innermost revealed element
    pub fn anchor(&self) -> Option<NodeId> {
        match &self.state {
            HoverState::Idle => None,
            HoverState::Revealing { chain } => chain.first().copied(),
        }
    }

    /// Register the delegated root listeners
    pub fn attach(&mut self, doc: &mut Document) {
        doc.add_root_listener(ListenerKind::PointerOver);
        doc.add_root_listener(ListenerKind::PointerOut);
        self.attached = true;
    }

    /// Unregister listeners and unreveal any chain
    pub fn detach(&mut self, doc: &mut Document, styles: &mut StyleController) {
        doc.remove_root_listener(ListenerKind::PointerOver);
        doc.remove_root_listener(ListenerKind::PointerOut);
        self.attached = false;
        self.clear(styles);
    }

    fn clear(&mut self, styles: &mut StyleController) {
        if let HoverState::Revealing { chain } = std::mem::take(&mut self.state) {
            for node in chain {
                styles.unreveal(node);
            }
        }
    }

    pub fn handle(&mut self, doc: &Document, styles: &mut StyleController, event: PointerEvent) {
        if !self.attached {
            return;
        }
        match event {
            PointerEvent::Enter { target } => self.on_enter(doc, styles, target),
            PointerEvent::Leave { target, related } => self.on_leave(doc, styles, target, related),
        }
    }

    fn on_enter(&mut self, doc: &Document, styles: &mut StyleController, target: NodeId) {
        let new_chain = marked_chain(doc, styles, target);
        let Some(&innermost) = new_chain.first() else {
            return;
        };
        if self.anchor() == Some(innermost) {
            return;
        }

        // Elements in both chains stay revealed throughout
        if let HoverState::Revealing { chain } = &self.state {
            for node in chain.iter().filter(|n| !new_chain.contains(n)) {
                styles.unreveal(*node);
            }
        }
        for node in &new_chain {
            styles.reveal(doc, *node);
        }

        debug!(depth = new_chain.len(), "Revealed hover chain");
        self.state = HoverState::Revealing { chain: new_chain };
    }

    fn on_leave(&mut self, doc: &Document, styles: &mut StyleController, target: NodeId, related: Option<NodeId>) {
        if self.anchor() != Some(target) {
            return;
        }
        if let Some(related) = related {
            if doc.contains(target, related) {
                trace!("Pointer moved into a descendant, keeping chain");
                return;
            }
            if !marked_chain(doc, styles, related).is_empty() {
                trace!("Pointer moved onto another blurred region, enter will follow");
                return;
            }
        }
        debug!("Pointer left blurred region");
        self.clear(styles);
    }
}

/// Marked elements from `node` up to, but excluding, body, innermost first
fn marked_chain(doc: &Document, styles: &StyleController, node: NodeId) -> Vec<NodeId> {
    let body = doc.body();
    let mut chain = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        if id == body {
            break;
        }
        if styles.is_marked(doc, id) {
            chain.push(id);
        }
        current = doc.parent(id);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::PageNode;
    use crate::settings::TargetSelector;

    struct Fixture {
        doc: Document,
        styles: StyleController,
        hover: HoverCoordinator,
    }

    impl Fixture {
        // body > div#wrap > p#outer > a#inner > span#leaf, plus div#outside
        fn new() -> Self {
            let page = PageNode::element("body")
                .with_child(
                    PageNode::element("div").with_id("wrap").with_child(
                        PageNode::element("p").with_id("outer").with_text("lead").with_child(
                            PageNode::element("a")
                                .with_id("inner")
                                .with_child(PageNode::element("b").with_id("leaf").with_text("x")),
                        ),
                    ),
                )
                .with_child(PageNode::element("div").with_id("outside"))
                .with_child(PageNode::element("p").with_id("sibling"));
            let mut doc = Document::from_page(&page).unwrap();
            let mut styles = StyleController::new();
            styles.activate(&mut doc, 5);
            styles.sweep(&doc, &TargetSelector::new(&["p", "a"]));
            let mut hover = HoverCoordinator::new();
            hover.attach(&mut doc);
            Self { doc, styles, hover }
        }

        fn id(&self, id: &str) -> NodeId {
            self.doc.element_by_id(id).unwrap()
        }

        fn enter(&mut self, id: &str) {
            let target = self.id(id);
            self.hover.handle(&self.doc, &mut self.styles, PointerEvent::Enter { target });
        }

        fn leave(&mut self, id: &str, related: Option<&str>) {
            let target = self.id(id);
            let related = related.map(|r| self.id(r));
            self.hover.handle(&self.doc, &mut self.styles, PointerEvent::Leave { target, related });
        }

        fn revealed(&self, id: &str) -> bool {
            self.styles.is_revealed(&self.doc, self.id(id))
        }

        fn obscured(&self, id: &str) -> bool {
            self.styles.is_obscured(&self.doc, self.id(id))
        }
    }

    #[test]
    fn test_attach_registers_two_root_listeners() {
        let fx = Fixture::new();
        assert_eq!(fx.doc.root_listener_count(), 2);
        assert!(fx.hover.is_attached());
    }

    #[test]
    fn test_enter_reveals_whole_chain() {
        let mut fx = Fixture::new();
        fx.enter("leaf");
        assert!(fx.revealed("inner"));
        assert!(fx.revealed("outer"));
        assert_eq!(fx.hover.anchor(), Some(fx.id("inner")));
        assert!(!fx.obscured("leaf"));
        assert!(!fx.obscured("outer"));
    }

    #[test]
    fn test_enter_outside_targets_is_ignored() {
        let mut fx = Fixture::new();
        fx.enter("outside");
        assert_eq!(fx.hover.state(), &HoverState::Idle);
        fx.enter("wrap");
        assert_eq!(fx.hover.state(), &HoverState::Idle);
    }

    #[test]
    fn test_leave_to_outside_unreveals_chain() {
        let mut fx = Fixture::new();
        fx.enter("inner");
        fx.leave("inner", Some("outside"));
        assert!(!fx.revealed("inner"));
        assert!(!fx.revealed("outer"));
        assert_eq!(fx.hover.state(), &HoverState::Idle);
        assert!(fx.obscured("outer"));
    }

    #[test]
    fn test_leave_to_window_edge_unreveals_chain() {
        let mut fx = Fixture::new();
        fx.enter("inner");
        fx.leave("inner", None);
        assert_eq!(fx.hover.state(), &HoverState::Idle);
        assert!(!fx.revealed("outer"));
    }

    #[test]
    fn test_leave_into_descendant_keeps_chain() {
        let mut fx = Fixture::new();
        fx.enter("inner");
        fx.leave("inner", Some("leaf"));
        assert!(fx.revealed("inner"));
        assert!(fx.revealed("outer"));
    }

    #[test]
    fn test_leave_from_non_anchor_is_ignored() {
        let mut fx = Fixture::new();
        fx.enter("inner");
        fx.leave("outer", Some("outside"));
        assert!(fx.revealed("inner"));
    }

    #[test]
    fn test_inner_to_outer_never_blurs_outer() {
        let mut fx = Fixture::new();
        fx.enter("inner");

        // Leave towards the parent: ignored, outer stays revealed
        fx.leave("inner", Some("outer"));
        assert!(fx.revealed("outer"));
        assert!(!fx.obscured("outer"));

        // The matching enter narrows the chain without ever unrevealing outer
        fx.enter("outer");
        assert!(fx.revealed("outer"));
        assert!(!fx.revealed("inner"));
        assert!(!fx.obscured("outer"));
        assert_eq!(fx.hover.anchor(), Some(fx.id("outer")));
    }

    #[test]
    fn test_move_between_sibling_regions() {
        let mut fx = Fixture::new();
        fx.enter("inner");
        fx.leave("inner", Some("sibling"));
        // Still revealed until the sibling's enter arrives
        assert!(fx.revealed("outer"));
        fx.enter("sibling");
        assert!(fx.revealed("sibling"));
        assert!(!fx.revealed("outer"));
        assert!(!fx.revealed("inner"));
    }

    #[test]
    fn test_repeated_enter_on_same_anchor_is_noop() {
        let mut fx = Fixture::new();
        fx.enter("leaf");
        let before = fx.hover.state().clone();
        fx.enter("inner");
        assert_eq!(fx.hover.state(), &before);
    }

    #[test]
    fn test_detach_clears_chain_and_listeners() {
        let mut fx = Fixture::new();
        fx.enter("inner");
        fx.hover.detach(&mut fx.doc, &mut fx.styles);
        assert_eq!(fx.doc.root_listener_count(), 0);
        assert!(!fx.revealed("outer"));
        assert_eq!(fx.hover.state(), &HoverState::Idle);

        // Events after detach are ignored
        fx.enter("inner");
        assert!(!fx.revealed("inner"));
    }
}
