//! In-memory document host
//!
//! Stands in for the browser page: a generational arena of element/text
//! nodes, the registry of installed `<style>` blocks, the set of delegated
//! listeners registered on the document root, and subtree mutation
//! observers. Observers never run synchronously; insertions are queued as
//! records and handed out by [`Document::take_mutation_batches`] for the
//! event loop to deliver later.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stable identity of a node. Stale once the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element { tag: String, id: Option<String> },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

/// A `<style>` element in the document head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleBlock {
    pub id: String,
    pub css: String,
}

/// Event types that can be delegated to the document root
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListenerKind {
    PointerOver,
    PointerOut,
    KeyDown,
}

/// Handle returned when subscribing to subtree insertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

#[derive(Debug)]
struct Observer {
    handle: ObserverHandle,
    root: NodeId,
    pending: Vec<NodeId>,
}

/// Nodes inserted since the previous delivery, for one observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    pub observer: ObserverHandle,
    pub added_nodes: Vec<NodeId>,
}

/// Serializable page description used to build documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PageNode>,
}

impl PageNode {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn with_child(mut self, child: PageNode) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    styles: Vec<StyleBlock>,
    root_listeners: BTreeSet<ListenerKind>,
    observers: Vec<Observer>,
    next_observer: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty `html > head + body` document
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
            head: NodeId { index: 0, generation: 0 },
            body: NodeId { index: 0, generation: 0 },
            styles: Vec::new(),
            root_listeners: BTreeSet::new(),
            observers: Vec::new(),
            next_observer: 0,
        };
        doc.root = doc.alloc(NodeKind::Element { tag: "html".into(), id: None });
        doc.head = doc.alloc(NodeKind::Element { tag: "head".into(), id: None });
        doc.body = doc.alloc(NodeKind::Element { tag: "body".into(), id: None });
        doc.link(doc.root, doc.head);
        doc.link(doc.root, doc.body);
        doc
    }

    /// Build a document whose body holds `page`'s children
    ///
    /// A description rooted at `body` contributes its children; any other
    /// root tag becomes the single child of body.
    pub fn from_page(page: &PageNode) -> Result<Self> {
        let mut doc = Self::new();
        let body = doc.body;
        if page.tag.eq_ignore_ascii_case("body") {
            if let Some(text) = &page.text {
                let node = doc.create_text(text);
                doc.append_child(body, node)?;
            }
            for child in &page.children {
                doc.build(body, child)?;
            }
        } else {
            doc.build(body, page)?;
        }
        Ok(doc)
    }

    /// Create `node` (and its subtree) and append it under `parent`
    pub fn build(&mut self, parent: NodeId, node: &PageNode) -> Result<NodeId> {
        if node.tag.trim().is_empty() {
            bail!("Page node without a tag name");
        }
        let element = self.create_element(&node.tag);
        if let Some(id) = &node.id {
            self.set_element_id(element, id)?;
        }
        if let Some(text) = &node.text {
            let text = self.create_text(text);
            self.link(element, text);
        }
        for child in &node.children {
            self.build(element, child)?;
        }
        self.append_child(parent, element)
            .with_context(|| format!("Failed to insert <{}>", node.tag))?;
        Ok(element)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let data = NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(data);
            NodeId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, node: Some(data) });
            NodeId { index, generation: 0 }
        }
    }

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Attach without recording a mutation (used while building detached trees)
    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(data) = self.data_mut(child) {
            data.parent = Some(parent);
        }
        if let Some(data) = self.data_mut(parent) {
            data.children.push(child);
        }
    }

    fn unlink(&mut self, child: NodeId) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Some(data) = self.data_mut(parent) {
            data.children.retain(|c| *c != child);
        }
        if let Some(data) = self.data_mut(child) {
            data.parent = None;
        }
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: tag.trim().to_ascii_lowercase(),
            id: None,
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    pub fn set_element_id(&mut self, node: NodeId, id: &str) -> Result<()> {
        match self.data_mut(node).map(|d| &mut d.kind) {
            Some(NodeKind::Element { id: slot, .. }) => {
                *slot = Some(id.to_string());
                Ok(())
            }
            Some(NodeKind::Text(_)) => bail!("Text nodes cannot carry an id"),
            None => bail!("Node {node:?} is not live"),
        }
    }

    /// Append `child` as the last child of `parent`, moving it if attached
    ///
    /// Observers whose root contains `parent` get a record for `child`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        match self.data(parent).map(|d| &d.kind) {
            Some(NodeKind::Element { .. }) => {}
            Some(NodeKind::Text(_)) => bail!("Cannot append to a text node"),
            None => bail!("Parent {parent:?} is not live"),
        }
        if !self.is_live(child) {
            bail!("Child {child:?} is not live");
        }
        if self.contains(child, parent) {
            bail!("Appending {child:?} under {parent:?} would create a cycle");
        }

        self.unlink(child);
        self.link(parent, child);

        if self.is_connected(parent) {
            let observed: Vec<usize> = self
                .observers
                .iter()
                .enumerate()
                .filter(|(_, o)| self.contains(o.root, parent))
                .map(|(i, _)| i)
                .collect();
            for i in observed {
                self.observers[i].pending.push(child);
            }
        }
        Ok(())
    }

    /// Detach `node` and destroy its whole subtree
    ///
    /// Every id in the subtree becomes stale.
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        if node == self.root || node == self.body || node == self.head {
            bail!("Cannot remove a structural node");
        }
        if !self.is_live(node) {
            bail!("Node {node:?} is not live");
        }
        self.unlink(node);

        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let slot = &mut self.slots[id.index as usize];
            if let Some(data) = slot.node.take() {
                stack.extend(data.children);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
        }
        Ok(())
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.data(id).is_some()
    }

    /// Live and attached under the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.is_live(id) && self.contains(self.root, id)
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.data(id).map(|d| &d.kind), Some(NodeKind::Element { .. }))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.data(id).map(|d| &d.kind) {
            Some(NodeKind::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn element_id(&self, id: NodeId) -> Option<&str> {
        match self.data(id).map(|d| &d.kind) {
            Some(NodeKind::Element { id: Some(attr), .. }) => Some(attr.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id).map(|d| &d.kind) {
            Some(NodeKind::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).and_then(|d| d.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map(|d| d.children.as_slice()).unwrap_or(&[])
    }

    /// Inclusive containment, like `Node.contains`
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if !self.is_live(id) {
                return false;
            }
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Descendants of `id` in document order, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Connected element carrying `id`
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|node| self.element_id(*node) == Some(id))
    }

    /// Short human-readable label: `tag#id`, else `tag` plus its child index path from body
    pub fn describe(&self, node: NodeId) -> String {
        let Some(tag) = self.tag(node) else {
            return if self.is_live(node) { "#text".to_string() } else { "<stale>".to_string() };
        };
        if let Some(id) = self.element_id(node) {
            return format!("{tag}#{id}");
        }

        let mut path = Vec::new();
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            if current == self.body {
                break;
            }
            let index = self.children(parent).iter().position(|c| *c == current).unwrap_or(0);
            path.push(index.to_string());
            current = parent;
        }
        path.reverse();
        format!("{tag}@/{}", path.join("/"))
    }

    // ---- stylesheets ----

    pub fn install_style(&mut self, id: &str, css: String) {
        self.styles.push(StyleBlock { id: id.to_string(), css });
    }

    /// Remove every block with `id`; returns whether any existed
    pub fn remove_style(&mut self, id: &str) -> bool {
        let before = self.styles.len();
        self.styles.retain(|s| s.id != id);
        before != self.styles.len()
    }

    pub fn style(&self, id: &str) -> Option<&StyleBlock> {
        self.styles.iter().find(|s| s.id == id)
    }

    pub fn styles(&self) -> &[StyleBlock] {
        &self.styles
    }

    // ---- delegated listeners ----

    /// Register a root listener; registering twice is a no-op
    pub fn add_root_listener(&mut self, kind: ListenerKind) -> bool {
        self.root_listeners.insert(kind)
    }

    pub fn remove_root_listener(&mut self, kind: ListenerKind) -> bool {
        self.root_listeners.remove(&kind)
    }

    pub fn has_root_listener(&self, kind: ListenerKind) -> bool {
        self.root_listeners.contains(&kind)
    }

    pub fn root_listener_count(&self) -> usize {
        self.root_listeners.len()
    }

    // ---- mutation observers ----

    pub fn observe_subtree(&mut self, root: NodeId) -> Result<ObserverHandle> {
        if !self.is_live(root) {
            return Err(anyhow!("Cannot observe stale node {root:?}"));
        }
        let handle = ObserverHandle(self.next_observer);
        self.next_observer += 1;
        self.observers.push(Observer {
            handle,
            root,
            pending: Vec::new(),
        });
        Ok(handle)
    }

    /// Stop an observer; undelivered records for it are discarded
    pub fn disconnect(&mut self, handle: ObserverHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.handle != handle);
        before != self.observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn has_pending_mutations(&self) -> bool {
        self.observers.iter().any(|o| !o.pending.is_empty())
    }

    /// Drain queued insertion records, one batch per observer with records
    pub fn take_mutation_batches(&mut self) -> Vec<MutationBatch> {
        self.observers
            .iter_mut()
            .filter(|o| !o.pending.is_empty())
            .map(|o| MutationBatch {
                observer: o.handle,
                added_nodes: std::mem::take(&mut o.pending),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let page = PageNode::element("body").with_child(
            PageNode::element("p")
                .with_id("para")
                .with_child(PageNode::element("span").with_id("inner").with_text("hi")),
        );
        let doc = Document::from_page(&page).unwrap();
        let p = doc.element_by_id("para").unwrap();
        let span = doc.element_by_id("inner").unwrap();
        (doc, p, span)
    }

    #[test]
    fn test_from_page_structure() {
        let (doc, p, span) = sample();
        assert_eq!(doc.parent(p), Some(doc.body()));
        assert_eq!(doc.parent(span), Some(p));
        assert_eq!(doc.tag(span), Some("span"));
        let text = doc.children(span)[0];
        assert_eq!(doc.text(text), Some("hi"));
        assert!(!doc.is_element(text));
    }

    #[test]
    fn test_contains_is_inclusive() {
        let (doc, p, span) = sample();
        assert!(doc.contains(p, span));
        assert!(doc.contains(p, p));
        assert!(!doc.contains(span, p));
    }

    #[test]
    fn test_remove_invalidates_subtree_ids() {
        let (mut doc, p, span) = sample();
        doc.remove(p).unwrap();
        assert!(!doc.is_live(p));
        assert!(!doc.is_live(span));
        assert!(doc.children(doc.body()).is_empty());

        // Slot reuse hands out a fresh generation
        let fresh = doc.create_element("div");
        assert_ne!(fresh, p);
        assert_ne!(fresh, span);
        assert!(!doc.is_live(p));
    }

    #[test]
    fn test_cannot_remove_body() {
        let (mut doc, _, _) = sample();
        let body = doc.body();
        assert!(doc.remove(body).is_err());
    }

    #[test]
    fn test_append_rejects_cycles() {
        let (mut doc, p, span) = sample();
        assert!(doc.append_child(span, p).is_err());
    }

    #[test]
    fn test_mutation_records_are_queued_not_delivered() {
        let (mut doc, p, _) = sample();
        let handle = doc.observe_subtree(doc.body()).unwrap();

        let div = doc.create_element("div");
        let nested = doc.create_element("code");
        doc.append_child(div, nested).unwrap();
        // Detached insertions are not observed
        assert!(!doc.has_pending_mutations());

        doc.append_child(p, div).unwrap();
        assert!(doc.has_pending_mutations());

        let batches = doc.take_mutation_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].observer, handle);
        assert_eq!(batches[0].added_nodes, vec![div]);
        assert!(doc.take_mutation_batches().is_empty());
    }

    #[test]
    fn test_disconnect_discards_pending_records() {
        let (mut doc, p, _) = sample();
        let handle = doc.observe_subtree(doc.body()).unwrap();
        let div = doc.create_element("div");
        doc.append_child(p, div).unwrap();
        assert!(doc.disconnect(handle));
        assert!(doc.take_mutation_batches().is_empty());
        assert_eq!(doc.observer_count(), 0);
    }

    #[test]
    fn test_root_listeners_are_a_set() {
        let mut doc = Document::new();
        assert!(doc.add_root_listener(ListenerKind::PointerOver));
        assert!(!doc.add_root_listener(ListenerKind::PointerOver));
        assert_eq!(doc.root_listener_count(), 1);
        assert!(doc.remove_root_listener(ListenerKind::PointerOver));
        assert_eq!(doc.root_listener_count(), 0);
    }

    #[test]
    fn test_style_registry() {
        let mut doc = Document::new();
        doc.install_style("a", "x{}".into());
        doc.install_style("a", "y{}".into());
        assert_eq!(doc.styles().len(), 2);
        assert!(doc.remove_style("a"));
        assert!(doc.styles().is_empty());
        assert!(!doc.remove_style("a"));
    }

    #[test]
    fn test_page_node_deserializes_from_json() {
        let page: PageNode = serde_json::from_str(
            r#"{"tag":"body","children":[{"tag":"P","id":"x","text":"t"}]}"#,
        )
        .unwrap();
        let doc = Document::from_page(&page).unwrap();
        let p = doc.element_by_id("x").unwrap();
        assert_eq!(doc.tag(p), Some("p"));
    }
}
