//! In-memory surface.
//!
//! Nodes live in an arena indexed by [`NodeId`], with a free pool for O(1)
//! reuse. Geometry is computed on demand through the Taffy bridge and cached
//! until the next mutation.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;

use super::layout::compute_geometry;
use super::{Geometry, Listener, NodeId, Surface, SurfaceEvent};
use crate::error::SurfaceError;
use crate::types::AttrValue;

// =============================================================================
// Node storage
// =============================================================================

#[derive(Default)]
pub(crate) struct MemoryNode {
    /// `None` for text nodes.
    pub(crate) tag: Option<Rc<str>>,
    pub(crate) text: Option<String>,
    pub(crate) attributes: Vec<(String, AttrValue)>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
    listeners: Vec<(String, Listener)>,
}

/// Arena-backed [`Surface`] for headless hosts and tests.
pub struct MemorySurface {
    nodes: Vec<Option<MemoryNode>>,
    free: Vec<usize>,
    document: NodeId,
    focused: Option<NodeId>,
    rejected: HashSet<String>,
    viewport: (f32, f32),
    geometry: RefCell<Option<HashMap<NodeId, Geometry>>>,
}

impl MemorySurface {
    /// Create a surface with an 80x24 viewport.
    pub fn new() -> Self {
        Self::with_viewport(80.0, 24.0)
    }

    pub fn with_viewport(width: f32, height: f32) -> Self {
        let document = MemoryNode {
            tag: Some(Rc::from("#document")),
            ..MemoryNode::default()
        };
        Self {
            nodes: vec![Some(document)],
            free: Vec::new(),
            document: NodeId(0),
            focused: None,
            rejected: HashSet::new(),
            viewport: (width, height),
            geometry: RefCell::new(None),
        }
    }

    /// The root node every mount point hangs from.
    pub fn document(&self) -> NodeId {
        self.document
    }

    pub fn viewport(&self) -> (f32, f32) {
        self.viewport
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = (width, height);
        self.touch();
    }

    /// Make every future `set_attribute(name, ..)` fail.
    pub fn reject_attribute(&mut self, name: &str) {
        self.rejected.insert(name.to_string());
    }

    pub fn accept_attribute(&mut self, name: &str) {
        self.rejected.remove(name);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub(crate) fn node(&self, id: NodeId) -> Option<&MemoryNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemoryNode, SurfaceError> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(SurfaceError::UnknownNode(id.0))
    }

    /// Whether the node id refers to a live node.
    pub fn exists(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes, the document included.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.node(id)?.tag.as_deref()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&AttrValue> {
        self.node(id)?
            .attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn has_listener(&self, id: NodeId, event: &str) -> bool {
        self.node(id)
            .is_some_and(|n| n.listeners.iter().any(|(e, _)| e == event))
    }

    /// Concatenated text of a node and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        if let Some(text) = &node.text {
            out.push_str(text);
        }
        for &child in &node.children {
            self.collect_text(child, out);
        }
    }

    /// First node (depth-first) whose attribute `name` equals `value`.
    pub fn find_by_attribute(&self, name: &str, value: &str) -> Option<NodeId> {
        self.find_from(self.document, &|node: &MemoryNode| {
            node.attributes
                .iter()
                .any(|(n, v)| n == name && v.to_string() == value)
        })
    }

    /// Every attached node with the given tag, in document order.
    pub fn find_all_by_tag(&self, tag: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        self.walk(self.document, &mut |id: NodeId, node: &MemoryNode| {
            if node.tag.as_deref() == Some(tag) {
                found.push(id);
            }
        });
        found
    }

    fn find_from(&self, id: NodeId, pred: &dyn Fn(&MemoryNode) -> bool) -> Option<NodeId> {
        let node = self.node(id)?;
        if pred(node) {
            return Some(id);
        }
        node.children.iter().find_map(|&c| self.find_from(c, pred))
    }

    fn walk(&self, id: NodeId, visit: &mut dyn FnMut(NodeId, &MemoryNode)) {
        let Some(node) = self.node(id) else { return };
        visit(id, node);
        for &child in &node.children {
            self.walk(child, visit);
        }
    }

    /// Compact markup of a subtree, e.g. `<ul><li key="a">x</li></ul>`.
    ///
    /// Attributes are printed in insertion order; text nodes print raw.
    pub fn to_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_markup(id, &mut out);
        out
    }

    fn write_markup(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        let Some(tag) = &node.tag else {
            out.push_str(node.text.as_deref().unwrap_or_default());
            return;
        };
        let _ = write!(out, "<{tag}");
        for (name, value) in &node.attributes {
            let _ = write!(out, " {name}=\"{value}\"");
        }
        out.push('>');
        if let Some(text) = &node.text {
            out.push_str(text);
        }
        for &child in &node.children {
            self.write_markup(child, out);
        }
        let _ = write!(out, "</{tag}>");
    }

    // -------------------------------------------------------------------------
    // Interaction
    // -------------------------------------------------------------------------

    /// Dispatch an event at `event.target`, bubbling to ancestors.
    ///
    /// Returns the number of listeners invoked. Listeners are cloned out
    /// before being called so they may freely trigger further work.
    pub fn dispatch(&self, event: &SurfaceEvent) -> usize {
        let mut listeners = Vec::new();
        let mut current = Some(event.target);
        while let Some(id) = current {
            let Some(node) = self.node(id) else { break };
            if let Some((_, l)) = node.listeners.iter().find(|(e, _)| **e == *event.name) {
                listeners.push(l.clone());
            }
            current = node.parent;
        }

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    /// Move focus to a node, dispatching `blur`/`focus`.
    pub fn focus(&mut self, id: NodeId) {
        if let Some(previous) = self.focused.replace(id) {
            self.dispatch(&SurfaceEvent::new("blur", previous));
        }
        self.dispatch(&SurfaceEvent::new("focus", id));
    }

    pub fn blur(&mut self) {
        if let Some(previous) = self.focused.take() {
            self.dispatch(&SurfaceEvent::new("blur", previous));
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn alloc(&mut self, node: MemoryNode) -> NodeId {
        self.touch();
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn detach(&mut self, child: NodeId) -> Result<(), SurfaceError> {
        let parent = self.node_mut(child)?.parent.take();
        if let Some(parent) = parent {
            let siblings = &mut self.node_mut(parent)?.children;
            siblings.retain(|&c| c != child);
        }
        Ok(())
    }

    fn touch(&self) {
        self.geometry.borrow_mut().take();
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Surface impl
// =============================================================================

impl Surface for MemorySurface {
    fn create_element(&mut self, tag: &str) -> Result<NodeId, SurfaceError> {
        Ok(self.alloc(MemoryNode {
            tag: Some(Rc::from(tag)),
            ..MemoryNode::default()
        }))
    }

    fn create_text(&mut self, text: &str) -> Result<NodeId, SurfaceError> {
        Ok(self.alloc(MemoryNode {
            text: Some(text.to_string()),
            ..MemoryNode::default()
        }))
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), SurfaceError> {
        self.node_mut(node)?.text = Some(text.to_string());
        self.touch();
        Ok(())
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &AttrValue) -> Result<(), SurfaceError> {
        if self.rejected.contains(name) {
            return Err(SurfaceError::Rejected {
                name: name.to_string(),
                reason: "attribute rejected by surface".to_string(),
            });
        }
        let attributes = &mut self.node_mut(node)?.attributes;
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.clone(),
            None => attributes.push((name.to_string(), value.clone())),
        }
        self.touch();
        Ok(())
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), SurfaceError> {
        self.node_mut(node)?.attributes.retain(|(n, _)| n != name);
        self.touch();
        Ok(())
    }

    fn insert_before(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) -> Result<(), SurfaceError> {
        if self.node(parent).is_none() {
            return Err(SurfaceError::UnknownNode(parent.0));
        }
        // Validate the reference while the child is still where it was
        if let Some(reference) = before {
            if self.node(reference).and_then(|n| n.parent) != Some(parent) {
                return Err(SurfaceError::NotAChild {
                    parent: parent.0,
                    child: reference.0,
                });
            }
            if reference == child {
                return Ok(());
            }
        }
        self.detach(child)?;

        let siblings = &mut self.node_mut(parent)?.children;
        let position = before
            .and_then(|reference| siblings.iter().position(|&c| c == reference))
            .unwrap_or(siblings.len());
        siblings.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        self.touch();
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SurfaceError> {
        if self.node_mut(child)?.parent != Some(parent) {
            return Err(SurfaceError::NotAChild {
                parent: parent.0,
                child: child.0,
            });
        }
        self.detach(child)?;
        self.touch();
        Ok(())
    }

    fn add_listener(&mut self, node: NodeId, event: &str, listener: Listener) -> Result<(), SurfaceError> {
        let listeners = &mut self.node_mut(node)?.listeners;
        match listeners.iter_mut().find(|(e, _)| e == event) {
            Some(entry) => entry.1 = listener,
            None => listeners.push((event.to_string(), listener)),
        }
        Ok(())
    }

    fn remove_listener(&mut self, node: NodeId, event: &str) -> Result<(), SurfaceError> {
        self.node_mut(node)?.listeners.retain(|(e, _)| e != event);
        Ok(())
    }

    fn release(&mut self, node: NodeId) {
        if node == self.document {
            return;
        }
        let _ = self.detach(node);

        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(removed) = self.nodes.get_mut(id.0).and_then(Option::take) {
                stack.extend(removed.children);
                self.free.push(id.0);
                if self.focused == Some(id) {
                    self.focused = None;
                }
            }
        }
        self.touch();
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent
    }

    fn geometry(&self, node: NodeId) -> Option<Geometry> {
        if !self.contains(self.document, node) {
            return None;
        }
        let mut cache = self.geometry.borrow_mut();
        let layout = cache.get_or_insert_with(|| compute_geometry(self, self.document, self.viewport));
        layout.get(&node).copied()
    }

    fn focused(&self) -> Option<NodeId> {
        self.focused
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_build_and_markup() {
        let mut surface = MemorySurface::new();
        let doc = surface.document();
        let div = surface.create_element("div").unwrap();
        let text = surface.create_text("hi").unwrap();
        surface.set_attribute(div, "id", &AttrValue::from("x")).unwrap();
        surface.insert_before(div, text, None).unwrap();
        surface.insert_before(doc, div, None).unwrap();

        assert_eq!(surface.to_markup(div), "<div id=\"x\">hi</div>");
        assert_eq!(surface.text_content(doc), "hi");
        assert_eq!(surface.find_by_attribute("id", "x"), Some(div));
    }

    #[test]
    fn test_insert_before_moves() {
        let mut surface = MemorySurface::new();
        let parent = surface.create_element("ul").unwrap();
        let a = surface.create_element("li").unwrap();
        let b = surface.create_element("li").unwrap();
        surface.insert_before(parent, a, None).unwrap();
        surface.insert_before(parent, b, None).unwrap();

        surface.insert_before(parent, b, Some(a)).unwrap();
        assert_eq!(surface.children(parent), vec![b, a]);
    }

    #[test]
    fn test_insert_before_foreign_reference_keeps_child() {
        let mut surface = MemorySurface::new();
        let list = surface.create_element("ul").unwrap();
        let other = surface.create_element("ol").unwrap();
        let item = surface.create_element("li").unwrap();
        let stranger = surface.create_element("li").unwrap();
        surface.insert_before(list, item, None).unwrap();
        surface.insert_before(other, stranger, None).unwrap();

        let result = surface.insert_before(other, item, Some(item));
        assert!(matches!(result, Err(SurfaceError::NotAChild { .. })));
        let result = surface.insert_before(list, item, Some(stranger));
        assert!(matches!(result, Err(SurfaceError::NotAChild { .. })));

        assert_eq!(surface.parent(item), Some(list));
        assert_eq!(surface.children(list), vec![item]);
    }

    #[test]
    fn test_rejected_attribute() {
        let mut surface = MemorySurface::new();
        let div = surface.create_element("div").unwrap();
        surface.reject_attribute("bad");

        let result = surface.set_attribute(div, "bad", &AttrValue::from(1));
        assert!(matches!(result, Err(SurfaceError::Rejected { .. })));
        assert!(surface.set_attribute(div, "good", &AttrValue::from(1)).is_ok());
    }

    #[test]
    fn test_release_frees_subtree_and_reuses() {
        let mut surface = MemorySurface::new();
        let parent = surface.create_element("div").unwrap();
        let child = surface.create_element("span").unwrap();
        surface.insert_before(parent, child, None).unwrap();

        let before = surface.node_count();
        surface.release(parent);
        assert_eq!(surface.node_count(), before - 2);
        assert!(!surface.exists(child));

        let reused = surface.create_element("p").unwrap();
        assert!(reused == parent || reused == child);
    }

    #[test]
    fn test_dispatch_bubbles() {
        let mut surface = MemorySurface::new();
        let outer = surface.create_element("div").unwrap();
        let inner = surface.create_element("button").unwrap();
        surface.insert_before(outer, inner, None).unwrap();

        let hits = Rc::new(Cell::new(0));
        let h1 = hits.clone();
        let h2 = hits.clone();
        surface.add_listener(outer, "click", Rc::new(move |_| h1.set(h1.get() + 1))).unwrap();
        surface.add_listener(inner, "click", Rc::new(move |_| h2.set(h2.get() + 10))).unwrap();

        let invoked = surface.dispatch(&SurfaceEvent::new("click", inner));
        assert_eq!(invoked, 2);
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn test_geometry_only_for_attached_nodes() {
        let mut surface = MemorySurface::with_viewport(40.0, 10.0);
        let doc = surface.document();
        let div = surface.create_element("div").unwrap();
        surface.set_attribute(div, "width", &AttrValue::from(12)).unwrap();
        surface.set_attribute(div, "height", &AttrValue::from(3)).unwrap();

        assert_eq!(surface.geometry(div), None);

        surface.insert_before(doc, div, None).unwrap();
        let geometry = surface.geometry(div).expect("attached node has geometry");
        assert_eq!(geometry.width, 12.0);
        assert_eq!(geometry.height, 3.0);
    }
}
