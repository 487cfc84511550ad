//! Patcher - Diff two resolved trees and apply the difference to a surface.
//!
//! At each parent the work happens in a fixed order:
//!
//! 1. new children are created, detached
//! 2. old children without a match are removed
//! 3. insertions and moves put the children in their new order
//! 4. matched children are patched recursively
//! 5. the parent's own text, attributes and listeners are updated
//!
//! Subtrees shared by `Rc` between the old and new tree are skipped outright.
//! A subtree that is already bound to surface nodes (a clean widget moved to
//! a new parent) is adopted rather than recreated.
//!
//! Every surface failure is reported and skipped. Removed nodes are released
//! only once the whole patch is done, so node ids are never recycled while a
//! patch is in flight.
//!
//! A merged root is bound to a host node the projector did not create. That
//! node is never removed or released; an incompatible root renders into it.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use super::tree::{Ident, RElement, RNode};
use crate::error::{SurfaceError, WidgetError};
use crate::meta::{ListenRequest, MetaEvents};
use crate::surface::{Listener, NodeId, Surface, SurfaceEvent};
use crate::vnode::{ElementNode, EventHandler};
use crate::widget::WidgetHandle;

// =============================================================================
// Patch log
// =============================================================================

/// One applied surface mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Create { node: NodeId, tag: Rc<str> },
    Insert { parent: NodeId, node: NodeId, before: Option<NodeId> },
    Move { parent: NodeId, node: NodeId, before: Option<NodeId> },
    Remove { parent: NodeId, node: NodeId },
    SetText { node: NodeId },
    SetAttribute { node: NodeId, name: Rc<str> },
    RemoveAttribute { node: NodeId, name: Rc<str> },
    AddListener { node: NodeId, event: Rc<str> },
    RemoveListener { node: NodeId, event: Rc<str> },
}

impl Patch {
    /// Create, insert and remove: patches that change which nodes exist where.
    pub fn is_structural(&self) -> bool {
        matches!(self, Patch::Create { .. } | Patch::Insert { .. } | Patch::Remove { .. })
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Patch::Move { .. })
    }
}

// =============================================================================
// Listener trampolines
// =============================================================================

struct MetaListener {
    kind: TypeId,
    provider: Rc<dyn MetaEvents>,
    widget: WidgetHandle,
}

/// The one surface listener bound per (node, event).
///
/// Re-rendering swaps the handler behind it instead of re-registering with
/// the surface. Meta providers that asked for the event share the slot.
pub(crate) struct ListenerSlot {
    node: NodeId,
    handler: RefCell<Option<EventHandler>>,
    meta: RefCell<Vec<MetaListener>>,
}

impl ListenerSlot {
    fn fire(&self, event: &SurfaceEvent) {
        let handler = self.handler.borrow().clone();
        if let Some(handler) = handler {
            handler(event);
        }

        let listeners: Vec<(Rc<dyn MetaEvents>, WidgetHandle)> = self
            .meta
            .borrow()
            .iter()
            .map(|l| (l.provider.clone(), l.widget.clone()))
            .collect();
        for (provider, widget) in listeners {
            if provider.handle_event(self.node, event) {
                // Destroyed widgets just stop listening
                let _ = widget.invalidate();
            }
        }
    }

    fn is_unused(&self) -> bool {
        self.handler.borrow().is_none() && self.meta.borrow().is_empty()
    }
}

fn trampoline(slot: &Rc<ListenerSlot>) -> Listener {
    let slot: Weak<ListenerSlot> = Rc::downgrade(slot);
    Rc::new(move |event: &SurfaceEvent| {
        if let Some(slot) = slot.upgrade() {
            slot.fire(event);
        }
    })
}

/// Listener slots of every bound node.
#[derive(Default)]
pub(crate) struct ListenerTable {
    nodes: HashMap<NodeId, Vec<(Rc<str>, Rc<ListenerSlot>)>>,
}

impl ListenerTable {
    fn get(&self, node: NodeId, event: &str) -> Option<Rc<ListenerSlot>> {
        self.nodes
            .get(&node)?
            .iter()
            .find(|(e, _)| &**e == event)
            .map(|(_, slot)| slot.clone())
    }

    fn insert(&mut self, node: NodeId, event: Rc<str>, slot: Rc<ListenerSlot>) {
        self.nodes.entry(node).or_default().push((event, slot));
    }

    fn remove(&mut self, node: NodeId, event: &str) {
        if let Some(slots) = self.nodes.get_mut(&node) {
            slots.retain(|(e, _)| &**e != event);
            if slots.is_empty() {
                self.nodes.remove(&node);
            }
        }
    }

    fn drop_node(&mut self, node: NodeId) {
        self.nodes.remove(&node);
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
    }
}

// =============================================================================
// Patcher
// =============================================================================

/// Result of one patch.
pub(crate) struct Applied {
    pub(crate) patches: Vec<Patch>,
    pub(crate) errors: Vec<WidgetError>,
    /// Surface nodes released at the end of the patch.
    pub(crate) released: Vec<NodeId>,
}

pub(crate) struct Patcher<'a> {
    surface: &'a mut dyn Surface,
    listeners: &'a mut ListenerTable,
    patches: Vec<Patch>,
    errors: Vec<WidgetError>,
    /// Removed subtrees, released when the patch completes.
    removed: Vec<Rc<RNode>>,
    /// Bound subtrees re-inserted under a new parent during this patch.
    adopted: HashSet<NodeId>,
    /// Node adopted by `merge`.
    host: Option<NodeId>,
}

impl<'a> Patcher<'a> {
    pub(crate) fn new(surface: &'a mut dyn Surface, listeners: &'a mut ListenerTable) -> Self {
        Self {
            surface,
            listeners,
            patches: Vec::new(),
            errors: Vec::new(),
            removed: Vec::new(),
            adopted: HashSet::new(),
            host: None,
        }
    }

    /// Patch a tree whose root element is bound to the merged `host`.
    pub(crate) fn with_host(mut self, host: Option<NodeId>) -> Self {
        self.host = host;
        self
    }

    /// Release removed subtrees and hand back the patch log, failures and
    /// released nodes.
    pub(crate) fn finish(mut self) -> Applied {
        let removed = std::mem::take(&mut self.removed);
        let mut released = Vec::new();
        for subtree in removed {
            let Some(top) = subtree.dom_node() else { continue };
            // Moved elsewhere during this patch: still in use
            if self.adopted.contains(&top) || self.surface.parent(top).is_some() || self.host == Some(top) {
                continue;
            }
            let mut nodes = Vec::new();
            self.collect_owned(&subtree, &mut nodes);
            for node in &nodes {
                self.listeners.drop_node(*node);
            }
            self.surface.release(top);
            released.extend(nodes);
        }
        Applied {
            patches: self.patches,
            errors: self.errors,
            released,
        }
    }

    /// Nodes of a subtree, skipping subtrees adopted by a new parent.
    fn collect_owned(&self, subtree: &RNode, out: &mut Vec<NodeId>) {
        match subtree {
            RNode::Element(e) => {
                let Some(node) = e.node.get() else { return };
                if self.adopted.contains(&node) && !out.is_empty() {
                    return;
                }
                out.push(node);
                for child in e.children.borrow().iter() {
                    self.collect_owned(child, out);
                }
            }
            RNode::Widget(w) => self.collect_owned(&w.root, out),
        }
    }

    fn fail(&mut self, operation: &'static str, error: SurfaceError) {
        tracing::warn!(operation, %error, "patch operation failed");
        self.errors.push(WidgetError::patch(operation, error));
    }

    // -------------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------------

    /// Mount `new` under `parent`, or patch it against `old`.
    pub(crate) fn patch_root(&mut self, parent: NodeId, old: Option<&Rc<RNode>>, new: &Rc<RNode>) {
        match old {
            Some(old) if old.dom_node().is_some() => self.patch_node(parent, old, new),
            _ => self.mount(parent, new, None),
        }
    }

    /// Bind `new`'s root element to an existing surface node instead of
    /// creating one, then build its children under it.
    pub(crate) fn merge(&mut self, existing: NodeId, new: &Rc<RNode>) {
        let root = new.first_element();
        root.node.set(Some(existing));
        if let Some(text) = root.source.text() {
            self.set_text(existing, text);
        }
        for child in root.children.borrow().iter() {
            if let Some(node) = self.create(child) {
                self.insert(existing, node, None, false);
            }
        }
        self.apply_attributes(existing, None, &root.source);
    }

    /// Create `new` and insert it under `parent` before `before`.
    pub(crate) fn mount(&mut self, parent: NodeId, new: &Rc<RNode>, before: Option<NodeId>) {
        if let Some(node) = self.create(new) {
            if !self.insert(parent, node, before, false) {
                self.removed.push(new.clone());
            }
        }
    }

    /// Remove a whole tree from `parent`.
    pub(crate) fn unmount(&mut self, parent: NodeId, old: &Rc<RNode>) {
        self.remove(parent, old);
    }

    /// Remove the top-level children and root listeners of a merged tree,
    /// leaving the adopted host node itself in place.
    pub(crate) fn unmount_children(&mut self, tree: &Rc<RNode>) {
        let root = tree.first_element();
        let Some(node) = root.node.get() else { return };
        let children: Vec<Rc<RNode>> = root.children.borrow().clone();
        for child in &children {
            self.remove(node, child);
        }
        for (event, _) in &root.source.events {
            self.unbind_handler(node, event);
        }
    }

    /// Detach a node the projector does not own (the target of `replace`).
    pub(crate) fn remove_foreign(&mut self, parent: NodeId, node: NodeId) {
        match self.surface.remove_child(parent, node) {
            Ok(()) => self.patches.push(Patch::Remove { parent, node }),
            Err(error) => self.fail("remove_child", error),
        }
    }

    /// Route a meta provider's event request through the node's slot.
    pub(crate) fn install_meta_listener(&mut self, request: ListenRequest) {
        let Some(slot) = self.slot(request.node, &request.event) else {
            return;
        };
        let mut meta = slot.meta.borrow_mut();
        let id = request.widget.id();
        if meta.iter().any(|l| l.kind == request.kind && l.widget.id() == id) {
            return;
        }
        meta.push(MetaListener {
            kind: request.kind,
            provider: request.provider,
            widget: request.widget,
        });
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    fn create(&mut self, node: &RNode) -> Option<NodeId> {
        // Already bound: a clean subtree moving to a new parent
        if let Some(existing) = node.dom_node() {
            self.adopted.insert(existing);
            return Some(existing);
        }
        match node {
            RNode::Widget(w) => self.create(&w.root),
            RNode::Element(e) => self.create_element(e),
        }
    }

    fn create_element(&mut self, element: &RElement) -> Option<NodeId> {
        let source = &element.source;
        let created = if element.is_text() {
            self.surface.create_text(source.text().unwrap_or_default())
        } else {
            self.surface.create_element(element.tag())
        };
        let node = match created {
            Ok(node) => node,
            Err(error) => {
                self.fail("create", error);
                return None;
            }
        };
        self.patches.push(Patch::Create {
            node,
            tag: source.tag.clone(),
        });
        element.node.set(Some(node));

        if !element.is_text() {
            if let Some(text) = source.text() {
                self.set_text(node, text);
            }
        }

        for child in element.children.borrow().iter() {
            if let Some(child_node) = self.create(child) {
                if !self.insert(node, child_node, None, false) {
                    self.removed.push(child.clone());
                }
            }
        }

        self.apply_attributes(node, None, source);
        Some(node)
    }

    // -------------------------------------------------------------------------
    // Update
    // -------------------------------------------------------------------------

    fn patch_node(&mut self, parent: NodeId, old: &Rc<RNode>, new: &Rc<RNode>) {
        if Rc::ptr_eq(old, new) {
            return;
        }
        match (&**old, &**new) {
            (RNode::Widget(a), RNode::Widget(b)) if a.id == b.id => self.patch_node(parent, &a.root, &b.root),
            (RNode::Element(a), RNode::Element(b)) if compatible(a, b) => self.patch_element(a, b),
            _ => self.replace(parent, old, new),
        }
    }

    fn replace(&mut self, parent: NodeId, old: &Rc<RNode>, new: &Rc<RNode>) {
        if self.host.is_some() && old.dom_node() == self.host {
            self.rebind_host(old, new);
            return;
        }
        let before = old.dom_node();
        self.mount(parent, new, before);
        self.remove(parent, old);
    }

    /// Render an incompatible root into the host node: its old children go,
    /// the new ones are built fresh and attributes are reconciled.
    fn rebind_host(&mut self, old: &Rc<RNode>, new: &Rc<RNode>) {
        let Some(host) = self.host else { return };
        let old_root = old.first_element();
        let new_root = new.first_element();
        tracing::warn!(
            from = old_root.tag(),
            to = new_root.tag(),
            "merged root changed tag, rendering into the adopted node"
        );

        let children: Vec<Rc<RNode>> = old_root.children.borrow().clone();
        for child in &children {
            self.remove(host, child);
        }

        new_root.node.set(Some(host));
        if old_root.source.text != new_root.source.text {
            self.set_text(host, new_root.source.text().unwrap_or_default());
        }
        for child in new_root.children.borrow().iter() {
            if let Some(node) = self.create(child) {
                if !self.insert(host, node, None, false) {
                    self.removed.push(child.clone());
                }
            }
        }

        self.apply_attributes(host, Some(&old_root.source), &new_root.source);
    }

    fn patch_element(&mut self, old: &RElement, new: &RElement) {
        let Some(node) = old.node.get() else { return };
        new.node.set(Some(node));

        self.patch_children(node, old, new);

        if !Rc::ptr_eq(&old.source, &new.source) {
            if old.source.text != new.source.text {
                self.set_text(node, new.source.text().unwrap_or_default());
            }
            self.apply_attributes(node, Some(&old.source), &new.source);
        }
    }

    fn patch_children(&mut self, parent: NodeId, old_element: &RElement, new_element: &RElement) {
        let old: Vec<Rc<RNode>> = old_element.children.borrow().clone();
        let mut new: Vec<Rc<RNode>> = new_element.children.borrow().clone();
        if old.is_empty() && new.is_empty() {
            return;
        }

        let live: Vec<bool> = old.iter().map(|c| c.dom_node().is_some()).collect();
        let mut used = vec![false; old.len()];

        // Keyed elements and widgets match anywhere; unkeyed by index
        let mut by_ident: HashMap<Ident, usize> = HashMap::new();
        for (i, child) in old.iter().enumerate() {
            if !live[i] {
                continue;
            }
            let ident = child.ident();
            if !matches!(ident, Ident::Unkeyed(_)) {
                by_ident.insert(ident, i);
            }
        }

        let mut matched: Vec<Option<usize>> = vec![None; new.len()];
        for (j, child) in new.iter().enumerate() {
            let ident = child.ident();
            let found = match &ident {
                Ident::Unkeyed(_) => (j < old.len() && live[j] && !used[j] && old[j].ident() == ident)
                    .then_some(j)
                    .filter(|&i| compatible_nodes(&old[i], child)),
                _ => by_ident.get(&ident).copied().filter(|&i| !used[i]),
            };
            if let Some(i) = found {
                used[i] = true;
                matched[j] = Some(i);
            }
        }

        // 1. Create new subtrees detached
        let mut created: Vec<Option<NodeId>> = vec![None; new.len()];
        let mut substituted = false;
        for j in 0..new.len() {
            if matched[j].is_some() {
                continue;
            }
            match self.create(&new[j]) {
                Some(node) => created[j] = Some(node),
                // Keep whatever was at this position until a later render succeeds
                None if j < old.len() && live[j] && !used[j] => {
                    used[j] = true;
                    matched[j] = Some(j);
                    new[j] = old[j].clone();
                    substituted = true;
                }
                None => {}
            }
        }

        // 2. Remove unmatched old children
        for (i, child) in old.iter().enumerate() {
            if live[i] && !used[i] {
                self.remove(parent, child);
            }
        }

        // 3. Insert and move into the new order
        let mut current: Vec<NodeId> = old
            .iter()
            .enumerate()
            .filter(|(i, _)| used[*i])
            .filter_map(|(_, child)| child.dom_node())
            .collect();
        let mut position = 0;
        for j in 0..new.len() {
            let desired = match matched[j] {
                Some(i) => old[i].dom_node(),
                None => created[j],
            };
            let Some(desired) = desired else { continue };
            if current.get(position) == Some(&desired) {
                position += 1;
                continue;
            }

            let before = current.get(position).copied();
            let existing = current.iter().position(|&n| n == desired);
            if !self.insert(parent, desired, before, existing.is_some()) {
                if existing.is_none() {
                    self.removed.push(new[j].clone());
                }
                continue;
            }
            if let Some(k) = existing {
                current.remove(k);
            }
            current.insert(position, desired);
            position += 1;
        }

        // 4. Patch matched pairs
        for j in 0..new.len() {
            if let Some(i) = matched[j] {
                self.patch_node(parent, &old[i], &new[j]);
            }
        }

        if substituted {
            *new_element.children.borrow_mut() = new;
        }
    }

    fn apply_attributes(&mut self, node: NodeId, old: Option<&ElementNode>, new: &ElementNode) {
        for (name, value) in &new.attributes {
            let unchanged = old.and_then(|o| o.attribute(name)) == Some(value);
            if unchanged {
                continue;
            }
            match self.surface.set_attribute(node, name, value) {
                Ok(()) => self.patches.push(Patch::SetAttribute {
                    node,
                    name: name.clone(),
                }),
                Err(error) => self.fail("set_attribute", error),
            }
        }

        if let Some(old) = old {
            for (name, _) in &old.attributes {
                if new.attribute(name).is_some() {
                    continue;
                }
                match self.surface.remove_attribute(node, name) {
                    Ok(()) => self.patches.push(Patch::RemoveAttribute {
                        node,
                        name: name.clone(),
                    }),
                    Err(error) => self.fail("remove_attribute", error),
                }
            }
        }

        for (event, handler) in &new.events {
            if let Some(slot) = self.slot(node, event) {
                *slot.handler.borrow_mut() = Some(handler.clone());
            }
        }

        if let Some(old) = old {
            for (event, _) in &old.events {
                if new.handler(event).is_none() {
                    self.unbind_handler(node, event);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Primitive operations
    // -------------------------------------------------------------------------

    fn set_text(&mut self, node: NodeId, text: &str) {
        match self.surface.set_text(node, text) {
            Ok(()) => self.patches.push(Patch::SetText { node }),
            Err(error) => self.fail("set_text", error),
        }
    }

    fn insert(&mut self, parent: NodeId, node: NodeId, before: Option<NodeId>, is_move: bool) -> bool {
        match self.surface.insert_before(parent, node, before) {
            Ok(()) => {
                self.patches.push(if is_move {
                    Patch::Move { parent, node, before }
                } else {
                    Patch::Insert { parent, node, before }
                });
                true
            }
            Err(error) => {
                self.fail("insert_before", error);
                false
            }
        }
    }

    fn remove(&mut self, parent: NodeId, old: &Rc<RNode>) {
        let Some(node) = old.dom_node() else { return };
        // Already re-parented by an adoption earlier in this patch
        if self.surface.parent(node) == Some(parent) {
            match self.surface.remove_child(parent, node) {
                Ok(()) => self.patches.push(Patch::Remove { parent, node }),
                Err(error) => self.fail("remove_child", error),
            }
        }
        self.removed.push(old.clone());
    }

    /// Slot for (node, event), binding a trampoline on first use.
    fn slot(&mut self, node: NodeId, event: &Rc<str>) -> Option<Rc<ListenerSlot>> {
        if let Some(slot) = self.listeners.get(node, event) {
            return Some(slot);
        }
        let slot = Rc::new(ListenerSlot {
            node,
            handler: RefCell::new(None),
            meta: RefCell::new(Vec::new()),
        });
        match self.surface.add_listener(node, event, trampoline(&slot)) {
            Ok(()) => {
                self.patches.push(Patch::AddListener {
                    node,
                    event: event.clone(),
                });
                self.listeners.insert(node, event.clone(), slot.clone());
                Some(slot)
            }
            Err(error) => {
                self.fail("add_listener", error);
                None
            }
        }
    }

    fn unbind_handler(&mut self, node: NodeId, event: &str) {
        let Some(slot) = self.listeners.get(node, event) else { return };
        slot.handler.borrow_mut().take();
        if !slot.is_unused() {
            return;
        }
        self.listeners.remove(node, event);
        match self.surface.remove_listener(node, event) {
            Ok(()) => self.patches.push(Patch::RemoveListener {
                node,
                event: Rc::from(event),
            }),
            Err(error) => self.fail("remove_listener", error),
        }
    }
}

fn compatible(old: &RElement, new: &RElement) -> bool {
    old.node.get().is_some() && old.source.tag == new.source.tag && old.key == new.key
}

fn compatible_nodes(old: &RNode, new: &RNode) -> bool {
    match (old, new) {
        (RNode::Element(a), RNode::Element(b)) => compatible(a, b),
        _ => false,
    }
}
