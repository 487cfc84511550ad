//! Render pass - Turn widget output into a resolved tree.
//!
//! Starting at the root widget the pass descends only where work is needed:
//!
//! - dirty (or never rendered) widgets render and resolve their output
//! - clean widgets with a dirty descendant rebuild the path down to it
//! - clean widgets return their previous subtree as is
//!
//! While resolving a widget's output, child widget nodes are matched to the
//! instances the widget owned last time: keyed ones by (type, key) anywhere
//! in the output, unkeyed ones by (type, child-index path). Instances left
//! unmatched are destroyed, children before parents.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::scheduler::Scheduler;
use super::tree::{RElement, RNode, RWidget};
use crate::error::WidgetError;
use crate::meta::{ListenRequest, MetaRegistry};
use crate::surface::Surface;
use crate::types::{Capabilities, Key};
use crate::vnode::{VNode, WidgetNode, WidgetRef};
use crate::widget::{ChildSlot, SlotPosition, WidgetArena, WidgetBase, WidgetId, WidgetRegistry, WidgetShared};

/// Child-widget matching state of the widget currently resolving.
struct Slots {
    previous: HashMap<ChildSlot, WidgetId>,
    next: HashMap<ChildSlot, WidgetId>,
}

pub(crate) struct RenderPass<'p> {
    arena: &'p mut WidgetArena,
    registry: &'p WidgetRegistry,
    meta: &'p MetaRegistry,
    surface: &'p dyn Surface,
    scheduler: &'p Rc<Scheduler>,
    /// Conditions to report once the pass is over.
    pub(crate) errors: Vec<WidgetError>,
    /// Widgets that rendered during this pass, parents first.
    pub(crate) rendered: Vec<WidgetId>,
    pub(crate) listens: Vec<ListenRequest>,
}

impl<'p> RenderPass<'p> {
    pub(crate) fn new(
        arena: &'p mut WidgetArena,
        registry: &'p WidgetRegistry,
        meta: &'p MetaRegistry,
        surface: &'p dyn Surface,
        scheduler: &'p Rc<Scheduler>,
    ) -> Self {
        Self {
            arena,
            registry,
            meta,
            surface,
            scheduler,
            errors: Vec::new(),
            rendered: Vec::new(),
            listens: Vec::new(),
        }
    }

    // =========================================================================
    // Widgets
    // =========================================================================

    /// Resolved output of a widget, rendering only if needed.
    pub(crate) fn render_widget(&mut self, id: WidgetId) -> Rc<RNode> {
        let Some(base) = self.arena.get(id) else {
            return Rc::new(RNode::placeholder(id));
        };
        let shared = base.shared().clone();

        if !shared.is_dirty() && shared.has_rendered() {
            if let Some(previous) = base.rendered.clone() {
                if !shared.take_subtree_dirty() {
                    return previous;
                }
                return self.refresh_widget(id, previous);
            }
        }
        self.full_render(id, &shared)
    }

    fn full_render(&mut self, id: WidgetId, shared: &Rc<WidgetShared>) -> Rc<RNode> {
        let Some(base) = self.arena.get_mut(id) else {
            return Rc::new(RNode::placeholder(id));
        };
        let name = base.name().to_string();
        // Descendants are visited by the resolve below. Cleared up front so
        // an invalidation raised meanwhile survives into the next tick
        shared.take_subtree_dirty();
        let (result, requests) = base.render(self.meta, self.surface);
        self.listens.extend(requests);
        shared.mark_rendered();

        let vnode = match result {
            Ok(vnode) => vnode,
            Err(error) => {
                tracing::error!(widget = %name, %error, "render failed, keeping previous output");
                self.errors.push(error);
                return self.keep_previous(id);
            }
        };

        let previous = std::mem::take(&mut base.slots);
        let mut slots = Slots {
            previous,
            next: HashMap::new(),
        };
        let mut path = Vec::new();
        let key = vnode.key().cloned();
        let root = Rc::new(self.resolve(id, shared, &vnode, key, &mut path, &mut slots));

        for (_, orphan) in slots.previous.drain() {
            destroy_widget_tree(self.arena, orphan);
        }

        if let Some(base) = self.arena.get_mut(id) {
            base.slots = slots.next;
            base.rendered = Some(root.clone());
        }
        self.rendered.push(id);
        root
    }

    /// Fail-static: a failed render leaves the previous subtree in place.
    fn keep_previous(&mut self, id: WidgetId) -> Rc<RNode> {
        let previous = self.arena.get(id).and_then(|base| base.rendered.clone());
        match previous {
            // Child widgets of the kept output may still need their own render
            Some(previous) => self.refresh_widget(id, previous),
            None => {
                let placeholder = Rc::new(RNode::placeholder(id));
                if let Some(base) = self.arena.get_mut(id) {
                    base.rendered = Some(placeholder.clone());
                }
                self.rendered.push(id);
                placeholder
            }
        }
    }

    fn refresh_widget(&mut self, id: WidgetId, previous: Rc<RNode>) -> Rc<RNode> {
        let Some(next) = self.refresh(&previous) else {
            return previous;
        };
        let next = Rc::new(next);
        if let Some(base) = self.arena.get_mut(id) {
            base.rendered = Some(next.clone());
        }
        next
    }

    /// Rebuild the path from a clean widget's output down to re-rendered
    /// descendants. `None` when nothing below changed.
    fn refresh(&mut self, node: &RNode) -> Option<RNode> {
        match node {
            RNode::Widget(w) => {
                let root = self.render_widget(w.id);
                if Rc::ptr_eq(&root, &w.root) {
                    return None;
                }
                Some(RNode::Widget(RWidget {
                    id: w.id,
                    key: w.key.clone(),
                    root,
                }))
            }
            RNode::Element(e) => {
                let children: Vec<Rc<RNode>> = e.children.borrow().clone();
                let mut changed = false;
                let mut next = Vec::with_capacity(children.len());
                for child in &children {
                    match self.refresh(child) {
                        Some(updated) => {
                            changed = true;
                            next.push(Rc::new(updated));
                        }
                        None => next.push(child.clone()),
                    }
                }
                if !changed {
                    return None;
                }
                Some(RNode::Element(RElement {
                    source: e.source.clone(),
                    key: e.key.clone(),
                    owner: e.owner,
                    children: RefCell::new(next),
                    node: Cell::new(e.node.get()),
                }))
            }
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn resolve(
        &mut self,
        owner: WidgetId,
        owner_shared: &Rc<WidgetShared>,
        vnode: &VNode,
        key: Option<Key>,
        path: &mut Vec<usize>,
        slots: &mut Slots,
    ) -> RNode {
        match vnode {
            VNode::Element(element) => {
                let mut seen: HashSet<Key> = HashSet::new();
                let mut children = Vec::with_capacity(element.children.len());
                for (index, child) in element.children.iter().enumerate() {
                    let child_key = match child.key() {
                        Some(k) if !seen.insert(k.clone()) => {
                            self.report_duplicate(owner_shared, k);
                            None
                        }
                        other => other.cloned(),
                    };
                    path.push(index);
                    children.push(Rc::new(self.resolve(owner, owner_shared, child, child_key, path, slots)));
                    path.pop();
                }
                RNode::element(element.clone(), key, owner, children)
            }
            VNode::Widget(node) => self.resolve_widget(owner, owner_shared, node, key, path, slots),
        }
    }

    fn resolve_widget(
        &mut self,
        owner: WidgetId,
        owner_shared: &Rc<WidgetShared>,
        node: &WidgetNode,
        mut key: Option<Key>,
        path: &[usize],
        slots: &mut Slots,
    ) -> RNode {
        let widget_type = match &node.widget {
            WidgetRef::Type(widget_type) => widget_type.clone(),
            WidgetRef::Label(label) => match self.registry.get(label) {
                Some(widget_type) => widget_type.clone(),
                None => {
                    let error = WidgetError::UnresolvedWidget {
                        label: label.to_string(),
                    };
                    tracing::error!(owner = %owner_shared.name, %error, "unresolved widget label");
                    self.errors.push(error);
                    return RNode::placeholder(owner);
                }
            },
        };

        let mut slot = ChildSlot {
            widget_type: widget_type.clone(),
            position: match &key {
                Some(k) => SlotPosition::Keyed(k.clone()),
                None => SlotPosition::Path(path.to_vec()),
            },
        };
        // Keys are only sibling-unique; a cousin with the same key and type
        // falls back to positional matching
        if slots.next.contains_key(&slot) {
            slot.position = SlotPosition::Path(path.to_vec());
            key = None;
        }

        let children = if node.children.is_empty()
            || widget_type.capabilities().contains(Capabilities::SUPPORTS_CHILDREN)
        {
            node.children.clone()
        } else {
            tracing::warn!(
                widget = %widget_type.name(),
                "children passed to a widget type without SUPPORTS_CHILDREN are dropped"
            );
            Vec::new()
        };

        let id = match slots.previous.remove(&slot) {
            Some(existing) if self.arena.contains(existing) => existing,
            _ => {
                let scheduler = self.scheduler;
                let instance_key = key.clone();
                self.arena.allocate(|id| {
                    WidgetBase::new(id, widget_type.clone(), instance_key, Some(owner_shared), scheduler)
                })
            }
        };

        if let Some(base) = self.arena.get_mut(id) {
            if let Err(error) = base
                .set_properties(node.properties.clone())
                .and_then(|_| base.set_children(children))
            {
                self.errors.push(error);
            }
        }
        slots.next.insert(slot, id);

        let root = self.render_widget(id);
        RNode::Widget(RWidget { id, key, root })
    }

    fn report_duplicate(&mut self, owner: &Rc<WidgetShared>, key: &Key) {
        tracing::warn!(widget = %owner.name, %key, "duplicate sibling key, treating later node as unkeyed");
        self.errors.push(WidgetError::DuplicateKey { key: key.clone() });
    }
}

/// Destroy a widget and everything it owns, children before parents.
pub(crate) fn destroy_widget_tree(arena: &mut WidgetArena, id: WidgetId) {
    let children: Vec<WidgetId> = match arena.get_mut(id) {
        Some(base) => base.slots.drain().map(|(_, child)| child).collect(),
        None => return,
    };
    for child in children {
        destroy_widget_tree(arena, child);
    }
    if let Some(mut base) = arena.release(id) {
        let _ = base.destroy();
    }
}
