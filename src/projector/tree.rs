//! Resolved tree - Render output with widgets expanded and surface nodes bound.
//!
//! The projector never diffs raw VNodes. Each render pass turns the root's
//! output into an [`RNode`] tree where widget nodes are replaced by the
//! instance that renders them and every element carries the surface node it
//! was patched into. Clean widgets contribute their previous subtree by
//! `Rc`, which is what lets the diff skip them with a pointer comparison.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::surface::NodeId;
use crate::types::Key;
use crate::vnode::{ElementNode, TEXT_TAG};
use crate::widget::WidgetId;

pub(crate) enum RNode {
    Element(RElement),
    Widget(RWidget),
}

pub(crate) struct RElement {
    /// Description this element was resolved from.
    pub(crate) source: Rc<ElementNode>,
    /// Effective key: `None` when the source key duplicated a sibling's.
    pub(crate) key: Option<Key>,
    /// Widget whose render produced this element.
    pub(crate) owner: WidgetId,
    pub(crate) children: RefCell<Vec<Rc<RNode>>>,
    pub(crate) node: Cell<Option<NodeId>>,
}

pub(crate) struct RWidget {
    pub(crate) id: WidgetId,
    pub(crate) key: Option<Key>,
    pub(crate) root: Rc<RNode>,
}

/// Identity used to match old and new children of one parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Ident {
    Keyed(Rc<str>, Key),
    Unkeyed(Rc<str>),
    Widget(WidgetId),
}

impl RNode {
    pub(crate) fn element(source: Rc<ElementNode>, key: Option<Key>, owner: WidgetId, children: Vec<Rc<RNode>>) -> Self {
        RNode::Element(RElement {
            source,
            key,
            owner,
            children: RefCell::new(children),
            node: Cell::new(None),
        })
    }

    /// Empty text node standing in for a widget that has nothing to show.
    pub(crate) fn placeholder(owner: WidgetId) -> Self {
        let source = Rc::new(ElementNode {
            tag: Rc::from(TEXT_TAG),
            key: None,
            attributes: Vec::new(),
            events: Vec::new(),
            text: Some(Rc::from("")),
            children: Vec::new(),
        });
        RNode::element(source, None, owner, Vec::new())
    }

    /// Surface node at the top of this subtree.
    pub(crate) fn dom_node(&self) -> Option<NodeId> {
        match self {
            RNode::Element(e) => e.node.get(),
            RNode::Widget(w) => w.root.dom_node(),
        }
    }

    pub(crate) fn ident(&self) -> Ident {
        match self {
            RNode::Element(e) => match &e.key {
                Some(key) => Ident::Keyed(e.source.tag.clone(), key.clone()),
                None => Ident::Unkeyed(e.source.tag.clone()),
            },
            RNode::Widget(w) => Ident::Widget(w.id),
        }
    }

    /// First element of the subtree (a widget's root element).
    pub(crate) fn first_element(&self) -> &RElement {
        match self {
            RNode::Element(e) => e,
            RNode::Widget(w) => w.root.first_element(),
        }
    }

    /// Keyed elements rendered by the owning widget itself. Child widgets'
    /// output is not descended into.
    pub(crate) fn collect_keyed(&self, out: &mut HashMap<Key, NodeId>) {
        let RNode::Element(e) = self else { return };
        if let (Some(key), Some(node)) = (&e.key, e.node.get()) {
            out.insert(key.clone(), node);
        }
        for child in e.children.borrow().iter() {
            child.collect_keyed(out);
        }
    }
}

impl RElement {
    pub(crate) fn is_text(&self) -> bool {
        self.source.is_text()
    }

    pub(crate) fn tag(&self) -> &str {
        &self.source.tag
    }
}
