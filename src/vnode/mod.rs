//! VNode Model - Immutable descriptions of surface elements and widgets.
//!
//! A render pass produces a fresh tree of [`VNode`]s. Nodes are never mutated
//! after construction; payloads sit behind `Rc` so cloning a node (or a whole
//! subtree) is a reference-count bump.
//!
//! # Variants
//!
//! - [`ElementNode`] - A primitive surface element: tag, attributes, event
//!   handlers, optional text, children. An element with an empty tag and text
//!   content is a text node.
//! - [`WidgetNode`] - A widget instance request: widget type, properties,
//!   children passed through untouched.
//!
//! # Identity
//!
//! Diffing matches nodes by position and key, not by value. Two nodes at the
//! same child index (or sharing a key) with the same tag or widget type are
//! the same logical node across renders even if every attribute changed.
//!
//! The surface node an element is rendered into is NOT stored here. The
//! projector keeps it in its own resolved tree.
//!
//! # Example
//!
//! ```ignore
//! use spark_vdom::vnode::{v, text, w};
//!
//! let tree = v("div")
//!     .attr("class", "list")
//!     .child(v("span").key("a").text("first"))
//!     .child(w(&row_type, Properties::new().with("label", "second")).key("b"))
//!     .build();
//! ```

mod builders;

pub use builders::{text, v, w, w_label, ElementBuilder, WidgetBuilder};

use std::rc::Rc;

use crate::surface::SurfaceEvent;
use crate::types::{AttrValue, Key, Properties};
use crate::widget::WidgetType;

/// Tag used by text nodes.
pub const TEXT_TAG: &str = "";

/// Event handler attached to an element.
pub type EventHandler = Rc<dyn Fn(&SurfaceEvent)>;

// =============================================================================
// VNode
// =============================================================================

/// One node of a description tree.
#[derive(Clone)]
pub enum VNode {
    Element(Rc<ElementNode>),
    Widget(Rc<WidgetNode>),
}

impl VNode {
    /// Sibling key, if any.
    pub fn key(&self) -> Option<&Key> {
        match self {
            VNode::Element(e) => e.key.as_ref(),
            VNode::Widget(w) => w.key.as_ref(),
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            VNode::Element(e) => Some(e),
            VNode::Widget(_) => None,
        }
    }

    pub fn as_widget(&self) -> Option<&WidgetNode> {
        match self {
            VNode::Widget(w) => Some(w),
            VNode::Element(_) => None,
        }
    }

    /// Children of either variant.
    pub fn children(&self) -> &[VNode] {
        match self {
            VNode::Element(e) => &e.children,
            VNode::Widget(w) => &w.children,
        }
    }

    /// Same payload allocation (a clone of one node).
    pub fn ptr_eq(&self, other: &VNode) -> bool {
        match (self, other) {
            (VNode::Element(a), VNode::Element(b)) => Rc::ptr_eq(a, b),
            (VNode::Widget(a), VNode::Widget(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Whether `self` and `other` would be matched as the same logical node
    /// when they sit at the same position.
    pub fn same_identity(&self, other: &VNode) -> bool {
        match (self, other) {
            (VNode::Element(a), VNode::Element(b)) => a.tag == b.tag && a.key == b.key,
            (VNode::Widget(a), VNode::Widget(b)) => a.widget.same_type(&b.widget) && a.key == b.key,
            _ => false,
        }
    }

    /// Structural comparison of two trees.
    ///
    /// Tags, keys, attributes, text and children are compared by value,
    /// widget properties shallowly, event handlers by name only (handlers
    /// are fresh closures on every render).
    pub fn structurally_eq(&self, other: &VNode) -> bool {
        match (self, other) {
            (VNode::Element(a), VNode::Element(b)) => {
                a.tag == b.tag
                    && a.key == b.key
                    && a.text == b.text
                    && a.attributes == b.attributes
                    && a.events.len() == b.events.len()
                    && a.events.iter().zip(&b.events).all(|((x, _), (y, _))| x == y)
                    && children_eq(&a.children, &b.children)
            }
            (VNode::Widget(a), VNode::Widget(b)) => {
                a.widget.same_type(&b.widget)
                    && a.key == b.key
                    && a.properties.shallow_eq(&b.properties)
                    && children_eq(&a.children, &b.children)
            }
            _ => false,
        }
    }
}

fn children_eq(a: &[VNode], b: &[VNode]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VNode::Element(e) => e.fmt(f),
            VNode::Widget(w) => w.fmt(f),
        }
    }
}

// =============================================================================
// ElementNode
// =============================================================================

/// Description of a primitive surface element.
pub struct ElementNode {
    pub(crate) tag: Rc<str>,
    pub(crate) key: Option<Key>,
    pub(crate) attributes: Vec<(Rc<str>, AttrValue)>,
    pub(crate) events: Vec<(Rc<str>, EventHandler)>,
    pub(crate) text: Option<Rc<str>>,
    pub(crate) children: Vec<VNode>,
}

impl ElementNode {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn is_text(&self) -> bool {
        &*self.tag == TEXT_TAG
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.attributes.iter().map(|(n, v)| (&**n, v))
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.iter().find(|(n, _)| &**n == name).map(|(_, v)| v)
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|(n, _)| &**n)
    }

    pub fn handler(&self, event: &str) -> Option<&EventHandler> {
        self.events.iter().find(|(n, _)| &**n == event).map(|(_, h)| h)
    }

    pub fn children(&self) -> &[VNode] {
        &self.children
    }
}

impl std::fmt::Debug for ElementNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Element");
        s.field("tag", &self.tag);
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        if let Some(text) = &self.text {
            s.field("text", text);
        }
        s.field("attributes", &self.attributes)
            .field("events", &self.event_names().collect::<Vec<_>>())
            .field("children", &self.children)
            .finish()
    }
}

// =============================================================================
// WidgetNode
// =============================================================================

/// How a widget node names the widget it wants.
#[derive(Clone)]
pub enum WidgetRef {
    /// A widget type value carrying its own factory.
    Type(WidgetType),
    /// A label resolved against the projector's widget registry.
    Label(Rc<str>),
}

impl WidgetRef {
    /// Same type for identity purposes. Labels compare by name.
    pub fn same_type(&self, other: &WidgetRef) -> bool {
        match (self, other) {
            (WidgetRef::Type(a), WidgetRef::Type(b)) => a == b,
            (WidgetRef::Label(a), WidgetRef::Label(b)) => a == b,
            _ => false,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WidgetRef::Type(t) => t.name(),
            WidgetRef::Label(l) => l,
        }
    }
}

/// Description of a widget instance at a tree position.
pub struct WidgetNode {
    pub(crate) widget: WidgetRef,
    pub(crate) key: Option<Key>,
    pub(crate) properties: Properties,
    pub(crate) children: Vec<VNode>,
}

impl WidgetNode {
    pub fn widget(&self) -> &WidgetRef {
        &self.widget
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn children(&self) -> &[VNode] {
        &self.children
    }
}

impl std::fmt::Debug for WidgetNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Widget")
            .field("widget", &self.widget.name())
            .field("key", &self.key)
            .field("properties", &self.properties)
            .field("children", &self.children)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_eq_ignores_handler_identity() {
        let build = || {
            v("button")
                .attr("type", "submit")
                .on("click", |_| {})
                .text("Go")
                .build()
        };
        assert!(build().structurally_eq(&build()));
    }

    #[test]
    fn test_structural_eq_detects_changes() {
        let a = v("div").child(text("a")).build();
        let b = v("div").child(text("b")).build();
        assert!(!a.structurally_eq(&b));

        let c = v("div").attr("id", "x").build();
        let d = v("div").attr("id", "y").build();
        assert!(!c.structurally_eq(&d));
    }

    #[test]
    fn test_same_identity_by_tag_and_key() {
        let a = v("li").key("1").attr("class", "old").build();
        let b = v("li").key("1").attr("class", "new").build();
        let c = v("li").key("2").build();
        let d = v("span").key("1").build();

        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
        assert!(!a.same_identity(&d));
    }

    #[test]
    fn test_text_node() {
        let node = text("hello");
        let element = node.as_element().expect("text is an element");
        assert!(element.is_text());
        assert_eq!(element.text(), Some("hello"));
    }
}
