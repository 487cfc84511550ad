//! Real Surface - The boundary between the engine and whatever displays nodes.
//!
//! The projector never mutates anything but a [`Surface`]. A surface owns
//! real nodes (addressed by [`NodeId`]), their attributes, listeners and
//! tree structure, and can answer post-render questions like geometry and
//! focus that meta providers bridge back into render.
//!
//! [`MemorySurface`] is the in-process implementation: an arena of nodes
//! with flexbox geometry computed through Taffy. Hosts with a real display
//! implement [`Surface`] themselves.

mod layout;
mod memory;

pub use layout::compute_geometry;
pub use memory::MemorySurface;

use std::fmt;
use std::rc::Rc;

use crate::error::SurfaceError;
use crate::types::AttrValue;

// =============================================================================
// Node handles
// =============================================================================

/// Handle of a real node on a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position and size of a laid-out node, in surface units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Geometry {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

// =============================================================================
// Events
// =============================================================================

/// An event delivered by the surface to a listener.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceEvent {
    /// Event name, e.g. `"click"` or `"pointermove"`.
    pub name: Rc<str>,
    /// Node the event was dispatched at.
    pub target: NodeId,
    /// Pointer position for pointer events.
    pub x: f32,
    pub y: f32,
    /// Payload for value-carrying events such as `"input"`.
    pub value: Option<Rc<str>>,
}

impl SurfaceEvent {
    pub fn new(name: &str, target: NodeId) -> Self {
        Self {
            name: Rc::from(name),
            target,
            x: 0.0,
            y: 0.0,
            value: None,
        }
    }

    /// Set the pointer position.
    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Set the value payload.
    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(Rc::from(value));
        self
    }
}

/// Listener registered on a surface node.
pub type Listener = Rc<dyn Fn(&SurfaceEvent)>;

// =============================================================================
// Surface trait
// =============================================================================

/// A live display surface the projector patches.
///
/// Every mutation can fail; the projector reports failures and carries on
/// with the rest of the patch.
pub trait Surface {
    /// Create a detached element node.
    fn create_element(&mut self, tag: &str) -> Result<NodeId, SurfaceError>;

    /// Create a detached text node.
    fn create_text(&mut self, text: &str) -> Result<NodeId, SurfaceError>;

    /// Replace the text of a text node, or the text content of an element.
    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), SurfaceError>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &AttrValue) -> Result<(), SurfaceError>;

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), SurfaceError>;

    /// Insert `child` under `parent` before `before` (append when `None`).
    ///
    /// Inserting a node that already has a parent moves it.
    fn insert_before(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) -> Result<(), SurfaceError>;

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SurfaceError>;

    /// Register the single listener for `event` on `node`, replacing any
    /// previous one.
    fn add_listener(&mut self, node: NodeId, event: &str, listener: Listener) -> Result<(), SurfaceError>;

    fn remove_listener(&mut self, node: NodeId, event: &str) -> Result<(), SurfaceError>;

    /// Forget a node and its subtree. The node must already be detached.
    fn release(&mut self, node: NodeId);

    /// Parent of a node, if attached.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Laid-out geometry of an attached node.
    fn geometry(&self, node: NodeId) -> Option<Geometry>;

    /// Currently focused node.
    fn focused(&self) -> Option<NodeId>;

    /// Whether `node` is `ancestor` or one of its descendants.
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }
}
