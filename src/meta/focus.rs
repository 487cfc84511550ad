//! Focus and node identity.

use super::{MetaInput, MetaProvider};
use crate::surface::{NodeId, SurfaceEvent};

/// Focus state of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FocusResults {
    /// The node itself has focus.
    pub active: bool,
    /// The node or one of its descendants has focus.
    pub contains_focus: bool,
}

/// Reads [`Surface::focused`](crate::surface::Surface::focused) and
/// re-renders the querying widget on `focus` / `blur`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Focus;

impl MetaProvider for Focus {
    type Output = FocusResults;

    fn compute(&self, input: &mut MetaInput<'_>) -> FocusResults {
        input.listen("focus");
        input.listen("blur");

        let node = input.node();
        match input.surface().focused() {
            Some(focused) => FocusResults {
                active: focused == node,
                contains_focus: input.surface().contains(node, focused),
            },
            None => FocusResults::default(),
        }
    }

    fn handle_event(&self, _node: NodeId, event: &SurfaceEvent) -> bool {
        matches!(&*event.name, "focus" | "blur")
    }
}

/// The surface node a widget rendered under a key, for hosts that need to
/// reach the real node (scrolling, measuring, third-party integration).
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeIdentity;

impl MetaProvider for NodeIdentity {
    type Output = Option<NodeId>;

    fn compute(&self, input: &mut MetaInput<'_>) -> Option<NodeId> {
        Some(input.node())
    }

    fn retain_unchanged(&self) -> bool {
        true
    }
}
