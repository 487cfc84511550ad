//! Drag - Pointer drag state of a node.
//!
//! Listens for `pointerdown`, `pointermove` and `pointerup` on the node.
//! Movement accumulates into `delta` until the next render reads it, so a
//! widget sees the distance travelled since its previous render.

use std::cell::RefCell;
use std::collections::HashMap;

use super::{MetaInput, MetaProvider, Position};
use crate::surface::{NodeId, SurfaceEvent};

/// Drag state handed to render.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DragResults {
    pub is_dragging: bool,
    /// Movement since the previous read.
    pub delta: Position,
    /// Where the current drag started.
    pub start: Position,
}

#[derive(Default)]
struct DragState {
    dragging: bool,
    start: Position,
    last: Position,
    delta: Position,
}

/// Tracks pointer drags per node.
#[derive(Default)]
pub struct Drag {
    nodes: RefCell<HashMap<NodeId, DragState>>,
}

impl MetaProvider for Drag {
    type Output = DragResults;

    fn compute(&self, input: &mut MetaInput<'_>) -> DragResults {
        input.listen("pointerdown");
        input.listen("pointermove");
        input.listen("pointerup");

        let mut nodes = self.nodes.borrow_mut();
        let Some(state) = nodes.get_mut(&input.node()) else {
            return DragResults::default();
        };
        // Reading consumes the accumulated movement
        let delta = std::mem::take(&mut state.delta);
        DragResults {
            is_dragging: state.dragging,
            delta,
            start: state.start,
        }
    }

    fn handle_event(&self, node: NodeId, event: &SurfaceEvent) -> bool {
        let mut nodes = self.nodes.borrow_mut();
        let point = Position {
            x: event.x,
            y: event.y,
        };
        match &*event.name {
            "pointerdown" => {
                nodes.insert(
                    node,
                    DragState {
                        dragging: true,
                        start: point,
                        last: point,
                        delta: Position::default(),
                    },
                );
                true
            }
            "pointermove" => {
                let Some(state) = nodes.get_mut(&node) else {
                    return false;
                };
                if !state.dragging {
                    return false;
                }
                state.delta.x += point.x - state.last.x;
                state.delta.y += point.y - state.last.y;
                state.last = point;
                true
            }
            "pointerup" => match nodes.get_mut(&node) {
                Some(state) if state.dragging => {
                    state.dragging = false;
                    state.delta.x += point.x - state.last.x;
                    state.delta.y += point.y - state.last.y;
                    state.last = point;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn node_released(&self, node: NodeId) {
        self.nodes.borrow_mut().remove(&node);
    }
}
