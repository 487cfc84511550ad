//! Dimensions - Laid-out position and size of a node.

use super::{MetaInput, MetaProvider};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// Geometry of a node as last laid out by the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DimensionResults {
    pub position: Position,
    pub size: Size,
}

/// Reads [`Surface::geometry`](crate::surface::Surface::geometry).
///
/// Unchanged geometry hands back the cached value.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dimensions;

impl MetaProvider for Dimensions {
    type Output = DimensionResults;

    fn compute(&self, input: &mut MetaInput<'_>) -> DimensionResults {
        let Some(geometry) = input.surface().geometry(input.node()) else {
            return DimensionResults::default();
        };
        DimensionResults {
            position: Position {
                x: geometry.x,
                y: geometry.y,
            },
            size: Size {
                width: geometry.width,
                height: geometry.height,
            },
        }
    }

    fn retain_unchanged(&self) -> bool {
        true
    }
}
