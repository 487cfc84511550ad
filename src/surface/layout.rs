//! Taffy Bridge - Flexbox geometry for [`MemorySurface`] nodes.
//!
//! Converts element attributes to Taffy styles, runs layout over the attached
//! tree and flattens the result into absolute [`Geometry`] per node.
//!
//! Recognised attributes: `width`, `height` (cells, `"50%"` or `"auto"`),
//! `padding`, `gap`, `flex-grow`, `flex-direction` (`row` / `column`,
//! default `column`) and `display: none`. Text is measured in terminal cells.

use std::collections::HashMap;

use taffy::{
    AvailableSpace, Dimension as TaffyDimension, Display, FlexDirection, LengthPercentage,
    NodeId as TaffyNodeId, Rect, Size, Style, TaffyTree,
};
use unicode_width::UnicodeWidthStr;

use super::memory::{MemoryNode, MemorySurface};
use super::{Geometry, NodeId};
use crate::types::AttrValue;

// =============================================================================
// STYLE BUILDING
// =============================================================================

fn to_taffy_dimension(value: Option<&AttrValue>) -> TaffyDimension {
    let Some(value) = value else {
        return TaffyDimension::Auto;
    };
    if let Some(s) = value.as_str() {
        let s = s.trim();
        if s == "auto" {
            return TaffyDimension::Auto;
        }
        if let Some(pct) = s.strip_suffix('%') {
            return pct
                .trim()
                .parse::<f32>()
                .map(|p| TaffyDimension::Percent(p / 100.0))
                .unwrap_or(TaffyDimension::Auto);
        }
    }
    value
        .as_f32()
        .map(TaffyDimension::Length)
        .unwrap_or(TaffyDimension::Auto)
}

fn to_length(value: Option<&AttrValue>) -> LengthPercentage {
    LengthPercentage::Length(value.and_then(AttrValue::as_f32).unwrap_or(0.0))
}

fn attribute<'a>(node: &'a MemoryNode, name: &str) -> Option<&'a AttrValue> {
    node.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn build_style(node: &MemoryNode) -> Style {
    let display = match attribute(node, "display").and_then(AttrValue::as_str) {
        Some("none") => Display::None,
        _ => Display::Flex,
    };
    let flex_direction = match attribute(node, "flex-direction").and_then(AttrValue::as_str) {
        Some("row") => FlexDirection::Row,
        Some("row-reverse") => FlexDirection::RowReverse,
        Some("column-reverse") => FlexDirection::ColumnReverse,
        _ => FlexDirection::Column,
    };
    let padding = to_length(attribute(node, "padding"));
    let gap = to_length(attribute(node, "gap"));

    Style {
        display,
        flex_direction,
        size: Size {
            width: to_taffy_dimension(attribute(node, "width")),
            height: to_taffy_dimension(attribute(node, "height")),
        },
        padding: Rect {
            left: padding,
            right: padding,
            top: padding,
            bottom: padding,
        },
        gap: Size {
            width: gap,
            height: gap,
        },
        flex_grow: attribute(node, "flex-grow").and_then(AttrValue::as_f32).unwrap_or(0.0),
        flex_shrink: 1.0,
        ..Style::default()
    }
}

// =============================================================================
// TEXT MEASUREMENT
// =============================================================================

/// Cells needed by a text run: widest line by line count.
fn measure_text(text: &str, available_width: Option<f32>) -> Size<f32> {
    if text.is_empty() {
        return Size::ZERO;
    }
    let mut width = 0usize;
    let mut lines = 0usize;
    for line in text.split('\n') {
        let w = UnicodeWidthStr::width(line);
        let wrapped = match available_width {
            Some(max) if max >= 1.0 && w as f32 > max => {
                let max = max as usize;
                width = width.max(max);
                w.div_ceil(max)
            }
            _ => {
                width = width.max(w);
                1
            }
        };
        lines += wrapped;
    }
    Size {
        width: width as f32,
        height: lines as f32,
    }
}

// =============================================================================
// LAYOUT
// =============================================================================

/// Compute absolute geometry for every node attached under `root`.
pub fn compute_geometry(
    surface: &MemorySurface,
    root: NodeId,
    viewport: (f32, f32),
) -> HashMap<NodeId, Geometry> {
    let mut tree: TaffyTree<String> = TaffyTree::new();
    let mut nodes: Vec<(NodeId, TaffyNodeId)> = Vec::new();

    let Some(root_node) = build_node(surface, root, &mut tree, &mut nodes) else {
        return HashMap::new();
    };

    let available = Size {
        width: AvailableSpace::Definite(viewport.0),
        height: AvailableSpace::Definite(viewport.1),
    };

    let measure = |known: Size<Option<f32>>,
                   available: Size<AvailableSpace>,
                   _node: TaffyNodeId,
                   context: Option<&mut String>,
                   _style: &Style| {
        let Some(text) = context else {
            return Size::ZERO;
        };
        let max_width = known.width.or(match available.width {
            AvailableSpace::Definite(w) => Some(w),
            _ => None,
        });
        let measured = measure_text(text, max_width);
        Size {
            width: known.width.unwrap_or(measured.width),
            height: known.height.unwrap_or(measured.height),
        }
    };

    if tree.compute_layout_with_measure(root_node, available, measure).is_err() {
        return HashMap::new();
    }

    // Taffy positions are parent-relative; accumulate from the root down.
    let mut result = HashMap::with_capacity(nodes.len());
    let index: HashMap<NodeId, TaffyNodeId> = nodes.iter().copied().collect();
    let mut stack = vec![(root, 0.0f32, 0.0f32)];
    while let Some((id, offset_x, offset_y)) = stack.pop() {
        let Some(&taffy_id) = index.get(&id) else { continue };
        let Ok(layout) = tree.layout(taffy_id) else { continue };
        let x = offset_x + layout.location.x;
        let y = offset_y + layout.location.y;
        result.insert(
            id,
            Geometry {
                x,
                y,
                width: layout.size.width,
                height: layout.size.height,
            },
        );
        if let Some(node) = surface.node(id) {
            for &child in &node.children {
                stack.push((child, x, y));
            }
        }
    }

    result
}

fn build_node(
    surface: &MemorySurface,
    id: NodeId,
    tree: &mut TaffyTree<String>,
    nodes: &mut Vec<(NodeId, TaffyNodeId)>,
) -> Option<TaffyNodeId> {
    let node = surface.node(id)?;

    let taffy_id = if node.tag.is_none() {
        let text = node.text.clone().unwrap_or_default();
        tree.new_leaf_with_context(Style::default(), text).ok()?
    } else {
        let children: Vec<TaffyNodeId> = node
            .children
            .iter()
            .filter_map(|&child| build_node(surface, child, tree, nodes))
            .collect();
        match &node.text {
            // Elements with inline text get a measured leaf in front of their children.
            Some(text) if !text.is_empty() => {
                let leaf = tree.new_leaf_with_context(Style::default(), text.clone()).ok()?;
                let mut all = vec![leaf];
                all.extend(children);
                tree.new_with_children(build_style(node), &all).ok()?
            }
            _ => tree.new_with_children(build_style(node), &children).ok()?,
        }
    };

    nodes.push((id, taffy_id));
    Some(taffy_id)
}
