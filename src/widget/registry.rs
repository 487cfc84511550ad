//! Widget Registry - Instance allocation and type labels.
//!
//! - [`WidgetArena`] holds every live widget instance of one projector in
//!   index slots with a free pool for O(1) reuse. Slots carry a generation
//!   so a stale [`WidgetId`] never resolves to the instance that replaced it.
//! - [`WidgetRegistry`] maps string labels to [`WidgetType`]s for
//!   `w_label()` nodes.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::base::WidgetBase;
use super::WidgetType;

// =============================================================================
// Widget IDs
// =============================================================================

/// Handle of a widget instance inside one projector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WidgetId {
    index: usize,
    generation: u32,
}

impl WidgetId {
    pub fn index(self) -> usize {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn for_test(index: usize) -> Self {
        Self { index, generation: 0 }
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}v{}", self.index, self.generation)
    }
}

// =============================================================================
// Arena
// =============================================================================

#[derive(Default)]
struct Slot {
    generation: u32,
    base: Option<WidgetBase>,
}

/// Slot storage for widget instances.
#[derive(Default)]
pub(crate) struct WidgetArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

impl WidgetArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot and build the instance with its final id.
    pub(crate) fn allocate(&mut self, build: impl FnOnce(WidgetId) -> WidgetBase) -> WidgetId {
        // Reuse free index or allocate new
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        let id = WidgetId {
            index,
            generation: slot.generation,
        };
        slot.base = Some(build(id));
        self.live += 1;
        id
    }

    pub(crate) fn get(&self, id: WidgetId) -> Option<&WidgetBase> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.base.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: WidgetId) -> Option<&mut WidgetBase> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.base.as_mut())
    }

    /// Release a slot back to the pool, returning the instance it held.
    pub(crate) fn release(&mut self, id: WidgetId) -> Option<WidgetBase> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        let base = slot.base.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(base)
    }

    pub(crate) fn contains(&self, id: WidgetId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }
}

// =============================================================================
// Label registry
// =============================================================================

/// Label → widget type map consulted when a node names its widget by label.
#[derive(Clone, Default)]
pub struct WidgetRegistry {
    types: HashMap<Rc<str>, WidgetType>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the type behind `label`.
    pub fn register(&mut self, label: &str, widget_type: WidgetType) {
        self.types.insert(Rc::from(label), widget_type);
    }

    pub fn get(&self, label: &str) -> Option<&WidgetType> {
        self.types.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.types.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
