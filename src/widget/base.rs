//! WidgetBase - The engine-side half of every widget instance.
//!
//! Holds what the engine needs to decide whether a widget must re-render and
//! to tear it down: properties, children, changed property names, cleanup
//! handles (through [`WidgetShared`]), the meta cache, the keyed surface
//! nodes of its last render and the resolved output itself.

use std::collections::HashMap;
use std::rc::Rc;

use super::context::RenderContext;
use super::handle::{WidgetHandle, WidgetShared};
use super::{Widget, WidgetId, WidgetType};
use crate::error::{LifecycleState, WidgetError};
use crate::meta::{ListenRequest, MetaCache, MetaRegistry};
use crate::projector::scheduler::Scheduler;
use crate::projector::tree::RNode;
use crate::surface::{NodeId, Surface};
use crate::types::{Key, Properties};
use crate::vnode::VNode;

// =============================================================================
// Child slots
// =============================================================================

/// Where a child widget sits inside its parent's render output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SlotPosition {
    /// Keyed children match anywhere in the parent's output.
    Keyed(Key),
    /// Unkeyed children match by child-index path from the output root.
    Path(Vec<usize>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ChildSlot {
    pub(crate) widget_type: WidgetType,
    pub(crate) position: SlotPosition,
}

// =============================================================================
// WidgetBase
// =============================================================================

/// One live widget instance.
pub struct WidgetBase {
    id: WidgetId,
    widget_type: WidgetType,
    key: Option<Key>,
    instance: Box<dyn Widget>,
    shared: Rc<WidgetShared>,
    properties: Properties,
    children: Vec<VNode>,
    changed_keys: Vec<Rc<str>>,
    pub(crate) meta: MetaCache,
    pub(crate) node_keys: HashMap<Key, NodeId>,
    pub(crate) rendered: Option<Rc<RNode>>,
    pub(crate) slots: HashMap<ChildSlot, WidgetId>,
}

impl WidgetBase {
    /// Construct the instance and run its `on_attach` hook.
    pub(crate) fn new(
        id: WidgetId,
        widget_type: WidgetType,
        key: Option<Key>,
        parent: Option<&Rc<WidgetShared>>,
        scheduler: &Rc<Scheduler>,
    ) -> Self {
        let shared = WidgetShared::new(
            id,
            Rc::from(widget_type.name()),
            widget_type.capabilities(),
            parent,
            scheduler,
        );
        let mut instance = widget_type.instantiate();
        instance.on_attach(&WidgetHandle::new(shared.clone()));

        tracing::trace!(widget = %widget_type.name(), %id, "widget created");

        Self {
            id,
            widget_type,
            key,
            instance,
            shared,
            properties: Properties::new(),
            children: Vec::new(),
            changed_keys: Vec::new(),
            meta: MetaCache::default(),
            node_keys: HashMap::new(),
            rendered: None,
            slots: HashMap::new(),
        }
    }

    pub fn id(&self) -> WidgetId {
        self.id
    }

    pub fn widget_type(&self) -> &WidgetType {
        &self.widget_type
    }

    pub fn name(&self) -> &str {
        self.widget_type.name()
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

    /// Names of properties that changed since the last render.
    pub fn changed_property_keys(&self) -> &[Rc<str>] {
        &self.changed_keys
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle()
    }

    pub fn handle(&self) -> WidgetHandle {
        WidgetHandle::new(self.shared.clone())
    }

    pub(crate) fn shared(&self) -> &Rc<WidgetShared> {
        &self.shared
    }

    // -------------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------------

    /// Replace the property bag. Returns whether anything changed; a change
    /// marks the widget dirty.
    pub fn set_properties(&mut self, properties: Properties) -> Result<bool, WidgetError> {
        self.ensure_alive("set_properties")?;

        let instance = &self.instance;
        let changed = self
            .properties
            .changed_keys(&properties, |name| instance.diff_mode(name));
        self.properties = properties;

        if changed.is_empty() {
            return Ok(false);
        }
        for name in changed {
            if !self.changed_keys.contains(&name) {
                self.changed_keys.push(name);
            }
        }
        self.shared.mark_dirty();
        Ok(true)
    }

    /// Replace the children. Any child that is not the very same node as
    /// before counts as a change.
    pub fn set_children(&mut self, children: Vec<VNode>) -> Result<bool, WidgetError> {
        self.ensure_alive("set_children")?;

        let changed = children.len() != self.children.len()
            || children.iter().zip(&self.children).any(|(a, b)| !a.ptr_eq(b));
        self.children = children;
        if changed {
            self.shared.mark_dirty();
        }
        Ok(changed)
    }

    /// Mark dirty and schedule a tick.
    pub fn invalidate(&self) -> Result<(), WidgetError> {
        self.shared.invalidate()
    }

    /// Register a cleanup to run on destroy.
    pub fn own(&self, cleanup: impl FnOnce() + 'static) -> Result<(), WidgetError> {
        self.shared.own(Box::new(cleanup))
    }

    // -------------------------------------------------------------------------
    // Render
    // -------------------------------------------------------------------------

    /// Run the widget's render for a new meta generation.
    ///
    /// Clears the dirty flag first so that an invalidation raised while
    /// rendering survives into the next tick.
    pub(crate) fn render(
        &mut self,
        meta: &MetaRegistry,
        surface: &dyn Surface,
    ) -> (Result<VNode, WidgetError>, Vec<ListenRequest>) {
        self.shared.take_dirty();
        self.meta.next_generation();

        let (result, requests) = {
            let cx = RenderContext::new(self, meta, surface);
            let result = self.instance.render(&cx);
            (result, cx.into_requests())
        };

        self.changed_keys.clear();
        (result, requests)
    }

    /// Record the patched output and refresh the keyed node map.
    ///
    /// Returns true when a meta key that was pending during render is now
    /// attached, meaning the widget must render again.
    pub(crate) fn after_patch(&mut self) -> bool {
        let mut node_keys = HashMap::new();
        if let Some(rendered) = &self.rendered {
            rendered.collect_keyed(&mut node_keys);
        }
        self.node_keys = node_keys;

        let resolved = self.meta.resolve_pending(&self.node_keys);
        self.meta.prune(&self.node_keys);
        resolved
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Run `on_detach`, release owned handles, drop caches. Terminal.
    ///
    /// Child widgets are destroyed by the projector before their parent.
    pub fn destroy(&mut self) -> Result<(), WidgetError> {
        self.ensure_alive("destroy")?;

        self.instance.on_detach();
        self.shared.destroy();
        self.meta.clear();
        self.node_keys.clear();
        self.rendered = None;
        self.slots.clear();

        tracing::trace!(widget = %self.name(), id = %self.id, "widget destroyed");
        Ok(())
    }

    fn ensure_alive(&self, operation: &'static str) -> Result<(), WidgetError> {
        if self.shared.is_destroyed() {
            return Err(WidgetError::lifecycle(operation, LifecycleState::Destroyed));
        }
        Ok(())
    }
}

impl std::fmt::Debug for WidgetBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetBase")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("key", &self.key)
            .field("state", &self.lifecycle())
            .field("properties", &self.properties)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use crate::types::DiffMode;
    use crate::vnode::{text, v};
    use std::cell::RefCell;

    struct Echo {
        seen: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl Widget for Echo {
        fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
            self.seen.borrow_mut().push(
                cx.changed_property_keys()
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
            );
            Ok(text(cx.properties().get_str("label").unwrap_or("")))
        }

        fn diff_mode(&self, name: &str) -> DiffMode {
            match name {
                "noise" => DiffMode::Ignore,
                "force" => DiffMode::Always,
                _ => DiffMode::Reference,
            }
        }
    }

    fn echo() -> (WidgetBase, Rc<RefCell<Vec<Vec<String>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_factory = seen.clone();
        let ty = WidgetType::new("Echo", move || Echo {
            seen: seen_factory.clone(),
        });
        let scheduler = Scheduler::new(None);
        (WidgetBase::new(WidgetId::for_test(0), ty, None, None, &scheduler), seen)
    }

    fn render(base: &mut WidgetBase) {
        let surface = MemorySurface::new();
        let meta = MetaRegistry::with_defaults();
        let (result, _) = base.render(&meta, &surface);
        result.unwrap();
        base.shared().mark_rendered();
    }

    #[test]
    fn test_set_properties_tracks_changes() {
        let (mut base, seen) = echo();
        assert_eq!(base.lifecycle(), LifecycleState::Created);

        assert!(base.set_properties(Properties::new().with("label", "a")).unwrap());
        render(&mut base);
        assert_eq!(base.lifecycle(), LifecycleState::Clean);

        // Same values: nothing changes
        assert!(!base.set_properties(Properties::new().with("label", "a")).unwrap());
        assert_eq!(base.lifecycle(), LifecycleState::Clean);

        assert!(base.set_properties(Properties::new().with("label", "b")).unwrap());
        assert_eq!(base.lifecycle(), LifecycleState::Dirty);
        render(&mut base);

        assert_eq!(seen.borrow()[1], vec!["label".to_string()]);
        assert!(base.changed_property_keys().is_empty());
    }

    #[test]
    fn test_diff_modes() {
        let (mut base, _) = echo();
        base.set_properties(Properties::new().with("noise", 1)).unwrap();
        render(&mut base);

        assert!(!base.set_properties(Properties::new().with("noise", 2)).unwrap());
        assert!(base.set_properties(Properties::new().with("noise", 2).with("force", 1)).unwrap());
        render(&mut base);
        assert!(base.set_properties(Properties::new().with("noise", 2).with("force", 1)).unwrap());
    }

    #[test]
    fn test_set_children_by_identity() {
        let (mut base, _) = echo();
        let child = v("li").build();

        assert!(base.set_children(vec![child.clone()]).unwrap());
        render(&mut base);
        assert!(!base.set_children(vec![child.clone()]).unwrap());
        assert!(base.set_children(vec![v("li").build()]).unwrap());
    }

    #[test]
    fn test_destroy_is_terminal() {
        let (mut base, _) = echo();
        let released = Rc::new(RefCell::new(false));
        let flag = released.clone();
        base.own(move || *flag.borrow_mut() = true).unwrap();

        base.destroy().unwrap();
        assert!(*released.borrow());
        assert_eq!(base.lifecycle(), LifecycleState::Destroyed);

        let err = base.set_properties(Properties::new()).unwrap_err();
        assert_eq!(err, WidgetError::lifecycle("set_properties", LifecycleState::Destroyed));
        assert!(base.destroy().is_err());
        assert!(base.invalidate().is_err());
    }
}
