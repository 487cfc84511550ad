//! Widget handles - What a widget keeps to talk to the engine later.
//!
//! A [`WidgetHandle`] outlives any single render. Event handlers, signal
//! effects and pool sinks capture it (or a weak copy) to invalidate the
//! widget from outside the render pass.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use spark_signals::{effect, signal, Signal};

use super::WidgetId;
use crate::error::{LifecycleState, WidgetError};
use crate::pool::SubscriptionPool;
use crate::projector::scheduler::Scheduler;
use crate::types::Capabilities;

// =============================================================================
// Shared widget state
// =============================================================================

/// Flags shared between a widget's base and every handle to it.
pub(crate) struct WidgetShared {
    pub(crate) id: WidgetId,
    pub(crate) name: Rc<str>,
    pub(crate) capabilities: Capabilities,
    dirty: Cell<bool>,
    /// Some descendant is dirty; set on ancestors by `invalidate()`.
    subtree_dirty: Cell<bool>,
    rendered_once: Cell<bool>,
    destroyed: Cell<bool>,
    handles: RefCell<Vec<Box<dyn FnOnce()>>>,
    parent: Option<Weak<WidgetShared>>,
    scheduler: Weak<Scheduler>,
}

impl WidgetShared {
    pub(crate) fn new(
        id: WidgetId,
        name: Rc<str>,
        capabilities: Capabilities,
        parent: Option<&Rc<WidgetShared>>,
        scheduler: &Rc<Scheduler>,
    ) -> Rc<Self> {
        Rc::new(Self {
            id,
            name,
            capabilities,
            // New instances always render on their first pass
            dirty: Cell::new(true),
            subtree_dirty: Cell::new(false),
            rendered_once: Cell::new(false),
            destroyed: Cell::new(false),
            handles: RefCell::new(Vec::new()),
            parent: parent.map(Rc::downgrade),
            scheduler: Rc::downgrade(scheduler),
        })
    }

    pub(crate) fn invalidate(&self) -> Result<(), WidgetError> {
        if self.destroyed.get() {
            return Err(WidgetError::lifecycle("invalidate", LifecycleState::Destroyed));
        }
        self.dirty.set(true);

        // Let clean ancestors know they have to descend into this subtree
        let mut parent = self.parent.as_ref().and_then(Weak::upgrade);
        while let Some(shared) = parent {
            if shared.subtree_dirty.replace(true) {
                break;
            }
            parent = shared.parent.as_ref().and_then(Weak::upgrade);
        }

        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.schedule();
        }
        Ok(())
    }

    /// Mark dirty without requesting a tick (already inside a render pass).
    pub(crate) fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.replace(false)
    }

    pub(crate) fn take_subtree_dirty(&self) -> bool {
        self.subtree_dirty.replace(false)
    }

    pub(crate) fn mark_rendered(&self) {
        self.rendered_once.set(true);
    }

    pub(crate) fn has_rendered(&self) -> bool {
        self.rendered_once.get()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub(crate) fn lifecycle(&self) -> LifecycleState {
        if self.destroyed.get() {
            LifecycleState::Destroyed
        } else if !self.rendered_once.get() {
            LifecycleState::Created
        } else if self.dirty.get() {
            LifecycleState::Dirty
        } else {
            LifecycleState::Clean
        }
    }

    pub(crate) fn own(&self, cleanup: Box<dyn FnOnce()>) -> Result<(), WidgetError> {
        if self.destroyed.get() {
            // Nothing will ever release it later
            cleanup();
            return Err(WidgetError::lifecycle("own", LifecycleState::Destroyed));
        }
        self.handles.borrow_mut().push(cleanup);
        Ok(())
    }

    /// Terminal transition. Releases handles in registration order.
    pub(crate) fn destroy(&self) {
        self.destroyed.set(true);
        self.dirty.set(false);
        self.subtree_dirty.set(false);
        let handles = std::mem::take(&mut *self.handles.borrow_mut());
        for release in handles {
            release();
        }
    }
}

// =============================================================================
// Widget handle
// =============================================================================

/// Cloneable handle to a widget instance.
#[derive(Clone)]
pub struct WidgetHandle {
    shared: Rc<WidgetShared>,
}

impl WidgetHandle {
    pub(crate) fn new(shared: Rc<WidgetShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> WidgetId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    /// Mark the widget dirty and schedule a tick.
    ///
    /// Calls before the tick runs collapse into one render.
    pub fn invalidate(&self) -> Result<(), WidgetError> {
        self.shared.invalidate()
    }

    /// Register a cleanup to run when the widget is destroyed.
    ///
    /// On an already destroyed widget the cleanup runs immediately and an
    /// `InvalidLifecycleState` error is returned.
    pub fn own(&self, cleanup: impl FnOnce() + 'static) -> Result<(), WidgetError> {
        self.shared.own(Box::new(cleanup))
    }

    /// Re-render whenever a signal read by `getter` changes.
    ///
    /// The getter runs once immediately to establish its dependencies; that
    /// first run does not invalidate. The effect is stopped on destroy.
    pub fn observe<T: 'static>(&self, getter: impl Fn() -> T + 'static) -> Result<(), WidgetError> {
        self.check_observes("observe");
        let weak = Rc::downgrade(&self.shared);
        let first_run = Cell::new(true);
        let stop = effect(move || {
            let _ = getter();
            if first_run.replace(false) {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                let _ = shared.invalidate();
            }
        });
        self.own(stop)
    }

    /// Attach to a pool; every value is handed to `on_value`, then the widget
    /// is invalidated. Detached on destroy.
    pub fn subscribe<T: 'static>(
        &self,
        pool: &SubscriptionPool<T>,
        on_value: impl Fn(&T) + 'static,
    ) -> Result<(), WidgetError> {
        self.check_observes("subscribe");
        if self.is_destroyed() {
            return Err(WidgetError::lifecycle("subscribe", LifecycleState::Destroyed));
        }
        let weak = Rc::downgrade(&self.shared);
        let subscription = pool.add(move |value: &T| {
            on_value(value);
            if let Some(shared) = weak.upgrade() {
                let _ = shared.invalidate();
            }
        });
        self.shared.own(subscription.into_cleanup())
    }

    /// Internal state that invalidates this widget when it changes.
    pub fn state<T: Clone + PartialEq + 'static>(&self, initial: T) -> State<T> {
        State {
            signal: signal(initial),
            widget: Rc::downgrade(&self.shared),
        }
    }

    fn check_observes(&self, operation: &str) {
        if !self
            .shared
            .capabilities
            .contains(Capabilities::OBSERVES_EXTERNAL_STATE)
        {
            tracing::debug!(
                widget = %self.shared.name,
                operation,
                "widget type does not declare OBSERVES_EXTERNAL_STATE"
            );
        }
    }
}

impl std::fmt::Debug for WidgetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.shared.lifecycle())
            .finish()
    }
}

// =============================================================================
// Internal state
// =============================================================================

/// A signal-backed value owned by a widget.
///
/// Setting a different value updates the signal (so effects reading it rerun)
/// and invalidates the owning widget. Setting an equal value does nothing.
pub struct State<T> {
    signal: Signal<T>,
    widget: Weak<WidgetShared>,
}

impl<T: Clone> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            widget: self.widget.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> State<T> {
    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn set(&self, value: T) {
        if self.signal.get() == value {
            return;
        }
        self.signal.set(value);
        if let Some(widget) = self.widget.upgrade() {
            // Destroyed owners simply stop re-rendering
            let _ = widget.invalidate();
        }
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.signal.get());
        self.set(next);
    }

    /// The underlying signal, for effects and deriveds.
    pub fn signal(&self) -> Signal<T> {
        self.signal.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(scheduler: &Rc<Scheduler>, parent: Option<&Rc<WidgetShared>>, index: usize) -> Rc<WidgetShared> {
        let id = WidgetId::for_test(index);
        WidgetShared::new(id, Rc::from("Test"), Capabilities::OBSERVES_EXTERNAL_STATE, parent, scheduler)
    }

    #[test]
    fn test_invalidate_schedules_once() {
        let scheduler = Scheduler::new(None);
        let widget = shared(&scheduler, None, 0);
        widget.take_dirty();
        widget.mark_rendered();

        let handle = WidgetHandle::new(widget.clone());
        handle.invalidate().unwrap();
        handle.invalidate().unwrap();

        assert_eq!(handle.lifecycle(), LifecycleState::Dirty);
        assert_eq!(scheduler.request_count(), 1);
    }

    #[test]
    fn test_invalidate_marks_ancestors() {
        let scheduler = Scheduler::new(None);
        let root = shared(&scheduler, None, 0);
        let mid = shared(&scheduler, Some(&root), 1);
        let leaf = shared(&scheduler, Some(&mid), 2);

        leaf.invalidate().unwrap();
        assert!(mid.take_subtree_dirty());
        assert!(root.take_subtree_dirty());
        assert!(!leaf.take_subtree_dirty());
    }

    #[test]
    fn test_destroyed_handle_rejects() {
        let scheduler = Scheduler::new(None);
        let widget = shared(&scheduler, None, 0);
        let handle = WidgetHandle::new(widget.clone());

        let released = Rc::new(Cell::new(0));
        let r = released.clone();
        handle.own(move || r.set(r.get() + 1)).unwrap();
        widget.destroy();
        assert_eq!(released.get(), 1);

        let err = handle.invalidate().unwrap_err();
        assert_eq!(err, WidgetError::lifecycle("invalidate", LifecycleState::Destroyed));

        // Late cleanups run right away
        let r = released.clone();
        assert!(handle.own(move || r.set(r.get() + 1)).is_err());
        assert_eq!(released.get(), 2);
    }

    #[test]
    fn test_handles_released_in_order() {
        let scheduler = Scheduler::new(None);
        let widget = shared(&scheduler, None, 0);
        let handle = WidgetHandle::new(widget.clone());
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            handle.own(move || order.borrow_mut().push(n)).unwrap();
        }
        widget.destroy();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_observe_invalidates_on_signal_change() {
        let scheduler = Scheduler::new(None);
        let widget = shared(&scheduler, None, 0);
        widget.take_dirty();
        let handle = WidgetHandle::new(widget.clone());

        let source = signal(1);
        let read = source.clone();
        handle.observe(move || read.get()).unwrap();
        assert!(!widget.is_dirty());

        source.set(2);
        assert!(widget.is_dirty());

        // Stopped on destroy
        widget.destroy();
        source.set(3);
        assert!(!widget.is_dirty());
    }

    #[test]
    fn test_state_set_equal_is_noop() {
        let scheduler = Scheduler::new(None);
        let widget = shared(&scheduler, None, 0);
        widget.take_dirty();
        let handle = WidgetHandle::new(widget.clone());

        let state = handle.state(5);
        state.set(5);
        assert!(!widget.is_dirty());

        state.update(|n| n + 1);
        assert_eq!(state.get(), 6);
        assert!(widget.is_dirty());
    }

    #[test]
    fn test_state_clones_share_signal() {
        let scheduler = Scheduler::new(None);
        let widget = shared(&scheduler, None, 0);
        widget.take_dirty();
        let handle = WidgetHandle::new(widget.clone());

        let state = handle.state(String::from("idle"));
        let other = state.clone();
        other.set(String::from("busy"));

        assert_eq!(state.get(), "busy");
        assert!(widget.is_dirty());
    }

    #[test]
    fn test_subscribe_replays_and_invalidates() {
        let scheduler = Scheduler::new(None);
        let widget = shared(&scheduler, None, 0);
        widget.take_dirty();
        let handle = WidgetHandle::new(widget.clone());

        let pool = SubscriptionPool::with_max(4);
        pool.next("early");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink_seen = seen.clone();
        handle
            .subscribe(&pool, move |v: &&str| sink_seen.borrow_mut().push(*v))
            .unwrap();
        assert_eq!(*seen.borrow(), vec!["early"]);
        assert!(widget.is_dirty());

        widget.destroy();
        assert_eq!(pool.sink_count(), 0);
    }
}
