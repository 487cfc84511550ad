//! Tick scheduler - One pending-tick flag per projector.
//!
//! `invalidate()` never renders. It flips `render_scheduled` and, on the
//! false → true edge only, asks the host for a tick. Every invalidation
//! that lands before that tick is coalesced into it. Detaching clears the
//! flag and makes further requests no-ops.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Callback a host installs to learn that a tick is wanted, e.g. to queue
/// work for the next display refresh.
pub type TickRequest = Rc<dyn Fn()>;

#[derive(Default)]
pub(crate) struct Scheduler {
    render_scheduled: Cell<bool>,
    detach_requested: Cell<bool>,
    detached: Cell<bool>,
    requests: Cell<u64>,
    on_request: RefCell<Option<TickRequest>>,
}

impl Scheduler {
    pub(crate) fn new(on_request: Option<TickRequest>) -> Rc<Self> {
        Rc::new(Self {
            on_request: RefCell::new(on_request),
            ..Self::default()
        })
    }

    /// Flag a tick as pending. Returns false once detached.
    pub(crate) fn schedule(&self) -> bool {
        if self.detached.get() {
            return false;
        }
        if !self.render_scheduled.replace(true) {
            self.requests.set(self.requests.get() + 1);
            let hook = self.on_request.borrow().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
        true
    }

    /// Consume the pending flag at the start of a tick.
    pub(crate) fn take_scheduled(&self) -> bool {
        self.render_scheduled.replace(false)
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.render_scheduled.get()
    }

    /// Number of false → true transitions, i.e. host tick requests.
    pub(crate) fn request_count(&self) -> u64 {
        self.requests.get()
    }

    pub(crate) fn request_detach(&self) {
        self.detach_requested.set(true);
    }

    pub(crate) fn detach_requested(&self) -> bool {
        self.detach_requested.get()
    }

    /// Cancel any pending tick and refuse future ones.
    pub(crate) fn cancel(&self) {
        self.detached.set(true);
        self.render_scheduled.set(false);
        self.on_request.borrow_mut().take();
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_coalesces() {
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let scheduler = Scheduler::new(Some(Rc::new(move || counter.set(counter.get() + 1))));

        scheduler.schedule();
        scheduler.schedule();
        scheduler.schedule();
        assert_eq!(hits.get(), 1);
        assert!(scheduler.is_scheduled());

        assert!(scheduler.take_scheduled());
        assert!(!scheduler.take_scheduled());

        scheduler.schedule();
        assert_eq!(hits.get(), 2);
        assert_eq!(scheduler.request_count(), 2);
    }

    #[test]
    fn test_cancel_refuses_future_ticks() {
        let scheduler = Scheduler::new(None);
        scheduler.schedule();
        scheduler.cancel();

        assert!(!scheduler.is_scheduled());
        assert!(!scheduler.schedule());
        assert!(!scheduler.is_scheduled());
    }
}
