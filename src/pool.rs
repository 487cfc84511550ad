//! SubscriptionPool - Bounded replay buffer between producers and late sinks.
//!
//! A reactive source may emit before anything listens (an external stream
//! feeding widget invalidation, the projector's error channel). The pool
//! buffers those values, hands them to the first sink that attaches, then
//! switches to direct forwarding.
//!
//! # Semantics
//!
//! - `next(v)` with sinks attached: delivered synchronously to every sink in
//!   registration order.
//! - `next(v)` with no sinks: buffered; past the configured maximum the oldest
//!   value is dropped. A maximum of 0 never buffers.
//! - `add(sink)`: buffered values are replayed to that sink, in arrival order,
//!   before `add` returns. The buffer is then empty, so a second sink only
//!   sees values emitted after it attached.
//! - Values emitted while a replay is in progress queue behind the replay, so
//!   delivery stays FIFO.
//!
//! # Example
//!
//! ```ignore
//! let pool = SubscriptionPool::with_max(2);
//! pool.next(1);
//! pool.next(2);
//! pool.next(3);
//!
//! let sub = pool.add(|v: &i32| println!("{v}")); // prints 2, 3
//! pool.next(4);                                  // prints 4
//! sub.unsubscribe();
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Consumer attached to a pool.
pub type Sink<T> = Rc<dyn Fn(&T)>;

// =============================================================================
// Pool state
// =============================================================================

struct PoolInner<T> {
    buffer: VecDeque<T>,
    max: Option<usize>,
    sinks: Vec<(usize, Sink<T>)>,
    next_id: usize,
    replaying: bool,
}

impl<T> PoolInner<T> {
    fn buffer_value(&mut self, value: T) {
        if self.max == Some(0) {
            return;
        }
        self.buffer.push_back(value);
        if let Some(max) = self.max {
            while self.buffer.len() > max {
                self.buffer.pop_front();
            }
        }
    }
}

/// Bounded FIFO replay buffer with synchronous fan-out.
///
/// Cloning yields another handle to the same pool.
pub struct SubscriptionPool<T> {
    inner: Rc<RefCell<PoolInner<T>>>,
}

impl<T> Clone for SubscriptionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> SubscriptionPool<T> {
    /// A pool that buffers without limit.
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// A pool that keeps at most `max` values for replay.
    pub fn with_max(max: usize) -> Self {
        Self::with_limit(Some(max))
    }

    fn with_limit(max: Option<usize>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                buffer: VecDeque::new(),
                max,
                sinks: Vec::new(),
                next_id: 0,
                replaying: false,
            })),
        }
    }

    /// Attach a sink, replaying anything buffered to it first.
    pub fn add(&self, sink: impl Fn(&T) + 'static) -> Subscription {
        let sink: Sink<T> = Rc::new(sink);

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.sinks.push((id, sink.clone()));
            inner.replaying = !inner.buffer.is_empty();
            id
        };

        loop {
            let value = {
                let mut inner = self.inner.borrow_mut();
                match inner.buffer.pop_front() {
                    Some(value) => value,
                    None => {
                        inner.replaying = false;
                        break;
                    }
                }
            };
            sink(&value);
        }

        let weak: Weak<RefCell<PoolInner<T>>> = Rc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().sinks.retain(|(sid, _)| *sid != id);
                }
            })),
        }
    }

    /// Emit a value.
    pub fn next(&self, value: T) {
        let sinks: Vec<Sink<T>> = {
            let mut inner = self.inner.borrow_mut();
            if inner.sinks.is_empty() || inner.replaying {
                inner.buffer_value(value);
                return;
            }
            inner.sinks.iter().map(|(_, s)| s.clone()).collect()
        };

        for sink in &sinks {
            sink(&value);
        }
    }

    /// Number of values waiting for a sink.
    pub fn buffered(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    pub fn sink_count(&self) -> usize {
        self.inner.borrow().sinks.len()
    }

    /// Configured buffer maximum (`None` = unbounded).
    pub fn max(&self) -> Option<usize> {
        self.inner.borrow().max
    }

    /// Drop all buffered values without delivering them.
    pub fn clear(&self) {
        self.inner.borrow_mut().buffer.clear();
    }
}

impl<T: 'static> Default for SubscriptionPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Subscription handle
// =============================================================================

/// Handle returned by [`SubscriptionPool::add`].
///
/// Dropping the handle keeps the sink attached; call [`unsubscribe`] to
/// detach it. Once the last sink is gone the pool buffers again.
///
/// [`unsubscribe`]: Subscription::unsubscribe
#[must_use = "a subscription stays attached until unsubscribe() is called"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Turn the handle into a plain cleanup closure, e.g. for `own()`.
    pub fn into_cleanup(mut self) -> Box<dyn FnOnce()> {
        self.cancel.take().unwrap_or_else(|| Box::new(|| {}))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collector<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink_seen = seen.clone();
        (seen, move |v: &T| sink_seen.borrow_mut().push(v.clone()))
    }

    #[test]
    fn test_bounded_replay_keeps_newest() {
        let pool = SubscriptionPool::with_max(2);
        pool.next(1);
        pool.next(2);
        pool.next(3);

        let (seen, sink) = collector::<i32>();
        let _sub = pool.add(sink);
        assert_eq!(*seen.borrow(), vec![2, 3]);
    }

    #[test]
    fn test_unbounded_replay_once() {
        let pool = SubscriptionPool::new();
        pool.next(1);
        pool.next(2);

        let (first, sink) = collector::<i32>();
        let _a = pool.add(sink);
        assert_eq!(*first.borrow(), vec![1, 2]);

        let (second, sink2) = collector::<i32>();
        let _b = pool.add(sink2);
        assert!(second.borrow().is_empty());

        pool.next(3);
        assert_eq!(*first.borrow(), vec![1, 2, 3]);
        assert_eq!(*second.borrow(), vec![3]);
    }

    #[test]
    fn test_zero_max_never_buffers() {
        let pool = SubscriptionPool::with_max(0);
        pool.next("dropped");
        assert_eq!(pool.buffered(), 0);

        let (seen, sink) = collector::<&str>();
        let _sub = pool.add(sink);
        assert!(seen.borrow().is_empty());

        pool.next("live");
        assert_eq!(*seen.borrow(), vec!["live"]);
    }

    #[test]
    fn test_unsubscribe_resumes_buffering() {
        let pool = SubscriptionPool::new();
        let (seen, sink) = collector::<i32>();
        let sub = pool.add(sink);

        pool.next(1);
        sub.unsubscribe();
        assert_eq!(pool.sink_count(), 0);

        pool.next(2);
        assert_eq!(pool.buffered(), 1);
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn test_forwarding_in_registration_order() {
        let pool = SubscriptionPool::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let _a = pool.add(move |v: &i32| o1.borrow_mut().push(("a", *v)));
        let _b = pool.add(move |v: &i32| o2.borrow_mut().push(("b", *v)));

        pool.next(7);
        assert_eq!(*order.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_emit_during_replay_stays_fifo() {
        let pool: SubscriptionPool<i32> = SubscriptionPool::new();
        pool.next(1);
        pool.next(2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_sink = seen.clone();
        let reentrant = pool.clone();
        let _sub = pool.add(move |v: &i32| {
            seen_sink.borrow_mut().push(*v);
            if *v == 1 {
                reentrant.next(10);
            }
        });

        assert_eq!(*seen.borrow(), vec![1, 2, 10]);
    }
}
