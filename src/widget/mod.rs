//! Widgets - Stateful instances that render VNode trees.
//!
//! A widget is a [`Widget`] implementation plus a [`WidgetBase`] the engine
//! wraps around it. The base owns the instance's properties, children, dirty
//! flag, cleanup handles and meta cache; the widget itself only renders.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──render──▶ Clean ◀──render── Dirty
//!                       │                 ▲
//!                       └──invalidate()───┘
//!             any state ──destroy()──▶ Destroyed
//! ```
//!
//! # Composition
//!
//! There is no inheritance. A widget type declares [`Capabilities`] and
//! composes behaviour from small helpers on [`WidgetHandle`]:
//!
//! - [`WidgetHandle::state`] - internal state that invalidates on change
//! - [`WidgetHandle::observe`] - re-render when signals read by a getter change
//! - [`WidgetHandle::subscribe`] - re-render on every value of a pool
//! - [`WidgetHandle::own`] - cleanup run on destroy
//!
//! # Example
//!
//! ```ignore
//! struct Counter {
//!     count: Option<State<i64>>,
//! }
//!
//! impl Widget for Counter {
//!     fn on_attach(&mut self, handle: &WidgetHandle) {
//!         self.count = Some(handle.state(0));
//!     }
//!
//!     fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
//!         let count = self.count.clone().expect("attached");
//!         let label = format!("{} clicks", count.get());
//!         Ok(v("button").on("click", move |_| count.update(|n| n + 1)).text(label).build())
//!     }
//! }
//!
//! let counter = WidgetType::new("Counter", || Counter { count: None });
//! ```

mod base;
mod context;
mod handle;
mod registry;

pub use base::WidgetBase;
pub use context::RenderContext;
pub use handle::{State, WidgetHandle};
pub use registry::{WidgetId, WidgetRegistry};

pub(crate) use base::{ChildSlot, SlotPosition};
pub(crate) use handle::WidgetShared;
pub(crate) use registry::WidgetArena;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::WidgetError;
use crate::types::{Capabilities, DiffMode};
use crate::vnode::VNode;

// =============================================================================
// Widget trait
// =============================================================================

/// Behaviour of a widget type.
pub trait Widget: 'static {
    /// Describe the widget's output for its current properties and state.
    ///
    /// Must be pure apart from meta reads: no surface access, no
    /// invalidation of other widgets. Equal inputs give structurally equal
    /// output.
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError>;

    /// Called once, right after construction and before the first render.
    fn on_attach(&mut self, _handle: &WidgetHandle) {}

    /// Called once when the instance is destroyed, before owned handles are
    /// released.
    fn on_detach(&mut self) {}

    /// How property `name` is compared between renders.
    fn diff_mode(&self, _name: &str) -> DiffMode {
        DiffMode::Reference
    }
}

// =============================================================================
// Widget types
// =============================================================================

type Factory = Rc<dyn Fn() -> Box<dyn Widget>>;

struct WidgetTypeInner {
    name: Rc<str>,
    factory: Factory,
    capabilities: Capabilities,
}

/// A widget type: display name, factory and declared capabilities.
///
/// Types compare by identity. Two `WidgetType::new` calls with the same name
/// are different types; clones of one value are the same type.
#[derive(Clone)]
pub struct WidgetType {
    inner: Rc<WidgetTypeInner>,
}

impl WidgetType {
    pub fn new<W: Widget>(name: &str, factory: impl Fn() -> W + 'static) -> Self {
        Self {
            inner: Rc::new(WidgetTypeInner {
                name: Rc::from(name),
                factory: Rc::new(move || Box::new(factory()) as Box<dyn Widget>),
                capabilities: Capabilities::NONE,
            }),
        }
    }

    /// Declare capabilities. Returns a new type identity.
    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        Self {
            inner: Rc::new(WidgetTypeInner {
                name: self.inner.name.clone(),
                factory: self.inner.factory.clone(),
                capabilities,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    pub(crate) fn instantiate(&self) -> Box<dyn Widget> {
        (self.inner.factory)()
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }
}

impl PartialEq for WidgetType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for WidgetType {}

impl Hash for WidgetType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetType")
            .field("name", &self.inner.name)
            .field("capabilities", &self.inner.capabilities)
            .finish()
    }
}
