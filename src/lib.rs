//! # spark-vdom
//!
//! Widget-based virtual tree rendering for Rust.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals) for widget state and
//! external observation.
//!
//! ## Architecture
//!
//! Widgets describe what a surface should look like as immutable [`VNode`] trees. A
//! [`Projector`] owns the root widget, re-renders only widgets that were invalidated,
//! diffs the result against the previous tree and applies the minimal set of mutations
//! to a [`Surface`]:
//!
//! ```text
//! invalidate() → scheduled tick → render pass (dirty widgets) → patch → Surface
//! ```
//!
//! Widgets that need facts about the rendered surface (geometry, focus, drag state) read
//! them through meta providers keyed by the `key` of nodes they rendered.
//!
//! ## Modules
//!
//! - [`types`] - Keys, attribute and property values, capabilities, diff modes
//! - [`vnode`] - VNode model and builders
//! - [`widget`] - Widget trait, lifecycle, handles, registry
//! - [`meta`] - Meta provider registry and built-in providers
//! - [`projector`] - Render loop, scheduler, diff and patch
//! - [`surface`] - Surface trait and the in-memory surface
//! - [`pool`] - Replay buffer between producers and late sinks
//! - [`custom_element`] - Widgets as host custom elements

pub mod custom_element;
pub mod error;
pub mod meta;
pub mod pool;
pub mod projector;
pub mod surface;
pub mod types;
pub mod vnode;
pub mod widget;

// Re-export commonly used items
pub use types::*;

pub use error::{LifecycleState, SurfaceError, WidgetError};

pub use vnode::{text, v, w, w_label, ElementNode, EventHandler, VNode, WidgetNode, WidgetRef};

pub use widget::{RenderContext, State, Widget, WidgetBase, WidgetHandle, WidgetId, WidgetRegistry, WidgetType};

pub use meta::{
    DimensionResults, Dimensions, Drag, DragResults, Focus, FocusResults, MetaInput, MetaProvider,
    MetaQuery, MetaRegistry, NodeIdentity, Position, Size,
};

pub use projector::{
    Patch, Projector, ProjectorHandle, ProjectorOptions, ProjectorState, TickOutcome, TickRequest,
};

pub use surface::{Geometry, Listener, MemorySurface, NodeId, Surface, SurfaceEvent};

pub use pool::{Sink, Subscription, SubscriptionPool};

pub use custom_element::{CustomElement, CustomElementDescriptor, EmittedEvent};
