//! Meta Providers - Post-render facts read back during render.
//!
//! Some things only exist after a patch: where a node ended up, whether it
//! has focus, how far it has been dragged. A meta provider computes one such
//! fact for the surface node a widget rendered under a given key.
//!
//! # Reading meta
//!
//! ```ignore
//! fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
//!     let size = cx.meta::<Dimensions>()?.get("panel").size;
//!     Ok(v("div").key("panel").text(format!("{}x{}", size.width, size.height)).build())
//! }
//! ```
//!
//! `meta::<Kind>()` fails when the kind was never registered. `get(key)`
//! never fails:
//!
//! - already computed during this render generation → memoized value
//! - the widget's node for `key` is attached → computed now
//! - not attached yet → `Output::default()`, key recorded as pending; once a
//!   patch attaches it the widget is invalidated and re-renders with the
//!   real value
//!
//! # Scope
//!
//! The registry belongs to one projector; each widget carries its own
//! meta cache. Nothing is process-wide.

mod dimensions;
mod drag;
mod focus;

pub use dimensions::{DimensionResults, Dimensions, Position, Size};
pub use drag::{Drag, DragResults};
pub use focus::{Focus, FocusResults, NodeIdentity};

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::surface::{NodeId, Surface, SurfaceEvent};
use crate::types::Key;
use crate::widget::WidgetHandle;

// =============================================================================
// Provider trait
// =============================================================================

/// A kind of post-render fact.
pub trait MetaProvider: 'static {
    /// Value handed to render. `Default` is what render sees before the node
    /// exists.
    type Output: Clone + Default + PartialEq + 'static;

    /// Compute the value for one attached node.
    fn compute(&self, input: &mut MetaInput<'_>) -> Self::Output;

    /// Hand back the previously cached value (same allocation, same
    /// identity) when a recomputation yields an equal one.
    fn retain_unchanged(&self) -> bool {
        false
    }

    /// Feed a surface event requested through [`MetaInput::listen`].
    ///
    /// Returning true invalidates the widget that queried this provider.
    fn handle_event(&self, _node: NodeId, _event: &SurfaceEvent) -> bool {
        false
    }

    /// The surface node was released. Surfaces recycle node ids, so any
    /// state kept per node must be dropped here.
    fn node_released(&self, _node: NodeId) {}
}

/// What a provider sees when computing.
pub struct MetaInput<'a> {
    surface: &'a dyn Surface,
    node: NodeId,
    key: &'a Key,
    listens: Vec<Rc<str>>,
}

impl<'a> MetaInput<'a> {
    pub(crate) fn new(surface: &'a dyn Surface, node: NodeId, key: &'a Key) -> Self {
        Self {
            surface,
            node,
            key,
            listens: Vec::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn key(&self) -> &Key {
        self.key
    }

    pub fn surface(&self) -> &dyn Surface {
        self.surface
    }

    /// Ask for `event` on this node to be routed to
    /// [`MetaProvider::handle_event`].
    pub fn listen(&mut self, event: &str) {
        if !self.listens.iter().any(|e| &**e == event) {
            self.listens.push(Rc::from(event));
        }
    }

    pub(crate) fn into_listens(self) -> Vec<Rc<str>> {
        self.listens
    }
}

/// Type-erased event entry point of a registered provider.
pub(crate) trait MetaEvents {
    fn handle_event(&self, node: NodeId, event: &SurfaceEvent) -> bool;

    fn node_released(&self, node: NodeId);
}

impl<M: MetaProvider> MetaEvents for M {
    fn handle_event(&self, node: NodeId, event: &SurfaceEvent) -> bool {
        MetaProvider::handle_event(self, node, event)
    }

    fn node_released(&self, node: NodeId) {
        MetaProvider::node_released(self, node);
    }
}

/// A provider listener requested during render, installed by the projector.
pub(crate) struct ListenRequest {
    pub(crate) node: NodeId,
    pub(crate) event: Rc<str>,
    pub(crate) kind: TypeId,
    pub(crate) provider: Rc<dyn MetaEvents>,
    pub(crate) widget: WidgetHandle,
}

// =============================================================================
// Registry
// =============================================================================

struct RegisteredProvider {
    provider: Rc<dyn Any>,
    events: Rc<dyn MetaEvents>,
}

/// Provider kinds known to one projector.
#[derive(Default)]
pub struct MetaRegistry {
    providers: HashMap<TypeId, RegisteredProvider>,
}

impl MetaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in providers: [`Dimensions`], [`Drag`],
    /// [`NodeIdentity`] and [`Focus`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Dimensions);
        registry.register(Drag::default());
        registry.register(NodeIdentity);
        registry.register(Focus);
        registry
    }

    /// Register a provider, replacing any previous one of the same kind.
    pub fn register<M: MetaProvider>(&mut self, provider: M) {
        let provider = Rc::new(provider);
        self.providers.insert(
            TypeId::of::<M>(),
            RegisteredProvider {
                provider: provider.clone(),
                events: provider,
            },
        );
    }

    pub fn contains<M: MetaProvider>(&self) -> bool {
        self.providers.contains_key(&TypeId::of::<M>())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Tell every provider that `node` no longer exists.
    pub(crate) fn node_released(&self, node: NodeId) {
        for entry in self.providers.values() {
            entry.events.node_released(node);
        }
    }

    pub(crate) fn lookup<M: MetaProvider>(&self) -> Option<(Rc<M>, Rc<dyn MetaEvents>)> {
        let entry = self.providers.get(&TypeId::of::<M>())?;
        let provider = entry.provider.clone().downcast::<M>().ok()?;
        Some((provider, entry.events.clone()))
    }
}

// =============================================================================
// Per-widget cache
// =============================================================================

struct CacheEntry {
    value: Box<dyn Any>,
    generation: u64,
}

/// Memoized meta values of one widget.
///
/// Entries are valid for the render generation they were computed in. The
/// generation advances every time the widget re-renders.
#[derive(Default)]
pub(crate) struct MetaCache {
    generation: Cell<u64>,
    entries: RefCell<HashMap<(TypeId, Key), CacheEntry>>,
    pending: RefCell<HashSet<Key>>,
}

impl MetaCache {
    /// Start a new render generation. Pending keys are re-recorded by the
    /// render that follows.
    pub(crate) fn next_generation(&self) {
        self.generation.set(self.generation.get() + 1);
        self.pending.borrow_mut().clear();
    }

    fn lookup<T: Clone + 'static>(&self, kind: TypeId, key: &Key) -> Option<T> {
        let entries = self.entries.borrow();
        let entry = entries.get(&(kind, key.clone()))?;
        if entry.generation != self.generation.get() {
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    fn store<T: Clone + PartialEq + 'static>(&self, kind: TypeId, key: Key, value: T, retain: bool) -> T {
        let generation = self.generation.get();
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(&(kind, key.clone())) {
            Some(entry) => {
                if retain {
                    if let Some(previous) = entry.value.downcast_ref::<T>() {
                        if *previous == value {
                            entry.generation = generation;
                            return previous.clone();
                        }
                    }
                }
                entry.value = Box::new(value.clone());
                entry.generation = generation;
            }
            None => {
                entries.insert(
                    (kind, key),
                    CacheEntry {
                        value: Box::new(value.clone()),
                        generation,
                    },
                );
            }
        }
        value
    }

    fn mark_pending(&self, key: Key) {
        self.pending.borrow_mut().insert(key);
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Drop pending keys that `node_keys` now resolves. Returns whether any
    /// did, i.e. whether the widget must re-render to see real values.
    pub(crate) fn resolve_pending(&self, node_keys: &HashMap<Key, NodeId>) -> bool {
        let mut pending = self.pending.borrow_mut();
        let before = pending.len();
        pending.retain(|key| !node_keys.contains_key(key));
        pending.len() != before
    }

    /// Drop entries for keys the widget no longer renders.
    pub(crate) fn prune(&self, node_keys: &HashMap<Key, NodeId>) {
        self.entries
            .borrow_mut()
            .retain(|(_, key), _| node_keys.contains_key(key));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.pending.borrow_mut().clear();
    }
}

// =============================================================================
// Query
// =============================================================================

/// Borrowed view used by [`MetaQuery`].
pub(crate) struct MetaScope<'q> {
    pub(crate) cache: &'q MetaCache,
    pub(crate) node_keys: &'q HashMap<Key, NodeId>,
    pub(crate) surface: &'q dyn Surface,
    pub(crate) requests: &'q RefCell<Vec<ListenRequest>>,
    pub(crate) widget: &'q WidgetHandle,
}

/// Provider bound to the rendering widget, returned by
/// [`RenderContext::meta`](crate::widget::RenderContext::meta).
pub struct MetaQuery<'q, M: MetaProvider> {
    provider: Rc<M>,
    events: Rc<dyn MetaEvents>,
    scope: MetaScope<'q>,
}

impl<'q, M: MetaProvider> MetaQuery<'q, M> {
    pub(crate) fn new(provider: Rc<M>, events: Rc<dyn MetaEvents>, scope: MetaScope<'q>) -> Self {
        Self {
            provider,
            events,
            scope,
        }
    }

    /// Value for the node this widget rendered under `key`.
    pub fn get(&self, key: impl Into<Key>) -> M::Output {
        let key = key.into();
        let kind = TypeId::of::<M>();
        let scope = &self.scope;

        if let Some(value) = scope.cache.lookup::<M::Output>(kind, &key) {
            return value;
        }

        let Some(&node) = scope.node_keys.get(&key) else {
            scope.cache.mark_pending(key);
            return M::Output::default();
        };

        let mut input = MetaInput::new(scope.surface, node, &key);
        let value = self.provider.compute(&mut input);
        for event in input.into_listens() {
            scope.requests.borrow_mut().push(ListenRequest {
                node,
                event,
                kind,
                provider: self.events.clone(),
                widget: scope.widget.clone(),
            });
        }

        scope
            .cache
            .store(kind, key, value, self.provider.retain_unchanged())
    }

    /// Whether the widget's node for `key` is on the surface.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.scope.node_keys.contains_key(&key.into())
    }

    pub fn provider(&self) -> &M {
        &self.provider
    }
}

// =============================================================================
// Tests
// =============================================================================
