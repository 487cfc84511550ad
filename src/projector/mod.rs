//! Projector - Owns one root widget and keeps a surface in sync with it.
//!
//! The projector is the render loop. Widgets never render on their own:
//! `invalidate()` marks them dirty and flags a tick, and the host drives
//! ticks (directly, through [`Projector::flush`], or from the
//! [`ProjectorOptions::on_tick_request`] hook).
//!
//! # Tick
//!
//! ```text
//! scheduled? ──no──► Idle
//!     │
//!     ▼
//! render pass (dirty widgets only, clean subtrees reused by Rc)
//!     │
//!     ├── detach requested meanwhile ──► discard, tear down, Cancelled
//!     ▼
//! patch (previous tree → new tree) ──► surface
//!     │
//!     ▼
//! refresh meta node maps, report errors ──► Rendered { patches }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use spark_vdom::{Projector, ProjectorOptions, MemorySurface};
//!
//! let mut projector = Projector::new(MemorySurface::new(), app_type, ProjectorOptions::default());
//! let body = projector.surface().document();
//! projector.append(body)?;
//!
//! projector.set_properties(Properties::new().with("title", "Inbox"))?;
//! projector.flush()?;
//! ```

mod patch;
mod render;
pub(crate) mod scheduler;
pub(crate) mod tree;

pub use patch::Patch;
pub use scheduler::TickRequest;

use std::rc::Rc;

use patch::{Applied, ListenerTable, Patcher};
use render::{destroy_widget_tree, RenderPass};
use scheduler::Scheduler;
use tree::RNode;

use crate::error::{LifecycleState, SurfaceError, WidgetError};
use crate::meta::{ListenRequest, MetaProvider, MetaRegistry};
use crate::pool::{Subscription, SubscriptionPool};
use crate::surface::{NodeId, Surface};
use crate::types::Properties;
use crate::vnode::VNode;
use crate::widget::{WidgetArena, WidgetBase, WidgetHandle, WidgetId, WidgetRegistry, WidgetType};

// =============================================================================
// Options
// =============================================================================

/// Projector configuration.
#[derive(Clone)]
pub struct ProjectorOptions {
    error_replay: Option<usize>,
    max_flush_ticks: usize,
    on_tick_request: Option<TickRequest>,
}

impl Default for ProjectorOptions {
    fn default() -> Self {
        Self {
            error_replay: Some(32),
            max_flush_ticks: 16,
            on_tick_request: None,
        }
    }
}

impl ProjectorOptions {
    /// Errors kept for an error sink that attaches late. `None` keeps all.
    pub fn error_replay(mut self, max: Option<usize>) -> Self {
        self.error_replay = max;
        self
    }

    /// Upper bound on ticks run by one [`Projector::flush`].
    pub fn max_flush_ticks(mut self, max: usize) -> Self {
        self.max_flush_ticks = max.max(1);
        self
    }

    /// Called each time a tick becomes pending.
    pub fn on_tick_request(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_tick_request = Some(Rc::new(hook));
        self
    }

    pub fn error_replay_limit(&self) -> Option<usize> {
        self.error_replay
    }

    pub fn flush_limit(&self) -> usize {
        self.max_flush_ticks
    }
}

impl std::fmt::Debug for ProjectorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectorOptions")
            .field("error_replay", &self.error_replay)
            .field("max_flush_ticks", &self.max_flush_ticks)
            .field("on_tick_request", &self.on_tick_request.is_some())
            .finish()
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable remote for callbacks that cannot borrow the projector.
#[derive(Clone)]
pub struct ProjectorHandle {
    scheduler: Rc<Scheduler>,
}

impl ProjectorHandle {
    /// Flag a tick without invalidating any widget.
    pub fn schedule_render(&self) -> bool {
        self.scheduler.schedule()
    }

    pub fn is_render_scheduled(&self) -> bool {
        self.scheduler.is_scheduled()
    }

    /// Ask the projector to detach at its next tick. A render already in
    /// progress is discarded.
    pub fn detach(&self) {
        self.scheduler.request_detach();
    }

    pub fn is_detach_requested(&self) -> bool {
        self.scheduler.detach_requested()
    }
}

impl std::fmt::Debug for ProjectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectorHandle")
            .field("scheduled", &self.scheduler.is_scheduled())
            .field("detached", &self.scheduler.is_detached())
            .finish()
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectorState {
    /// Constructed, nothing rendered yet.
    Created,
    Attached,
    /// Terminal.
    Detached,
}

impl ProjectorState {
    fn lifecycle(self) -> LifecycleState {
        match self {
            ProjectorState::Created => LifecycleState::Created,
            ProjectorState::Attached => LifecycleState::Attached,
            ProjectorState::Detached => LifecycleState::Detached,
        }
    }
}

/// What one [`Projector::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was scheduled.
    Idle,
    Rendered { patches: usize },
    /// A detach request won. The projector is now detached.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MountMode {
    Append,
    Merge,
    Replace,
}

struct Mount {
    parent: NodeId,
    /// Node adopted by `merge`. Never removed by the projector.
    host: Option<NodeId>,
}

struct PassOutput {
    tree: Rc<RNode>,
    rendered: Vec<WidgetId>,
    errors: Vec<WidgetError>,
    listens: Vec<ListenRequest>,
}

// =============================================================================
// Projector
// =============================================================================

pub struct Projector<S: Surface> {
    surface: S,
    arena: WidgetArena,
    registry: WidgetRegistry,
    meta: MetaRegistry,
    scheduler: Rc<Scheduler>,
    root: WidgetId,
    /// Resolved output of the root widget as last patched.
    tree: Option<Rc<RNode>>,
    mount: Option<Mount>,
    state: ProjectorState,
    listeners: ListenerTable,
    errors: SubscriptionPool<WidgetError>,
    last_patches: Vec<Patch>,
    ticks: u64,
    options: ProjectorOptions,
}

impl<S: Surface> Projector<S> {
    /// Create a projector with a fresh root widget of `root_type`.
    ///
    /// The built-in meta providers are registered; nothing is rendered until
    /// one of [`append`](Self::append), [`merge`](Self::merge) or
    /// [`replace`](Self::replace) is called.
    pub fn new(surface: S, root_type: WidgetType, options: ProjectorOptions) -> Self {
        let scheduler = Scheduler::new(options.on_tick_request.clone());
        let mut arena = WidgetArena::new();
        let root = arena.allocate(|id| WidgetBase::new(id, root_type, None, None, &scheduler));
        let errors = match options.error_replay {
            Some(max) => SubscriptionPool::with_max(max),
            None => SubscriptionPool::new(),
        };

        Self {
            surface,
            arena,
            registry: WidgetRegistry::new(),
            meta: MetaRegistry::with_defaults(),
            scheduler,
            root,
            tree: None,
            mount: None,
            state: ProjectorState::Created,
            listeners: ListenerTable::default(),
            errors,
            last_patches: Vec::new(),
            ticks: 0,
            options,
        }
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Make `widget_type` available to `w_label(label, ..)` nodes.
    pub fn register_widget(&mut self, label: &str, widget_type: WidgetType) {
        self.registry.register(label, widget_type);
    }

    /// Register (or replace) a meta provider kind.
    pub fn register_meta<M: MetaProvider>(&mut self, provider: M) {
        self.meta.register(provider);
    }

    /// Attach the application-level error hook. Errors reported before the
    /// first hook attached are replayed into it.
    pub fn on_error(&self, sink: impl Fn(&WidgetError) + 'static) -> Subscription {
        self.errors.add(sink)
    }

    pub fn options(&self) -> &ProjectorOptions {
        &self.options
    }

    // -------------------------------------------------------------------------
    // Attach
    // -------------------------------------------------------------------------

    /// Render and append the output as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId) -> Result<(), WidgetError> {
        self.attach(MountMode::Append, parent, parent)
    }

    /// Render and adopt `existing` as the root element instead of creating
    /// one. Its children and attributes are brought in line with the output.
    pub fn merge(&mut self, existing: NodeId) -> Result<(), WidgetError> {
        let parent = self.surface.parent(existing).unwrap_or(existing);
        self.attach(MountMode::Merge, parent, existing)
    }

    /// Render and put the output where `existing` is, removing `existing`.
    pub fn replace(&mut self, existing: NodeId) -> Result<(), WidgetError> {
        let parent = self
            .surface
            .parent(existing)
            .ok_or_else(|| WidgetError::patch("replace", SurfaceError::UnknownNode(existing.index())))?;
        self.attach(MountMode::Replace, parent, existing)
    }

    fn attach(&mut self, mode: MountMode, parent: NodeId, target: NodeId) -> Result<(), WidgetError> {
        let operation = match mode {
            MountMode::Append => "append",
            MountMode::Merge => "merge",
            MountMode::Replace => "replace",
        };
        if self.state != ProjectorState::Created {
            return Err(WidgetError::lifecycle(operation, self.state.lifecycle()));
        }
        let _span = tracing::debug_span!("projector.attach", mode = operation).entered();

        self.scheduler.take_scheduled();
        let output = self.render_pass();

        let mut patcher = Patcher::new(&mut self.surface, &mut self.listeners);
        match mode {
            MountMode::Append => patcher.mount(parent, &output.tree, None),
            MountMode::Merge => patcher.merge(target, &output.tree),
            MountMode::Replace => {
                patcher.mount(parent, &output.tree, Some(target));
                patcher.remove_foreign(parent, target);
            }
        }
        let applied = patcher.finish();

        let host = (mode == MountMode::Merge).then_some(target);
        self.state = ProjectorState::Attached;
        self.mount = Some(Mount { parent, host });
        self.complete(output, applied);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Root inputs
    // -------------------------------------------------------------------------

    /// Replace the root widget's properties. Schedules a tick if any changed.
    pub fn set_properties(&mut self, properties: Properties) -> Result<(), WidgetError> {
        self.ensure_live("set_properties")?;
        if self.root_base_mut("set_properties")?.set_properties(properties)? {
            self.scheduler.schedule();
        }
        Ok(())
    }

    /// Replace the root widget's children. Schedules a tick if any changed.
    pub fn set_children(&mut self, children: Vec<VNode>) -> Result<(), WidgetError> {
        self.ensure_live("set_children")?;
        if self.root_base_mut("set_children")?.set_children(children)? {
            self.scheduler.schedule();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Ticks
    // -------------------------------------------------------------------------

    /// Run one tick if one is scheduled.
    pub fn tick(&mut self) -> Result<TickOutcome, WidgetError> {
        if self.state != ProjectorState::Attached {
            return Err(WidgetError::lifecycle("tick", self.state.lifecycle()));
        }
        if self.scheduler.detach_requested() {
            self.teardown();
            return Ok(TickOutcome::Cancelled);
        }
        if !self.scheduler.take_scheduled() {
            return Ok(TickOutcome::Idle);
        }

        self.ticks += 1;
        let _span = tracing::debug_span!("projector.tick", tick = self.ticks).entered();

        let mut output = self.render_pass();
        if self.scheduler.detach_requested() {
            tracing::debug!("detach requested during render, discarding output");
            self.report(output.errors);
            self.teardown();
            return Ok(TickOutcome::Cancelled);
        }

        let (parent, host) = match &self.mount {
            Some(mount) => (mount.parent, mount.host),
            None => return Err(WidgetError::lifecycle("tick", LifecycleState::Created)),
        };
        let mut patcher = Patcher::new(&mut self.surface, &mut self.listeners).with_host(host);
        for request in std::mem::take(&mut output.listens) {
            patcher.install_meta_listener(request);
        }
        patcher.patch_root(parent, self.tree.as_ref(), &output.tree);
        let applied = patcher.finish();

        let count = applied.patches.len();
        tracing::debug!(patches = count, widgets = output.rendered.len(), "tick applied");
        self.complete(output, applied);
        Ok(TickOutcome::Rendered { patches: count })
    }

    /// Tick until idle, at most `max_flush_ticks` times. Returns the number
    /// of ticks that rendered.
    pub fn flush(&mut self) -> Result<usize, WidgetError> {
        let mut rendered = 0;
        for _ in 0..self.options.max_flush_ticks {
            match self.tick()? {
                TickOutcome::Rendered { .. } => rendered += 1,
                TickOutcome::Idle | TickOutcome::Cancelled => return Ok(rendered),
            }
        }
        if self.scheduler.is_scheduled() {
            tracing::warn!(
                max = self.options.max_flush_ticks,
                "flush stopped with a tick still scheduled"
            );
        }
        Ok(rendered)
    }

    fn render_pass(&mut self) -> PassOutput {
        let mut pass = RenderPass::new(
            &mut self.arena,
            &self.registry,
            &self.meta,
            &self.surface,
            &self.scheduler,
        );
        let tree = pass.render_widget(self.root);
        PassOutput {
            tree,
            rendered: pass.rendered,
            errors: pass.errors,
            listens: pass.listens,
        }
    }

    /// Store the patched tree, refresh meta node maps and report.
    fn complete(&mut self, output: PassOutput, applied: Applied) {
        self.tree = Some(output.tree);
        self.release_nodes(&applied.released);

        for id in &output.rendered {
            let Some(base) = self.arena.get_mut(*id) else { continue };
            // A meta key read as pending is attached now: render again
            if base.after_patch() {
                let _ = base.invalidate();
            }
        }

        self.report(output.errors);
        self.report(applied.errors);
        self.last_patches = applied.patches;
    }

    /// Drop per-node provider state of released nodes before their ids are
    /// handed out again.
    fn release_nodes(&self, nodes: &[NodeId]) {
        for node in nodes {
            self.meta.node_released(*node);
        }
    }

    fn report(&self, errors: Vec<WidgetError>) {
        for error in errors {
            self.errors.next(error);
        }
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Destroy every widget (children before parents), remove the rendered
    /// nodes from the surface and detach. Terminal.
    pub fn destroy(&mut self) -> Result<(), WidgetError> {
        if self.state == ProjectorState::Detached {
            return Err(WidgetError::lifecycle("destroy", LifecycleState::Detached));
        }
        self.teardown();
        Ok(())
    }

    /// Same as [`destroy`](Self::destroy).
    pub fn detach(&mut self) -> Result<(), WidgetError> {
        if self.state == ProjectorState::Detached {
            return Err(WidgetError::lifecycle("detach", LifecycleState::Detached));
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        let _span = tracing::debug_span!("projector.detach").entered();
        self.scheduler.cancel();
        destroy_widget_tree(&mut self.arena, self.root);

        if let (Some(tree), Some(mount)) = (self.tree.take(), self.mount.take()) {
            let mut patcher = Patcher::new(&mut self.surface, &mut self.listeners).with_host(mount.host);
            match mount.host {
                // Anything else at the root was created by this projector
                Some(host) if tree.dom_node() == Some(host) => patcher.unmount_children(&tree),
                _ => patcher.unmount(mount.parent, &tree),
            }
            let applied = patcher.finish();
            self.release_nodes(&applied.released);
            self.report(applied.errors);
            self.last_patches = applied.patches;
        }
        self.listeners.clear();
        self.state = ProjectorState::Detached;
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> ProjectorState {
        self.state
    }

    pub fn handle(&self) -> ProjectorHandle {
        ProjectorHandle {
            scheduler: self.scheduler.clone(),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Mutable surface access for the host (focus, viewport, ...).
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Patches applied by the last tick (or attach, or detach).
    pub fn last_patches(&self) -> &[Patch] {
        &self.last_patches
    }

    /// Surface node of the rendered root element.
    pub fn root_node(&self) -> Option<NodeId> {
        self.tree.as_ref().and_then(|tree| tree.dom_node())
    }

    pub fn root_widget(&self) -> Option<&WidgetBase> {
        self.arena.get(self.root)
    }

    /// Handle to the root widget, e.g. to invalidate it from outside.
    pub fn root_handle(&self) -> Option<WidgetHandle> {
        self.root_widget().map(WidgetBase::handle)
    }

    pub fn widget(&self, id: WidgetId) -> Option<&WidgetBase> {
        self.arena.get(id)
    }

    /// Live widget instances, the root included.
    pub fn widget_count(&self) -> usize {
        self.arena.len()
    }

    /// Surface listeners currently bound by this projector.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Ticks that rendered since attach.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Host tick requests raised so far.
    pub fn tick_requests(&self) -> u64 {
        self.scheduler.request_count()
    }

    fn ensure_live(&self, operation: &'static str) -> Result<(), WidgetError> {
        if self.state == ProjectorState::Detached {
            return Err(WidgetError::lifecycle(operation, LifecycleState::Detached));
        }
        Ok(())
    }

    fn root_base_mut(&mut self, operation: &'static str) -> Result<&mut WidgetBase, WidgetError> {
        self.arena
            .get_mut(self.root)
            .ok_or_else(|| WidgetError::lifecycle(operation, LifecycleState::Destroyed))
    }
}

impl<S: Surface> Drop for Projector<S> {
    fn drop(&mut self) {
        if self.state != ProjectorState::Detached {
            self.scheduler.cancel();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
