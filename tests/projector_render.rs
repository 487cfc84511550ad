//! End-to-end render and patch behavior of a projector over the in-memory
//! surface.
//!
//! Run with: cargo test --test projector_render

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use spark_vdom::{
    text, v, w, w_label, MemorySurface, NodeId, Patch, Projector, ProjectorHandle,
    ProjectorOptions, ProjectorState, PropValue, Properties, RenderContext, State, Surface,
    SurfaceError, TickOutcome, VNode, Widget, WidgetError, WidgetHandle, WidgetType,
};

// =============================================================================
// Helpers
// =============================================================================

fn mount(root: WidgetType) -> (Projector<MemorySurface>, NodeId) {
    let mut projector = Projector::new(MemorySurface::new(), root, ProjectorOptions::default());
    let body = projector.surface().document();
    projector.append(body).unwrap();
    (projector, body)
}

fn collect_errors(projector: &Projector<MemorySurface>) -> Rc<RefCell<Vec<WidgetError>>> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let _subscription = projector.on_error(move |e| sink.borrow_mut().push(e.clone()));
    errors
}

fn set(projector: &mut Projector<MemorySurface>, properties: Properties) {
    projector.set_properties(properties).unwrap();
    projector.flush().unwrap();
}

// =============================================================================
// Keyed list
// =============================================================================

struct List {
    outputs: Rc<RefCell<Vec<VNode>>>,
}

impl Widget for List {
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        let items = cx.properties().get_str("items").unwrap_or("");
        let tree = v("ul")
            .attr("class", "list")
            .children(
                items
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|item| v("li").key(item).text(item).build()),
            )
            .build();
        self.outputs.borrow_mut().push(tree.clone());
        Ok(tree)
    }
}

fn list() -> (WidgetType, Rc<RefCell<Vec<VNode>>>) {
    let outputs = Rc::new(RefCell::new(Vec::new()));
    let shared = outputs.clone();
    let ty = WidgetType::new("List", move || List {
        outputs: shared.clone(),
    });
    (ty, outputs)
}

fn item_texts(projector: &Projector<MemorySurface>) -> Vec<String> {
    let surface = projector.surface();
    let root = projector.root_node().unwrap();
    surface
        .children(root)
        .into_iter()
        .map(|li| surface.text_content(li))
        .collect()
}

#[test]
fn test_rendering_twice_is_idempotent() {
    let (ty, outputs) = list();
    let (mut projector, _) = mount(ty);
    set(&mut projector, Properties::new().with("items", "a,b"));

    projector.root_handle().unwrap().invalidate().unwrap();
    let outcome = projector.tick().unwrap();

    let outputs = outputs.borrow();
    let last = outputs.len() - 1;
    assert!(outputs[last].structurally_eq(&outputs[last - 1]));
    assert_eq!(outcome, TickOutcome::Rendered { patches: 0 });
}

#[test]
fn test_keyed_swap_only_moves() {
    let (ty, _) = list();
    let (mut projector, _) = mount(ty);
    set(&mut projector, Properties::new().with("items", "a,b,c"));

    let root = projector.root_node().unwrap();
    let before = projector.surface().children(root);

    set(&mut projector, Properties::new().with("items", "c,b,a"));

    let patches = projector.last_patches();
    assert!(!patches.is_empty());
    assert!(patches.iter().all(Patch::is_move), "{patches:?}");

    let after = projector.surface().children(root);
    assert_eq!(after, vec![before[2], before[1], before[0]]);
    assert_eq!(item_texts(&projector), vec!["c", "b", "a"]);
}

#[test]
fn test_keyed_insert_and_remove_keep_survivors() {
    let (ty, _) = list();
    let (mut projector, _) = mount(ty);
    set(&mut projector, Properties::new().with("items", "a,b,c"));

    let root = projector.root_node().unwrap();
    let before = projector.surface().children(root);

    set(&mut projector, Properties::new().with("items", "x,a,c"));
    let after = projector.surface().children(root);

    assert_eq!(item_texts(&projector), vec!["x", "a", "c"]);
    assert_eq!(after[1], before[0]);
    assert_eq!(after[2], before[2]);
    assert!(!projector.surface().exists(before[1]));
    assert!(!projector.last_patches().iter().any(Patch::is_move));
}

// =============================================================================
// Widget identity
// =============================================================================

#[derive(Default)]
struct Counters {
    created: Cell<usize>,
    destroyed: Cell<usize>,
    renders: Cell<usize>,
    handle: RefCell<Option<WidgetHandle>>,
}

struct Child {
    counters: Rc<Counters>,
}

impl Widget for Child {
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        self.counters.renders.set(self.counters.renders.get() + 1);
        Ok(v("span").text(cx.properties().get_str("label").unwrap_or("")).build())
    }

    fn on_attach(&mut self, handle: &WidgetHandle) {
        self.counters.created.set(self.counters.created.get() + 1);
        *self.counters.handle.borrow_mut() = Some(handle.clone());
    }

    fn on_detach(&mut self) {
        self.counters.destroyed.set(self.counters.destroyed.get() + 1);
    }
}

struct Parent {
    child: WidgetType,
    renders: Rc<Cell<usize>>,
}

impl Widget for Parent {
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        self.renders.set(self.renders.get() + 1);
        let props = cx.properties();
        let label = props.get_str("label").unwrap_or("");
        let mut root = v("div");
        if props.get_bool("banner").unwrap_or(false) {
            root = root.child(v("h1").text("banner").build());
        }
        Ok(root
            .child(w(&self.child, Properties::new().with("label", label)).build())
            .build())
    }
}

fn parent_and_child() -> (WidgetType, Rc<Counters>, Rc<Cell<usize>>) {
    let counters = Rc::new(Counters::default());
    let factory_counters = counters.clone();
    let child = WidgetType::new("Child", move || Child {
        counters: factory_counters.clone(),
    });
    let renders = Rc::new(Cell::new(0));
    let parent_renders = renders.clone();
    let parent = WidgetType::new("Parent", move || Parent {
        child: child.clone(),
        renders: parent_renders.clone(),
    });
    (parent, counters, renders)
}

#[test]
fn test_property_change_reuses_child_instance() {
    let (parent, counters, _) = parent_and_child();
    let (mut projector, _) = mount(parent);
    assert_eq!(counters.created.get(), 1);

    set(&mut projector, Properties::new().with("label", "one"));
    set(&mut projector, Properties::new().with("label", "two"));

    assert_eq!(counters.created.get(), 1);
    assert_eq!(counters.destroyed.get(), 0);
    assert_eq!(counters.renders.get(), 3);
    let root = projector.root_node().unwrap();
    assert_eq!(projector.surface().text_content(root), "two");
}

#[test]
fn test_unkeyed_child_recreated_when_index_changes() {
    let (parent, counters, _) = parent_and_child();
    let (mut projector, _) = mount(parent);

    set(&mut projector, Properties::new().with("banner", true));

    assert_eq!(counters.created.get(), 2);
    assert_eq!(counters.destroyed.get(), 1);
    assert_eq!(projector.widget_count(), 2);
}

#[test]
fn test_child_invalidation_skips_parent_render() {
    let (parent, counters, parent_renders) = parent_and_child();
    let (mut projector, _) = mount(parent);
    assert_eq!(parent_renders.get(), 1);

    let handle = counters.handle.borrow().clone().unwrap();
    handle.invalidate().unwrap();
    assert!(projector.handle().is_render_scheduled());

    let outcome = projector.tick().unwrap();
    assert_eq!(outcome, TickOutcome::Rendered { patches: 0 });
    assert_eq!(parent_renders.get(), 1);
    assert_eq!(counters.renders.get(), 2);
}

#[test]
fn test_invalidations_coalesce_into_one_tick() {
    let (parent, counters, parent_renders) = parent_and_child();
    let (mut projector, _) = mount(parent);

    let handle = counters.handle.borrow().clone().unwrap();
    handle.invalidate().unwrap();
    handle.invalidate().unwrap();
    projector.root_handle().unwrap().invalidate().unwrap();

    assert_eq!(projector.flush().unwrap(), 1);
    assert_eq!(parent_renders.get(), 2);
    assert_eq!(counters.renders.get(), 2);
}

// =============================================================================
// Destroy ordering
// =============================================================================

struct Logged {
    name: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
    child: Option<WidgetType>,
}

impl Widget for Logged {
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        let show = cx.properties().get_bool("show").unwrap_or(true);
        let mut root = v("section").attr("data-name", self.name);
        if let (Some(child), true) = (&self.child, show) {
            root = root.child(w(child, Properties::new()).build());
        }
        Ok(root.build())
    }

    fn on_detach(&mut self) {
        self.log.borrow_mut().push(self.name);
    }
}

fn chain(log: &Rc<RefCell<Vec<&'static str>>>) -> WidgetType {
    let leaf_log = log.clone();
    let leaf = WidgetType::new("Leaf", move || Logged {
        name: "leaf",
        log: leaf_log.clone(),
        child: None,
    });
    let mid_log = log.clone();
    let mid = WidgetType::new("Mid", move || Logged {
        name: "mid",
        log: mid_log.clone(),
        child: Some(leaf.clone()),
    });
    let root_log = log.clone();
    WidgetType::new("Root", move || Logged {
        name: "root",
        log: root_log.clone(),
        child: Some(mid.clone()),
    })
}

#[test]
fn test_destroy_detaches_leaves_first() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let (mut projector, body) = mount(chain(&log));
    assert_eq!(projector.widget_count(), 3);

    projector.destroy().unwrap();
    assert_eq!(*log.borrow(), vec!["leaf", "mid", "root"]);
    assert!(projector.surface().children(body).is_empty());
}

#[test]
fn test_dropped_subtree_detaches_leaves_first() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let (mut projector, _) = mount(chain(&log));

    set(&mut projector, Properties::new().with("show", false));
    assert_eq!(*log.borrow(), vec!["leaf", "mid"]);
    assert_eq!(projector.widget_count(), 1);
}

#[test]
fn test_removals_precede_insertions_and_moves() {
    let (ty, _) = list();
    let (mut projector, _) = mount(ty);
    set(&mut projector, Properties::new().with("items", "a,b,c,d"));
    set(&mut projector, Properties::new().with("items", "d,x,b"));

    let root = projector.root_node().unwrap();
    let patches = projector.last_patches();
    let first_placement = patches
        .iter()
        .position(|p| {
            matches!(p, Patch::Insert { parent, .. } | Patch::Move { parent, .. } if *parent == root)
        })
        .unwrap();
    let removals: Vec<usize> = patches
        .iter()
        .enumerate()
        .filter(|(_, p)| matches!(p, Patch::Remove { parent, .. } if *parent == root))
        .map(|(i, _)| i)
        .collect();

    assert_eq!(removals.len(), 2);
    assert!(removals.iter().all(|&i| i < first_placement));
    assert_eq!(item_texts(&projector), vec!["d", "x", "b"]);
}

// =============================================================================
// Re-entrant invalidation
// =============================================================================

struct Restless {
    handle: Option<WidgetHandle>,
    renders: Rc<Cell<usize>>,
}

impl Widget for Restless {
    fn render(&self, _cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        let count = self.renders.get() + 1;
        self.renders.set(count);
        if count < 3 {
            if let Some(handle) = &self.handle {
                handle.invalidate()?;
            }
        }
        Ok(v("p").text(count.to_string()).build())
    }

    fn on_attach(&mut self, handle: &WidgetHandle) {
        self.handle = Some(handle.clone());
    }
}

#[test]
fn test_invalidation_during_render_runs_next_tick() {
    let renders = Rc::new(Cell::new(0));
    let shared = renders.clone();
    let (mut projector, _) = mount(WidgetType::new("Restless", move || Restless {
        handle: None,
        renders: shared.clone(),
    }));
    assert_eq!(renders.get(), 1);
    assert!(projector.handle().is_render_scheduled());

    assert!(matches!(projector.tick().unwrap(), TickOutcome::Rendered { .. }));
    assert_eq!(renders.get(), 2);
    assert!(matches!(projector.tick().unwrap(), TickOutcome::Rendered { .. }));
    assert_eq!(renders.get(), 3);
    assert_eq!(projector.tick().unwrap(), TickOutcome::Idle);

    let root = projector.root_node().unwrap();
    assert_eq!(projector.surface().text_content(root), "3");
}

// =============================================================================
// Merged host
// =============================================================================

struct Shell;

impl Widget for Shell {
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        let tag = cx.properties().get_str("tag").unwrap_or("div");
        Ok(v(tag)
            .attr("class", "shell")
            .child(v("p").text(tag).build())
            .build())
    }
}

#[test]
fn test_merged_host_survives_root_tag_change() {
    let mut projector = Projector::new(
        MemorySurface::new(),
        WidgetType::new("Shell", || Shell),
        ProjectorOptions::default(),
    );
    let (body, host) = {
        let surface = projector.surface_mut();
        let body = surface.document();
        let host = surface.create_element("div").unwrap();
        surface.insert_before(body, host, None).unwrap();
        (body, host)
    };
    projector.merge(host).unwrap();

    set(&mut projector, Properties::new().with("tag", "section"));
    assert!(projector.surface().exists(host));
    assert_eq!(projector.root_node(), Some(host));
    assert_eq!(projector.surface().children(body), vec![host]);
    assert_eq!(projector.surface().text_content(host), "section");

    projector.destroy().unwrap();
    assert!(projector.surface().exists(host));
    assert_eq!(projector.surface().children(body), vec![host]);
    assert!(projector.surface().children(host).is_empty());
}

// =============================================================================
// Reported conditions
// =============================================================================

struct Static(fn() -> VNode);

impl Widget for Static {
    fn render(&self, _cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        Ok((self.0)())
    }
}

#[test]
fn test_duplicate_keys_render_both_nodes() {
    let ty = WidgetType::new("Dupes", || {
        Static(|| {
            v("ul")
                .child(v("li").key("a").text("first").build())
                .child(v("li").key("a").text("second").build())
                .build()
        })
    });
    let mut projector = Projector::new(MemorySurface::new(), ty, ProjectorOptions::default());
    let errors = collect_errors(&projector);
    let body = projector.surface().document();
    projector.append(body).unwrap();

    assert_eq!(*errors.borrow(), vec![WidgetError::DuplicateKey { key: "a".into() }]);
    let root = projector.root_node().unwrap();
    assert_eq!(projector.surface().children(root).len(), 2);
    assert_eq!(projector.surface().text_content(root), "firstsecond");
}

#[test]
fn test_rejected_attribute_is_reported_and_skipped() {
    let ty = WidgetType::new("Bad", || {
        Static(|| v("div").attr("data-bad", "x").attr("id", "ok").text("still here").build())
    });
    let mut surface = MemorySurface::new();
    surface.reject_attribute("data-bad");
    let mut projector = Projector::new(surface, ty, ProjectorOptions::default());
    let errors = collect_errors(&projector);
    let body = projector.surface().document();
    projector.append(body).unwrap();

    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        WidgetError::Patch {
            operation: "set_attribute",
            source: SurfaceError::Rejected { .. },
        }
    ));
    let root = projector.root_node().unwrap();
    assert_eq!(projector.surface().text_content(root), "still here");
    assert!(projector.surface().attribute(root, "id").is_some());
    assert!(projector.surface().attribute(root, "data-bad").is_none());
}

struct Flaky;

impl Widget for Flaky {
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        let props = cx.properties();
        if props.get_bool("fail").unwrap_or(false) {
            return Err(WidgetError::render("Flaky", "upstream unavailable"));
        }
        Ok(v("p").text(props.get_str("label").unwrap_or("")).build())
    }
}

#[test]
fn test_render_failure_keeps_previous_output() {
    let (mut projector, _) = mount(WidgetType::new("Flaky", || Flaky));
    let errors = collect_errors(&projector);
    set(&mut projector, Properties::new().with("label", "v1"));
    let root = projector.root_node().unwrap();

    set(
        &mut projector,
        Properties::new().with("label", "v2").with("fail", true),
    );
    assert_eq!(projector.surface().text_content(root), "v1");
    assert!(projector.last_patches().is_empty());
    assert_eq!(
        *errors.borrow(),
        vec![WidgetError::render("Flaky", "upstream unavailable")]
    );

    set(&mut projector, Properties::new().with("label", "v3"));
    assert_eq!(projector.root_node(), Some(root));
    assert_eq!(projector.surface().text_content(root), "v3");
}

#[test]
fn test_labels_resolve_through_registry() {
    let ty = WidgetType::new("Shell", || {
        Static(|| {
            v("main")
                .child(w_label("greeting", Properties::new()).build())
                .child(w_label("missing", Properties::new()).build())
                .build()
        })
    });
    let mut projector = Projector::new(MemorySurface::new(), ty, ProjectorOptions::default());
    projector.register_widget(
        "greeting",
        WidgetType::new("Greeting", || Static(|| text("hello"))),
    );
    let errors = collect_errors(&projector);
    let body = projector.surface().document();
    projector.append(body).unwrap();

    assert_eq!(
        *errors.borrow(),
        vec![WidgetError::UnresolvedWidget {
            label: "missing".to_string()
        }]
    );
    let root = projector.root_node().unwrap();
    assert_eq!(projector.surface().text_content(root), "hello");
    assert_eq!(projector.widget_count(), 2);
}

// =============================================================================
// Events and detach
// =============================================================================

#[derive(Default)]
struct Clicker {
    clicks: Option<State<i64>>,
}

impl Widget for Clicker {
    fn render(&self, _cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        let clicks = self
            .clicks
            .clone()
            .ok_or_else(|| WidgetError::render("Clicker", "rendered before attach"))?;
        let count = clicks.get();
        Ok(v("button")
            .on("click", move |_| clicks.update(|n| n + 1))
            .text(format!("clicked {count}"))
            .build())
    }

    fn on_attach(&mut self, handle: &WidgetHandle) {
        self.clicks = Some(handle.state(0));
    }
}

#[test]
fn test_listener_is_bound_once_across_renders() {
    let (mut projector, _) = mount(WidgetType::new("Clicker", Clicker::default));
    let button = projector.root_node().unwrap();
    assert_eq!(projector.listener_count(), 1);

    for _ in 0..3 {
        projector
            .surface()
            .dispatch(&spark_vdom::SurfaceEvent::new("click", button));
        projector.flush().unwrap();
        assert!(!projector
            .last_patches()
            .iter()
            .any(|p| matches!(p, Patch::AddListener { .. } | Patch::RemoveListener { .. })));
    }
    assert_eq!(projector.listener_count(), 1);
    assert_eq!(projector.surface().text_content(button), "clicked 3");
}

struct Detacher;

impl Widget for Detacher {
    fn render(&self, cx: &RenderContext<'_>) -> Result<VNode, WidgetError> {
        let props = cx.properties();
        if let Some(handle) = props.get_any::<ProjectorHandle>("projector") {
            handle.detach();
        }
        Ok(v("p").text(props.get_str("label").unwrap_or("initial")).build())
    }
}

#[test]
fn test_detach_during_render_discards_output() {
    let (mut projector, body) = mount(WidgetType::new("Detacher", || Detacher));
    let handle = projector.handle();

    projector
        .set_properties(
            Properties::new()
                .with("label", "never shown")
                .with("projector", PropValue::any(handle.clone())),
        )
        .unwrap();
    assert_eq!(projector.tick().unwrap(), TickOutcome::Cancelled);

    assert_eq!(projector.state(), ProjectorState::Detached);
    assert!(projector.surface().children(body).is_empty());
    assert!(!handle.is_render_scheduled());
    assert!(!handle.schedule_render());
}
