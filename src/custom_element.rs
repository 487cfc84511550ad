//! Custom elements - Expose a widget type as a host element with attributes,
//! properties and events.
//!
//! A [`CustomElementDescriptor`] says how the host element maps onto the
//! widget: which string attributes feed which properties, which properties
//! may be set directly, and which callback properties are surfaced as named
//! host events. A [`CustomElement`] is one live instance: it owns a
//! [`Projector`] rendering into the host node and funnels every attribute or
//! property change through [`Projector::set_properties`].
//!
//! # Example
//!
//! ```ignore
//! let descriptor = CustomElementDescriptor::new("todo-counter", counter_type)
//!     .attribute("label", "label")
//!     .property("count")
//!     .event("onIncrement", "increment");
//!
//! let mut element = CustomElement::new(descriptor, MemorySurface::new(), ProjectorOptions::default());
//! let _sub = element.on_event(|event| println!("{} {:?}", event.name, event.detail));
//! element.connect(host)?;
//! element.attribute_changed("label", Some("Clicks"))?;
//! element.update()?;
//! ```

use std::rc::Rc;

use crate::error::WidgetError;
use crate::pool::{Subscription, SubscriptionPool};
use crate::projector::{Projector, ProjectorOptions};
use crate::surface::{NodeId, Surface};
use crate::types::{PropValue, Properties};
use crate::widget::WidgetType;

/// Hook run once on the initial property bag before the first render.
pub type InitHook = Rc<dyn Fn(&mut Properties)>;

// =============================================================================
// Descriptor
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
struct AttributeBinding {
    attribute: Rc<str>,
    property: Rc<str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct EventBinding {
    property: Rc<str>,
    event: Rc<str>,
}

/// How a widget type is presented as a custom element.
#[derive(Clone)]
pub struct CustomElementDescriptor {
    tag_name: Rc<str>,
    widget_type: WidgetType,
    attributes: Vec<AttributeBinding>,
    properties: Vec<Rc<str>>,
    events: Vec<EventBinding>,
    init: Option<InitHook>,
}

impl CustomElementDescriptor {
    pub fn new(tag_name: &str, widget_type: WidgetType) -> Self {
        Self {
            tag_name: Rc::from(tag_name),
            widget_type,
            attributes: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            init: None,
        }
    }

    /// Observe `attribute` and copy its value into `property`.
    pub fn attribute(mut self, attribute: &str, property: &str) -> Self {
        self.attributes.retain(|b| &*b.attribute != attribute);
        self.attributes.push(AttributeBinding {
            attribute: Rc::from(attribute),
            property: Rc::from(property),
        });
        self
    }

    /// Allow `property` to be set directly.
    pub fn property(mut self, property: &str) -> Self {
        if !self.properties.iter().any(|p| &**p == property) {
            self.properties.push(Rc::from(property));
        }
        self
    }

    /// Pass a callback property named `property` that emits `event` on the
    /// host when the widget calls it.
    pub fn event(mut self, property: &str, event: &str) -> Self {
        self.events.retain(|b| &*b.property != property);
        self.events.push(EventBinding {
            property: Rc::from(property),
            event: Rc::from(event),
        });
        self
    }

    pub fn init(mut self, hook: impl Fn(&mut Properties) + 'static) -> Self {
        self.init = Some(Rc::new(hook));
        self
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn widget_type(&self) -> &WidgetType {
        &self.widget_type
    }

    /// Attribute names the host should report changes for.
    pub fn observed_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|b| &*b.attribute)
    }

    /// Host event names this element can emit.
    pub fn emitted_events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|b| &*b.event)
    }

    fn property_for_attribute(&self, attribute: &str) -> Option<&Rc<str>> {
        self.attributes
            .iter()
            .find(|b| &*b.attribute == attribute)
            .map(|b| &b.property)
    }

    fn accepts_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| &**p == property)
            || self.attributes.iter().any(|b| &*b.property == property)
    }
}

impl std::fmt::Debug for CustomElementDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomElementDescriptor")
            .field("tag_name", &self.tag_name)
            .field("widget", &self.widget_type.name())
            .field("attributes", &self.attributes)
            .field("properties", &self.properties)
            .field("events", &self.events)
            .field("init", &self.init.is_some())
            .finish()
    }
}

// =============================================================================
// Instance
// =============================================================================

/// Event emitted by a custom element's widget.
#[derive(Clone, Debug)]
pub struct EmittedEvent {
    pub name: Rc<str>,
    pub detail: PropValue,
}

/// One live custom element.
pub struct CustomElement<S: Surface> {
    descriptor: CustomElementDescriptor,
    projector: Projector<S>,
    properties: Properties,
    events: SubscriptionPool<EmittedEvent>,
    host: Option<NodeId>,
}

impl<S: Surface> CustomElement<S> {
    pub fn new(descriptor: CustomElementDescriptor, surface: S, options: ProjectorOptions) -> Self {
        let projector = Projector::new(surface, descriptor.widget_type.clone(), options);
        let events = SubscriptionPool::new();

        let mut properties = Properties::new();
        if let Some(init) = &descriptor.init {
            init(&mut properties);
        }
        // Created once so re-renders see the same callbacks
        for binding in &descriptor.events {
            let pool = events.clone();
            let name = binding.event.clone();
            properties.set(
                &binding.property,
                PropValue::callback(move |detail| {
                    pool.next(EmittedEvent {
                        name: name.clone(),
                        detail: detail.clone(),
                    })
                }),
            );
        }

        Self {
            descriptor,
            projector,
            properties,
            events,
            host: None,
        }
    }

    pub fn descriptor(&self) -> &CustomElementDescriptor {
        &self.descriptor
    }

    /// Render into `host`.
    pub fn connect(&mut self, host: NodeId) -> Result<(), WidgetError> {
        self.projector.set_properties(self.properties.clone())?;
        self.projector.append(host)?;
        self.host = Some(host);
        tracing::debug!(tag = %self.descriptor.tag_name, "custom element connected");
        Ok(())
    }

    /// Tear the widget tree down. Terminal.
    pub fn disconnect(&mut self) -> Result<(), WidgetError> {
        self.projector.destroy()?;
        self.host = None;
        tracing::debug!(tag = %self.descriptor.tag_name, "custom element disconnected");
        Ok(())
    }

    /// Feed an observed attribute change. `None` removes the attribute.
    ///
    /// Returns false for attributes the descriptor does not observe.
    pub fn attribute_changed(&mut self, attribute: &str, value: Option<&str>) -> Result<bool, WidgetError> {
        let Some(property) = self.descriptor.property_for_attribute(attribute).cloned() else {
            tracing::debug!(tag = %self.descriptor.tag_name, attribute, "ignoring unobserved attribute");
            return Ok(false);
        };
        match value {
            Some(value) => self.properties.set(&property, value),
            None => {
                self.properties.remove(&property);
            }
        }
        self.push()?;
        Ok(true)
    }

    /// Set a declared property. Returns false for undeclared names.
    pub fn set_property(&mut self, property: &str, value: impl Into<PropValue>) -> Result<bool, WidgetError> {
        if !self.descriptor.accepts_property(property) {
            tracing::debug!(tag = %self.descriptor.tag_name, property, "ignoring undeclared property");
            return Ok(false);
        }
        self.properties.set(property, value);
        self.push()?;
        Ok(true)
    }

    pub fn property(&self, property: &str) -> Option<&PropValue> {
        self.properties.get(property)
    }

    /// Host callback for emitted events. Events emitted before a callback
    /// attached are replayed into it.
    pub fn on_event(&self, sink: impl Fn(&EmittedEvent) + 'static) -> Subscription {
        self.events.add(sink)
    }

    /// Run scheduled ticks. Returns the number that rendered.
    pub fn update(&mut self) -> Result<usize, WidgetError> {
        self.projector.flush()
    }

    pub fn host(&self) -> Option<NodeId> {
        self.host
    }

    pub fn projector(&self) -> &Projector<S> {
        &self.projector
    }

    pub fn projector_mut(&mut self) -> &mut Projector<S> {
        &mut self.projector
    }

    fn push(&mut self) -> Result<(), WidgetError> {
        self.projector.set_properties(self.properties.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
