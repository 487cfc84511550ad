//! Construction helpers for [`VNode`] trees.
//!
//! Building never touches a surface, so these can be called from anywhere,
//! any number of times.

use std::rc::Rc;

use super::{ElementNode, EventHandler, VNode, WidgetNode, WidgetRef, TEXT_TAG};
use crate::surface::SurfaceEvent;
use crate::types::{AttrValue, Key, Properties};
use crate::widget::WidgetType;

// =============================================================================
// Elements
// =============================================================================

/// Start describing an element with the given tag.
pub fn v(tag: &str) -> ElementBuilder {
    ElementBuilder {
        tag: Rc::from(tag),
        key: None,
        attributes: Vec::new(),
        events: Vec::new(),
        text: None,
        children: Vec::new(),
    }
}

/// A text node.
pub fn text(content: impl Into<Rc<str>>) -> VNode {
    let mut builder = v(TEXT_TAG);
    builder.text = Some(content.into());
    builder.build()
}

/// Builder returned by [`v`].
#[must_use]
pub struct ElementBuilder {
    tag: Rc<str>,
    key: Option<Key>,
    attributes: Vec<(Rc<str>, AttrValue)>,
    events: Vec<(Rc<str>, EventHandler)>,
    text: Option<Rc<str>>,
    children: Vec<VNode>,
}

impl ElementBuilder {
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set an attribute. Setting the same name twice keeps the last value in
    /// the first position.
    pub fn attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| &**n == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((Rc::from(name), value)),
        }
        self
    }

    /// Attach an event handler.
    pub fn on(mut self, event: &str, handler: impl Fn(&SurfaceEvent) + 'static) -> Self {
        let handler: EventHandler = Rc::new(handler);
        match self.events.iter_mut().find(|(n, _)| &**n == event) {
            Some(entry) => entry.1 = handler,
            None => self.events.push((Rc::from(event), handler)),
        }
        self
    }

    /// Text content rendered as the element's first child.
    pub fn text(mut self, content: impl Into<Rc<str>>) -> Self {
        self.text = Some(content.into());
        self
    }

    pub fn child(mut self, child: impl Into<VNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, C>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<VNode>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> VNode {
        VNode::Element(Rc::new(ElementNode {
            tag: self.tag,
            key: self.key,
            attributes: self.attributes,
            events: self.events,
            text: self.text,
            children: self.children,
        }))
    }
}

impl From<ElementBuilder> for VNode {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

// =============================================================================
// Widgets
// =============================================================================

/// Describe a widget of a concrete type.
pub fn w(widget: &WidgetType, properties: Properties) -> WidgetBuilder {
    WidgetBuilder {
        widget: WidgetRef::Type(widget.clone()),
        key: None,
        properties,
        children: Vec::new(),
    }
}

/// Describe a widget by registry label, resolved when the tree is rendered.
pub fn w_label(label: &str, properties: Properties) -> WidgetBuilder {
    WidgetBuilder {
        widget: WidgetRef::Label(Rc::from(label)),
        key: None,
        properties,
        children: Vec::new(),
    }
}

/// Builder returned by [`w`] and [`w_label`].
#[must_use]
pub struct WidgetBuilder {
    widget: WidgetRef,
    key: Option<Key>,
    properties: Properties,
    children: Vec<VNode>,
}

impl WidgetBuilder {
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn child(mut self, child: impl Into<VNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, C>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<VNode>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> VNode {
        VNode::Widget(Rc::new(WidgetNode {
            widget: self.widget,
            key: self.key,
            properties: self.properties,
            children: self.children,
        }))
    }
}

impl From<WidgetBuilder> for VNode {
    fn from(builder: WidgetBuilder) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_overwrite_keeps_order() {
        let node = v("div").attr("a", 1).attr("b", 2).attr("a", 3).build();
        let element = node.as_element().unwrap();
        let attrs: Vec<(&str, &AttrValue)> = element.attributes().collect();
        assert_eq!(attrs, vec![("a", &AttrValue::Int(3)), ("b", &AttrValue::Int(2))]);
    }

    #[test]
    fn test_children_accept_builders_and_nodes() {
        let node = v("ul")
            .child(v("li").key(1))
            .children((2..4).map(|i| v("li").key(i)))
            .child(text("tail"))
            .build();
        assert_eq!(node.children().len(), 4);
        assert_eq!(node.children()[2].key(), Some(&Key::Int(3)));
    }

    #[test]
    fn test_label_widget_node() {
        let node = w_label("row", Properties::new().with("n", 1)).key("r").build();
        let widget = node.as_widget().unwrap();
        assert_eq!(widget.widget().name(), "row");
        assert_eq!(widget.properties().get_int("n"), Some(1));
    }
}
