//! RenderContext - What a widget can see while rendering.

use std::cell::RefCell;
use std::rc::Rc;

use super::base::WidgetBase;
use super::{WidgetHandle, WidgetId};
use crate::error::WidgetError;
use crate::meta::{ListenRequest, MetaProvider, MetaQuery, MetaRegistry, MetaScope};
use crate::surface::Surface;
use crate::types::{Capabilities, Key, Properties};
use crate::vnode::VNode;

/// Read-only view handed to [`Widget::render`](super::Widget::render).
pub struct RenderContext<'a> {
    base: &'a WidgetBase,
    handle: WidgetHandle,
    meta: &'a MetaRegistry,
    surface: &'a dyn Surface,
    requests: RefCell<Vec<ListenRequest>>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(base: &'a WidgetBase, meta: &'a MetaRegistry, surface: &'a dyn Surface) -> Self {
        Self {
            base,
            handle: base.handle(),
            meta,
            surface,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn id(&self) -> WidgetId {
        self.base.id()
    }

    pub fn key(&self) -> Option<&Key> {
        self.base.key()
    }

    pub fn properties(&self) -> &Properties {
        self.base.properties()
    }

    /// Children handed over by the parent's widget node.
    pub fn children(&self) -> &[VNode] {
        self.base.children()
    }

    /// Properties that changed since this widget last rendered.
    pub fn changed_property_keys(&self) -> &[Rc<str>] {
        self.base.changed_property_keys()
    }

    /// Handle for event handlers that need to invalidate later.
    pub fn handle(&self) -> &WidgetHandle {
        &self.handle
    }

    /// Bind a meta provider kind to this widget.
    pub fn meta<M: MetaProvider>(&self) -> Result<MetaQuery<'_, M>, WidgetError> {
        let Some((provider, events)) = self.meta.lookup::<M>() else {
            return Err(WidgetError::UnresolvedMetaProvider {
                kind: std::any::type_name::<M>(),
            });
        };
        if !self
            .base
            .widget_type()
            .capabilities()
            .contains(Capabilities::READS_META)
        {
            tracing::debug!(widget = %self.base.name(), "meta read by a type without READS_META");
        }
        Ok(MetaQuery::new(
            provider,
            events,
            MetaScope {
                cache: &self.base.meta,
                node_keys: &self.base.node_keys,
                surface: self.surface,
                requests: &self.requests,
                widget: &self.handle,
            },
        ))
    }

    pub(crate) fn into_requests(self) -> Vec<ListenRequest> {
        self.requests.into_inner()
    }
}
