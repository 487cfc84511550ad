//! Error types.
//!
//! [`WidgetError`] is what the engine reports: returned from fallible
//! operations and pushed into a projector's error channel for conditions that
//! do not stop rendering. [`SurfaceError`] is what a [`Surface`] returns when
//! it refuses a mutation.
//!
//! [`Surface`]: crate::surface::Surface

use thiserror::Error;

use crate::types::Key;

/// Lifecycle state named in [`WidgetError::InvalidLifecycleState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Clean,
    Dirty,
    Destroyed,
    Attached,
    Detached,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Clean => "clean",
            LifecycleState::Dirty => "dirty",
            LifecycleState::Destroyed => "destroyed",
            LifecycleState::Attached => "attached",
            LifecycleState::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// Errors raised by a real surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SurfaceError {
    #[error("surface node {0} does not exist")]
    UnknownNode(usize),
    #[error("surface rejected `{name}`: {reason}")]
    Rejected { name: String, reason: String },
    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: usize, child: usize },
    #[error("surface is detached")]
    Detached,
}

/// Errors and reported conditions of the widget engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WidgetError {
    /// Operation on a destroyed widget or a detached projector.
    #[error("cannot {operation}: instance is {state}")]
    InvalidLifecycleState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// Two siblings carried the same key in one render.
    #[error("duplicate key `{key}` among siblings; later node treated as unkeyed")]
    DuplicateKey { key: Key },

    /// A meta provider kind was queried but never registered.
    #[error("meta provider `{kind}` is not registered")]
    UnresolvedMetaProvider { kind: &'static str },

    /// A widget node referenced a registry label nobody registered.
    #[error("no widget registered under `{label}`")]
    UnresolvedWidget { label: String },

    /// A widget's render failed.
    #[error("render of `{widget}` failed: {message}")]
    Render { widget: String, message: String },

    /// The surface rejected a patch operation.
    #[error("patch `{operation}` failed: {source}")]
    Patch {
        operation: &'static str,
        #[source]
        source: SurfaceError,
    },
}

impl WidgetError {
    /// Convenience constructor for render failures raised by widget code.
    pub fn render(widget: impl Into<String>, message: impl Into<String>) -> Self {
        WidgetError::Render {
            widget: widget.into(),
            message: message.into(),
        }
    }

    pub(crate) fn lifecycle(operation: &'static str, state: LifecycleState) -> Self {
        WidgetError::InvalidLifecycleState { operation, state }
    }

    pub(crate) fn patch(operation: &'static str, source: SurfaceError) -> Self {
        WidgetError::Patch { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = WidgetError::lifecycle("invalidate", LifecycleState::Destroyed);
        assert_eq!(err.to_string(), "cannot invalidate: instance is destroyed");

        let err = WidgetError::DuplicateKey { key: Key::from("a") };
        assert!(err.to_string().contains("`a`"));

        let err = WidgetError::patch(
            "set_attribute",
            SurfaceError::Rejected {
                name: "bad".into(),
                reason: "read-only".into(),
            },
        );
        assert!(err.to_string().contains("read-only"));
    }
}
