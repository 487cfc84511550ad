//! Core types shared by every layer of the framework.
//!
//! - [`Key`] - Sibling-unique identity for nodes and widgets
//! - [`AttrValue`] - Values carried by element attributes
//! - [`PropValue`] / [`Properties`] - Shallow property bags handed to widgets
//! - [`Capabilities`] - What a widget type declares it supports
//! - [`DiffMode`] - Per-property comparison strategy

use std::any::Any;
use std::fmt;
use std::rc::Rc;

// =============================================================================
// Key
// =============================================================================

/// Stable identity of a node among its siblings.
///
/// Keys only need to be unique among siblings. Strings and integers are both
/// accepted so list items can be keyed by whatever id the data carries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Rc<str>),
    Int(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(Rc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for Key {
    fn from(value: Rc<str>) -> Self {
        Key::Str(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(i64::from(value))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Int(i64::from(value))
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Key::Int(value as i64)
    }
}

// =============================================================================
// Attribute values
// =============================================================================

/// Value of an element attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttrValue {
    /// Numeric view of the value, parsing strings like `"12"` or `"12px"`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            AttrValue::Int(n) => Some(*n as f32),
            AttrValue::Float(f) => Some(*f as f32),
            AttrValue::Bool(_) => None,
            AttrValue::Str(s) => s.trim().trim_end_matches("px").trim().parse().ok(),
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Int(n) => write!(f, "{n}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(Rc::from(value))
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(Rc::from(value))
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

// =============================================================================
// Prop Value - shallow property values
// =============================================================================

/// Callback carried in a property bag.
pub type PropCallback = Rc<dyn Fn(&PropValue)>;

/// A single widget property.
///
/// Primitive variants compare by value. `Any` and `Callback` compare by `Rc`
/// identity only: the engine never looks inside them, so callers that want a
/// property to count as unchanged must hand over the same `Rc`.
#[derive(Clone)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Any(Rc<dyn Any>),
    Callback(PropCallback),
}

impl PropValue {
    /// Wrap an arbitrary value as an opaque reference.
    pub fn any<T: Any>(value: T) -> Self {
        PropValue::Any(Rc::new(value))
    }

    /// Wrap a closure as a callback property.
    pub fn callback(f: impl Fn(&PropValue) + 'static) -> Self {
        PropValue::Callback(Rc::new(f))
    }

    /// Shallow equality: by value for primitives, by reference otherwise.
    pub fn shallow_eq(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Any(a), PropValue::Any(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            (PropValue::Callback(a), PropValue::Callback(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Bool(b) => write!(f, "Bool({b})"),
            PropValue::Int(n) => write!(f, "Int({n})"),
            PropValue::Float(v) => write!(f, "Float({v})"),
            PropValue::Str(s) => write!(f, "Str({s:?})"),
            PropValue::Any(a) => write!(f, "Any({:p})", Rc::as_ptr(a)),
            PropValue::Callback(c) => write!(f, "Callback({:p})", Rc::as_ptr(c)),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(i64::from(value))
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for PropValue {
    fn from(value: Rc<str>) -> Self {
        PropValue::Str(value)
    }
}

// =============================================================================
// Properties - ordered shallow map
// =============================================================================

/// Ordered property bag handed to a widget.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    entries: Vec<(Rc<str>, PropValue)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a property, keeping its original position.
    pub fn set(&mut self, name: &str, value: impl Into<PropValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| &**n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((Rc::from(name), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<PropValue> {
        let pos = self.entries.iter().position(|(n, _)| &**n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.entries.iter().find(|(n, _)| &**n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            PropValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            PropValue::Float(v) => Some(*v),
            PropValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Downcast an opaque `Any` property.
    pub fn get_any<T: Any>(&self, name: &str) -> Option<&T> {
        match self.get(name)? {
            PropValue::Any(a) => a.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn get_callback(&self, name: &str) -> Option<PropCallback> {
        match self.get(name)? {
            PropValue::Callback(c) => Some(c.clone()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.entries.iter().map(|(n, v)| (&**n, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names whose values differ between `self` (previous) and `next`.
    ///
    /// Added and removed names count as changed. `mode` decides per name how
    /// values are compared.
    pub fn changed_keys(&self, next: &Properties, mode: impl Fn(&str) -> DiffMode) -> Vec<Rc<str>> {
        let mut changed = Vec::new();

        for (name, value) in &next.entries {
            let differs = match mode(name) {
                DiffMode::Ignore => false,
                DiffMode::Always => true,
                DiffMode::Reference => match self.get(name) {
                    Some(prev) => !prev.shallow_eq(value),
                    None => true,
                },
            };
            if differs {
                changed.push(name.clone());
            }
        }

        for (name, _) in &self.entries {
            if !next.contains(name) && mode(name) != DiffMode::Ignore {
                changed.push(name.clone());
            }
        }

        changed
    }

    /// Shallow equality of two bags, ignoring order.
    pub fn shallow_eq(&self, other: &Properties) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(name, value)| other.get(name).is_some_and(|o| o.shallow_eq(value)))
    }
}

// =============================================================================
// Capabilities (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Capabilities a widget type declares.
    ///
    /// Replaces mixin stacks: the engine checks these flags instead of
    /// inspecting what the widget inherits from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u8 {
        const NONE = 0;
        /// Accepts children from its parent's `w()` call.
        const SUPPORTS_CHILDREN = 1 << 0;
        /// Subscribes to external state (signals, pools) that invalidates it.
        const OBSERVES_EXTERNAL_STATE = 1 << 1;
        /// Reads meta providers during render.
        const READS_META = 1 << 2;
    }
}

// =============================================================================
// Diff Mode
// =============================================================================

/// How a widget compares one property across renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// Shallow comparison (value for primitives, `Rc` identity otherwise).
    #[default]
    Reference,
    /// Never counts as changed.
    Ignore,
    /// Always counts as changed when present.
    Always,
}

// =============================================================================
// Tests
// =============================================================================
