//! Results of reading through a [`View`].

use crate::cell::{Cell, DerivedCell};
use crate::error::{ReifyError, ReifyResult};
use crate::value::{Seed, Shallow, Value};
use crate::view::View;
use serde_json::Value as JsonValue;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// What a property read produced.
#[derive(Clone, Debug, Default)]
pub enum Access {
    /// Missing key, deleted key, array hole, or a derivation on a dropped store.
    #[default]
    Undefined,
    /// An unwrapped leaf or a derived value.
    Value(JsonValue),
    /// A shallow container, returned by identity.
    Shallow(Shallow),
    /// A nested tracked view.
    View(View),
    /// Escape-hatch access to the underlying cell.
    Raw(Raw),
    /// A sequence method bound to an array view.
    Method(BoundMethod),
}

impl Access {
    pub(crate) fn from_value(value: Value) -> Self {
        match value {
            Value::Undefined => Access::Undefined,
            Value::Json(v) => Access::Value(v),
            Value::Shallow(s) => Access::Shallow(s),
        }
    }

    /// Whether the read found nothing.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Access::Undefined)
    }

    /// Borrow the plain JSON value, if this is one.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Access::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The value as an `i64`, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(JsonValue::as_i64)
    }

    /// The value as a `u64`, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_json().and_then(JsonValue::as_u64)
    }

    /// The value as an `f64`, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(JsonValue::as_f64)
    }

    /// The value as a `bool`, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(JsonValue::as_bool)
    }

    /// The value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(JsonValue::as_str)
    }

    /// Borrow the nested view, if this is one.
    pub fn as_view(&self) -> Option<&View> {
        match self {
            Access::View(view) => Some(view),
            _ => None,
        }
    }

    /// Take the nested view, if this is one.
    pub fn into_view(self) -> Option<View> {
        match self {
            Access::View(view) => Some(view),
            _ => None,
        }
    }

    /// Borrow the shallow handle, if this is one.
    pub fn as_shallow(&self) -> Option<&Shallow> {
        match self {
            Access::Shallow(handle) => Some(handle),
            _ => None,
        }
    }

    /// Borrow the escape-hatch handle, if this is one.
    pub fn as_raw(&self) -> Option<&Raw> {
        match self {
            Access::Raw(raw) => Some(raw),
            _ => None,
        }
    }

    /// Borrow the bound array method, if this is one.
    pub fn as_method(&self) -> Option<&BoundMethod> {
        match self {
            Access::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Plain JSON form; undefined values and methods become `null`.
    ///
    /// Unlike [`View::to_json`], a nested view is exported tracked: inside a
    /// derivation or effect the export depends on every leaf it read.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Access::Value(v) => v.clone(),
            Access::Shallow(s) => s.get(),
            Access::View(view) => view.export_tracked(),
            Access::Raw(raw) => raw.value().to_json(),
            Access::Undefined | Access::Method(_) => JsonValue::Null,
        }
    }

    /// String form used by `join`: strings unquoted, undefined and null empty.
    pub(crate) fn to_display_string(&self) -> String {
        match self.to_json() {
            JsonValue::Null => String::new(),
            JsonValue::String(s) => s,
            JsonValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    JsonValue::Null => String::new(),
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            other => other.to_string(),
        }
    }
}

impl PartialEq<JsonValue> for Access {
    fn eq(&self, other: &JsonValue) -> bool {
        match self {
            Access::Value(v) => v == other,
            Access::Shallow(s) => *s.borrow() == *other,
            Access::View(view) => view.export_tracked() == *other,
            _ => false,
        }
    }
}

/// The underlying storage behind a key, exposed through the escape hatch.
#[derive(Clone)]
pub enum Raw {
    /// A mutable cell.
    Cell(Rc<dyn Cell>),
    /// A materialized derived cell.
    Derived(Rc<dyn DerivedCell>),
    /// A nested view (containers have no single cell).
    View(View),
}

impl Raw {
    /// Read through the raw handle. Tracked like a normal read.
    pub fn value(&self) -> Access {
        match self {
            Raw::Cell(cell) => Access::from_value(cell.get()),
            Raw::Derived(derived) => Access::Value(derived.get()),
            Raw::View(view) => Access::View(view.clone()),
        }
    }

    /// The mutable cell, if the key holds one.
    pub fn as_cell(&self) -> Option<&Rc<dyn Cell>> {
        match self {
            Raw::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    /// The derived cell, if the key holds a derivation.
    pub fn as_derived(&self) -> Option<&Rc<dyn DerivedCell>> {
        match self {
            Raw::Derived(derived) => Some(derived),
            _ => None,
        }
    }

    /// The nested view, if the key holds a container.
    pub fn as_view(&self) -> Option<&View> {
        match self {
            Raw::View(view) => Some(view),
            _ => None,
        }
    }

    /// Whether both handles refer to the same storage.
    pub fn ptr_eq(&self, other: &Raw) -> bool {
        match (self, other) {
            (Raw::Cell(a), Raw::Cell(b)) => Rc::ptr_eq(a, b),
            (Raw::Derived(a), Raw::Derived(b)) => Rc::ptr_eq(a, b),
            (Raw::View(a), Raw::View(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Raw::Cell(cell) => f.debug_tuple("Cell").field(&cell.get()).finish(),
            Raw::Derived(_) => f.write_str("Derived(..)"),
            Raw::View(view) => f.debug_tuple("View").field(view).finish(),
        }
    }
}

/// Sequence methods reachable through [`View::get`] on array views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayMethod {
    /// Append elements; returns the new length.
    Push,
    /// Remove the last element.
    Pop,
    /// Remove the first element.
    Shift,
    /// Prepend elements; returns the new length.
    Unshift,
    /// Remove and insert at a position; returns the removed elements.
    Splice,
    /// Reverse in place; returns the view.
    Reverse,
    /// Position of a value, or `-1`.
    IndexOf,
    /// Whether a value is present.
    Includes,
    /// Join string forms with a separator (default `,`).
    Join,
    /// Copy a range of elements.
    Slice,
}

impl ArrayMethod {
    /// Name as seen through `View::get`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrayMethod::Push => "push",
            ArrayMethod::Pop => "pop",
            ArrayMethod::Shift => "shift",
            ArrayMethod::Unshift => "unshift",
            ArrayMethod::Splice => "splice",
            ArrayMethod::Reverse => "reverse",
            ArrayMethod::IndexOf => "indexOf",
            ArrayMethod::Includes => "includes",
            ArrayMethod::Join => "join",
            ArrayMethod::Slice => "slice",
        }
    }
}

impl fmt::Display for ArrayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArrayMethod {
    type Err = ReifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "push" => ArrayMethod::Push,
            "pop" => ArrayMethod::Pop,
            "shift" => ArrayMethod::Shift,
            "unshift" => ArrayMethod::Unshift,
            "splice" => ArrayMethod::Splice,
            "reverse" => ArrayMethod::Reverse,
            "indexOf" => ArrayMethod::IndexOf,
            "includes" => ArrayMethod::Includes,
            "join" => ArrayMethod::Join,
            "slice" => ArrayMethod::Slice,
            other => {
                return Err(ReifyError::InvalidKey {
                    key: other.to_string(),
                    reason: "not an array method".to_string(),
                });
            }
        })
    }
}

/// An array method bound to its view, callable with dynamic arguments.
#[derive(Clone, Debug)]
pub struct BoundMethod {
    view: View,
    method: ArrayMethod,
}

impl BoundMethod {
    pub(crate) fn new(view: View, method: ArrayMethod) -> Self {
        Self { view, method }
    }

    /// Which method is bound.
    pub fn method(&self) -> ArrayMethod {
        self.method
    }

    /// Invoke the method. Results are returned as plain values: removed
    /// elements and slices come back as JSON arrays, lengths and indices as
    /// numbers (`-1` when `indexOf` finds nothing).
    pub fn call(&self, args: Vec<Seed>) -> ReifyResult<Access> {
        let view = &self.view;
        let mut args = args.into_iter();
        let result = match self.method {
            ArrayMethod::Push => {
                let end = view.len();
                view.splice(end, 0, args.collect())?;
                JsonValue::from(view.len())
            }
            ArrayMethod::Unshift => {
                let items: Vec<Seed> = args.collect();
                view.splice(0, 0, items)?;
                JsonValue::from(view.len())
            }
            ArrayMethod::Pop => return view.pop(),
            ArrayMethod::Shift => return view.shift(),
            ArrayMethod::Splice => {
                let len = view.len();
                let start = self.index_arg(args.next(), 0, len)?;
                let count = match args.next() {
                    Some(seed) => self.count_arg(seed)?,
                    None => len.saturating_sub(start),
                };
                let removed = view.splice(start, count, args.collect())?;
                JsonValue::Array(removed.iter().map(Access::to_json).collect())
            }
            ArrayMethod::Reverse => {
                view.reverse()?;
                return Ok(Access::View(view.clone()));
            }
            ArrayMethod::IndexOf => {
                let needle = self.needle(args.next())?;
                view.index_of(&needle)
                    .map_or(JsonValue::from(-1), JsonValue::from)
            }
            ArrayMethod::Includes => {
                let needle = self.needle(args.next())?;
                JsonValue::Bool(view.includes(&needle))
            }
            ArrayMethod::Join => {
                let separator = match args.next() {
                    Some(Seed::Leaf(JsonValue::String(s))) => s,
                    Some(other) => return Err(self.invalid(format!(
                        "separator must be a string, got {}",
                        other.kind()
                    ))),
                    None => ",".to_string(),
                };
                JsonValue::String(view.join(&separator))
            }
            ArrayMethod::Slice => {
                let len = view.len();
                let start = self.index_arg(args.next(), 0, len)?;
                let end = self.index_arg(args.next(), len, len)?;
                JsonValue::Array(view.slice(start, Some(end)).iter().map(Access::to_json).collect())
            }
        };
        Ok(Access::Value(result))
    }

    /// Resolve a possibly negative index argument against `len`.
    fn index_arg(&self, seed: Option<Seed>, default: usize, len: usize) -> ReifyResult<usize> {
        let Some(seed) = seed else {
            return Ok(default);
        };
        let n = match &seed {
            Seed::Leaf(JsonValue::Number(n)) => n.as_i64(),
            _ => None,
        }
        .ok_or_else(|| self.invalid(format!("expected an integer index, got {}", seed.kind())))?;
        Ok(if n < 0 {
            len.saturating_sub(n.unsigned_abs() as usize)
        } else {
            (n as usize).min(len)
        })
    }

    fn count_arg(&self, seed: Seed) -> ReifyResult<usize> {
        match &seed {
            Seed::Leaf(JsonValue::Number(n)) => Ok(n.as_i64().map_or(0, |n| n.max(0) as usize)),
            _ => Err(self.invalid(format!("expected a count, got {}", seed.kind()))),
        }
    }

    fn needle(&self, seed: Option<Seed>) -> ReifyResult<JsonValue> {
        match seed {
            Some(seed) => seed.into_json(self.method.as_str()),
            None => Ok(JsonValue::Null),
        }
    }

    fn invalid(&self, reason: String) -> ReifyError {
        ReifyError::InvalidArgument {
            method: self.method.as_str().to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::shallow;
    use serde_json::json;

    #[test]
    fn test_access_json_accessors() {
        let access = Access::Value(json!(3));
        assert_eq!(access.as_i64(), Some(3));
        assert_eq!(access.as_u64(), Some(3));
        assert_eq!(access.as_str(), None);
        assert!(Access::default().is_undefined());
        assert_eq!(Access::Value(json!("x")).as_str(), Some("x"));
    }

    #[test]
    fn test_access_eq_json() {
        assert_eq!(Access::Value(json!([1, 2])), json!([1, 2]));
        assert_eq!(Access::Shallow(shallow(json!({"a": 1}))), json!({"a": 1}));
        assert_ne!(Access::Undefined, json!(null));
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Access::Value(json!("hi")).to_display_string(), "hi");
        assert_eq!(Access::Value(json!(1.5)).to_display_string(), "1.5");
        assert_eq!(Access::Undefined.to_display_string(), "");
        assert_eq!(Access::Value(json!([1, "a"])).to_display_string(), "1,a");
    }

    #[test]
    fn test_array_method_names() {
        for name in ["push", "pop", "shift", "unshift", "splice", "reverse", "indexOf", "includes", "join", "slice"] {
            let method: ArrayMethod = name.parse().unwrap();
            assert_eq!(method.as_str(), name);
        }
        assert!("map".parse::<ArrayMethod>().is_err());
    }
}
