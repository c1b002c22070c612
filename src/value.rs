//! Values, seeds and derivations.
//!
//! A [`Seed`] is the caller's plain data after a single classification pass:
//! every node is tagged as a leaf, an object, an array, a derivation or a
//! shallow (opaque) container. The deep wrapper consumes seeds; it never has
//! to re-inspect runtime shapes afterwards.
//!
//! A [`Value`] is what a storage cell holds. Cells never hold nested views or
//! functions, only JSON, shallow handles, or `Undefined` after a delete.

use crate::error::{ReifyError, ReifyResult};
use crate::view::View;
use serde_json::{Map, Value as JsonValue};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Signature of a derivation: `(view, root_view) -> value`.
pub type DeriveFn = dyn Fn(&View, &View) -> JsonValue;

/// A user-supplied derivation.
///
/// Derivations are compared by identity: two `Derivation`s are the same only
/// if they share the same underlying closure allocation.
#[derive(Clone)]
pub struct Derivation(Rc<DeriveFn>);

impl Derivation {
    /// Wrap a closure as a derivation.
    pub fn new(f: impl Fn(&View, &View) -> JsonValue + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Whether both handles refer to the same closure.
    pub fn same(&self, other: &Derivation) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn call(&self, view: &View, root: &View) -> JsonValue {
        (self.0)(view, root)
    }
}

impl fmt::Debug for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Derivation({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// An opaque container excluded from deep tracking.
///
/// The wrapper stores a `Shallow` in a single cell and hands the same handle
/// back on every read. Mutating its contents through [`Shallow::borrow_mut`]
/// does not notify anything; replacing the whole handle through a write does.
#[derive(Clone)]
pub struct Shallow(Rc<RefCell<JsonValue>>);

impl Shallow {
    /// Mark a JSON value as shallow.
    pub fn new(value: JsonValue) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Clone out the current contents.
    pub fn get(&self) -> JsonValue {
        self.0.borrow().clone()
    }

    /// Borrow the contents.
    pub fn borrow(&self) -> Ref<'_, JsonValue> {
        self.0.borrow()
    }

    /// Mutably borrow the contents. Changes made here are invisible to
    /// derivations and effects.
    pub fn borrow_mut(&self) -> RefMut<'_, JsonValue> {
        self.0.borrow_mut()
    }

    /// Whether both handles refer to the same container.
    pub fn ptr_eq(&self, other: &Shallow) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Shallow {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Shallow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shallow").field(&*self.0.borrow()).finish()
    }
}

/// Mark a JSON value as shallow.
pub fn shallow(value: JsonValue) -> Shallow {
    Shallow::new(value)
}

/// The contents of a storage cell.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// No value: the key was deleted, or an array slot is a hole.
    #[default]
    Undefined,
    /// A plain JSON value.
    Json(JsonValue),
    /// An opaque container, compared by identity.
    Shallow(Shallow),
}

impl Value {
    /// Whether this is [`Value::Undefined`].
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The JSON form of this value, `None` for `Undefined`.
    pub fn to_json(&self) -> Option<JsonValue> {
        match self {
            Value::Undefined => None,
            Value::Json(v) => Some(v.clone()),
            Value::Shallow(s) => Some(s.get()),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::Json(value)
    }
}

impl From<Shallow> for Value {
    fn from(value: Shallow) -> Self {
        Value::Shallow(value)
    }
}

/// Caller-supplied data, classified once.
#[derive(Clone, Debug)]
pub enum Seed {
    /// A non-container JSON value (null, bool, number, string).
    Leaf(JsonValue),
    /// An ordered object.
    Object(Vec<(String, Seed)>),
    /// An array.
    Array(Vec<Seed>),
    /// A derivation, materialized lazily on first read.
    Derive(Derivation),
    /// An opaque container.
    Shallow(Shallow),
}

impl Seed {
    /// A derivation seed.
    pub fn derive(f: impl Fn(&View, &View) -> JsonValue + 'static) -> Self {
        Seed::Derive(Derivation::new(f))
    }

    /// An object seed from key/seed pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Seed)>,
    {
        Seed::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// An array seed.
    pub fn array(items: impl IntoIterator<Item = Seed>) -> Self {
        Seed::Array(items.into_iter().collect())
    }

    /// Whether this seed becomes a nested view when wrapped.
    pub fn is_container(&self) -> bool {
        matches!(self, Seed::Object(_) | Seed::Array(_))
    }

    /// Short name of the seed's shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Seed::Leaf(JsonValue::Null) => "null",
            Seed::Leaf(JsonValue::Bool(_)) => "boolean",
            Seed::Leaf(JsonValue::Number(_)) => "number",
            Seed::Leaf(_) => "string",
            Seed::Object(_) => "object",
            Seed::Array(_) => "array",
            Seed::Derive(_) => "function",
            Seed::Shallow(_) => "shallow container",
        }
    }

    /// Flatten the seed into plain JSON. Derivations anywhere inside are
    /// rejected, since plain JSON cannot carry them.
    pub fn into_json(self, key: &str) -> ReifyResult<JsonValue> {
        match self {
            Seed::Leaf(v) => Ok(v),
            Seed::Shallow(s) => Ok(s.get()),
            Seed::Derive(_) => Err(ReifyError::FunctionValueDenied {
                key: key.to_string(),
            }),
            Seed::Array(items) => items
                .into_iter()
                .map(|item| item.into_json(key))
                .collect::<ReifyResult<Vec<_>>>()
                .map(JsonValue::Array),
            Seed::Object(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    let child = v.into_json(&k)?;
                    map.insert(k, child);
                }
                Ok(JsonValue::Object(map))
            }
        }
    }
}

impl From<JsonValue> for Seed {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => {
                Seed::Object(map.into_iter().map(|(k, v)| (k, Seed::from(v))).collect())
            }
            JsonValue::Array(items) => Seed::Array(items.into_iter().map(Seed::from).collect()),
            leaf => Seed::Leaf(leaf),
        }
    }
}

impl From<Shallow> for Seed {
    fn from(value: Shallow) -> Self {
        Seed::Shallow(value)
    }
}

impl From<Derivation> for Seed {
    fn from(value: Derivation) -> Self {
        Seed::Derive(value)
    }
}

impl From<Value> for Seed {
    fn from(value: Value) -> Self {
        match value {
            Value::Undefined => Seed::Leaf(JsonValue::Null),
            Value::Json(v) => Seed::from(v),
            Value::Shallow(s) => Seed::Shallow(s),
        }
    }
}

macro_rules! seed_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Seed {
                fn from(value: $ty) -> Self {
                    Seed::from(JsonValue::from(value))
                }
            }
        )*
    };
}

seed_from_scalar!(bool, i32, i64, u32, u64, usize, f64, String, &str);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_classification() {
        let seed = Seed::from(json!({"count": 0, "todos": [{"done": false}], "name": "x"}));
        let Seed::Object(entries) = seed else {
            panic!("expected object seed");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, "count");
        assert!(matches!(entries[0].1, Seed::Leaf(_)));
        assert!(matches!(entries[1].1, Seed::Array(_)));
        assert!(matches!(entries[2].1, Seed::Leaf(JsonValue::String(_))));
    }

    #[test]
    fn test_into_json_rejects_nested_derivations() {
        let seed = Seed::object([
            ("a", Seed::from(1)),
            ("b", Seed::derive(|_, _| json!(2))),
        ]);
        let err = seed.into_json("outer").unwrap_err();
        assert!(matches!(err, ReifyError::FunctionValueDenied { key } if key == "b"));
    }

    #[test]
    fn test_shallow_identity() {
        let a = shallow(json!({"x": 1}));
        let b = a.clone();
        let c = shallow(json!({"x": 1}));
        assert_eq!(Value::Shallow(a.clone()), Value::Shallow(b));
        assert_ne!(Value::Shallow(a), Value::Shallow(c));
    }

    #[test]
    fn test_derivation_identity() {
        let d = Derivation::new(|_, _| json!(null));
        let e = d.clone();
        let f = Derivation::new(|_, _| json!(null));
        assert!(d.same(&e));
        assert!(!d.same(&f));
    }

    #[test]
    fn test_seed_kinds() {
        assert_eq!(Seed::from(json!(null)).kind(), "null");
        assert_eq!(Seed::from(3).kind(), "number");
        assert_eq!(Seed::from("hi").kind(), "string");
        assert_eq!(Seed::from(json!([])).kind(), "array");
        assert_eq!(Seed::from(shallow(json!({}))).kind(), "shallow container");
    }
}
