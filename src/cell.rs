//! Cell factory: the three primitives every wrapped view is built from.
//!
//! A [`CellFactory`] hands out mutable cells, lazily evaluated derived cells,
//! and a way to read without registering dependencies. The static factory in
//! this module is a plain box with no tracking; the reactive one lives in
//! [`crate::reactive`]. Hosts with their own reactive library implement the
//! trait themselves and pass it to [`crate::reify_with`].

use crate::config::Mode;
use crate::value::Value;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// A single mutable storage slot.
pub trait Cell {
    /// Read the value, registering a dependency if the backend tracks reads.
    fn get(&self) -> Value;

    /// Replace the value.
    fn set(&self, value: Value);

    /// Access the concrete backend type, e.g. to subscribe through a host
    /// framework.
    fn as_any(&self) -> &dyn Any;
}

/// A lazily evaluated value computed from other cells.
pub trait DerivedCell {
    /// Read the derived value, computing it if needed.
    fn get(&self) -> JsonValue;

    /// Access the concrete backend type.
    fn as_any(&self) -> &dyn Any;
}

/// Source of cells for one store.
pub trait CellFactory {
    /// Which execution mode this factory implements.
    fn mode(&self) -> Mode;

    /// Create a mutable cell holding `value`.
    fn make_cell(&self, value: Value) -> Rc<dyn Cell>;

    /// Create a derived cell. `f` must not be called before the first read.
    fn make_derived(&self, f: Box<dyn Fn() -> JsonValue>) -> Rc<dyn DerivedCell>;

    /// Run `f` without registering dependencies. Implementations must call
    /// `f` exactly once before returning.
    fn read_untracked(&self, f: &mut dyn FnMut());

    /// Run `f` as one notification pass, if the backend can batch. The
    /// default runs `f` directly. Implementations must call `f` exactly once.
    fn batch(&self, f: &mut dyn FnMut()) {
        f()
    }

    /// Access the concrete factory type.
    fn as_any(&self) -> &dyn Any;
}

/// Run `f` through [`CellFactory::read_untracked`] and return its result.
pub fn untracked<T>(factory: &dyn CellFactory, f: impl FnOnce() -> T) -> T {
    let mut f = Some(f);
    let mut out = None;
    factory.read_untracked(&mut || {
        if let Some(f) = f.take() {
            out = Some(f());
        }
    });
    match out {
        Some(value) => value,
        None => unreachable!("CellFactory::read_untracked did not invoke its callback"),
    }
}

/// Run `f` through [`CellFactory::batch`] and return its result.
pub fn batch<T>(factory: &dyn CellFactory, f: impl FnOnce() -> T) -> T {
    let mut f = Some(f);
    let mut out = None;
    factory.batch(&mut || {
        if let Some(f) = f.take() {
            out = Some(f());
        }
    });
    match out {
        Some(value) => value,
        None => unreachable!("CellFactory::batch did not invoke its callback"),
    }
}

/// Static cell: a box with no dependency tracking.
#[derive(Debug, Default)]
pub struct StaticCell {
    value: RefCell<Value>,
}

impl StaticCell {
    /// Create a cell holding `value`.
    pub fn new(value: Value) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }
}

impl Cell for StaticCell {
    fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    fn set(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Static derived cell: re-runs its function on every read.
pub struct StaticDerived {
    f: Box<dyn Fn() -> JsonValue>,
}

impl DerivedCell for StaticDerived {
    fn get(&self) -> JsonValue {
        (self.f)()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for single-pass rendering: always fresh, never cached.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticCells;

impl CellFactory for StaticCells {
    fn mode(&self) -> Mode {
        Mode::Static
    }

    fn make_cell(&self, value: Value) -> Rc<dyn Cell> {
        Rc::new(StaticCell::new(value))
    }

    fn make_derived(&self, f: Box<dyn Fn() -> JsonValue>) -> Rc<dyn DerivedCell> {
        Rc::new(StaticDerived { f })
    }

    fn read_untracked(&self, f: &mut dyn FnMut()) {
        f()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell as CountCell;

    #[test]
    fn test_static_cell_round_trip() {
        let cells = StaticCells;
        let cell = cells.make_cell(Value::Json(json!(1)));
        assert_eq!(cell.get(), Value::Json(json!(1)));
        cell.set(Value::Json(json!("two")));
        assert_eq!(cell.get(), Value::Json(json!("two")));
    }

    #[test]
    fn test_static_derived_is_never_cached() {
        let calls = Rc::new(CountCell::new(0));
        let counter = Rc::clone(&calls);
        let derived = StaticCells.make_derived(Box::new(move || {
            counter.set(counter.get() + 1);
            json!(42)
        }));
        assert_eq!(calls.get(), 0);
        assert_eq!(derived.get(), json!(42));
        assert_eq!(derived.get(), json!(42));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_untracked_returns_value() {
        assert_eq!(untracked(&StaticCells, || 7), 7);
    }

    #[test]
    fn test_downcast_backend() {
        let cell = StaticCells.make_cell(Value::Undefined);
        assert!(cell.as_any().downcast_ref::<StaticCell>().is_some());
    }
}
