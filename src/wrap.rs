//! Deep wrapper: turns a classified [`Seed`] into a tree of views and cells.
//!
//! Leaves become cells, containers become nested views, derivations become
//! pending slots that are only materialized on first read, and shallow
//! containers are stored whole in a single cell. Every array view gets its own
//! structural version cell.

use crate::cell::CellFactory;
use crate::error::{ReifyError, ReifyResult};
use crate::value::{Seed, Value};
use crate::view::{Body, DerivedSlot, Entry, Node, Slot, View};
use indexmap::IndexMap;
use serde_json::json;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::trace;

/// State shared by every view of one store.
pub(crate) struct Shared {
    pub(crate) factory: Rc<dyn CellFactory>,
    pub(crate) permissive: bool,
    root: RefCell<Weak<Node>>,
}

impl Shared {
    pub(crate) fn new(factory: Rc<dyn CellFactory>, permissive: bool) -> Rc<Self> {
        Rc::new(Self {
            factory,
            permissive,
            root: RefCell::new(Weak::new()),
        })
    }

    /// Weak handle to the root node. Derivation closures hold this rather
    /// than a strong reference, so the view/root cycle they form does not
    /// keep a dropped store alive.
    pub(crate) fn root_weak(&self) -> Weak<Node> {
        self.root.borrow().clone()
    }

    fn set_root(&self, root: &View) {
        *self.root.borrow_mut() = root.downgrade();
    }
}

/// Wrap the root of a store. The root must be an object or an array.
pub(crate) fn wrap_root(seed: Seed, shared: &Rc<Shared>) -> ReifyResult<View> {
    let root = match seed {
        Seed::Object(entries) => wrap_object(entries, shared),
        Seed::Array(items) => wrap_array(items, shared),
        other => {
            return Err(ReifyError::Construction {
                reason: format!(
                    "initial state must be an object or an array, got {}",
                    other.kind()
                ),
            });
        }
    };
    shared.set_root(&root);
    Ok(root)
}

/// Classify one seed into the slot its key will hold.
pub(crate) fn build_slot(seed: Seed, shared: &Rc<Shared>) -> Slot {
    match seed {
        Seed::Leaf(value) => Slot::Cell(shared.factory.make_cell(Value::Json(value))),
        Seed::Shallow(handle) => Slot::Cell(shared.factory.make_cell(Value::Shallow(handle))),
        Seed::Derive(func) => Slot::Derived(DerivedSlot::pending(func)),
        Seed::Object(entries) => Slot::View(wrap_object(entries, shared)),
        Seed::Array(items) => Slot::View(wrap_array(items, shared)),
    }
}

fn wrap_object(entries: Vec<(String, Seed)>, shared: &Rc<Shared>) -> View {
    let mut map = IndexMap::with_capacity(entries.len());
    for (key, seed) in entries {
        map.insert(key, Entry::new(build_slot(seed, shared)));
    }
    trace!(keys = map.len(), "wrapped object");
    View::from_node(Node {
        shared: Rc::clone(shared),
        body: Body::Object(RefCell::new(map)),
    })
}

fn wrap_array(items: Vec<Seed>, shared: &Rc<Shared>) -> View {
    let version = shared.factory.make_cell(Value::Json(json!(0)));
    let entries: Vec<Entry> = items
        .into_iter()
        .map(|seed| Entry::new(build_slot(seed, shared)))
        .collect();
    trace!(len = entries.len(), "wrapped array");
    View::from_node(Node {
        shared: Rc::clone(shared),
        body: Body::Array {
            items: RefCell::new(entries),
            version,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::StaticCells;
    use crate::value::{Seed, shallow};
    use serde_json::json;

    fn shared() -> Rc<Shared> {
        Shared::new(Rc::new(StaticCells), false)
    }

    #[test]
    fn test_root_must_be_container() {
        let shared = shared();
        for seed in [
            Seed::from(json!(1)),
            Seed::from(json!(null)),
            Seed::from(shallow(json!({}))),
            Seed::derive(|_, _| json!(0)),
        ] {
            let err = wrap_root(seed, &shared).unwrap_err();
            assert!(matches!(err, ReifyError::Construction { .. }));
        }
    }

    #[test]
    fn test_classification_per_slot() {
        let shared = shared();
        let seed = Seed::object([
            ("leaf", Seed::from(1)),
            ("nested", Seed::from(json!({"a": 1}))),
            ("list", Seed::from(json!([1, 2]))),
            ("opaque", Seed::from(shallow(json!({"b": 2})))),
            ("derived", Seed::derive(|_, _| json!(0))),
        ]);
        let root = wrap_root(seed, &shared).unwrap();
        assert!(matches!(root.slot("leaf"), Some(Slot::Cell(_))));
        assert!(matches!(root.slot("nested"), Some(Slot::View(_))));
        assert!(matches!(root.slot("list"), Some(Slot::View(ref v)) if v.is_array()));
        assert!(matches!(root.slot("opaque"), Some(Slot::Cell(_))));
        assert!(matches!(root.slot("derived"), Some(Slot::Derived(_))));
    }

    #[test]
    fn test_root_handle_is_registered() {
        let shared = shared();
        let root = wrap_root(Seed::from(json!({"a": {"b": 1}})), &shared).unwrap();
        let nested = root.get("a").into_view().unwrap();
        assert!(nested.root().unwrap().ptr_eq(&root));
    }
}
