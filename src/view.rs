//! Wrapped views: the interception layer over a deep-wrapped container.
//!
//! A [`View`] replaces transparent property interception with an explicit
//! accessor. Reads unwrap cells, writes go into cells, and the shape of the
//! tree is guarded:
//!
//! - `get(key)` unwraps a cell, returns a nested view, or materializes a
//!   derivation. `get("$key")` returns the raw cell instead (the escape hatch).
//! - `set(key, value)` updates an existing cell in place. New keys need a
//!   permissive store, tracked containers cannot be overwritten, functions
//!   cannot be stored. `set("$key", value)` replaces the slot wholesale.
//! - `delete(key)` hides the key and leaves its cell holding `Undefined`.
//! - `keys()` lists data keys and derivation keys, never bookkeeping.
//!
//! Array views also carry a structural version cell. Every read registers a
//! dependency on it and every shape change bumps it, so readers that depend
//! on the array's shape re-evaluate even when no single element changed.
//!
//! # Example
//!
//! ```ignore
//! let store = reify(json!({"count": 0, "todos": []}), Derivations::new(), ReifyConfig::new())?;
//! let state = store.state();
//!
//! state.set("count", 3)?;
//! assert_eq!(state.get("count"), json!(3));
//!
//! let todos = state.get("todos").into_view().unwrap();
//! todos.push(json!({"text": "write docs", "done": false}))?;
//!
//! // Raw access for a host framework
//! let cell = state.get("$count");
//! ```

use crate::access::{Access, ArrayMethod, BoundMethod, Raw};
use crate::cell::{self, Cell, CellFactory, DerivedCell};
use crate::config::Mode;
use crate::error::{ReifyError, ReifyResult};
use crate::value::{Derivation, Seed, Value};
use crate::wrap::{Shared, build_slot};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Prefix selecting raw (escape-hatch) access, e.g. `"$count"`.
pub const ESCAPE_PREFIX: char = '$';

/// Separator for [`View::get_path`] and friends.
pub const PATH_SEPARATOR: char = '.';

const LENGTH: &str = "length";

/// Largest array length; valid indices are `0..MAX_ARRAY_LENGTH`.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

enum PropertyKey<'a> {
    Escape(&'a str),
    Plain(&'a str),
}

impl<'a> PropertyKey<'a> {
    fn parse(key: &'a str) -> Self {
        match key.strip_prefix(ESCAPE_PREFIX) {
            Some(name) => PropertyKey::Escape(name),
            None => PropertyKey::Plain(key),
        }
    }

    fn name(&self) -> &'a str {
        match self {
            PropertyKey::Escape(name) | PropertyKey::Plain(name) => name,
        }
    }
}

/// Parse a canonical array index ("0", "17"; not "01" or "+1").
fn parse_index(key: &str) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'));
    if canonical { key.parse().ok() } else { None }
}

/// What a key maps to inside a view.
#[derive(Clone)]
pub(crate) enum Slot {
    Cell(Rc<dyn Cell>),
    View(View),
    Derived(DerivedSlot),
    /// An array index with no cell yet. The cell is created on first write.
    Hole,
}

/// A derivation plus the derived cell built from it, if any.
#[derive(Clone)]
pub(crate) struct DerivedSlot {
    func: Derivation,
    cache: Option<(Derivation, Rc<dyn DerivedCell>)>,
}

impl DerivedSlot {
    pub(crate) fn pending(func: Derivation) -> Self {
        Self { func, cache: None }
    }
}

#[derive(Clone)]
pub(crate) struct Entry {
    slot: Slot,
    /// False for deleted keys and array holes. Deleted cells stay in place so
    /// anything still holding them observes `Undefined`.
    present: bool,
}

impl Entry {
    pub(crate) fn new(slot: Slot) -> Self {
        Self {
            slot,
            present: true,
        }
    }

    fn hole() -> Self {
        Self {
            slot: Slot::Hole,
            present: false,
        }
    }
}

pub(crate) enum Body {
    Object(RefCell<IndexMap<String, Entry>>),
    Array {
        items: RefCell<Vec<Entry>>,
        version: Rc<dyn Cell>,
    },
}

pub(crate) struct Node {
    pub(crate) shared: Rc<Shared>,
    pub(crate) body: Body,
}

/// A tracked view over one container of a store.
///
/// Cloning a `View` is cheap and yields another handle to the same node.
#[derive(Clone)]
pub struct View {
    node: Rc<Node>,
}

impl View {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node: Rc::new(node),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Node> {
        Rc::downgrade(&self.node)
    }

    fn factory(&self) -> &dyn CellFactory {
        &*self.node.shared.factory
    }

    /// Whether this view wraps an array.
    pub fn is_array(&self) -> bool {
        matches!(self.node.body, Body::Array { .. })
    }

    /// Whether both handles refer to the same container.
    pub fn ptr_eq(&self, other: &View) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// The root view of the owning store, if it is still alive.
    pub fn root(&self) -> Option<View> {
        self.node
            .shared
            .root_weak()
            .upgrade()
            .map(|node| View { node })
    }

    /// Cell backend mode of the owning store.
    pub fn mode(&self) -> Mode {
        self.factory().mode()
    }

    /// Whether the owning store accepts new keys.
    pub fn is_permissive(&self) -> bool {
        self.node.shared.permissive
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read a property.
    ///
    /// Plain keys return the unwrapped value, a nested view, a shallow
    /// handle, or `Undefined`. On array views `"length"` and sequence method
    /// names (`"push"`, `"splice"`, ...) are also understood. Keys prefixed
    /// with [`ESCAPE_PREFIX`] return [`Access::Raw`].
    pub fn get(&self, key: &str) -> Access {
        match PropertyKey::parse(key) {
            PropertyKey::Escape(name) => self.raw(name).map_or(Access::Undefined, Access::Raw),
            PropertyKey::Plain(name) => self.read(name),
        }
    }

    /// Raw cell, derived cell or nested view behind `key`, without unwrapping.
    /// Equivalent to `get("$key")`.
    pub fn raw(&self, key: &str) -> Option<Raw> {
        self.track_shape();
        let slot = self.slot(key)?;
        Some(match slot {
            Slot::Cell(cell) => Raw::Cell(cell),
            Slot::View(view) => Raw::View(view),
            Slot::Derived(_) => Raw::Derived(self.materialize(key)?),
            Slot::Hole => return None,
        })
    }

    fn read(&self, name: &str) -> Access {
        self.track_shape();
        if let Some(slot) = self.slot(name) {
            return self.unwrap_slot(name, slot);
        }
        if self.is_array() {
            if name == LENGTH {
                return Access::Value(JsonValue::from(self.raw_len()));
            }
            if let Ok(method) = name.parse::<ArrayMethod>() {
                return Access::Method(BoundMethod::new(self.clone(), method));
            }
        }
        Access::Undefined
    }

    fn unwrap_slot(&self, name: &str, slot: Slot) -> Access {
        match slot {
            Slot::Cell(cell) => Access::from_value(cell.get()),
            Slot::View(view) => Access::View(view),
            Slot::Derived(_) => self
                .materialize(name)
                .map_or(Access::Undefined, |derived| Access::Value(derived.get())),
            Slot::Hole => Access::Undefined,
        }
    }

    /// Read a dotted path such as `"todos.0.text"`. Unresolvable paths read
    /// as `Undefined`.
    pub fn get_path(&self, path: &str) -> Access {
        let segments = split_path(path);
        let Some((last, parents)) = segments.split_last() else {
            return Access::View(self.clone());
        };
        let mut current = self.clone();
        for segment in parents {
            match current.get(segment) {
                Access::View(next) => current = next,
                _ => return Access::Undefined,
            }
        }
        current.get(last)
    }

    /// Whether `key` is a visible key of this view.
    pub fn contains_key(&self, key: &str) -> bool {
        let name = PropertyKey::parse(key).name();
        match &self.node.body {
            Body::Object(map) => map.borrow().get(name).is_some_and(|entry| entry.present),
            Body::Array { items, .. } => {
                self.track_shape();
                parse_index(name)
                    .and_then(|index| items.borrow().get(index).map(|entry| entry.present))
                    .unwrap_or(false)
            }
        }
    }

    /// Visible keys: data keys in insertion order followed by derivation
    /// keys, or present indices for arrays.
    pub fn keys(&self) -> Vec<String> {
        match &self.node.body {
            Body::Object(map) => map
                .borrow()
                .iter()
                .filter(|(_, entry)| entry.present)
                .map(|(key, _)| key.clone())
                .collect(),
            Body::Array { items, .. } => {
                self.track_shape();
                items
                    .borrow()
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.present)
                    .map(|(index, _)| index.to_string())
                    .collect()
            }
        }
    }

    /// Number of elements (arrays) or visible keys (objects).
    pub fn len(&self) -> usize {
        match &self.node.body {
            Body::Object(map) => map.borrow().values().filter(|e| e.present).count(),
            Body::Array { .. } => {
                self.track_shape();
                self.raw_len()
            }
        }
    }

    /// Whether [`View::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unwrapped values in order: elements for arrays, values of visible
    /// keys for objects.
    pub fn items(&self) -> Vec<Access> {
        self.track_shape();
        self.entries()
            .into_iter()
            .map(|(name, entry)| {
                if entry.present {
                    self.unwrap_slot(&name, entry.slot)
                } else {
                    Access::Undefined
                }
            })
            .collect()
    }

    fn entries(&self) -> Vec<(String, Entry)> {
        match &self.node.body {
            Body::Object(map) => map
                .borrow()
                .iter()
                .filter(|(_, entry)| entry.present)
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect(),
            Body::Array { items, .. } => items
                .borrow()
                .iter()
                .enumerate()
                .map(|(index, entry)| (index.to_string(), entry.clone()))
                .collect(),
        }
    }

    pub(crate) fn slot(&self, name: &str) -> Option<Slot> {
        match &self.node.body {
            Body::Object(map) => map.borrow().get(name).map(|entry| entry.slot.clone()),
            Body::Array { items, .. } => {
                let index = parse_index(name)?;
                items.borrow().get(index).map(|entry| entry.slot.clone())
            }
        }
    }

    fn raw_len(&self) -> usize {
        match &self.node.body {
            Body::Object(map) => map.borrow().len(),
            Body::Array { items, .. } => items.borrow().len(),
        }
    }

    fn track_shape(&self) {
        if let Body::Array { version, .. } = &self.node.body {
            version.get();
        }
    }

    fn bump_version(&self) {
        if let Body::Array { version, .. } = &self.node.body {
            let current = cell::untracked(self.factory(), || version.get());
            let next = match current {
                Value::Json(v) => v.as_u64().unwrap_or(0) + 1,
                _ => 1,
            };
            trace!(version = next, "array shape changed");
            version.set(Value::Json(JsonValue::from(next)));
        }
    }

    /// Return the derived cell for `name`, building it on first access.
    ///
    /// The cache remembers which derivation the cell was built from and is
    /// rebuilt only when the slot now holds a different function.
    fn materialize(&self, name: &str) -> Option<Rc<dyn DerivedCell>> {
        let Slot::Derived(derived) = self.slot(name)? else {
            return None;
        };
        if let Some((func, cell)) = &derived.cache {
            if func.same(&derived.func) {
                return Some(Rc::clone(cell));
            }
        }
        trace!(key = name, "materializing derived cell");
        let cell = self.make_derived_cell(&derived.func);
        self.with_entry_mut(name, |entry| {
            if let Slot::Derived(slot) = &mut entry.slot {
                slot.cache = Some((derived.func.clone(), Rc::clone(&cell)));
            }
        });
        Some(cell)
    }

    fn make_derived_cell(&self, func: &Derivation) -> Rc<dyn DerivedCell> {
        let node = self.downgrade();
        let root = self.node.shared.root_weak();
        let func = func.clone();
        self.factory()
            .make_derived(Box::new(move || match (node.upgrade(), root.upgrade()) {
                (Some(node), Some(root)) => func.call(&View { node }, &View { node: root }),
                _ => JsonValue::Null,
            }))
    }

    fn with_entry_mut<T>(&self, name: &str, f: impl FnOnce(&mut Entry) -> T) -> Option<T> {
        match &self.node.body {
            Body::Object(map) => map.borrow_mut().get_mut(name).map(f),
            Body::Array { items, .. } => {
                let index = parse_index(name)?;
                items.borrow_mut().get_mut(index).map(f)
            }
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write a property.
    ///
    /// Existing cells are updated in place. New keys (and array indices past
    /// the end) require a permissive store. Tracked containers cannot be
    /// overwritten except through the escape hatch (`"$key"`), which replaces
    /// the slot wholesale. Functions can never be stored.
    pub fn set(&self, key: &str, value: impl Into<Seed>) -> ReifyResult<()> {
        let seed = value.into();
        match PropertyKey::parse(key) {
            PropertyKey::Escape(name) => self.replace(name, seed),
            PropertyKey::Plain(name) => self.write(name, seed),
        }
    }

    /// Write through a dotted path. Every segment but the last must resolve
    /// to a nested view.
    pub fn set_path(&self, path: &str, value: impl Into<Seed>) -> ReifyResult<()> {
        let (parent, last) = self.resolve_parent(path)?;
        parent.set(&last, value)
    }

    fn write(&self, name: &str, seed: Seed) -> ReifyResult<()> {
        if matches!(seed, Seed::Derive(_)) {
            return Err(ReifyError::FunctionValueDenied {
                key: name.to_string(),
            });
        }
        if self.is_array() {
            if name == LENGTH {
                return self.set_length(seed);
            }
            match parse_index(name) {
                None => {
                    return Err(ReifyError::InvalidKey {
                        key: name.to_string(),
                        reason: "array views only accept index keys and 'length'".to_string(),
                    });
                }
                Some(index) if index >= MAX_ARRAY_LENGTH => {
                    return Err(ReifyError::InvalidKey {
                        key: name.to_string(),
                        reason: format!("array index must be below {}", MAX_ARRAY_LENGTH),
                    });
                }
                Some(_) => {}
            }
        }

        let Some(slot) = self.slot(name) else {
            return self.insert_new(name, seed);
        };
        let (existing, value) = assign_to(name, &slot, seed)?;
        let cell = existing.unwrap_or_else(|| self.factory().make_cell(Value::Undefined));
        cell::batch(self.factory(), || {
            // Mark present first so readers woken by the write see the key.
            self.with_entry_mut(name, |entry| {
                entry.slot = Slot::Cell(Rc::clone(&cell));
                entry.present = true;
            });
            cell.set(value);
            self.bump_version();
        });
        Ok(())
    }

    fn insert_new(&self, name: &str, seed: Seed) -> ReifyResult<()> {
        if !self.node.shared.permissive {
            debug!(key = name, "rejected new property on strict store");
            return Err(ReifyError::StrictModeViolation {
                key: name.to_string(),
                mode: "strict".to_string(),
            });
        }
        let slot = build_slot(seed, &self.node.shared);
        match &self.node.body {
            Body::Object(map) => {
                map.borrow_mut().insert(name.to_string(), Entry::new(slot));
            }
            Body::Array { items, .. } => {
                let index = parse_index(name).unwrap_or_default();
                reserve(items, index + 1).map_err(|reason| ReifyError::InvalidKey {
                    key: name.to_string(),
                    reason,
                })?;
                cell::batch(self.factory(), || {
                    {
                        let mut items = items.borrow_mut();
                        items.resize_with(index, Entry::hole);
                        items.push(Entry::new(slot));
                    }
                    self.bump_version();
                });
            }
        }
        debug!(key = name, "added property");
        Ok(())
    }

    fn set_length(&self, seed: Seed) -> ReifyResult<()> {
        let invalid = |reason: String| ReifyError::InvalidArgument {
            method: LENGTH.to_string(),
            reason,
        };
        let new_len = match &seed {
            Seed::Leaf(value) => value.as_u64(),
            _ => None,
        }
        .ok_or_else(|| invalid(format!("expected a non-negative integer, got {}", seed.kind())))?;
        let new_len = usize::try_from(new_len)
            .ok()
            .filter(|n| *n <= MAX_ARRAY_LENGTH)
            .ok_or_else(|| invalid(format!("length must not exceed {}", MAX_ARRAY_LENGTH)))?;

        let Body::Array { items, .. } = &self.node.body else {
            return Ok(());
        };
        reserve(items, new_len).map_err(invalid)?;
        cell::batch(self.factory(), || {
            {
                let mut items = items.borrow_mut();
                items.truncate(new_len);
                items.resize_with(new_len, Entry::hole);
            }
            self.bump_version();
        });
        Ok(())
    }

    fn replace(&self, name: &str, seed: Seed) -> ReifyResult<()> {
        if matches!(seed, Seed::Derive(_)) {
            return Err(ReifyError::FunctionValueDenied {
                key: name.to_string(),
            });
        }
        if self.slot(name).is_none() {
            return Err(ReifyError::EscapeHatchMisuse {
                key: name.to_string(),
            });
        }
        let slot = build_slot(seed, &self.node.shared);
        cell::batch(self.factory(), || {
            self.with_entry_mut(name, |entry| *entry = Entry::new(slot));
            self.bump_version();
        });
        debug!(key = name, "replaced entry through escape hatch");
        Ok(())
    }

    /// Attach or redefine a derivation on an object view.
    ///
    /// A data key of the same name is shadowed. Redefining with a different
    /// function rebuilds the derived cell on its next read.
    pub fn define(&self, name: &str, derivation: Derivation) -> ReifyResult<()> {
        let Body::Object(map) = &self.node.body else {
            return Err(ReifyError::InvalidKey {
                key: name.to_string(),
                reason: "derivations can only be defined on object views".to_string(),
            });
        };
        let mut map = map.borrow_mut();
        match map.get_mut(name) {
            Some(Entry {
                slot: Slot::Derived(existing),
                ..
            }) => existing.func = derivation,
            Some(entry) => *entry = Entry::new(Slot::Derived(DerivedSlot::pending(derivation))),
            None => {
                map.insert(
                    name.to_string(),
                    Entry::new(Slot::Derived(DerivedSlot::pending(derivation))),
                );
            }
        }
        trace!(key = name, "derivation defined");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------

    /// Delete a property. Returns whether a visible entry was removed.
    ///
    /// A deleted cell is kept and set to `Undefined`, so derivations holding
    /// it observe the deletion. Deleting an array index leaves a hole.
    pub fn delete(&self, key: &str) -> ReifyResult<bool> {
        let name = PropertyKey::parse(key).name();
        match &self.node.body {
            Body::Object(map) => {
                let tombstoned = {
                    let mut map = map.borrow_mut();
                    let Some(entry) = map.get_mut(name) else {
                        return Ok(false);
                    };
                    let cell = match &entry.slot {
                        Slot::Cell(cell) => Some(Rc::clone(cell)),
                        _ => None,
                    };
                    match cell {
                        Some(cell) => Some((cell, std::mem::replace(&mut entry.present, false))),
                        None => {
                            map.shift_remove(name);
                            None
                        }
                    }
                };
                trace!(key = name, "deleted property");
                match tombstoned {
                    Some((cell, was_present)) => {
                        cell.set(Value::Undefined);
                        Ok(was_present)
                    }
                    None => Ok(true),
                }
            }
            Body::Array { items, .. } => {
                let Some(index) = parse_index(name) else {
                    return Ok(false);
                };
                let (was_present, cell) = {
                    let mut items = items.borrow_mut();
                    let Some(entry) = items.get_mut(index) else {
                        return Ok(false);
                    };
                    let was_present = entry.present;
                    let cell = match &entry.slot {
                        Slot::Cell(cell) => Some(Rc::clone(cell)),
                        _ => None,
                    };
                    match cell {
                        Some(_) => entry.present = false,
                        None => *entry = Entry::hole(),
                    }
                    (was_present, cell)
                };
                cell::batch(self.factory(), || {
                    if let Some(cell) = &cell {
                        cell.set(Value::Undefined);
                    }
                    self.bump_version();
                });
                Ok(was_present)
            }
        }
    }

    /// Delete through a dotted path.
    pub fn delete_path(&self, path: &str) -> ReifyResult<bool> {
        let (parent, last) = self.resolve_parent(path)?;
        parent.delete(&last)
    }

    fn resolve_parent(&self, path: &str) -> ReifyResult<(View, String)> {
        let segments = split_path(path);
        let Some((last, parents)) = segments.split_last() else {
            return Err(ReifyError::InvalidPath {
                path: path.to_string(),
            });
        };
        let mut current = self.clone();
        for segment in parents {
            match current.get(segment) {
                Access::View(next) => current = next,
                _ => {
                    return Err(ReifyError::InvalidPath {
                        path: path.to_string(),
                    });
                }
            }
        }
        Ok((current, last.to_string()))
    }

    // ------------------------------------------------------------------
    // Sequence methods
    // ------------------------------------------------------------------

    fn array_items(&self, method: &str) -> ReifyResult<&RefCell<Vec<Entry>>> {
        match &self.node.body {
            Body::Array { items, .. } => Ok(items),
            Body::Object(_) => Err(ReifyError::NotAnArray {
                method: method.to_string(),
            }),
        }
    }

    fn slots_for(&self, start: usize, seeds: Vec<Seed>) -> ReifyResult<Vec<Entry>> {
        if let Some(offset) = seeds.iter().position(|s| matches!(s, Seed::Derive(_))) {
            return Err(ReifyError::FunctionValueDenied {
                key: (start + offset).to_string(),
            });
        }
        Ok(seeds
            .into_iter()
            .map(|seed| Entry::new(build_slot(seed, &self.node.shared)))
            .collect())
    }

    fn detach(&self, entry: Entry) -> Access {
        if !entry.present {
            return Access::Undefined;
        }
        match entry.slot {
            Slot::Cell(cell) => Access::from_value(cell::untracked(self.factory(), || cell.get())),
            Slot::View(view) => Access::View(view),
            Slot::Derived(_) | Slot::Hole => Access::Undefined,
        }
    }

    /// Replace `delete_count` elements starting at `start` with `items`.
    /// Returns the removed elements. Moved elements keep their cells.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Seed>,
    ) -> ReifyResult<Vec<Access>> {
        let list = self.array_items("splice")?;
        let len = self.raw_len();
        let start = start.min(len);
        let end = start.saturating_add(delete_count).min(len);
        let inserted = self.slots_for(start, items)?;
        let removed: Vec<Entry> = cell::batch(self.factory(), || {
            let removed = list.borrow_mut().splice(start..end, inserted).collect();
            self.bump_version();
            removed
        });
        Ok(removed.into_iter().map(|entry| self.detach(entry)).collect())
    }

    /// Append an element; returns the new length.
    pub fn push(&self, value: impl Into<Seed>) -> ReifyResult<usize> {
        let len = self.raw_len();
        self.splice(len, 0, vec![value.into()])?;
        Ok(self.raw_len())
    }

    /// Remove and return the last element (`Undefined` when empty).
    pub fn pop(&self) -> ReifyResult<Access> {
        self.array_items("pop")?;
        let len = self.raw_len();
        if len == 0 {
            return Ok(Access::Undefined);
        }
        Ok(self.splice(len - 1, 1, Vec::new())?.pop().unwrap_or_default())
    }

    /// Remove and return the first element (`Undefined` when empty).
    pub fn shift(&self) -> ReifyResult<Access> {
        self.array_items("shift")?;
        Ok(self.splice(0, 1, Vec::new())?.pop().unwrap_or_default())
    }

    /// Prepend an element; returns the new length.
    pub fn unshift(&self, value: impl Into<Seed>) -> ReifyResult<usize> {
        self.splice(0, 0, vec![value.into()])?;
        Ok(self.raw_len())
    }

    /// Reverse the elements in place.
    pub fn reverse(&self) -> ReifyResult<()> {
        let list = self.array_items("reverse")?;
        cell::batch(self.factory(), || {
            list.borrow_mut().reverse();
            self.bump_version();
        });
        Ok(())
    }

    /// Position of the first element equal to `needle`.
    pub fn index_of(&self, needle: &JsonValue) -> Option<usize> {
        self.position(|item| item == needle)
    }

    /// Whether any element equals `needle`.
    pub fn includes(&self, needle: &JsonValue) -> bool {
        self.index_of(needle).is_some()
    }

    /// Position of the first element matching `predicate`.
    pub fn position(&self, mut predicate: impl FnMut(&Access) -> bool) -> Option<usize> {
        self.items().iter().position(|item| predicate(item))
    }

    /// First element matching `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&Access) -> bool) -> Option<Access> {
        self.items().into_iter().find(|item| predicate(item))
    }

    /// Elements matching `predicate`.
    pub fn filter(&self, mut predicate: impl FnMut(&Access) -> bool) -> Vec<Access> {
        self.items().into_iter().filter(|item| predicate(item)).collect()
    }

    /// Map every element.
    pub fn map<T>(&self, f: impl FnMut(&Access) -> T) -> Vec<T> {
        self.items().iter().map(f).collect()
    }

    /// Elements in `start..end` (end defaults to the length).
    pub fn slice(&self, start: usize, end: Option<usize>) -> Vec<Access> {
        let items = self.items();
        let end = end.unwrap_or(items.len()).min(items.len());
        let start = start.min(end);
        items[start..end].to_vec()
    }

    /// Join the elements' string forms with `separator`.
    pub fn join(&self, separator: &str) -> String {
        self.items()
            .iter()
            .map(Access::to_display_string)
            .collect::<Vec<_>>()
            .join(separator)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Plain JSON of this view, excluding derived values. Reads untracked.
    pub fn to_json(&self) -> JsonValue {
        cell::untracked(self.factory(), || self.export(false))
    }

    /// Plain JSON of this view including derived values. Reads untracked.
    pub fn snapshot(&self) -> JsonValue {
        cell::untracked(self.factory(), || self.export(true))
    }

    /// Plain JSON of this view, registering a dependency on every cell read
    /// and on the shape of every array.
    pub(crate) fn export_tracked(&self) -> JsonValue {
        self.export(false)
    }

    fn export(&self, include_derived: bool) -> JsonValue {
        self.track_shape();
        let entries = self.entries();
        match &self.node.body {
            Body::Object(_) => {
                let mut out = Map::new();
                for (key, entry) in entries {
                    let value = match entry.slot {
                        Slot::Cell(cell) => cell.get().to_json(),
                        Slot::View(view) => Some(view.export(include_derived)),
                        Slot::Derived(_) if include_derived => {
                            self.materialize(&key).map(|derived| derived.get())
                        }
                        Slot::Derived(_) | Slot::Hole => None,
                    };
                    if let Some(value) = value {
                        out.insert(key, value);
                    }
                }
                JsonValue::Object(out)
            }
            Body::Array { .. } => JsonValue::Array(
                entries
                    .into_iter()
                    .map(|(key, entry)| {
                        if !entry.present {
                            return JsonValue::Null;
                        }
                        match entry.slot {
                            Slot::Cell(cell) => cell.get().to_json().unwrap_or(JsonValue::Null),
                            Slot::View(view) => view.export(include_derived),
                            Slot::Derived(_) if include_derived => self
                                .materialize(&key)
                                .map_or(JsonValue::Null, |derived| derived.get()),
                            Slot::Derived(_) | Slot::Hole => JsonValue::Null,
                        }
                    })
                    .collect(),
            ),
        }
    }
}

/// Check a normal write against an existing slot and prepare the new cell
/// value without touching any state. Holes have no cell yet and yield `None`.
fn assign_to(name: &str, slot: &Slot, seed: Seed) -> ReifyResult<(Option<Rc<dyn Cell>>, Value)> {
    let cell = match slot {
        Slot::View(_) => {
            return Err(ReifyError::WholeContainerReplacementDenied {
                key: name.to_string(),
            });
        }
        Slot::Derived(_) => {
            return Err(ReifyError::DerivedReadOnly {
                key: name.to_string(),
            });
        }
        Slot::Cell(cell) => Some(Rc::clone(cell)),
        Slot::Hole => None,
    };
    let value = match seed {
        Seed::Leaf(value) => Value::Json(value),
        Seed::Shallow(handle) => Value::Shallow(handle),
        container => Value::Json(container.into_json(name)?),
    };
    Ok((cell, value))
}

/// Make room for an array of `len` entries without changing its contents.
fn reserve(items: &RefCell<Vec<Entry>>, len: usize) -> Result<(), String> {
    let mut items = items.borrow_mut();
    let additional = len.saturating_sub(items.len());
    items.try_reserve(additional).map_err(|err| err.to_string())
}

fn split_path(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect()
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("kind", &if self.is_array() { "array" } else { "object" })
            .field("len", &self.raw_len())
            .finish()
    }
}

impl Serialize for View {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::StaticCells;
    use crate::reactive::Runtime;
    use crate::value::shallow;
    use crate::wrap::wrap_root;
    use serde_json::json;
    use std::cell::Cell as CountCell;

    fn view_with(value: JsonValue, permissive: bool) -> View {
        let shared = Shared::new(Rc::new(StaticCells), permissive);
        wrap_root(Seed::from(value), &shared).unwrap()
    }

    fn reactive_view(seed: Seed) -> (Runtime, View) {
        let rt = Runtime::new();
        let shared = Shared::new(Rc::new(rt.clone()), false);
        (rt, wrap_root(seed, &shared).unwrap())
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("17"), Some(17));
        assert_eq!(parse_index("01"), None);
        assert_eq!(parse_index("-1"), None);
        assert_eq!(parse_index(""), None);
        assert_eq!(parse_index("length"), None);
    }

    #[test]
    fn test_leaf_round_trip() {
        let view = view_with(json!({"count": 0, "name": "a"}), false);
        view.set("count", 5).unwrap();
        view.set("name", "b").unwrap();
        assert_eq!(view.get("count"), json!(5));
        assert_eq!(view.get("name"), json!("b"));
    }

    #[test]
    fn test_cell_identity_survives_writes() {
        let view = view_with(json!({"count": 0}), false);
        let before = view.raw("count").unwrap();
        view.set("count", 1).unwrap();
        let after = view.raw("count").unwrap();
        assert!(before.ptr_eq(&after));
        assert_eq!(before.value(), json!(1));
    }

    #[test]
    fn test_unknown_key_reads_undefined() {
        let view = view_with(json!({"a": 1}), false);
        assert!(view.get("missing").is_undefined());
        assert!(view.get("$missing").is_undefined());
    }

    #[test]
    fn test_strict_and_permissive_new_keys() {
        let strict = view_with(json!({"a": 1}), false);
        let err = strict.set("b", 2).unwrap_err();
        assert!(matches!(err, ReifyError::StrictModeViolation { ref key, .. } if key == "b"));
        assert!(strict.get("b").is_undefined());

        let permissive = view_with(json!({"a": 1}), true);
        permissive.set("b", json!({"deep": [1]})).unwrap();
        assert_eq!(permissive.get_path("b.deep.0"), json!(1));
        assert_eq!(permissive.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_tracked_container_replacement_denied() {
        let view = view_with(json!({"user": {"name": "a"}, "list": [1]}), true);
        let err = view.set("user", json!({"name": "b"})).unwrap_err();
        assert!(matches!(err, ReifyError::WholeContainerReplacementDenied { .. }));
        let err = view.set("list", json!([])).unwrap_err();
        assert!(matches!(err, ReifyError::WholeContainerReplacementDenied { .. }));
        assert_eq!(view.get_path("user.name"), json!("a"));
    }

    #[test]
    fn test_escape_hatch_replaces_container() {
        let view = view_with(json!({"user": {"name": "a"}}), false);
        let old = view.get("user").into_view().unwrap();
        view.set("$user", json!({"name": "b", "age": 3})).unwrap();
        let new = view.get("user").into_view().unwrap();
        assert!(!old.ptr_eq(&new));
        assert_eq!(new.to_json(), json!({"name": "b", "age": 3}));
    }

    #[test]
    fn test_escape_hatch_requires_entry() {
        let view = view_with(json!({"a": 1}), true);
        let err = view.set("$b", 1).unwrap_err();
        assert!(matches!(err, ReifyError::EscapeHatchMisuse { ref key } if key == "b"));
    }

    #[test]
    fn test_functions_are_never_stored() {
        let view = view_with(json!({"a": 1}), true);
        for key in ["a", "fresh", "$a"] {
            let err = view.set(key, Seed::derive(|_, _| json!(0))).unwrap_err();
            assert!(matches!(err, ReifyError::FunctionValueDenied { .. }));
        }
        assert_eq!(view.keys(), vec!["a"]);
    }

    #[test]
    fn test_shallow_replaced_freely() {
        let first = shallow(json!({"x": 1}));
        let view_seed = Seed::object([("data", Seed::from(first.clone()))]);
        let shared = Shared::new(Rc::new(StaticCells), false);
        let view = wrap_root(view_seed, &shared).unwrap();
        assert!(view.get("data").as_shallow().unwrap().ptr_eq(&first));

        let second = shallow(json!({"x": 2}));
        view.set("data", second.clone()).unwrap();
        assert!(view.get("data").as_shallow().unwrap().ptr_eq(&second));
    }

    #[test]
    fn test_container_into_leaf_cell_is_opaque() {
        let view = view_with(json!({"slot": null}), false);
        view.set("slot", json!({"a": 1})).unwrap();
        assert_eq!(view.get("slot"), json!({"a": 1}));
        assert!(view.get("slot").as_view().is_none());
    }

    #[test]
    fn test_delete_keeps_cell() {
        let view = view_with(json!({"a": 1, "b": 2}), false);
        let raw = view.raw("a").unwrap();
        assert!(view.delete("a").unwrap());
        assert!(!view.delete("a").unwrap());
        assert!(raw.value().is_undefined());
        assert_eq!(view.keys(), vec!["b"]);
        assert_eq!(view.to_json(), json!({"b": 2}));

        // The cell still exists, so a strict store may write it again.
        view.set("a", 3).unwrap();
        assert_eq!(raw.value(), json!(3));
        assert_eq!(view.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_array_index_writes() {
        let strict = view_with(json!({"list": [1, 2]}), false);
        let list = strict.get("list").into_view().unwrap();
        list.set("0", 10).unwrap();
        assert_eq!(list.get("0"), json!(10));
        assert!(matches!(
            list.set("5", 1),
            Err(ReifyError::StrictModeViolation { .. })
        ));
        assert!(matches!(list.set("name", 1), Err(ReifyError::InvalidKey { .. })));

        let permissive = view_with(json!({"list": [1]}), true);
        let list = permissive.get("list").into_view().unwrap();
        list.set("3", 4).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list.to_json(), json!([1, null, null, 4]));
        assert_eq!(list.keys(), vec!["0", "3"]);
    }

    #[test]
    fn test_length_write() {
        let view = view_with(json!([1, 2, 3]), false);
        view.set("length", 1).unwrap();
        assert_eq!(view.get("length"), json!(1));
        view.set("length", 3).unwrap();
        assert_eq!(view.to_json(), json!([1, null, null]));
        assert!(matches!(
            view.set("length", "long"),
            Err(ReifyError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_length_and_index_limits() {
        let view = view_with(json!([1, 2]), true);
        let max = MAX_ARRAY_LENGTH as u64;
        for len in [u64::MAX, max + 1] {
            assert!(matches!(
                view.set("length", len),
                Err(ReifyError::InvalidArgument { .. })
            ));
        }
        for key in ["18446744073709551615", "4294967295", "99999999999999999999999"] {
            assert!(matches!(view.set(key, 1), Err(ReifyError::InvalidKey { .. })));
        }
        assert_eq!(view.to_json(), json!([1, 2]));
    }

    #[test]
    fn test_holes_get_a_cell_on_first_write() {
        let view = view_with(json!([1]), false);
        view.set("length", 3).unwrap();
        assert!(view.raw("2").is_none());
        assert!(view.get("2").is_undefined());

        view.set("2", 5).unwrap();
        assert!(matches!(view.raw("2"), Some(Raw::Cell(_))));
        assert_eq!(view.to_json(), json!([1, null, 5]));
        assert_eq!(view.keys(), vec!["0", "2"]);
    }

    #[test]
    fn test_array_delete_leaves_hole() {
        let view = view_with(json!(["a", "b", "c"]), false);
        assert!(view.delete("1").unwrap());
        assert_eq!(view.len(), 3);
        assert_eq!(view.to_json(), json!(["a", null, "c"]));
        assert!(!view.contains_key("1"));
    }

    #[test]
    fn test_sequence_methods() {
        let view = view_with(json!([1, 2, 3]), false);
        assert_eq!(view.push(4).unwrap(), 4);
        assert_eq!(view.pop().unwrap(), json!(4));
        assert_eq!(view.shift().unwrap(), json!(1));
        assert_eq!(view.unshift(0).unwrap(), 3);
        let removed = view.splice(1, 1, vec![Seed::from(7), Seed::from(8)]).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0], json!(2));
        assert_eq!(view.to_json(), json!([0, 7, 8, 3]));
        view.reverse().unwrap();
        assert_eq!(view.to_json(), json!([3, 8, 7, 0]));
        assert_eq!(view.index_of(&json!(7)), Some(2));
        assert!(!view.includes(&json!(99)));
        assert_eq!(view.join("-"), "3-8-7-0");
        assert_eq!(view.slice(1, Some(3)).len(), 2);
    }

    #[test]
    fn test_sequence_methods_on_object_fail() {
        let view = view_with(json!({"a": 1}), true);
        assert!(matches!(view.push(1), Err(ReifyError::NotAnArray { .. })));
        assert!(view.get("push").is_undefined());
    }

    #[test]
    fn test_bound_method_through_get() {
        let view = view_with(json!([1, 2, 3]), false);
        let Access::Method(splice) = view.get("splice") else {
            panic!("expected a bound method");
        };
        let removed = splice.call(vec![Seed::from(0), Seed::from(2)]).unwrap();
        assert_eq!(removed, json!([1, 2]));
        assert_eq!(view.to_json(), json!([3]));
    }

    #[test]
    fn test_moved_elements_keep_cells() {
        let view = view_with(json!(["a", "b", "c"]), false);
        let c = view.raw("2").unwrap();
        view.splice(0, 1, Vec::new()).unwrap();
        assert!(view.raw("1").unwrap().ptr_eq(&c));
    }

    #[test]
    fn test_derivation_receives_view_and_root() {
        let seed = Seed::object([
            ("factor", Seed::from(3)),
            (
                "inner",
                Seed::object([
                    ("n", Seed::from(2)),
                    (
                        "scaled",
                        Seed::derive(|view, root| {
                            let n = view.get("n").as_i64().unwrap_or(0);
                            let factor = root.get("factor").as_i64().unwrap_or(0);
                            json!(n * factor)
                        }),
                    ),
                ]),
            ),
        ]);
        let shared = Shared::new(Rc::new(StaticCells), false);
        let root = wrap_root(seed, &shared).unwrap();
        assert_eq!(root.get_path("inner.scaled"), json!(6));
        root.set("factor", 10).unwrap();
        assert_eq!(root.get_path("inner.scaled"), json!(20));
        assert!(matches!(
            root.set_path("inner.scaled", 1),
            Err(ReifyError::DerivedReadOnly { .. })
        ));
    }

    #[test]
    fn test_escape_hatch_first_touch_matches_normal_read() {
        let calls = Rc::new(CountCell::new(0));
        let counter = Rc::clone(&calls);
        let seed = Seed::object([
            ("count", Seed::from(2)),
            (
                "double",
                Seed::derive(move |view, _| {
                    counter.set(counter.get() + 1);
                    json!(view.get("count").as_i64().unwrap_or(0) * 2)
                }),
            ),
        ]);
        let (_rt, view) = reactive_view(seed);

        let Some(Raw::Derived(raw)) = view.raw("double") else {
            panic!("expected a raw derived cell");
        };
        assert_eq!(calls.get(), 0);
        assert_eq!(view.get("double"), json!(4));
        assert_eq!(raw.get(), json!(4));
        assert_eq!(calls.get(), 1);
        let Some(Raw::Derived(again)) = view.raw("double") else {
            panic!("expected a raw derived cell");
        };
        assert!(Rc::ptr_eq(&raw, &again));
    }

    #[test]
    fn test_define_rebuilds_on_new_function() {
        let (_rt, view) = reactive_view(Seed::from(json!({"n": 2})));
        view.define("out", Derivation::new(|v, _| json!(v.get("n").as_i64().unwrap_or(0) + 1)))
            .unwrap();
        assert_eq!(view.get("out"), json!(3));
        view.define("out", Derivation::new(|v, _| json!(v.get("n").as_i64().unwrap_or(0) * 10)))
            .unwrap();
        assert_eq!(view.get("out"), json!(20));
        assert_eq!(view.keys(), vec!["n", "out"]);
    }

    #[test]
    fn test_array_shape_dependency() {
        let (rt, view) = reactive_view(Seed::from(json!({"list": [1, 2, 3]})));
        let list = view.get("list").into_view().unwrap();
        let observed = list.clone();
        let count = rt.memo(move || json!(observed.len()));
        assert_eq!(count.get(), json!(3));
        list.splice(0, 1, Vec::new()).unwrap();
        assert!(count.is_stale());
        assert_eq!(count.get(), json!(2));
    }

    #[test]
    fn test_serialize_matches_to_json() {
        let view = view_with(json!({"a": [1, {"b": true}]}), false);
        let text = serde_json::to_string(&view).unwrap();
        assert_eq!(text, r#"{"a":[1,{"b":true}]}"#);
    }
}
