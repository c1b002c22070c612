//! Built-in fine-grained reactive runtime.
//!
//! A small single-threaded push/pull runtime used as the default backend for
//! [`Mode::Reactive`] stores:
//!
//! - [`Signal`] - mutable source. Writing an equal value is a no-op.
//! - [`Memo`] - lazy cached derivation with dynamic dependency tracking.
//! - [`Effect`] - runs immediately and again after its dependencies change.
//! - [`Runtime::batch`] - defers effects until the outermost batch ends.
//! - [`Runtime::untracked`] - reads without registering dependencies.
//!
//! Writes mark dependents stale eagerly (push); memos recompute only when read
//! (pull). Effects are queued while staleness propagates and drained once the
//! outermost write or batch finishes.
//!
//! # Example
//!
//! ```ignore
//! use koru_reify::reactive::Runtime;
//! use koru_reify::Value;
//! use serde_json::json;
//!
//! let rt = Runtime::new();
//! let count = rt.signal(Value::Json(json!(1)));
//!
//! let c = count.clone();
//! let double = rt.memo(move || json!(c.get().to_json().and_then(|v| v.as_i64()).unwrap_or(0) * 2));
//!
//! let _log = rt.effect(move || println!("double = {}", double.get()));
//! count.set(Value::Json(json!(5))); // prints "double = 10"
//! ```

use crate::cell::{Cell, CellFactory, DerivedCell};
use crate::config::Mode;
use crate::value::Value;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Upper bound on effect queue drains per flush before giving up on a
/// self-retriggering effect.
const MAX_FLUSH_ROUNDS: usize = 10_000;

trait Source {
    fn id(&self) -> u64;
    fn unsubscribe(&self, observer: u64);
}

trait Observer {
    fn id(&self) -> u64;
    fn mark_stale(&self, rt: &Inner);
    fn add_source(&self, source: Rc<dyn Source>);
}

#[derive(Default)]
struct Subscribers {
    list: RefCell<Vec<(u64, Weak<dyn Observer>)>>,
}

impl Subscribers {
    fn add(&self, observer: &Rc<dyn Observer>) {
        let id = observer.id();
        let mut list = self.list.borrow_mut();
        if !list.iter().any(|(existing, _)| *existing == id) {
            list.push((id, Rc::downgrade(observer)));
        }
    }

    fn remove(&self, id: u64) {
        self.list.borrow_mut().retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, rt: &Inner) {
        let live: Vec<Rc<dyn Observer>> = {
            let mut list = self.list.borrow_mut();
            list.retain(|(_, weak)| weak.strong_count() > 0);
            list.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for observer in live {
            observer.mark_stale(rt);
        }
    }

    fn len(&self) -> usize {
        self.list
            .borrow()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}

#[derive(Default)]
struct Inner {
    next_id: StdCell<u64>,
    observers: RefCell<Vec<Option<Rc<dyn Observer>>>>,
    batch_depth: StdCell<usize>,
    queue: RefCell<Vec<Rc<EffectNode>>>,
    flushing: StdCell<bool>,
}

struct ObserverGuard<'a>(&'a Inner);

impl Drop for ObserverGuard<'_> {
    fn drop(&mut self) {
        self.0.observers.borrow_mut().pop();
    }
}

struct BatchGuard<'a>(&'a Inner);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.batch_depth.set(self.0.batch_depth.get() - 1);
    }
}

struct FlushGuard<'a>(&'a Inner);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.flushing.set(false);
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn track(&self, source: Rc<dyn Source>, subscribers: &Subscribers) {
        let current = self.observers.borrow().last().cloned().flatten();
        if let Some(observer) = current {
            subscribers.add(&observer);
            observer.add_source(source);
        }
    }

    fn with_observer<T>(&self, observer: Option<Rc<dyn Observer>>, f: impl FnOnce() -> T) -> T {
        self.observers.borrow_mut().push(observer);
        let _guard = ObserverGuard(self);
        f()
    }

    fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        self.batch_depth.set(self.batch_depth.get() + 1);
        let result = {
            let _guard = BatchGuard(self);
            f()
        };
        if self.batch_depth.get() == 0 {
            self.flush();
        }
        result
    }

    fn enqueue(&self, effect: Rc<EffectNode>) {
        self.queue.borrow_mut().push(effect);
    }

    fn flush(&self) {
        if self.flushing.get() {
            return;
        }
        self.flushing.set(true);
        let _guard = FlushGuard(self);

        for _ in 0..MAX_FLUSH_ROUNDS {
            let pending = std::mem::take(&mut *self.queue.borrow_mut());
            if pending.is_empty() {
                return;
            }
            for effect in pending {
                effect.run(self);
            }
        }
        warn!(
            rounds = MAX_FLUSH_ROUNDS,
            "effects kept retriggering each other; dropping the remaining queue"
        );
        self.queue.borrow_mut().clear();
    }
}

struct SignalNode {
    id: u64,
    value: RefCell<Value>,
    subscribers: Subscribers,
}

impl Source for SignalNode {
    fn id(&self) -> u64 {
        self.id
    }

    fn unsubscribe(&self, observer: u64) {
        self.subscribers.remove(observer);
    }
}

/// A mutable reactive source.
#[derive(Clone)]
pub struct Signal {
    node: Rc<SignalNode>,
    rt: Rc<Inner>,
}

impl Signal {
    /// Read the value and register a dependency on it.
    pub fn get(&self) -> Value {
        self.rt.track(self.node.clone(), &self.node.subscribers);
        self.node.value.borrow().clone()
    }

    /// Read the value without registering a dependency.
    pub fn peek(&self) -> Value {
        self.node.value.borrow().clone()
    }

    /// Replace the value. Dependents are notified only if it changed.
    pub fn set(&self, value: Value) {
        if *self.node.value.borrow() == value {
            return;
        }
        *self.node.value.borrow_mut() = value;
        trace!(signal = self.node.id, "signal changed");
        self.rt.batch(|| self.node.subscribers.notify(&self.rt));
    }

    /// Replace the value with one computed from the current value.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let next = f(&self.node.value.borrow());
        self.set(next);
    }

    /// Number of live observers depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        self.node.subscribers.len()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.node.id)
            .field("value", &*self.node.value.borrow())
            .finish()
    }
}

impl Cell for Signal {
    fn get(&self) -> Value {
        Signal::get(self)
    }

    fn set(&self, value: Value) {
        Signal::set(self, value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MemoNode {
    id: u64,
    me: Weak<MemoNode>,
    f: Box<dyn Fn() -> JsonValue>,
    value: RefCell<Option<JsonValue>>,
    stale: StdCell<bool>,
    computations: StdCell<u64>,
    sources: RefCell<Vec<Rc<dyn Source>>>,
    subscribers: Subscribers,
}

impl MemoNode {
    fn get(&self, rt: &Inner) -> JsonValue {
        if let Some(me) = self.me.upgrade() {
            rt.track(me, &self.subscribers);
        }
        if self.stale.get() {
            self.recompute(rt);
        }
        self.value.borrow().clone().unwrap_or(JsonValue::Null)
    }

    fn recompute(&self, rt: &Inner) {
        for source in self.sources.take() {
            source.unsubscribe(self.id);
        }
        // Cleared first so writes made while computing mark it stale again.
        self.stale.set(false);
        let observer = self.me.upgrade().map(|me| me as Rc<dyn Observer>);
        let value = rt.with_observer(observer, || (self.f)());
        self.computations.set(self.computations.get() + 1);
        trace!(memo = self.id, "memo recomputed");
        *self.value.borrow_mut() = Some(value);
    }
}

impl Source for MemoNode {
    fn id(&self) -> u64 {
        self.id
    }

    fn unsubscribe(&self, observer: u64) {
        self.subscribers.remove(observer);
    }
}

impl Observer for MemoNode {
    fn id(&self) -> u64 {
        self.id
    }

    fn mark_stale(&self, rt: &Inner) {
        if !self.stale.get() {
            self.stale.set(true);
            self.subscribers.notify(rt);
        }
    }

    fn add_source(&self, source: Rc<dyn Source>) {
        let mut sources = self.sources.borrow_mut();
        if !sources.iter().any(|existing| existing.id() == source.id()) {
            sources.push(source);
        }
    }
}

/// A lazily computed, cached value.
#[derive(Clone)]
pub struct Memo {
    node: Rc<MemoNode>,
    rt: Rc<Inner>,
}

impl Memo {
    /// Read the value, recomputing it if a dependency changed.
    pub fn get(&self) -> JsonValue {
        self.node.get(&self.rt)
    }

    /// Whether the next read will recompute.
    pub fn is_stale(&self) -> bool {
        self.node.stale.get()
    }

    /// How many times the function has run.
    pub fn computations(&self) -> u64 {
        self.node.computations.get()
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.node.id)
            .field("stale", &self.node.stale.get())
            .finish()
    }
}

impl DerivedCell for Memo {
    fn get(&self) -> JsonValue {
        Memo::get(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct EffectNode {
    id: u64,
    me: Weak<EffectNode>,
    f: RefCell<Box<dyn FnMut()>>,
    sources: RefCell<Vec<Rc<dyn Source>>>,
    queued: StdCell<bool>,
    disposed: StdCell<bool>,
    runs: StdCell<u64>,
}

impl EffectNode {
    fn run(&self, rt: &Inner) {
        self.queued.set(false);
        if self.disposed.get() {
            return;
        }
        for source in self.sources.take() {
            source.unsubscribe(self.id);
        }
        let observer = self.me.upgrade().map(|me| me as Rc<dyn Observer>);
        rt.with_observer(observer, || {
            if let Ok(mut f) = self.f.try_borrow_mut() {
                f();
            }
        });
        self.runs.set(self.runs.get() + 1);
    }

    fn dispose(&self) {
        self.disposed.set(true);
        for source in self.sources.take() {
            source.unsubscribe(self.id);
        }
    }
}

impl Observer for EffectNode {
    fn id(&self) -> u64 {
        self.id
    }

    fn mark_stale(&self, rt: &Inner) {
        if self.disposed.get() || self.queued.get() {
            return;
        }
        if let Some(me) = self.me.upgrade() {
            self.queued.set(true);
            rt.enqueue(me);
        }
    }

    fn add_source(&self, source: Rc<dyn Source>) {
        let mut sources = self.sources.borrow_mut();
        if !sources.iter().any(|existing| existing.id() == source.id()) {
            sources.push(source);
        }
    }
}

/// Handle to a running effect. Dropping it disposes the effect.
pub struct Effect {
    node: Rc<EffectNode>,
}

impl Effect {
    /// Stop the effect and release its dependencies.
    pub fn dispose(&self) {
        self.node.dispose();
    }

    /// Whether the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.node.disposed.get()
    }

    /// How many times the effect body has run.
    pub fn run_count(&self) -> u64 {
        self.node.runs.get()
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.node.dispose();
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.node.id)
            .field("runs", &self.node.runs.get())
            .field("disposed", &self.node.disposed.get())
            .finish()
    }
}

/// The built-in reactive runtime. Cloning shares the same runtime.
#[derive(Clone, Default)]
pub struct Runtime {
    inner: Rc<Inner>,
}

impl Runtime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal.
    pub fn signal(&self, value: Value) -> Signal {
        Signal {
            node: Rc::new(SignalNode {
                id: self.inner.next_id(),
                value: RefCell::new(value),
                subscribers: Subscribers::default(),
            }),
            rt: Rc::clone(&self.inner),
        }
    }

    /// Create a memo. `f` first runs on the first read.
    pub fn memo(&self, f: impl Fn() -> JsonValue + 'static) -> Memo {
        self.memo_boxed(Box::new(f))
    }

    fn memo_boxed(&self, f: Box<dyn Fn() -> JsonValue>) -> Memo {
        let id = self.inner.next_id();
        Memo {
            node: Rc::new_cyclic(|me| MemoNode {
                id,
                me: me.clone(),
                f,
                value: RefCell::new(None),
                stale: StdCell::new(true),
                computations: StdCell::new(0),
                sources: RefCell::new(Vec::new()),
                subscribers: Subscribers::default(),
            }),
            rt: Rc::clone(&self.inner),
        }
    }

    /// Create an effect. It runs once immediately, then after every change
    /// to what it read during its previous run.
    pub fn effect(&self, f: impl FnMut() + 'static) -> Effect {
        let id = self.inner.next_id();
        let node = Rc::new_cyclic(|me| EffectNode {
            id,
            me: me.clone(),
            f: RefCell::new(Box::new(f)),
            sources: RefCell::new(Vec::new()),
            queued: StdCell::new(false),
            disposed: StdCell::new(false),
            runs: StdCell::new(0),
        });
        node.run(&self.inner);
        Effect { node }
    }

    /// Call `callback` whenever the value produced by `source` changes.
    ///
    /// The callback does not fire for the initial value and runs untracked.
    pub fn watch<T, S, C>(&self, source: S, mut callback: C) -> Effect
    where
        T: PartialEq + 'static,
        S: Fn() -> T + 'static,
        C: FnMut(&T) + 'static,
    {
        let rt = Rc::clone(&self.inner);
        let mut last: Option<T> = None;
        self.effect(move || {
            let next = source();
            if last.as_ref().is_some_and(|prev| *prev != next) {
                rt.with_observer(None, || callback(&next));
            }
            last = Some(next);
        })
    }

    /// Run `f`, deferring effects until the outermost batch completes.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        self.inner.batch(f)
    }

    /// Run `f` without registering dependencies.
    pub fn untracked<T>(&self, f: impl FnOnce() -> T) -> T {
        self.inner.with_observer(None, f)
    }

    /// Whether a batch is currently open.
    pub fn is_batching(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    /// Whether both handles share one runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("batch_depth", &self.inner.batch_depth.get())
            .field("queued_effects", &self.inner.queue.borrow().len())
            .finish()
    }
}

impl CellFactory for Runtime {
    fn mode(&self) -> Mode {
        Mode::Reactive
    }

    fn make_cell(&self, value: Value) -> Rc<dyn Cell> {
        Rc::new(self.signal(value))
    }

    fn make_derived(&self, f: Box<dyn Fn() -> JsonValue>) -> Rc<dyn DerivedCell> {
        Rc::new(self.memo_boxed(f))
    }

    fn read_untracked(&self, f: &mut dyn FnMut()) {
        self.inner.with_observer(None, || f())
    }

    fn batch(&self, f: &mut dyn FnMut()) {
        self.inner.batch(|| f())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
