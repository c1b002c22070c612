/// Store facade: the user-facing entry point.
///
/// `reify` takes plain initial state, a set of named derivations and a
/// configuration, and returns a [`Store`] whose [`Store::state`] is a tracked
/// view of that state. Actions are attached afterwards and receive the live
/// view.
///
/// # Design Philosophy
///
/// - **One call**: `reify(state, derivations, config)` and you are done
/// - **Explicit mode**: the cell backend is a parameter, never sniffed
/// - **Pluggable cells**: `reify_with` accepts any [`CellFactory`]
use crate::cell::{self, CellFactory};
use crate::config::{Mode, ReifyConfig, select_factory};
use crate::error::{ReifyError, ReifyResult};
use crate::reactive::Runtime;
use crate::value::{Derivation, Seed};
use crate::view::View;
use crate::wrap::{Shared, wrap_root};
use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Named root-level derivations, in definition order.
#[derive(Clone, Default)]
pub struct Derivations {
    entries: IndexMap<String, Derivation>,
}

impl Derivations {
    /// An empty set of derivations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a derivation (builder style).
    pub fn with(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&View, &View) -> JsonValue + 'static,
    ) -> Self {
        self.insert(name, Derivation::new(f));
        self
    }

    /// Add or replace a derivation.
    pub fn insert(&mut self, name: impl Into<String>, derivation: Derivation) {
        self.entries.insert(name.into(), derivation);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Derivation)> {
        self.entries.iter().map(|(name, d)| (name.as_str(), d))
    }
}

impl<K: Into<String>> FromIterator<(K, Derivation)> for Derivations {
    fn from_iter<I: IntoIterator<Item = (K, Derivation)>>(iter: I) -> Self {
        let mut derivations = Self::new();
        for (name, derivation) in iter {
            derivations.insert(name, derivation);
        }
        derivations
    }
}

impl fmt::Debug for Derivations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

type SyncAction = dyn Fn(&View, &[JsonValue]) -> ReifyResult<JsonValue>;
type AsyncAction = dyn Fn(View, Vec<JsonValue>) -> LocalBoxFuture<'static, ReifyResult<JsonValue>>;

#[derive(Clone)]
enum ActionFn {
    Sync(Rc<SyncAction>),
    Async(Rc<AsyncAction>),
}

/// A set of named actions to attach to a store.
///
/// # Example
///
/// ```ignore
/// let actions = Actions::new()
///     .action("increment", |state, _| {
///         let n = state.get("count").as_i64().unwrap_or(0);
///         state.set("count", n + 1)?;
///         Ok(json!(n + 1))
///     })
///     .async_action("load", |state, args| {
///         Box::pin(async move {
///             state.set("status", "loaded")?;
///             Ok::<_, ReifyError>(JsonValue::Null)
///         })
///     });
/// store.attach(actions);
/// ```
#[derive(Clone, Default)]
pub struct Actions {
    entries: IndexMap<String, ActionFn>,
}

impl Actions {
    /// An empty set of actions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a synchronous action.
    pub fn action(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&View, &[JsonValue]) -> ReifyResult<JsonValue> + 'static,
    ) -> Self {
        self.entries.insert(name.into(), ActionFn::Sync(Rc::new(f)));
        self
    }

    /// Add an asynchronous action. The future runs on the caller's executor.
    pub fn async_action(
        mut self,
        name: impl Into<String>,
        f: impl Fn(View, Vec<JsonValue>) -> LocalBoxFuture<'static, ReifyResult<JsonValue>> + 'static,
    ) -> Self {
        self.entries.insert(name.into(), ActionFn::Async(Rc::new(f)));
        self
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An action bound to a store's state.
#[derive(Clone)]
pub struct BoundAction {
    name: String,
    state: View,
    func: ActionFn,
}

impl BoundAction {
    /// The name the action was attached under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the action must be awaited through [`BoundAction::call_async`].
    pub fn is_async(&self) -> bool {
        matches!(self.func, ActionFn::Async(_))
    }

    /// Run a synchronous action.
    pub fn call(&self, args: &[JsonValue]) -> ReifyResult<JsonValue> {
        match &self.func {
            ActionFn::Sync(f) => {
                debug!(action = %self.name, args = args.len(), "dispatching action");
                f(&self.state, args)
            }
            ActionFn::Async(_) => Err(ReifyError::InvalidArgument {
                method: self.name.clone(),
                reason: "asynchronous action must be dispatched with dispatch_async".to_string(),
            }),
        }
    }

    /// Run an action of either kind to completion.
    pub async fn call_async(&self, args: Vec<JsonValue>) -> ReifyResult<JsonValue> {
        match &self.func {
            ActionFn::Sync(f) => {
                debug!(action = %self.name, args = args.len(), "dispatching action");
                f(&self.state, &args)
            }
            ActionFn::Async(f) => {
                debug!(action = %self.name, args = args.len(), "dispatching async action");
                f(self.state.clone(), args).await
            }
        }
    }
}

impl fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAction")
            .field("name", &self.name)
            .field("async", &self.is_async())
            .finish()
    }
}

struct StoreInner {
    state: View,
    shared: Rc<Shared>,
    actions: RefCell<IndexMap<String, ActionFn>>,
}

/// A reified store: tracked state plus attached actions.
///
/// Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// Build a store from plain initial state.
///
/// The initial state must be an object or an array. Root derivations are
/// attached to the root view and only computed on first read.
///
/// # Example
///
/// ```ignore
/// let store = reify(
///     json!({"count": 2}),
///     Derivations::new().with("double", |state, _| {
///         json!(state.get("count").as_i64().unwrap_or(0) * 2)
///     }),
///     ReifyConfig::reactive(),
/// )?;
/// assert_eq!(store.state().get("double"), json!(4));
/// ```
pub fn reify(
    initial: impl Into<Seed>,
    derivations: Derivations,
    config: ReifyConfig,
) -> ReifyResult<Store> {
    reify_with(
        initial,
        derivations,
        config.permissive,
        select_factory(config.mode),
    )
}

/// Build a store on caller-supplied cell primitives, e.g. a shared
/// [`Runtime`] or a host framework's own reactive library.
pub fn reify_with(
    initial: impl Into<Seed>,
    derivations: Derivations,
    permissive: bool,
    factory: Rc<dyn CellFactory>,
) -> ReifyResult<Store> {
    let mode = factory.mode();
    let shared = Shared::new(factory, permissive);
    let state = wrap_root(initial.into(), &shared)?;

    if !derivations.is_empty() && state.is_array() {
        return Err(ReifyError::Construction {
            reason: "root derivations require an object root".to_string(),
        });
    }
    for (name, derivation) in derivations.iter() {
        if state.contains_key(name) {
            warn!(key = name, "root derivation shadows a state key");
        }
        state.define(name, derivation.clone())?;
    }

    debug!(
        %mode,
        permissive,
        keys = state.len(),
        derivations = derivations.len(),
        "reified store"
    );
    Ok(Store {
        inner: Rc::new(StoreInner {
            state,
            shared,
            actions: RefCell::new(IndexMap::new()),
        }),
    })
}

/// Build a store from JSON text.
pub fn reify_json(text: &str, derivations: Derivations, config: ReifyConfig) -> ReifyResult<Store> {
    let initial: JsonValue = serde_json::from_str(text)?;
    reify(initial, derivations, config)
}

impl Store {
    /// The tracked root view.
    pub fn state(&self) -> View {
        self.inner.state.clone()
    }

    /// Attach actions. A name that is already attached is replaced.
    pub fn attach(&self, actions: Actions) -> &Self {
        let mut attached = self.inner.actions.borrow_mut();
        for (name, func) in actions.entries {
            debug!(action = %name, "attached action");
            attached.insert(name, func);
        }
        self
    }

    /// Look up an attached action.
    pub fn action(&self, name: &str) -> ReifyResult<BoundAction> {
        let func = self
            .inner
            .actions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| ReifyError::MissingAction {
                name: name.to_string(),
            })?;
        Ok(BoundAction {
            name: name.to_string(),
            state: self.state(),
            func,
        })
    }

    /// Names of attached actions, in attach order.
    pub fn action_names(&self) -> Vec<String> {
        self.inner.actions.borrow().keys().cloned().collect()
    }

    /// Run a synchronous action by name.
    pub fn dispatch(&self, name: &str, args: &[JsonValue]) -> ReifyResult<JsonValue> {
        self.action(name)?.call(args)
    }

    /// Run an action of either kind by name.
    pub async fn dispatch_async(&self, name: &str, args: Vec<JsonValue>) -> ReifyResult<JsonValue> {
        let action = self.action(name)?;
        action.call_async(args).await
    }

    /// Plain JSON of the state, without derived values.
    pub fn to_json(&self) -> JsonValue {
        self.inner.state.to_json()
    }

    /// Plain JSON of the state with every derivation materialized.
    pub fn snapshot(&self) -> JsonValue {
        self.inner.state.snapshot()
    }

    /// Cell backend this store runs on.
    pub fn mode(&self) -> Mode {
        self.inner.shared.factory.mode()
    }

    /// Whether writes may introduce new keys.
    pub fn is_permissive(&self) -> bool {
        self.inner.shared.permissive
    }

    /// The built-in reactive runtime, when the store runs on one.
    pub fn runtime(&self) -> Option<Runtime> {
        self.inner
            .shared
            .factory
            .as_any()
            .downcast_ref::<Runtime>()
            .cloned()
    }

    /// Run `f` without registering dependencies.
    pub fn untracked<T>(&self, f: impl FnOnce() -> T) -> T {
        cell::untracked(&*self.inner.shared.factory, f)
    }

    /// Run `f` as one notification pass where the backend supports it.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        cell::batch(&*self.inner.shared.factory, f)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("mode", &self.mode())
            .field("permissive", &self.is_permissive())
            .field("actions", &self.action_names())
            .finish()
    }
}

impl Serialize for Store {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.state.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::StaticCells;
    use serde_json::json;
    use std::cell::Cell as CountCell;

    fn count_of(view: &View) -> i64 {
        view.get("count").as_i64().unwrap_or(0)
    }

    #[test]
    fn test_reify_rejects_scalar_root() {
        let err = reify(json!(5), Derivations::new(), ReifyConfig::new()).unwrap_err();
        assert!(matches!(err, ReifyError::Construction { .. }));
    }

    #[test]
    fn test_derivations_on_array_root_rejected() {
        let derivations = Derivations::new().with("n", |_, _| json!(0));
        let err = reify(json!([1]), derivations, ReifyConfig::new()).unwrap_err();
        assert!(matches!(err, ReifyError::Construction { .. }));
    }

    #[test]
    fn test_root_derivation_visible_in_keys() {
        let store = reify(
            json!({"count": 1}),
            Derivations::new().with("double", |s, _| json!(count_of(s) * 2)),
            ReifyConfig::new(),
        )
        .unwrap();
        assert_eq!(store.state().keys(), vec!["count", "double"]);
        assert_eq!(store.to_json(), json!({"count": 1}));
        assert_eq!(store.snapshot(), json!({"count": 1, "double": 2}));
    }

    #[test]
    fn test_derivation_shadows_state_key() {
        let store = reify(
            json!({"total": 99, "a": 1}),
            Derivations::new().with("total", |s, _| json!(s.get("a").as_i64().unwrap_or(0))),
            ReifyConfig::new(),
        )
        .unwrap();
        assert_eq!(store.state().get("total"), json!(1));
    }

    #[test]
    fn test_dispatch_sync_action() {
        let store = reify(json!({"count": 0}), Derivations::new(), ReifyConfig::new()).unwrap();
        store.attach(Actions::new().action("add", |state, args| {
            let by = args.first().and_then(JsonValue::as_i64).unwrap_or(1);
            state.set("count", count_of(state) + by)?;
            Ok(json!(count_of(state)))
        }));
        assert_eq!(store.dispatch("add", &[json!(5)]).unwrap(), json!(5));
        assert_eq!(store.state().get("count"), json!(5));
        assert_eq!(store.action_names(), vec!["add"]);
    }

    #[test]
    fn test_reify_json_reports_parse_errors() {
        let store = reify_json(r#"{"a": [1, 2]}"#, Derivations::new(), ReifyConfig::new()).unwrap();
        assert_eq!(store.state().get_path("a.1"), json!(2));
        let err = reify_json("{not json", Derivations::new(), ReifyConfig::new()).unwrap_err();
        assert!(matches!(err, ReifyError::Serialization(_)));
    }

    #[test]
    fn test_missing_action() {
        let store = reify(json!({}), Derivations::new(), ReifyConfig::new()).unwrap();
        let err = store.dispatch("nope", &[]).unwrap_err();
        assert!(matches!(err, ReifyError::MissingAction { ref name } if name == "nope"));
    }

    #[test]
    fn test_async_action_through_sync_dispatch() {
        let store = reify(json!({}), Derivations::new(), ReifyConfig::new()).unwrap();
        store.attach(
            Actions::new().async_action("load", |_, _| Box::pin(async { Ok::<_, ReifyError>(JsonValue::Null) })),
        );
        let err = store.dispatch("load", &[]).unwrap_err();
        assert!(matches!(err, ReifyError::InvalidArgument { .. }));
        let value = futures::executor::block_on(store.dispatch_async("load", vec![])).unwrap();
        assert_eq!(value, JsonValue::Null);
    }

    #[test]
    fn test_reattach_replaces_action() {
        let store = reify(json!({}), Derivations::new(), ReifyConfig::new()).unwrap();
        store
            .attach(Actions::new().action("v", |_, _| Ok(json!(1))))
            .attach(Actions::new().action("v", |_, _| Ok(json!(2))));
        assert_eq!(store.dispatch("v", &[]).unwrap(), json!(2));
        assert_eq!(store.action_names().len(), 1);
    }

    #[test]
    fn test_runtime_only_in_reactive_mode() {
        let store = reify(json!({}), Derivations::new(), ReifyConfig::new()).unwrap();
        assert!(store.runtime().is_none());
        let store = reify(json!({}), Derivations::new(), ReifyConfig::reactive()).unwrap();
        assert!(store.runtime().is_some());
        assert_eq!(store.mode(), Mode::Reactive);
    }

    #[test]
    fn test_reify_with_shared_runtime() {
        let rt = Runtime::new();
        let a = reify_with(json!({"n": 1}), Derivations::new(), false, Rc::new(rt.clone())).unwrap();
        let b = reify_with(json!({"n": 2}), Derivations::new(), true, Rc::new(rt.clone())).unwrap();
        assert!(a.runtime().unwrap().ptr_eq(&rt));
        assert!(b.runtime().unwrap().ptr_eq(&rt));
        assert!(b.is_permissive());
    }

    #[test]
    fn test_static_derivation_recomputes_every_read() {
        let calls = Rc::new(CountCell::new(0));
        let counter = Rc::clone(&calls);
        let store = reify_with(
            json!({"count": 1}),
            Derivations::new().with("double", move |s, _| {
                counter.set(counter.get() + 1);
                json!(count_of(s) * 2)
            }),
            false,
            Rc::new(StaticCells),
        )
        .unwrap();
        assert_eq!(calls.get(), 0);
        store.state().get("double");
        store.state().get("double");
        assert_eq!(calls.get(), 2);
    }
}
