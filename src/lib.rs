//! # KoruReify: Deep Reactive State
//!
//! **Tagline:** *"Plain data in. Tracked state out."*
//!
//! KoruReify turns a plain JSON-like object into a deeply tracked store:
//! - **Cells everywhere** - every leaf lives in its own cell
//! - **Lazy derivations** - computed values run only when first read
//! - **Two modes** - static boxes for one-shot rendering, fine-grained
//!   reactivity for interactive use
//! - **Guarded shape** - strict stores reject new keys; containers cannot be
//!   silently replaced
//!
//! ## Quick Start
//!
//! ```ignore
//! use koru_reify::prelude::*;
//!
//! fn main() -> ReifyResult<()> {
//!     let store = reify(
//!         json!({"count": 1, "todos": [{"text": "a", "done": false}]}),
//!         Derivations::new().with("remaining", |state, _| {
//!             let todos = state.get("todos").into_view().unwrap();
//!             json!(todos.filter(|t| t.as_view().is_some_and(|t| t.get("done") == json!(false))).len())
//!         }),
//!         ReifyConfig::reactive(),
//!     )?;
//!
//!     let state = store.state();
//!     let rt = store.runtime().unwrap();
//!     let _log = rt.effect({
//!         let state = state.clone();
//!         move || println!("remaining: {}", state.get("remaining").to_json())
//!     });
//!
//!     state.set_path("todos.0.done", true)?; // prints "remaining: 0"
//!     Ok(())
//! }
//! ```
//!
//! ## Core API
//!
//! - [`reify()`] - Build a store from initial state, derivations and config
//! - [`View::get()`] / [`View::set()`] / [`View::delete()`] / [`View::keys()`]
//! - [`Store::attach()`] / [`Store::dispatch()`] - Actions over the live state
//! - [`View::to_json()`] / [`View::snapshot()`] - Plain data back out
//!
//! Keys prefixed with `$` reach the underlying cell instead of its value,
//! for handing to a host framework.
//!
//! ## Architecture
//!
//! 1. **Store Facade** (`store`) - `reify`, actions, export
//! 2. **Interception Handler** (`view`, `access`) - guarded reads and writes
//! 3. **Deep Wrapper** (`wrap`) - builds the view tree once
//! 4. **Cell Factory** (`cell`, `reactive`) - static and reactive primitives
//! 5. **Mode Selector** (`config`) - picks the cell backend explicitly
//!
//! ## Threading
//!
//! Stores are single-threaded (`Rc`/`RefCell`). Create one per thread.

// Internal modules
mod error;
mod wrap;

pub mod access;
pub mod cell;
pub mod config;
pub mod reactive;
pub mod store;
pub mod value;
pub mod view;

pub use access::{Access, ArrayMethod, BoundMethod, Raw};
pub use cell::{Cell, CellFactory, DerivedCell, StaticCell, StaticCells};
pub use config::{MODE_ENV_VAR, Mode, PERMISSIVE_ENV_VAR, ReifyConfig, select_factory};
pub use error::{ReifyError, ReifyResult};
pub use reactive::{Effect, Memo, Runtime, Signal};
pub use store::{Actions, BoundAction, Derivations, Store, reify, reify_json, reify_with};
pub use value::{Derivation, Seed, Shallow, Value, shallow};
pub use view::{ESCAPE_PREFIX, MAX_ARRAY_LENGTH, PATH_SEPARATOR, View};

pub use serde_json::{Value as JsonValue, json};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use koru_reify::prelude::*;
/// ```
pub mod prelude {
    pub use crate::access::{Access, Raw};
    pub use crate::config::{Mode, ReifyConfig};
    pub use crate::error::{ReifyError, ReifyResult};
    pub use crate::reactive::Runtime;
    pub use crate::store::{Actions, Derivations, Store, reify, reify_json, reify_with};
    pub use crate::value::{Derivation, Seed, Shallow, shallow};
    pub use crate::view::View;
    pub use serde_json::{Value as JsonValue, json};
}
