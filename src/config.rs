//! Mode selection and store configuration.
//!
//! The cell backend is chosen explicitly, once per [`crate::reify`] call.
//! Nothing here inspects process state unless the caller asks for it through
//! [`ReifyConfig::from_env`].

use crate::cell::{CellFactory, StaticCells};
use crate::error::{ReifyError, ReifyResult};
use crate::reactive::Runtime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Environment variable read by [`ReifyConfig::from_env`] for the mode.
pub const MODE_ENV_VAR: &str = "KORU_REIFY_MODE";

/// Environment variable read by [`ReifyConfig::from_env`] for permissiveness.
pub const PERMISSIVE_ENV_VAR: &str = "KORU_REIFY_PERMISSIVE";

/// How cells behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plain boxes; derivations are recomputed on every read.
    #[default]
    Static,
    /// Fine-grained tracking with cached derivations and effects.
    Reactive,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Static => write!(f, "static"),
            Mode::Reactive => write!(f, "reactive"),
        }
    }
}

impl FromStr for Mode {
    type Err = ReifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Mode::Static),
            "reactive" => Ok(Mode::Reactive),
            other => Err(ReifyError::InvalidConfig {
                reason: format!("unknown mode '{}' (expected 'static' or 'reactive')", other),
            }),
        }
    }
}

/// Options for building a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReifyConfig {
    /// Cell backend.
    pub mode: Mode,
    /// Whether writes may introduce new keys.
    pub permissive: bool,
}

impl ReifyConfig {
    /// Static, strict configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reactive, strict configuration.
    pub fn reactive() -> Self {
        Self {
            mode: Mode::Reactive,
            permissive: false,
        }
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Allow or forbid new keys.
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    /// Build a configuration from [`MODE_ENV_VAR`] and [`PERMISSIVE_ENV_VAR`].
    /// Unset variables fall back to the defaults.
    pub fn from_env() -> ReifyResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ReifyResult<Self> {
        let mut config = Self::default();
        if let Some(mode) = lookup(MODE_ENV_VAR) {
            config.mode = mode.parse()?;
        }
        if let Some(flag) = lookup(PERMISSIVE_ENV_VAR) {
            config.permissive = parse_flag(&flag)?;
        }
        Ok(config)
    }

    /// Name of the schema mode, as used in error messages.
    pub fn schema_name(&self) -> &'static str {
        if self.permissive { "permissive" } else { "strict" }
    }
}

fn parse_flag(raw: &str) -> ReifyResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ReifyError::InvalidConfig {
            reason: format!("{} must be a boolean, got '{}'", PERMISSIVE_ENV_VAR, other),
        }),
    }
}

/// Resolve the cell factory for a mode.
///
/// Reactive mode gets a fresh built-in [`Runtime`]; use
/// [`crate::reify_with`] to share a runtime or inject a host library.
pub fn select_factory(mode: Mode) -> Rc<dyn CellFactory> {
    match mode {
        Mode::Static => Rc::new(StaticCells),
        Mode::Reactive => Rc::new(Runtime::new()),
    }
}
