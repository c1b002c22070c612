/// Error types for koru-reify operations.
///
/// Every rejected operation is a programmer error surfaced at the call that
/// triggered it. Nothing is retried or recovered internally, and a rejected
/// write never leaves the state partially mutated.
use thiserror::Error;

/// The main error type for koru-reify operations.
///
/// All fallible operations return `Result<T, ReifyError>`. Variants carry the
/// offending key, path or action name so they can be pattern-matched precisely.
#[derive(Error, Debug)]
pub enum ReifyError {
    /// The initial state could not be turned into a store.
    #[error("Cannot reify state: {reason}")]
    Construction {
        /// Why construction failed
        reason: String,
    },

    /// A write introduced a key that the store does not know about.
    #[error("Cannot add new property '{key}' in {mode} mode")]
    StrictModeViolation {
        /// The property that was rejected
        key: String,
        /// The schema mode of the store ("strict")
        mode: String,
    },

    /// A normal write tried to overwrite a tracked nested container.
    #[error(
        "Cannot replace tracked container '{key}' through a normal write; \
         mutate its fields or use the '${key}' escape hatch"
    )]
    WholeContainerReplacementDenied {
        /// The property holding the tracked container
        key: String,
    },

    /// An escape-hatch write targeted a key with no backing entry.
    #[error("Escape hatch '${key}' does not name an existing entry")]
    EscapeHatchMisuse {
        /// The key without its escape prefix
        key: String,
    },

    /// A function was offered as a plain state value.
    #[error("Cannot store a function as the value of '{key}'")]
    FunctionValueDenied {
        /// The property that was rejected
        key: String,
    },

    /// An action was invoked that was never attached.
    #[error("Action '{name}' is not registered")]
    MissingAction {
        /// The requested action name
        name: String,
    },

    /// A write targeted a derived property.
    #[error("Derived property '{key}' is read-only")]
    DerivedReadOnly {
        /// The derived property
        key: String,
    },

    /// A key is not valid for the container it was used on.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        /// The offending key
        key: String,
        /// Why the key is invalid
        reason: String,
    },

    /// A path segment did not resolve to a nested view.
    #[error("Path '{path}' does not resolve to a container")]
    InvalidPath {
        /// The full path that failed to resolve
        path: String,
    },

    /// A sequence method was called on an object view.
    #[error("'{method}' can only be called on an array view")]
    NotAnArray {
        /// The sequence method name
        method: String,
    },

    /// A sequence method or special key received an unusable argument.
    #[error("Invalid argument for '{method}': {reason}")]
    InvalidArgument {
        /// The method or key that received the argument
        method: String,
        /// Why the argument was rejected
        reason: String,
    },

    /// Configuration could not be resolved.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the bad setting
        reason: String,
    },

    /// An action body reported a failure.
    #[error("Action '{name}' failed: {reason}")]
    ActionFailed {
        /// The failing action
        name: String,
        /// Failure description supplied by the action
        reason: String,
    },

    /// Serialization error when converting state to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReifyError {
    /// Build an [`ReifyError::ActionFailed`] from any displayable failure.
    pub fn action_failed(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ActionFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for koru-reify operations.
pub type ReifyResult<T> = Result<T, ReifyError>;
