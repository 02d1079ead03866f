// ============================================================================
// transparent-reactive - Error Taxonomy
// ============================================================================

use std::fmt;

/// The engine's unified error type.
///
/// Structural-invariant violations (action nesting, shared-state mismatch)
/// are always returned as `Err`, never swallowed by a reaction's error
/// boundary — only a reaction's own effect body gets a boundary.
#[derive(thiserror::Error, Debug)]
pub enum ReactiveError {
    /// A computed's getter read its own `value` while already computing it.
    #[error("computed `{name}` read itself while computing (cycle)")]
    ComputedCycle { name: String },

    /// A computed's setter assigned to `value` while already running.
    #[error("computed `{name}` setter re-entered itself (cycle)")]
    ComputedSetterCycle { name: String },

    /// Assignment to a computed with no configured setter.
    #[error("computed `{name}` has no setter")]
    ComputedReadOnly { name: String },

    /// Reading a computed whose last evaluation raised an error.
    #[error("computed `{name}` failed on its last evaluation: {source}")]
    ComputedReadFailed {
        name: String,
        #[source]
        source: BoxedError,
    },

    /// A write occurred outside an action while `enforce_actions` forbids it.
    #[error("observable `{name}` was written to outside an action")]
    WriteOutsideAction { name: String },

    /// A read occurred outside a reaction while `reaction_requires_observable`-style
    /// policy forbids it.
    #[error("observable `{name}` was read outside a reaction or computed")]
    ReadOutsideReaction { name: String },

    /// The reaction scheduler exceeded `max_reaction_iterations` in one flush.
    #[error("reaction flush exceeded {limit} iterations without settling (cycle)")]
    ReactionCycle { limit: usize },

    /// `end_action` was called with a snapshot that does not correspond to
    /// the outermost open action.
    #[error("action nesting violated: expected to close `{expected}`, got `{actual}`")]
    ActionNestingError { expected: String, actual: String },

    /// A `when()` with a configured timeout elapsed before its predicate
    /// became true.
    #[error("`when` named `{name}` timed out after {millis}ms")]
    Timeout { name: String, millis: u64 },

    /// A node belonging to a different `SharedState` was touched while
    /// tracking a derivation bound to this one.
    #[error("node `{name}` belongs to a different SharedState than the current derivation")]
    SharedStateMismatch { name: String },
}

/// A type-erased error, used to carry the original cause of a computed's
/// cached failure without requiring every error in the system to share a
/// concrete type.
pub type BoxedError = Box<dyn std::error::Error + 'static>;

/// Wraps an arbitrary error so it can be stored as a computed's last
/// failure and later rethrown via `ReactiveError::ComputedReadFailed`.
pub struct OpaqueError(String);

impl OpaqueError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Debug for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for OpaqueError {}

pub type Result<T> = std::result::Result<T, ReactiveError>;
