// ============================================================================
// transparent-reactive - Primitives Module
// Atom, ObservableValue, ComputedValue, Reaction, and the Enhancer policy
// ============================================================================

pub mod atom;
pub mod computed;
pub mod enhancer;
pub mod observable_value;
pub mod reaction;

pub use atom::Atom;
pub use computed::ComputedValue;
pub use enhancer::Enhancer;
pub use observable_value::{ChangeFn, InterceptFn, ObservableValue};
pub use reaction::{autorun, autorun_with, reaction, when, when_handle, ReactionOptions, WhenHandle, WhenOptions};
