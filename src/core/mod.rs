// ============================================================================
// transparent-reactive - Core Module
// Fundamental types, traits, and graph registry for the reactive engine
// ============================================================================

pub mod constants;
pub mod shared_state;
pub mod spy;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use shared_state::{ActionRunInfo, EnforceActions, SharedState, SharedStateConfig};
pub use spy::{SpyEvent, SpySink};
pub use types::{default_equals, Derivation, EqualsFn, Observable};
