// ============================================================================
// transparent-reactive - Spy Channel
// Structured diagnostic events, always flowing through `tracing`
// ============================================================================

use std::fmt;

/// A structured record of something the engine did. Emitted unconditionally
/// through `tracing` (so any subscriber gets them for free) and additionally
/// fanned out to any `SpySink` the host registered.
#[derive(Debug, Clone)]
pub enum SpyEvent {
    ActionStart { name: String },
    ActionEnd { name: String },
    ReactionStart { name: String, run_id: u64 },
    ReactionEnd { name: String, run_id: u64 },
    ReactionScheduled { name: String },
    ReactionException { name: String, message: String },
    ComputedRead { name: String, recomputed: bool },
    ObservableValueChanged { name: String },
}

impl fmt::Display for SpyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpyEvent::ActionStart { name } => write!(f, "action.start {name}"),
            SpyEvent::ActionEnd { name } => write!(f, "action.end {name}"),
            SpyEvent::ReactionStart { name, run_id } => {
                write!(f, "reaction.start {name} run={run_id}")
            }
            SpyEvent::ReactionEnd { name, run_id } => {
                write!(f, "reaction.end {name} run={run_id}")
            }
            SpyEvent::ReactionScheduled { name } => write!(f, "reaction.scheduled {name}"),
            SpyEvent::ReactionException { name, message } => {
                write!(f, "reaction.exception {name}: {message}")
            }
            SpyEvent::ComputedRead { name, recomputed } => {
                write!(f, "computed.read {name} recomputed={recomputed}")
            }
            SpyEvent::ObservableValueChanged { name } => {
                write!(f, "observable.changed {name}")
            }
        }
    }
}

/// A programmatic listener for spy events. `tracing` is always the primary
/// sink; a `SpySink` is an additional fanout a host can register for, e.g.,
/// an in-memory test probe or a devtools bridge.
pub trait SpySink {
    fn on_event(&self, event: &SpyEvent);
}

/// Emits `event` at an appropriate `tracing` level. Kept free-standing so
/// `SharedState` can call it without borrowing itself mutably.
pub fn trace_event(event: &SpyEvent) {
    match event {
        SpyEvent::ReactionException { name, message } => {
            tracing::warn!(target: "transparent_reactive::spy", reaction = %name, error = %message, "reaction raised an error");
        }
        SpyEvent::ActionStart { name } => {
            tracing::trace!(target: "transparent_reactive::spy", action = %name, "action start");
        }
        SpyEvent::ActionEnd { name } => {
            tracing::trace!(target: "transparent_reactive::spy", action = %name, "action end");
        }
        SpyEvent::ReactionStart { name, run_id } => {
            tracing::trace!(target: "transparent_reactive::spy", reaction = %name, run_id, "reaction start");
        }
        SpyEvent::ReactionEnd { name, run_id } => {
            tracing::trace!(target: "transparent_reactive::spy", reaction = %name, run_id, "reaction end");
        }
        SpyEvent::ReactionScheduled { name } => {
            tracing::trace!(target: "transparent_reactive::spy", reaction = %name, "reaction scheduled");
        }
        SpyEvent::ComputedRead { name, recomputed } => {
            tracing::trace!(target: "transparent_reactive::spy", computed = %name, recomputed, "computed read");
        }
        SpyEvent::ObservableValueChanged { name } => {
            tracing::trace!(target: "transparent_reactive::spy", observable = %name, "observable changed");
        }
    }
}
