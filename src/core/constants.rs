// ============================================================================
// transparent-reactive - Constants
// Flag constants for node kinds and dependency states
// ============================================================================

// =============================================================================
// NODE KIND FLAGS
// =============================================================================

/// Node is an Atom (value-less observable)
pub const ATOM: u32 = 1 << 0;

/// Node is an ObservableValue (atom with a stored value)
pub const OBSERVABLE_VALUE: u32 = 1 << 1;

/// Node is a ComputedValue (derivation + observable)
pub const COMPUTED: u32 = 1 << 2;

/// Node is a Reaction (derivation with no observers)
pub const REACTION: u32 = 1 << 3;

// =============================================================================
// DEPENDENCY STATE FLAGS
// =============================================================================
//
// Every derivation (ComputedValue, Reaction) is in exactly one of these
// four states at any time. See reactivity/propagation.rs for transitions.
// =============================================================================

/// Derivation has never been tracked, or was suspended; no dependency
/// bookkeeping can be trusted.
pub const NOT_TRACKING: u32 = 1 << 4;

/// Derivation's cached result is known to reflect its current dependencies.
pub const UP_TO_DATE: u32 = 1 << 5;

/// A dependency (transitively) might have changed; must be confirmed by
/// reading observed computeds before a recompute is certain to be needed.
pub const POSSIBLY_STALE: u32 = 1 << 6;

/// A dependency is known to have changed; recompute is required.
pub const STALE: u32 = 1 << 7;

// =============================================================================
// LIFECYCLE / BOOKKEEPING FLAGS
// =============================================================================

/// Node has been disposed/suspended and must not be reused.
pub const DESTROYED: u32 = 1 << 8;

/// ComputedValue is currently inside its own getter (cycle guard).
pub const IS_COMPUTING: u32 = 1 << 9;

/// ComputedValue is currently inside its own setter (cycle guard).
pub const IS_RUNNING_SETTER: u32 = 1 << 10;

/// ComputedValue keeps its observing set even with zero observers.
pub const KEEP_ALIVE: u32 = 1 << 11;

/// Reaction is queued in SharedState's pending_reactions list.
pub const SCHEDULED: u32 = 1 << 12;

/// Reaction is currently executing its tracked function.
pub const IS_RUNNING: u32 = 1 << 13;

/// Observable is queued in SharedState's pending_unobservations list.
pub const PENDING_UNOBSERVATION: u32 = 1 << 14;

/// Observable currently has at least one observer.
pub const BEING_OBSERVED: u32 = 1 << 15;

// =============================================================================
// STATUS MASK
// =============================================================================

/// Mask to clear all four dependency-state bits, leaving kind/lifecycle bits.
pub const STATUS_MASK: u32 = !(NOT_TRACKING | UP_TO_DATE | POSSIBLY_STALE | STALE);

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_distinct() {
        let all_flags = [
            ATOM,
            OBSERVABLE_VALUE,
            COMPUTED,
            REACTION,
            NOT_TRACKING,
            UP_TO_DATE,
            POSSIBLY_STALE,
            STALE,
            DESTROYED,
            IS_COMPUTING,
            IS_RUNNING_SETTER,
            KEEP_ALIVE,
            SCHEDULED,
            IS_RUNNING,
            PENDING_UNOBSERVATION,
            BEING_OBSERVED,
        ];

        for (i, &a) in all_flags.iter().enumerate() {
            for (j, &b) in all_flags.iter().enumerate() {
                if i != j {
                    assert_eq!(a & b, 0, "flags at {} and {} overlap", i, j);
                }
            }
        }
    }

    #[test]
    fn status_mask_clears_only_status_bits() {
        let flags = COMPUTED | STALE | KEEP_ALIVE;
        let cleared = flags & STATUS_MASK;

        assert_eq!(cleared & STALE, 0);
        assert_ne!(cleared & COMPUTED, 0);
        assert_ne!(cleared & KEEP_ALIVE, 0);
    }

    #[test]
    fn can_transition_status() {
        let mut flags = COMPUTED | UP_TO_DATE;
        flags = (flags & STATUS_MASK) | POSSIBLY_STALE;
        assert_ne!(flags & COMPUTED, 0);
        assert_ne!(flags & POSSIBLY_STALE, 0);
        assert_eq!(flags & UP_TO_DATE, 0);
    }
}
