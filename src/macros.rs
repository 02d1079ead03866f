// ============================================================================
// transparent-reactive - Ergonomic Macros
// ============================================================================

/// Helper macro to clone variables into a move closure.
///
/// This reduces the boilerplate of manually cloning `Rc`-backed observables
/// before moving them into a closure.
///
/// # Usage
///
/// ```rust
/// use transparent_reactive::{cloned, observable, computed};
///
/// let a = observable(1);
/// let b = observable(2);
///
/// // Instead of:
/// // let a_clone = a.clone();
/// // let b_clone = b.clone();
/// // computed(move || a_clone.get() + b_clone.get());
///
/// // Use:
/// let sum = computed(cloned!(a, b => move || a.get() + b.get()));
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}
