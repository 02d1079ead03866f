// ============================================================================
// transparent-reactive - Disposer
// A one-shot cancellation handle returned by autorun/reaction/when/intercept
// ============================================================================

/// A callable cleanup handle. Call `.dispose()` exactly once to tear down
/// whatever it was returned from (a reaction, an intercept subscription, a
/// `when`). Dropping it without calling `dispose()` leaks the subscription,
/// matching the explicit-disposal model described for reactions: nothing
/// is torn down implicitly on drop.
pub struct Disposer(Option<Box<dyn FnOnce()>>);

impl Disposer {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    pub fn dispose(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
