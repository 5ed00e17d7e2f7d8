//! Reactive Context
//!
//! Guards that maintain the runtime's stacks. Each guard pushes on
//! construction and pops when dropped, so the stacks stay balanced even
//! when user code panics and the panic is propagated.

use super::effect::Effect;
use super::runtime::Runtime;
use super::scope::EffectScope;

/// An effect run in progress.
///
/// While this guard is alive the effect is the active subscriber and reads
/// are tracked. Dropping it reconciles the effect's dependencies, restores
/// the tracking state and pops the effect stack.
pub(crate) struct ReactiveContext<'a> {
    runtime: &'a Runtime,
    effect: Effect,
}

impl<'a> ReactiveContext<'a> {
    pub fn enter(runtime: &'a Runtime, effect: Effect) -> Self {
        effect.begin_tracking();
        runtime.push_effect(effect.clone());
        runtime.enable_tracking();
        Self { runtime, effect }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        self.effect.finish_tracking();
        self.runtime.reset_tracking();
        let popped = self.runtime.pop_effect();

        // Verify we're popping the right effect.
        if let Some(popped) = popped {
            debug_assert_eq!(
                popped.id(),
                self.effect.id(),
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.effect.id(),
                popped.id()
            );
        }
    }
}

/// Reads are not tracked while this guard is alive.
pub(crate) struct TrackingPause<'a> {
    runtime: &'a Runtime,
}

impl<'a> TrackingPause<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        runtime.pause_tracking();
        Self { runtime }
    }
}

impl Drop for TrackingPause<'_> {
    fn drop(&mut self) {
        self.runtime.reset_tracking();
    }
}

/// The scope is current while this guard is alive.
pub(crate) struct ScopeContext {
    scope: EffectScope,
}

impl ScopeContext {
    pub fn enter(scope: &EffectScope) -> Self {
        scope.on();
        Self {
            scope: scope.clone(),
        }
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        self.scope.off();
    }
}
