//! Mutation Gate
//!
//! Container writes are only accepted while a transaction is open. The gate
//! is a small state machine:
//!
//! ```text
//!   None ──begin──▶ Update ──end──▶ None ─▶ on-end hooks
//!   None ──apply_patches──▶ UndoRedo ──end──▶ None ─▶ on-end hooks
//! ```
//!
//! Writes attempted while the gate is `None` leave the container untouched
//! and trigger nothing, but still report success to the caller.

mod patch;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use patch::{apply_patches, undo_patches, Patch, PatchOp};
pub(crate) use patch::record_mutation;

use crate::error::ErrorCode;
use crate::reactive::Runtime;

/// Who is editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditingMode {
    /// Gate closed.
    #[default]
    None,
    /// A regular edit transaction.
    Update,
    /// Patches being replayed by undo or redo. Not recorded.
    UndoRedo,
}

type EndHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct Gate {
    mode: EditingMode,
    recording: Option<Vec<Patch>>,
    on_end: Vec<EndHook>,
}

impl Runtime {
    /// Open the gate for a regular edit.
    pub fn begin_transaction(&self) {
        self.open_gate(EditingMode::Update, false);
    }

    /// Close the gate and run every on-end hook.
    pub fn end_transaction(&self) {
        self.close_gate();
    }

    /// Register a hook that runs every time the gate closes.
    pub fn on_transaction_end(&self, f: impl Fn() + Send + Sync + 'static) {
        self.0.gate.lock().on_end.push(Arc::new(f));
    }

    /// Whether container writes are currently accepted.
    pub fn is_mutating(&self) -> bool {
        self.editing_mode() != EditingMode::None
    }

    pub fn editing_mode(&self) -> EditingMode {
        self.0.gate.lock().mode
    }

    /// Run `f` inside a transaction. If one is already open, `f` joins it and
    /// the gate is left open afterwards.
    pub fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = GateGuard::open(self, EditingMode::Update, false);
        let result = f();
        guard.finish();
        result
    }

    /// Returns false, leaving the state alone, if the gate was already open.
    pub(crate) fn open_gate(&self, mode: EditingMode, record: bool) -> bool {
        let mut gate = self.0.gate.lock();
        if gate.mode != EditingMode::None {
            tracing::warn!(current = ?gate.mode, requested = ?mode, "transaction is already open");
            return false;
        }
        gate.mode = mode;
        gate.recording = record.then(Vec::new);
        tracing::debug!(?mode, "transaction begin");
        true
    }

    /// Close the gate, returning whatever was recorded, then run the hooks.
    pub(crate) fn close_gate(&self) -> Vec<Patch> {
        let (patches, hooks) = self.reset_gate();
        tracing::debug!(patches = patches.len(), "transaction end");
        for hook in hooks {
            self.call(ErrorCode::TransactionEnd, || hook());
        }
        patches
    }

    fn reset_gate(&self) -> (Vec<Patch>, Vec<EndHook>) {
        let mut gate = self.0.gate.lock();
        gate.mode = EditingMode::None;
        let patches = gate.recording.take().unwrap_or_default();
        (patches, gate.on_end.clone())
    }

    pub(crate) fn is_recording(&self) -> bool {
        let gate = self.0.gate.lock();
        gate.mode == EditingMode::Update && gate.recording.is_some()
    }

    pub(crate) fn push_patch(&self, patch: Patch) {
        if let Some(recording) = self.0.gate.lock().recording.as_mut() {
            recording.push(patch);
        }
    }
}

/// Closes the gate it opened, also when unwinding. Hooks are skipped if the
/// transaction body panicked.
pub(crate) struct GateGuard<'a> {
    runtime: &'a Runtime,
    opened: bool,
}

impl<'a> GateGuard<'a> {
    pub fn open(runtime: &'a Runtime, mode: EditingMode, record: bool) -> Self {
        // A nested transaction joins the open one.
        let opened = !runtime.is_mutating() && runtime.open_gate(mode, record);
        Self { runtime, opened }
    }

    pub fn finish(mut self) -> Vec<Patch> {
        if std::mem::take(&mut self.opened) {
            self.runtime.close_gate()
        } else {
            Vec::new()
        }
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if self.opened {
            self.runtime.reset_gate();
            tracing::debug!("transaction aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn gate_starts_closed() {
        let rt = Runtime::new();
        assert!(!rt.is_mutating());
        assert_eq!(rt.editing_mode(), EditingMode::None);
    }

    #[test]
    fn begin_and_end_toggle_the_gate() {
        let rt = Runtime::new();
        rt.begin_transaction();
        assert_eq!(rt.editing_mode(), EditingMode::Update);
        rt.end_transaction();
        assert!(!rt.is_mutating());
    }

    #[test]
    fn begin_while_open_keeps_the_current_mode() {
        let rt = Runtime::new();
        assert!(rt.open_gate(EditingMode::UndoRedo, false));
        rt.begin_transaction();
        assert_eq!(rt.editing_mode(), EditingMode::UndoRedo);
        rt.end_transaction();
    }

    #[test]
    fn end_hooks_persist_across_transactions() {
        let rt = Runtime::new();
        let ends = Arc::new(AtomicI32::new(0));
        let ends_clone = ends.clone();
        rt.on_transaction_end(move || {
            ends_clone.fetch_add(1, Ordering::SeqCst);
        });

        rt.begin_transaction();
        rt.end_transaction();
        rt.transaction(|| {});
        assert_eq!(ends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn hooks_observe_a_closed_gate() {
        let rt = Runtime::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen_clone = seen.clone();
        let rt_clone = rt.clone();
        rt.on_transaction_end(move || {
            *seen_clone.lock() = Some(rt_clone.is_mutating());
        });

        rt.transaction(|| {});
        assert_eq!(*seen.lock(), Some(false));
    }

    #[test]
    fn nested_transaction_joins_the_outer_one() {
        let rt = Runtime::new();
        let ends = Arc::new(AtomicI32::new(0));
        let ends_clone = ends.clone();
        rt.on_transaction_end(move || {
            ends_clone.fetch_add(1, Ordering::SeqCst);
        });

        rt.transaction(|| {
            rt.transaction(|| {});
            assert!(rt.is_mutating());
        });
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_body_closes_the_gate_without_hooks() {
        let rt = Runtime::new();
        let ends = Arc::new(AtomicI32::new(0));
        let ends_clone = ends.clone();
        rt.on_transaction_end(move || {
            ends_clone.fetch_add(1, Ordering::SeqCst);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.transaction(|| panic!("edit failed"));
        }));
        assert!(result.is_err());
        assert!(!rt.is_mutating());
        assert_eq!(ends.load(Ordering::SeqCst), 0);
    }
}
