//! Patch recording, undo and redo.
//!
//! While [`Runtime::produce`] runs, every accepted container write is
//! recorded as a [`Patch`] addressed by its path from the outermost known
//! container. Patches carry deep JSON copies of the values involved, so
//! they can be stored, sent over the wire and replayed later against the
//! same document with [`apply_patches`] (redo) or [`undo_patches`].

use serde::{Deserialize, Serialize};

use super::{EditingMode, GateGuard};
use crate::error::{ReactiveError, Result};
use crate::graph::{CompositeKind, PropKey, Target, Value};
use crate::reactive::{Reactive, Runtime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
    Add,
    Remove,
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: Vec<PropKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
}

impl Patch {
    /// The patch that reverts this one.
    pub fn invert(&self) -> Patch {
        let op = match self.op {
            PatchOp::Replace => PatchOp::Replace,
            PatchOp::Add => PatchOp::Remove,
            PatchOp::Remove => PatchOp::Add,
        };
        Patch {
            op,
            path: self.path.clone(),
            new_value: self.old_value.clone(),
            old_value: self.new_value.clone(),
        }
    }
}

/// Record a write to `key` of `target` if a `produce` call is recording.
pub(crate) fn record_mutation(
    runtime: &Runtime,
    target: &Target,
    op: PatchOp,
    key: &PropKey,
    new_value: Option<&Value>,
    old_value: Option<&Value>,
) {
    if !runtime.is_recording() {
        return;
    }
    let mut path = target.path();
    path.push(key.clone());
    runtime.push_patch(Patch {
        op,
        path,
        new_value: new_value.map(Value::to_json),
        old_value: old_value.map(Value::to_json),
    });
}

impl Runtime {
    /// Run `f` as a recorded transaction and return the patches it produced.
    ///
    /// If a transaction is already open, `f` joins it unrecorded and the
    /// result is empty.
    pub fn produce(&self, f: impl FnOnce()) -> Vec<Patch> {
        if self.is_mutating() {
            tracing::warn!("produce() called inside an open transaction; nothing is recorded");
            f();
            return Vec::new();
        }
        let guard = GateGuard::open(self, EditingMode::Update, true);
        f();
        guard.finish()
    }
}

/// Replay `patches` against `root`. Effects fire as for any other write.
pub fn apply_patches(root: &Reactive, patches: &[Patch]) -> Result<()> {
    let runtime = root.runtime();
    if runtime.is_mutating() {
        return Err(ReactiveError::TransactionOpen);
    }
    let guard = GateGuard::open(runtime, EditingMode::UndoRedo, false);
    let applied = runtime.untracked(|| {
        patches
            .iter()
            .try_for_each(|patch| apply_patch(root, patch))
    });
    guard.finish();
    applied
}

/// Revert `patches`, newest first.
pub fn undo_patches(root: &Reactive, patches: &[Patch]) -> Result<()> {
    let inverted: Vec<Patch> = patches.iter().rev().map(Patch::invert).collect();
    apply_patches(root, &inverted)
}

fn apply_patch(root: &Reactive, patch: &Patch) -> Result<()> {
    let invalid = || ReactiveError::InvalidPatchPath {
        path: patch.path.clone(),
    };
    let (key, parents) = patch.path.split_last().ok_or_else(invalid)?;

    let mut base = root.clone();
    for segment in parents {
        base = match base.get(segment.clone())? {
            Value::Reactive(next) => next,
            _ => return Err(invalid()),
        };
    }

    let value = patch.new_value.clone().map(Value::from).unwrap_or_default();
    match (patch.op, base.kind()) {
        (PatchOp::Replace | PatchOp::Add, CompositeKind::Set) => {
            base.add(key.clone())?;
        }
        (PatchOp::Replace | PatchOp::Add, _) => base.set(key.clone(), value)?,
        (PatchOp::Remove, CompositeKind::Array) => {
            let index = key.as_index().ok_or_else(invalid)?;
            base.splice(index, 1, Vec::<Value>::new())?;
        }
        (PatchOp::Remove, _) => {
            base.delete(key.clone())?;
        }
    }
    Ok(())
}
