//! Error types and the handler for panics raised by user code.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::config::ErrorPolicy;
use crate::graph::{CompositeKind, PropKey};

/// Errors returned to callers of the container and patch APIs.
#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error("expected {expected} container, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: CompositeKind,
    },

    #[error("key `{key}` is not valid for a {kind} container")]
    InvalidKey { key: PropKey, kind: CompositeKind },

    #[error("patch path {path:?} does not resolve to a container")]
    InvalidPatchPath { path: Vec<PropKey> },

    #[error("cannot apply patches while a transaction is open")]
    TransactionOpen,

    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// The call site at which user code panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    EffectFunction,
    EffectStop,
    WatchGetter,
    WatchCallback,
    WatchCleanup,
    ScopeCleanup,
    Scheduler,
    TransactionEnd,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCode::EffectFunction => "effect function",
            ErrorCode::EffectStop => "effect stop hook",
            ErrorCode::WatchGetter => "watcher getter",
            ErrorCode::WatchCallback => "watcher callback",
            ErrorCode::WatchCleanup => "watcher cleanup function",
            ErrorCode::ScopeCleanup => "scope dispose callback",
            ErrorCode::Scheduler => "effect scheduler",
            ErrorCode::TransactionEnd => "transaction end callback",
        })
    }
}

/// Run `f`, routing a panic to [`handle_error`]. Returns `None` if it panicked
/// and the policy let execution continue.
pub(crate) fn call_with_error_handling<R>(
    policy: ErrorPolicy,
    code: ErrorCode,
    f: impl FnOnce() -> R,
) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            handle_error(policy, code, payload);
            None
        }
    }
}

pub(crate) fn handle_error(policy: ErrorPolicy, code: ErrorCode, payload: Box<dyn Any + Send>) {
    match policy {
        ErrorPolicy::Propagate => {
            tracing::warn!(%code, "unhandled error during execution of {code}");
            panic::resume_unwind(payload)
        }
        ErrorPolicy::Log => {
            tracing::error!(
                %code,
                panic = panic_message(payload.as_ref()),
                "unhandled error during execution of {code}"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
