// ── Core error types ──
//
// Lookup and relationship errors are returned to callers and leave the
// cache usable. Anything surfaced by the apply loop is fatal to the
// controller that produced it.

use thiserror::Error;

/// Unified error type for the cache crate.
///
/// `Clone` so a worker's terminal error can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("{kind} {key:?} not found")]
    NotFound { kind: String, key: String },

    #[error("machine {machine} not provisioned")]
    NotProvisioned { machine: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{message} not valid")]
    NotValid { message: String },

    #[error("inconsistent cache state: {message}")]
    Inconsistent { message: String },

    // ── Apply loop errors (fatal) ────────────────────────────────────
    #[error("applying change failed: {message}")]
    Apply { message: String },

    #[error("{stream} channel closed unexpectedly")]
    StreamClosed { stream: String },

    #[error("controller stopped")]
    Stopped,

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub(crate) fn not_found(kind: &str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_not_provisioned(&self) -> bool {
        matches!(self, Self::NotProvisioned { .. })
    }

    pub fn is_not_valid(&self) -> bool {
        matches!(self, Self::NotValid { .. })
    }
}
