//! Error taxonomy for the session and match core.
//!
//! Core operations return [`CoreError`] to their caller (the REPL layer),
//! which owns user-visible messaging. A failed operation never leaves
//! in-memory state out of step with what was persisted.

use crate::guard::ActionKey;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The operation needs a signed-in user and there is none.
    #[error("No user is signed in")]
    NoUser,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A write or remove against the local store failed.
    #[error("Failed to persist '{key}' to local storage")]
    Storage { key: &'static str },

    /// The same logical action is already in flight.
    #[error("Already in progress: {0}")]
    Busy(ActionKey),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn storage(key: &'static str) -> Self {
        tracing::error!(key, "local storage write failed");
        Self::Storage { key }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
