//! Error types shared by the store, the command handlers and the UI.

use std::io;

/// Everything that can go wrong while reading or mutating the entity store.
///
/// `Validation` and `NotFound` are raised before any mutation is applied, so a
/// caller seeing either of them can rely on the store being untouched.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Missing or blank field, conflicting parents, cross-entity mismatch, bad date.
    #[error("{0}")]
    Validation(String),

    /// Update or delete target does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("storage error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

#[cfg(test)]
impl FlowError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
