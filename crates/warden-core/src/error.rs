//! Component error types.
//!
//! Every boundary returns a tagged status; internal code may bubble native
//! errors, caught and classified at the component boundary. The taxonomy:
//! input errors surface as the enums below or enumerated RPC statuses,
//! policy outcomes as [`crate::approval::ResolveStatus`] and denied
//! receipts, and budget/capacity/internal failures as the closed
//! [`crate::types::FailReason`] set on terminal events.

use thiserror::Error;

/// Tool-tree registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown tool path: {0}")]
    NotFound(String),

    #[error("tool path already registered: {0}")]
    Duplicate(String),

    #[error("invalid tool path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid input schema for '{path}': {reason}")]
    InvalidSchema { path: String, reason: String },
}

/// Failure opening a pending approval. Duplicate call ids are a caller bug
/// and fail fast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("approval already pending for call {0}")]
    AlreadyPending(String),
}
