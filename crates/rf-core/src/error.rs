//! # AppError
//!
//! Centralized error handling for the Rusty-Forum ecosystem.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;

/// The primary error type for all rf-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Resource not found (e.g., Topic, Post, User)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., empty title, mismatched passwords)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing or invalid credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but the role lacks the capability
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Infrastructure failure (e.g., DB down, hashing failure)
    #[error("internal service error: {0}")]
    Internal(String),

    /// Unique constraint hit (e.g., duplicate username, duplicate vote)
    #[error("conflict: {0}")]
    Conflict(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        AppError::NotFound(entity.to_string(), id.to_string())
    }
}

/// A specialized Result type for Rusty-Forum logic.
pub type Result<T> = std::result::Result<T, AppError>;
