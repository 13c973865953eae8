//! # Auth Errors
//!
//! Error types for access checks and identity resolution.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Identity resolution errors
///
/// None of these abort a fan-out. The caller treats every variant as
/// "not readable" for the one delivery it was checking.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Lookup did not finish within the configured timeout
    #[error("Session lookup timed out")]
    Timeout,

    /// Session service could not be reached or returned garbage
    #[error("Session lookup failed: {0}")]
    LookupFailed(String),

    /// Session service answered with a non-success status
    #[error("Session service returned status {0}")]
    UnexpectedStatus(u16),
}
