//! # Real-Time Errors
//!
//! Error types for the live-query protocol and change ingestion.

use thiserror::Error;

use crate::query::QueryError;

/// Result type for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Real-time errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    // ==================
    // Protocol Errors
    // ==================
    /// Client payload could not be decoded
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Subscribe/update carried an unusable query
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Operation sent before `connect`
    #[error("Can't find this client")]
    ClientNotFound,

    /// Operation name not recognised
    #[error("Unknown operation {0}")]
    UnknownOperation(String),

    /// `connect` carried the wrong application id
    #[error("Key in request is not valid")]
    InvalidApplicationId,

    // ==================
    // Ingestion Errors
    // ==================
    /// Upstream change message missing required parts
    #[error("Invalid change event: {0}")]
    InvalidEvent(String),

    /// Change feed workers are gone
    #[error("Change feed closed")]
    FeedClosed,

    /// Upstream pub/sub source could not be set up
    #[error("Upstream error: {0}")]
    Upstream(String),

    // ==================
    // Server Errors
    // ==================
    /// Could not attach to a live subscription for the query
    #[error("Subscription unavailable, retry later")]
    SubscriptionUnavailable,
}

impl RealtimeError {
    /// Returns the wire error code sent to clients
    pub fn protocol_code(&self) -> u16 {
        match self {
            RealtimeError::InvalidMessage(_) => 1,
            RealtimeError::InvalidQuery(_) => 1,
            RealtimeError::ClientNotFound => 2,
            RealtimeError::UnknownOperation(_) => 3,
            RealtimeError::InvalidApplicationId => 4,
            RealtimeError::InvalidEvent(_) => 1,
            RealtimeError::FeedClosed => 100,
            RealtimeError::Upstream(_) => 100,
            RealtimeError::SubscriptionUnavailable => 100,
        }
    }

    /// Whether the client should reconnect after this error
    pub fn reconnect(&self) -> bool {
        !matches!(self, RealtimeError::InvalidApplicationId)
    }
}
