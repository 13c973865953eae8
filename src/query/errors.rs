//! # Query Errors
//!
//! Errors raised while parsing a client-supplied query.

use thiserror::Error;

/// Result type for query parsing
pub type QueryResult<T> = Result<T, QueryError>;

/// Query parsing errors
///
/// Only structural problems are errors. An operator the matcher does not
/// understand is accepted and simply never matches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Query is not a JSON object
    #[error("Query must be an object")]
    NotAnObject,

    /// `className` missing or not a string
    #[error("Query is missing className")]
    MissingClassName,

    /// `where` present but not an object
    #[error("Query where clause must be an object")]
    InvalidWhere,

    /// `fields` present but not an array of strings
    #[error("Query fields must be an array of strings")]
    InvalidFields,

    /// `$or` is not an array of objects
    #[error("$or must be an array of objects")]
    InvalidDisjunction,

    /// `$regex` pattern failed to compile
    #[error("Invalid $regex pattern: {0}")]
    InvalidPattern(String),
}
