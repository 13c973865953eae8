//! # Query Matching
//!
//! Parses subscription queries and evaluates records against them.
//!
//! Supported filter shapes:
//! - single-field equality (scalar or pointer), eligible for the fast index
//! - conjunction of field equalities and operator conditions
//! - `$or` of conjunctions
//!
//! Supported operators: `$exists`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$in`, `$nin`, `$regex` (with `$options`), `$all`.

pub mod condition;
pub mod errors;
pub mod pointer;
pub mod predicate;

pub use condition::{Condition, Operator};
pub use errors::{QueryError, QueryResult};
pub use pointer::{pointer_id, IndexValue, CLASS_NAME, OBJECT_ID};
pub use predicate::{PredicateKey, QueryPredicate};
