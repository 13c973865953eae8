//! # Query Predicates
//!
//! A [`QueryPredicate`] is the parsed form of the `query` object a client
//! sends with `subscribe`:
//!
//! ```json
//! {"className": "Song", "where": {"objectId": "CqjsImPeAd"}}
//! {"className": "Song", "where": {"user": {"__type": "Pointer", "className": "_User", "objectId": "Nj9CEXFvIm"}}}
//! {"className": "Song", "where": {"$or": [{"objectId": "A"}, {"objectId": "B"}]}}
//! {"className": "_User", "where": {"age": {"$gt": 18}}, "fields": ["name"]}
//! ```
//!
//! Predicates are immutable once parsed. Two predicates with the same class
//! and the same `where` tree (regardless of key order) share one
//! [`PredicateKey`], which is what the registry deduplicates on.

use serde_json::{Map, Value};
use tracing::warn;

use super::condition::{Condition, Operator};
use super::errors::{QueryError, QueryResult};
use super::pointer::{canonical_json, pointer_id, CLASS_NAME};

const WHERE: &str = "where";
const FIELDS: &str = "fields";
const OR: &str = "$or";

/// Value-based identity of a predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateKey {
    pub class_name: String,
    pub filter: String,
}

/// A `field -> condition` pair
#[derive(Debug, Clone)]
struct FieldCondition {
    field: String,
    condition: Condition,
}

/// Parsed `where` clause: top-level entries are ANDed, and when `$or` is
/// present at least one of its clauses must also hold.
#[derive(Debug, Clone)]
struct Filter {
    conjuncts: Vec<FieldCondition>,
    disjunction: Option<Vec<Vec<FieldCondition>>>,
}

/// A parsed subscription query
#[derive(Debug, Clone)]
pub struct QueryPredicate {
    class_name: String,
    fields: Option<Vec<String>>,
    filter: Filter,
    key: PredicateKey,
}

impl QueryPredicate {
    /// Parses a client `query` object.
    pub fn parse(query: &Value) -> QueryResult<Self> {
        let obj = query.as_object().ok_or(QueryError::NotAnObject)?;

        let class_name = obj
            .get(CLASS_NAME)
            .and_then(Value::as_str)
            .ok_or(QueryError::MissingClassName)?
            .to_string();

        let empty = Value::Object(Map::new());
        let where_value = match obj.get(WHERE) {
            None | Some(Value::Null) => &empty,
            Some(v @ Value::Object(_)) => v,
            Some(_) => return Err(QueryError::InvalidWhere),
        };

        let fields = match obj.get(FIELDS) {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|f| f.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(QueryError::InvalidFields)?,
            ),
            Some(_) => return Err(QueryError::InvalidFields),
        };

        let filter = Filter::parse(where_value)?;
        let key = PredicateKey {
            class_name: class_name.clone(),
            filter: canonical_json(where_value),
        };

        Ok(Self {
            class_name,
            fields,
            filter,
            key,
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Field projection requested by the client, if any
    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn key(&self) -> &PredicateKey {
        &self.key
    }

    /// True iff the filter is a single equality on a scalar or a pointer.
    pub fn is_simple(&self) -> bool {
        self.simple_predicate().is_some()
    }

    /// The `(field, value)` pair of a simple predicate. A pointer operand is
    /// reported as its referenced `objectId`.
    pub fn simple_predicate(&self) -> Option<(&str, Value)> {
        if self.filter.disjunction.is_some() || self.filter.conjuncts.len() != 1 {
            return None;
        }
        let entry = &self.filter.conjuncts[0];
        let value = entry.condition.indexable_value()?;
        let value = match pointer_id(value) {
            Some(id) => Value::String(id.to_string()),
            None => value.clone(),
        };
        Some((entry.field.as_str(), value))
    }

    /// Whether `record` belongs to this predicate's class and satisfies its
    /// filter. An absent record never matches.
    pub fn evaluate(&self, record: Option<&Value>) -> bool {
        let Some(obj) = record.and_then(Value::as_object) else {
            return false;
        };
        if obj.get(CLASS_NAME).and_then(Value::as_str) != Some(self.class_name.as_str()) {
            return false;
        }
        self.filter.matches(obj)
    }
}

impl PartialEq for QueryPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueryPredicate {}

impl std::hash::Hash for QueryPredicate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Display for QueryPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key.class_name, self.key.filter)
    }
}

impl Filter {
    fn parse(where_value: &Value) -> QueryResult<Self> {
        let mut conjuncts = Vec::new();
        let mut disjunction = None;

        if let Some(obj) = where_value.as_object() {
            for (field, value) in obj {
                if field == OR {
                    disjunction = Some(parse_disjunction(value)?);
                } else {
                    conjuncts.push(FieldCondition::parse(field, value)?);
                }
            }
        }

        Ok(Self {
            conjuncts,
            disjunction,
        })
    }

    fn matches(&self, record: &Map<String, Value>) -> bool {
        if !all_hold(&self.conjuncts, record) {
            return false;
        }
        match &self.disjunction {
            Some(clauses) => clauses.iter().any(|clause| all_hold(clause, record)),
            None => true,
        }
    }
}

fn parse_disjunction(value: &Value) -> QueryResult<Vec<Vec<FieldCondition>>> {
    let clauses = value.as_array().ok_or(QueryError::InvalidDisjunction)?;
    clauses
        .iter()
        .map(|clause| {
            let obj = clause.as_object().ok_or(QueryError::InvalidDisjunction)?;
            obj.iter()
                .map(|(field, value)| FieldCondition::parse(field, value))
                .collect()
        })
        .collect()
}

// Short-circuits on the first failing entry.
fn all_hold(conditions: &[FieldCondition], record: &Map<String, Value>) -> bool {
    conditions
        .iter()
        .all(|fc| fc.condition.matches(record, &fc.field))
}

impl FieldCondition {
    fn parse(field: &str, value: &Value) -> QueryResult<Self> {
        let condition = if field.starts_with('$') {
            warn!(operator = field, "Unsupported top-level operator");
            Condition::Operators(vec![Operator::Unsupported(field.to_string())])
        } else {
            Condition::parse(value)?
        };
        Ok(Self {
            field: field.to_string(),
            condition,
        })
    }
}
