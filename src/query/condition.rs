//! # Field Conditions
//!
//! A condition is either a plain equality (`"field": value`) or an object
//! of `$`-operators (`"field": {"$gt": 18}`). Operators are parsed once at
//! subscribe time; regex patterns are compiled here too.

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use tracing::warn;

use super::errors::{QueryError, QueryResult};
use super::pointer::{pointer_id, values_equal};

const REGEX: &str = "$regex";
const OPTIONS: &str = "$options";

/// One comparison operator applied to a single field
#[derive(Debug, Clone)]
pub enum Operator {
    /// `$exists`: presence of the key, a stored `null` counts as present
    Exists(bool),
    /// `$ne`: absent and `null` are the same thing
    NotEqual(Value),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    /// `$in`
    In(Vec<Value>),
    /// `$nin`
    NotIn(Vec<Value>),
    /// `$regex`, with optional `$options`
    Regex(Regex),
    /// `$all`: set equality with the field's array, order-independent
    All(Vec<Value>),
    /// Anything the matcher cannot evaluate. Never matches.
    Unsupported(String),
}

/// A condition on one field of a record
#[derive(Debug, Clone)]
pub enum Condition {
    Equals(Value),
    Operators(Vec<Operator>),
}

impl Condition {
    /// Parses the right-hand side of a `where` entry.
    pub fn parse(value: &Value) -> QueryResult<Self> {
        match value.as_object() {
            Some(obj) if is_operator_object(obj) => {
                let mut operators = Vec::with_capacity(obj.len());
                for (op, operand) in obj {
                    if op == OPTIONS {
                        continue;
                    }
                    operators.push(Operator::parse(op, operand, obj.get(OPTIONS))?);
                }
                // `$options` only modifies a sibling `$regex`
                if obj.contains_key(OPTIONS) && !obj.contains_key(REGEX) {
                    warn!("$options without $regex");
                    operators.push(Operator::Unsupported(OPTIONS.to_string()));
                }
                Ok(Condition::Operators(operators))
            }
            _ => Ok(Condition::Equals(value.clone())),
        }
    }

    /// Evaluates the condition against `field` of `record`.
    pub fn matches(&self, record: &Map<String, Value>, field: &str) -> bool {
        match self {
            Condition::Equals(expected) => equals_null_aware(record.get(field), expected),
            Condition::Operators(ops) => ops.iter().all(|op| op.matches(record, field)),
        }
    }

    /// The equality operand when this condition can key the fast index:
    /// a scalar or a pointer.
    pub fn indexable_value(&self) -> Option<&Value> {
        match self {
            Condition::Equals(value) if is_indexable(value) => Some(value),
            _ => None,
        }
    }
}

fn is_indexable(value: &Value) -> bool {
    match value {
        Value::Object(_) => pointer_id(value).is_some(),
        Value::Array(_) => false,
        _ => true,
    }
}

fn is_operator_object(obj: &Map<String, Value>) -> bool {
    !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'))
}

/// Absent fields compare as `null`.
fn equals_null_aware(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    if expected.is_null() || actual.is_null() {
        return expected.is_null() && actual.is_null();
    }
    values_equal(actual, expected)
}

impl Operator {
    fn parse(op: &str, operand: &Value, options: Option<&Value>) -> QueryResult<Self> {
        let parsed = match op {
            "$exists" => operand.as_bool().map(Operator::Exists),
            "$ne" => Some(Operator::NotEqual(operand.clone())),
            "$gt" => operand.as_f64().map(Operator::Gt),
            "$gte" => operand.as_f64().map(Operator::Gte),
            "$lt" => operand.as_f64().map(Operator::Lt),
            "$lte" => operand.as_f64().map(Operator::Lte),
            "$in" => operand.as_array().map(|list| Operator::In(list.clone())),
            "$nin" => operand.as_array().map(|list| Operator::NotIn(list.clone())),
            "$all" => operand.as_array().map(|list| Operator::All(list.clone())),
            REGEX => match operand.as_str() {
                Some(pattern) => Some(Operator::Regex(compile_pattern(pattern, options)?)),
                None => None,
            },
            _ => {
                warn!(operator = op, "Unsupported operator");
                return Ok(Operator::Unsupported(op.to_string()));
            }
        };

        Ok(parsed.unwrap_or_else(|| {
            warn!(operator = op, operand = %operand, "Operand has the wrong type");
            Operator::Unsupported(op.to_string())
        }))
    }

    fn matches(&self, record: &Map<String, Value>, field: &str) -> bool {
        let value = record.get(field);
        match self {
            Operator::Exists(expected) => value.is_some() == *expected,
            Operator::NotEqual(expected) => !equals_null_aware(value, expected),
            Operator::Gt(bound) => numeric(value).map_or(false, |v| v > *bound),
            Operator::Gte(bound) => numeric(value).map_or(false, |v| v >= *bound),
            Operator::Lt(bound) => numeric(value).map_or(false, |v| v < *bound),
            Operator::Lte(bound) => numeric(value).map_or(false, |v| v <= *bound),
            Operator::In(list) => list.iter().any(|item| equals_null_aware(value, item)),
            Operator::NotIn(list) => !list.iter().any(|item| equals_null_aware(value, item)),
            Operator::Regex(re) => value
                .and_then(Value::as_str)
                .map_or(false, |s| re.is_match(s)),
            Operator::All(expected) => match value.and_then(Value::as_array) {
                Some(actual) => same_members(expected, actual),
                None => false,
            },
            Operator::Unsupported(_) => false,
        }
    }
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn same_members(a: &[Value], b: &[Value]) -> bool {
    a.iter().all(|x| b.iter().any(|y| values_equal(x, y)))
        && b.iter().all(|y| a.iter().any(|x| values_equal(x, y)))
}

/// Compiles a `$regex` operand.
///
/// Some client SDKs quote literal substrings as `\Q...\E`, which the
/// `regex` crate does not understand; those spans are escaped before
/// compiling.
fn compile_pattern(pattern: &str, options: Option<&Value>) -> QueryResult<Regex> {
    let translated = translate_quoted_spans(pattern);
    let mut builder = RegexBuilder::new(&translated);
    if let Some(flags) = options.and_then(Value::as_str) {
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                other => warn!(flag = %other, "Ignoring unknown $options flag"),
            }
        }
    }
    builder
        .build()
        .map_err(|e| QueryError::InvalidPattern(e.to_string()))
}

fn translate_quoted_spans(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find("\\Q") {
        out.push_str(&rest[..start]);
        let quoted = &rest[start + 2..];
        match quoted.find("\\E") {
            Some(end) => {
                out.push_str(&regex::escape(&quoted[..end]));
                rest = &quoted[end + 2..];
            }
            None => {
                out.push_str(&regex::escape(quoted));
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
