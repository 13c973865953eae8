//! Record field helpers shared by the matcher and the subscription index.

use std::hash::{Hash, Hasher};

use serde_json::Value;

pub const CLASS_NAME: &str = "className";
pub const OBJECT_ID: &str = "objectId";
pub const TYPE: &str = "__type";
pub const POINTER: &str = "Pointer";

/// Returns the referenced `objectId` if `value` is a pointer object.
///
/// A pointer is an object tagged `"__type": "Pointer"`, or an untagged
/// object carrying both `className` and `objectId`.
pub fn pointer_id(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    let tagged = obj.get(TYPE).and_then(Value::as_str) == Some(POINTER);
    if !tagged && !obj.contains_key(CLASS_NAME) {
        return None;
    }
    obj.get(OBJECT_ID).and_then(Value::as_str)
}

/// Equality used by the matcher.
///
/// Numbers compare numerically, a pointer compares by its referenced id
/// against either another pointer or a plain string.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (pointer_id(a), pointer_id(b)) {
        (Some(x), Some(y)) => return x == y,
        (Some(x), None) => return b.as_str() == Some(x),
        (None, Some(y)) => return a.as_str() == Some(y),
        (None, None) => {}
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Serializes a JSON value with object keys in sorted order.
///
/// Used for hashing predicates and index values independently of the
/// key order a client happened to send.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Key under which a field value is stored in the fast subscription index.
///
/// Pointers collapse to their referenced id, so a subscription on
/// `user == <pointer to X>` and a record whose `user` points at `X` land on
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexValue(String);

impl IndexValue {
    pub fn of(value: &Value) -> Self {
        if let Some(id) = pointer_id(value) {
            return Self(Value::String(id.to_string()).to_string());
        }
        match value.as_f64() {
            // 3 and 3.0 compare equal, so they must share a key
            Some(n) => Self(n.to_string()),
            _ => Self(canonical_json(value)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Hash for IndexValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
