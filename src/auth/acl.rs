//! # Record Access Control
//!
//! Read permissions embedded in a record under its `ACL` key:
//!
//! ```json
//! {"*": {"read": true}, "u1": {"read": true, "write": true}}
//! ```
//!
//! A record without an ACL is unrestricted. Only read grants matter here.

use std::collections::HashMap;

use serde_json::Value;

pub const ACL: &str = "ACL";
const PUBLIC: &str = "*";
const READ: &str = "read";

/// Parsed read grants of one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessControlList {
    readers: HashMap<String, bool>,
}

impl AccessControlList {
    /// Parses an `ACL` value.
    ///
    /// A malformed value yields an empty list, which grants nothing.
    pub fn from_value(value: &Value) -> Self {
        let readers = value
            .as_object()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(who, perms)| {
                        let read = perms.get(READ).and_then(Value::as_bool).unwrap_or(false);
                        (who.clone(), read)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { readers }
    }

    /// Reads the `ACL` key of a record, if present.
    pub fn of_record(record: &Value) -> Option<Self> {
        record.get(ACL).filter(|v| !v.is_null()).map(Self::from_value)
    }

    pub fn is_publicly_readable(&self) -> bool {
        self.readers.get(PUBLIC).copied().unwrap_or(false)
    }

    pub fn is_readable_by(&self, identity: &str) -> bool {
        self.is_publicly_readable() || self.readers.get(identity).copied().unwrap_or(false)
    }
}

/// Public readability of a record's optional ACL
pub fn is_publicly_readable(acl: Option<&AccessControlList>) -> bool {
    acl.map_or(true, AccessControlList::is_publicly_readable)
}

/// Readability of a record's optional ACL for one identity
pub fn is_readable_by(acl: Option<&AccessControlList>, identity: &str) -> bool {
    acl.map_or(true, |acl| acl.is_readable_by(identity))
}
