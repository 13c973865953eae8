//! # Real-Time Events
//!
//! Upstream change events and the event kinds pushed to clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{RealtimeError, RealtimeResult};
use crate::auth::acl::{self, AccessControlList};
use crate::query::{CLASS_NAME, OBJECT_ID};

const CURRENT_OBJECT: &str = "currentParseObject";
const ORIGINAL_OBJECT: &str = "originalParseObject";

/// `op` values pushed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connected,
    Subscribed,
    Unsubscribed,
    Create,
    Update,
    Enter,
    Leave,
    Delete,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Connected,
        EventKind::Subscribed,
        EventKind::Unsubscribed,
        EventKind::Create,
        EventKind::Update,
        EventKind::Enter,
        EventKind::Leave,
        EventKind::Delete,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Subscribed => "subscribed",
            EventKind::Unsubscribed => "unsubscribed",
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Enter => "enter",
            EventKind::Leave => "leave",
            EventKind::Delete => "delete",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Record created or updated
    Save,
    /// Record deleted
    Delete,
}

impl ChangeKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            ChangeKind::Save => "afterSave",
            ChangeKind::Delete => "afterDelete",
        }
    }

    /// Name of the upstream pub/sub channel for an application
    pub fn channel(&self, app_id: &str) -> String {
        format!("{}{}", app_id, self.suffix())
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        [ChangeKind::Save, ChangeKind::Delete]
            .into_iter()
            .find(|kind| kind.suffix() == suffix)
    }

    /// Inverse of [`ChangeKind::channel`]
    pub fn from_channel(app_id: &str, channel: &str) -> Option<Self> {
        channel.strip_prefix(app_id).and_then(Self::from_suffix)
    }
}

/// One upstream mutation of a record
///
/// `current` is absent for deletes; `original` is absent for creates.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub class_name: String,
    pub object_id: String,
    pub current: Option<Value>,
    pub original: Option<Value>,
    pub acl: Option<AccessControlList>,
}

impl ChangeEvent {
    /// Build a save event
    pub fn saved(current: Value, original: Option<Value>) -> RealtimeResult<Self> {
        let (class_name, object_id) = identify(&current)?;
        let acl = AccessControlList::of_record(&current);
        Ok(Self {
            kind: ChangeKind::Save,
            class_name,
            object_id,
            current: Some(current),
            original: original.filter(|o| !o.is_null()),
            acl,
        })
    }

    /// Build a delete event from the record as it was before deletion
    pub fn deleted(object: Value) -> RealtimeResult<Self> {
        let (class_name, object_id) = identify(&object)?;
        let acl = AccessControlList::of_record(&object);
        Ok(Self {
            kind: ChangeKind::Delete,
            class_name,
            object_id,
            current: None,
            original: Some(object),
            acl,
        })
    }

    /// Parses an upstream message:
    /// `{"currentParseObject": {...}, "originalParseObject": {...} | null}`.
    ///
    /// A delete carries the removed record as `currentParseObject`.
    pub fn from_upstream(kind: ChangeKind, message: &Value) -> RealtimeResult<Self> {
        let current = message
            .get(CURRENT_OBJECT)
            .filter(|v| v.is_object())
            .cloned()
            .ok_or_else(|| RealtimeError::InvalidEvent(format!("missing {}", CURRENT_OBJECT)))?;

        match kind {
            ChangeKind::Save => Self::saved(current, message.get(ORIGINAL_OBJECT).cloned()),
            ChangeKind::Delete => Self::deleted(current),
        }
    }

    pub fn is_publicly_readable(&self) -> bool {
        acl::is_publicly_readable(self.acl.as_ref())
    }

    pub fn is_readable_by(&self, identity: &str) -> bool {
        acl::is_readable_by(self.acl.as_ref(), identity)
    }

    /// The record pushed to subscribers: the current snapshot, or the
    /// deleted record for deletes.
    pub fn payload(&self) -> Option<&Value> {
        self.current.as_ref().or(self.original.as_ref())
    }
}

fn identify(record: &Value) -> RealtimeResult<(String, String)> {
    let class_name = record
        .get(CLASS_NAME)
        .and_then(Value::as_str)
        .ok_or_else(|| RealtimeError::InvalidEvent("record has no className".into()))?;
    let object_id = record
        .get(OBJECT_ID)
        .and_then(Value::as_str)
        .ok_or_else(|| RealtimeError::InvalidEvent("record has no objectId".into()))?;
    Ok((class_name.to_string(), object_id.to_string()))
}
