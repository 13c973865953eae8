//! # Client Sessions
//!
//! Per-connection state: the request ids a client subscribed with, their
//! session tokens and field projections, and the outbound queue frames are
//! pushed onto.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::errors::RealtimeError;
use super::event::EventKind;
use super::protocol::{send_error, Outbound, OutboundSender, PushMessage, RequestId};
use super::subscription::Subscription;
use crate::observability::LiveQueryMetrics;

/// Server-assigned client identifier
pub type ClientId = String;

/// What a client attached under one request id
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub subscription: Arc<Subscription>,
    /// Overrides the connection-level token when present
    pub session_token: Option<String>,
    /// Keys to project pushed records onto
    pub fields: Option<Vec<String>>,
}

/// One connected client
pub struct ClientSession {
    id: ClientId,
    sender: OutboundSender,
    has_master_key: bool,
    session_token: Option<String>,
    subscriptions: RwLock<HashMap<RequestId, SubscriptionInfo>>,
    metrics: Arc<LiveQueryMetrics>,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("has_master_key", &self.has_master_key)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl ClientSession {
    pub fn new(
        sender: OutboundSender,
        has_master_key: bool,
        session_token: Option<String>,
        metrics: Arc<LiveQueryMetrics>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            has_master_key,
            session_token,
            subscriptions: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_master_key(&self) -> bool {
        self.has_master_key
    }

    /// Attaches this client to `info.subscription` under `request_id` and
    /// acknowledges with `subscribed`.
    ///
    /// The caller must have detached any previous use of `request_id`.
    /// Returns false, without acknowledging, when the subscription was
    /// retired concurrently.
    pub fn subscribe(self: &Arc<Self>, request_id: RequestId, info: SubscriptionInfo) -> bool {
        let subscription = Arc::clone(&info.subscription);
        if let Ok(mut subscriptions) = self.subscriptions.write() {
            subscriptions.insert(request_id, info);
        }

        if !subscription.add_member(self, request_id) {
            if let Ok(mut subscriptions) = self.subscriptions.write() {
                subscriptions.remove(&request_id);
            }
            return false;
        }

        self.push(EventKind::Subscribed, Some(request_id), None);
        true
    }

    /// Detaches `request_id` without acknowledging.
    ///
    /// Returns the subscription it was attached to so the registry can
    /// reclaim it.
    pub fn detach(&self, request_id: RequestId) -> Option<Arc<Subscription>> {
        let info = self
            .subscriptions
            .write()
            .ok()
            .and_then(|mut subscriptions| subscriptions.remove(&request_id))?;
        info.subscription.remove_member(&self.id, request_id);
        Some(info.subscription)
    }

    /// Detaches `request_id` and acknowledges with `unsubscribed`.
    ///
    /// Unknown request ids are acknowledged too; clients may unsubscribe
    /// twice.
    pub fn unsubscribe(&self, request_id: RequestId) -> Option<Arc<Subscription>> {
        let subscription = self.detach(request_id);
        if subscription.is_none() {
            debug!(client_id = %self.id, request_id, "No subscription for request");
        }
        self.push(EventKind::Unsubscribed, Some(request_id), None);
        subscription
    }

    pub fn subscription_info(&self, request_id: RequestId) -> Option<SubscriptionInfo> {
        self.subscriptions
            .read()
            .ok()
            .and_then(|subscriptions| subscriptions.get(&request_id).cloned())
    }

    /// Token used for ACL checks on `request_id`
    pub fn session_token(&self, request_id: RequestId) -> Option<String> {
        self.subscription_info(request_id)
            .and_then(|info| info.session_token)
            .or_else(|| self.session_token.clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn push_connected(&self) {
        self.push(EventKind::Connected, None, None);
    }

    /// Pushes a data event, projected onto the request's fields if any
    pub fn push_event(&self, kind: EventKind, request_id: RequestId, record: Option<&Value>) {
        let object = record.map(|record| {
            match self.subscription_info(request_id).and_then(|info| info.fields) {
                Some(fields) => project(record, &fields),
                None => record.clone(),
            }
        });
        self.push(kind, Some(request_id), object);
    }

    pub fn push_error(&self, err: &RealtimeError) {
        send_error(&self.sender, err);
        self.metrics.record_push(EventKind::Error);
    }

    /// Detaches every request id.
    ///
    /// Returns the subscriptions this client was attached to.
    pub fn close(&self) -> Vec<Arc<Subscription>> {
        let drained: Vec<(RequestId, SubscriptionInfo)> = match self.subscriptions.write() {
            Ok(mut subscriptions) => subscriptions.drain().collect(),
            Err(_) => return Vec::new(),
        };

        drained
            .into_iter()
            .map(|(request_id, info)| {
                info.subscription.remove_member(&self.id, request_id);
                info.subscription
            })
            .collect()
    }

    fn push(&self, op: EventKind, request_id: Option<RequestId>, object: Option<Value>) {
        let message = Outbound::Push(PushMessage {
            op,
            client_id: self.id.clone(),
            request_id,
            object,
        });
        if !self.sender.send(message) {
            debug!(client_id = %self.id, op = %op, "Push not queued");
            return;
        }
        self.metrics.record_push(op);
    }
}

/// Keeps only `fields` of `record`; missing keys come through as null.
fn project(record: &Value, fields: &[String]) -> Value {
    let projected: Map<String, Value> = fields
        .iter()
        .map(|field| {
            let value = record.get(field).cloned().unwrap_or(Value::Null);
            (field.clone(), value)
        })
        .collect();
    Value::Object(projected)
}
