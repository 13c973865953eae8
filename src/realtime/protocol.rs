//! # Live-Query Wire Protocol
//!
//! JSON text frames exchanged with clients.
//!
//! Client to server:
//!
//! ```text
//! {"op":"connect","applicationId":"app","sessionToken":"r:1","masterKey":"m"}
//! {"op":"subscribe","requestId":1,"query":{"className":"Song","where":{...},"fields":[...]},"sessionToken":"r:1"}
//! {"op":"update","requestId":1,"query":{...}}
//! {"op":"unsubscribe","requestId":1}
//! ```
//!
//! Server to client:
//!
//! ```text
//! {"op":"create","clientId":"...","requestId":1,"object":{...}}
//! {"op":"error","error":"...","code":1,"reconnect":true}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::warn;

use super::errors::{RealtimeError, RealtimeResult};
use super::event::EventKind;

/// Client-chosen identifier of a subscription on one connection
pub type RequestId = i64;

/// Frames a connection may have waiting before it counts as stalled
pub const OUTBOUND_CAPACITY: usize = 1024;

/// Sending half of one connection's outbound queue
///
/// Never waits. A frame that does not fit is dropped and the queue's
/// overflow signal fires, so the socket task can close the connection.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
    overflow: Arc<Notify>,
}

/// Receiving half of [`OutboundSender`]
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// Creates a connection queue holding at most `capacity` frames
pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = OutboundSender {
        tx,
        overflow: Arc::new(Notify::new()),
    };
    (sender, rx)
}

impl OutboundSender {
    /// Queues `frame`; false if it was dropped.
    pub fn send(&self, frame: Outbound) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                warn!(op = %frame.op(), "Outbound queue full, dropping frame");
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Signalled once a frame has been dropped for lack of room. A signal
    /// raised before anyone waits is kept.
    pub fn overflow_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.overflow)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub master_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub request_id: RequestId,
    pub query: Value,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    pub request_id: RequestId,
}

/// A decoded client frame
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Connect(ConnectRequest),
    Subscribe(SubscribeRequest),
    Update(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
}

impl ClientRequest {
    /// Decodes one text frame.
    ///
    /// Undecodable JSON or a missing `op` is [`RealtimeError::InvalidMessage`];
    /// an unrecognised `op` is [`RealtimeError::UnknownOperation`].
    pub fn parse(text: &str) -> RealtimeResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RealtimeError::InvalidMessage(e.to_string()))?;

        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| RealtimeError::InvalidMessage("missing op".into()))?
            .to_string();

        match op.as_str() {
            "connect" => Ok(ClientRequest::Connect(decode(value)?)),
            "subscribe" => Ok(ClientRequest::Subscribe(decode(value)?)),
            "update" => Ok(ClientRequest::Update(decode(value)?)),
            "unsubscribe" => Ok(ClientRequest::Unsubscribe(decode(value)?)),
            _ => Err(RealtimeError::UnknownOperation(op)),
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            ClientRequest::Connect(_) => "connect",
            ClientRequest::Subscribe(_) => "subscribe",
            ClientRequest::Update(_) => "update",
            ClientRequest::Unsubscribe(_) => "unsubscribe",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> RealtimeResult<T> {
    serde_json::from_value(value).map_err(|e| RealtimeError::InvalidMessage(e.to_string()))
}

/// Lifecycle or data push
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub op: EventKind,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}

/// Error frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub op: EventKind,
    pub error: String,
    pub code: u16,
    pub reconnect: bool,
}

impl From<&RealtimeError> for ErrorMessage {
    fn from(err: &RealtimeError) -> Self {
        Self {
            op: EventKind::Error,
            error: err.to_string(),
            code: err.protocol_code(),
            reconnect: err.reconnect(),
        }
    }
}

/// A frame queued for a connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Push(PushMessage),
    Error(ErrorMessage),
}

impl Outbound {
    pub fn op(&self) -> EventKind {
        match self {
            Outbound::Push(push) => push.op,
            Outbound::Error(error) => error.op,
        }
    }

    pub fn to_json(&self) -> RealtimeResult<String> {
        serde_json::to_string(self).map_err(|e| RealtimeError::InvalidMessage(e.to_string()))
    }
}

/// Queues an error frame. A closed connection drops it.
pub fn send_error(sender: &OutboundSender, err: &RealtimeError) {
    sender.send(Outbound::Error(ErrorMessage::from(err)));
}
