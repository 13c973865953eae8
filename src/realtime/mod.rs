//! # Live Query Engine
//!
//! Pushes record changes to WebSocket clients whose queries they affect.
//!
//! ## Architecture
//!
//! - **Event**: upstream save/delete notifications
//! - **Registry**: predicate index shared by all connections
//! - **Subscription**: one predicate, its attached clients, event classification
//! - **Client**: per-connection subscriptions and outbound queue
//! - **Dispatcher**: registry lookup, ACL gating and fan-out
//! - **WebSocket**: protocol handling for one socket
//! - **Upstream**: Redis pub/sub consumer feeding the dispatcher

pub mod client;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod protocol;
pub mod registry;
pub mod subscription;
pub mod upstream;
pub mod websocket;

pub use client::{ClientId, ClientSession, SubscriptionInfo};
pub use dispatcher::{ChangeFeed, DispatchResult, Dispatcher};
pub use errors::{RealtimeError, RealtimeResult};
pub use event::{ChangeEvent, ChangeKind, EventKind};
pub use protocol::{ClientRequest, Outbound, RequestId};
pub use registry::SubscriptionRegistry;
pub use subscription::{NotifyOutcome, Subscription};
pub use upstream::{decode_message, RedisChangeSource};
pub use websocket::{serve_socket, Connection, LiveQueryHub};
