//! # Event Dispatcher
//!
//! Fan-out of upstream change events to subscribed clients.
//!
//! Delivery is best-effort: a push to a connection that has gone away is
//! dropped, and deliveries waiting on an identity lookup may complete in
//! any order relative to later events.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::client::ClientSession;
use super::errors::{RealtimeError, RealtimeResult};
use super::event::{ChangeEvent, EventKind};
use super::protocol::RequestId;
use super::registry::SubscriptionRegistry;
use crate::auth::IdentityCache;
use crate::observability::LiveQueryMetrics;

/// Routes change events through the registry to client sessions
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    identities: Arc<IdentityCache>,
    metrics: Arc<LiveQueryMetrics>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        identities: Arc<IdentityCache>,
        metrics: Arc<LiveQueryMetrics>,
    ) -> Self {
        Self {
            registry,
            identities,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Dispatches one event to every matching subscription.
    ///
    /// Must run inside a Tokio runtime; identity lookups are spawned.
    pub fn dispatch(&self, event: ChangeEvent) -> DispatchResult {
        let mut result = DispatchResult::default();
        let event = Arc::new(event);

        let subscriptions = self.registry.find_subscriptions(&event);
        result.matched = subscriptions.len();

        for subscription in subscriptions {
            let outcome = subscription.notify(&event, &self.identities, push_to_client);
            result.delivered += outcome.delivered;
            result.filtered += outcome.denied;
            result.deferred += outcome.deferred;
        }

        self.metrics
            .record_dispatch(result.matched, result.filtered, result.deferred);
        debug!(
            class_name = %event.class_name,
            object_id = %event.object_id,
            matched = result.matched,
            delivered = result.delivered,
            filtered = result.filtered,
            deferred = result.deferred,
            "Dispatched change event"
        );
        result
    }
}

fn push_to_client(client: &ClientSession, request_id: RequestId, event: &ChangeEvent, kind: EventKind) {
    client.push_event(kind, request_id, event.payload());
}

/// Result of dispatching an event
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    /// Number of matching subscriptions
    pub matched: usize,
    /// Number of pushes made synchronously
    pub delivered: usize,
    /// Number of pushes withheld by ACL
    pub filtered: usize,
    /// Number of pushes awaiting an identity lookup
    pub deferred: usize,
}

/// Queue between change ingestion and dispatch workers
#[derive(Clone)]
pub struct ChangeFeed {
    sender: mpsc::Sender<ChangeEvent>,
    metrics: Arc<LiveQueryMetrics>,
}

impl ChangeFeed {
    /// Starts `workers` dispatch tasks draining a queue of `capacity`
    pub fn start(
        dispatcher: Dispatcher,
        workers: usize,
        capacity: usize,
        metrics: Arc<LiveQueryMetrics>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(event) = next else {
                            break;
                        };
                        dispatcher.dispatch(event);
                    }
                    info!(worker, "Change feed worker stopped");
                })
            })
            .collect();

        (Self { sender, metrics }, handles)
    }

    /// Queues an event, waiting for room if the queue is full
    pub async fn publish(&self, event: ChangeEvent) -> RealtimeResult<()> {
        let kind = event.kind;
        self.sender
            .send(event)
            .await
            .map_err(|_| RealtimeError::FeedClosed)?;
        self.metrics.record_ingested(kind);
        Ok(())
    }
}
