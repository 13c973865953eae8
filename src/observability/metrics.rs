//! Live-query metrics
//!
//! - Counters only
//! - Monotonic increase, reset only on process start
//! - Lock-free; `Relaxed` ordering throughout

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::realtime::event::{ChangeKind, EventKind};

/// Operational counters for one server process
#[derive(Debug, Default)]
pub struct LiveQueryMetrics {
    /// Frames pushed to clients, indexed like [`EventKind::ALL`]
    pushes: [AtomicU64; 9],
    /// Upstream save notifications accepted
    saves_ingested: AtomicU64,
    /// Upstream delete notifications accepted
    deletes_ingested: AtomicU64,
    /// Upstream notifications rejected as malformed
    events_rejected: AtomicU64,
    /// Subscriptions matched across all dispatches
    subscriptions_matched: AtomicU64,
    /// Deliveries withheld by ACL checks
    deliveries_denied: AtomicU64,
    /// Deliveries waiting on an identity lookup at dispatch time
    deliveries_deferred: AtomicU64,
    /// Client sessions opened
    clients_connected: AtomicU64,
    /// Client sessions closed
    clients_disconnected: AtomicU64,
}

impl LiveQueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one frame pushed to a client
    pub fn record_push(&self, kind: EventKind) {
        self.pushes[slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn pushes(&self, kind: EventKind) -> u64 {
        self.pushes[slot(kind)].load(Ordering::Relaxed)
    }

    pub fn record_ingested(&self, kind: ChangeKind) {
        match kind {
            ChangeKind::Save => self.saves_ingested.fetch_add(1, Ordering::Relaxed),
            ChangeKind::Delete => self.deletes_ingested.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn increment_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, matched: usize, denied: usize, deferred: usize) {
        self.subscriptions_matched
            .fetch_add(matched as u64, Ordering::Relaxed);
        self.deliveries_denied.fetch_add(denied as u64, Ordering::Relaxed);
        self.deliveries_deferred
            .fetch_add(deferred as u64, Ordering::Relaxed);
    }

    pub fn increment_connected(&self) {
        self.clients_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_disconnected(&self) {
        self.clients_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let pushes = EventKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), self.pushes(*kind)))
            .collect();

        MetricsSnapshot {
            pushes,
            saves_ingested: self.saves_ingested.load(Ordering::Relaxed),
            deletes_ingested: self.deletes_ingested.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            subscriptions_matched: self.subscriptions_matched.load(Ordering::Relaxed),
            deliveries_denied: self.deliveries_denied.load(Ordering::Relaxed),
            deliveries_deferred: self.deliveries_deferred.load(Ordering::Relaxed),
            clients_connected: self.clients_connected.load(Ordering::Relaxed),
            clients_disconnected: self.clients_disconnected.load(Ordering::Relaxed),
        }
    }
}

fn slot(kind: EventKind) -> usize {
    match kind {
        EventKind::Connected => 0,
        EventKind::Subscribed => 1,
        EventKind::Unsubscribed => 2,
        EventKind::Create => 3,
        EventKind::Update => 4,
        EventKind::Enter => 5,
        EventKind::Leave => 6,
        EventKind::Delete => 7,
        EventKind::Error => 8,
    }
}

/// Serializable counter values
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub pushes: BTreeMap<&'static str, u64>,
    pub saves_ingested: u64,
    pub deletes_ingested: u64,
    pub events_rejected: u64,
    pub subscriptions_matched: u64,
    pub deliveries_denied: u64,
    pub deliveries_deferred: u64,
    pub clients_connected: u64,
    pub clients_disconnected: u64,
}
