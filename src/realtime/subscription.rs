//! # Subscriptions
//!
//! One [`Subscription`] exists per distinct predicate. It tracks which
//! client sessions and request ids are attached to it and decides what a
//! change event means for them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{debug, error};

use super::client::{ClientId, ClientSession};
use super::event::{ChangeEvent, ChangeKind, EventKind};
use super::protocol::RequestId;
use crate::auth::IdentityCache;
use crate::query::QueryPredicate;

struct Member {
    client: Arc<ClientSession>,
    request_ids: HashSet<RequestId>,
}

#[derive(Default)]
struct Members {
    clients: HashMap<ClientId, Member>,
    /// Set once the registry has dropped this subscription
    retired: bool,
}

/// Outcome of one [`Subscription::notify`] call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Pushed before `notify` returned
    pub delivered: usize,
    /// Withheld by the record's ACL
    pub denied: usize,
    /// Waiting on an identity lookup
    pub deferred: usize,
}

/// A shared predicate and its attached (client, request id) pairs
pub struct Subscription {
    predicate: QueryPredicate,
    members: RwLock<Members>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("predicate", &self.predicate.to_string())
            .field("members", &self.member_count())
            .finish()
    }
}

impl Subscription {
    pub fn new(predicate: QueryPredicate) -> Self {
        Self {
            predicate,
            members: RwLock::new(Members::default()),
        }
    }

    pub fn predicate(&self) -> &QueryPredicate {
        &self.predicate
    }

    pub fn class_name(&self) -> &str {
        self.predicate.class_name()
    }

    /// Attaches `(client, request_id)`.
    ///
    /// Returns false if the subscription was retired by the registry; the
    /// caller must look the predicate up again.
    pub fn add_member(&self, client: &Arc<ClientSession>, request_id: RequestId) -> bool {
        let Ok(mut members) = self.members.write() else {
            return false;
        };
        if members.retired {
            return false;
        }
        members
            .clients
            .entry(client.id().to_string())
            .or_insert_with(|| Member {
                client: Arc::clone(client),
                request_ids: HashSet::new(),
            })
            .request_ids
            .insert(request_id);
        true
    }

    /// Detaches `(client_id, request_id)`. Unknown pairs are ignored.
    pub fn remove_member(&self, client_id: &str, request_id: RequestId) {
        let Ok(mut members) = self.members.write() else {
            return;
        };
        let Some(member) = members.clients.get_mut(client_id) else {
            debug!(client_id, request_id, "Client not attached to subscription");
            return;
        };
        member.request_ids.remove(&request_id);
        if member.request_ids.is_empty() {
            members.clients.remove(client_id);
        }
    }

    pub fn has_member(&self, client_id: &str, request_id: RequestId) -> bool {
        self.members
            .read()
            .map(|m| {
                m.clients
                    .get(client_id)
                    .map_or(false, |member| member.request_ids.contains(&request_id))
            })
            .unwrap_or(false)
    }

    pub fn has_members(&self) -> bool {
        self.members
            .read()
            .map(|m| !m.clients.is_empty())
            .unwrap_or(false)
    }

    /// Number of attached (client, request id) pairs
    pub fn member_count(&self) -> usize {
        self.members
            .read()
            .map(|m| m.clients.values().map(|c| c.request_ids.len()).sum())
            .unwrap_or(0)
    }

    /// Whether the registry has dropped this subscription. A poisoned
    /// member lock reads as not retired: looking the predicate up again
    /// would only return this same subscription.
    pub fn is_retired(&self) -> bool {
        self.members.read().map(|m| m.retired).unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn poison(self: &Arc<Self>) {
        let subscription = Arc::clone(self);
        let _ = std::thread::spawn(move || {
            let _members = subscription.members.write();
            panic!("member lock poisoned");
        })
        .join();
    }

    /// Marks the subscription retired if nobody is attached.
    ///
    /// Called by the registry while it holds the class entry, so no new
    /// member can race in between the check and the removal.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let Ok(mut members) = self.members.write() else {
            return false;
        };
        if members.clients.is_empty() {
            members.retired = true;
        }
        members.retired
    }

    /// Whether either snapshot of the event satisfies the predicate
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.predicate.evaluate(event.current.as_ref())
            || self.predicate.evaluate(event.original.as_ref())
    }

    /// Decides which push `event` produces for this subscription, if any.
    ///
    /// | original matches | current matches | push   |
    /// |------------------|-----------------|--------|
    /// | no               | no              | none   |
    /// | yes              | no              | leave  |
    /// | no               | yes             | enter, or create without original |
    /// | yes              | yes             | update |
    pub fn classify(&self, event: &ChangeEvent) -> Option<EventKind> {
        let original_matches = self.predicate.evaluate(event.original.as_ref());

        if event.kind == ChangeKind::Delete {
            if original_matches {
                return Some(EventKind::Delete);
            }
            debug!(object_id = %event.object_id, "Deleted object does not match subscription");
            return None;
        }

        let current_matches = self.predicate.evaluate(event.current.as_ref());
        match (original_matches, current_matches) {
            (true, true) => Some(EventKind::Update),
            (true, false) => Some(EventKind::Leave),
            (false, true) if event.original.is_some() => Some(EventKind::Enter),
            (false, true) => Some(EventKind::Create),
            (false, false) => {
                error!(
                    object_id = %event.object_id,
                    predicate = %self.predicate,
                    "Event does not match the subscription it was routed to"
                );
                None
            }
        }
    }

    /// Pushes `event` to every attached pair allowed to read it.
    ///
    /// Public records and master-key sessions are delivered immediately.
    /// Otherwise the pair's session token is resolved; cache hits decide
    /// synchronously and misses are decided on a spawned task. Pairs that
    /// detach before a deferred decision completes receive nothing.
    pub fn notify<F>(
        self: &Arc<Self>,
        event: &Arc<ChangeEvent>,
        identities: &Arc<IdentityCache>,
        deliver: F,
    ) -> NotifyOutcome
    where
        F: Fn(&ClientSession, RequestId, &ChangeEvent, EventKind) + Send + Sync + 'static,
    {
        let mut outcome = NotifyOutcome::default();
        let Some(kind) = self.classify(event) else {
            return outcome;
        };

        let pairs: Vec<(Arc<ClientSession>, RequestId)> = match self.members.read() {
            Ok(members) => members
                .clients
                .values()
                .flat_map(|m| m.request_ids.iter().map(|r| (Arc::clone(&m.client), *r)))
                .collect(),
            Err(_) => return outcome,
        };

        let deliver = Arc::new(deliver);
        let public = event.is_publicly_readable();

        for (client, request_id) in pairs {
            if public || client.has_master_key() {
                deliver(client.as_ref(), request_id, event.as_ref(), kind);
                outcome.delivered += 1;
                continue;
            }

            let Some(token) = client.session_token(request_id) else {
                debug!(client_id = client.id(), request_id, "No session token, not forwarding");
                outcome.denied += 1;
                continue;
            };

            if let Some(identity) = identities.cached(&token) {
                if event.is_readable_by(&identity) {
                    deliver(client.as_ref(), request_id, event.as_ref(), kind);
                    outcome.delivered += 1;
                } else {
                    outcome.denied += 1;
                }
                continue;
            }

            outcome.deferred += 1;
            let subscription = Arc::clone(self);
            let event = Arc::clone(event);
            let identities = Arc::clone(identities);
            let deliver = Arc::clone(&deliver);
            tokio::spawn(async move {
                let identity = identities.resolve(&token).await;
                let allowed = identity.map_or(false, |id| event.is_readable_by(&id));
                if !allowed {
                    debug!(client_id = client.id(), request_id, "Not readable by session");
                    return;
                }
                if subscription.has_member(client.id(), request_id) {
                    deliver(client.as_ref(), request_id, event.as_ref(), kind);
                }
            });
        }

        outcome
    }
}
