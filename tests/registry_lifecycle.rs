//! Registry Lifecycle Tests
//!
//! Subscription sharing, teardown, concurrent churn and ACL-gated delivery,
//! driven through the connection hub and the dispatcher without a socket.

use std::sync::Arc;
use std::time::Duration;

use livequery::auth::{IdentityCache, IdentityResolver, StaticIdentityResolver};
use livequery::observability::LiveQueryMetrics;
use livequery::query::QueryPredicate;
use livequery::realtime::protocol::{outbound_channel, OutboundReceiver, OUTBOUND_CAPACITY};
use livequery::realtime::{
    ChangeEvent, Connection, Dispatcher, LiveQueryHub, Outbound, Subscription,
    SubscriptionRegistry,
};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

struct Harness {
    hub: LiveQueryHub,
    dispatcher: Dispatcher,
    registry: Arc<SubscriptionRegistry>,
    identities: Arc<IdentityCache>,
}

fn harness_with(resolver: StaticIdentityResolver, capacity: usize) -> Harness {
    let metrics = Arc::new(LiveQueryMetrics::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let resolver: Arc<dyn IdentityResolver> = Arc::new(resolver);
    let identities = Arc::new(IdentityCache::new(resolver, capacity, Duration::from_secs(1)));
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&identities),
        Arc::clone(&metrics),
    );
    let hub = LiveQueryHub::new("app", Some("master".into()), Arc::clone(&registry), metrics);
    Harness {
        hub,
        dispatcher,
        registry,
        identities,
    }
}

fn harness() -> Harness {
    harness_with(StaticIdentityResolver::new(), 16)
}

fn connect(hub: &LiveQueryHub, extra: Value) -> (Connection, OutboundReceiver) {
    let (tx, mut rx) = outbound_channel(OUTBOUND_CAPACITY);
    let mut conn = Connection::new(tx);
    let mut request = json!({"op": "connect", "applicationId": "app"});
    if let (Some(target), Some(extra)) = (request.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    hub.handle_text(&mut conn, &request.to_string());
    assert_eq!(next_frame(&mut rx)["op"], "connected");
    (conn, rx)
}

fn subscribe(hub: &LiveQueryHub, conn: &mut Connection, rx: &mut OutboundReceiver, request_id: i64, query: Value) {
    let request = json!({"op": "subscribe", "requestId": request_id, "query": query});
    hub.handle_text(conn, &request.to_string());
    let ack = next_frame(rx);
    assert_eq!(ack["op"], "subscribed");
    assert_eq!(ack["requestId"], request_id);
}

fn next_frame(rx: &mut OutboundReceiver) -> Value {
    let frame: Outbound = rx.try_recv().expect("expected a frame");
    serde_json::from_str(&frame.to_json().unwrap()).unwrap()
}

fn drain(rx: &mut OutboundReceiver) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame.to_json().unwrap()).unwrap());
    }
    frames
}

fn song(object_id: &str, extra: Value) -> Value {
    let mut record = json!({"className": "Song", "objectId": object_id});
    if let (Some(target), Some(extra)) = (record.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    record
}

// =============================================================================
// Sharing and Teardown Tests
// =============================================================================

/// Equal queries from different clients share one subscription.
#[tokio::test]
async fn test_equal_queries_share_subscription() {
    let h = harness();
    let query = json!({"className": "Song", "where": {"genre": "rock"}});

    let (mut a, mut a_rx) = connect(&h.hub, json!({}));
    let (mut b, mut b_rx) = connect(&h.hub, json!({}));
    subscribe(&h.hub, &mut a, &mut a_rx, 1, query.clone());
    subscribe(&h.hub, &mut b, &mut b_rx, 7, query);

    assert_eq!(h.registry.count(), 1);

    let result = h
        .dispatcher
        .dispatch(ChangeEvent::saved(song("s1", json!({"genre": "rock"})), None).unwrap());
    assert_eq!(result.matched, 1);
    assert_eq!(result.delivered, 2);

    assert_eq!(next_frame(&mut a_rx)["requestId"], 1);
    assert_eq!(next_frame(&mut b_rx)["requestId"], 7);
}

/// Unsubscribing and disconnecting remove empty subscriptions.
#[tokio::test]
async fn test_subscriptions_removed_when_empty() {
    let h = harness();
    let (mut conn, mut rx) = connect(&h.hub, json!({}));

    subscribe(&h.hub, &mut conn, &mut rx, 1, json!({"className": "Song", "where": {"objectId": "a"}}));
    subscribe(&h.hub, &mut conn, &mut rx, 2, json!({"className": "Song", "where": {"objectId": "b"}}));
    subscribe(&h.hub, &mut conn, &mut rx, 3, json!({"className": "Song", "where": {"plays": {"$gt": 1}}}));
    assert_eq!(h.registry.count(), 3);

    h.hub.handle_text(&mut conn, &json!({"op": "unsubscribe", "requestId": 1}).to_string());
    assert_eq!(next_frame(&mut rx)["op"], "unsubscribed");
    assert_eq!(h.registry.count(), 2);

    h.hub.disconnect(&mut conn);
    assert_eq!(h.registry.count(), 0);
    assert!(h.registry.is_empty());
    assert_eq!(h.hub.client_count(), 0);
}

/// A subscription stays while any client still holds it.
#[tokio::test]
async fn test_shared_subscription_survives_one_leaver() {
    let h = harness();
    let query = json!({"className": "Song", "where": {"objectId": "a"}});

    let (mut a, mut a_rx) = connect(&h.hub, json!({}));
    let (mut b, mut b_rx) = connect(&h.hub, json!({}));
    subscribe(&h.hub, &mut a, &mut a_rx, 1, query.clone());
    subscribe(&h.hub, &mut b, &mut b_rx, 1, query);

    h.hub.disconnect(&mut a);
    assert_eq!(h.registry.count(), 1);

    h.dispatcher
        .dispatch(ChangeEvent::saved(song("a", json!({})), None).unwrap());
    assert_eq!(next_frame(&mut b_rx)["op"], "create");
    assert!(drain(&mut a_rx).is_empty());
}

/// `update` replaces the query held under a request id.
#[tokio::test]
async fn test_update_moves_request_id() {
    let h = harness();
    let (mut conn, mut rx) = connect(&h.hub, json!({}));
    subscribe(&h.hub, &mut conn, &mut rx, 1, json!({"className": "Song", "where": {"objectId": "a"}}));

    let update = json!({"op": "update", "requestId": 1, "query": {"className": "Song", "where": {"objectId": "b"}}});
    h.hub.handle_text(&mut conn, &update.to_string());
    assert_eq!(next_frame(&mut rx)["op"], "subscribed");
    assert_eq!(h.registry.count(), 1);

    h.dispatcher
        .dispatch(ChangeEvent::saved(song("a", json!({})), None).unwrap());
    assert!(drain(&mut rx).is_empty());

    h.dispatcher
        .dispatch(ChangeEvent::saved(song("b", json!({})), None).unwrap());
    assert_eq!(next_frame(&mut rx)["op"], "create");
}

// =============================================================================
// Concurrency Tests
// =============================================================================

const CHURN_THREADS: usize = 8;
const CHURN_ROUNDS: usize = 200;

/// Subscribes, unsubscribes and reconnects on `query` in a loop, checking
/// after every attach that the client landed on a live subscription. Ends
/// subscribed under request id 1.
fn churn(hub: &LiveQueryHub, query: &Value, shared: Option<&Arc<Subscription>>) -> (Connection, OutboundReceiver) {
    let (mut conn, mut rx) = connect(hub, json!({}));
    for round in 0..CHURN_ROUNDS {
        subscribe(hub, &mut conn, &mut rx, 1, query.clone());
        let session = Arc::clone(conn.session().expect("connected"));
        let info = session.subscription_info(1).expect("attached");
        assert!(!info.subscription.is_retired(), "attached to a retired subscription");
        assert!(info.subscription.has_member(session.id(), 1));
        if let Some(shared) = shared {
            assert!(Arc::ptr_eq(shared, &info.subscription));
        }
        assert!(hub.registry().count() <= 1);

        if round % 10 == 9 {
            hub.disconnect(&mut conn);
            let (next_conn, next_rx) = connect(hub, json!({}));
            conn = next_conn;
            rx = next_rx;
        } else {
            hub.handle_text(&mut conn, r#"{"op":"unsubscribe","requestId":1}"#);
            drain(&mut rx);
        }
    }
    subscribe(hub, &mut conn, &mut rx, 1, query.clone());
    (conn, rx)
}

fn churn_in_parallel(hub: &LiveQueryHub, query: &Value, shared: Option<&Arc<Subscription>>) -> Vec<(Connection, OutboundReceiver)> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CHURN_THREADS)
            .map(|_| scope.spawn(|| churn(hub, query, shared)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("churn thread panicked"))
            .collect()
    })
}

/// Racing attach, detach and reclaim on one predicate never strands a
/// client on a retired subscription or leaves duplicates behind.
#[test]
fn test_concurrent_churn_on_one_predicate() {
    let h = harness();
    let query = json!({"className": "Song", "where": {"genre": "rock"}});

    let mut held = churn_in_parallel(&h.hub, &query, None);
    assert_eq!(h.registry.count(), 1);

    let shared = h.registry.find_or_create(QueryPredicate::parse(&query).unwrap());
    for (conn, _) in &held {
        let session = conn.session().unwrap();
        let info = session.subscription_info(1).unwrap();
        assert!(Arc::ptr_eq(&shared, &info.subscription));
    }
    assert_eq!(shared.member_count(), CHURN_THREADS);

    // with members pinned in place, every attach lands on the same one
    held.extend(churn_in_parallel(&h.hub, &query, Some(&shared)));
    assert_eq!(h.registry.count(), 1);
    assert_eq!(shared.member_count(), 2 * CHURN_THREADS);

    for (mut conn, _rx) in held {
        h.hub.disconnect(&mut conn);
    }
    assert_eq!(h.registry.count(), 0);
    assert!(shared.is_retired());
    assert_eq!(h.hub.client_count(), 0);
}

// =============================================================================
// Classification Tests
// =============================================================================

#[tokio::test]
async fn test_enter_update_leave_delete() {
    let h = harness();
    let (mut conn, mut rx) = connect(&h.hub, json!({}));
    subscribe(&h.hub, &mut conn, &mut rx, 1, json!({"className": "Song", "where": {"plays": {"$gt": 10}}}));

    let steps = [
        (song("s", json!({"plays": 11})), Some(song("s", json!({"plays": 5}))), "enter"),
        (song("s", json!({"plays": 12})), Some(song("s", json!({"plays": 11}))), "update"),
        (song("s", json!({"plays": 3})), Some(song("s", json!({"plays": 12}))), "leave"),
    ];
    for (current, original, expected) in steps {
        h.dispatcher
            .dispatch(ChangeEvent::saved(current, original).unwrap());
        assert_eq!(next_frame(&mut rx)["op"], expected);
    }

    h.dispatcher
        .dispatch(ChangeEvent::deleted(song("s", json!({"plays": 3}))).unwrap());
    assert!(drain(&mut rx).is_empty());

    h.dispatcher
        .dispatch(ChangeEvent::deleted(song("t", json!({"plays": 30}))).unwrap());
    let frame = next_frame(&mut rx);
    assert_eq!(frame["op"], "delete");
    assert_eq!(frame["object"]["objectId"], "t");
}

/// A leave is found through the original snapshot's field value.
#[tokio::test]
async fn test_leave_found_by_original_value() {
    let h = harness();
    let (mut conn, mut rx) = connect(&h.hub, json!({}));
    subscribe(&h.hub, &mut conn, &mut rx, 1, json!({"className": "Song", "where": {"genre": "rock"}}));

    h.dispatcher.dispatch(
        ChangeEvent::saved(
            song("s", json!({"genre": "jazz"})),
            Some(song("s", json!({"genre": "rock"}))),
        )
        .unwrap(),
    );
    let frame = next_frame(&mut rx);
    assert_eq!(frame["op"], "leave");
    assert_eq!(frame["object"]["genre"], "jazz");
}

/// Pointer equality subscriptions are reached by the referenced id.
#[tokio::test]
async fn test_pointer_subscription() {
    let h = harness();
    let (mut conn, mut rx) = connect(&h.hub, json!({}));
    let owner = json!({"__type": "Pointer", "className": "_User", "objectId": "u1"});
    subscribe(&h.hub, &mut conn, &mut rx, 1, json!({"className": "Song", "where": {"owner": owner.clone()}}));

    h.dispatcher
        .dispatch(ChangeEvent::saved(song("s", json!({"owner": owner})), None).unwrap());
    assert_eq!(next_frame(&mut rx)["op"], "create");
}

/// Field projection applies per request id.
#[tokio::test]
async fn test_field_projection() {
    let h = harness();
    let (mut conn, mut rx) = connect(&h.hub, json!({}));
    subscribe(
        &h.hub,
        &mut conn,
        &mut rx,
        1,
        json!({"className": "Song", "where": {"objectId": "s"}, "fields": ["title", "missing"]}),
    );

    h.dispatcher
        .dispatch(ChangeEvent::saved(song("s", json!({"title": "t", "plays": 4})), None).unwrap());
    let object = next_frame(&mut rx)["object"].clone();
    assert_eq!(object, json!({"title": "t", "missing": null}));
}

// =============================================================================
// Access Control Tests
// =============================================================================

/// Records readable by u1 only reach the client whose session resolves to
/// u1.
#[tokio::test]
async fn test_acl_restricted_delivery() {
    let resolver = StaticIdentityResolver::new()
        .with_session("t1", "u1")
        .with_session("t2", "u2");
    let h = harness_with(resolver, 16);
    let query = json!({"className": "Song"});

    let (mut one, mut one_rx) = connect(&h.hub, json!({"sessionToken": "t1"}));
    let (mut two, mut two_rx) = connect(&h.hub, json!({"sessionToken": "t2"}));
    let (mut anon, mut anon_rx) = connect(&h.hub, json!({}));
    let (mut master, mut master_rx) = connect(&h.hub, json!({"masterKey": "master"}));
    for (conn, rx) in [
        (&mut one, &mut one_rx),
        (&mut two, &mut two_rx),
        (&mut anon, &mut anon_rx),
        (&mut master, &mut master_rx),
    ] {
        subscribe(&h.hub, conn, rx, 1, query.clone());
    }

    let private = song("s", json!({"ACL": {"u1": {"read": true}}}));
    let result = h
        .dispatcher
        .dispatch(ChangeEvent::saved(private, None).unwrap());
    assert_eq!(result.matched, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(next_frame(&mut one_rx)["op"], "create");
    assert_eq!(next_frame(&mut master_rx)["op"], "create");
    assert!(drain(&mut two_rx).is_empty());
    assert!(drain(&mut anon_rx).is_empty());
}

/// Publicly readable records reach everyone without a lookup.
#[tokio::test]
async fn test_public_record_delivered_synchronously() {
    let h = harness();
    let (mut conn, mut rx) = connect(&h.hub, json!({"sessionToken": "unknown"}));
    subscribe(&h.hub, &mut conn, &mut rx, 1, json!({"className": "Song"}));

    let public = song("s", json!({"ACL": {"*": {"read": true}}}));
    let result = h
        .dispatcher
        .dispatch(ChangeEvent::saved(public, None).unwrap());
    assert_eq!(result.delivered, 1);
    assert_eq!(result.deferred, 0);
    assert_eq!(next_frame(&mut rx)["op"], "create");
}

/// The identity cache keeps the most recently used tokens.
#[tokio::test]
async fn test_identity_cache_eviction() {
    let resolver = StaticIdentityResolver::new()
        .with_session("t1", "u1")
        .with_session("t2", "u2")
        .with_session("t3", "u3");
    let h = harness_with(resolver, 2);

    assert_eq!(h.identities.resolve("t1").await.as_deref(), Some("u1"));
    assert_eq!(h.identities.resolve("t2").await.as_deref(), Some("u2"));
    assert_eq!(h.identities.cached("t1").as_deref(), Some("u1"));
    assert_eq!(h.identities.resolve("t3").await.as_deref(), Some("u3"));

    assert_eq!(h.identities.len(), 2);
    assert_eq!(h.identities.cached("t2"), None);
    assert_eq!(h.identities.cached("t1").as_deref(), Some("u1"));
    assert_eq!(h.identities.resolve("missing").await, None);
    assert_eq!(h.identities.len(), 2);
}

/// A client that unsubscribes during an identity lookup gets nothing.
#[tokio::test]
async fn test_unsubscribe_cancels_pending_delivery() {
    let resolver = StaticIdentityResolver::new().with_session("t1", "u1");
    let h = harness_with(resolver, 16);
    let (mut conn, mut rx) = connect(&h.hub, json!({"sessionToken": "t1"}));
    subscribe(&h.hub, &mut conn, &mut rx, 1, json!({"className": "Song"}));

    let private = song("s", json!({"ACL": {"u1": {"read": true}}}));
    let result = h
        .dispatcher
        .dispatch(ChangeEvent::saved(private, None).unwrap());
    assert_eq!(result.deferred, 1);

    h.hub.handle_text(&mut conn, &json!({"op": "unsubscribe", "requestId": 1}).to_string());
    assert_eq!(next_frame(&mut rx)["op"], "unsubscribed");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain(&mut rx).is_empty());
}
