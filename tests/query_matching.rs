//! Query Matching Tests
//!
//! Predicate semantics as seen by subscribers:
//! - Class selection and equality (including pointers)
//! - Comparison, membership, existence, pattern and set operators
//! - `$or` disjunctions
//! - Simple-predicate detection for the fast index
//! - Value-based predicate identity

use livequery::query::{QueryError, QueryPredicate};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn predicate(query: Value) -> QueryPredicate {
    QueryPredicate::parse(&query).unwrap()
}

fn song(fields: Value) -> Value {
    let mut record = json!({"className": "Song", "objectId": "X"});
    if let (Some(target), Some(extra)) = (record.as_object_mut(), fields.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    record
}

fn matches(query: Value, record: Value) -> bool {
    predicate(query).evaluate(Some(&record))
}

// =============================================================================
// Class and Equality Tests
// =============================================================================

/// A record matches on its own class only.
#[test]
fn test_object_id_equality() {
    let x = json!({"className": "Song", "objectId": "X"});

    assert!(matches(json!({"className": "Song", "where": {"objectId": "X"}}), x.clone()));
    assert!(!matches(json!({"className": "Song", "where": {"objectId": "Y"}}), x.clone()));
    assert!(!matches(json!({"className": "Album", "where": {"objectId": "X"}}), x));
}

/// Absent records never match.
#[test]
fn test_absent_record() {
    assert!(!predicate(json!({"className": "Song"})).evaluate(None));
    assert!(!predicate(json!({"className": "Song"})).evaluate(Some(&json!("Song"))));
}

/// An empty or missing `where` matches every record of the class.
#[test]
fn test_empty_filter_matches_class() {
    assert!(matches(json!({"className": "Song"}), song(json!({}))));
    assert!(matches(json!({"className": "Song", "where": {}}), song(json!({"a": 1}))));
}

/// Every conjunct must hold.
#[test]
fn test_conjunction() {
    let query = json!({"className": "Song", "where": {"genre": "rock", "year": 1999}});
    assert!(matches(query.clone(), song(json!({"genre": "rock", "year": 1999}))));
    assert!(!matches(query.clone(), song(json!({"genre": "rock", "year": 2000}))));
    assert!(!matches(query, song(json!({"genre": "rock"}))));
}

/// A pointer field is compared by the id it references.
#[test]
fn test_pointer_equality() {
    let pointer = json!({"__type": "Pointer", "className": "_User", "objectId": "u1"});
    let record = song(json!({"owner": pointer}));

    assert!(matches(json!({"className": "Song", "where": {"owner": "u1"}}), record.clone()));
    assert!(matches(
        json!({"className": "Song", "where": {"owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"}}}),
        record.clone()
    ));
    assert!(!matches(json!({"className": "Song", "where": {"owner": "u2"}}), record));
}

/// Numbers compare by value regardless of representation.
#[test]
fn test_numeric_equality() {
    assert!(matches(json!({"className": "Song", "where": {"plays": 3}}), song(json!({"plays": 3.0}))));
}

// =============================================================================
// Operator Tests
// =============================================================================

#[test]
fn test_greater_than() {
    let query = json!({"className": "Person", "where": {"age": {"$gt": 18}}});
    let person = |age: i64| json!({"className": "Person", "objectId": "p", "age": age});

    assert!(matches(query.clone(), person(19)));
    assert!(!matches(query.clone(), person(18)));
    assert!(!matches(query.clone(), person(17)));
    assert!(!matches(query, json!({"className": "Person", "objectId": "p", "age": "19"})));
}

#[test]
fn test_range_bounds() {
    let query = json!({"className": "Song", "where": {"plays": {"$gte": 10, "$lte": 20}}});
    assert!(matches(query.clone(), song(json!({"plays": 10}))));
    assert!(matches(query.clone(), song(json!({"plays": 20}))));
    assert!(!matches(query.clone(), song(json!({"plays": 21}))));
    assert!(!matches(query.clone(), song(json!({}))));

    let query = json!({"className": "Song", "where": {"plays": {"$lt": 10}}});
    assert!(matches(query.clone(), song(json!({"plays": 9.5}))));
    assert!(!matches(query, song(json!({"plays": 10}))));
}

#[test]
fn test_exists() {
    let present = json!({"className": "Song", "where": {"cover": {"$exists": true}}});
    let absent = json!({"className": "Song", "where": {"cover": {"$exists": false}}});

    assert!(matches(present.clone(), song(json!({"cover": "a.png"}))));
    assert!(!matches(present, song(json!({}))));
    assert!(matches(absent.clone(), song(json!({}))));
    assert!(!matches(absent, song(json!({"cover": "a.png"}))));
}

/// `$ne` treats absent and explicit null alike.
#[test]
fn test_not_equal_is_null_aware() {
    let not_null = json!({"className": "Song", "where": {"genre": {"$ne": null}}});
    assert!(matches(not_null.clone(), song(json!({"genre": "rock"}))));
    assert!(!matches(not_null.clone(), song(json!({"genre": null}))));
    assert!(!matches(not_null, song(json!({}))));

    let not_rock = json!({"className": "Song", "where": {"genre": {"$ne": "rock"}}});
    assert!(matches(not_rock.clone(), song(json!({}))));
    assert!(!matches(not_rock, song(json!({"genre": "rock"}))));
}

#[test]
fn test_in_and_not_in() {
    let within = json!({"className": "Song", "where": {"genre": {"$in": ["rock", "jazz"]}}});
    assert!(matches(within.clone(), song(json!({"genre": "jazz"}))));
    assert!(!matches(within, song(json!({"genre": "pop"}))));

    let outside = json!({"className": "Song", "where": {"genre": {"$nin": ["rock", "jazz"]}}});
    assert!(matches(outside.clone(), song(json!({"genre": "pop"}))));
    assert!(!matches(outside, song(json!({"genre": "rock"}))));
}

#[test]
fn test_regex() {
    let query = json!({"className": "Song", "where": {"title": {"$regex": "^Love"}}});
    assert!(matches(query.clone(), song(json!({"title": "Love Me Do"}))));
    assert!(!matches(query.clone(), song(json!({"title": "All You Need Is Love"}))));
    assert!(!matches(query, song(json!({}))));
}

/// `$all` is order-independent set equality.
#[test]
fn test_all_is_set_equality() {
    let query = json!({"className": "Song", "where": {"tags": {"$all": ["a", "b"]}}});
    assert!(matches(query.clone(), song(json!({"tags": ["b", "a"]}))));
    assert!(!matches(query.clone(), song(json!({"tags": ["a"]}))));
    assert!(!matches(query.clone(), song(json!({"tags": ["a", "b", "c"]}))));
    assert!(!matches(query, song(json!({"tags": "a"}))));
}

/// Unknown operators exclude rather than include.
#[test]
fn test_unknown_operator_never_matches() {
    let query = json!({"className": "Song", "where": {"loc": {"$nearSphere": [0, 0]}}});
    assert!(!matches(query, song(json!({"loc": [0, 0]}))));

    let query = json!({"className": "Song", "where": {"$and": [{"a": 1}]}});
    assert!(!matches(query, song(json!({"a": 1}))));
}

/// A lone `$options` has no pattern to modify and excludes every record.
#[test]
fn test_options_alone_never_matches() {
    let query = json!({"className": "Song", "where": {"title": {"$options": "i"}}});
    assert!(!matches(query.clone(), song(json!({"title": "anything"}))));
    assert!(!matches(query, song(json!({}))));
}

// =============================================================================
// Disjunction Tests
// =============================================================================

#[test]
fn test_or() {
    let query = json!({"className": "Song", "where": {"$or": [{"objectId": "X"}, {"objectId": "Y"}]}});
    let with_id = |id: &str| json!({"className": "Song", "objectId": id});

    assert!(matches(query.clone(), with_id("X")));
    assert!(matches(query.clone(), with_id("Y")));
    assert!(!matches(query, with_id("Z")));
}

/// `$or` is combined with sibling conditions by conjunction.
#[test]
fn test_or_with_conjunct() {
    let query = json!({"className": "Song", "where": {
        "genre": "rock",
        "$or": [{"year": 1969}, {"plays": {"$gt": 100}}]
    }});
    assert!(matches(query.clone(), song(json!({"genre": "rock", "year": 1969}))));
    assert!(matches(query.clone(), song(json!({"genre": "rock", "plays": 101}))));
    assert!(!matches(query.clone(), song(json!({"genre": "jazz", "year": 1969}))));
    assert!(!matches(query, song(json!({"genre": "rock", "year": 1970}))));
}

// =============================================================================
// Simplicity and Identity Tests
// =============================================================================

#[test]
fn test_simple_predicate() {
    let p = predicate(json!({"className": "Song", "where": {"objectId": "X"}}));
    assert!(p.is_simple());
    assert_eq!(p.simple_predicate(), Some(("objectId", json!("X"))));
}

#[test]
fn test_pointer_simple_predicate_keys_by_id() {
    let p = predicate(json!({"className": "Song", "where": {"owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"}}}));
    assert_eq!(p.simple_predicate(), Some(("owner", json!("u1"))));
}

#[test]
fn test_non_simple_predicates() {
    for query in [
        json!({"className": "Song"}),
        json!({"className": "Song", "where": {"a": 1, "b": 2}}),
        json!({"className": "Song", "where": {"a": {"$gt": 1}}}),
        json!({"className": "Song", "where": {"$or": [{"a": 1}]}}),
        json!({"className": "Song", "where": {"a": [1, 2]}}),
        json!({"className": "Song", "where": {"a": {"nested": 1}}}),
    ] {
        assert!(!predicate(query.clone()).is_simple(), "{} should not be simple", query);
    }
}

/// Structurally equal predicates are equal, regardless of key order.
#[test]
fn test_predicate_identity_is_structural() {
    let a = predicate(json!({"className": "Song", "where": {"a": 1, "b": {"$gt": 2}}}));
    let b = predicate(json!({"className": "Song", "where": {"b": {"$gt": 2}, "a": 1}}));
    let c = predicate(json!({"className": "Album", "where": {"a": 1, "b": {"$gt": 2}}}));

    assert_eq!(a, b);
    assert_eq!(a.key(), b.key());
    assert_ne!(a, c);
}

/// Evaluation is a pure function of predicate and record.
#[test]
fn test_evaluate_is_repeatable() {
    let p = predicate(json!({"className": "Song", "where": {"title": {"$regex": "a"}, "plays": {"$gt": 1}}}));
    let record = song(json!({"title": "abba", "plays": 2}));
    let first = p.evaluate(Some(&record));
    for _ in 0..10 {
        assert_eq!(p.evaluate(Some(&record)), first);
    }
}

// =============================================================================
// Parse Error Tests
// =============================================================================

#[test]
fn test_malformed_queries() {
    assert_eq!(
        QueryPredicate::parse(&json!({"where": {}})).unwrap_err(),
        QueryError::MissingClassName
    );
    assert!(QueryPredicate::parse(&json!("Song")).is_err());
    assert!(QueryPredicate::parse(&json!({"className": "Song", "where": 5})).is_err());
    assert!(QueryPredicate::parse(&json!({"className": "Song", "where": {"$or": {"a": 1}}})).is_err());
    assert!(QueryPredicate::parse(&json!({"className": "Song", "where": {"t": {"$regex": "("}}})).is_err());
}
