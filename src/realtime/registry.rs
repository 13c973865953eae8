//! # Subscription Registry
//!
//! Finds the subscriptions a change event may concern.
//!
//! Two indexes, both keyed by class name first:
//! - predicates that are a single field equality sit in a
//!   `field -> value -> subscription` map and are found by probing the
//!   event's snapshots
//! - every other predicate is kept in a per-class list and evaluated
//!
//! A lookup returns the union of both, each subscription at most once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::event::ChangeEvent;
use super::subscription::Subscription;
use crate::query::{IndexValue, PredicateKey, QueryPredicate};

#[derive(Debug, Default)]
struct SimpleIndex {
    fields: HashMap<String, HashMap<IndexValue, Arc<Subscription>>>,
}

impl SimpleIndex {
    fn len(&self) -> usize {
        self.fields.values().map(HashMap::len).sum()
    }
}

/// Concurrent subscription index shared by all connections
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    simple: DashMap<String, SimpleIndex>,
    fallback: DashMap<String, HashMap<PredicateKey, Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the subscription for `predicate`, creating it if needed.
    ///
    /// Equal predicates always share one subscription.
    pub fn find_or_create(&self, predicate: QueryPredicate) -> Arc<Subscription> {
        let class_name = predicate.class_name().to_string();

        if let Some((field, value)) = simple_key(&predicate) {
            let mut index = self.simple.entry(class_name).or_default();
            let by_value = index.fields.entry(field).or_default();
            return Arc::clone(
                by_value
                    .entry(value)
                    .or_insert_with(|| Arc::new(Subscription::new(predicate))),
            );
        }

        let mut by_key = self.fallback.entry(class_name).or_default();
        let key = predicate.key().clone();
        Arc::clone(
            by_key
                .entry(key)
                .or_insert_with(|| Arc::new(Subscription::new(predicate))),
        )
    }

    /// Subscriptions whose predicate matches either snapshot of `event`
    pub fn find_subscriptions(&self, event: &ChangeEvent) -> Vec<Arc<Subscription>> {
        let mut found: Vec<Arc<Subscription>> = Vec::new();
        let snapshots: Vec<&Value> = [event.current.as_ref(), event.original.as_ref()]
            .into_iter()
            .flatten()
            .collect();

        if let Some(index) = self.simple.get(&event.class_name) {
            for (field, by_value) in &index.fields {
                for snapshot in &snapshots {
                    let value = snapshot.get(field).unwrap_or(&Value::Null);
                    if let Some(subscription) = by_value.get(&IndexValue::of(value)) {
                        push_unique(&mut found, subscription);
                    }
                }
            }
        }

        let candidates: Vec<Arc<Subscription>> = self
            .fallback
            .get(&event.class_name)
            .map(|by_key| by_key.values().cloned().collect())
            .unwrap_or_default();

        for subscription in candidates {
            if subscription.matches(event) {
                push_unique(&mut found, &subscription);
            }
        }

        found
    }

    /// Drops `subscription` if no client is attached to it any more.
    ///
    /// Safe to call repeatedly and for subscriptions already dropped.
    pub fn remove_if_empty(&self, subscription: &Arc<Subscription>) {
        let predicate = subscription.predicate();
        let class_name = predicate.class_name();

        if let Some((field, value)) = simple_key(predicate) {
            let Some(mut index) = self.simple.get_mut(class_name) else {
                return;
            };
            if !subscription.retire_if_empty() {
                return;
            }
            if let Some(by_value) = index.fields.get_mut(&field) {
                if by_value
                    .get(&value)
                    .map_or(false, |current| Arc::ptr_eq(current, subscription))
                {
                    by_value.remove(&value);
                    debug!(class_name, field = %field, "Removed empty subscription");
                }
                if by_value.is_empty() {
                    index.fields.remove(&field);
                }
            }
            let emptied = index.fields.is_empty();
            drop(index);
            if emptied {
                self.simple.remove_if(class_name, |_, index| index.fields.is_empty());
            }
            return;
        }

        let Some(mut by_key) = self.fallback.get_mut(class_name) else {
            return;
        };
        if !subscription.retire_if_empty() {
            return;
        }
        let key = predicate.key();
        if by_key
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current, subscription))
        {
            by_key.remove(key);
            debug!(class_name, predicate = %predicate, "Removed empty subscription");
        }
        let emptied = by_key.is_empty();
        drop(by_key);
        if emptied {
            self.fallback.remove_if(class_name, |_, by_key| by_key.is_empty());
        }
    }

    /// Total number of live subscriptions
    pub fn count(&self) -> usize {
        let simple: usize = self.simple.iter().map(|index| index.len()).sum();
        let fallback: usize = self.fallback.iter().map(|by_key| by_key.len()).sum();
        simple + fallback
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Live subscriptions per class; classes with none are left out
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for index in self.simple.iter() {
            *counts.entry(index.key().clone()).or_insert(0) += index.value().len();
        }
        for by_key in self.fallback.iter() {
            *counts.entry(by_key.key().clone()).or_insert(0) += by_key.value().len();
        }
        counts.retain(|_, count| *count > 0);
        counts
    }
}

fn simple_key(predicate: &QueryPredicate) -> Option<(String, IndexValue)> {
    predicate
        .simple_predicate()
        .map(|(field, value)| (field.to_string(), IndexValue::of(&value)))
}

fn push_unique(found: &mut Vec<Arc<Subscription>>, subscription: &Arc<Subscription>) {
    if !found.iter().any(|s| Arc::ptr_eq(s, subscription)) {
        found.push(Arc::clone(subscription));
    }
}
