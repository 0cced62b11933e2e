//! Buffered garbage collection.
//!
//! Every field that has ever had a subscriber carries an age counter. An
//! external timer drives [`GarbageCollector::tick`]; each tick ages the
//! fields that currently have zero subscribers and evicts a field's value
//! once its age exceeds the buffer size. Re-subscribing before eviction
//! resets the age, so short unmount/remount cycles keep their cached data.
//!
//! Eviction removes only the field's value: the record shell, its other
//! fields and its list memberships all survive.

use crate::storage::InMemoryStorage;
use crate::subscription::SubscriptionRegistry;
use std::collections::HashMap;
use tracing::debug;

/// Tick-driven, buffered field eviction.
#[derive(Debug)]
pub struct GarbageCollector {
    /// Idle ticks a field survives with zero subscribers before eviction.
    buffer_size: u32,
    /// Age per tracked `(entity, field)`.
    lifetimes: HashMap<String, HashMap<String, u32>>,
}

impl GarbageCollector {
    #[must_use]
    pub fn new(buffer_size: u32) -> Self {
        Self {
            buffer_size,
            lifetimes: HashMap::new(),
        }
    }

    /// Starts tracking `(id, field)`, or resets its age to zero.
    ///
    /// Called whenever a subscription is (re-)added to the field.
    pub fn reset_lifetime(&mut self, id: &str, field: &str) {
        self.lifetimes
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), 0);
    }

    /// Stops tracking a single field.
    pub fn forget_field(&mut self, id: &str, field: &str) {
        if let Some(record) = self.lifetimes.get_mut(id) {
            record.remove(field);
            if record.is_empty() {
                self.lifetimes.remove(id);
            }
        }
    }

    /// Stops tracking every field of a record.
    pub fn forget_record(&mut self, id: &str) {
        self.lifetimes.remove(id);
    }

    /// Ages unobserved fields and evicts the ones past the buffer.
    pub fn tick(&mut self, storage: &mut InMemoryStorage, subscriptions: &SubscriptionRegistry) {
        let mut evicted = Vec::new();
        for (id, fields) in &mut self.lifetimes {
            for (field, age) in fields.iter_mut() {
                if subscriptions.count(id, field) > 0 {
                    continue;
                }
                *age += 1;
                if *age > self.buffer_size {
                    evicted.push((id.clone(), field.clone()));
                }
            }
        }

        for (id, field) in evicted {
            storage.delete_field(&id, &field);
            self.forget_field(&id, &field);
            debug!(id, field, "evicted unobserved field");
        }
    }
}
