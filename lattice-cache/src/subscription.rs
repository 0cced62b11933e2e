//! Reference-counted subscription bookkeeping.
//!
//! The registry tracks, per `(entity, field)`, which subscribers care about
//! the field. The same subscriber can reach one field through several graph
//! paths (the classic case: an entity that appears both directly and inside
//! a list), so each `(entity, field, subscriber)` triple carries a reference
//! count of the paths currently registering interest. The callback only
//! leaves the notify list once every path is gone.
//!
//! The registry is a plain data structure; the selection- and storage-driven
//! walks that feed it live on [`crate::Cache`].

use lattice_types::Selection;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A consumer's registration against the cache.
///
/// `set` is invoked with freshly read data whenever a field the selection
/// reaches changes visibly. The `Rc` pointer of the spec is its identity for
/// deduplication and reference counting: subscribing the same spec value
/// twice through different paths registers one callback with a count of two.
pub struct SubscriptionSpec {
    /// Root type of the selection (`Query`, `User`, ...). Informational;
    /// traversal roots at `parent_id`.
    pub root_type: String,
    /// The selection this subscriber observes.
    pub selection: Selection,
    /// The record the selection roots at; defaults to the root record.
    pub parent_id: Option<String>,
    /// Receives freshly read data after every visible change.
    pub set: Box<dyn Fn(Option<Value>)>,
    /// Produces the variables the selection is currently bound to.
    pub variables: Option<Box<dyn Fn() -> Map<String, Value>>>,
}

impl SubscriptionSpec {
    /// The variables the spec is currently bound to (empty when unset).
    #[must_use]
    pub fn variables(&self) -> Map<String, Value> {
        self.variables.as_ref().map(|f| f()).unwrap_or_default()
    }
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("root_type", &self.root_type)
            .field("parent_id", &self.parent_id)
            .finish_non_exhaustive()
    }
}

/// Identity of a spec: the address of its `Rc` allocation.
pub(crate) fn spec_key(spec: &Rc<SubscriptionSpec>) -> usize {
    Rc::as_ptr(spec) as usize
}

/// Per-(entity, field) subscriber sets with path reference counts.
#[derive(Default)]
pub struct SubscriptionRegistry {
    /// The callbacks notified when a field changes, per entity and field.
    subscribers: HashMap<String, HashMap<String, Vec<Rc<SubscriptionSpec>>>>,
    /// Path counts per `(entity, field, spec identity)`.
    reference_counts: HashMap<String, HashMap<String, HashMap<usize, u32>>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("records", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more path from `spec` to `(id, field)`.
    ///
    /// The spec joins the visible subscriber list only on its first path;
    /// later paths merely increment the count.
    pub fn add_field(&mut self, id: &str, field: &str, spec: &Rc<SubscriptionSpec>) {
        let counts = self
            .reference_counts
            .entry(id.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default();
        let count = counts.entry(spec_key(spec)).or_insert(0);
        *count += 1;

        if *count == 1 {
            self.subscribers
                .entry(id.to_string())
                .or_default()
                .entry(field.to_string())
                .or_default()
                .push(Rc::clone(spec));
        }
    }

    /// The specs currently subscribed to `(id, field)`.
    #[must_use]
    pub fn get(&self, id: &str, field: &str) -> Vec<Rc<SubscriptionSpec>> {
        self.subscribers
            .get(id)
            .and_then(|record| record.get(field))
            .cloned()
            .unwrap_or_default()
    }

    /// The number of distinct subscribers on `(id, field)`.
    #[must_use]
    pub fn count(&self, id: &str, field: &str) -> usize {
        self.subscribers
            .get(id)
            .and_then(|record| record.get(field))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// The path count for one `(id, field, spec)` triple.
    #[must_use]
    pub fn reference_count(&self, id: &str, field: &str, spec: &Rc<SubscriptionSpec>) -> u32 {
        self.reference_counts
            .get(id)
            .and_then(|record| record.get(field))
            .and_then(|counts| counts.get(&spec_key(spec)))
            .copied()
            .unwrap_or(0)
    }

    /// Unregisters one path per target from `(id, field)`. A spec's callback
    /// is dropped from the visible list only when its count reaches zero.
    pub fn remove_field(&mut self, id: &str, field: &str, targets: &[Rc<SubscriptionSpec>]) {
        let Some(counts) = self
            .reference_counts
            .get_mut(id)
            .and_then(|record| record.get_mut(field))
        else {
            return;
        };

        let mut dropped = Vec::new();
        for target in targets {
            let key = spec_key(target);
            if let Some(count) = counts.get_mut(&key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&key);
                    dropped.push(key);
                }
            }
        }

        if !dropped.is_empty() {
            if let Some(specs) = self
                .subscribers
                .get_mut(id)
                .and_then(|record| record.get_mut(field))
            {
                specs.retain(|spec| !dropped.contains(&spec_key(spec)));
            }
        }
    }

    /// Drops every subscriber and count for `(id, field)`.
    pub fn drop_field(&mut self, id: &str, field: &str) {
        if let Some(record) = self.subscribers.get_mut(id) {
            record.remove(field);
        }
        if let Some(record) = self.reference_counts.get_mut(id) {
            record.remove(field);
        }
    }

    /// Drops every subscriber and count for the whole record.
    pub fn drop_record(&mut self, id: &str) {
        self.subscribers.remove(id);
        self.reference_counts.remove(id);
    }

    /// The fields of a record that currently have bookkeeping attached.
    #[must_use]
    pub fn fields_of(&self, id: &str) -> Vec<String> {
        let mut fields: Vec<String> = self
            .reference_counts
            .get(id)
            .map(|record| record.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        fields
    }
}
