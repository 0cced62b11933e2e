//! Layered entity storage.
//!
//! Fields live in a stack of layers: exactly one committed base layer at the
//! bottom and any number of optimistic layers above it. Speculative writes go
//! into their own optimistic layer so they can later be resolved (committed)
//! or superseded without disturbing precedence — for any field, the topmost
//! layer defining a value is the one subscribers observe.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Identifies one layer on the stack.
pub type LayerId = u32;

/// One element of a stored link list, preserving nested-list shape.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEntry {
    /// A link to an entity record.
    Ref(String),
    /// An explicit null element.
    Null,
    /// A nested list (lists of lists keep their structure).
    List(Vec<LinkEntry>),
}

impl LinkEntry {
    /// Appends every referenced id in this entry (recursively) to `out`.
    pub fn collect_ids(&self, out: &mut Vec<String>) {
        match self {
            LinkEntry::Ref(id) => out.push(id.clone()),
            LinkEntry::Null => {}
            LinkEntry::List(entries) => {
                for entry in entries {
                    entry.collect_ids(out);
                }
            }
        }
    }
}

/// Flattens a link list into the referenced ids, dropping nulls.
#[must_use]
pub fn flatten_links(entries: &[LinkEntry]) -> Vec<String> {
    let mut out = Vec::new();
    for entry in entries {
        entry.collect_ids(&mut out);
    }
    out
}

/// A value stored under one `(entity, field)` slot.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// A scalar leaf, stored as raw JSON.
    Scalar(Value),
    /// A single-record link; `None` is an explicit null link.
    Link(Option<String>),
    /// A list of links, possibly nested.
    LinkList(Vec<LinkEntry>),
}

/// The result of a field lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLookup {
    /// The value from the topmost defining layer, if any layer defines one.
    pub value: Option<StoredValue>,
    /// Every layer id from the top of the stack down to and including the
    /// first defining layer (all layers when the field is undefined). A write
    /// into layer `L` is visible to subscribers iff `L` is listed here.
    pub display_layers: Vec<LayerId>,
}

#[derive(Debug, Default)]
struct Layer {
    id: LayerId,
    optimistic: bool,
    fields: HashMap<String, HashMap<String, StoredValue>>,
}

impl Layer {
    fn get(&self, id: &str, field: &str) -> Option<&StoredValue> {
        self.fields.get(id).and_then(|record| record.get(field))
    }

    fn write(&mut self, id: &str, field: &str, value: StoredValue) {
        self.fields
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    fn delete_field(&mut self, id: &str, field: &str) {
        if let Some(record) = self.fields.get_mut(id) {
            record.remove(field);
            if record.is_empty() {
                self.fields.remove(id);
            }
        }
    }

    /// Merges an upper layer into this one; the upper layer wins per field.
    fn absorb(&mut self, upper: Layer) {
        for (id, record) in upper.fields {
            let target = self.fields.entry(id).or_default();
            for (field, value) in record {
                target.insert(field, value);
            }
        }
    }
}

/// The layered key/value store backing the cache.
#[derive(Debug)]
pub struct InMemoryStorage {
    /// Bottom-up stack; index 0 is always the base layer.
    layers: Vec<Layer>,
    next_layer_id: LayerId,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Creates a store holding a single empty base layer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            layers: vec![Layer {
                id: 1,
                optimistic: false,
                fields: HashMap::new(),
            }],
            next_layer_id: 2,
        }
    }

    /// The id of the committed base layer.
    #[must_use]
    pub fn base_layer_id(&self) -> LayerId {
        self.layers[0].id
    }

    /// The number of layers currently on the stack.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Pushes a new layer on top of the stack and returns its id.
    pub fn create_layer(&mut self, optimistic: bool) -> LayerId {
        let id = self.next_layer_id;
        self.next_layer_id += 1;
        self.layers.push(Layer {
            id,
            optimistic,
            fields: HashMap::new(),
        });
        debug!(layer = id, optimistic, "created storage layer");
        id
    }

    /// Looks up a field, scanning layers top-down.
    #[must_use]
    pub fn get(&self, id: &str, field: &str) -> FieldLookup {
        let mut display_layers = Vec::new();
        for layer in self.layers.iter().rev() {
            display_layers.push(layer.id);
            if let Some(value) = layer.get(id, field) {
                return FieldLookup {
                    value: Some(value.clone()),
                    display_layers,
                };
            }
        }
        FieldLookup {
            value: None,
            display_layers,
        }
    }

    /// Writes a value into exactly the given layer. Unknown layers are
    /// ignored (the layer may have been resolved away by a racing resolve).
    pub fn write(&mut self, id: &str, field: &str, value: StoredValue, layer: LayerId) {
        if let Some(target) = self.layers.iter_mut().find(|l| l.id == layer) {
            target.write(id, field, value);
        } else {
            debug!(layer, id, field, "write into unknown layer dropped");
        }
    }

    /// Resolves a layer: merges `final_values` into it, clears its
    /// optimistic flag, then squashes every run of consecutive
    /// non-optimistic layers bottom-up (upper values win per field).
    ///
    /// Resolving an id that is not on the stack is a no-op, so a resolve may
    /// safely race a second resolve for the same layer. Resolution never
    /// changes the value visible for a field whose display layer sits above
    /// the resolved one.
    pub fn resolve_layer(
        &mut self,
        layer: LayerId,
        final_values: Option<HashMap<String, HashMap<String, StoredValue>>>,
    ) {
        let Some(index) = self.layers.iter().position(|l| l.id == layer) else {
            debug!(layer, "resolve of unknown layer ignored");
            return;
        };

        let target = &mut self.layers[index];
        if let Some(values) = final_values {
            for (id, record) in values {
                for (field, value) in record {
                    target.write(&id, &field, value);
                }
            }
        }
        target.optimistic = false;

        let mut i = 0;
        while i + 1 < self.layers.len() {
            if !self.layers[i].optimistic && !self.layers[i + 1].optimistic {
                let upper = self.layers.remove(i + 1);
                self.layers[i].absorb(upper);
            } else {
                i += 1;
            }
        }
        debug!(layer, depth = self.layers.len(), "resolved storage layer");
    }

    /// Removes one field's value from every layer.
    pub fn delete_field(&mut self, id: &str, field: &str) {
        for layer in &mut self.layers {
            layer.delete_field(id, field);
        }
    }

    /// Removes a whole record from every layer.
    pub fn delete_record(&mut self, id: &str) {
        for layer in &mut self.layers {
            layer.fields.remove(id);
        }
    }

    /// Returns true if any layer stores any field for the record.
    #[must_use]
    pub fn has_record(&self, id: &str) -> bool {
        self.layers.iter().any(|l| l.fields.contains_key(id))
    }

    /// The merged view of a record: every stored field with its currently
    /// displayed value. Used by walks that infer structure from storage
    /// rather than from a selection.
    #[must_use]
    pub fn record_fields(&self, id: &str) -> HashMap<String, StoredValue> {
        let mut merged = HashMap::new();
        // bottom-up so upper layers overwrite
        for layer in &self.layers {
            if let Some(record) = layer.fields.get(id) {
                for (field, value) in record {
                    merged.insert(field.clone(), value.clone());
                }
            }
        }
        merged
    }
}
