//! The read half of the selection traversal engine.
//!
//! A read walks a selection tree against storage and materializes the data
//! tree it describes: links are followed into nested objects, link lists
//! rebuild their stored shape (including nested lists and explicit nulls),
//! and scalars pass through the configured unmarshal hook on the way out.
//!
//! Reads are total: a field with no stored value materializes as JSON null.
//! Only when a subtree finds no stored value at all does it collapse to
//! `None`, which is how callers distinguish "cached as null" from "never
//! written".

use crate::cache::{Cache, ROOT_ID};
use crate::key::evaluate_key;
use crate::storage::{LinkEntry, StoredValue};
use lattice_types::Selection;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Arguments to [`Cache::read`].
#[derive(Debug)]
pub struct ReadRequest<'a> {
    /// The selection describing the shape to materialize.
    pub selection: &'a Selection,
    /// Variable bindings for raw keys.
    pub variables: Map<String, Value>,
    /// The record the selection roots at; defaults to the root record.
    pub parent: Option<String>,
}

impl<'a> ReadRequest<'a> {
    /// A read rooted at the root record with no variables.
    #[must_use]
    pub fn new(selection: &'a Selection) -> Self {
        Self {
            selection,
            variables: Map::new(),
            parent: None,
        }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

impl Cache {
    /// Materializes the data tree a selection describes.
    ///
    /// Returns `None` when storage holds no value for any reachable field.
    #[must_use]
    pub fn read(&self, request: ReadRequest<'_>) -> Option<Value> {
        self.read_traced(request).0
    }

    /// Like [`Cache::read`], additionally reporting every `"{id}.{field}"`
    /// slot the traversal looked at. Hosts use the trace to subscribe to
    /// exactly the data a computation depended on.
    #[must_use]
    pub fn read_traced(&self, request: ReadRequest<'_>) -> (Option<Value>, BTreeSet<String>) {
        let parent = request.parent.unwrap_or_else(|| ROOT_ID.to_string());
        let mut touched = BTreeSet::new();
        let data = self.read_selection(&parent, request.selection, &request.variables, &mut touched);
        (data, touched)
    }

    pub(crate) fn read_selection(
        &self,
        parent: &str,
        selection: &Selection,
        variables: &Map<String, Value>,
        touched: &mut BTreeSet<String>,
    ) -> Option<Value> {
        let mut object = Map::new();
        let mut found = false;

        for (attribute, field) in selection.iter() {
            let key = evaluate_key(&field.key_raw, variables);
            touched.insert(format!("{parent}.{key}"));

            let value = match self.storage.get(parent, &key).value {
                Some(StoredValue::Scalar(raw)) => {
                    found = true;
                    self.unmarshal(&field.field_type, raw)
                }
                Some(StoredValue::Link(Some(linked))) => {
                    found = true;
                    match &field.fields {
                        Some(sub) => self
                            .read_selection(&linked, sub, variables, touched)
                            .unwrap_or(Value::Null),
                        None => Value::Null,
                    }
                }
                Some(StoredValue::Link(None)) => {
                    found = true;
                    Value::Null
                }
                Some(StoredValue::LinkList(entries)) => {
                    found = true;
                    match &field.fields {
                        Some(sub) => Value::Array(self.read_link_entries(
                            &entries, sub, variables, touched,
                        )),
                        None => Value::Null,
                    }
                }
                None => Value::Null,
            };
            object.insert(attribute.clone(), value);
        }

        found.then_some(Value::Object(object))
    }

    fn read_link_entries(
        &self,
        entries: &[LinkEntry],
        selection: &Selection,
        variables: &Map<String, Value>,
        touched: &mut BTreeSet<String>,
    ) -> Vec<Value> {
        entries
            .iter()
            .map(|entry| match entry {
                LinkEntry::Null => Value::Null,
                LinkEntry::Ref(id) => self
                    .read_selection(id, selection, variables, touched)
                    .unwrap_or(Value::Null),
                LinkEntry::List(inner) => {
                    Value::Array(self.read_link_entries(inner, selection, variables, touched))
                }
            })
            .collect()
    }

    /// Applies the configured unmarshal hook for the scalar type, if any.
    fn unmarshal(&self, field_type: &str, raw: Value) -> Value {
        match self.config.scalar(field_type) {
            Some(handler) => (handler.unmarshal)(&raw),
            None => raw,
        }
    }
}
