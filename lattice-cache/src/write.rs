//! The write half of the selection traversal engine.
//!
//! A write walks a selection tree together with a raw data tree, normalizing
//! nested objects and lists into entity references in one storage layer, and
//! collects the subscribers that must be told about every visible change.
//! Notification happens once, after the traversal, with each distinct
//! subscriber re-reading its own selection.
//!
//! Writes are best-effort: a traversal error aborts the call but does not
//! roll back fields already written by it.

use crate::cache::{Cache, ROOT_ID};
use crate::error::{CacheError, Result};
use crate::key::evaluate_key;
use crate::storage::{LayerId, LinkEntry, StoredValue, flatten_links};
use crate::subscription::SubscriptionSpec;
use lattice_types::{ListPosition, ListUpdate, OperationAction, Selection, SelectionField};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, warn};

/// Arguments to [`Cache::write`].
#[derive(Debug)]
pub struct WriteRequest<'a> {
    /// The raw data tree, shaped like the selection.
    pub data: &'a Map<String, Value>,
    /// The selection describing `data`.
    pub selection: &'a Selection,
    /// Variable bindings for raw keys and filters.
    pub variables: Map<String, Value>,
    /// The record the selection roots at; defaults to the root record.
    pub parent: Option<String>,
    /// Target layer; defaults to the base layer (or a fresh optimistic one).
    pub layer: Option<LayerId>,
    /// When no layer is given, create a new optimistic layer for this write.
    pub optimistic: bool,
    /// Honor `update` markers (append/prepend/replace) on the selection.
    pub apply_updates: bool,
}

impl<'a> WriteRequest<'a> {
    /// A plain write into the base layer, rooted at the root record.
    #[must_use]
    pub fn new(selection: &'a Selection, data: &'a Map<String, Value>) -> Self {
        Self {
            data,
            selection,
            variables: Map::new(),
            parent: None,
            layer: None,
            optimistic: false,
            apply_updates: false,
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

    #[must_use]
    pub fn with_layer(mut self, layer: LayerId) -> Self {
        self.layer = Some(layer);
        self
    }

    /// Routes the write into a fresh optimistic layer.
    #[must_use]
    pub fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }

    /// Honors `update` markers on the selection.
    #[must_use]
    pub fn apply_updates(mut self) -> Self {
        self.apply_updates = true;
        self
    }
}

impl Cache {
    /// Normalizes a data tree into storage and notifies affected
    /// subscribers. Returns the layer the write landed in; for an
    /// optimistic write the caller must later resolve that layer exactly
    /// once.
    pub fn write(&mut self, request: WriteRequest<'_>) -> Result<LayerId> {
        let layer = match request.layer {
            Some(layer) => layer,
            None if request.optimistic => self.storage.create_layer(true),
            None => self.storage.base_layer_id(),
        };
        let parent = request
            .parent
            .clone()
            .unwrap_or_else(|| ROOT_ID.to_string());

        let mut to_notify = Vec::new();
        self.write_selection(
            &parent,
            request.selection,
            request.data,
            &request.variables,
            layer,
            request.apply_updates,
            &mut to_notify,
        )?;
        self.notify_all(to_notify);
        Ok(layer)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn write_selection(
        &mut self,
        parent: &str,
        selection: &Selection,
        data: &Map<String, Value>,
        variables: &Map<String, Value>,
        layer: LayerId,
        apply_updates: bool,
        to_notify: &mut Vec<Rc<SubscriptionSpec>>,
    ) -> Result<()> {
        for (attribute, value) in data {
            let Some(field) = selection.get(attribute) else {
                return Err(CacheError::MissingSelection {
                    field: attribute.clone(),
                });
            };
            let key = evaluate_key(&field.key_raw, variables);
            let lookup = self.storage.get(parent, &key);
            // a write is only observable if it lands at or above the layer
            // currently displaying the field
            let visible = lookup.display_layers.contains(&layer);

            match (&field.fields, value) {
                (Some(sub), Value::Null) => {
                    self.write_link(
                        parent, &key, sub, None, lookup.value, visible, variables, layer, to_notify,
                    );
                }
                (Some(sub), Value::Object(object)) => {
                    let linked_id = self.linked_object_id(field, parent, &key, object)?;
                    self.write_link(
                        parent,
                        &key,
                        sub,
                        Some(linked_id.clone()),
                        lookup.value,
                        visible,
                        variables,
                        layer,
                        to_notify,
                    );
                    self.write_selection(
                        &linked_id,
                        sub,
                        object,
                        variables,
                        layer,
                        apply_updates,
                        to_notify,
                    )?;
                }
                (Some(sub), Value::Array(items)) => {
                    self.write_linked_list(
                        attribute,
                        parent,
                        &key,
                        field,
                        sub,
                        items,
                        lookup.value,
                        visible,
                        variables,
                        layer,
                        apply_updates,
                        to_notify,
                    )?;
                }
                _ => {
                    self.write_scalar(
                        parent,
                        &key,
                        field,
                        value,
                        lookup.value,
                        visible,
                        layer,
                        apply_updates,
                        to_notify,
                    );
                }
            }

            if !field.operations.is_empty() {
                self.apply_operations(field, value, variables)?;
            }
        }
        Ok(())
    }

    /// The storage id a linked object normalizes to: its entity id when all
    /// identity fields are present, otherwise a path-derived embedded id.
    fn linked_object_id(
        &self,
        field: &SelectionField,
        parent: &str,
        key: &str,
        object: &Map<String, Value>,
    ) -> Result<String> {
        let type_name = self.concrete_type(field, key, object)?;
        Ok(self
            .entity_id(&type_name, object)
            .unwrap_or_else(|| format!("{parent}.{key}")))
    }

    fn concrete_type(
        &self,
        field: &SelectionField,
        key: &str,
        object: &Map<String, Value>,
    ) -> Result<String> {
        if field.is_abstract {
            object
                .get("__typename")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| CacheError::MissingTypename {
                    key: key.to_string(),
                })
        } else {
            Ok(field.field_type.clone())
        }
    }

    /// Updates a single-record link. When the target changes, the field's
    /// current subscribers are notified (they now resolve somewhere else)
    /// and unsubscribed from the previous target's subtree.
    #[allow(clippy::too_many_arguments)]
    fn write_link(
        &mut self,
        parent: &str,
        key: &str,
        sub: &Selection,
        linked_id: Option<String>,
        previous: Option<StoredValue>,
        visible: bool,
        variables: &Map<String, Value>,
        layer: LayerId,
        to_notify: &mut Vec<Rc<SubscriptionSpec>>,
    ) {
        // an absent field is not the same as a stored null link
        let previous_link = match previous {
            Some(StoredValue::Link(id)) => Some(id),
            _ => None,
        };
        if previous_link.as_ref() == Some(&linked_id) {
            return;
        }

        self.storage
            .write(parent, key, StoredValue::Link(linked_id), layer);
        if visible {
            let current = self.subscriptions.get(parent, key);
            to_notify.extend(current.iter().cloned());
            if let Some(old_target) = previous_link.flatten() {
                let mut visited = HashSet::new();
                self.remove_subscribers(&old_target, sub, &current, variables, &mut visited);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_linked_list(
        &mut self,
        attribute: &str,
        parent: &str,
        key: &str,
        field: &SelectionField,
        sub: &Selection,
        items: &[Value],
        previous: Option<StoredValue>,
        visible: bool,
        variables: &Map<String, Value>,
        layer: LayerId,
        apply_updates: bool,
        to_notify: &mut Vec<Rc<SubscriptionSpec>>,
    ) -> Result<()> {
        let mut new_ids = Vec::new();
        let new_entries = self.write_list_entries(
            parent,
            key,
            field,
            sub,
            items,
            "",
            variables,
            layer,
            apply_updates,
            to_notify,
            &mut new_ids,
        )?;

        let previous_list = match previous {
            Some(StoredValue::LinkList(entries)) => Some(entries),
            _ => None,
        };
        let previous_entries = previous_list.clone().unwrap_or_default();

        let mut final_entries = new_entries;
        if apply_updates {
            match field.update {
                Some(update @ (ListUpdate::Append | ListUpdate::Prepend)) => {
                    let mut kept = previous_entries.clone();
                    if attribute == "edges" {
                        kept = self.reconcile_edges(kept, &new_ids, sub, parent, key, variables);
                    }
                    final_entries = if update == ListUpdate::Prepend {
                        final_entries.into_iter().chain(kept).collect()
                    } else {
                        kept.into_iter().chain(final_entries).collect()
                    };
                }
                _ => {}
            }
        }

        // structural comparison decides whether anyone hears about this
        if previous_list.as_deref() == Some(final_entries.as_slice()) {
            return Ok(());
        }
        self.storage.write(
            parent,
            key,
            StoredValue::LinkList(final_entries.clone()),
            layer,
        );
        if visible {
            let current = self.subscriptions.get(parent, key);
            to_notify.extend(current.iter().cloned());

            // ids that fell out of the list lose this field's subscribers
            let remaining: HashSet<String> = flatten_links(&final_entries).into_iter().collect();
            for old_id in flatten_links(&previous_entries) {
                if !remaining.contains(&old_id) {
                    let mut visited = HashSet::new();
                    self.remove_subscribers(&old_id, sub, &current, variables, &mut visited);
                }
            }
        }
        Ok(())
    }

    /// Normalizes each list entry to a link, preserving nested-list shape in
    /// the returned entries and appending every flat id to `new_ids`.
    #[allow(clippy::too_many_arguments)]
    fn write_list_entries(
        &mut self,
        parent: &str,
        key: &str,
        field: &SelectionField,
        sub: &Selection,
        items: &[Value],
        prefix: &str,
        variables: &Map<String, Value>,
        layer: LayerId,
        apply_updates: bool,
        to_notify: &mut Vec<Rc<SubscriptionSpec>>,
        new_ids: &mut Vec<String>,
    ) -> Result<Vec<LinkEntry>> {
        let mut entries = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match item {
                Value::Null => entries.push(LinkEntry::Null),
                Value::Array(inner) => {
                    let nested_prefix = format!("{prefix}[{index}]");
                    entries.push(LinkEntry::List(self.write_list_entries(
                        parent,
                        key,
                        field,
                        sub,
                        inner,
                        &nested_prefix,
                        variables,
                        layer,
                        apply_updates,
                        to_notify,
                        new_ids,
                    )?));
                }
                Value::Object(object) => {
                    let type_name = self.concrete_type(field, key, object)?;
                    let entry_id = match self.entity_id(&type_name, object) {
                        Some(id) => id,
                        None => {
                            let mut id = format!("{parent}.{key}{prefix}[{index}]");
                            // a connection edge is identified by its node so
                            // that re-paging finds the same slot
                            if let Some(node_id) = self.edge_node_id(sub, object) {
                                id = format!("{id}#{node_id}");
                            }
                            id
                        }
                    };
                    self.write_selection(
                        &entry_id,
                        sub,
                        object,
                        variables,
                        layer,
                        apply_updates,
                        to_notify,
                    )?;
                    new_ids.push(entry_id.clone());
                    entries.push(LinkEntry::Ref(entry_id));
                }
                other => {
                    warn!(parent, key, value = %other, "non-object entry in linked list");
                    entries.push(LinkEntry::Null);
                }
            }
        }
        Ok(entries)
    }

    fn edge_node_id(&self, sub: &Selection, object: &Map<String, Value>) -> Option<String> {
        let node_field = sub.get("node")?;
        let node = object.get("node")?.as_object()?;
        let type_name = if node_field.is_abstract {
            node.get("__typename")?.as_str()?.to_string()
        } else {
            node_field.field_type.clone()
        };
        self.entity_id(&type_name, node)
    }

    /// Drops previously stored edges that the incoming page supersedes:
    /// exact re-writes of the same edge record, and placeholder edges (node
    /// but no cursor) whose node just arrived with a real edge. Dropped
    /// placeholders lose their subscribers.
    fn reconcile_edges(
        &mut self,
        kept: Vec<LinkEntry>,
        new_ids: &[String],
        sub: &Selection,
        parent: &str,
        key: &str,
        variables: &Map<String, Value>,
    ) -> Vec<LinkEntry> {
        let mut incoming_nodes = HashSet::new();
        for id in new_ids {
            if let Some(StoredValue::Link(Some(node))) = self.storage.get(id, "node").value {
                incoming_nodes.insert(node);
            }
        }

        let current = self.subscriptions.get(parent, key);
        let mut result = Vec::with_capacity(kept.len());
        for entry in kept {
            if let LinkEntry::Ref(edge_id) = &entry {
                if new_ids.contains(edge_id) {
                    // the incoming page re-wrote this exact edge record
                    continue;
                }
                let node = match self.storage.get(edge_id, "node").value {
                    Some(StoredValue::Link(Some(node))) => Some(node),
                    _ => None,
                };
                let has_cursor = matches!(
                    self.storage.get(edge_id, "cursor").value,
                    Some(StoredValue::Scalar(cursor)) if !cursor.is_null()
                );
                if let Some(node) = node {
                    if !has_cursor && incoming_nodes.contains(&node) {
                        debug!(edge = %edge_id, "placeholder edge claimed by page load");
                        let mut visited = HashSet::new();
                        self.remove_subscribers(edge_id, sub, &current, variables, &mut visited);
                        continue;
                    }
                }
            }
            result.push(entry);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn write_scalar(
        &mut self,
        parent: &str,
        key: &str,
        field: &SelectionField,
        value: &Value,
        previous: Option<StoredValue>,
        visible: bool,
        layer: LayerId,
        apply_updates: bool,
        to_notify: &mut Vec<Rc<SubscriptionSpec>>,
    ) {
        let mut new_value = value.clone();
        if apply_updates {
            if let Some(update @ (ListUpdate::Append | ListUpdate::Prepend)) = field.update {
                if let (Some(StoredValue::Scalar(Value::Array(stored))), Value::Array(incoming)) =
                    (&previous, value)
                {
                    let merged = match update {
                        ListUpdate::Append => {
                            stored.iter().chain(incoming.iter()).cloned().collect()
                        }
                        _ => incoming.iter().chain(stored.iter()).cloned().collect(),
                    };
                    new_value = Value::Array(merged);
                }
            }
        }

        let stored = StoredValue::Scalar(new_value);
        let changed = previous.as_ref() != Some(&stored);
        self.storage.write(parent, key, stored, layer);
        if changed && visible {
            to_notify.extend(self.subscriptions.get(parent, key));
        }
    }

    /// Applies the out-of-band list operations a selection field declares,
    /// letting one write mutate lists anchored elsewhere in the graph.
    fn apply_operations(
        &mut self,
        field: &SelectionField,
        value: &Value,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        for operation in &field.operations {
            let parent = match &operation.parent_id {
                Some(reference) => match reference.resolve(variables) {
                    Some(id) => id,
                    None => {
                        warn!(?reference, "operation parent did not resolve to an id");
                        continue;
                    }
                },
                None => ROOT_ID.to_string(),
            };

            match operation.action {
                OperationAction::Insert => {
                    let Some(list) = &operation.list else { continue };
                    let Some(item_selection) = &field.fields else { continue };
                    let position = operation.position.unwrap_or(ListPosition::Last);
                    for item in operation_items(value) {
                        self.list_insert(
                            list,
                            &parent,
                            item_selection,
                            item,
                            variables,
                            position,
                            operation.when.as_ref(),
                        )?;
                    }
                }
                OperationAction::Remove => {
                    let Some(list) = &operation.list else { continue };
                    for item in operation_items(value) {
                        self.list_remove_data(
                            list,
                            &parent,
                            item,
                            variables,
                            operation.when.as_ref(),
                        )?;
                    }
                }
                OperationAction::Delete => {
                    let Some(target_type) = &operation.target_type else {
                        continue;
                    };
                    for raw in delete_targets(value)? {
                        if let Some(id) = self.id(target_type, &Value::String(raw)) {
                            self.delete(&id)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// The objects an insert/remove operation applies to: the written value
/// itself, or each object element when the value is a list.
fn operation_items(value: &Value) -> Vec<&Map<String, Value>> {
    match value {
        Value::Object(object) => vec![object],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// The raw id strings a delete operation targets. Anything that is not a
/// string (or list of strings) is a hard error.
fn delete_targets(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(raw) => Ok(vec![raw.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CacheError::InvalidParentId {
                        value: item.to_string(),
                    })
            })
            .collect(),
        other => Err(CacheError::InvalidParentId {
            value: other.to_string(),
        }),
    }
}
