//! Named, addressable lists.
//!
//! Subscribing a selection with a `list` marker registers the field as a
//! named list anchored at `(name, owning record)`. A [`ListHandle`] is a live
//! pointer to one registration through which mutations (append, prepend,
//! remove) are applied without re-stating the owning query.
//!
//! Inserts are synthesized writes: the handle builds a one-field selection
//! targeting the list's own key with the matching `update` marker and feeds
//! it through the normal write path, so diffing, notification and connection
//! placeholder handling all apply uniformly. Removals manipulate the stored
//! link list directly and sever the removed element's subscriptions.

use crate::cache::{Cache, ROOT_ID};
use crate::error::{CacheError, Result};
use crate::storage::{LinkEntry, StoredValue};
use lattice_types::{ListPosition, ListUpdate, Selection, SelectionField, WhenCondition};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// One registered list: where it lives, what it holds, and the filter values
/// captured when its owning selection was subscribed.
#[derive(Debug, Clone)]
pub(crate) struct ListInfo {
    pub name: String,
    pub record_id: String,
    pub key: String,
    pub list_type: String,
    pub connection: bool,
    /// The list field's sub-selection (for connections: the full
    /// `edges { node }` wrapper).
    pub selection: Selection,
    pub filters: BTreeMap<String, Value>,
}

impl ListInfo {
    /// The selection describing one element of the list.
    pub fn node_selection(&self) -> Selection {
        if !self.connection {
            return self.selection.clone();
        }
        self.selection
            .get("edges")
            .and_then(|edges| edges.fields.as_ref())
            .and_then(|edge| edge.get("node"))
            .and_then(|node| node.fields.clone())
            .unwrap_or_default()
    }

    /// The selection describing one edge of a connection.
    pub fn edge_selection(&self) -> Selection {
        self.selection
            .get("edges")
            .and_then(|edges| edges.fields.clone())
            .unwrap_or_default()
    }
}

/// The set of currently registered lists.
#[derive(Debug, Default)]
pub(crate) struct ListCollection {
    lists: Vec<ListInfo>,
}

impl ListCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a list, replacing any previous registration with the same
    /// name and owning record (re-subscribing refreshes captured filters).
    pub fn register(&mut self, info: ListInfo) {
        match self
            .lists
            .iter_mut()
            .find(|l| l.name == info.name && l.record_id == info.record_id)
        {
            Some(existing) => *existing = info,
            None => self.lists.push(info),
        }
    }

    pub fn find(&self, name: &str, record_id: &str) -> Option<&ListInfo> {
        self.lists
            .iter()
            .find(|l| l.name == name && l.record_id == record_id)
    }

    /// The unique registration under `name`, regardless of owning record.
    pub fn find_unique(&self, name: &str) -> Option<&ListInfo> {
        let mut matches = self.lists.iter().filter(|l| l.name == name);
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }

    /// Snapshot of every registration, for walks that mutate the cache.
    pub fn all(&self) -> Vec<ListInfo> {
        self.lists.clone()
    }
}

/// A live handle to one registered list.
///
/// Obtained from [`Cache::list`]; borrows the cache mutably for its lifetime.
pub struct ListHandle<'a> {
    cache: &'a mut Cache,
    info: ListInfo,
    when: Option<WhenCondition>,
}

impl std::fmt::Debug for ListHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListHandle")
            .field("info", &self.info)
            .field("when", &self.when)
            .finish_non_exhaustive()
    }
}

impl<'a> ListHandle<'a> {
    pub(crate) fn new(cache: &'a mut Cache, info: ListInfo) -> Self {
        Self {
            cache,
            info,
            when: None,
        }
    }

    /// The list's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The filter values captured at registration.
    #[must_use]
    pub fn filters(&self) -> &BTreeMap<String, Value> {
        &self.info.filters
    }

    /// Gates every following mutation on the condition; a failing condition
    /// turns the call into a silent no-op.
    #[must_use]
    pub fn when(mut self, condition: WhenCondition) -> Self {
        self.when = Some(condition);
        self
    }

    /// Inserts an element at the end of the list.
    pub fn append(
        &mut self,
        data: &Map<String, Value>,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        let info = self.info.clone();
        let selection = info.node_selection();
        self.cache.list_insert_info(
            &info,
            &selection,
            data,
            variables,
            ListPosition::Last,
            self.when.as_ref(),
        )
    }

    /// Inserts an element at the start of the list.
    pub fn prepend(
        &mut self,
        data: &Map<String, Value>,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        let info = self.info.clone();
        let selection = info.node_selection();
        self.cache.list_insert_info(
            &info,
            &selection,
            data,
            variables,
            ListPosition::First,
            self.when.as_ref(),
        )
    }

    /// Removes the element the given object identifies.
    pub fn remove(
        &mut self,
        data: &Map<String, Value>,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        let info = self.info.clone();
        if !self.passes_when() {
            return Ok(());
        }
        let type_name = data
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or(&info.list_type)
            .to_string();
        let Some(id) = self.cache.entity_id(&type_name, data) else {
            warn!(list = %info.name, "remove target carries no identity, ignoring");
            return Ok(());
        };
        self.cache.list_remove_id_info(&info, &id, variables)
    }

    /// Removes the element with the given entity id.
    pub fn remove_id(&mut self, id: &str, variables: &Map<String, Value>) -> Result<()> {
        let info = self.info.clone();
        if !self.passes_when() {
            return Ok(());
        }
        self.cache.list_remove_id_info(&info, id, variables)
    }

    fn passes_when(&self) -> bool {
        match &self.when {
            Some(condition) => condition.validate(&self.info.filters),
            None => true,
        }
    }
}

impl Cache {
    /// Looks up a registered list.
    ///
    /// With a parent the lookup is exact; without one the name must identify
    /// a single registration. Lists register when their owning selection is
    /// subscribed, so an unmounted query's lists are simply not found.
    pub fn list(&mut self, name: &str, parent: Option<&str>) -> Result<ListHandle<'_>> {
        let info = match parent {
            Some(parent) => self.lists.find(name, parent).cloned(),
            None => self.lists.find_unique(name).cloned(),
        };
        let Some(info) = info else {
            return Err(CacheError::ListNotFound {
                name: name.to_string(),
                parent: parent.unwrap_or(ROOT_ID).to_string(),
            });
        };
        Ok(ListHandle::new(self, info))
    }

    /// Insert routed by `(list name, owning record)`. An unregistered target
    /// list is a no-op: operations fire from mutation responses regardless of
    /// whether the owning query is currently mounted.
    pub(crate) fn list_insert(
        &mut self,
        name: &str,
        parent: &str,
        item_selection: &Selection,
        data: &Map<String, Value>,
        variables: &Map<String, Value>,
        position: ListPosition,
        when: Option<&WhenCondition>,
    ) -> Result<()> {
        let Some(info) = self.lists.find(name, parent).cloned() else {
            debug!(name, parent, "insert into unregistered list skipped");
            return Ok(());
        };
        self.list_insert_info(&info, item_selection, data, variables, position, when)
    }

    /// Remove routed by `(list name, owning record)`, identifying the target
    /// element from an object. Unregistered lists are a no-op.
    pub(crate) fn list_remove_data(
        &mut self,
        name: &str,
        parent: &str,
        data: &Map<String, Value>,
        variables: &Map<String, Value>,
        when: Option<&WhenCondition>,
    ) -> Result<()> {
        let Some(info) = self.lists.find(name, parent).cloned() else {
            debug!(name, parent, "removal from unregistered list skipped");
            return Ok(());
        };
        if let Some(condition) = when {
            if !condition.validate(&info.filters) {
                return Ok(());
            }
        }
        let type_name = data
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or(&info.list_type)
            .to_string();
        let Some(id) = self.entity_id(&type_name, data) else {
            warn!(name, "remove target carries no identity, ignoring");
            return Ok(());
        };
        self.list_remove_id_info(&info, &id, variables)
    }

    /// Builds the one-field selection and data tree that makes the regular
    /// write path perform the insertion.
    pub(crate) fn list_insert_info(
        &mut self,
        info: &ListInfo,
        item_selection: &Selection,
        data: &Map<String, Value>,
        variables: &Map<String, Value>,
        position: ListPosition,
        when: Option<&WhenCondition>,
    ) -> Result<()> {
        if let Some(condition) = when {
            if !condition.validate(&info.filters) {
                debug!(list = %info.name, "insert gated off by when condition");
                return Ok(());
            }
        }
        let update = match position {
            ListPosition::First => ListUpdate::Prepend,
            ListPosition::Last => ListUpdate::Append,
        };

        let (selection, tree) = if info.connection {
            connection_insert_write(info, item_selection, data, update)
        } else {
            plain_insert_write(info, item_selection, data, update)
        };

        let layer = self.storage.base_layer_id();
        let mut to_notify = Vec::new();
        self.write_selection(&info.record_id, &selection, &tree, variables, layer, true, &mut to_notify)?;
        self.notify_all(to_notify);
        Ok(())
    }

    /// Removes `id` from one list and severs the element's subscriptions.
    ///
    /// For a connection the element is indirect: the edge whose `node` links
    /// to `id` is located, unlinked, unsubscribed and its record deleted
    /// (edges are embedded and addressable nowhere else).
    pub(crate) fn list_remove_id_info(
        &mut self,
        info: &ListInfo,
        id: &str,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        if info.connection {
            self.connection_remove(info, id, variables)
        } else {
            self.plain_remove(info, id, variables)
        }
    }

    fn plain_remove(
        &mut self,
        info: &ListInfo,
        id: &str,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        let Some(StoredValue::LinkList(entries)) = self.storage.get(&info.record_id, &info.key).value
        else {
            return Ok(());
        };
        let (remaining, changed) = without_link(entries, id);
        if !changed {
            return Ok(());
        }

        let subscribers = self.subscriptions.get(&info.record_id, &info.key);
        let mut visited = HashSet::new();
        self.remove_subscribers(id, &info.node_selection(), &subscribers, variables, &mut visited);

        let layer = self.storage.base_layer_id();
        self.storage
            .write(&info.record_id, &info.key, StoredValue::LinkList(remaining), layer);
        self.notify_all(subscribers);
        Ok(())
    }

    fn connection_remove(
        &mut self,
        info: &ListInfo,
        id: &str,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        let Some(StoredValue::Link(Some(connection))) =
            self.storage.get(&info.record_id, &info.key).value
        else {
            return Ok(());
        };
        let Some(StoredValue::LinkList(edges)) = self.storage.get(&connection, "edges").value
        else {
            return Ok(());
        };

        // linear scan for the edge whose node links to the target
        let mut target_edge = None;
        for entry in &edges {
            if let LinkEntry::Ref(edge_id) = entry {
                if let Some(StoredValue::Link(Some(node))) = self.storage.get(edge_id, "node").value
                {
                    if node == id {
                        target_edge = Some(edge_id.clone());
                        break;
                    }
                }
            }
        }
        let Some(edge_id) = target_edge else {
            return Ok(());
        };

        let subscribers = self.subscriptions.get(&connection, "edges");
        let mut visited = HashSet::new();
        self.remove_subscribers(&edge_id, &info.edge_selection(), &subscribers, variables, &mut visited);

        let remaining = edges
            .into_iter()
            .filter(|entry| !matches!(entry, LinkEntry::Ref(e) if *e == edge_id))
            .collect();
        let layer = self.storage.base_layer_id();
        self.storage
            .write(&connection, "edges", StoredValue::LinkList(remaining), layer);

        let mut to_notify = subscribers;
        to_notify.extend(self.subscriptions.get(&info.record_id, &info.key));
        self.notify_all(to_notify);

        debug!(edge = %edge_id, "deleting unlinked connection edge");
        self.storage.delete_record(&edge_id);
        self.subscriptions.drop_record(&edge_id);
        self.gc.forget_record(&edge_id);
        Ok(())
    }
}

fn plain_insert_write(
    info: &ListInfo,
    item_selection: &Selection,
    data: &Map<String, Value>,
    update: ListUpdate,
) -> (Selection, Map<String, Value>) {
    let field = SelectionField::object(&info.list_type, &info.key, item_selection.clone())
        .with_update(update);
    let selection = Selection::new().with(&info.key, field);

    let mut tree = Map::new();
    tree.insert(
        info.key.clone(),
        Value::Array(vec![Value::Object(data.clone())]),
    );
    (selection, tree)
}

/// Wraps the element as `{ edges: [ { node } ] }` so the write path's
/// connection handling (placeholder reconciliation included) applies.
fn connection_insert_write(
    info: &ListInfo,
    item_selection: &Selection,
    data: &Map<String, Value>,
    update: ListUpdate,
) -> (Selection, Map<String, Value>) {
    let mut node_selection = item_selection.clone();
    if !node_selection.contains("__typename") {
        node_selection.insert("__typename", SelectionField::scalar("String", "__typename"));
    }
    let edge_selection = Selection::new().with(
        "node",
        SelectionField::object(&info.list_type, "node", node_selection).abstract_type(),
    );
    let edges_field =
        SelectionField::object(format!("{}Edge", info.list_type), "edges", edge_selection)
            .with_update(update);
    let connection_selection = Selection::new().with("edges", edges_field);
    let field = SelectionField::object(
        format!("{}Connection", info.list_type),
        &info.key,
        connection_selection,
    );
    let selection = Selection::new().with(&info.key, field);

    let mut node = data.clone();
    node.entry("__typename")
        .or_insert_with(|| Value::String(info.list_type.clone()));
    let mut edge = Map::new();
    edge.insert("node".to_string(), Value::Object(node));
    let mut connection = Map::new();
    connection.insert("edges".to_string(), Value::Array(vec![Value::Object(edge)]));
    let mut tree = Map::new();
    tree.insert(info.key.clone(), Value::Object(connection));
    (selection, tree)
}

/// Filters `id` out of a link list, recursing into nested lists.
fn without_link(entries: Vec<LinkEntry>, id: &str) -> (Vec<LinkEntry>, bool) {
    let mut changed = false;
    let mut result = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            LinkEntry::Ref(linked) if linked == id => changed = true,
            LinkEntry::List(inner) => {
                let (kept, inner_changed) = without_link(inner, id);
                changed |= inner_changed;
                result.push(LinkEntry::List(kept));
            }
            other => result.push(other),
        }
    }
    (result, changed)
}
