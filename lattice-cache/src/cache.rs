//! The cache façade.
//!
//! `Cache` composes layered storage, the subscription registry, the list
//! manager and the garbage collector behind a narrow public surface:
//! `write`, `read`, `subscribe`, `unsubscribe`, `list`, `delete`, `id`,
//! plus the collaborator hooks `resolve_layer` and `tick`. Collaborator
//! machinery is `pub(crate)`; there is no escape-hatch namespace.
//!
//! Construction takes an explicit [`CacheConfig`] — hosts build one cache
//! instance and pass it around, there is no process-wide singleton.

use crate::error::Result;
use crate::gc::GarbageCollector;
use crate::key::evaluate_key;
use crate::lists::ListCollection;
use crate::storage::{InMemoryStorage, LayerId, StoredValue, flatten_links};
use crate::subscription::{SubscriptionRegistry, SubscriptionSpec, spec_key};
use lattice_types::{CacheConfig, ListDeclaration, Selection, resolve_filters};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;
use tracing::debug;

/// The id of the root record (the one `Query`-rooted selections hang off).
pub const ROOT_ID: &str = "_ROOT_";

/// A normalized object-graph cache.
pub struct Cache {
    pub(crate) config: CacheConfig,
    pub(crate) storage: InMemoryStorage,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) lists: ListCollection,
    pub(crate) gc: GarbageCollector,
}

impl Cache {
    /// Creates an empty cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let gc = GarbageCollector::new(config.gc_buffer_size());
        Self {
            config,
            storage: InMemoryStorage::new(),
            subscriptions: SubscriptionRegistry::new(),
            lists: ListCollection::new(),
            gc,
        }
    }

    /// The configuration the cache was built with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read-only view of the storage stack.
    #[must_use]
    pub fn storage(&self) -> &InMemoryStorage {
        &self.storage
    }

    /// Read-only view of the subscription registry.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Computes the entity id for a value of the given type.
    ///
    /// `data` is either an object carrying the type's identity fields or the
    /// raw identity string itself. Returns `None` when the identity cannot
    /// be computed.
    #[must_use]
    pub fn id(&self, type_name: &str, data: &Value) -> Option<String> {
        match data {
            Value::String(raw) => Some(format!("{type_name}:{raw}")),
            Value::Object(fields) => self.entity_id(type_name, fields),
            _ => None,
        }
    }

    /// Registers a subscriber: walks the selection from the spec's parent,
    /// adding one reference per path at every `(entity, field)` it reaches,
    /// installing list handles for `list`-marked fields along the way.
    pub fn subscribe(
        &mut self,
        spec: &Rc<SubscriptionSpec>,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        let parent = root_of(spec);
        self.add_subscribers(&parent, spec, &spec.selection, variables)
    }

    /// Undoes one `subscribe`: walks the same selection decrementing the
    /// spec's reference counts; the callback detaches from a field only when
    /// no path reaches it anymore.
    pub fn unsubscribe(&mut self, spec: &Rc<SubscriptionSpec>, variables: &Map<String, Value>) {
        let parent = root_of(spec);
        let targets = [Rc::clone(spec)];
        let mut visited = HashSet::new();
        self.remove_subscribers(&parent, &spec.selection, &targets, variables, &mut visited);
    }

    /// Deletes a whole record: severs every subscription rooted in its
    /// subtree, removes it from every registered list, then drops its fields
    /// from every storage layer.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        debug!(id, "deleting record");
        let mut visited = HashSet::new();
        self.remove_all_subscribers(id, None, &mut visited);

        let variables = Map::new();
        for info in self.lists.all() {
            self.list_remove_id_info(&info, id, &variables)?;
        }

        self.storage.delete_record(id);
        self.subscriptions.drop_record(id);
        self.gc.forget_record(id);
        Ok(())
    }

    /// Commits an optimistic layer. The caller of an optimistic `write` must
    /// issue exactly one resolve for the returned layer id; resolving an
    /// already-resolved layer is a no-op.
    pub fn resolve_layer(&mut self, layer: LayerId) {
        self.storage.resolve_layer(layer, None);
    }

    /// One garbage-collection step; driven by an external periodic timer.
    pub fn tick(&mut self) {
        self.gc.tick(&mut self.storage, &self.subscriptions);
    }

    // ── internal collaborator surface ────────────────────────────

    /// Notifies each distinct spec once with freshly read data.
    pub(crate) fn notify_all(&self, specs: Vec<Rc<SubscriptionSpec>>) {
        let mut seen = HashSet::new();
        for spec in specs {
            if seen.insert(spec_key(&spec)) {
                self.notify(&spec);
            }
        }
    }

    fn notify(&self, spec: &Rc<SubscriptionSpec>) {
        let variables = spec.variables();
        let parent = root_of(spec);
        let mut touched = BTreeSet::new();
        let data = self.read_selection(&parent, &spec.selection, &variables, &mut touched);
        (spec.set)(data);
    }

    fn add_subscribers(
        &mut self,
        parent: &str,
        spec: &Rc<SubscriptionSpec>,
        selection: &Selection,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        for (_attribute, field) in selection.iter() {
            let key = evaluate_key(&field.key_raw, variables);
            self.subscriptions.add_field(parent, &key, spec);
            self.gc.reset_lifetime(parent, &key);

            if let Some(declaration) = &field.list {
                self.register_list(parent, &key, declaration, field, variables)?;
            }

            if let Some(sub) = &field.fields {
                match self.storage.get(parent, &key).value {
                    Some(StoredValue::Link(Some(linked))) => {
                        self.add_subscribers(&linked, spec, sub, variables)?;
                    }
                    Some(StoredValue::LinkList(entries)) => {
                        for linked in flatten_links(&entries) {
                            self.add_subscribers(&linked, spec, sub, variables)?;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn register_list(
        &mut self,
        parent: &str,
        key: &str,
        declaration: &ListDeclaration,
        field: &lattice_types::SelectionField,
        variables: &Map<String, Value>,
    ) -> Result<()> {
        let filters = resolve_filters(&field.filters, variables)?;
        self.lists.register(crate::lists::ListInfo {
            name: declaration.name.clone(),
            record_id: parent.to_string(),
            key: key.to_string(),
            list_type: declaration.list_type.clone(),
            connection: declaration.connection,
            selection: field.fields.clone().unwrap_or_default(),
            filters,
        });
        Ok(())
    }

    /// Selection-driven unsubscription: decrements one path per target at
    /// every reachable field. The `visited` set terminates the walk on
    /// self-referential records.
    pub(crate) fn remove_subscribers(
        &mut self,
        id: &str,
        selection: &Selection,
        targets: &[Rc<SubscriptionSpec>],
        variables: &Map<String, Value>,
        visited: &mut HashSet<String>,
    ) {
        if !visited.insert(id.to_string()) {
            return;
        }
        for (_attribute, field) in selection.iter() {
            let key = evaluate_key(&field.key_raw, variables);
            self.subscriptions.remove_field(id, &key, targets);

            if let Some(sub) = &field.fields {
                match self.storage.get(id, &key).value {
                    Some(StoredValue::Link(Some(linked))) => {
                        self.remove_subscribers(&linked, sub, targets, variables, visited);
                    }
                    Some(StoredValue::LinkList(entries)) => {
                        for linked in flatten_links(&entries) {
                            self.remove_subscribers(&linked, sub, targets, variables, visited);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Storage-driven unsubscription used by `delete`: infers the subtree
    /// from what is actually stored and removes every subscriber (or only
    /// the given targets) from each reachable field.
    pub(crate) fn remove_all_subscribers(
        &mut self,
        id: &str,
        targets: Option<&[Rc<SubscriptionSpec>]>,
        visited: &mut HashSet<String>,
    ) {
        if !visited.insert(id.to_string()) {
            return;
        }
        for (field, value) in self.storage.record_fields(id) {
            match targets {
                Some(targets) => self.subscriptions.remove_field(id, &field, targets),
                None => self.subscriptions.drop_field(id, &field),
            }
            match value {
                StoredValue::Link(Some(linked)) => {
                    self.remove_all_subscribers(&linked, targets, visited);
                }
                StoredValue::LinkList(entries) => {
                    for linked in flatten_links(&entries) {
                        self.remove_all_subscribers(&linked, targets, visited);
                    }
                }
                _ => {}
            }
        }
    }

    /// `"{Type}:{identity}"` for an object carrying every identity field of
    /// its type, `None` otherwise (the object is embedded).
    pub(crate) fn entity_id(&self, type_name: &str, data: &Map<String, Value>) -> Option<String> {
        let key_fields = self.config.key_fields(type_name);
        if key_fields.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(key_fields.len());
        for field in key_fields {
            parts.push(identity_part(data.get(field)?)?);
        }
        Some(format!("{type_name}:{}", parts.join("__")))
    }
}

fn root_of(spec: &Rc<SubscriptionSpec>) -> String {
    spec.parent_id.clone().unwrap_or_else(|| ROOT_ID.to_string())
}

fn identity_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
