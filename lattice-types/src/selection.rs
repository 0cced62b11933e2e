//! Selection descriptors.
//!
//! A selection is the declarative tree that drives every cache traversal:
//! writes walk it alongside raw response data, reads walk it alongside
//! storage, and subscriptions walk it to register interest. Selections are
//! produced by an external codegen pipeline and are immutable once handed to
//! the cache, so everything here is plain data with serde derives.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An ordered map from attribute name to field descriptor.
///
/// The attribute name is the key the data tree uses (the GraphQL alias);
/// the descriptor's `key_raw` is the storage key template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection {
    fields: BTreeMap<String, SelectionField>,
}

impl Selection {
    /// Creates an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, used by tests and synthesized list writes.
    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, field: SelectionField) -> Self {
        self.fields.insert(attribute.into(), field);
        self
    }

    /// Inserts a field under the given attribute name.
    pub fn insert(&mut self, attribute: impl Into<String>, field: SelectionField) {
        self.fields.insert(attribute.into(), field);
    }

    /// Looks up the descriptor for an attribute.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&SelectionField> {
        self.fields.get(attribute)
    }

    /// Returns true if the selection declares the attribute.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.fields.contains_key(attribute)
    }

    /// Iterates over `(attribute, descriptor)` pairs in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SelectionField)> {
        self.fields.iter()
    }

    /// Returns true if no fields are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single field declaration inside a [`Selection`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionField {
    /// The GraphQL type of the field value (for links: the target type).
    pub field_type: String,
    /// The raw storage key, possibly containing `$variable` references.
    pub key_raw: String,
    /// Sub-selection for linked objects/lists. `None` marks a scalar leaf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Selection>,
    /// Marks the field as an addressable list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListDeclaration>,
    /// Filter arguments captured when the list is registered.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, ListFilter>,
    /// Out-of-band list operations triggered when this field is written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<OperationDeclaration>,
    /// Abstract fields resolve their concrete type from `__typename`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_abstract: bool,
    /// How written values merge with previously stored ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<ListUpdate>,
}

impl SelectionField {
    /// Shorthand for a scalar leaf.
    #[must_use]
    pub fn scalar(field_type: impl Into<String>, key_raw: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            key_raw: key_raw.into(),
            ..Self::default()
        }
    }

    /// Shorthand for a linked object or list with a sub-selection.
    #[must_use]
    pub fn object(
        field_type: impl Into<String>,
        key_raw: impl Into<String>,
        fields: Selection,
    ) -> Self {
        Self {
            field_type: field_type.into(),
            key_raw: key_raw.into(),
            fields: Some(fields),
            ..Self::default()
        }
    }

    /// Attaches a list declaration.
    #[must_use]
    pub fn with_list(mut self, list: ListDeclaration) -> Self {
        self.list = Some(list);
        self
    }

    /// Attaches filter declarations.
    #[must_use]
    pub fn with_filters(mut self, filters: BTreeMap<String, ListFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// Attaches operation declarations.
    #[must_use]
    pub fn with_operations(mut self, operations: Vec<OperationDeclaration>) -> Self {
        self.operations = operations;
        self
    }

    /// Marks the field abstract (interface/union typed).
    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Sets the update mode applied when `apply_updates` writes hit this field.
    #[must_use]
    pub fn with_update(mut self, update: ListUpdate) -> Self {
        self.update = Some(update);
        self
    }
}

/// Marks a field as a named, addressable list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDeclaration {
    /// The list's registered name.
    pub name: String,
    /// True when the field is connection-wrapped (`edges { node }`).
    #[serde(default)]
    pub connection: bool,
    /// The element type of the list.
    pub list_type: String,
}

impl ListDeclaration {
    /// Shorthand for a plain (non-connection) list.
    #[must_use]
    pub fn plain(name: impl Into<String>, list_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: false,
            list_type: list_type.into(),
        }
    }

    /// Shorthand for a connection-wrapped list.
    #[must_use]
    pub fn connection(name: impl Into<String>, list_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: true,
            list_type: list_type.into(),
        }
    }
}

/// How an incoming value merges with the stored one under `apply_updates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListUpdate {
    Append,
    Prepend,
    Replace,
}

/// Where an inserted element lands in the target list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListPosition {
    First,
    Last,
}

/// The scalar kind a filter literal is declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    String,
    Boolean,
    Int,
    Float,
    /// The value names a variable to resolve at registration time.
    Variable,
}

/// A filter argument declared on a list field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    pub kind: FilterKind,
    /// The literal text, or the variable name for [`FilterKind::Variable`].
    pub value: String,
}

impl ListFilter {
    #[must_use]
    pub fn new(kind: FilterKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Resolves declared filters against a variables map.
///
/// Literal kinds parse their text per the declared scalar kind; a literal
/// that does not parse is an [`Error::InvalidFilterValue`]. Variable filters
/// resolve to the bound value, or `Null` when unbound.
pub fn resolve_filters(
    filters: &BTreeMap<String, ListFilter>,
    variables: &Map<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    let mut resolved = BTreeMap::new();
    for (name, filter) in filters {
        let value = match filter.kind {
            FilterKind::String => Value::String(filter.value.clone()),
            FilterKind::Boolean => filter
                .value
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|_| invalid_filter(name, filter))?,
            FilterKind::Int => filter
                .value
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid_filter(name, filter))?,
            FilterKind::Float => filter
                .value
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| invalid_filter(name, filter))?,
            FilterKind::Variable => variables.get(&filter.value).cloned().unwrap_or(Value::Null),
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

fn invalid_filter(name: &str, filter: &ListFilter) -> Error {
    Error::InvalidFilterValue {
        filter: name.to_string(),
        kind: filter.kind,
        value: filter.value.clone(),
    }
}

/// A condition gating a list mutation.
///
/// `must` entries require the list's captured filter to equal the given
/// value; `must_not` entries require it to differ. Any failing entry turns
/// the mutating call into a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhenCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub must: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub must_not: Option<BTreeMap<String, Value>>,
}

impl WhenCondition {
    /// Shorthand for a `must` condition.
    #[must_use]
    pub fn must(conditions: BTreeMap<String, Value>) -> Self {
        Self {
            must: Some(conditions),
            must_not: None,
        }
    }

    /// Shorthand for a `must_not` condition.
    #[must_use]
    pub fn must_not(conditions: BTreeMap<String, Value>) -> Self {
        Self {
            must: None,
            must_not: Some(conditions),
        }
    }

    /// Evaluates the condition against a list's captured filter values.
    ///
    /// A `must` key missing from the filters fails; a `must_not` key missing
    /// from the filters passes.
    #[must_use]
    pub fn validate(&self, filters: &BTreeMap<String, Value>) -> bool {
        if let Some(must) = &self.must {
            for (name, expected) in must {
                if filters.get(name) != Some(expected) {
                    return false;
                }
            }
        }
        if let Some(must_not) = &self.must_not {
            for (name, expected) in must_not {
                if filters.get(name) == Some(expected) {
                    return false;
                }
            }
        }
        true
    }
}

/// What an operation does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Insert,
    Remove,
    Delete,
}

/// How an operation names the record owning its target list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParentRef {
    /// A concrete entity id.
    Literal(String),
    /// The name of a variable holding the entity id.
    Variable(String),
}

impl ParentRef {
    /// Resolves the reference to an entity id, if the binding exists and is
    /// a string.
    #[must_use]
    pub fn resolve(&self, variables: &Map<String, Value>) -> Option<String> {
        match self {
            ParentRef::Literal(id) => Some(id.clone()),
            ParentRef::Variable(name) => variables
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// A declarative list operation attached to a selection field.
///
/// Operations let one write (typically a mutation response) mutate lists
/// anchored elsewhere in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDeclaration {
    pub action: OperationAction,
    /// Target list name for insert/remove.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    /// Entity type for delete operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    /// Record owning the target list; defaults to the root record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ParentRef>,
    /// Insert position; defaults to [`ListPosition::Last`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<ListPosition>,
    /// Optional gate evaluated against the target list's filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<WhenCondition>,
}

impl OperationDeclaration {
    /// Shorthand for an insert into a named list.
    #[must_use]
    pub fn insert(list: impl Into<String>) -> Self {
        Self {
            action: OperationAction::Insert,
            list: Some(list.into()),
            target_type: None,
            parent_id: None,
            position: None,
            when: None,
        }
    }

    /// Shorthand for a removal from a named list.
    #[must_use]
    pub fn remove(list: impl Into<String>) -> Self {
        Self {
            action: OperationAction::Remove,
            list: Some(list.into()),
            target_type: None,
            parent_id: None,
            position: None,
            when: None,
        }
    }

    /// Shorthand for a record deletion by id value.
    #[must_use]
    pub fn delete(target_type: impl Into<String>) -> Self {
        Self {
            action: OperationAction::Delete,
            list: None,
            target_type: Some(target_type.into()),
            parent_id: None,
            position: None,
            when: None,
        }
    }

    /// Sets the owning record of the target list.
    #[must_use]
    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Sets the insert position.
    #[must_use]
    pub fn with_position(mut self, position: ListPosition) -> Self {
        self.position = Some(position);
        self
    }

    /// Attaches a gating condition.
    #[must_use]
    pub fn with_when(mut self, when: WhenCondition) -> Self {
        self.when = Some(when);
        self
    }
}
