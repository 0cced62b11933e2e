use lattice_types::{
    Error, FilterKind, ListDeclaration, ListFilter, ListPosition, OperationAction,
    OperationDeclaration, ParentRef, Selection, SelectionField, WhenCondition, resolve_filters,
};
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

fn variables(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn empty_selection() {
    let selection = Selection::new();
    assert!(selection.is_empty());
    assert!(!selection.contains("viewer"));
    assert!(selection.get("viewer").is_none());
}

#[test]
fn insert_and_lookup() {
    let selection = Selection::new()
        .with("id", SelectionField::scalar("ID", "id"))
        .with("firstName", SelectionField::scalar("String", "firstName"));

    assert!(selection.contains("id"));
    let field = selection.get("firstName").unwrap();
    assert_eq!(field.field_type, "String");
    assert_eq!(field.key_raw, "firstName");
    assert!(field.fields.is_none());
}

#[test]
fn iteration_is_attribute_ordered() {
    let selection = Selection::new()
        .with("zeta", SelectionField::scalar("String", "zeta"))
        .with("alpha", SelectionField::scalar("String", "alpha"));

    let attributes: Vec<&String> = selection.iter().map(|(name, _)| name).collect();
    assert_eq!(attributes, ["alpha", "zeta"]);
}

#[test]
fn object_fields_nest() {
    let selection = Selection::new().with(
        "viewer",
        SelectionField::object(
            "User",
            "viewer",
            Selection::new().with("id", SelectionField::scalar("ID", "id")),
        ),
    );

    let viewer = selection.get("viewer").unwrap();
    assert!(viewer.fields.as_ref().unwrap().contains("id"));
}

#[test]
fn selection_serde_round_trip() {
    let selection = Selection::new().with(
        "users",
        SelectionField::object(
            "User",
            "users(first: $limit)",
            Selection::new().with("id", SelectionField::scalar("ID", "id")),
        )
        .with_list(ListDeclaration::plain("All_Users", "User")),
    );

    let encoded = serde_json::to_value(&selection).unwrap();
    // transparent: the selection serializes as the attribute map itself
    assert!(encoded.get("users").is_some());
    let decoded: Selection = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, selection);
}

#[test]
fn resolve_literal_filters() {
    let mut filters = BTreeMap::new();
    filters.insert(
        "name".to_string(),
        ListFilter::new(FilterKind::String, "hello"),
    );
    filters.insert(
        "favorites".to_string(),
        ListFilter::new(FilterKind::Boolean, "true"),
    );
    filters.insert("count".to_string(), ListFilter::new(FilterKind::Int, "5"));
    filters.insert(
        "weight".to_string(),
        ListFilter::new(FilterKind::Float, "1.5"),
    );

    let resolved = resolve_filters(&filters, &Map::new()).unwrap();
    assert_eq!(resolved.get("name"), Some(&json!("hello")));
    assert_eq!(resolved.get("favorites"), Some(&json!(true)));
    assert_eq!(resolved.get("count"), Some(&json!(5)));
    assert_eq!(resolved.get("weight"), Some(&json!(1.5)));
}

#[test]
fn resolve_variable_filter() {
    let mut filters = BTreeMap::new();
    filters.insert(
        "owner".to_string(),
        ListFilter::new(FilterKind::Variable, "userId"),
    );

    let bound = resolve_filters(&filters, &variables(json!({"userId": "User:1"}))).unwrap();
    assert_eq!(bound.get("owner"), Some(&json!("User:1")));

    // unbound variables resolve to null rather than failing
    let unbound = resolve_filters(&filters, &Map::new()).unwrap();
    assert_eq!(unbound.get("owner"), Some(&Value::Null));
}

#[test]
fn invalid_literal_is_an_error() {
    let mut filters = BTreeMap::new();
    filters.insert(
        "count".to_string(),
        ListFilter::new(FilterKind::Int, "not-a-number"),
    );

    let err = resolve_filters(&filters, &Map::new()).unwrap_err();
    match err {
        Error::InvalidFilterValue { filter, kind, value } => {
            assert_eq!(filter, "count");
            assert_eq!(kind, FilterKind::Int);
            assert_eq!(value, "not-a-number");
        }
    }
}

#[test]
fn when_must_matches_filters() {
    let mut conditions = BTreeMap::new();
    conditions.insert("favorites".to_string(), json!(true));
    let when = WhenCondition::must(conditions);

    let mut filters = BTreeMap::new();
    filters.insert("favorites".to_string(), json!(true));
    assert!(when.validate(&filters));

    filters.insert("favorites".to_string(), json!(false));
    assert!(!when.validate(&filters));
}

#[test]
fn when_must_fails_on_missing_filter() {
    let mut conditions = BTreeMap::new();
    conditions.insert("favorites".to_string(), json!(true));
    let when = WhenCondition::must(conditions);
    assert!(!when.validate(&BTreeMap::new()));
}

#[test]
fn when_must_not_passes_on_missing_filter() {
    let mut conditions = BTreeMap::new();
    conditions.insert("favorites".to_string(), json!(true));
    let when = WhenCondition::must_not(conditions);

    assert!(when.validate(&BTreeMap::new()));

    let mut filters = BTreeMap::new();
    filters.insert("favorites".to_string(), json!(true));
    assert!(!when.validate(&filters));
}

#[test]
fn empty_when_always_passes() {
    let when = WhenCondition::default();
    let mut filters = BTreeMap::new();
    filters.insert("anything".to_string(), json!(1));
    assert!(when.validate(&filters));
    assert!(when.validate(&BTreeMap::new()));
}

#[test]
fn parent_ref_resolution() {
    let literal = ParentRef::Literal("User:1".to_string());
    assert_eq!(literal.resolve(&Map::new()), Some("User:1".to_string()));

    let variable = ParentRef::Variable("parent".to_string());
    assert_eq!(
        variable.resolve(&variables(json!({"parent": "User:2"}))),
        Some("User:2".to_string())
    );
    assert_eq!(variable.resolve(&Map::new()), None);
    // non-string bindings do not resolve
    assert_eq!(variable.resolve(&variables(json!({"parent": 7}))), None);
}

#[test]
fn operation_builders() {
    let insert = OperationDeclaration::insert("All_Users")
        .with_position(ListPosition::First)
        .with_parent(ParentRef::Literal("User:1".to_string()));
    assert_eq!(insert.action, OperationAction::Insert);
    assert_eq!(insert.list.as_deref(), Some("All_Users"));
    assert_eq!(insert.position, Some(ListPosition::First));

    let remove = OperationDeclaration::remove("All_Users");
    assert_eq!(remove.action, OperationAction::Remove);

    let delete = OperationDeclaration::delete("User");
    assert_eq!(delete.action, OperationAction::Delete);
    assert_eq!(delete.target_type.as_deref(), Some("User"));
    assert!(delete.list.is_none());
}
