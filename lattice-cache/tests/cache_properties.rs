//! Property-based tests for the key evaluator and layered storage.

use lattice_cache::{InMemoryStorage, StoredValue, evaluate_key};
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

fn literal_key_strategy() -> impl Strategy<Value = String> {
    // raw keys without variable references or quotes
    prop::string::string_regex("[a-zA-Z0-9_(), :.]{0,60}").unwrap()
}

fn variable_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,10}").unwrap()
}

fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}").unwrap()
}

proptest! {
    /// A key with no `$` in it is its own evaluation, whatever the variables.
    #[test]
    fn keys_without_variables_pass_through(key in literal_key_strategy(), bound in any::<i64>()) {
        let mut variables = Map::new();
        variables.insert("x".to_string(), json!(bound));
        prop_assert_eq!(evaluate_key(&key, &variables), key);
    }

    /// A bound variable reference is replaced by its JSON serialization.
    #[test]
    fn bound_variables_substitute(name in variable_name_strategy(), value in any::<i64>()) {
        let mut variables = Map::new();
        variables.insert(name.clone(), json!(value));
        let raw = format!("users(first: ${name})");
        prop_assert_eq!(evaluate_key(&raw, &variables), format!("users(first: {value})"));
    }

    /// An unbound reference always evaluates to the text `undefined`.
    #[test]
    fn unbound_variables_are_undefined(name in variable_name_strategy()) {
        let raw = format!("users(first: ${name})");
        prop_assert_eq!(evaluate_key(&raw, &Map::new()), "users(first: undefined)");
    }

    /// Within one layer, the last write to a field wins; other fields are
    /// untouched. The storage behaves like a plain map per layer.
    #[test]
    fn base_layer_behaves_like_a_map(
        writes in prop::collection::vec(
            (field_name_strategy(), any::<i64>()),
            1..40,
        )
    ) {
        let mut storage = InMemoryStorage::new();
        let base = storage.base_layer_id();
        let mut model: HashMap<String, i64> = HashMap::new();

        for (field, value) in &writes {
            storage.write("User:1", field, StoredValue::Scalar(json!(value)), base);
            model.insert(field.clone(), *value);
        }

        for (field, value) in model {
            prop_assert_eq!(
                storage.get("User:1", &field).value,
                Some(StoredValue::Scalar(json!(value)))
            );
        }
    }

    /// A value in an optimistic layer shadows any base writes, and squashing
    /// the layer preserves the displayed value.
    #[test]
    fn optimistic_value_survives_resolution(
        base_writes in prop::collection::vec(any::<i64>(), 0..10),
        speculative in any::<i64>(),
    ) {
        let mut storage = InMemoryStorage::new();
        let base = storage.base_layer_id();
        let upper = storage.create_layer(true);
        storage.write("User:1", "count", StoredValue::Scalar(json!(speculative)), upper);

        for value in base_writes {
            storage.write("User:1", "count", StoredValue::Scalar(json!(value)), base);
        }

        let displayed = storage.get("User:1", "count").value;
        prop_assert_eq!(displayed.clone(), Some(StoredValue::Scalar(json!(speculative))));

        storage.resolve_layer(upper, None);
        prop_assert_eq!(storage.layer_count(), 1);
        prop_assert_eq!(storage.get("User:1", "count").value, displayed);
    }
}

#[test]
fn evaluation_is_deterministic() {
    let mut variables = Map::new();
    variables.insert("limit".to_string(), Value::from(10));
    let raw = "friends(first: $limit)";
    assert_eq!(evaluate_key(raw, &variables), evaluate_key(raw, &variables));
}
