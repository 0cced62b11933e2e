//! Raw key evaluation.
//!
//! Field keys produced by codegen embed their arguments verbatim, so a field
//! like `friends(first: $limit)` must be specialized against the variables of
//! the current request before it can address storage. The same raw field with
//! different variable bindings occupies different cache slots.

use serde_json::{Map, Value};

/// Evaluates a raw field key against a variables map.
///
/// The key is scanned character by character. Outside of a double-quoted
/// string a `$` begins a variable name (`[A-Za-z0-9_]+`); the reference is
/// replaced with the JSON serialization of the bound value, or the literal
/// text `undefined` when the variable is absent. A `$` inside a quoted string
/// is copied verbatim.
#[must_use]
pub fn evaluate_key(key_raw: &str, variables: &Map<String, Value>) -> String {
    let mut evaluated = String::with_capacity(key_raw.len());
    let mut var_name = String::new();
    let mut in_string = false;
    let mut in_variable = false;

    for c in key_raw.chars() {
        if in_variable {
            if c.is_ascii_alphanumeric() || c == '_' {
                var_name.push(c);
                continue;
            }
            // the name ended on this character, which still needs handling
            substitute(&mut evaluated, &var_name, variables);
            var_name.clear();
            in_variable = false;
        }

        if c == '$' && !in_string {
            in_variable = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
        }
        evaluated.push(c);
    }

    if in_variable {
        substitute(&mut evaluated, &var_name, variables);
    }

    evaluated
}

fn substitute(out: &mut String, name: &str, variables: &Map<String, Value>) {
    match variables.get(name).and_then(|v| serde_json::to_string(v).ok()) {
        Some(serialized) => out.push_str(&serialized),
        None => out.push_str("undefined"),
    }
}
