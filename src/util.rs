//! Stable key derivation: sorted-key JSON stringify and field-wise deep merge.
//!
//! This is the foundation for dedup keys, variable-keyed field keys, and
//! entity keys. Determinism across runs is the load-bearing property here,
//! not speed.

use serde_json::Map;
use serde_json::Value;

/// Sorted-key JSON encoding of `value`, dropping `null`-via-`undefined`
/// semantics: Rust has no `undefined`, so callers represent "absent field"
/// by omitting the key from the map entirely (never by storing `Value::Null`
/// for a field that should be considered absent). `Value::Null` itself is
/// stringified as `null` and participates in equality normally.
///
/// `stable_stringify(x) == stable_stringify(y) <=> x` and `y` are
/// structurally equal once object keys are reordered canonically.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Canonicalized argument stringify used to build a `FieldKey`: the `args`
/// object with variables substituted, sorted-key-encoded, with any field
/// whose resolved value is absent dropped before encoding.
pub fn stable_args_stringify(args: &Map<String, Value>, variables: &Map<String, Value>) -> String {
    let resolved = resolve_variables(args, variables);
    stable_stringify(&resolved)
}

fn resolve_variables(args: &Map<String, Value>, variables: &Map<String, Value>) -> Value {
    let mut resolved = Map::new();
    for (key, value) in args {
        if let Some(name) = variable_name(value) {
            if let Some(v) = variables.get(name) {
                if !v.is_null() || variables.contains_key(name) {
                    resolved.insert(key.clone(), v.clone());
                }
            }
            // Variable declared but not supplied: treat as absent, drop the key.
        } else {
            resolved.insert(key.clone(), resolve_nested(value, variables));
        }
    }
    Value::Object(resolved)
}

fn resolve_nested(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(name) = variable_name(value) {
                return variables.get(name).cloned().unwrap_or(Value::Null);
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve_nested(v, variables)))
                    .collect(),
            )
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_nested(v, variables)).collect())
        }
        other => other.clone(),
    }
}

/// A variable reference is encoded by artifact compilation as
/// `{"__var": "name"}`; this is the only shape this crate treats specially
/// when resolving argument values, since compiled artifacts never retain
/// GraphQL AST `Variable` nodes directly.
fn variable_name(value: &Value) -> Option<&str> {
    value.as_object()?.get("__var")?.as_str()
}

/// Field-wise deep-assign merge of `incoming` into `base`, used by cache
/// writes to merge an embedded (non-entity) record while
/// preserving unrelated sibling fields. Scalars and arrays in `incoming`
/// replace the corresponding value in `base`; nested objects merge
/// recursively.
pub fn deep_merge(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, incoming_value) => {
            *base_slot = incoming_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_stringify_is_key_order_independent() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(stable_stringify(&a), stable_stringify(&b));
    }

    #[test]
    fn stable_stringify_distinguishes_different_values() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(stable_stringify(&a), stable_stringify(&b));
    }

    #[test]
    fn stable_stringify_nested_arrays_and_objects() {
        let a = json!({"list": [{"z": 1, "y": 2}, 3], "top": true});
        let b = json!({"top": true, "list": [{"y": 2, "z": 1}, 3]});
        assert_eq!(stable_stringify(&a), stable_stringify(&b));
    }

    #[test]
    fn args_stringify_substitutes_variables_and_drops_missing() {
        let mut args = Map::new();
        args.insert("id".into(), json!({"__var": "userId"}));
        args.insert("missing".into(), json!({"__var": "nope"}));
        let mut vars = Map::new();
        vars.insert("userId".into(), json!(1));
        assert_eq!(stable_args_stringify(&args, &vars), r#"{"id":1}"#);
    }

    #[test]
    fn deep_merge_preserves_unrelated_siblings() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let incoming = json!({"nested": {"y": 3}, "b": 2});
        deep_merge(&mut base, &incoming);
        assert_eq!(base, json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 3}}));
    }
}
