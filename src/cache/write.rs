//! Normalizing a GraphQL response into flat storage.

use std::collections::HashSet;

use serde_json::Map;
use serde_json::Value;

use crate::artifact::Selection;
use crate::schema::EntityDescriptor;
use crate::schema::SchemaDescriptor;

use super::key::FieldKey;
use super::key::StorageKey;
use super::storage::CacheValue;
use super::storage::Record;
use super::storage::Storage;

/// Writes `data` against `selections` rooted at `storage_key`, returning
/// every `(StorageKey, FieldKey)` whose stored value actually changed.
pub fn write_result(
    storage: &mut Storage,
    schema: &SchemaDescriptor,
    storage_key: &StorageKey,
    selections: &[Selection],
    data: &Value,
    variables: &Map<String, Value>,
) -> HashSet<(StorageKey, FieldKey)> {
    let mut changed = HashSet::new();
    write_fields(storage, schema, storage_key, selections, data, variables, &mut changed);
    changed
}

fn write_fields(
    storage: &mut Storage,
    schema: &SchemaDescriptor,
    storage_key: &StorageKey,
    selections: &[Selection],
    data: &Value,
    variables: &Map<String, Value>,
    changed: &mut HashSet<(StorageKey, FieldKey)>,
) {
    let Some(obj) = data.as_object() else {
        return;
    };
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let Some(response_value) = obj.get(field.response_key()) else {
                    continue;
                };
                let field_key = FieldKey::new(&field.name, field.args.as_ref(), variables);
                let normalized = normalize_value(
                    storage,
                    schema,
                    response_value,
                    field.selections.as_deref(),
                    variables,
                    changed,
                );
                set_field(storage, storage_key, &field_key, normalized, changed);
            }
            Selection::FragmentSpread(spread) => {
                write_fields(storage, schema, storage_key, &spread.selections, data, variables, changed);
            }
            Selection::InlineFragment(inline) => {
                if !typename_matches(obj, &inline.type_condition) {
                    continue;
                }
                write_fields(storage, schema, storage_key, &inline.selections, data, variables, changed);
            }
        }
    }
}

/// Same traversal as [`write_fields`], but accumulating into a detached
/// `Record` rather than a storage cell — used for object fields that never
/// resolved to a schema entity. Nested entities reachable underneath one
/// are still written through to global storage as usual.
fn write_embedded(
    storage: &mut Storage,
    schema: &SchemaDescriptor,
    selections: &[Selection],
    data: &Value,
    variables: &Map<String, Value>,
    changed: &mut HashSet<(StorageKey, FieldKey)>,
    record: &mut Record,
) {
    let Some(obj) = data.as_object() else {
        return;
    };
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let Some(response_value) = obj.get(field.response_key()) else {
                    continue;
                };
                let field_key = FieldKey::new(&field.name, field.args.as_ref(), variables);
                let normalized = normalize_value(
                    storage,
                    schema,
                    response_value,
                    field.selections.as_deref(),
                    variables,
                    changed,
                );
                record.insert(field_key, normalized);
            }
            Selection::FragmentSpread(spread) => {
                write_embedded(storage, schema, &spread.selections, data, variables, changed, record);
            }
            Selection::InlineFragment(inline) => {
                if !typename_matches(obj, &inline.type_condition) {
                    continue;
                }
                write_embedded(storage, schema, &inline.selections, data, variables, changed, record);
            }
        }
    }
}

fn typename_matches(obj: &Map<String, Value>, condition: &Option<String>) -> bool {
    match condition {
        Some(cond) => obj.get("__typename").and_then(Value::as_str) == Some(cond.as_str()),
        None => true,
    }
}

fn normalize_value(
    storage: &mut Storage,
    schema: &SchemaDescriptor,
    value: &Value,
    selections: Option<&[Selection]>,
    variables: &Map<String, Value>,
    changed: &mut HashSet<(StorageKey, FieldKey)>,
) -> CacheValue {
    match value {
        Value::Array(items) => CacheValue::List(
            items
                .iter()
                .map(|item| normalize_value(storage, schema, item, selections, variables, changed))
                .collect(),
        ),
        Value::Object(obj) => {
            let Some(selections) = selections else {
                return CacheValue::Scalar(value.clone());
            };
            if let Some(typename) = obj.get("__typename").and_then(Value::as_str) {
                if let Some(entity) = schema.entity(typename) {
                    if let Some(key_parts) = resolve_key_fields(obj, entity) {
                        let target = StorageKey::entity(typename, &key_parts);
                        write_fields(storage, schema, &target, selections, value, variables, changed);
                        return CacheValue::Link(target);
                    }
                }
            }
            let mut record = Record::new();
            write_embedded(storage, schema, selections, value, variables, changed, &mut record);
            CacheValue::Record(record)
        }
        other => CacheValue::Scalar(other.clone()),
    }
}

fn resolve_key_fields(obj: &Map<String, Value>, entity: &EntityDescriptor) -> Option<Vec<String>> {
    entity
        .key_fields
        .iter()
        .map(|field| obj.get(field).map(key_part))
        .collect()
}

fn key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stores `new_value` under `(storage_key, field_key)`. Embedded records
/// deep-merge against whatever was already there, preserving sibling
/// fields the new write didn't touch; every other value kind replaces its
/// slot outright. Records the cell in `changed` when the new value isn't
/// equal to the old one.
fn set_field(
    storage: &mut Storage,
    storage_key: &StorageKey,
    field_key: &FieldKey,
    new_value: CacheValue,
    changed: &mut HashSet<(StorageKey, FieldKey)>,
) {
    let record = storage.record_mut(storage_key);
    let existing = record.get(field_key);
    let merged = match (existing, &new_value) {
        (Some(CacheValue::Record(old)), CacheValue::Record(incoming)) => {
            let mut merged = old.clone();
            for (k, v) in incoming {
                merged.insert(k.clone(), v.clone());
            }
            CacheValue::Record(merged)
        }
        _ => new_value,
    };
    if existing != Some(&merged) {
        changed.insert((storage_key.clone(), field_key.clone()));
    }
    record.insert(field_key.clone(), merged);
}
