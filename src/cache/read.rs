//! Projecting a selection tree out of normalized storage.

use serde_json::Map;
use serde_json::Value;

use crate::artifact::Selection;

use super::key::FieldKey;
use super::key::StorageKey;
use super::storage::CacheValue;
use super::storage::Record;
use super::storage::Storage;

/// A field the selection needs was absent from storage. Aborts the whole
/// read rather than the single field: a partial object is not a valid
/// cache hit.
struct Miss;

pub struct ReadOutcome {
    pub data: Option<Value>,
    pub stale: bool,
    pub touched: Vec<(StorageKey, FieldKey)>,
}

pub fn read(
    storage: &Storage,
    is_pending: &impl Fn(&StorageKey, &FieldKey) -> bool,
    root: &StorageKey,
    selections: &[Selection],
    variables: &Map<String, Value>,
) -> ReadOutcome {
    let mut touched = Vec::new();
    let record = storage.get(root);
    match read_fields(storage, record, Some(root), selections, variables, &mut touched) {
        Ok(obj) => {
            let stale = touched.iter().any(|(sk, fk)| is_pending(sk, fk));
            ReadOutcome {
                data: Some(Value::Object(obj)),
                stale,
                touched,
            }
        }
        Err(Miss) => ReadOutcome {
            data: None,
            stale: false,
            touched,
        },
    }
}

/// Walks `selections` against `record`. `touch_key` is `Some` when `record`
/// is an addressable entity (or root) whose reads should be subscribed to;
/// it is `None` inside an embedded (non-entity) record, whose staleness is
/// already covered by the single `FieldKey` it was read out of.
fn read_fields(
    storage: &Storage,
    record: Option<&Record>,
    touch_key: Option<&StorageKey>,
    selections: &[Selection],
    variables: &Map<String, Value>,
    touched: &mut Vec<(StorageKey, FieldKey)>,
) -> Result<Map<String, Value>, Miss> {
    let mut out = Map::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let field_key = FieldKey::new(&field.name, field.args.as_ref(), variables);
                if let Some(key) = touch_key {
                    touched.push((key.clone(), field_key.clone()));
                }
                let value = record.and_then(|r| r.get(&field_key)).ok_or(Miss)?;
                let resolved = resolve_value(storage, value, field.selections.as_deref(), variables, touched)?;
                out.insert(field.response_key().to_string(), resolved);
            }
            Selection::FragmentSpread(spread) => {
                let nested = read_fields(storage, record, touch_key, &spread.selections, variables, touched)?;
                out.extend(nested);
            }
            Selection::InlineFragment(inline) => {
                if !type_condition_matches(record, &inline.type_condition) {
                    continue;
                }
                let nested = read_fields(storage, record, touch_key, &inline.selections, variables, touched)?;
                out.extend(nested);
            }
        }
    }
    Ok(out)
}

fn type_condition_matches(record: Option<&Record>, condition: &Option<String>) -> bool {
    let Some(condition) = condition else {
        return true;
    };
    let typename_key = FieldKey::plain("__typename");
    matches!(
        record.and_then(|r| r.get(&typename_key)),
        Some(CacheValue::Scalar(Value::String(s))) if s == condition
    )
}

fn resolve_value(
    storage: &Storage,
    value: &CacheValue,
    selections: Option<&[Selection]>,
    variables: &Map<String, Value>,
    touched: &mut Vec<(StorageKey, FieldKey)>,
) -> Result<Value, Miss> {
    match value {
        CacheValue::Scalar(v) => Ok(v.clone()),
        CacheValue::Link(target) => {
            let selections = selections.ok_or(Miss)?;
            let record = storage.get(target);
            let obj = read_fields(storage, record, Some(target), selections, variables, touched)?;
            Ok(Value::Object(obj))
        }
        CacheValue::Record(record) => {
            let selections = selections.ok_or(Miss)?;
            let obj = read_fields(storage, Some(record), None, selections, variables, touched)?;
            Ok(Value::Object(obj))
        }
        CacheValue::List(items) => {
            let mut array = Vec::with_capacity(items.len());
            for item in items {
                if matches!(item, CacheValue::Scalar(Value::Null)) {
                    array.push(Value::Null);
                } else {
                    array.push(resolve_value(storage, item, selections, variables, touched)?);
                }
            }
            Ok(Value::Array(array))
        }
    }
}
