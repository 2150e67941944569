//! Normalized cache key types: `StorageKey` addresses a record (an entity
//! or the query root), `FieldKey` addresses one of its fields, folding in
//! any arguments the field was read with.

use serde_json::Map;
use serde_json::Value;

use crate::util::stable_args_stringify;

const ROOT_SENTINEL: &str = "ROOT";

/// Either the sentinel `ROOT` or `"<Typename>:<key1>:<key2>…"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn root() -> Self {
        StorageKey(ROOT_SENTINEL.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_SENTINEL
    }

    pub fn entity(typename: &str, key_parts: &[String]) -> Self {
        let mut key = String::from(typename);
        for part in key_parts {
            key.push(':');
            key.push_str(part);
        }
        StorageKey(key)
    }

    /// Wraps an already-formatted key string verbatim, for round-tripping
    /// a key that was previously serialized by [`StorageKey::as_str`].
    pub fn from_raw(raw: impl Into<String>) -> Self {
        StorageKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `"<fieldName>(<stable-arg-stringify>)"`, or just `fieldName` when there
/// are no arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey(String);

impl FieldKey {
    pub fn new(field_name: &str, args: Option<&Map<String, Value>>, variables: &Map<String, Value>) -> Self {
        match args {
            Some(a) if !a.is_empty() => {
                FieldKey(format!("{field_name}({})", stable_args_stringify(a, variables)))
            }
            _ => FieldKey(field_name.to_string()),
        }
    }

    pub fn plain(field_name: &str) -> Self {
        FieldKey(field_name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
