//! Flat normalized storage: `StorageKey -> { FieldKey -> CacheValue }`.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use super::key::FieldKey;
use super::key::StorageKey;

/// One normalized cell. Scalars are stored as plain JSON; object-typed
/// values are either an indirection to another entity's record (`Link`),
/// an element-wise array of any of the above (`List`), or an embedded
/// record for object fields that never resolved to a schema entity.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheValue {
    Scalar(Value),
    Link(StorageKey),
    List(Vec<CacheValue>),
    Record(Record),
}

pub type Record = IndexMap<FieldKey, CacheValue>;

#[derive(Clone, Debug, Default)]
pub struct Storage(HashMap<StorageKey, Record>);

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StorageKey) -> Option<&Record> {
        self.0.get(key)
    }

    pub fn record_mut(&mut self, key: &StorageKey) -> &mut Record {
        self.0.entry(key.clone()).or_default()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &StorageKey> {
        self.0.keys()
    }
}
