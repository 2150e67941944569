//! The normalized document cache: flat storage keyed by entity identity,
//! a subscription ledger over individual cells, and the read/write/
//! invalidate surface the cache exchange and the fragment exchange drive.

mod key;
mod read;
mod storage;
mod subscription;
mod write;

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

pub use key::FieldKey;
pub use key::StorageKey;
pub use read::ReadOutcome;
pub use storage::CacheValue;
pub use subscription::ListenerId;

use crate::artifact::Selection;
use crate::schema::SchemaDescriptor;
use storage::Storage;
use subscription::Ledger;

/// Resolves either a single entity, an array of (possibly absent) entities,
/// or a literal record not backed by any storage key, for fragment reads.
#[derive(Clone, Debug)]
pub enum FragmentRef {
    Entity(StorageKey),
    List(Vec<Option<StorageKey>>),
    Literal(Value),
}

impl FragmentRef {
    pub fn for_entity(typename: &str, key_parts: &[String]) -> Self {
        FragmentRef::Entity(StorageKey::entity(typename, key_parts))
    }
}

pub struct Cache {
    schema: SchemaDescriptor,
    storage: RefCell<Storage>,
    ledger: RefCell<Ledger>,
}

impl Cache {
    pub fn new(schema: SchemaDescriptor) -> Self {
        Cache {
            schema,
            storage: RefCell::new(Storage::new()),
            ledger: RefCell::new(Ledger::new()),
        }
    }

    pub fn read_query(&self, selections: &[Selection], variables: &Map<String, Value>) -> ReadOutcome {
        self.read_at(&StorageKey::root(), selections, variables)
    }

    pub fn write_query(&self, selections: &[Selection], data: &Value, variables: &Map<String, Value>) {
        self.write_at(&StorageKey::root(), selections, data, variables);
    }

    pub fn read_fragment(
        &self,
        fragment_ref: &FragmentRef,
        selections: &[Selection],
        variables: &Map<String, Value>,
    ) -> ReadOutcome {
        match fragment_ref {
            FragmentRef::Entity(key) => self.read_at(key, selections, variables),
            FragmentRef::List(keys) => {
                let mut data = Vec::with_capacity(keys.len());
                let mut touched = Vec::new();
                let mut stale = false;
                for key in keys {
                    match key {
                        Some(key) => {
                            let outcome = self.read_at(key, selections, variables);
                            stale |= outcome.stale;
                            touched.extend(outcome.touched);
                            data.push(outcome.data.unwrap_or(Value::Null));
                        }
                        None => data.push(Value::Null),
                    }
                }
                ReadOutcome {
                    data: Some(Value::Array(data)),
                    stale,
                    touched,
                }
            }
            // A literal fragment ref isn't backed by storage identity: it
            // is projected directly and never goes stale.
            FragmentRef::Literal(value) => ReadOutcome {
                data: Some(value.clone()),
                stale: false,
                touched: Vec::new(),
            },
        }
    }

    pub fn write_fragment(
        &self,
        fragment_ref: &FragmentRef,
        selections: &[Selection],
        data: &Value,
        variables: &Map<String, Value>,
    ) {
        match fragment_ref {
            FragmentRef::Entity(key) => self.write_at(key, selections, data, variables),
            FragmentRef::List(keys) => {
                let Some(items) = data.as_array() else { return };
                for (key, item) in keys.iter().zip(items) {
                    if let Some(key) = key {
                        self.write_at(key, selections, item, variables);
                    }
                }
            }
            FragmentRef::Literal(_) => {}
        }
    }

    fn read_at(&self, root: &StorageKey, selections: &[Selection], variables: &Map<String, Value>) -> ReadOutcome {
        let storage = self.storage.borrow();
        let ledger = self.ledger.borrow();
        read::read(
            &storage,
            &|sk, fk| ledger.is_pending(sk, fk),
            root,
            selections,
            variables,
        )
    }

    fn write_at(&self, root: &StorageKey, selections: &[Selection], data: &Value, variables: &Map<String, Value>) {
        let changed = {
            let mut storage = self.storage.borrow_mut();
            write::write_result(&mut storage, &self.schema, root, selections, data, variables)
        };
        tracing::trace!(root = root.as_str(), changed = changed.len(), "cache write");
        let mut ledger = self.ledger.borrow_mut();
        for (sk, fk) in &changed {
            ledger.clear_pending(sk, fk);
        }
        ledger.notify_changed(&changed);
    }

    /// Subscribes `callback` to every cell touched by a prior read,
    /// returning a listener id the caller must eventually [`unsubscribe`]
    /// when its consumer tears down.
    ///
    /// [`unsubscribe`]: Cache::unsubscribe
    pub fn subscribe(&self, touched: &[(StorageKey, FieldKey)], callback: Rc<dyn Fn()>) -> ListenerId {
        let mut ledger = self.ledger.borrow_mut();
        let id = ledger.register(callback);
        for (sk, fk) in touched {
            ledger.touch(sk, fk, id);
        }
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.ledger.borrow_mut().unregister(id);
    }

    /// Marks every known field of an entity stale and wakes every listener
    /// that has read any of them, without removing the data itself — a
    /// stale read still returns its last-known value, flagged `stale`.
    pub fn invalidate_entity(&self, typename: &str, key_parts: &[String]) {
        let target = StorageKey::entity(typename, key_parts);
        let storage = self.storage.borrow();
        let fields: Vec<FieldKey> = storage
            .get(&target)
            .map(|record| record.keys().cloned().collect())
            .unwrap_or_default();
        drop(storage);
        tracing::trace!(entity = target.as_str(), "invalidating entity");
        self.ledger.borrow_mut().mark_entity_stale(&target, fields.into_iter());
    }

    pub fn invalidate_field(&self, typename: &str, key_parts: &[String], field_key: &FieldKey) {
        let target = StorageKey::entity(typename, key_parts);
        tracing::trace!(entity = target.as_str(), field = field_key.as_str(), "invalidating field");
        self.ledger.borrow_mut().mark_field_stale(&target, field_key);
    }

    pub fn clear(&self) {
        self.storage.borrow_mut().clear();
    }

    /// Serializes the whole storage table to a JSON value suitable for
    /// persistence between process runs.
    pub fn extract(&self) -> Value {
        let storage = self.storage.borrow();
        let mut out = Map::new();
        for key in storage.keys() {
            let record = storage.get(key).expect("key came from storage.keys()");
            let mut fields = Map::new();
            for (field_key, value) in record {
                fields.insert(field_key.as_str().to_string(), cache_value_to_json(value));
            }
            out.insert(key.as_str().to_string(), Value::Object(fields));
        }
        Value::Object(out)
    }

    /// Replaces storage with a snapshot previously produced by [`extract`].
    ///
    /// [`extract`]: Cache::extract
    pub fn hydrate(&self, snapshot: &Value) {
        let mut storage = self.storage.borrow_mut();
        storage.clear();
        let Some(obj) = snapshot.as_object() else { return };
        for (key_str, fields) in obj {
            let storage_key = if key_str == "ROOT" {
                StorageKey::root()
            } else {
                StorageKey::from_raw(key_str.clone())
            };
            let Some(fields) = fields.as_object() else { continue };
            let record = storage.record_mut(&storage_key);
            for (field_str, value) in fields {
                record.insert(FieldKey::plain(field_str), cache_value_from_json(value));
            }
        }
    }
}

fn cache_value_to_json(value: &CacheValue) -> Value {
    match value {
        CacheValue::Scalar(v) => v.clone(),
        CacheValue::Link(key) => json!({ "$ref": key.as_str() }),
        CacheValue::List(items) => Value::Array(items.iter().map(cache_value_to_json).collect()),
        CacheValue::Record(record) => {
            let mut out = Map::new();
            for (field_key, v) in record {
                out.insert(field_key.as_str().to_string(), cache_value_to_json(v));
            }
            Value::Object(out)
        }
    }
}

fn cache_value_from_json(value: &Value) -> CacheValue {
    match value {
        Value::Array(items) => CacheValue::List(items.iter().map(cache_value_from_json).collect()),
        Value::Object(obj) => {
            if let Some(Value::String(target)) = obj.get("$ref") {
                if obj.len() == 1 {
                    return CacheValue::Link(StorageKey::from_raw(target.clone()));
                }
            }
            let mut record = storage::Record::new();
            for (k, v) in obj {
                record.insert(FieldKey::plain(k), cache_value_from_json(v));
            }
            CacheValue::Record(record)
        }
        other => CacheValue::Scalar(other.clone()),
    }
}
