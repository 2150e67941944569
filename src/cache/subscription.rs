//! The subscription ledger: which listeners care about which storage
//! cells, and the pending-invalidation (stale) marks layered over storage.

use std::cell::Cell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

use super::key::FieldKey;
use super::key::StorageKey;

pub type ListenerId = u64;

#[derive(Default)]
pub struct Ledger {
    /// Every listener that has touched any field of this entity. Used to
    /// fan out whole-entity invalidation without re-deriving it from the
    /// field-level map on every call.
    entity_listeners: HashMap<StorageKey, HashSet<ListenerId>>,
    field_listeners: HashMap<(StorageKey, FieldKey), HashSet<ListenerId>>,
    callbacks: HashMap<ListenerId, Rc<dyn Fn()>>,
    next_id: Cell<ListenerId>,
    pending: HashSet<(StorageKey, FieldKey)>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: Rc<dyn Fn()>) -> ListenerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.callbacks.insert(id, callback);
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.callbacks.remove(&id);
        self.entity_listeners.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        self.field_listeners.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
    }

    /// Records that `listener_id` read `(storage_key, field_key)`, so it is
    /// notified both by field-granular writes and by whole-entity
    /// invalidation of `storage_key`.
    pub fn touch(&mut self, storage_key: &StorageKey, field_key: &FieldKey, listener_id: ListenerId) {
        self.entity_listeners
            .entry(storage_key.clone())
            .or_default()
            .insert(listener_id);
        self.field_listeners
            .entry((storage_key.clone(), field_key.clone()))
            .or_default()
            .insert(listener_id);
    }

    pub fn is_pending(&self, storage_key: &StorageKey, field_key: &FieldKey) -> bool {
        self.pending.contains(&(storage_key.clone(), field_key.clone()))
    }

    pub fn clear_pending(&mut self, storage_key: &StorageKey, field_key: &FieldKey) {
        self.pending.remove(&(storage_key.clone(), field_key.clone()));
    }

    /// Marks every field key of `storage_key` stale and notifies every
    /// listener that has ever touched one of them, deduplicated so a
    /// listener that read several fields of the entity is woken once.
    pub fn mark_entity_stale(&mut self, storage_key: &StorageKey, known_fields: impl Iterator<Item = FieldKey>) {
        let mut notify: HashSet<ListenerId> = HashSet::new();
        if let Some(ids) = self.entity_listeners.get(storage_key) {
            notify.extend(ids.iter().copied());
        }
        for field_key in known_fields {
            self.pending.insert((storage_key.clone(), field_key.clone()));
            if let Some(ids) = self.field_listeners.get(&(storage_key.clone(), field_key)) {
                notify.extend(ids.iter().copied());
            }
        }
        self.notify(&notify);
    }

    pub fn mark_field_stale(&mut self, storage_key: &StorageKey, field_key: &FieldKey) {
        self.pending.insert((storage_key.clone(), field_key.clone()));
        let notify = self
            .field_listeners
            .get(&(storage_key.clone(), field_key.clone()))
            .cloned()
            .unwrap_or_default();
        self.notify(&notify);
    }

    /// Notifies only the listeners registered for the exact cells in
    /// `changed`, called after a write whose new values differ from what
    /// was stored.
    pub fn notify_changed(&mut self, changed: &HashSet<(StorageKey, FieldKey)>) {
        let mut notify: HashSet<ListenerId> = HashSet::new();
        for cell in changed {
            if let Some(ids) = self.field_listeners.get(cell) {
                notify.extend(ids.iter().copied());
            }
        }
        self.notify(&notify);
    }

    fn notify(&self, listener_ids: &HashSet<ListenerId>) {
        for id in listener_ids {
            if let Some(callback) = self.callbacks.get(id) {
                callback();
            }
        }
    }
}
