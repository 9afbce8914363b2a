use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use tracing::debug;
use vkcap_core::{HandleKey, HandleType};

use crate::error::TrackingError;
use crate::keys::{key_of, TrackedHandle};
use crate::shadow::{Shadow, ShadowId};
use crate::snapshot::ObjectRecord;

/// Read guard on one table entry.
pub type ShadowRef<'a> = Ref<'a, HandleKey, Shadow>;
/// Write guard on one table entry.
pub type ShadowMut<'a> = RefMut<'a, HandleKey, Shadow>;

/// Session-scoped map from `(type, handle)` to the shadow of a live object.
///
/// Mutations of one key are mutually exclusive, lookups run concurrently.
/// A guard returned by this table locks its shard: drop it before calling
/// back into the table.
pub struct HandleTable {
    objects: DashMap<HandleKey, Shadow>,
    /// Creation sequence; starts at 1
    next_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> ShadowId {
        ShadowId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a fresh shadow for a handle the driver just produced.
    pub fn create(
        &self,
        key: HandleKey,
        parent: Option<HandleKey>,
    ) -> Result<ShadowMut<'_>, TrackingError> {
        match self.objects.entry(key) {
            Entry::Occupied(_) => Err(TrackingError::AlreadyTracked { key, op: "create" }),
            Entry::Vacant(slot) => {
                let id = self.alloc_id();
                debug!("track {} as #{}", key, id.0);
                Ok(slot.insert(Shadow::new(id, key, parent)))
            }
        }
    }

    /// Return the shadow for `key`, creating it if this is the first sighting.
    pub fn get_or_create(&self, key: HandleKey, parent: Option<HandleKey>) -> ShadowMut<'_> {
        match self.objects.entry(key) {
            Entry::Occupied(existing) => existing.into_ref(),
            Entry::Vacant(slot) => {
                let id = self.alloc_id();
                debug!("track {} as #{} (first query)", key, id.0);
                slot.insert(Shadow::new(id, key, parent))
            }
        }
    }

    /// Remove and return the shadow for `key`.
    pub fn erase(&self, key: HandleKey) -> Result<Shadow, TrackingError> {
        match self.objects.remove(&key) {
            Some((_, shadow)) => {
                debug!("untrack {}", key);
                Ok(shadow)
            }
            None => Err(TrackingError::NotTracked { key, op: "erase" }),
        }
    }

    pub fn lookup(&self, key: HandleKey) -> Option<ShadowRef<'_>> {
        self.objects.get(&key)
    }

    pub fn lookup_mut(&self, key: HandleKey) -> Option<ShadowMut<'_>> {
        self.objects.get_mut(&key)
    }

    pub fn lookup_handle<H: TrackedHandle>(&self, handle: H) -> Option<ShadowRef<'_>> {
        self.lookup(key_of(handle))
    }

    pub fn contains(&self, key: HandleKey) -> bool {
        self.objects.contains_key(&key)
    }

    pub fn contains_handle<H: TrackedHandle>(&self, handle: H) -> bool {
        self.contains(key_of(handle))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn count_of(&self, ty: HandleType) -> usize {
        self.objects.iter().filter(|e| e.key().ty == ty).count()
    }

    /// Keys of every live object of one type, in creation order.
    pub fn keys_of(&self, ty: HandleType) -> Vec<HandleKey> {
        self.ordered_keys(|shadow| shadow.handle_type() == ty)
    }

    /// Live objects of type `ty` whose recorded parent is `parent`, in creation order.
    pub fn children_of(&self, parent: HandleKey, ty: HandleType) -> Vec<HandleKey> {
        self.ordered_keys(|shadow| shadow.handle_type() == ty && shadow.parent() == Some(parent))
    }

    /// Every live object whose recorded parent is `parent`, in creation order.
    pub fn dependents_of(&self, parent: HandleKey) -> Vec<HandleKey> {
        self.ordered_keys(|shadow| shadow.parent() == Some(parent))
    }

    fn ordered_keys(&self, filter: impl Fn(&Shadow) -> bool) -> Vec<HandleKey> {
        let mut found: Vec<(ShadowId, HandleKey)> = self
            .objects
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| (e.value().id(), *e.key()))
            .collect();
        found.sort_unstable();
        found.into_iter().map(|(_, key)| key).collect()
    }

    /// Snapshot of all live objects in creation order.
    pub fn live_objects(&self) -> Vec<ObjectRecord> {
        let mut records: Vec<ObjectRecord> = self.objects.iter().map(|e| e.value().record()).collect();
        records.sort_unstable_by_key(|r| r.id);
        records
    }

    /// Drop every entry. Used at session teardown.
    pub fn clear(&self) {
        if !self.objects.is_empty() {
            debug!("clearing {} tracked objects", self.objects.len());
        }
        self.objects.clear();
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
