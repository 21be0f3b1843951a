//! Bidirectional association between replicated objects and engine handles.

use crate::{EngineHandle, ObjectId};
use std::collections::BTreeMap;

/// Maps replicated objects to the engine objects mirroring them.
///
/// Holds at most one entry per object and per handle: inserting a pair evicts any
/// stale entry on either side. Handles are non-owning.
/// BTreeMap keeps iteration deterministic across participants.
#[derive(Debug, Default, Clone)]
pub struct ObjectMap {
    by_object: BTreeMap<ObjectId, EngineHandle>,
    by_handle: BTreeMap<EngineHandle, ObjectId>,
}

impl ObjectMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `object` with `handle`, replacing previous associations of either.
    pub fn insert(&mut self, object: ObjectId, handle: EngineHandle) {
        if let Some(old_handle) = self.by_object.insert(object, handle) {
            if old_handle != handle {
                self.by_handle.remove(&old_handle);
            }
        }
        if let Some(old_object) = self.by_handle.insert(handle, object) {
            if old_object != object {
                self.by_object.remove(&old_object);
            }
        }
    }

    /// Engine object mirroring `object`.
    pub fn handle_for(&self, object: ObjectId) -> Option<EngineHandle> {
        self.by_object.get(&object).copied()
    }

    /// Replicated object mirrored by `handle`.
    pub fn object_for(&self, handle: EngineHandle) -> Option<ObjectId> {
        self.by_handle.get(&handle).copied()
    }

    /// Whether `object` is mapped.
    pub fn contains_object(&self, object: ObjectId) -> bool {
        self.by_object.contains_key(&object)
    }

    /// Drop the entry for `object`.
    pub fn remove_object(&mut self, object: ObjectId) -> Option<EngineHandle> {
        let handle = self.by_object.remove(&object)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    /// Drop the entry for `handle`.
    pub fn remove_handle(&mut self, handle: EngineHandle) -> Option<ObjectId> {
        let object = self.by_handle.remove(&handle)?;
        self.by_object.remove(&object);
        Some(object)
    }

    /// Iterate entries in object id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, EngineHandle)> + '_ {
        self.by_object.iter().map(|(object, handle)| (*object, *handle))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_object.len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }

    /// Forget everything (used at disconnect).
    pub fn clear(&mut self) {
        self.by_object.clear();
        self.by_handle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_both_directions() {
        let mut map = ObjectMap::new();
        map.insert(ObjectId(1), EngineHandle(10));
        map.insert(ObjectId(2), EngineHandle(20));
        for (object, handle) in map.iter() {
            assert_eq!(map.object_for(handle), Some(object));
            assert_eq!(map.handle_for(object), Some(handle));
        }
    }

    #[test]
    fn reinsert_evicts_stale_entries() {
        let mut map = ObjectMap::new();
        map.insert(ObjectId(1), EngineHandle(10));
        map.insert(ObjectId(1), EngineHandle(11));
        assert_eq!(map.object_for(EngineHandle(10)), None);
        map.insert(ObjectId(2), EngineHandle(11));
        assert_eq!(map.handle_for(ObjectId(1)), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_by_either_side() {
        let mut map = ObjectMap::new();
        map.insert(ObjectId(1), EngineHandle(10));
        assert_eq!(map.remove_handle(EngineHandle(10)), Some(ObjectId(1)));
        assert!(map.is_empty());
        map.insert(ObjectId(3), EngineHandle(30));
        assert_eq!(map.remove_object(ObjectId(3)), Some(EngineHandle(30)));
        assert!(map.object_for(EngineHandle(30)).is_none());
    }
}
