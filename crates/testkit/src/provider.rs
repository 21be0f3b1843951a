//! Single-tree replication authority with a scriptable remote participant.
//!
//! Local requests are acknowledged immediately and produce no events for the local
//! participant, except delete confirmations which arrive on the next poll. The
//! `remote_*` methods act as another participant and queue the events the local
//! participant would receive. Structural changes reach the tree at once. Property
//! edits reach it when the next poll delivers them, so local edits made before that
//! poll are ordered first, as the authority would order concurrent edits.

use scenesync_core::{
    LockLevel, LockState, ObjectEvent, ObjectId, ObjectKind, ObjectTree, ParticipantId,
    Property, PropertyPath, Provider, SyncState, TreeError,
};
use std::collections::BTreeMap;
use tracing::debug;

enum Delivery {
    Event(ObjectEvent),
    Edit(RemoteEdit),
    Confirm(ObjectId),
}

/// Property edit of the remote participant, applied on delivery.
enum RemoteEdit {
    Set {
        path: PropertyPath,
        value: Property,
    },
    RemoveField {
        path: PropertyPath,
        name: String,
    },
    ListInsert {
        path: PropertyPath,
        index: usize,
        items: Vec<Property>,
    },
    ListRemove {
        path: PropertyPath,
        index: usize,
        count: usize,
    },
}

/// In-memory [`Provider`].
pub struct LocalProvider {
    local: ParticipantId,
    remote: ParticipantId,
    tree: ObjectTree,
    limits: BTreeMap<ObjectKind, u32>,
    queue: Vec<Delivery>,
    purge: Vec<ObjectId>,
    remote_operations: usize,
    disconnect_reason: Option<String>,
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new(ParticipantId(1), ParticipantId(2))
    }
}

impl LocalProvider {
    /// Authority seen by `local`, with `remote` driving the scripted edits.
    pub fn new(local: ParticipantId, remote: ParticipantId) -> Self {
        Self {
            local,
            remote,
            tree: ObjectTree::new(),
            limits: BTreeMap::new(),
            queue: Vec::new(),
            purge: Vec::new(),
            remote_operations: 0,
            disconnect_reason: None,
        }
    }

    /// Participant driving the `remote_*` methods.
    pub fn remote_participant(&self) -> ParticipantId {
        self.remote
    }

    /// Cap the number of replicated objects of `kind`.
    pub fn set_object_limit(&mut self, kind: ObjectKind, limit: u32) {
        self.limits.insert(kind, limit);
    }

    /// Whether [`Provider::disconnect`] has been called.
    pub fn is_connected(&self) -> bool {
        self.disconnect_reason.is_none()
    }

    /// Reason passed to [`Provider::disconnect`].
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Events and confirmations not yet polled.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Remote operations issued so far.
    pub fn remote_operations(&self) -> usize {
        self.remote_operations
    }

    /// Created objects of `kind`.
    pub fn live_objects(&self, kind: ObjectKind) -> Vec<ObjectId> {
        self.tree
            .iter()
            .filter(|object| object.kind() == kind && object.is_live())
            .map(|object| object.id())
            .collect()
    }

    fn emit(&mut self, event: ObjectEvent) {
        self.remote_operations += 1;
        self.queue.push(Delivery::Event(event));
    }

    /// Build an object that the remote participant has not published yet.
    pub fn stage(&mut self, kind: ObjectKind, property: Property) -> ObjectId {
        self.tree.insert(kind, property)
    }

    /// Build an unpublished object under another unpublished (or published) one.
    pub fn stage_child(
        &mut self,
        parent: ObjectId,
        kind: ObjectKind,
        property: Property,
    ) -> Result<ObjectId, TreeError> {
        let child = self.tree.insert(kind, property);
        self.tree.attach(child, parent, None)?;
        Ok(child)
    }

    /// Publish a staged subtree under `parent` (appended) or as a root.
    pub fn remote_publish(
        &mut self,
        object: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<(), TreeError> {
        if let Some(parent) = parent {
            self.tree.attach(object, parent, None)?;
        }
        self.tree.set_sync_subtree(object, SyncState::Created)?;
        let child_index = self.tree.child_index(object).unwrap_or(0);
        debug!("Remote created {object}");
        self.emit(ObjectEvent::Create {
            object,
            child_index,
        });
        Ok(())
    }

    /// Stage and publish a single object.
    pub fn remote_create(
        &mut self,
        kind: ObjectKind,
        property: Property,
        parent: Option<ObjectId>,
    ) -> Result<ObjectId, TreeError> {
        let object = self.stage(kind, property);
        self.remote_publish(object, parent)?;
        Ok(object)
    }

    /// Delete a subtree. It stays readable until the poll after the one delivering the
    /// delete.
    pub fn remote_delete(&mut self, object: ObjectId) -> Result<(), TreeError> {
        self.tree.set_sync_subtree(object, SyncState::DeletePending)?;
        self.emit(ObjectEvent::Delete { object });
        Ok(())
    }

    /// Move an object under a new parent.
    pub fn remote_move(
        &mut self,
        object: ObjectId,
        parent: ObjectId,
        index: Option<usize>,
    ) -> Result<(), TreeError> {
        self.tree.attach(object, parent, index)?;
        let child_index = self.tree.child_index(object).unwrap_or(0);
        self.emit(ObjectEvent::ParentChange {
            object,
            child_index,
        });
        Ok(())
    }

    fn edit(&mut self, edit: RemoteEdit) -> Result<(), TreeError> {
        let path = match &edit {
            RemoteEdit::Set { path, .. }
            | RemoteEdit::RemoveField { path, .. }
            | RemoteEdit::ListInsert { path, .. }
            | RemoteEdit::ListRemove { path, .. } => path,
        };
        let object = path.container.ok_or(TreeError::Detached)?;
        if !self.tree.contains(object) {
            return Err(TreeError::UnknownObject(object));
        }
        self.remote_operations += 1;
        self.queue.push(Delivery::Edit(edit));
        Ok(())
    }

    /// Replace a property value.
    pub fn remote_set_property(
        &mut self,
        path: &PropertyPath,
        value: Property,
    ) -> Result<(), TreeError> {
        self.edit(RemoteEdit::Set {
            path: path.clone(),
            value,
        })
    }

    /// Remove a dictionary field; nothing is delivered when the field is absent.
    pub fn remote_remove_field(
        &mut self,
        path: &PropertyPath,
        name: &str,
    ) -> Result<(), TreeError> {
        self.edit(RemoteEdit::RemoveField {
            path: path.clone(),
            name: name.to_string(),
        })
    }

    /// Insert list elements.
    pub fn remote_list_insert(
        &mut self,
        path: &PropertyPath,
        index: usize,
        items: Vec<Property>,
    ) -> Result<(), TreeError> {
        self.edit(RemoteEdit::ListInsert {
            path: path.clone(),
            index,
            items,
        })
    }

    /// Remove list elements; nothing is delivered when nothing was removed.
    pub fn remote_list_remove(
        &mut self,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<(), TreeError> {
        self.edit(RemoteEdit::ListRemove {
            path: path.clone(),
            index,
            count,
        })
    }

    /// Apply a delivered edit to the tree. Edits that no longer fit the tree are
    /// dropped, as the authority would reject them.
    fn apply_edit(&mut self, edit: RemoteEdit) -> Option<ObjectEvent> {
        let applied = match edit {
            RemoteEdit::Set { path, value } => self
                .tree
                .set_property(&path, value)
                .map(|()| Some(ObjectEvent::PropertyChange { path })),
            RemoteEdit::RemoveField { path, name } => {
                self.tree.remove_field(&path, &name).map(|removed| {
                    removed.map(|_| ObjectEvent::RemoveField { path, name })
                })
            }
            RemoteEdit::ListInsert { path, index, items } => {
                let count = items.len();
                self.tree
                    .list_insert(&path, index, items)
                    .map(|index| Some(ObjectEvent::ListAdd { path, index, count }))
            }
            RemoteEdit::ListRemove { path, index, count } => {
                self.tree.list_remove(&path, index, count).map(|removed| {
                    (removed > 0).then_some(ObjectEvent::ListRemove {
                        path,
                        index,
                        count: removed,
                    })
                })
            }
        };
        match applied {
            Ok(event) => event,
            Err(err) => {
                debug!("Dropped remote edit: {err}");
                None
            }
        }
    }

    /// Lock as the remote participant.
    pub fn remote_lock(&mut self, object: ObjectId, level: LockLevel) -> Result<(), TreeError> {
        self.lock_as(object, level, self.remote)
    }

    /// Lock on behalf of any participant.
    pub fn lock_as(
        &mut self,
        object: ObjectId,
        level: LockLevel,
        owner: ParticipantId,
    ) -> Result<(), TreeError> {
        let previous = self
            .tree
            .get(object)
            .ok_or(TreeError::UnknownObject(object))?
            .lock();
        let lock = match level {
            LockLevel::Unlocked => LockState::Unlocked,
            LockLevel::Partial => LockState::PartiallyLocked(owner),
            LockLevel::Full => LockState::FullyLocked(owner),
        };
        self.tree.set_lock(object, lock)?;
        let event = match (previous.owner(), lock.owner()) {
            (_, None) => ObjectEvent::Unlock { object },
            (Some(before), Some(after)) if before != after => {
                ObjectEvent::LockOwnerChange { object }
            }
            _ => ObjectEvent::Lock { object },
        };
        self.emit(event);
        Ok(())
    }

    /// Release any lock on the object.
    pub fn remote_unlock(&mut self, object: ObjectId) -> Result<(), TreeError> {
        self.lock_as(object, LockLevel::Unlocked, self.remote)
    }

    fn confirm_delete(&mut self, object: ObjectId) {
        if self.tree.get(object).map(|o| o.sync()) != Some(SyncState::DeletePending) {
            return;
        }
        self.tree.detach(object);
        let _ = self.tree.set_sync_subtree(object, SyncState::Local);
        let _ = self.tree.set_lock(object, LockState::Unlocked);
    }
}

impl Provider for LocalProvider {
    fn local_participant(&self) -> ParticipantId {
        self.local
    }

    fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    fn new_object(&mut self, kind: ObjectKind, property: Property) -> ObjectId {
        self.tree.insert(kind, property)
    }

    fn add_child(
        &mut self,
        parent: ObjectId,
        child: ObjectId,
        index: Option<usize>,
    ) -> Result<(), TreeError> {
        self.tree.attach(child, parent, index)
    }

    fn create_objects(
        &mut self,
        objects: &[ObjectId],
        parent: Option<ObjectId>,
        index: usize,
    ) -> Result<(), TreeError> {
        let mut index = match parent {
            Some(parent) => index.min(self.tree.children(parent).len()),
            None => 0,
        };
        for object in objects {
            match parent {
                Some(parent) => {
                    self.tree.attach(*object, parent, Some(index))?;
                    index += 1;
                }
                None => {
                    self.tree.detach(*object);
                }
            }
            self.tree.set_sync_subtree(*object, SyncState::Created)?;
        }
        Ok(())
    }

    fn delete_object(&mut self, object: ObjectId) {
        if self.tree.get(object).is_some_and(|o| o.is_live()) {
            let _ = self.tree.set_sync_subtree(object, SyncState::DeletePending);
            self.queue.push(Delivery::Confirm(object));
        }
    }

    fn discard_object(&mut self, object: ObjectId) {
        if self.tree.get(object).map(|o| o.sync()) == Some(SyncState::Local) {
            self.tree.remove_subtree(object);
        }
    }

    fn request_lock(&mut self, object: ObjectId) {
        let lock = self.tree.get(object).map(|o| o.lock());
        if lock == Some(LockState::Unlocked) {
            let _ = self.tree.set_lock(object, LockState::FullyLocked(self.local));
        }
    }

    fn release_lock(&mut self, object: ObjectId) {
        let owner = self.tree.get(object).and_then(|o| o.lock().owner());
        if owner == Some(self.local) {
            let _ = self.tree.set_lock(object, LockState::Unlocked);
        }
    }

    fn object_count(&self, kind: ObjectKind) -> u32 {
        self.tree.count(kind)
    }

    fn object_limit(&self, kind: ObjectKind) -> u32 {
        self.limits.get(&kind).copied().unwrap_or(u32::MAX)
    }

    fn set_property(&mut self, path: &PropertyPath, value: Property) -> Result<(), TreeError> {
        self.tree.set_property(path, value)
    }

    fn remove_field(&mut self, path: &PropertyPath, name: &str) -> Result<(), TreeError> {
        self.tree.remove_field(path, name).map(|_| ())
    }

    fn list_insert(
        &mut self,
        path: &PropertyPath,
        index: usize,
        items: Vec<Property>,
    ) -> Result<(), TreeError> {
        self.tree.list_insert(path, index, items).map(|_| ())
    }

    fn list_remove(
        &mut self,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<(), TreeError> {
        self.tree.list_remove(path, index, count).map(|_| ())
    }

    fn poll_events(&mut self) -> Vec<ObjectEvent> {
        for object in std::mem::take(&mut self.purge) {
            if self.tree.get(object).map(|o| o.sync()) == Some(SyncState::DeletePending) {
                self.tree.remove_subtree(object);
            }
        }
        let mut events = Vec::with_capacity(self.queue.len());
        for delivery in std::mem::take(&mut self.queue) {
            match delivery {
                Delivery::Event(event) => {
                    if let ObjectEvent::Delete { object } = &event {
                        let object = *object;
                        self.purge.push(object);
                    }
                    events.push(event);
                }
                Delivery::Edit(edit) => events.extend(self.apply_edit(edit)),
                Delivery::Confirm(object) => {
                    self.confirm_delete(object);
                    events.push(ObjectEvent::ConfirmDelete { object });
                }
            }
        }
        events
    }

    fn disconnect(&mut self, reason: &str) {
        debug!("Provider disconnected: {reason}");
        self.disconnect_reason = Some(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_core::Dictionary;

    fn named(name: &str) -> Property {
        Property::Dict(Dictionary::new().with("name", Property::text(name)))
    }

    #[test]
    fn remote_create_publishes_subtree_with_one_event() {
        let mut provider = LocalProvider::default();
        let root = provider.stage(ObjectKind::Node, named("a"));
        let child = provider
            .stage_child(root, ObjectKind::SubComponent, named("b"))
            .unwrap();
        provider.remote_publish(root, None).unwrap();
        assert!(provider.tree().get(child).unwrap().is_live());
        assert_eq!(
            provider.poll_events(),
            vec![ObjectEvent::Create {
                object: root,
                child_index: 0
            }]
        );
        assert!(provider.poll_events().is_empty());
    }

    #[test]
    fn create_objects_clamps_index_and_preserves_order() {
        let mut provider = LocalProvider::default();
        let root = provider
            .remote_create(ObjectKind::Container, named("level"), None)
            .unwrap();
        let a = provider.new_object(ObjectKind::Node, named("a"));
        let b = provider.new_object(ObjectKind::Node, named("b"));
        provider.create_objects(&[a, b], Some(root), 99).unwrap();
        assert_eq!(provider.tree().children(root), &[a, b]);
        assert_eq!(provider.object_count(ObjectKind::Node), 2);
    }

    #[test]
    fn local_delete_is_confirmed_on_next_poll_and_keeps_the_id() {
        let mut provider = LocalProvider::default();
        let root = provider
            .remote_create(ObjectKind::Container, named("level"), None)
            .unwrap();
        let node = provider.new_object(ObjectKind::Node, named("a"));
        provider.create_objects(&[node], Some(root), 0).unwrap();
        provider.poll_events();

        provider.delete_object(node);
        assert_eq!(provider.tree().get(node).unwrap().sync(), SyncState::DeletePending);
        assert_eq!(provider.poll_events(), vec![ObjectEvent::ConfirmDelete { object: node }]);
        let kept = provider.tree().get(node).unwrap();
        assert_eq!(kept.sync(), SyncState::Local);
        assert_eq!(kept.parent(), None);
    }

    #[test]
    fn remote_delete_stays_readable_for_one_poll() {
        let mut provider = LocalProvider::default();
        let node = provider.remote_create(ObjectKind::Node, named("a"), None).unwrap();
        provider.poll_events();
        provider.remote_delete(node).unwrap();
        assert_eq!(provider.poll_events(), vec![ObjectEvent::Delete { object: node }]);
        assert!(provider.tree().contains(node));
        provider.poll_events();
        assert!(!provider.tree().contains(node));
    }

    #[test]
    fn lock_transitions_report_owner_changes() {
        let mut provider = LocalProvider::default();
        let node = provider.remote_create(ObjectKind::Node, named("a"), None).unwrap();
        provider.poll_events();
        provider.remote_lock(node, LockLevel::Full).unwrap();
        provider.lock_as(node, LockLevel::Full, ParticipantId(3)).unwrap();
        provider.remote_unlock(node).unwrap();
        assert_eq!(
            provider.poll_events(),
            vec![
                ObjectEvent::Lock { object: node },
                ObjectEvent::LockOwnerChange { object: node },
                ObjectEvent::Unlock { object: node },
            ]
        );
        provider.request_lock(node);
        assert_eq!(provider.tree().lock_level(node, ParticipantId(2)), LockLevel::Full);
    }

    #[test]
    fn empty_list_removals_are_not_delivered() {
        let mut provider = LocalProvider::default();
        let set = provider
            .remote_create(ObjectKind::BulkInstanceSet, Property::List(Vec::new()), None)
            .unwrap();
        provider.poll_events();
        provider.remote_list_remove(&PropertyPath::root(set), 3, 1).unwrap();
        assert!(provider.poll_events().is_empty());
    }

    #[test]
    fn remote_edits_land_after_earlier_local_edits() {
        let mut provider = LocalProvider::default();
        let list = |items: &[&str]| {
            Property::List(items.iter().map(|item| Property::text(*item)).collect())
        };
        let set = provider
            .remote_create(ObjectKind::BulkInstanceSet, list(&["a", "b", "c"]), None)
            .unwrap();
        provider.poll_events();
        let root = PropertyPath::root(set);

        provider.remote_list_remove(&root, 2, 1).unwrap();
        assert_eq!(provider.tree().property(set), Some(&list(&["a", "b", "c"])));
        provider.list_remove(&root, 1, 2).unwrap();

        // The remote removal no longer fits and is dropped.
        assert!(provider.poll_events().is_empty());
        assert_eq!(provider.tree().property(set), Some(&list(&["a"])));
        assert_eq!(provider.remote_operations(), 2);
    }
}
