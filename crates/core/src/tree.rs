//! Arena-backed replicated object tree.
//!
//! Objects are addressed by [`ObjectId`]; parent/child links are ids, never owning
//! references. The tree is owned by the replication provider. Adapters only ever see
//! it through `&ObjectTree` and change it through the provider's request API.

use crate::property::{PathSegment, Property, PropertyPath};
use crate::{ObjectId, ParticipantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type tag carried by every replicated object; selects the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Scene container (level). Always a root.
    Container,
    /// Top-level scene node.
    Node,
    /// Sub-object attached to a node or to another sub-object.
    SubComponent,
    /// Template asset root.
    Template,
    /// Node inside a template's construction hierarchy.
    SubTemplate,
    /// Bulk instance arrays of an instance container node.
    BulkInstanceSet,
    /// Session-wide configuration values.
    ConfigSet,
    /// Any other engine object synced field-by-field.
    GenericEngineObject,
}

/// Lock level as seen by a particular participant.
///
/// `Unlocked < Partial < Full`; each wider level blocks a superset of local edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockLevel {
    /// No restrictions.
    Unlocked,
    /// Property edits are blocked.
    Partial,
    /// Property, hierarchy, name and folder edits are blocked.
    Full,
}

impl LockLevel {
    /// Whether field edits must be reverted.
    pub fn blocks_property_edits(self) -> bool {
        self >= LockLevel::Partial
    }

    /// Whether hierarchy, name and folder edits must be reverted.
    pub fn blocks_structure_edits(self) -> bool {
        self >= LockLevel::Full
    }
}

/// Per-object lock with owner identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
    /// Nobody holds a lock.
    #[default]
    Unlocked,
    /// Partially locked by the owner.
    PartiallyLocked(ParticipantId),
    /// Fully locked by the owner.
    FullyLocked(ParticipantId),
}

impl LockState {
    /// Lock owner, if any.
    pub fn owner(&self) -> Option<ParticipantId> {
        match self {
            LockState::Unlocked => None,
            LockState::PartiallyLocked(owner) | LockState::FullyLocked(owner) => Some(*owner),
        }
    }

    /// Raw lock level regardless of owner.
    pub fn level(&self) -> LockLevel {
        match self {
            LockState::Unlocked => LockLevel::Unlocked,
            LockState::PartiallyLocked(_) => LockLevel::Partial,
            LockState::FullyLocked(_) => LockLevel::Full,
        }
    }

    /// Effective level for `viewer`: a participant's own locks never restrict it.
    pub fn level_for(&self, viewer: ParticipantId) -> LockLevel {
        match self.owner() {
            Some(owner) if owner != viewer => self.level(),
            _ => LockLevel::Unlocked,
        }
    }
}

/// Replication lifecycle of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// Constructed in memory only; never requested, or deleted and acknowledged.
    #[default]
    Local,
    /// Create requested, not yet acknowledged.
    PendingCreate,
    /// Present in the replicated tree.
    Created,
    /// Delete requested, not yet acknowledged.
    DeletePending,
}

/// Errors raised by structural tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The id does not name a live object.
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),
    /// Attaching would make an object its own ancestor.
    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle {
        /// Requested parent.
        parent: ObjectId,
        /// Requested child.
        child: ObjectId,
    },
    /// The path does not resolve to a property of the expected shape.
    #[error("invalid property path {segments:?} on {object}")]
    InvalidPath {
        /// Container object.
        object: ObjectId,
        /// Offending segments.
        segments: Vec<PathSegment>,
    },
    /// The path has no container object.
    #[error("property path has no container object")]
    Detached,
}

/// Node of the replicated tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedObject {
    id: ObjectId,
    kind: ObjectKind,
    property: Property,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
    lock: LockState,
    sync: SyncState,
}

impl ReplicatedObject {
    /// Object id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Type tag.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Root property payload.
    pub fn property(&self) -> &Property {
        &self.property
    }

    /// Parent object.
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Ordered children.
    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// Lock state.
    pub fn lock(&self) -> LockState {
        self.lock
    }

    /// Sync state.
    pub fn sync(&self) -> SyncState {
        self.sync
    }

    /// Created and not being deleted.
    pub fn is_live(&self) -> bool {
        self.sync == SyncState::Created
    }
}

/// Arena of replicated objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectTree {
    slots: Vec<Option<ReplicatedObject>>,
}

impl ObjectTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a detached object in the [`SyncState::Local`] state.
    pub fn insert(&mut self, kind: ObjectKind, property: Property) -> ObjectId {
        let id = ObjectId(self.slots.len() as u32 + 1);
        self.slots.push(Some(ReplicatedObject {
            id,
            kind,
            property,
            parent: None,
            children: Vec::new(),
            lock: LockState::Unlocked,
            sync: SyncState::Local,
        }));
        id
    }

    /// Borrow an object.
    pub fn get(&self, id: ObjectId) -> Option<&ReplicatedObject> {
        if id.is_none() {
            return None;
        }
        self.slots.get(id.0 as usize - 1).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: ObjectId) -> Result<&mut ReplicatedObject, TreeError> {
        if id.is_none() {
            return Err(TreeError::UnknownObject(id));
        }
        self.slots
            .get_mut(id.0 as usize - 1)
            .and_then(Option::as_mut)
            .ok_or(TreeError::UnknownObject(id))
    }

    /// Whether `id` names a stored object.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate all stored objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ReplicatedObject> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Type tag of `id`.
    pub fn kind(&self, id: ObjectId) -> Option<ObjectKind> {
        self.get(id).map(ReplicatedObject::kind)
    }

    /// Parent of `id`.
    pub fn parent(&self, id: ObjectId) -> Option<ObjectId> {
        self.get(id).and_then(ReplicatedObject::parent)
    }

    /// Children of `id` (empty when unknown).
    pub fn children(&self, id: ObjectId) -> &[ObjectId] {
        self.get(id).map(ReplicatedObject::children).unwrap_or(&[])
    }

    /// Position of `id` among its parent's children.
    pub fn child_index(&self, id: ObjectId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    /// Root property of `id`.
    pub fn property(&self, id: ObjectId) -> Option<&Property> {
        self.get(id).map(ReplicatedObject::property)
    }

    /// Resolve a nested property.
    pub fn resolve(&self, path: &PropertyPath) -> Option<&Property> {
        self.property(path.container?)?.at(&path.segments)
    }

    /// Lock level of `id` as seen by `viewer`.
    pub fn lock_level(&self, id: ObjectId, viewer: ParticipantId) -> LockLevel {
        self.get(id)
            .map(|object| object.lock.level_for(viewer))
            .unwrap_or(LockLevel::Unlocked)
    }

    /// Set the lock state.
    pub fn set_lock(&mut self, id: ObjectId, lock: LockState) -> Result<(), TreeError> {
        self.get_mut(id)?.lock = lock;
        Ok(())
    }

    /// Set the sync state of `id` and all its descendants.
    pub fn set_sync_subtree(&mut self, id: ObjectId, sync: SyncState) -> Result<(), TreeError> {
        for member in self.self_and_descendants(id) {
            self.get_mut(member)?.sync = sync;
        }
        Ok(())
    }

    /// Replace a property. An empty path replaces the root payload; a final index equal
    /// to the list length appends.
    pub fn set_property(&mut self, path: &PropertyPath, value: Property) -> Result<(), TreeError> {
        let object = path.container.ok_or(TreeError::Detached)?;
        let invalid = || TreeError::InvalidPath {
            object,
            segments: path.segments.clone(),
        };
        let root = &mut self.get_mut(object)?.property;
        let Some((last, prefix)) = path.segments.split_last() else {
            *root = value;
            return Ok(());
        };
        let parent = root.at_mut(prefix).ok_or_else(invalid)?;
        match (last, parent) {
            (PathSegment::Key(key), Property::Dict(dict)) => {
                dict.insert(key.clone(), value);
            }
            (PathSegment::Index(index), Property::List(items)) if *index < items.len() => {
                items[*index] = value;
            }
            (PathSegment::Index(index), Property::List(items)) if *index == items.len() => {
                items.push(value);
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }

    /// Remove a dictionary field at `path`.
    pub fn remove_field(
        &mut self,
        path: &PropertyPath,
        name: &str,
    ) -> Result<Option<Property>, TreeError> {
        let object = path.container.ok_or(TreeError::Detached)?;
        let root = &mut self.get_mut(object)?.property;
        match root.at_mut(&path.segments) {
            Some(Property::Dict(dict)) => Ok(dict.remove(name)),
            _ => Err(TreeError::InvalidPath {
                object,
                segments: path.segments.clone(),
            }),
        }
    }

    /// Insert `items` into the list at `path`; the index is clamped to the list length.
    /// Returns the index actually used.
    pub fn list_insert(
        &mut self,
        path: &PropertyPath,
        index: usize,
        items: Vec<Property>,
    ) -> Result<usize, TreeError> {
        let list = self.list_mut(path)?;
        let index = index.min(list.len());
        list.splice(index..index, items);
        Ok(index)
    }

    /// Remove up to `count` items starting at `index`. Returns how many were removed.
    pub fn list_remove(
        &mut self,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<usize, TreeError> {
        let list = self.list_mut(path)?;
        if index >= list.len() {
            return Ok(0);
        }
        let end = (index + count).min(list.len());
        list.drain(index..end);
        Ok(end - index)
    }

    fn list_mut(&mut self, path: &PropertyPath) -> Result<&mut Vec<Property>, TreeError> {
        let object = path.container.ok_or(TreeError::Detached)?;
        let segments = path.segments.clone();
        let root = &mut self.get_mut(object)?.property;
        root.at_mut(&path.segments)
            .and_then(Property::as_list_mut)
            .ok_or(TreeError::InvalidPath { object, segments })
    }

    /// Attach `child` under `parent` at `index` (appends when `None` or out of range).
    /// Detaches the child from its previous parent first.
    pub fn attach(
        &mut self,
        child: ObjectId,
        parent: ObjectId,
        index: Option<usize>,
    ) -> Result<(), TreeError> {
        if !self.contains(child) {
            return Err(TreeError::UnknownObject(child));
        }
        if !self.contains(parent) {
            return Err(TreeError::UnknownObject(parent));
        }
        if child == parent || self.ancestors(parent).contains(&child) {
            return Err(TreeError::Cycle { parent, child });
        }
        self.detach(child);
        let siblings = &mut self.get_mut(parent)?.children;
        let index = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(index, child);
        self.get_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Detach `child` from its parent, returning the old parent and index.
    pub fn detach(&mut self, child: ObjectId) -> Option<(ObjectId, usize)> {
        let parent = self.parent(child)?;
        let siblings = &mut self.get_mut(parent).ok()?.children;
        let index = siblings.iter().position(|id| *id == child)?;
        siblings.remove(index);
        if let Ok(object) = self.get_mut(child) {
            object.parent = None;
        }
        Some((parent, index))
    }

    /// Remove `id` and its descendants from the arena. Returns removed ids (pre-order).
    pub fn remove_subtree(&mut self, id: ObjectId) -> Vec<ObjectId> {
        self.detach(id);
        let removed = self.self_and_descendants(id);
        for member in &removed {
            if let Some(slot) = self.slots.get_mut(member.0 as usize - 1) {
                *slot = None;
            }
        }
        removed
    }

    /// Parent chain from the immediate parent up to the root.
    pub fn ancestors(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut chain = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parent(parent);
        }
        chain
    }

    /// Topmost ancestor (or `id` itself when it has no parent).
    pub fn root_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.get(id)?;
        Some(self.ancestors(id).last().copied().unwrap_or(id))
    }

    /// Nearest strict ancestor with the given type tag.
    pub fn nearest_ancestor(&self, id: ObjectId, kind: ObjectKind) -> Option<ObjectId> {
        self.ancestors(id)
            .into_iter()
            .find(|ancestor| self.kind(*ancestor) == Some(kind))
    }

    /// `id` followed by all descendants in pre-order.
    pub fn self_and_descendants(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        if !self.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.children(current).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Parentless objects that are part of the replicated tree.
    pub fn roots(&self) -> Vec<ObjectId> {
        self.iter()
            .filter(|object| object.parent.is_none() && object.sync != SyncState::Local)
            .map(ReplicatedObject::id)
            .collect()
    }

    /// Number of created (or pending) objects of a type.
    pub fn count(&self, kind: ObjectKind) -> u32 {
        self.iter()
            .filter(|object| {
                object.kind == kind
                    && matches!(object.sync, SyncState::Created | SyncState::PendingCreate)
            })
            .count() as u32
    }

    /// Every property path in the tree holding a reference to `target`.
    pub fn references_to(&self, target: ObjectId) -> Vec<PropertyPath> {
        self.iter()
            .flat_map(|object| {
                object
                    .property
                    .references_to(target)
                    .into_iter()
                    .map(move |segments| PropertyPath {
                        container: Some(object.id),
                        segments,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Dictionary;

    fn node(tree: &mut ObjectTree) -> ObjectId {
        tree.insert(ObjectKind::Node, Property::dict())
    }

    #[test]
    fn attach_rejects_cycles() {
        let mut tree = ObjectTree::new();
        let a = node(&mut tree);
        let b = node(&mut tree);
        tree.attach(b, a, None).unwrap();
        assert_eq!(
            tree.attach(a, b, None),
            Err(TreeError::Cycle {
                parent: b,
                child: a
            })
        );
        assert_eq!(tree.parent(b), Some(a));
    }

    #[test]
    fn attach_moves_between_parents_and_honors_index() {
        let mut tree = ObjectTree::new();
        let root = node(&mut tree);
        let other = node(&mut tree);
        let a = node(&mut tree);
        let b = node(&mut tree);
        tree.attach(a, root, None).unwrap();
        tree.attach(b, root, Some(0)).unwrap();
        assert_eq!(tree.children(root), &[b, a]);
        tree.attach(b, other, None).unwrap();
        assert_eq!(tree.children(root), &[a]);
        assert_eq!(tree.child_index(b), Some(0));
        assert_eq!(tree.root_of(b), Some(other));
    }

    #[test]
    fn remove_subtree_frees_descendants() {
        let mut tree = ObjectTree::new();
        let root = node(&mut tree);
        let a = node(&mut tree);
        let b = node(&mut tree);
        tree.attach(a, root, None).unwrap();
        tree.attach(b, a, None).unwrap();
        assert_eq!(tree.remove_subtree(a), vec![a, b]);
        assert!(!tree.contains(b));
        assert!(tree.children(root).is_empty());
    }

    #[test]
    fn list_operations_clamp_to_bounds() {
        let mut tree = ObjectTree::new();
        let id = tree.insert(ObjectKind::BulkInstanceSet, Property::List(Vec::new()));
        let path = PropertyPath::root(id);
        let used = tree
            .list_insert(&path, 10, vec![Property::text("a"), Property::text("b")])
            .unwrap();
        assert_eq!(used, 0);
        assert_eq!(tree.list_remove(&path, 1, 5).unwrap(), 1);
        assert_eq!(tree.list_remove(&path, 4, 1).unwrap(), 0);
        assert_eq!(tree.property(id).and_then(Property::as_list).map(<[_]>::len), Some(1));
    }

    #[test]
    fn set_property_appends_at_list_end() {
        let mut tree = ObjectTree::new();
        let id = tree.insert(
            ObjectKind::Node,
            Property::Dict(Dictionary::new().with("items", Property::List(Vec::new()))),
        );
        let path = PropertyPath::root(id).key("items").index(0);
        tree.set_property(&path, Property::text("x")).unwrap();
        assert_eq!(tree.resolve(&path).and_then(Property::as_text), Some("x"));
        let bad = PropertyPath::root(id).key("items").index(5);
        assert!(tree.set_property(&bad, Property::text("y")).is_err());
    }

    #[test]
    fn own_locks_do_not_restrict() {
        let me = ParticipantId(1);
        let other = ParticipantId(2);
        assert_eq!(LockState::FullyLocked(me).level_for(me), LockLevel::Unlocked);
        assert_eq!(LockState::FullyLocked(other).level_for(me), LockLevel::Full);
        assert!(LockLevel::Partial.blocks_property_edits());
        assert!(!LockLevel::Partial.blocks_structure_edits());
    }
}
