//! Request API of the external replication provider.

use crate::events::ObjectEvent;
use crate::property::{Property, PropertyPath};
use crate::tree::{ObjectKind, ObjectTree, TreeError};
use crate::{ObjectId, ParticipantId};

/// Authoritative replicated object store.
///
/// The provider owns the [`ObjectTree`]; callers read it and issue requests. Requests
/// on objects that were never created only touch the local copy.
pub trait Provider {
    /// Identity of the local participant.
    fn local_participant(&self) -> ParticipantId;

    /// Read access to the replicated tree.
    fn tree(&self) -> &ObjectTree;

    /// Construct an object in memory; it is replicated once passed to
    /// [`Provider::create_objects`] (directly or as a descendant).
    fn new_object(&mut self, kind: ObjectKind, property: Property) -> ObjectId;

    /// Attach `child` under `parent`; for created objects this is a move request.
    fn add_child(
        &mut self,
        parent: ObjectId,
        child: ObjectId,
        index: Option<usize>,
    ) -> Result<(), TreeError>;

    /// Create `objects` (with their in-memory subtrees) under `parent`, or as roots.
    fn create_objects(
        &mut self,
        objects: &[ObjectId],
        parent: Option<ObjectId>,
        index: usize,
    ) -> Result<(), TreeError>;

    /// Request deletion of a created object.
    fn delete_object(&mut self, object: ObjectId);

    /// Drop an object that was never created, with its in-memory subtree.
    fn discard_object(&mut self, object: ObjectId);

    /// Ask for an exclusive edit lock; success is reported through the tree.
    fn request_lock(&mut self, object: ObjectId);

    /// Release a lock held by the local participant.
    fn release_lock(&mut self, object: ObjectId);

    /// Number of replicated objects of a type.
    fn object_count(&self, kind: ObjectKind) -> u32;

    /// Object limit for a type; `u32::MAX` means unlimited.
    fn object_limit(&self, kind: ObjectKind) -> u32;

    /// Replace a property value.
    fn set_property(&mut self, path: &PropertyPath, value: Property) -> Result<(), TreeError>;

    /// Remove a dictionary field.
    fn remove_field(&mut self, path: &PropertyPath, name: &str) -> Result<(), TreeError>;

    /// Insert list elements.
    fn list_insert(
        &mut self,
        path: &PropertyPath,
        index: usize,
        items: Vec<Property>,
    ) -> Result<(), TreeError>;

    /// Remove list elements.
    fn list_remove(
        &mut self,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<(), TreeError>;

    /// Drain events received since the last call, in delivery order.
    fn poll_events(&mut self) -> Vec<ObjectEvent>;

    /// Leave the session.
    fn disconnect(&mut self, reason: &str);
}
