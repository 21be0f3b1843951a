//! Events flowing into the reconciliation engine.

use crate::property::PropertyPath;
use crate::{EngineHandle, ObjectId};

/// Replication event delivered by the provider, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    /// Another participant created `object` (and its subtree).
    Create {
        /// Root of the created subtree.
        object: ObjectId,
        /// Position among the parent's children.
        child_index: usize,
    },
    /// Another participant deleted `object`.
    Delete {
        /// Deleted object.
        object: ObjectId,
    },
    /// The provider acknowledged a local delete of `object`.
    ConfirmDelete {
        /// Deleted object, now reusable.
        object: ObjectId,
    },
    /// `object` became locked.
    Lock {
        /// Locked object.
        object: ObjectId,
    },
    /// `object` became unlocked.
    Unlock {
        /// Unlocked object.
        object: ObjectId,
    },
    /// The lock on `object` changed owner.
    LockOwnerChange {
        /// Affected object.
        object: ObjectId,
    },
    /// `object` moved to a new parent.
    ParentChange {
        /// Moved object.
        object: ObjectId,
        /// Position among the new parent's children.
        child_index: usize,
    },
    /// A property value was replaced.
    PropertyChange {
        /// Changed property.
        path: PropertyPath,
    },
    /// A dictionary field was removed.
    RemoveField {
        /// The dictionary.
        path: PropertyPath,
        /// Removed key.
        name: String,
    },
    /// Elements were inserted into a list.
    ListAdd {
        /// The list.
        path: PropertyPath,
        /// First inserted index.
        index: usize,
        /// Number of inserted elements.
        count: usize,
    },
    /// Elements were removed from a list.
    ListRemove {
        /// The list.
        path: PropertyPath,
        /// First removed index.
        index: usize,
        /// Number of removed elements.
        count: usize,
    },
}

impl ObjectEvent {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ObjectEvent::Create { .. } => "create",
            ObjectEvent::Delete { .. } => "delete",
            ObjectEvent::ConfirmDelete { .. } => "confirm-delete",
            ObjectEvent::Lock { .. } => "lock",
            ObjectEvent::Unlock { .. } => "unlock",
            ObjectEvent::LockOwnerChange { .. } => "lock-owner-change",
            ObjectEvent::ParentChange { .. } => "parent-change",
            ObjectEvent::PropertyChange { .. } => "property-change",
            ObjectEvent::RemoveField { .. } => "remove-field",
            ObjectEvent::ListAdd { .. } => "list-add",
            ObjectEvent::ListRemove { .. } => "list-remove",
        }
    }
}

/// Notification raised by the host engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A node was added to a container.
    NodeAdded(EngineHandle),
    /// A node was removed (it may come back through undo).
    NodeRemoved(EngineHandle),
    /// A node was attached under another node's sub-object.
    NodeAttached {
        /// Attached node.
        node: EngineHandle,
        /// New parent sub-object.
        parent: EngineHandle,
    },
    /// A node was detached to its container.
    NodeDetached(EngineHandle),
    /// A node was renamed.
    NodeRenamed(EngineHandle),
    /// A node's outliner folder changed.
    FolderChanged(EngineHandle),
    /// A node joined or left editor layers.
    LayersChanged(EngineHandle),
    /// Selection changed.
    SelectionChanged {
        /// Newly selected nodes.
        selected: Vec<EngineHandle>,
        /// Newly deselected nodes.
        deselected: Vec<EngineHandle>,
    },
    /// A field on any engine object changed.
    PropertyChanged {
        /// Modified object.
        object: EngineHandle,
        /// Field name.
        field: String,
    },
    /// Sub-objects were added to, removed from or rearranged on a node.
    SubObjectsChanged(EngineHandle),
    /// A template's construction hierarchy or metadata changed.
    TemplateChanged(EngineHandle),
    /// Bulk instance arrays of a container node changed.
    InstancesChanged(EngineHandle),
    /// An undo or redo transaction touched these objects.
    UndoRedo(Vec<EngineHandle>),
}
