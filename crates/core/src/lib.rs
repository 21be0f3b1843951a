#![warn(missing_docs)]
//! Core primitives shared across the workspace: ids, the replicated object tree,
//! the property model, the object map and the boundary traits implemented by the
//! replication provider and the host engine.

pub mod events;
pub mod fields;
pub mod host;
pub mod object_map;
pub mod property;
pub mod provider;
pub mod tree;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used types
pub use events::{HostEvent, ObjectEvent};
pub use fields::{FieldDescriptor, FieldTable, FieldTables, FieldValue};
pub use host::{
    EngineKind, HostEngine, HostInstances, HostNodes, HostScene, HostSubObjects, HostTemplates,
    InstanceFlags, InstanceRecord, LockIndicator, NodeTraits, SpawnError, TemplateMeta,
};
pub use object_map::ObjectMap;
pub use property::{Dictionary, PathSegment, Property, PropertyPath, Value};
pub use provider::Provider;
pub use tree::{
    LockLevel, LockState, ObjectKind, ObjectTree, ReplicatedObject, SyncState, TreeError,
};

/// Identifier of a replicated object inside the provider-owned tree.
///
/// Ids are never reused for a different object while the tree lives. `ObjectId::NONE`
/// is the wire value for "no object".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Null reference.
    pub const NONE: Self = Self(0);

    /// True for the null reference.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Participant identity as assigned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

/// Non-owning handle to an object living inside the host engine.
///
/// The engine owns the object's lifetime; a handle may outlive the object it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineHandle(pub u64);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine:{}", self.0)
    }
}
