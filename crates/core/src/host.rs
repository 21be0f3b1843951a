//! Boundary to the host engine/editor.
//!
//! The host owns every engine object. Adapters query and mutate those objects through
//! these traits using non-owning [`EngineHandle`]s; the host reports user activity as
//! [`HostEvent`](crate::HostEvent)s.

use crate::fields::FieldValue;
use crate::{EngineHandle, ParticipantId};
use glam::{Quat, Vec3};
use thiserror::Error;

/// Coarse category of an engine object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Scene container (level).
    Container,
    /// Top-level scene node.
    Node,
    /// Sub-object owned by a node.
    SubObject,
    /// Template asset.
    Template,
    /// Node inside a template's construction hierarchy.
    TemplateNode,
    /// Anything else.
    Other,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Node traits relevant to the syncability predicate.
    pub struct NodeTraits: u32 {
        const OUTLINER_VISIBLE = 0b0000_0001;
        const BUILDER = 0b0000_0010;
        const SYSTEM = 0b0000_0100;
        const SPAWNED_BY_SUB_OBJECT = 0b0000_1000;
    }
}

impl Default for NodeTraits {
    fn default() -> Self {
        NodeTraits::OUTLINER_VISIBLE
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Per-instance placement flags.
    pub struct InstanceFlags: u32 {
        const ALIGN_TO_NORMAL = 0b0000_0001;
        const NO_RANDOM_YAW = 0b0000_0010;
        const READJUSTED = 0b0000_0100;
        const SNAPPED = 0b0000_1000;
    }
}

/// One placed instance inside a bulk instance array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceRecord {
    /// Surface the instance was painted on.
    pub base: Option<EngineHandle>,
    /// World position.
    pub position: Vec3,
    /// Orientation.
    pub rotation: Quat,
    /// Scale.
    pub scale: Vec3,
    /// Extra vertical offset applied on top of the position.
    pub extra_offset: f32,
    /// Id of the procedural volume that spawned the instance (0 when hand placed).
    pub procedural_guid: u128,
    /// Placement flags.
    pub flags: InstanceFlags,
}

impl InstanceRecord {
    /// Unrotated, unit-scale instance at `position` with no base.
    pub fn at(position: Vec3) -> Self {
        Self {
            base: None,
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            extra_offset: 0.0,
            procedural_guid: 0,
            flags: InstanceFlags::empty(),
        }
    }
}

/// Lock visualisation requested for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockIndicator {
    /// No indicator.
    #[default]
    None,
    /// Partial lock indicator (no geometry marker).
    Partial(ParticipantId),
    /// Full lock indicator.
    Full(ParticipantId),
}

/// Display metadata of a template node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateMeta {
    /// Editor category.
    pub category: String,
    /// Tooltip text.
    pub tooltip: String,
    /// Friendly name shown instead of the variable name.
    pub display_name: String,
}

/// Spawn failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The class is not loaded or does not exist.
    #[error("class `{0}` is not available")]
    ClassNotFound(String),
    /// The owner the object should be spawned into is gone.
    #[error("owner {0} no longer exists")]
    OwnerGone(EngineHandle),
}

/// Object-agnostic engine queries.
pub trait HostScene {
    /// Enable or disable change notifications; returns the previous setting.
    fn set_change_notifications(&mut self, enabled: bool) -> bool;
    /// Non-null and not pending destruction.
    fn is_alive(&self, handle: EngineHandle) -> bool;
    /// Destroyed but still recoverable through undo.
    fn is_pending_destroy(&self, handle: EngineHandle) -> bool;
    /// Category of the object.
    fn kind(&self, handle: EngineHandle) -> Option<EngineKind>;
    /// Class name.
    fn class_name(&self, handle: EngineHandle) -> Option<String>;
    /// Whether objects of `class` can be spawned.
    fn class_available(&self, class: &str) -> bool;
    /// Object name (unique within its owner).
    fn name(&self, handle: EngineHandle) -> Option<String>;
    /// Rename; fails when the name is taken.
    fn rename(&mut self, handle: EngineHandle, name: &str) -> bool;
    /// Every synced field of the object.
    fn fields(&self, handle: EngineHandle) -> Vec<(String, FieldValue)>;
    /// One field.
    fn field(&self, handle: EngineHandle, name: &str) -> Option<FieldValue>;
    /// Write one field.
    fn set_field(&mut self, handle: EngineHandle, name: &str, value: FieldValue) -> bool;
    /// Restore one field to its class default.
    fn reset_field(&mut self, handle: EngineHandle, name: &str) -> bool;
    /// Destroy an object.
    fn destroy(&mut self, handle: EngineHandle);
    /// Container being edited.
    fn active_container(&self) -> Option<EngineHandle>;
    /// Look up a free-standing object by name.
    fn find_object(&self, name: &str) -> Option<EngineHandle>;
    /// Spawn a free-standing object.
    fn spawn_object(&mut self, class: &str, name: &str) -> Result<EngineHandle, SpawnError>;
}

/// Scene node operations.
pub trait HostNodes {
    /// Nodes in a container.
    fn nodes(&self, container: EngineHandle) -> Vec<EngineHandle>;
    /// Container owning a node.
    fn container_of(&self, node: EngineHandle) -> Option<EngineHandle>;
    /// Syncability traits.
    fn node_traits(&self, node: EngineHandle) -> NodeTraits;
    /// Selection state.
    fn is_selected(&self, node: EngineHandle) -> bool;
    /// Display label.
    fn label(&self, node: EngineHandle) -> String;
    /// Set the display label.
    fn set_label(&mut self, node: EngineHandle, label: &str);
    /// Outliner folder.
    fn folder(&self, node: EngineHandle) -> String;
    /// Set the outliner folder.
    fn set_folder(&mut self, node: EngineHandle, folder: &str);
    /// Editor layers the node belongs to, in order.
    fn layers(&self, node: EngineHandle) -> Vec<String>;
    /// Replace the node's layers.
    fn set_layers(&mut self, node: EngineHandle, layers: &[String]);
    /// Sub-object of another node this node is attached to.
    fn attach_parent(&self, node: EngineHandle) -> Option<EngineHandle>;
    /// Attach under a sub-object, or detach to the container with `None`.
    fn attach_to(&mut self, node: EngineHandle, parent: Option<EngineHandle>);
    /// Nodes attached to a sub-object.
    fn attached_nodes(&self, sub_object: EngineHandle) -> Vec<EngineHandle>;
    /// Node by name within a container.
    fn find_node(&self, container: EngineHandle, name: &str) -> Option<EngineHandle>;
    /// Spawn a node; the engine may adjust `name` to keep it unique.
    fn spawn_node(
        &mut self,
        container: EngineHandle,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError>;
    /// Spawn a placeholder standing in for an unavailable class.
    fn spawn_node_stand_in(
        &mut self,
        container: EngineHandle,
        missing_class: &str,
        name: &str,
    ) -> EngineHandle;
    /// Show or clear the lock indicator.
    fn set_lock_indicator(&mut self, node: EngineHandle, indicator: LockIndicator);
    /// Attach a non-syncable duplicate-geometry lock marker.
    fn attach_lock_marker(&mut self, node: EngineHandle, owner: ParticipantId) -> EngineHandle;
    /// Remove all lock markers from a node.
    fn detach_lock_markers(&mut self, node: EngineHandle);
}

/// Sub-object operations.
pub trait HostSubObjects {
    /// Sub-objects owned by a node, in creation order.
    fn sub_objects(&self, node: EngineHandle) -> Vec<EngineHandle>;
    /// Node owning a sub-object.
    fn owner_node(&self, sub_object: EngineHandle) -> Option<EngineHandle>;
    /// Parent sub-object (`None` for roots).
    fn sub_object_parent(&self, sub_object: EngineHandle) -> Option<EngineHandle>;
    /// Reparent a sub-object.
    fn set_sub_object_parent(&mut self, sub_object: EngineHandle, parent: Option<EngineHandle>);
    /// Sub-object by name.
    fn find_sub_object(&self, node: EngineHandle, name: &str) -> Option<EngineHandle>;
    /// Spawn a sub-object.
    fn spawn_sub_object(
        &mut self,
        node: EngineHandle,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError>;
    /// Spawn a placeholder sub-object for an unavailable class.
    fn spawn_sub_object_stand_in(
        &mut self,
        node: EngineHandle,
        missing_class: &str,
        name: &str,
    ) -> EngineHandle;
    /// Whether the sub-object is a lock marker.
    fn is_lock_marker(&self, sub_object: EngineHandle) -> bool;
}

/// Template asset operations.
pub trait HostTemplates {
    /// Template by name.
    fn find_template(&self, name: &str) -> Option<EngineHandle>;
    /// Create an empty template.
    fn create_template(&mut self, name: &str) -> EngineHandle;
    /// Nodes of a template's construction hierarchy.
    fn template_nodes(&self, template: EngineHandle) -> Vec<EngineHandle>;
    /// Template node by name.
    fn find_template_node(&self, template: EngineHandle, name: &str) -> Option<EngineHandle>;
    /// Add a template node.
    fn add_template_node(
        &mut self,
        template: EngineHandle,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError>;
    /// Parent of a template node (possibly in another template).
    fn template_node_parent(&self, node: EngineHandle) -> Option<EngineHandle>;
    /// Reparent a template node.
    fn set_template_node_parent(&mut self, node: EngineHandle, parent: Option<EngineHandle>);
    /// Display metadata.
    fn template_meta(&self, node: EngineHandle) -> TemplateMeta;
    /// Replace display metadata.
    fn set_template_meta(&mut self, node: EngineHandle, meta: &TemplateMeta);
}

/// Bulk instance array operations.
pub trait HostInstances {
    /// Instance types present on a container node.
    fn instance_types(&self, node: EngineHandle) -> Vec<String>;
    /// Add an (empty) instance type.
    fn add_instance_type(&mut self, node: EngineHandle, instance_type: &str);
    /// Remove an instance type and its instances.
    fn remove_instance_type(&mut self, node: EngineHandle, instance_type: &str);
    /// Instances of one type, in array order.
    fn instances(&self, node: EngineHandle, instance_type: &str) -> Vec<InstanceRecord>;
    /// Append instances.
    fn add_instances(
        &mut self,
        node: EngineHandle,
        instance_type: &str,
        records: &[InstanceRecord],
    );
    /// Remove instances by index, highest index first, each by swapping the last
    /// element into the freed slot.
    fn remove_instances(&mut self, node: EngineHandle, instance_type: &str, indices: &[usize]);
}

/// Everything the reconciliation engine needs from the host.
pub trait HostEngine: HostScene + HostNodes + HostSubObjects + HostTemplates + HostInstances {}

impl<T> HostEngine for T where
    T: HostScene + HostNodes + HostSubObjects + HostTemplates + HostInstances
{
}
