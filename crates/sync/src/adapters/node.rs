//! Scene nodes.
//!
//! Local nodes are uploaded in batches one tick after they are noticed. Remote nodes
//! are matched by name inside the active container or spawned. Locks held by other
//! participants are enforced by reverting blocked local edits on the next tick.

use super::{component, CLASS, FOLDER, LABEL, LAYERS, NAME};
use crate::dispatcher::{Adapter, Claim};
use crate::notices::Notice;
use crate::properties::{self, FIELDS};
use crate::{SyncContext, SyncError};
use scenesync_core::{
    Dictionary, EngineHandle, EngineKind, HostEvent, LockIndicator, LockLevel, LockState,
    NodeTraits, ObjectId, ObjectKind, Property, PropertyPath, SyncState,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

/// Hook run for nodes of one class right after their replicated object is built.
pub type ObjectInitializer = fn(&mut SyncContext<'_>, EngineHandle, ObjectId);

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Structural edits waiting to be pushed or reverted.
    struct StructureEdits: u8 {
        const NAME = 0b0_0001;
        const FOLDER = 0b0_0010;
        const PARENT = 0b0_0100;
        const LABEL = 0b0_1000;
        const LAYERS = 0b1_0000;
    }
}

impl StructureEdits {
    /// Edits reverted under a full lock.
    const STRUCTURAL: Self = Self::NAME
        .union(Self::FOLDER)
        .union(Self::PARENT)
        .union(Self::LAYERS);
}

fn layers_of(property: Option<&Property>) -> Vec<String> {
    property
        .and_then(Property::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(Property::as_text)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn layers_property(layers: Vec<String>) -> Property {
    Property::List(layers.into_iter().map(Property::text).collect())
}

/// Adapter for [`ObjectKind::Node`] objects.
#[derive(Default)]
pub struct NodeAdapter {
    hidden_sync_classes: BTreeSet<String>,
    initializers: BTreeMap<String, ObjectInitializer>,
    observed: Vec<EngineHandle>,
    upload_list: Vec<EngineHandle>,
    recreate: BTreeSet<ObjectId>,
    structure_edits: BTreeMap<EngineHandle, StructureEdits>,
    dirty_fields: BTreeMap<EngineHandle, BTreeSet<String>>,
    /// Local nodes to destroy when the tick ends.
    released: Vec<EngineHandle>,
}

impl NodeAdapter {
    /// New adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync nodes of `class` even when they are hidden from the outliner.
    pub fn add_hidden_sync_class(&mut self, class: impl Into<String>) {
        self.hidden_sync_classes.insert(class.into());
    }

    /// Run `initializer` for every uploaded node of `class`.
    pub fn register_initializer(
        &mut self,
        class: impl Into<String>,
        initializer: ObjectInitializer,
    ) {
        self.initializers.insert(class.into(), initializer);
    }

    /// Nodes waiting for upload.
    pub fn pending_uploads(&self) -> usize {
        self.observed.len() + self.upload_list.len()
    }

    fn is_syncable(&self, ctx: &SyncContext<'_>, node: EngineHandle) -> bool {
        if !ctx.engine.is_alive(node) || ctx.engine.kind(node) != Some(EngineKind::Node) {
            return false;
        }
        let Some(container) = ctx.engine.active_container() else {
            return false;
        };
        if ctx.engine.container_of(node) != Some(container) {
            return false;
        }
        let traits = ctx.engine.node_traits(node);
        let hidden = NodeTraits::BUILDER | NodeTraits::SYSTEM | NodeTraits::SPAWNED_BY_SUB_OBJECT;
        if traits.intersects(hidden) {
            return false;
        }
        if traits.contains(NodeTraits::OUTLINER_VISIBLE) {
            return true;
        }
        let class = ctx.engine.class_name(node).unwrap_or_default();
        self.hidden_sync_classes.contains(&class)
            || ctx.config.hidden_sync_classes.iter().any(|hidden| *hidden == class)
    }

    fn node_dictionary(ctx: &SyncContext<'_>, node: EngineHandle) -> Dictionary {
        Dictionary::new()
            .with(NAME, Property::text(ctx.engine.name(node).unwrap_or_default()))
            .with(CLASS, Property::text(ctx.engine.class_name(node).unwrap_or_default()))
            .with(LABEL, Property::text(ctx.engine.label(node)))
            .with(FOLDER, Property::text(ctx.engine.folder(node)))
            .with(LAYERS, layers_property(ctx.engine.layers(node)))
            .with(FIELDS, properties::fields_dict(ctx, node))
    }

    fn build_object(&self, ctx: &mut SyncContext<'_>, node: EngineHandle) -> ObjectId {
        let dict = Self::node_dictionary(ctx, node);
        let object = ctx.provider.new_object(ObjectKind::Node, Property::Dict(dict));
        ctx.map.insert(object, node);
        self.populate(ctx, node, object);
        object
    }

    /// Refill a kept object after its delete was confirmed and the node came back.
    fn rebuild_object(
        &self,
        ctx: &mut SyncContext<'_>,
        node: EngineHandle,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        let children = ctx.tree().children(object).to_vec();
        for child in children {
            for member in ctx.tree().self_and_descendants(child) {
                ctx.map.remove_object(member);
            }
            ctx.provider.discard_object(child);
        }
        let dict = Self::node_dictionary(ctx, node);
        ctx.provider
            .set_property(&PropertyPath::root(object), Property::Dict(dict))?;
        ctx.map.insert(object, node);
        self.populate(ctx, node, object);
        Ok(())
    }

    fn populate(&self, ctx: &mut SyncContext<'_>, node: EngineHandle, object: ObjectId) {
        component::build_sub_objects(ctx, node, object);
        let class = ctx.engine.class_name(node).unwrap_or_default();
        if let Some(initializer) = self.initializers.get(&class) {
            initializer(ctx, node, object);
        }
        if ctx.engine.is_selected(node) {
            ctx.provider.request_lock(object);
        }
    }

    /// Replicated parent for an upload, or `None` when the node must wait.
    fn resolve_parent(
        ctx: &mut SyncContext<'_>,
        node: EngineHandle,
        container: ObjectId,
    ) -> Option<ObjectId> {
        let Some(sub) = ctx.engine.attach_parent(node) else {
            return Some(container);
        };
        let Some(parent) = ctx.map.object_for(sub) else {
            debug!("Parent of {node} is not synced; it is uploaded with its parent");
            return None;
        };
        if !ctx.is_live(parent) {
            debug!("Parent {parent} of {node} is not created; it is uploaded with its parent");
            return None;
        }
        if ctx.effective_lock_level(parent).blocks_structure_edits() {
            warn!("Parent {parent} of {node} is locked; detaching");
            ctx.without_observer(|ctx| ctx.engine.attach_to(node, None));
            return Some(container);
        }
        Some(parent)
    }

    fn upload(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        let container_object = ctx
            .engine
            .active_container()
            .and_then(|container| ctx.map.object_for(container));
        let Some(container_object) = container_object else {
            return Ok(());
        };

        let mut queue: VecDeque<EngineHandle> = std::mem::take(&mut self.upload_list).into();
        let mut seen = BTreeSet::new();
        let mut deferred = Vec::new();
        let mut batch = Vec::new();
        let mut batch_parent = container_object;

        while let Some(node) = queue.pop_front() {
            if ctx.budget.exceeded() {
                deferred.push(node);
                deferred.extend(queue.drain(..));
                break;
            }
            if !seen.insert(node) || !self.is_syncable(ctx, node) {
                continue;
            }
            let existing = ctx.map.object_for(node);
            if let Some(object) = existing {
                match ctx.sync_state(object) {
                    Some(SyncState::DeletePending) => {
                        deferred.push(node);
                        continue;
                    }
                    Some(SyncState::Local) => {}
                    _ => continue,
                }
            }
            let Some(parent) = Self::resolve_parent(ctx, node, container_object) else {
                continue;
            };
            if parent != batch_parent && !batch.is_empty() {
                self.flush(ctx, &mut batch, batch_parent, &mut queue, &mut seen)?;
            }
            batch_parent = parent;
            let object = match existing {
                Some(object) => {
                    let cleared = ctx
                        .tree()
                        .property(object)
                        .and_then(Property::as_dict)
                        .map_or(true, |dict| dict.get(NAME).is_none());
                    if cleared {
                        self.rebuild_object(ctx, node, object)?;
                    }
                    object
                }
                None => self.build_object(ctx, node),
            };
            batch.push(object);
        }
        if !batch.is_empty() {
            self.flush(ctx, &mut batch, batch_parent, &mut queue, &mut seen)?;
            // Children discovered by the last flush go out next tick.
            self.upload_list.extend(queue);
        }
        self.upload_list.extend(deferred);
        Ok(())
    }

    /// Create one batch under `parent`, enforcing the node limit.
    fn flush(
        &mut self,
        ctx: &mut SyncContext<'_>,
        batch: &mut Vec<ObjectId>,
        parent: ObjectId,
        queue: &mut VecDeque<EngineHandle>,
        seen: &mut BTreeSet<EngineHandle>,
    ) -> Result<(), SyncError> {
        let objects = std::mem::take(batch);
        let limit = ctx.provider.object_limit(ObjectKind::Node);
        let mut accepted = Vec::with_capacity(objects.len());
        let mut rejected = Vec::new();
        if limit == u32::MAX {
            accepted = objects;
        } else {
            let mut available = limit.saturating_sub(ctx.provider.object_count(ObjectKind::Node));
            for object in objects {
                let needed = ctx
                    .tree()
                    .self_and_descendants(object)
                    .into_iter()
                    .filter(|member| ctx.tree().kind(*member) == Some(ObjectKind::Node))
                    .count() as u32;
                if rejected.is_empty() && needed <= available {
                    available -= needed;
                    accepted.push(object);
                } else {
                    rejected.push(object);
                }
            }
        }

        if !rejected.is_empty() {
            warn!(
                "Node limit of {limit} reached; discarding {} local nodes",
                rejected.len()
            );
            ctx.raise(Notice::ObjectLimitReached {
                kind: ObjectKind::Node,
                limit,
            });
            for object in rejected {
                self.reject(ctx, object);
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }

        let index = ctx.tree().children(parent).len();
        ctx.provider.create_objects(&accepted, Some(parent), index)?;
        for object in accepted {
            Self::attach_children(ctx, object, queue, seen)?;
        }
        Ok(())
    }

    /// Discard a batch member over the limit. Its engine nodes are destroyed at the end
    /// of the tick.
    fn reject(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) {
        for member in ctx.tree().self_and_descendants(object) {
            let kind = ctx.tree().kind(member);
            if let Some(handle) = ctx.map.remove_object(member) {
                if kind == Some(ObjectKind::Node) {
                    self.released.push(handle);
                }
            }
        }
        ctx.provider.discard_object(object);
    }

    /// Re-attach synced nodes attached under `object`'s sub-objects and queue the rest.
    fn attach_children(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        queue: &mut VecDeque<EngineHandle>,
        seen: &mut BTreeSet<EngineHandle>,
    ) -> Result<(), SyncError> {
        let Some(node) = ctx.map.handle_for(object) else {
            return Ok(());
        };
        for sub in ctx.engine.sub_objects(node) {
            let Some(sub_object) = ctx.map.object_for(sub) else {
                continue;
            };
            for child in ctx.engine.attached_nodes(sub) {
                match ctx.map.object_for(child) {
                    Some(child_object) if ctx.is_live(child_object) => {
                        if ctx.tree().parent(child_object) != Some(sub_object) {
                            ctx.provider.add_child(sub_object, child_object, None)?;
                        }
                    }
                    Some(_) => {}
                    None => {
                        seen.remove(&child);
                        queue.push_back(child);
                    }
                }
            }
        }
        Ok(())
    }

    fn on_local_removed(
        &mut self,
        ctx: &mut SyncContext<'_>,
        node: EngineHandle,
    ) -> Result<(), SyncError> {
        self.structure_edits.remove(&node);
        self.dirty_fields.remove(&node);
        let Some(object) = ctx.map.object_for(node) else {
            self.observed.retain(|observed| *observed != node);
            self.upload_list.retain(|queued| *queued != node);
            return Ok(());
        };
        if !ctx.is_live(object) {
            return Ok(());
        }
        if ctx.lock_level(object) != LockLevel::Unlocked {
            debug!("{object} is locked by another participant; recreating");
            self.schedule_recreate(ctx, object);
            return Ok(());
        }

        // Attached nodes move to the container before their parent goes away.
        let container = ctx.tree().root_of(object).unwrap_or(object);
        let attached: Vec<ObjectId> = ctx
            .tree()
            .self_and_descendants(object)
            .into_iter()
            .filter(|member| {
                *member != object
                    && ctx.tree().kind(*member) == Some(ObjectKind::Node)
                    && ctx.tree().nearest_ancestor(*member, ObjectKind::Node) == Some(object)
            })
            .collect();
        for child in attached {
            ctx.provider.add_child(container, child, None)?;
        }
        let sub_objects: Vec<ObjectId> = ctx
            .tree()
            .self_and_descendants(object)
            .into_iter()
            .skip(1)
            .collect();
        for member in sub_objects {
            ctx.map.remove_object(member);
        }
        // The node's own mapping survives so an undo reuses the id.
        ctx.provider.delete_object(object);
        Ok(())
    }

    fn schedule_recreate(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) {
        self.recreate.insert(object);
        for member in ctx.tree().self_and_descendants(object) {
            let child_node = member != object && ctx.tree().kind(member) == Some(ObjectKind::Node);
            if !child_node {
                ctx.map.remove_object(member);
            }
        }
        if ctx.tree().get(object).and_then(|object| object.lock().owner()) == Some(ctx.local()) {
            ctx.provider.release_lock(object);
        }
    }

    fn recreate_locked(&mut self, ctx: &mut SyncContext<'_>) {
        for object in std::mem::take(&mut self.recreate) {
            if ctx.is_live(object) && !ctx.map.contains_object(object) {
                ctx.cascade(object);
            }
        }
    }

    fn sync_structure(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for (node, edits) in std::mem::take(&mut self.structure_edits) {
            let Some(object) = ctx.map.object_for(node) else {
                continue;
            };
            if !ctx.is_live(object) || !ctx.engine.is_alive(node) {
                continue;
            }
            let level = ctx.lock_level(object);
            let mut push = edits;
            let mut revert = StructureEdits::empty();
            if level.blocks_structure_edits() {
                revert |= edits & StructureEdits::STRUCTURAL;
                push.remove(StructureEdits::STRUCTURAL);
            }
            if level.blocks_property_edits() {
                revert |= edits & StructureEdits::LABEL;
                push.remove(StructureEdits::LABEL);
            }
            if !revert.is_empty() {
                debug!("Reverting {revert:?} on locked {object}");
                Self::revert_structure(ctx, object, node, revert);
            }
            if push.contains(StructureEdits::NAME) {
                let name = ctx.engine.name(node).unwrap_or_default();
                Self::push_text(ctx, object, NAME, name)?;
            }
            if push.contains(StructureEdits::LABEL) {
                let label = ctx.engine.label(node);
                Self::push_text(ctx, object, LABEL, label)?;
            }
            if push.contains(StructureEdits::FOLDER) {
                let folder = ctx.engine.folder(node);
                Self::push_text(ctx, object, FOLDER, folder)?;
            }
            if push.contains(StructureEdits::LAYERS) {
                Self::push_layers(ctx, object, node)?;
            }
            if push.contains(StructureEdits::PARENT) {
                Self::push_parent(ctx, object, node)?;
            }
        }
        Ok(())
    }

    fn push_layers(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        node: EngineHandle,
    ) -> Result<(), SyncError> {
        let layers = ctx.engine.layers(node);
        let path = PropertyPath::root(object).key(LAYERS);
        if layers_of(ctx.tree().resolve(&path)) != layers {
            ctx.provider.set_property(&path, layers_property(layers))?;
        }
        Ok(())
    }

    /// Put the node on the layers the tree lists.
    fn apply_layers(ctx: &mut SyncContext<'_>, object: ObjectId, node: EngineHandle) {
        let layers = layers_of(ctx.tree().resolve(&PropertyPath::root(object).key(LAYERS)));
        if ctx.engine.layers(node) != layers {
            ctx.without_observer(|ctx| ctx.engine.set_layers(node, &layers));
        }
    }

    fn on_layers_edit(&self, ctx: &mut SyncContext<'_>, path: &PropertyPath) {
        let (Some(object), Some(LAYERS)) = (path.container, path.first_key()) else {
            return;
        };
        if let Some(node) = ctx.map.handle_for(object) {
            Self::apply_layers(ctx, object, node);
        }
    }

    fn push_text(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        key: &str,
        value: String,
    ) -> Result<(), SyncError> {
        let path = PropertyPath::root(object).key(key);
        if ctx.tree().resolve(&path).and_then(Property::as_text) != Some(value.as_str()) {
            ctx.provider.set_property(&path, Property::text(value))?;
        }
        Ok(())
    }

    fn push_parent(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        node: EngineHandle,
    ) -> Result<(), SyncError> {
        let container = ctx.tree().root_of(object).unwrap_or(object);
        let desired = match ctx.engine.attach_parent(node) {
            None => container,
            Some(sub) => match ctx.map.object_for(sub) {
                Some(parent) if ctx.is_live(parent) => parent,
                _ => {
                    debug!("New parent of {node} is not synced; {object} stays in the container");
                    container
                }
            },
        };
        if desired != container && ctx.effective_lock_level(desired).blocks_structure_edits() {
            debug!("New parent {desired} of {object} is locked; reverting");
            Self::revert_structure(ctx, object, node, StructureEdits::PARENT);
            return Ok(());
        }
        if ctx.tree().parent(object) != Some(desired) {
            ctx.provider.add_child(desired, object, None)?;
        }
        Ok(())
    }

    fn revert_structure(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        node: EngineHandle,
        edits: StructureEdits,
    ) {
        let dict = ctx
            .tree()
            .property(object)
            .and_then(Property::as_dict)
            .cloned()
            .unwrap_or_default();
        ctx.without_observer(|ctx| {
            if edits.contains(StructureEdits::NAME) {
                if let Some(name) = dict.text(NAME) {
                    ctx.engine.rename(node, name);
                }
            }
            if edits.contains(StructureEdits::LABEL) {
                ctx.engine.set_label(node, dict.text(LABEL).unwrap_or_default());
            }
            if edits.contains(StructureEdits::FOLDER) {
                ctx.engine.set_folder(node, dict.text(FOLDER).unwrap_or_default());
            }
            if edits.contains(StructureEdits::LAYERS) {
                ctx.engine.set_layers(node, &layers_of(dict.get(LAYERS)));
            }
        });
        if edits.contains(StructureEdits::PARENT) {
            Self::apply_parent(ctx, object, node);
        }
    }

    /// Attach the engine node the way the tree has it.
    fn apply_parent(ctx: &mut SyncContext<'_>, object: ObjectId, node: EngineHandle) {
        let parent = ctx.tree().parent(object);
        let target = match parent.and_then(|parent| ctx.tree().kind(parent)) {
            Some(ObjectKind::SubComponent) => {
                match parent.and_then(|parent| ctx.map.handle_for(parent)) {
                    Some(handle) => Some(handle),
                    None => {
                        debug!("Parent of {object} is not instantiated yet");
                        return;
                    }
                }
            }
            _ => None,
        };
        if ctx.engine.attach_parent(node) != target {
            ctx.without_observer(|ctx| ctx.engine.attach_to(node, target));
        }
    }

    fn sync_fields(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for (node, names) in std::mem::take(&mut self.dirty_fields) {
            let Some(object) = ctx.map.object_for(node) else {
                continue;
            };
            if !ctx.is_live(object) || !ctx.engine.is_alive(node) {
                continue;
            }
            let locked = ctx.lock_level(object).blocks_property_edits();
            for name in names {
                if locked {
                    properties::revert_field(ctx, object, node, &name);
                } else {
                    properties::push_field(ctx, object, node, &name)?;
                }
            }
        }
        Ok(())
    }

    fn apply_lock_visual(ctx: &mut SyncContext<'_>, object: ObjectId, node: EngineHandle) {
        let local = ctx.local();
        let lock = ctx
            .tree()
            .get(object)
            .map(|object| object.lock())
            .unwrap_or_default();
        ctx.without_observer(|ctx| {
            ctx.engine.detach_lock_markers(node);
            match lock {
                LockState::FullyLocked(owner) if owner != local => {
                    ctx.engine.set_lock_indicator(node, LockIndicator::Full(owner));
                    ctx.engine.attach_lock_marker(node, owner);
                }
                LockState::PartiallyLocked(owner) if owner != local => {
                    ctx.engine.set_lock_indicator(node, LockIndicator::Partial(owner));
                }
                _ => ctx.engine.set_lock_indicator(node, LockIndicator::None),
            }
        });
    }

    fn find_or_spawn(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        container: EngineHandle,
        name: &str,
        class: &str,
    ) -> EngineHandle {
        if let Some(existing) = ctx.engine.find_node(container, name) {
            if ctx.engine.is_pending_destroy(existing) {
                ctx.engine.rename(existing, &format!("{name} (deleted)"));
            } else if ctx.map.object_for(existing).is_none()
                && ctx.engine.class_name(existing).as_deref() == Some(class)
            {
                return existing;
            }
        }
        match ctx.engine.spawn_node(container, class, name) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("{err}; placing a stand-in for {object}");
                let handle = ctx.engine.spawn_node_stand_in(container, class, name);
                ctx.register_stand_in(handle, object, class);
                handle
            }
        }
    }

    fn mark(&mut self, ctx: &SyncContext<'_>, node: EngineHandle, edits: StructureEdits) {
        if ctx.map.object_for(node).is_some() {
            *self
                .structure_edits
                .entry(node)
                .or_insert(StructureEdits::empty()) |= edits;
        }
    }
}

impl Adapter for NodeAdapter {
    fn name(&self) -> &'static str {
        "node"
    }

    fn initialize(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        let Some(container) = ctx.engine.active_container() else {
            return Ok(());
        };
        for node in ctx.engine.nodes(container) {
            if ctx.map.object_for(node).is_none() && self.is_syncable(ctx, node) {
                self.observed.push(node);
            }
        }
        debug!("{} local nodes queued for upload", self.observed.len());
        Ok(())
    }

    fn clean_up(&mut self, ctx: &mut SyncContext<'_>) {
        let nodes: Vec<EngineHandle> = ctx
            .map
            .iter()
            .filter(|(object, _)| ctx.tree().kind(*object) == Some(ObjectKind::Node))
            .map(|(_, handle)| handle)
            .collect();
        ctx.without_observer(|ctx| {
            for node in nodes {
                if ctx.engine.is_alive(node) {
                    ctx.engine.detach_lock_markers(node);
                    ctx.engine.set_lock_indicator(node, LockIndicator::None);
                }
            }
        });
        self.observed.clear();
        self.upload_list.clear();
        self.recreate.clear();
        self.structure_edits.clear();
        self.dirty_fields.clear();
        self.released.clear();
    }

    fn on_host_event(&mut self, ctx: &mut SyncContext<'_>, event: &HostEvent) {
        match event {
            HostEvent::NodeAdded(node) => self.observed.push(*node),
            HostEvent::NodeRemoved(node) => {
                if let Err(err) = self.on_local_removed(ctx, *node) {
                    warn!("Failed to remove {node}: {err}");
                }
            }
            HostEvent::NodeAttached { node, .. } | HostEvent::NodeDetached(node) => {
                if ctx.map.object_for(*node).is_some() {
                    self.mark(ctx, *node, StructureEdits::PARENT);
                } else if self.is_syncable(ctx, *node) {
                    self.observed.push(*node);
                }
            }
            HostEvent::NodeRenamed(node) => self.mark(ctx, *node, StructureEdits::NAME),
            HostEvent::FolderChanged(node) => self.mark(ctx, *node, StructureEdits::FOLDER),
            HostEvent::LayersChanged(node) => self.mark(ctx, *node, StructureEdits::LAYERS),
            HostEvent::SelectionChanged {
                selected,
                deselected,
            } => {
                for node in selected {
                    if let Some(object) = ctx.map.object_for(*node) {
                        if ctx.is_live(object) {
                            ctx.provider.request_lock(object);
                        }
                    }
                }
                for node in deselected {
                    if let Some(object) = ctx.map.object_for(*node) {
                        if ctx.is_live(object) {
                            ctx.provider.release_lock(object);
                        }
                    }
                }
            }
            HostEvent::PropertyChanged { object, field } => {
                let is_node = ctx
                    .map
                    .object_for(*object)
                    .and_then(|mapped| ctx.tree().kind(mapped))
                    == Some(ObjectKind::Node);
                if !is_node {
                    return;
                }
                if field == LABEL {
                    self.mark(ctx, *object, StructureEdits::LABEL);
                } else {
                    self.dirty_fields
                        .entry(*object)
                        .or_default()
                        .insert(field.clone());
                }
            }
            _ => {}
        }
    }

    fn on_undo_redo(
        &mut self,
        ctx: &mut SyncContext<'_>,
        node: EngineHandle,
        object: Option<ObjectId>,
    ) -> bool {
        if ctx.engine.kind(node) != Some(EngineKind::Node) {
            return false;
        }
        match object {
            Some(object) if ctx.is_live(object) => {
                if ctx.engine.is_alive(node) {
                    self.mark(ctx, node, StructureEdits::all());
                    let names = ctx.engine.fields(node).into_iter().map(|(name, _)| name);
                    self.dirty_fields.entry(node).or_default().extend(names);
                } else if let Err(err) = self.on_local_removed(ctx, node) {
                    warn!("Failed to remove {node} after undo: {err}");
                }
            }
            _ => {
                if ctx.engine.is_alive(node) {
                    self.observed.push(node);
                }
            }
        }
        true
    }

    fn create(&mut self, ctx: &mut SyncContext<'_>, handle: EngineHandle) -> Claim {
        if ctx.engine.kind(handle) != Some(EngineKind::Node) {
            return Claim::Declined;
        }
        if let Some(object) = ctx.map.object_for(handle) {
            return Claim::Handled(Some(object));
        }
        if !self.is_syncable(ctx, handle) {
            return Claim::Handled(None);
        }
        let object = self.build_object(ctx, handle);
        self.observed.push(handle);
        Claim::Handled(Some(object))
    }

    fn tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        self.recreate_locked(ctx);
        self.upload(ctx)?;
        self.upload_list.append(&mut self.observed);
        self.sync_structure(ctx)?;
        self.sync_fields(ctx)
    }

    fn end_tick(&mut self, ctx: &mut SyncContext<'_>) {
        let released = std::mem::take(&mut self.released);
        if released.is_empty() {
            return;
        }
        debug!("Destroying {} released local nodes", released.len());
        ctx.without_observer(|ctx| {
            for node in released {
                if ctx.engine.is_alive(node) && ctx.map.object_for(node).is_none() {
                    ctx.engine.destroy(node);
                }
            }
        });
    }

    fn on_create(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        _child_index: usize,
    ) -> Result<(), SyncError> {
        let Some(parent) = ctx.tree().parent(object) else {
            return Err(SyncError::protocol(object, "node without a parent"));
        };
        if let Some(node) = ctx.map.handle_for(object) {
            Self::apply_parent(ctx, object, node);
            return Ok(());
        }
        let container_object = ctx.tree().root_of(object).unwrap_or(parent);
        let Some(container) = ctx.map.handle_for(container_object) else {
            debug!("Container of {object} is not loaded; ignoring");
            return Ok(());
        };
        match ctx.tree().kind(parent) {
            Some(ObjectKind::Container) => {}
            Some(ObjectKind::SubComponent) => {
                if !ctx.map.contains_object(parent) {
                    debug!("Parent {parent} of {object} is not instantiated yet");
                    return Ok(());
                }
            }
            other => {
                return Err(SyncError::protocol(
                    object,
                    format!("node under unexpected parent type {other:?}"),
                ))
            }
        }
        if ctx.budget.exceeded() {
            ctx.queue_create(object);
            return Ok(());
        }

        let dict = ctx
            .tree()
            .property(object)
            .and_then(Property::as_dict)
            .cloned()
            .unwrap_or_default();
        let name = dict.text(NAME).unwrap_or_default().to_string();
        let class = dict.text(CLASS).unwrap_or_default().to_string();
        let node = ctx.without_observer(|ctx| {
            Self::find_or_spawn(ctx, object, container, &name, &class)
        });
        ctx.map.insert(object, node);

        ctx.without_observer(|ctx| {
            if let Some(label) = dict.text(LABEL) {
                ctx.engine.set_label(node, label);
            }
            if let Some(folder) = dict.text(FOLDER) {
                ctx.engine.set_folder(node, folder);
            }
            let layers = layers_of(dict.get(LAYERS));
            if !layers.is_empty() {
                ctx.engine.set_layers(node, &layers);
            }
        });
        if let Some(fields) = dict.get(FIELDS).and_then(Property::as_dict) {
            properties::apply_fields(ctx, node, fields);
        }
        properties::resolve_references_to(ctx, object);
        Self::apply_parent(ctx, object, node);
        Self::apply_lock_visual(ctx, object, node);
        ctx.cascade_children(object);
        Ok(())
    }

    fn on_delete(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        self.recreate.remove(&object);
        let members = ctx.tree().self_and_descendants(object);
        for member in members.into_iter().rev() {
            let kind = ctx.tree().kind(member);
            let Some(handle) = ctx.map.remove_object(member) else {
                continue;
            };
            self.structure_edits.remove(&handle);
            self.dirty_fields.remove(&handle);
            if kind == Some(ObjectKind::Node) && ctx.engine.is_alive(handle) {
                ctx.without_observer(|ctx| ctx.engine.destroy(handle));
            }
        }
        Ok(())
    }

    fn on_confirm_delete(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        let Some(node) = ctx.map.handle_for(object) else {
            return Ok(());
        };
        let children = ctx.tree().children(object).to_vec();
        for child in children {
            ctx.provider.discard_object(child);
        }
        ctx.provider
            .set_property(&PropertyPath::root(object), Property::dict())?;
        if ctx.engine.is_alive(node) {
            debug!("{node} came back before its delete was confirmed; uploading again");
            self.observed.push(node);
        } else if !ctx.engine.is_pending_destroy(node) {
            ctx.map.remove_object(object);
        }
        Ok(())
    }

    fn on_lock(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        if let Some(node) = ctx.map.handle_for(object) {
            Self::apply_lock_visual(ctx, object, node);
        }
        Ok(())
    }

    fn on_unlock(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        self.on_lock(ctx, object)
    }

    fn on_lock_owner_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        self.on_lock(ctx, object)
    }

    fn on_parent_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        _child_index: usize,
    ) -> Result<(), SyncError> {
        if let Some(node) = ctx.map.handle_for(object) {
            Self::apply_parent(ctx, object, node);
        }
        Ok(())
    }

    fn on_property_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
    ) -> Result<(), SyncError> {
        let Some(object) = path.container else {
            return Ok(());
        };
        let Some(node) = ctx.map.handle_for(object) else {
            return Ok(());
        };
        let value = ctx.tree().resolve(path).cloned();
        match (path.first_key(), path.depth()) {
            (Some(NAME), 1) => {
                if let Some(name) = value.as_ref().and_then(Property::as_text) {
                    let name = name.to_string();
                    ctx.without_observer(|ctx| ctx.engine.rename(node, &name));
                }
            }
            (Some(LABEL), 1) => {
                let label = value
                    .as_ref()
                    .and_then(Property::as_text)
                    .unwrap_or_default()
                    .to_string();
                ctx.without_observer(|ctx| ctx.engine.set_label(node, &label));
            }
            (Some(FOLDER), 1) => {
                let folder = value
                    .as_ref()
                    .and_then(Property::as_text)
                    .unwrap_or_default()
                    .to_string();
                ctx.without_observer(|ctx| ctx.engine.set_folder(node, &folder));
            }
            (Some(LAYERS), _) => Self::apply_layers(ctx, object, node),
            (Some(FIELDS), 1) => {
                if let Some(fields) = value.as_ref().and_then(Property::as_dict) {
                    properties::apply_fields(ctx, node, fields);
                }
            }
            (Some(FIELDS), 2) => {
                if let (Some(name), Some(value)) = (path.key_at(1), value.as_ref()) {
                    properties::apply_field(ctx, node, name, value);
                }
            }
            (Some(CLASS), _) => warn!("Class of {object} cannot change; ignoring"),
            _ => {}
        }
        Ok(())
    }

    fn on_remove_field(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        name: &str,
    ) -> Result<(), SyncError> {
        let Some(object) = path.container else {
            return Ok(());
        };
        let Some(node) = ctx.map.handle_for(object) else {
            return Ok(());
        };
        match (path.first_key(), path.depth()) {
            (None, 0) if name == LAYERS => Self::apply_layers(ctx, object, node),
            (Some(FIELDS), 1) => {
                ctx.without_observer(|ctx| ctx.engine.reset_field(node, name));
            }
            _ => {}
        }
        Ok(())
    }

    fn on_list_add(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        _index: usize,
        _count: usize,
    ) -> Result<(), SyncError> {
        self.on_layers_edit(ctx, path);
        Ok(())
    }

    fn on_list_remove(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        _index: usize,
        _count: usize,
    ) -> Result<(), SyncError> {
        self.on_layers_edit(ctx, path);
        Ok(())
    }
}
