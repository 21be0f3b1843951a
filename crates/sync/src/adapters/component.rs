//! Sub-objects owned by scene nodes.
//!
//! Each sub-object replicates as a [`ObjectKind::SubComponent`] child of its parent
//! sub-object, or of the owning node for roots. Lock markers are never replicated.

use super::{CLASS, NAME};
use crate::dispatcher::Adapter;
use crate::properties::{self, FIELDS};
use crate::{SyncContext, SyncError};
use scenesync_core::{
    Dictionary, EngineHandle, HostEvent, ObjectId, ObjectKind, Property, PropertyPath,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Build the replicated subtree for every sub-object of `node` under `node_object`.
pub(crate) fn build_sub_objects(
    ctx: &mut SyncContext<'_>,
    node: EngineHandle,
    node_object: ObjectId,
) {
    let subs = ctx.engine.sub_objects(node);
    let roots: Vec<EngineHandle> = subs
        .iter()
        .copied()
        .filter(|sub| ctx.engine.sub_object_parent(*sub).is_none())
        .collect();
    for root in roots {
        build_sub_object(ctx, &subs, root, node_object);
    }
}

fn build_sub_object(
    ctx: &mut SyncContext<'_>,
    all: &[EngineHandle],
    sub: EngineHandle,
    parent: ObjectId,
) {
    if ctx.engine.is_lock_marker(sub) {
        return;
    }
    let dict = sub_object_dictionary(ctx, sub);
    let object = ctx.provider.new_object(ObjectKind::SubComponent, Property::Dict(dict));
    if let Err(err) = ctx.provider.add_child(parent, object, None) {
        warn!("Failed to attach sub-object {sub}: {err}");
        ctx.provider.discard_object(object);
        return;
    }
    ctx.map.insert(object, sub);
    let children: Vec<EngineHandle> = all
        .iter()
        .copied()
        .filter(|child| ctx.engine.sub_object_parent(*child) == Some(sub))
        .collect();
    for child in children {
        build_sub_object(ctx, all, child, object);
    }
}

fn sub_object_dictionary(ctx: &SyncContext<'_>, sub: EngineHandle) -> Dictionary {
    Dictionary::new()
        .with(NAME, Property::text(ctx.engine.name(sub).unwrap_or_default()))
        .with(CLASS, Property::text(ctx.engine.class_name(sub).unwrap_or_default()))
        .with(FIELDS, properties::fields_dict(ctx, sub))
}

/// Adapter for [`ObjectKind::SubComponent`] objects.
#[derive(Debug, Default)]
pub struct ComponentAdapter {
    changed_nodes: BTreeSet<EngineHandle>,
    dirty_fields: BTreeMap<EngineHandle, BTreeSet<String>>,
}

impl ComponentAdapter {
    /// New adapter.
    pub fn new() -> Self {
        Self::default()
    }

    fn find_or_spawn(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        node: EngineHandle,
        name: &str,
        class: &str,
    ) -> EngineHandle {
        if let Some(existing) = ctx.engine.find_sub_object(node, name) {
            let reusable = ctx.map.object_for(existing).is_none()
                && ctx.engine.class_name(existing).as_deref() == Some(class);
            if reusable {
                return existing;
            }
            let aside = format!("{name} (replaced)");
            ctx.engine.rename(existing, &aside);
        }
        match ctx.engine.spawn_sub_object(node, class, name) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("{err}; placing a stand-in for {object}");
                let handle = ctx.engine.spawn_sub_object_stand_in(node, class, name);
                ctx.register_stand_in(handle, object, class);
                handle
            }
        }
    }

    /// Rebuild the replicated subtree of a node's sub-objects from the engine state.
    fn sync_sub_objects(
        &mut self,
        ctx: &mut SyncContext<'_>,
        node: EngineHandle,
        node_object: ObjectId,
    ) -> Result<(), SyncError> {
        let current: BTreeSet<EngineHandle> = ctx
            .engine
            .sub_objects(node)
            .into_iter()
            .filter(|sub| !ctx.engine.is_lock_marker(*sub))
            .collect();

        // Replicated sub-objects whose engine counterpart is gone.
        let members = ctx.tree().self_and_descendants(node_object);
        for member in members {
            if ctx.tree().kind(member) != Some(ObjectKind::SubComponent) {
                continue;
            }
            let gone = match ctx.map.handle_for(member) {
                Some(handle) => !current.contains(&handle),
                None => false,
            };
            if gone && ctx.is_live(member) {
                debug!("Sub-object {member} removed locally");
                for descendant in ctx.tree().self_and_descendants(member) {
                    if ctx.tree().kind(descendant) == Some(ObjectKind::SubComponent) {
                        ctx.map.remove_object(descendant);
                    }
                }
                ctx.provider.delete_object(member);
            }
        }

        // Engine sub-objects that are new or were reparented.
        let subs: Vec<EngineHandle> = ctx.engine.sub_objects(node);
        let mut pending: Vec<EngineHandle> = subs
            .iter()
            .copied()
            .filter(|sub| current.contains(sub))
            .collect();
        // Parents first so new children find their parent object.
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|sub| {
                let parent_object = match ctx.engine.sub_object_parent(*sub) {
                    None => Some(node_object),
                    Some(parent) => ctx.map.object_for(parent),
                };
                let Some(parent_object) = parent_object else {
                    return true;
                };
                match ctx.map.object_for(*sub) {
                    Some(object) => {
                        if ctx.is_live(object) && ctx.tree().parent(object) != Some(parent_object) {
                            if let Err(err) = ctx.provider.add_child(parent_object, object, None) {
                                warn!("Failed to move sub-object {object}: {err}");
                            }
                        }
                    }
                    None => {
                        let dict = sub_object_dictionary(ctx, *sub);
                        let object = ctx
                            .provider
                            .new_object(ObjectKind::SubComponent, Property::Dict(dict));
                        ctx.map.insert(object, *sub);
                        let index = ctx.tree().children(parent_object).len();
                        if let Err(err) =
                            ctx.provider
                                .create_objects(&[object], Some(parent_object), index)
                        {
                            warn!("Failed to create sub-object {sub}: {err}");
                            ctx.map.remove_object(object);
                            ctx.provider.discard_object(object);
                        }
                    }
                }
                false
            });
            if pending.len() == before {
                warn!("{} sub-objects of {node} have no synced parent", pending.len());
                break;
            }
        }
        Ok(())
    }

    /// Put the engine sub-objects of a locked node back the way the tree has them.
    fn revert_sub_objects(ctx: &mut SyncContext<'_>, node: EngineHandle, node_object: ObjectId) {
        let added: Vec<EngineHandle> = ctx
            .engine
            .sub_objects(node)
            .into_iter()
            .filter(|sub| !ctx.engine.is_lock_marker(*sub) && ctx.map.object_for(*sub).is_none())
            .collect();
        for sub in added {
            ctx.without_observer(|ctx| ctx.engine.destroy(sub));
        }
        let members = ctx.tree().self_and_descendants(node_object);
        for member in members {
            if ctx.tree().kind(member) != Some(ObjectKind::SubComponent) {
                continue;
            }
            let Some(handle) = ctx.map.handle_for(member) else {
                continue;
            };
            if !ctx.engine.is_alive(handle) {
                // Deleted under a lock: forget it and let the cascade spawn it again.
                ctx.map.remove_object(member);
                ctx.cascade(member);
                continue;
            }
            let parent = ctx.tree().parent(member);
            let parent_handle = match parent.and_then(|parent| ctx.tree().kind(parent)) {
                Some(ObjectKind::SubComponent) => {
                    parent.and_then(|parent| ctx.map.handle_for(parent))
                }
                _ => None,
            };
            if ctx.engine.sub_object_parent(handle) != parent_handle {
                ctx.without_observer(|ctx| ctx.engine.set_sub_object_parent(handle, parent_handle));
            }
        }
    }

    fn apply_remote(
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        handle: EngineHandle,
    ) -> Result<(), SyncError> {
        let fields = ctx
            .tree()
            .property(object)
            .and_then(Property::as_dict)
            .and_then(|dict| dict.get(FIELDS))
            .and_then(Property::as_dict)
            .cloned()
            .unwrap_or_default();
        properties::apply_fields(ctx, handle, &fields);
        Self::apply_parent(ctx, object, handle);
        Ok(())
    }

    fn apply_parent(ctx: &mut SyncContext<'_>, object: ObjectId, handle: EngineHandle) {
        let parent = ctx.tree().parent(object);
        let parent_handle = match parent.and_then(|parent| ctx.tree().kind(parent)) {
            Some(ObjectKind::SubComponent) => parent.and_then(|parent| ctx.map.handle_for(parent)),
            _ => None,
        };
        ctx.without_observer(|ctx| ctx.engine.set_sub_object_parent(handle, parent_handle));
    }
}

impl Adapter for ComponentAdapter {
    fn name(&self) -> &'static str {
        "component"
    }

    fn clean_up(&mut self, _ctx: &mut SyncContext<'_>) {
        self.changed_nodes.clear();
        self.dirty_fields.clear();
    }

    fn on_host_event(&mut self, ctx: &mut SyncContext<'_>, event: &HostEvent) {
        match event {
            HostEvent::SubObjectsChanged(node) => {
                if ctx.map.object_for(*node).is_some() {
                    self.changed_nodes.insert(*node);
                }
            }
            HostEvent::PropertyChanged { object, field } => {
                let is_sub_object = ctx
                    .map
                    .object_for(*object)
                    .and_then(|mapped| ctx.tree().kind(mapped))
                    == Some(ObjectKind::SubComponent);
                if is_sub_object {
                    self.dirty_fields
                        .entry(*object)
                        .or_default()
                        .insert(field.clone());
                }
            }
            _ => {}
        }
    }

    fn tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for node in std::mem::take(&mut self.changed_nodes) {
            let Some(node_object) = ctx.map.object_for(node) else {
                continue;
            };
            if !ctx.is_live(node_object) || !ctx.engine.is_alive(node) {
                continue;
            }
            if ctx.lock_level(node_object).blocks_structure_edits() {
                debug!("Reverting sub-object edits on locked {node_object}");
                Self::revert_sub_objects(ctx, node, node_object);
            } else {
                self.sync_sub_objects(ctx, node, node_object)?;
            }
        }

        for (handle, names) in std::mem::take(&mut self.dirty_fields) {
            let Some(object) = ctx.map.object_for(handle) else {
                continue;
            };
            if !ctx.is_live(object) || !ctx.engine.is_alive(handle) {
                continue;
            }
            let locked = ctx.effective_lock_level(object).blocks_property_edits();
            for name in names {
                if locked {
                    properties::revert_field(ctx, object, handle, &name);
                } else {
                    properties::push_field(ctx, object, handle, &name)?;
                }
            }
        }
        Ok(())
    }

    fn on_create(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        _child_index: usize,
    ) -> Result<(), SyncError> {
        let Some(node_object) = ctx.tree().nearest_ancestor(object, ObjectKind::Node) else {
            return Err(SyncError::protocol(object, "sub-object without an owning node"));
        };
        let Some(node) = ctx.map.handle_for(node_object) else {
            debug!("Owner {node_object} of {object} is not instantiated yet");
            return Ok(());
        };
        let Some(parent) = ctx.tree().parent(object) else {
            return Err(SyncError::protocol(object, "sub-object without a parent"));
        };
        if parent != node_object && !ctx.map.contains_object(parent) {
            debug!("Parent {parent} of {object} is not instantiated yet");
            return Ok(());
        }
        if let Some(handle) = ctx.map.handle_for(object) {
            Self::apply_parent(ctx, object, handle);
            ctx.cascade_children(object);
            return Ok(());
        }
        if ctx.budget.exceeded() && parent != node_object {
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
        let handle =
            ctx.without_observer(|ctx| Self::find_or_spawn(ctx, object, node, &name, &class));
        ctx.map.insert(object, handle);
        Self::apply_remote(ctx, object, handle)?;
        properties::resolve_references_to(ctx, object);
        ctx.cascade_children(object);
        Ok(())
    }

    fn on_delete(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        let members = ctx.tree().self_and_descendants(object);
        for member in members.into_iter().rev() {
            let Some(handle) = ctx.map.remove_object(member) else {
                continue;
            };
            self.dirty_fields.remove(&handle);
            if ctx.engine.is_alive(handle) {
                ctx.without_observer(|ctx| ctx.engine.destroy(handle));
            }
        }
        Ok(())
    }

    fn on_parent_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        _child_index: usize,
    ) -> Result<(), SyncError> {
        if let Some(handle) = ctx.map.handle_for(object) {
            Self::apply_parent(ctx, object, handle);
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
        let Some(handle) = ctx.map.handle_for(object) else {
            return Ok(());
        };
        if path.first_key() != Some(FIELDS) {
            return Ok(());
        }
        match path.depth() {
            1 => Self::apply_remote(ctx, object, handle)?,
            2 => {
                let Some(name) = path.key_at(1) else {
                    return Ok(());
                };
                if let Some(property) = ctx.tree().resolve(path).cloned() {
                    properties::apply_field(ctx, handle, name, &property);
                }
            }
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
        let (Some(object), Some(FIELDS)) = (path.container, path.first_key()) else {
            return Ok(());
        };
        if let Some(handle) = ctx.map.handle_for(object) {
            ctx.without_observer(|ctx| ctx.engine.reset_field(handle, name));
        }
        Ok(())
    }
}
