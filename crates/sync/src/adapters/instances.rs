//! Bulk instance arrays of instance-container nodes.
//!
//! The arrays of one container node replicate as a [`ObjectKind::BulkInstanceSet`]
//! child of the node's object. Its root property is a list with one entry per
//! instance type: `{ type: Text, instances: List<Bytes> }`, each element holding one
//! [`InstanceBlob`].
//!
//! The engine only removes instances by swapping the last element into the freed
//! slot. Remote inserts and removes at index `k` therefore hold out every local record
//! from `k` on, apply the change, and re-append the held-out records, which keeps the
//! server order. Two participants swap-removing concurrently can each move the same
//! trailing record into different slots; touched indices are checked for such
//! duplicates once per tick.

use crate::dispatcher::Adapter;
use crate::notices::Notice;
use crate::{SyncContext, SyncError};
use glam::Vec3;
use scenesync_codec::InstanceBlob;
use scenesync_core::{
    Dictionary, EngineHandle, HostEvent, InstanceFlags, InstanceRecord, ObjectId, ObjectKind,
    PathSegment, Property, PropertyPath,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Class of the engine nodes holding bulk instance arrays.
pub const INSTANCE_CONTAINER_CLASS: &str = "InstanceContainer";

const TYPE: &str = "type";
const INSTANCES: &str = "instances";

/// Node initializer creating the instance set under a freshly built container object.
pub fn create_instance_set(ctx: &mut SyncContext<'_>, node: EngineHandle, node_object: ObjectId) {
    if !ctx.config.sync_bulk_instances {
        return;
    }
    if ctx.provider.object_limit(ObjectKind::BulkInstanceSet) == 0 {
        ctx.raise(Notice::BulkInstancesDisabled);
        return;
    }
    let entries = ctx
        .engine
        .instance_types(node)
        .into_iter()
        .map(|instance_type| type_entry(ctx, node, &instance_type))
        .collect();
    let set = ctx
        .provider
        .new_object(ObjectKind::BulkInstanceSet, Property::List(entries));
    if let Err(err) = ctx.provider.add_child(node_object, set, None) {
        warn!("Failed to attach instance set to {node_object}: {err}");
        ctx.provider.discard_object(set);
    }
}

fn type_entry(ctx: &SyncContext<'_>, node: EngineHandle, instance_type: &str) -> Property {
    let blobs = ctx
        .engine
        .instances(node, instance_type)
        .iter()
        .map(|record| Property::bytes(to_blob(ctx, record).encode()))
        .collect();
    Property::Dict(
        Dictionary::new()
            .with(TYPE, Property::text(instance_type))
            .with(INSTANCES, Property::List(blobs)),
    )
}

fn to_blob(ctx: &SyncContext<'_>, record: &InstanceRecord) -> InstanceBlob {
    InstanceBlob {
        base_ref: record
            .base
            .and_then(|base| ctx.map.object_for(base))
            .map_or(0, |object| object.0),
        position: record.position,
        rotation: record.rotation,
        scale: record.scale,
        extra_offset: record.extra_offset,
        procedural_guid: record.procedural_guid,
        flags: record.flags.bits(),
    }
}

/// Decoded record, or the replicated base it waits for. A base missing from the tree
/// is dropped from the record.
enum Decoded {
    Ready(InstanceRecord),
    Waiting(ObjectId),
}

fn from_blob(ctx: &SyncContext<'_>, bytes: &[u8]) -> Result<Decoded, SyncError> {
    let blob = InstanceBlob::decode(bytes)?;
    let base = if blob.base_ref == 0 {
        None
    } else {
        let object = ObjectId(blob.base_ref);
        match ctx.map.handle_for(object) {
            Some(handle) => Some(handle),
            None if ctx.tree().contains(object) => return Ok(Decoded::Waiting(object)),
            None => None,
        }
    };
    Ok(Decoded::Ready(InstanceRecord {
        base,
        position: blob.position,
        rotation: blob.rotation,
        scale: blob.scale,
        extra_offset: blob.extra_offset,
        procedural_guid: blob.procedural_guid,
        flags: InstanceFlags::from_bits_retain(blob.flags),
    }))
}

/// Where in a set's property an event landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// The list of type entries.
    Types,
    /// A whole type entry, or its type name.
    Entry(usize),
    /// The instance list of a type.
    Instances(usize),
    /// One instance of a type.
    Instance(usize, usize),
}

impl Target {
    fn of(path: &PropertyPath) -> Option<Self> {
        match path.segments.as_slice() {
            [] => Some(Target::Types),
            [PathSegment::Index(entry)] => Some(Target::Entry(*entry)),
            [PathSegment::Index(entry), PathSegment::Key(key)] if key == TYPE => {
                Some(Target::Entry(*entry))
            }
            [PathSegment::Index(entry), PathSegment::Key(key)] if key == INSTANCES => {
                Some(Target::Instances(*entry))
            }
            [PathSegment::Index(entry), PathSegment::Key(key), PathSegment::Index(index)]
                if key == INSTANCES =>
            {
                Some(Target::Instance(*entry, *index))
            }
            _ => None,
        }
    }
}

/// Spatial hash cell of a position.
fn cell_of(position: Vec3, size: f32) -> (i32, i32, i32) {
    let cell = (position / size).floor();
    (cell.x as i32, cell.y as i32, cell.z as i32)
}

/// Adapter for [`ObjectKind::BulkInstanceSet`] objects.
#[derive(Debug, Default)]
pub struct InstanceAdapter {
    dirty: BTreeSet<ObjectId>,
    pending: BTreeMap<(EngineHandle, String), BTreeSet<ObjectId>>,
    touched: BTreeMap<(ObjectId, String), BTreeSet<usize>>,
}

impl InstanceAdapter {
    /// New adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (container, type) pairs waiting on base objects.
    pub fn pending_types(&self) -> usize {
        self.pending.len()
    }

    fn node_of(ctx: &SyncContext<'_>, set: ObjectId) -> Option<EngineHandle> {
        ctx.map.handle_for(ctx.tree().parent(set)?)
    }

    fn set_of(ctx: &SyncContext<'_>, node: EngineHandle) -> Option<ObjectId> {
        let node_object = ctx.map.object_for(node)?;
        ctx.tree()
            .children(node_object)
            .iter()
            .copied()
            .find(|child| ctx.tree().kind(*child) == Some(ObjectKind::BulkInstanceSet))
    }

    fn entries(ctx: &SyncContext<'_>, set: ObjectId) -> Vec<Property> {
        ctx.tree()
            .property(set)
            .and_then(Property::as_list)
            .map(<[Property]>::to_vec)
            .unwrap_or_default()
    }

    fn entry_type(entry: &Property) -> Option<&str> {
        entry.as_dict()?.text(TYPE)
    }

    fn entry_blobs(entry: &Property) -> Vec<&[u8]> {
        entry
            .as_dict()
            .and_then(|dict| dict.get(INSTANCES))
            .and_then(Property::as_list)
            .map(|items| items.iter().filter_map(Property::as_bytes).collect())
            .unwrap_or_default()
    }

    fn type_at(ctx: &SyncContext<'_>, set: ObjectId, entry: usize) -> Option<String> {
        let entries = Self::entries(ctx, set);
        entries.get(entry).and_then(Self::entry_type).map(str::to_string)
    }

    fn is_pending(&self, node: EngineHandle, instance_type: &str) -> bool {
        self.pending.contains_key(&(node, instance_type.to_string()))
    }

    /// Decode a run of blobs; registers the type as pending when a base is missing.
    fn decode_all(
        &mut self,
        ctx: &SyncContext<'_>,
        node: EngineHandle,
        instance_type: &str,
        blobs: &[&[u8]],
    ) -> Result<Option<Vec<InstanceRecord>>, SyncError> {
        let mut records = Vec::with_capacity(blobs.len());
        let mut waiting = BTreeSet::new();
        for blob in blobs {
            match from_blob(ctx, blob)? {
                Decoded::Ready(record) => records.push(record),
                Decoded::Waiting(base) => {
                    waiting.insert(base);
                }
            }
        }
        if waiting.is_empty() {
            return Ok(Some(records));
        }
        debug!(
            "{} instances of {instance_type} on {node} wait for {} bases",
            blobs.len() - records.len(),
            waiting.len()
        );
        self.pending
            .entry((node, instance_type.to_string()))
            .or_default()
            .extend(waiting);
        Ok(None)
    }

    /// Replace every local record of one type with the replicated list.
    fn apply_type(
        &mut self,
        ctx: &mut SyncContext<'_>,
        set: ObjectId,
        node: EngineHandle,
        instance_type: &str,
    ) -> Result<(), SyncError> {
        let entries = Self::entries(ctx, set);
        let Some(entry) = entries
            .iter()
            .find(|entry| Self::entry_type(entry) == Some(instance_type))
        else {
            return Ok(());
        };
        let blobs = Self::entry_blobs(entry);
        let Some(records) = self.decode_all(ctx, node, instance_type, &blobs)? else {
            return Ok(());
        };
        ctx.without_observer(|ctx| {
            if !ctx.engine.instance_types(node).iter().any(|t| t == instance_type) {
                ctx.engine.add_instance_type(node, instance_type);
            }
            let count = ctx.engine.instances(node, instance_type).len();
            let all: Vec<usize> = (0..count).rev().collect();
            ctx.engine.remove_instances(node, instance_type, &all);
            ctx.engine.add_instances(node, instance_type, &records);
        });
        Ok(())
    }

    /// Bring the local type set in line with the replicated entries. With `full`, every
    /// type is re-applied, not only new ones.
    fn apply_types(
        &mut self,
        ctx: &mut SyncContext<'_>,
        set: ObjectId,
        node: EngineHandle,
        full: bool,
    ) -> Result<(), SyncError> {
        let remote: Vec<String> = Self::entries(ctx, set)
            .iter()
            .filter_map(Self::entry_type)
            .map(str::to_string)
            .collect();
        let local = ctx.engine.instance_types(node);
        for instance_type in &local {
            if !remote.contains(instance_type) {
                debug!("Removing instance type {instance_type} from {node}");
                ctx.without_observer(|ctx| ctx.engine.remove_instance_type(node, instance_type));
                self.pending.remove(&(node, instance_type.clone()));
            }
        }
        for instance_type in &remote {
            if full || !local.contains(instance_type) {
                self.apply_type(ctx, set, node, instance_type)?;
            }
        }
        Ok(())
    }

    fn remove_tail(
        ctx: &mut SyncContext<'_>,
        node: EngineHandle,
        instance_type: &str,
        from: usize,
        len: usize,
    ) {
        let indices: Vec<usize> = (from..len).rev().collect();
        ctx.without_observer(|ctx| ctx.engine.remove_instances(node, instance_type, &indices));
    }

    fn remote_insert(
        &mut self,
        ctx: &mut SyncContext<'_>,
        set: ObjectId,
        node: EngineHandle,
        entry: usize,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        let Some(instance_type) = Self::type_at(ctx, set, entry) else {
            return Ok(());
        };
        if self.is_pending(node, &instance_type) {
            return Ok(());
        }
        let local = ctx.engine.instances(node, &instance_type);
        if index > local.len() {
            return self.apply_type(ctx, set, node, &instance_type);
        }
        let entries = Self::entries(ctx, set);
        let blobs = entries.get(entry).map(Self::entry_blobs).unwrap_or_default();
        let end = (index + count).min(blobs.len());
        let Some(added) = self.decode_all(ctx, node, &instance_type, &blobs[index.min(end)..end])?
        else {
            return Ok(());
        };
        let held = local[index..].to_vec();
        Self::remove_tail(ctx, node, &instance_type, index, local.len());
        ctx.without_observer(|ctx| {
            ctx.engine.add_instances(node, &instance_type, &added);
            ctx.engine.add_instances(node, &instance_type, &held);
        });
        Ok(())
    }

    fn remote_remove(
        &mut self,
        ctx: &mut SyncContext<'_>,
        set: ObjectId,
        node: EngineHandle,
        entry: usize,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        let Some(instance_type) = Self::type_at(ctx, set, entry) else {
            return Ok(());
        };
        if self.is_pending(node, &instance_type) {
            return Ok(());
        }
        let local = ctx.engine.instances(node, &instance_type);
        if local.len() < index + count {
            debug!("Local {instance_type} array is shorter than the removal; re-applying");
            return self.apply_type(ctx, set, node, &instance_type);
        }
        let held = local[index + count..].to_vec();
        Self::remove_tail(ctx, node, &instance_type, index, local.len());
        ctx.without_observer(|ctx| ctx.engine.add_instances(node, &instance_type, &held));
        if index < local.len() - count {
            self.touched
                .entry((set, instance_type))
                .or_default()
                .insert(index);
        }
        Ok(())
    }

    fn remote_replace(
        &mut self,
        ctx: &mut SyncContext<'_>,
        set: ObjectId,
        node: EngineHandle,
        entry: usize,
        index: usize,
    ) -> Result<(), SyncError> {
        let Some(instance_type) = Self::type_at(ctx, set, entry) else {
            return Ok(());
        };
        if self.is_pending(node, &instance_type) {
            return Ok(());
        }
        let local_len = ctx.engine.instances(node, &instance_type).len();
        if index >= local_len {
            return self.apply_type(ctx, set, node, &instance_type);
        }
        let entries = Self::entries(ctx, set);
        let blobs = entries.get(entry).map(Self::entry_blobs).unwrap_or_default();
        let Some(blob) = blobs.get(index) else {
            return Ok(());
        };
        let Some(records) = self.decode_all(ctx, node, &instance_type, &[*blob])? else {
            return Ok(());
        };
        // Append, then swap-remove the old slot so the new record lands in it.
        ctx.without_observer(|ctx| {
            ctx.engine.add_instances(node, &instance_type, &records);
            ctx.engine.remove_instances(node, &instance_type, &[index]);
        });
        self.touched
            .entry((set, instance_type))
            .or_default()
            .insert(index);
        Ok(())
    }

    /// Remove copies of touched records that share a hash cell, keeping the lowest index.
    fn resolve_duplicates(&mut self, ctx: &mut SyncContext<'_>) {
        let cell_size = ctx.config.instance_hash_cell_size.max(f32::EPSILON);
        for ((set, instance_type), indices) in std::mem::take(&mut self.touched) {
            let Some(node) = Self::node_of(ctx, set) else {
                continue;
            };
            let records = ctx.engine.instances(node, &instance_type);
            let cells: BTreeSet<(i32, i32, i32)> = indices
                .iter()
                .filter_map(|index| records.get(*index))
                .map(|record| cell_of(record.position, cell_size))
                .collect();
            let mut buckets: BTreeMap<(i32, i32, i32), Vec<usize>> = BTreeMap::new();
            for (index, record) in records.iter().enumerate() {
                let cell = cell_of(record.position, cell_size);
                if cells.contains(&cell) {
                    buckets.entry(cell).or_default().push(index);
                }
            }

            let mut doomed = BTreeSet::new();
            for index in &indices {
                let Some(record) = records.get(*index) else {
                    continue;
                };
                let bucket = &buckets[&cell_of(record.position, cell_size)];
                let equal: Vec<usize> = bucket
                    .iter()
                    .copied()
                    .filter(|other| records[*other] == *record)
                    .collect();
                if let Some((keep, rest)) = equal.split_first() {
                    debug!("Keeping {instance_type}[{keep}], dropping copies at {rest:?}");
                    doomed.extend(rest.iter().copied());
                }
            }
            if doomed.is_empty() {
                continue;
            }
            info!(
                "Removed {} duplicate {instance_type} instances on {node}",
                doomed.len()
            );
            let descending: Vec<usize> = doomed.into_iter().rev().collect();
            ctx.without_observer(|ctx| {
                ctx.engine.remove_instances(node, &instance_type, &descending)
            });
            self.dirty.insert(set);
        }
    }

    /// Push dirty sets while the tick budget allows.
    fn push_dirty(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut remaining = dirty.into_iter();
        while let Some(set) = remaining.next() {
            if ctx.budget.exceeded() {
                self.dirty.insert(set);
                self.dirty.extend(remaining);
                break;
            }
            self.sync_set(ctx, set)?;
        }
        Ok(())
    }

    /// Push local changes of one set, or revert them when it is locked. Types waiting
    /// on bases are left alone; they are re-applied from the tree once resolved.
    fn sync_set(&mut self, ctx: &mut SyncContext<'_>, set: ObjectId) -> Result<(), SyncError> {
        let Some(node) = Self::node_of(ctx, set) else {
            return Ok(());
        };
        if !ctx.is_live(set) || !ctx.engine.is_alive(node) {
            return Ok(());
        }
        if ctx.effective_lock_level(set).blocks_property_edits() {
            debug!("Reverting locked instance set {set}");
            return self.apply_types(ctx, set, node, true);
        }

        let local_types = ctx.engine.instance_types(node);
        let root = PropertyPath::root(set);

        // Types removed locally, highest entry first.
        let entries = Self::entries(ctx, set);
        for (entry, property) in entries.iter().enumerate().rev() {
            let keep = Self::entry_type(property).is_some_and(|instance_type| {
                local_types.iter().any(|local| local == instance_type)
                    || self.is_pending(node, instance_type)
            });
            if !keep {
                ctx.provider.list_remove(&root, entry, 1)?;
            }
        }
        // Types added locally.
        for instance_type in &local_types {
            let known = Self::entries(ctx, set)
                .iter()
                .any(|entry| Self::entry_type(entry) == Some(instance_type.as_str()));
            if !known {
                let entry = type_entry(ctx, node, instance_type);
                let end = Self::entries(ctx, set).len();
                ctx.provider.list_insert(&root, end, vec![entry])?;
            }
        }

        // Element-wise diff per type.
        let entries = Self::entries(ctx, set);
        for (entry, property) in entries.iter().enumerate() {
            let Some(instance_type) = Self::entry_type(property) else {
                continue;
            };
            if self.is_pending(node, instance_type) {
                debug!("Not pushing {instance_type} on {node} while it waits for bases");
                continue;
            }
            let remote = Self::entry_blobs(property);
            let local: Vec<Vec<u8>> = ctx
                .engine
                .instances(node, instance_type)
                .iter()
                .map(|record| to_blob(ctx, record).encode())
                .collect();
            let list = root.clone().index(entry).key(INSTANCES);
            for (index, blob) in local.iter().enumerate().take(remote.len()) {
                if remote[index] != blob.as_slice() {
                    ctx.provider
                        .set_property(&list.clone().index(index), Property::bytes(blob.clone()))?;
                }
            }
            if local.len() > remote.len() {
                let tail = local[remote.len()..]
                    .iter()
                    .map(|blob| Property::bytes(blob.clone()))
                    .collect();
                ctx.provider.list_insert(&list, remote.len(), tail)?;
            } else if remote.len() > local.len() {
                ctx.provider
                    .list_remove(&list, local.len(), remote.len() - local.len())?;
            }
        }
        Ok(())
    }

    /// Re-apply types whose bases all resolved or left the tree; forget those whose
    /// container is gone.
    fn check_pending(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        let pending = std::mem::take(&mut self.pending);
        let mut resolved = Vec::new();
        for ((node, instance_type), bases) in pending {
            if !ctx.engine.is_alive(node) {
                debug!("Dropping pending {instance_type} of destroyed {node}");
                continue;
            }
            let resolved_base =
                |base: &ObjectId| ctx.map.contains_object(*base) || !ctx.tree().contains(*base);
            if bases.iter().all(resolved_base) {
                resolved.push((node, instance_type));
            } else {
                self.pending.insert((node, instance_type), bases);
            }
        }
        for (node, instance_type) in resolved {
            let Some(set) = Self::set_of(ctx, node) else {
                continue;
            };
            debug!("Bases of {instance_type} on {node} resolved");
            self.apply_type(ctx, set, node, &instance_type)?;
        }
        Ok(())
    }
}

impl Adapter for InstanceAdapter {
    fn name(&self) -> &'static str {
        "instances"
    }

    fn clean_up(&mut self, _ctx: &mut SyncContext<'_>) {
        self.dirty.clear();
        self.pending.clear();
        self.touched.clear();
    }

    fn on_host_event(&mut self, ctx: &mut SyncContext<'_>, event: &HostEvent) {
        if let HostEvent::InstancesChanged(node) = event {
            if let Some(set) = Self::set_of(ctx, *node) {
                self.dirty.insert(set);
            }
        }
    }

    fn before_events(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        // Remote inserts and removes are index based; they must see local edits first.
        let dirty = std::mem::take(&mut self.dirty);
        for set in dirty {
            self.sync_set(ctx, set)?;
        }
        Ok(())
    }

    fn pre_tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        self.check_pending(ctx)
    }

    fn tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        self.resolve_duplicates(ctx);
        self.push_dirty(ctx)
    }

    fn on_create(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        _child_index: usize,
    ) -> Result<(), SyncError> {
        let Some(parent) = ctx.tree().parent(object) else {
            return Err(SyncError::protocol(object, "instance set without a container node"));
        };
        if ctx.tree().kind(parent) != Some(ObjectKind::Node) {
            return Err(SyncError::protocol(object, "instance set outside a node"));
        }
        let Some(node) = ctx.map.handle_for(parent) else {
            debug!("Container {parent} of {object} is not instantiated yet");
            return Ok(());
        };
        self.apply_types(ctx, object, node, true)
    }

    fn on_delete(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        self.dirty.remove(&object);
        self.touched.retain(|(set, _), _| *set != object);
        if let Some(node) = Self::node_of(ctx, object) {
            self.pending.retain(|(pending, _), _| *pending != node);
        }
        Ok(())
    }

    fn on_property_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
    ) -> Result<(), SyncError> {
        let Some(set) = path.container else {
            return Ok(());
        };
        let Some(node) = Self::node_of(ctx, set) else {
            return Ok(());
        };
        match Target::of(path) {
            Some(Target::Types) => self.apply_types(ctx, set, node, true),
            Some(Target::Entry(entry) | Target::Instances(entry)) => {
                self.apply_types(ctx, set, node, false)?;
                match Self::type_at(ctx, set, entry) {
                    Some(instance_type) => self.apply_type(ctx, set, node, &instance_type),
                    None => Ok(()),
                }
            }
            Some(Target::Instance(entry, index)) => {
                self.remote_replace(ctx, set, node, entry, index)
            }
            None => {
                warn!("Unexpected instance set path {:?}", path.segments);
                Ok(())
            }
        }
    }

    fn on_list_add(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        let Some(set) = path.container else {
            return Ok(());
        };
        let Some(node) = Self::node_of(ctx, set) else {
            return Ok(());
        };
        match Target::of(path) {
            Some(Target::Types) => self.apply_types(ctx, set, node, false),
            Some(Target::Instances(entry)) => {
                self.remote_insert(ctx, set, node, entry, index, count)
            }
            _ => Ok(()),
        }
    }

    fn on_list_remove(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        let Some(set) = path.container else {
            return Ok(());
        };
        let Some(node) = Self::node_of(ctx, set) else {
            return Ok(());
        };
        match Target::of(path) {
            Some(Target::Types) => self.apply_types(ctx, set, node, false),
            Some(Target::Instances(entry)) => {
                self.remote_remove(ctx, set, node, entry, index, count)
            }
            _ => Ok(()),
        }
    }
}
