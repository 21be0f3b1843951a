//! Placeholders for objects whose class is not loaded locally.

use scenesync_core::{EngineHandle, ObjectId};
use std::collections::BTreeMap;

/// Stand-in placed for a replicated object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandIn {
    /// Object represented by the placeholder.
    pub object: ObjectId,
    /// Class that could not be loaded.
    pub class: String,
}

/// Registry of spawned stand-ins, keyed by placeholder handle.
#[derive(Debug, Default)]
pub struct StandIns {
    entries: BTreeMap<EngineHandle, StandIn>,
}

impl StandIns {
    /// Record a placeholder.
    pub fn register(&mut self, handle: EngineHandle, object: ObjectId, class: impl Into<String>) {
        self.entries.insert(
            handle,
            StandIn {
                object,
                class: class.into(),
            },
        );
    }

    /// Whether `handle` is a placeholder.
    pub fn contains(&self, handle: EngineHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Forget a placeholder.
    pub fn remove(&mut self, handle: EngineHandle) -> Option<StandIn> {
        self.entries.remove(&handle)
    }

    /// Placeholders whose class passes `available`.
    pub fn upgradable(&self, available: impl Fn(&str) -> bool) -> Vec<(EngineHandle, StandIn)> {
        self.entries
            .iter()
            .filter(|(_, stand_in)| available(&stand_in.class))
            .map(|(handle, stand_in)| (*handle, stand_in.clone()))
            .collect()
    }

    /// Number of placeholders.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no placeholders exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Replace every placeholder whose class became available with the real object.
///
/// The placeholder is destroyed, mappings of the object and its non-node descendants
/// are dropped, and the object is queued for creation again. Attached child nodes keep
/// their mappings and are re-attached when the new object cascades.
pub(crate) fn upgrade_stand_ins(ctx: &mut crate::SyncContext<'_>) {
    use scenesync_core::ObjectKind;

    let engine = &*ctx.engine;
    let ready = ctx
        .state
        .stand_ins
        .upgradable(|class| engine.class_available(class));
    for (handle, stand_in) in ready {
        ctx.state.stand_ins.remove(handle);
        tracing::info!(
            "Class {} is now available; replacing stand-in for {}",
            stand_in.class,
            stand_in.object
        );
        ctx.without_observer(|ctx| ctx.engine.destroy(handle));
        let members = ctx.tree().self_and_descendants(stand_in.object);
        for member in members {
            let is_child_node =
                member != stand_in.object && ctx.tree().kind(member) == Some(ObjectKind::Node);
            if !is_child_node {
                ctx.map.remove_object(member);
            }
        }
        ctx.map.remove_handle(handle);
        ctx.queue_create(stand_in.object);
    }
}
