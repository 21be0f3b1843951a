//! Per-callback view of the session handed to adapters.

use crate::budget::TickBudget;
use crate::config::SyncConfig;
use crate::notices::{Notice, Notices};
use crate::stand_in::StandIns;
use scenesync_core::{
    HostEngine, LockLevel, ObjectId, ObjectKind, ObjectMap, ObjectTree, ParticipantId, Provider,
    SyncState,
};
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info};

/// FIFO of remote creates deferred to a later tick. Each object is queued at most once.
#[derive(Debug, Default)]
pub struct CreateQueue {
    queued: BTreeSet<ObjectId>,
    order: VecDeque<ObjectId>,
}

impl CreateQueue {
    /// Append `object`; returns false when it was already queued.
    pub fn push(&mut self, object: ObjectId) -> bool {
        if !self.queued.insert(object) {
            return false;
        }
        self.order.push_back(object);
        true
    }

    /// Oldest queued object.
    pub fn pop(&mut self) -> Option<ObjectId> {
        let object = self.order.pop_front()?;
        self.queued.remove(&object);
        Some(object)
    }

    /// Whether `object` is queued.
    pub fn contains(&self, object: ObjectId) -> bool {
        self.queued.contains(&object)
    }

    /// Number of queued objects.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queued.clear();
        self.order.clear();
    }
}

/// Session-lifetime state shared by every adapter.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Deferred remote creates.
    pub create_queue: CreateQueue,
    /// Placeholders awaiting their class.
    pub stand_ins: StandIns,
    /// Pending user notices.
    pub notices: Notices,
}

impl SessionState {
    /// Forget everything; used on disconnect and reconnect.
    pub fn reset(&mut self) {
        self.create_queue.clear();
        self.stand_ins.clear();
        self.notices.reset();
    }
}

/// Everything an adapter callback may touch.
///
/// Adapters never call each other. Work on another object's adapter is requested by
/// pushing the object onto the cascade, which the dispatcher drains after the callback.
pub struct SyncContext<'a> {
    /// Replication provider.
    pub provider: &'a mut dyn Provider,
    /// Host engine.
    pub engine: &'a mut dyn HostEngine,
    /// Object ↔ engine handle map.
    pub map: &'a mut ObjectMap,
    /// Session configuration.
    pub config: &'a SyncConfig,
    /// Deadline of the current tick.
    pub budget: TickBudget,
    pub(crate) state: &'a mut SessionState,
    cascade: VecDeque<ObjectId>,
}

impl<'a> SyncContext<'a> {
    /// Bundle the session parts for one callback round.
    pub fn new(
        provider: &'a mut dyn Provider,
        engine: &'a mut dyn HostEngine,
        map: &'a mut ObjectMap,
        config: &'a SyncConfig,
        state: &'a mut SessionState,
        budget: TickBudget,
    ) -> Self {
        Self {
            provider,
            engine,
            map,
            config,
            budget,
            state,
            cascade: VecDeque::new(),
        }
    }

    /// Local participant.
    pub fn local(&self) -> ParticipantId {
        self.provider.local_participant()
    }

    /// Replicated tree.
    pub fn tree(&self) -> &ObjectTree {
        self.provider.tree()
    }

    /// Whether `object` is part of the replicated tree and not being deleted.
    pub fn is_live(&self, object: ObjectId) -> bool {
        self.tree()
            .get(object)
            .is_some_and(|object| object.sync() == SyncState::Created)
    }

    /// Sync state of `object`.
    pub fn sync_state(&self, object: ObjectId) -> Option<SyncState> {
        self.tree().get(object).map(|object| object.sync())
    }

    /// Lock level of `object` for the local participant.
    pub fn lock_level(&self, object: ObjectId) -> LockLevel {
        self.tree().lock_level(object, self.local())
    }

    /// Lock level of `object` combined with the lock of the node owning it.
    pub fn effective_lock_level(&self, object: ObjectId) -> LockLevel {
        let tree = self.tree();
        let own = self.lock_level(object);
        if tree.kind(object) == Some(ObjectKind::Node) {
            return own;
        }
        let owner = tree
            .nearest_ancestor(object, ObjectKind::Node)
            .map(|node| self.lock_level(node))
            .unwrap_or(LockLevel::Unlocked);
        own.max(owner)
    }

    /// Defer the remote create of `object` to a later tick.
    pub fn queue_create(&mut self, object: ObjectId) {
        if self.state.create_queue.push(object) {
            debug!("Deferred create of {object}");
        }
    }

    /// Number of deferred creates.
    pub fn queued_creates(&self) -> usize {
        self.state.create_queue.len()
    }

    /// Record a placeholder spawned for `object`.
    pub fn register_stand_in(
        &mut self,
        handle: scenesync_core::EngineHandle,
        object: ObjectId,
        class: &str,
    ) {
        self.state.stand_ins.register(handle, object, class);
        self.raise(Notice::MissingClass {
            class: class.to_string(),
        });
    }

    /// Raise a user notice (deduplicated per session).
    pub fn raise(&mut self, notice: Notice) {
        let text = notice.to_string();
        if self.state.notices.raise(notice) {
            info!("{text}");
        }
    }

    /// Queue the children of `object` for creation, sub-objects before nodes.
    pub fn cascade_children(&mut self, object: ObjectId) {
        let tree = self.provider.tree();
        let (nodes, others): (Vec<ObjectId>, Vec<ObjectId>) = tree
            .children(object)
            .iter()
            .copied()
            .partition(|child| tree.kind(*child) == Some(ObjectKind::Node));
        self.cascade.extend(others);
        self.cascade.extend(nodes);
    }

    /// Queue a single object for a create callback.
    pub fn cascade(&mut self, object: ObjectId) {
        self.cascade.push_back(object);
    }

    pub(crate) fn next_cascade(&mut self) -> Option<ObjectId> {
        self.cascade.pop_front()
    }

    /// Run `f` with host change notifications suspended, restoring the prior setting.
    pub fn without_observer<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.engine.set_change_notifications(false);
        let result = f(self);
        self.engine.set_change_notifications(previous);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_queue_is_fifo_without_duplicates() {
        let mut queue = CreateQueue::default();
        assert!(queue.push(ObjectId(3)));
        assert!(queue.push(ObjectId(1)));
        assert!(!queue.push(ObjectId(3)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(ObjectId(3)));
        assert!(!queue.contains(ObjectId(3)));
        assert_eq!(queue.pop(), Some(ObjectId(1)));
        assert_eq!(queue.pop(), None);
    }
}
