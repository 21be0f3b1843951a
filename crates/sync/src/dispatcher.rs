//! Routing of replication and host events to per-type adapters.

use crate::{SyncContext, SyncError};
use scenesync_core::{EngineHandle, HostEvent, ObjectEvent, ObjectId, ObjectKind, PropertyPath};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Outcome of offering a local engine object to an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The adapter does not handle this kind of object.
    Declined,
    /// The adapter handled it, producing a replicated object unless it was filtered out.
    Handled(Option<ObjectId>),
}

/// Per-type translator between the replicated tree and the host engine.
///
/// Every callback has a no-op default so adapters only implement what they handle.
/// Callbacks run with host change notifications suspended.
#[allow(unused_variables)]
pub trait Adapter {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Called once after connecting, before any event is dispatched.
    fn initialize(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        Ok(())
    }

    /// Called on disconnect.
    fn clean_up(&mut self, ctx: &mut SyncContext<'_>) {}

    /// Start of frame, before incoming events are applied. Local edits that remote
    /// edits would otherwise land on are pushed here.
    fn before_events(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        Ok(())
    }

    /// Start of tick, after incoming events were processed.
    fn pre_tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        Ok(())
    }

    /// Main tick: uploads and diffs.
    fn tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        Ok(())
    }

    /// End-of-tick bookkeeping, such as destroying local objects released during the
    /// tick.
    fn end_tick(&mut self, ctx: &mut SyncContext<'_>) {}

    /// Host notification; every adapter sees every event.
    fn on_host_event(&mut self, ctx: &mut SyncContext<'_>, event: &HostEvent) {}

    /// Build a replicated object for a local engine object.
    fn create(&mut self, ctx: &mut SyncContext<'_>, handle: EngineHandle) -> Claim {
        Claim::Declined
    }

    /// Undo/redo touched `handle`; `object` is its mapped object, if any. Returns
    /// whether the adapter handled it.
    fn on_undo_redo(
        &mut self,
        ctx: &mut SyncContext<'_>,
        handle: EngineHandle,
        object: Option<ObjectId>,
    ) -> bool {
        false
    }

    /// A replicated object appeared.
    fn on_create(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        child_index: usize,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// Another participant deleted `object`.
    fn on_delete(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        Ok(())
    }

    /// A local delete of `object` was confirmed.
    fn on_confirm_delete(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// `object` became locked.
    fn on_lock(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        Ok(())
    }

    /// `object` became unlocked.
    fn on_unlock(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        Ok(())
    }

    /// The lock on `object` changed owner.
    fn on_lock_owner_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// `object` moved.
    fn on_parent_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
        child_index: usize,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// A property value was replaced.
    fn on_property_change(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// A dictionary field was removed.
    fn on_remove_field(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        name: &str,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// List elements were inserted.
    fn on_list_add(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    /// List elements were removed.
    fn on_list_remove(
        &mut self,
        ctx: &mut SyncContext<'_>,
        path: &PropertyPath,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Index of an adapter inside a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AdapterId(usize);

/// Owns the adapters and routes events to them by object type.
///
/// `create` probes primary adapters in registration order, then fallbacks.
#[derive(Default)]
pub struct Dispatcher {
    adapters: Vec<Box<dyn Adapter>>,
    by_kind: BTreeMap<ObjectKind, AdapterId>,
    primary: Vec<AdapterId>,
    fallback: Vec<AdapterId>,
}

impl Dispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an adapter.
    pub fn add(&mut self, adapter: Box<dyn Adapter>) -> AdapterId {
        self.adapters.push(adapter);
        AdapterId(self.adapters.len() - 1)
    }

    /// Route `kind` to `adapter`. An adapter joins the probe order once, as primary or
    /// fallback according to its first registration.
    pub fn register(&mut self, kind: ObjectKind, adapter: AdapterId, is_fallback: bool) {
        if let Some(previous) = self.by_kind.insert(kind, adapter) {
            if previous != adapter {
                debug!(
                    "{kind:?} moved from {} to {}",
                    self.name(previous),
                    self.name(adapter)
                );
            }
        }
        if self.primary.contains(&adapter) || self.fallback.contains(&adapter) {
            return;
        }
        if is_fallback {
            self.fallback.push(adapter);
        } else {
            self.primary.push(adapter);
        }
    }

    /// Adapter registered for `kind`.
    pub fn adapter_for(&self, kind: ObjectKind) -> Option<AdapterId> {
        self.by_kind.get(&kind).copied()
    }

    /// Name of an adapter.
    pub fn name(&self, adapter: AdapterId) -> &'static str {
        self.adapters
            .get(adapter.0)
            .map(|adapter| adapter.name())
            .unwrap_or("<unknown>")
    }

    fn probe_order(&self) -> Vec<AdapterId> {
        self.primary
            .iter()
            .chain(self.fallback.iter())
            .copied()
            .collect()
    }

    fn all(&self) -> Vec<AdapterId> {
        (0..self.adapters.len()).map(AdapterId).collect()
    }

    fn contain(&self, adapter: AdapterId, result: Result<(), SyncError>) -> Result<(), SyncError> {
        match result {
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!("{} adapter: {err}", self.name(adapter));
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Initialize every adapter in registration order.
    pub fn initialize(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for id in self.all() {
            let result = self.adapters[id.0].initialize(ctx);
            self.contain(id, result)?;
            self.drain_cascade(ctx)?;
        }
        Ok(())
    }

    /// Clean up every adapter.
    pub fn clean_up(&mut self, ctx: &mut SyncContext<'_>) {
        for adapter in &mut self.adapters {
            adapter.clean_up(ctx);
        }
    }

    /// Run every adapter's hook for local edits due before incoming events.
    pub fn before_events(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for id in self.all() {
            let result = self.adapters[id.0].before_events(ctx);
            self.contain(id, result)?;
            self.drain_cascade(ctx)?;
        }
        Ok(())
    }

    /// Run every adapter's pre-tick hook.
    pub fn pre_tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for id in self.all() {
            let result = self.adapters[id.0].pre_tick(ctx);
            self.contain(id, result)?;
            self.drain_cascade(ctx)?;
        }
        Ok(())
    }

    /// Run every adapter's tick hook.
    pub fn tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for id in self.all() {
            let result = self.adapters[id.0].tick(ctx);
            self.contain(id, result)?;
            self.drain_cascade(ctx)?;
        }
        Ok(())
    }

    /// Run every adapter's end-of-tick hook.
    pub fn end_tick(&mut self, ctx: &mut SyncContext<'_>) {
        for adapter in &mut self.adapters {
            adapter.end_tick(ctx);
        }
    }

    /// Fan a host notification out to every adapter. Undo/redo batches are also
    /// routed per object.
    pub fn notify(
        &mut self,
        ctx: &mut SyncContext<'_>,
        event: &HostEvent,
    ) -> Result<(), SyncError> {
        let adapters = &mut self.adapters;
        ctx.without_observer(|ctx| {
            for adapter in adapters.iter_mut() {
                adapter.on_host_event(ctx, event);
            }
        });
        if let HostEvent::UndoRedo(handles) = event {
            for handle in handles {
                self.undo_redo(ctx, *handle);
            }
        }
        self.drain_cascade(ctx)
    }

    fn undo_redo(&mut self, ctx: &mut SyncContext<'_>, handle: EngineHandle) {
        let object = ctx.map.object_for(handle);
        let routed = object
            .and_then(|object| ctx.tree().kind(object))
            .and_then(|kind| self.adapter_for(kind));
        let candidates = match routed {
            Some(id) => vec![id],
            None => self.probe_order(),
        };
        for id in candidates {
            if self.adapters[id.0].on_undo_redo(ctx, handle, object) {
                return;
            }
        }
        debug!("Undo of {handle} was not handled");
    }

    /// Offer a local engine object to the adapters, primary ones first.
    pub fn create(
        &mut self,
        ctx: &mut SyncContext<'_>,
        handle: EngineHandle,
    ) -> Result<Option<ObjectId>, SyncError> {
        for id in self.probe_order() {
            match self.adapters[id.0].create(ctx, handle) {
                Claim::Declined => continue,
                Claim::Handled(object) => {
                    self.drain_cascade(ctx)?;
                    return Ok(object);
                }
            }
        }
        debug!("No adapter claimed {handle}");
        Ok(None)
    }

    /// Drain deferred creates while the tick budget allows. Only objects that are still
    /// part of the replicated tree and not yet instantiated are dispatched.
    pub fn process_create_queue(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        while !ctx.budget.exceeded() {
            let Some(object) = ctx.state.create_queue.pop() else {
                break;
            };
            if !ctx.is_live(object) || ctx.map.contains_object(object) {
                continue;
            }
            let child_index = ctx.tree().child_index(object).unwrap_or(0);
            self.dispatch(
                ctx,
                ObjectEvent::Create {
                    object,
                    child_index,
                },
            )?;
        }
        Ok(())
    }

    /// Route one replication event, then every create it cascaded.
    pub fn dispatch(
        &mut self,
        ctx: &mut SyncContext<'_>,
        event: ObjectEvent,
    ) -> Result<(), SyncError> {
        self.route(ctx, &event)?;
        self.drain_cascade(ctx)
    }

    fn drain_cascade(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        while let Some(object) = ctx.next_cascade() {
            let child_index = ctx.tree().child_index(object).unwrap_or(0);
            self.route(
                ctx,
                &ObjectEvent::Create {
                    object,
                    child_index,
                },
            )?;
        }
        Ok(())
    }

    fn subject(event: &ObjectEvent) -> Option<ObjectId> {
        let path = match event {
            ObjectEvent::Create { object, .. }
            | ObjectEvent::Delete { object }
            | ObjectEvent::ConfirmDelete { object }
            | ObjectEvent::Lock { object }
            | ObjectEvent::Unlock { object }
            | ObjectEvent::LockOwnerChange { object }
            | ObjectEvent::ParentChange { object, .. } => return Some(*object),
            ObjectEvent::PropertyChange { path }
            | ObjectEvent::RemoveField { path, .. }
            | ObjectEvent::ListAdd { path, .. }
            | ObjectEvent::ListRemove { path, .. } => path,
        };
        if path.container.is_none() {
            error!(
                "{} event at {:?} has no container object; dropping",
                event.label(),
                path.segments
            );
        }
        path.container
    }

    fn route(&mut self, ctx: &mut SyncContext<'_>, event: &ObjectEvent) -> Result<(), SyncError> {
        let Some(object) = Self::subject(event) else {
            return Ok(());
        };
        let Some(kind) = ctx.tree().kind(object) else {
            warn!("{} event for unknown object {object}; dropping", event.label());
            return Ok(());
        };
        let Some(id) = self.adapter_for(kind) else {
            warn!("No adapter for {kind:?}; dropping {} event", event.label());
            return Ok(());
        };
        let adapter = &mut self.adapters[id.0];
        let result = ctx.without_observer(|ctx| match event {
            ObjectEvent::Create {
                object,
                child_index,
            } => adapter.on_create(ctx, *object, *child_index),
            ObjectEvent::Delete { object } => adapter.on_delete(ctx, *object),
            ObjectEvent::ConfirmDelete { object } => adapter.on_confirm_delete(ctx, *object),
            ObjectEvent::Lock { object } => adapter.on_lock(ctx, *object),
            ObjectEvent::Unlock { object } => adapter.on_unlock(ctx, *object),
            ObjectEvent::LockOwnerChange { object } => adapter.on_lock_owner_change(ctx, *object),
            ObjectEvent::ParentChange {
                object,
                child_index,
            } => adapter.on_parent_change(ctx, *object, *child_index),
            ObjectEvent::PropertyChange { path } => adapter.on_property_change(ctx, path),
            ObjectEvent::RemoveField { path, name } => adapter.on_remove_field(ctx, path, name),
            ObjectEvent::ListAdd { path, index, count } => {
                adapter.on_list_add(ctx, path, *index, *count)
            }
            ObjectEvent::ListRemove { path, index, count } => {
                adapter.on_list_remove(ctx, path, *index, *count)
            }
        });
        self.contain(id, result)
    }
}
