//! Fallback for engine objects no other adapter claims.

use super::{CLASS, NAME};
use crate::dispatcher::{Adapter, Claim};
use crate::properties::{self, FIELDS};
use crate::{SyncContext, SyncError};
use scenesync_core::{
    Dictionary, EngineHandle, EngineKind, HostEvent, ObjectId, ObjectKind, Property, PropertyPath,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Syncs free-standing engine objects as a dictionary of their fields.
#[derive(Debug, Default)]
pub struct GenericAdapter {
    dirty: BTreeMap<EngineHandle, BTreeSet<String>>,
}

impl GenericAdapter {
    /// New adapter.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_generic(ctx: &SyncContext<'_>, object: ObjectId) -> bool {
        matches!(
            ctx.tree().kind(object),
            Some(ObjectKind::GenericEngineObject | ObjectKind::ConfigSet)
        )
    }
}

impl Adapter for GenericAdapter {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn clean_up(&mut self, _ctx: &mut SyncContext<'_>) {
        self.dirty.clear();
    }

    fn create(&mut self, ctx: &mut SyncContext<'_>, handle: EngineHandle) -> Claim {
        if ctx.engine.kind(handle) != Some(EngineKind::Other) {
            return Claim::Declined;
        }
        if let Some(object) = ctx.map.object_for(handle) {
            return Claim::Handled(Some(object));
        }
        let class = ctx.engine.class_name(handle).unwrap_or_default();
        let kind = if ctx.config.config_set_classes.contains(&class) {
            ObjectKind::ConfigSet
        } else {
            ObjectKind::GenericEngineObject
        };
        let dict = Dictionary::new()
            .with(NAME, Property::text(ctx.engine.name(handle).unwrap_or_default()))
            .with(CLASS, Property::text(class))
            .with(FIELDS, properties::fields_dict(ctx, handle));
        let object = ctx.provider.new_object(kind, Property::Dict(dict));
        ctx.map.insert(object, handle);
        let index = ctx.tree().roots().len();
        if let Err(err) = ctx.provider.create_objects(&[object], None, index) {
            warn!("Failed to create {handle}: {err}");
            ctx.map.remove_object(object);
            ctx.provider.discard_object(object);
            return Claim::Handled(None);
        }
        debug!("Created {kind:?} {object} for {handle}");
        Claim::Handled(Some(object))
    }

    fn on_host_event(&mut self, ctx: &mut SyncContext<'_>, event: &HostEvent) {
        if let HostEvent::PropertyChanged { object, field } = event {
            let generic = ctx
                .map
                .object_for(*object)
                .is_some_and(|mapped| Self::is_generic(ctx, mapped));
            if generic {
                self.dirty.entry(*object).or_default().insert(field.clone());
            }
        }
    }

    fn tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        for (handle, names) in std::mem::take(&mut self.dirty) {
            let Some(object) = ctx.map.object_for(handle) else {
                continue;
            };
            if !ctx.is_live(object) || !ctx.engine.is_alive(handle) {
                continue;
            }
            let locked = ctx.lock_level(object).blocks_property_edits();
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
        if ctx.map.contains_object(object) {
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
        let existing = ctx.engine.find_object(&name).filter(|handle| {
            ctx.map.object_for(*handle).is_none()
                && ctx.engine.class_name(*handle).as_deref() == Some(class.as_str())
        });
        let handle = match existing {
            Some(handle) => handle,
            None => match ctx.engine.spawn_object(&class, &name) {
                Ok(handle) => handle,
                Err(err) => {
                    debug!("{err}");
                    return Err(SyncError::Resolution { class });
                }
            },
        };
        ctx.map.insert(object, handle);
        if let Some(fields) = dict.get(FIELDS).and_then(Property::as_dict) {
            properties::apply_fields(ctx, handle, fields);
        }
        properties::resolve_references_to(ctx, object);
        Ok(())
    }

    fn on_delete(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        if let Some(handle) = ctx.map.remove_object(object) {
            self.dirty.remove(&handle);
            ctx.without_observer(|ctx| ctx.engine.destroy(handle));
        }
        Ok(())
    }

    fn on_confirm_delete(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        ctx.map.remove_object(object);
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
        let value = ctx.tree().resolve(path).cloned();
        match (path.first_key(), path.depth(), value) {
            (Some(FIELDS), 1, Some(Property::Dict(fields))) => {
                properties::apply_fields(ctx, handle, &fields);
            }
            (Some(FIELDS), 2, Some(value)) => {
                if let Some(name) = path.key_at(1) {
                    properties::apply_field(ctx, handle, name, &value);
                }
            }
            (Some(NAME), 1, Some(value)) => {
                if let Some(name) = value.as_text() {
                    let name = name.to_string();
                    ctx.without_observer(|ctx| ctx.engine.rename(handle, &name));
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
