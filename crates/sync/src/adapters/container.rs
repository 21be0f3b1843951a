//! The scene container being edited.

use super::NAME;
use crate::dispatcher::Adapter;
use crate::{SyncContext, SyncError};
use scenesync_core::{Dictionary, ObjectId, ObjectKind, Property};
use tracing::{debug, info, warn};

/// Maps the host's active container to a root [`ObjectKind::Container`] object.
#[derive(Debug, Default)]
pub struct ContainerAdapter;

impl ContainerAdapter {
    /// New adapter.
    pub fn new() -> Self {
        Self
    }

    fn container_name(ctx: &SyncContext<'_>, object: ObjectId) -> Option<String> {
        ctx.tree()
            .property(object)
            .and_then(Property::as_dict)
            .and_then(|dict| dict.text(NAME))
            .map(str::to_string)
    }
}

impl Adapter for ContainerAdapter {
    fn name(&self) -> &'static str {
        "container"
    }

    fn initialize(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        let Some(container) = ctx.engine.active_container() else {
            warn!("No active container; nothing to sync");
            return Ok(());
        };
        let name = ctx.engine.name(container).unwrap_or_default();
        let existing = ctx.tree().roots().into_iter().find(|root| {
            ctx.tree().kind(*root) == Some(ObjectKind::Container)
                && ctx.is_live(*root)
                && Self::container_name(ctx, *root).as_deref() == Some(name.as_str())
        });
        match existing {
            Some(object) => {
                info!("Joining container {name} ({object})");
                ctx.map.insert(object, container);
                ctx.cascade_children(object);
            }
            None => {
                let dict = Dictionary::new().with(NAME, Property::text(name.clone()));
                let object = ctx.provider.new_object(ObjectKind::Container, Property::Dict(dict));
                ctx.map.insert(object, container);
                let index = ctx.tree().roots().len();
                ctx.provider.create_objects(&[object], None, index)?;
                info!("Created container {name} ({object})");
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
            ctx.cascade_children(object);
            return Ok(());
        }
        let Some(container) = ctx.engine.active_container() else {
            return Ok(());
        };
        if ctx.map.object_for(container).is_some() {
            debug!("Ignoring container {object}; another one is active");
            return Ok(());
        }
        let name = ctx.engine.name(container);
        if name.is_some() && Self::container_name(ctx, object) == name {
            ctx.map.insert(object, container);
            ctx.cascade_children(object);
        }
        Ok(())
    }

    fn on_delete(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        if ctx.map.remove_object(object).is_some() {
            warn!("The active container {object} was deleted remotely");
        }
        Ok(())
    }
}
