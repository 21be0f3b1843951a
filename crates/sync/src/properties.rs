//! Conversion between engine fields and replicated properties.
//!
//! Engine object references travel as [`Property::Reference`] holding the replicated id
//! of the referenced object, or [`ObjectId::NONE`] when it has none yet. Incoming
//! references to objects not instantiated locally stay unresolved until the target is
//! created, at which point [`resolve_references_to`] patches every referrer.

use crate::{SyncContext, SyncError};
use glam::Vec3;
use scenesync_core::{
    Dictionary, EngineHandle, FieldValue, ObjectId, ObjectMap, Property, PropertyPath, Value,
};
use tracing::{debug, warn};

/// Key of the nested dictionary holding an object's synced fields.
pub const FIELDS: &str = "fields";

/// Result of converting a replicated property into an engine field.
#[derive(Debug, Clone, PartialEq)]
pub enum Converted {
    /// Ready to write.
    Ready(FieldValue),
    /// References an object that is not instantiated locally yet.
    Pending(ObjectId),
    /// Shape has no engine field equivalent.
    Unsupported,
}

/// Engine field → replicated property.
pub fn to_property(map: &ObjectMap, value: &FieldValue) -> Property {
    match value {
        FieldValue::Bool(value) => Value::Bool(*value).into(),
        FieldValue::Int(value) => Value::Int(*value).into(),
        FieldValue::Float(value) => Value::Float(*value).into(),
        FieldValue::Text(value) => Value::Text(value.clone()).into(),
        FieldValue::Bytes(value) => Value::Bytes(value.clone()).into(),
        FieldValue::Vec3(value) => Value::Vec3(value.to_array()).into(),
        FieldValue::Object(Some(handle)) => {
            Property::Reference(map.object_for(*handle).unwrap_or(ObjectId::NONE))
        }
        FieldValue::Object(None) => Property::Reference(ObjectId::NONE),
    }
}

/// Replicated property → engine field.
pub fn to_field_value(map: &ObjectMap, property: &Property) -> Converted {
    match property {
        Property::Value(Value::Bool(value)) => Converted::Ready(FieldValue::Bool(*value)),
        Property::Value(Value::Int(value)) => Converted::Ready(FieldValue::Int(*value)),
        Property::Value(Value::Float(value)) => Converted::Ready(FieldValue::Float(*value)),
        Property::Value(Value::Text(value)) => Converted::Ready(FieldValue::Text(value.clone())),
        Property::Value(Value::Bytes(value)) => Converted::Ready(FieldValue::Bytes(value.clone())),
        Property::Value(Value::Vec3(value)) => {
            Converted::Ready(FieldValue::Vec3(Vec3::from_array(*value)))
        }
        Property::Reference(id) if id.is_none() => Converted::Ready(FieldValue::Object(None)),
        Property::Reference(id) => match map.handle_for(*id) {
            Some(handle) => Converted::Ready(FieldValue::Object(Some(handle))),
            None => Converted::Pending(*id),
        },
        Property::Value(Value::Null) | Property::Dict(_) | Property::List(_) => {
            Converted::Unsupported
        }
    }
}

/// Snapshot of every field of `handle` as a dictionary.
pub fn fields_dict(ctx: &SyncContext<'_>, handle: EngineHandle) -> Dictionary {
    let mut dict = Dictionary::new();
    for (name, value) in ctx.engine.fields(handle) {
        dict.insert(name, to_property(ctx.map, &value));
    }
    dict
}

/// Write one replicated value into an engine field. Returns whether it was written.
pub fn apply_field(
    ctx: &mut SyncContext<'_>,
    handle: EngineHandle,
    name: &str,
    property: &Property,
) -> bool {
    match to_field_value(ctx.map, property) {
        Converted::Ready(value) => {
            ctx.without_observer(|ctx| ctx.engine.set_field(handle, name, value))
        }
        Converted::Pending(target) => {
            debug!("Field {name} on {handle} waits for {target}");
            false
        }
        Converted::Unsupported => {
            warn!("Field {name} on {handle} has an unsupported shape");
            false
        }
    }
}

/// Write every entry of a replicated field dictionary into the engine object.
pub fn apply_fields(ctx: &mut SyncContext<'_>, handle: EngineHandle, fields: &Dictionary) {
    for (name, property) in fields.iter() {
        apply_field(ctx, handle, name, property);
    }
}

/// Path of a named field of `object`.
pub fn field_path(object: ObjectId, name: &str) -> PropertyPath {
    PropertyPath::root(object).key(FIELDS).key(name)
}

/// Push the engine value of one field when it differs from the replicated one.
pub fn push_field(
    ctx: &mut SyncContext<'_>,
    object: ObjectId,
    handle: EngineHandle,
    name: &str,
) -> Result<(), SyncError> {
    let Some(value) = ctx.engine.field(handle, name) else {
        return Ok(());
    };
    let property = to_property(ctx.map, &value);
    let path = field_path(object, name);
    if ctx.tree().resolve(&path) != Some(&property) {
        ctx.provider.set_property(&path, property)?;
    }
    Ok(())
}

/// Push every field of `handle` that differs from the replicated dictionary.
pub fn push_fields(
    ctx: &mut SyncContext<'_>,
    object: ObjectId,
    handle: EngineHandle,
) -> Result<(), SyncError> {
    let names: Vec<String> = ctx
        .engine
        .fields(handle)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    for name in names {
        push_field(ctx, object, handle, &name)?;
    }
    Ok(())
}

/// Restore one engine field from the replicated value, or to its class default when
/// the replicated dictionary has no entry.
pub fn revert_field(ctx: &mut SyncContext<'_>, object: ObjectId, handle: EngineHandle, name: &str) {
    match ctx.tree().resolve(&field_path(object, name)).cloned() {
        Some(property) => {
            apply_field(ctx, handle, name, &property);
        }
        None => {
            ctx.without_observer(|ctx| ctx.engine.reset_field(handle, name));
        }
    }
}

/// Patch every field that references `target` now that it has an engine handle.
pub fn resolve_references_to(ctx: &mut SyncContext<'_>, target: ObjectId) {
    let Some(target_handle) = ctx.map.handle_for(target) else {
        return;
    };
    for path in ctx.tree().references_to(target) {
        if path.depth() != 2 || path.key_at(0) != Some(FIELDS) {
            continue;
        }
        let (Some(referrer), Some(name)) = (path.container, path.key_at(1)) else {
            continue;
        };
        let Some(handle) = ctx.map.handle_for(referrer) else {
            continue;
        };
        let name = name.to_string();
        ctx.without_observer(|ctx| {
            ctx.engine
                .set_field(handle, &name, FieldValue::Object(Some(target_handle)))
        });
    }
}
