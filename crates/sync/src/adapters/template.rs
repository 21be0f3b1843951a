//! Template assets and their construction hierarchies.
//!
//! A template replicates as a root [`ObjectKind::Template`] object whose children are a
//! flat list of [`ObjectKind::SubTemplate`] objects. The hierarchy is carried by each
//! node's `parent` reference, which may point into another template. A node whose
//! parent is not instantiated yet waits and is re-attached when the parent appears or
//! is deleted.

use super::{CLASS, NAME};
use crate::dispatcher::{Adapter, Claim};
use crate::notices::Notice;
use crate::properties::{self, FIELDS};
use crate::{SyncContext, SyncError};
use scenesync_core::{
    Dictionary, EngineHandle, EngineKind, HostEvent, ObjectId, ObjectKind, Property, PropertyPath,
    TemplateMeta,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

const CATEGORY: &str = "category";
const TOOLTIP: &str = "tooltip";
const DISPLAY_NAME: &str = "display_name";
const PARENT: &str = "parent";

/// Adapter for [`ObjectKind::Template`] and [`ObjectKind::SubTemplate`] objects.
#[derive(Debug, Default)]
pub struct TemplateAdapter {
    dirty: BTreeSet<EngineHandle>,
    waiting: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
}

impl TemplateAdapter {
    /// New adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Children waiting for `parent` to be instantiated.
    pub fn waiting_on(&self, parent: ObjectId) -> usize {
        self.waiting.get(&parent).map_or(0, BTreeSet::len)
    }

    fn node_dictionary(ctx: &SyncContext<'_>, node: EngineHandle) -> Dictionary {
        let meta = ctx.engine.template_meta(node);
        let parent = ctx
            .engine
            .template_node_parent(node)
            .and_then(|parent| ctx.map.object_for(parent))
            .unwrap_or(ObjectId::NONE);
        Dictionary::new()
            .with(NAME, Property::text(ctx.engine.name(node).unwrap_or_default()))
            .with(CLASS, Property::text(ctx.engine.class_name(node).unwrap_or_default()))
            .with(CATEGORY, Property::text(meta.category))
            .with(TOOLTIP, Property::text(meta.tooltip))
            .with(DISPLAY_NAME, Property::text(meta.display_name))
            .with(PARENT, Property::Reference(parent))
            .with(FIELDS, properties::fields_dict(ctx, node))
    }

    /// Build objects for template nodes not mapped yet; parents are filled in once all
    /// of them have ids.
    fn build_nodes(ctx: &mut SyncContext<'_>, nodes: &[EngineHandle]) -> Vec<ObjectId> {
        let mut built = Vec::new();
        for node in nodes {
            if ctx.map.object_for(*node).is_some() {
                continue;
            }
            let object = ctx.provider.new_object(ObjectKind::SubTemplate, Property::dict());
            ctx.map.insert(object, *node);
            built.push(object);
        }
        for object in &built {
            let Some(node) = ctx.map.handle_for(*object) else {
                continue;
            };
            let dict = Self::node_dictionary(ctx, node);
            let path = PropertyPath::root(*object);
            if let Err(err) = ctx.provider.set_property(&path, Property::Dict(dict)) {
                warn!("Failed to fill template node {object}: {err}");
            }
        }
        built
    }

    fn template_of(ctx: &SyncContext<'_>, object: ObjectId) -> Option<EngineHandle> {
        let template = match ctx.tree().kind(object)? {
            ObjectKind::Template => object,
            _ => ctx.tree().parent(object)?,
        };
        ctx.map.handle_for(template)
    }

    /// Push local changes of one template.
    fn sync_template(
        &mut self,
        ctx: &mut SyncContext<'_>,
        template: EngineHandle,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        if ctx.lock_level(object).blocks_property_edits() {
            debug!("Reverting edits on locked template {object}");
            self.revert_template(ctx, template, object);
            return Ok(());
        }

        let nodes = ctx.engine.template_nodes(template);
        let current: BTreeSet<EngineHandle> = nodes.iter().copied().collect();
        let children = ctx.tree().children(object).to_vec();
        for child in children {
            let gone = ctx
                .map
                .handle_for(child)
                .map_or(false, |handle| !current.contains(&handle));
            if gone && ctx.is_live(child) {
                ctx.map.remove_object(child);
                ctx.provider.delete_object(child);
            }
        }

        let built = Self::build_nodes(ctx, &nodes);
        if !built.is_empty() {
            let index = ctx.tree().children(object).len();
            ctx.provider.create_objects(&built, Some(object), index)?;
        }

        for node in nodes {
            let Some(child) = ctx.map.object_for(node) else {
                continue;
            };
            if built.contains(&child) || !ctx.is_live(child) {
                continue;
            }
            let fresh = Self::node_dictionary(ctx, node);
            for (key, value) in fresh.iter() {
                if key == FIELDS {
                    continue;
                }
                let path = PropertyPath::root(child).key(key);
                if ctx.tree().resolve(&path) != Some(value) {
                    ctx.provider.set_property(&path, value.clone())?;
                }
            }
            properties::push_fields(ctx, child, node)?;
        }
        Ok(())
    }

    fn revert_template(
        &mut self,
        ctx: &mut SyncContext<'_>,
        template: EngineHandle,
        object: ObjectId,
    ) {
        for node in ctx.engine.template_nodes(template) {
            if ctx.map.object_for(node).is_none() {
                ctx.without_observer(|ctx| ctx.engine.destroy(node));
            }
        }
        let children = ctx.tree().children(object).to_vec();
        for child in children {
            match ctx.map.handle_for(child) {
                Some(node) if ctx.engine.is_alive(node) => self.apply_node(ctx, child, node),
                Some(_) => {
                    ctx.map.remove_object(child);
                    ctx.cascade(child);
                }
                None => ctx.cascade(child),
            }
        }
    }

    /// Write every replicated value of a template node into the engine.
    fn apply_node(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId, node: EngineHandle) {
        let dict = ctx
            .tree()
            .property(object)
            .and_then(Property::as_dict)
            .cloned()
            .unwrap_or_default();
        let meta = TemplateMeta {
            category: dict.text(CATEGORY).unwrap_or_default().to_string(),
            tooltip: dict.text(TOOLTIP).unwrap_or_default().to_string(),
            display_name: dict.text(DISPLAY_NAME).unwrap_or_default().to_string(),
        };
        ctx.without_observer(|ctx| {
            if let Some(name) = dict.text(NAME) {
                if ctx.engine.name(node).as_deref() != Some(name) {
                    ctx.engine.rename(node, name);
                }
            }
            ctx.engine.set_template_meta(node, &meta);
        });
        if let Some(fields) = dict.get(FIELDS).and_then(Property::as_dict) {
            properties::apply_fields(ctx, node, fields);
        }
        self.apply_parent(ctx, object, node);
    }

    fn apply_parent(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId, node: EngineHandle) {
        for waiting in self.waiting.values_mut() {
            waiting.remove(&object);
        }
        let parent = ctx
            .tree()
            .resolve(&PropertyPath::root(object).key(PARENT))
            .and_then(Property::as_reference)
            .unwrap_or(ObjectId::NONE);
        let target = if parent.is_none() {
            None
        } else if let Some(handle) = ctx.map.handle_for(parent) {
            Some(handle)
        } else if ctx.is_live(parent) {
            debug!("{object} waits for parent {parent}");
            self.waiting.entry(parent).or_default().insert(object);
            None
        } else {
            debug!("Parent {parent} of {object} is gone; attaching at the root");
            None
        };
        ctx.without_observer(|ctx| ctx.engine.set_template_node_parent(node, target));
    }

    /// Retry children that waited on `parent`.
    fn release_waiting(&mut self, ctx: &mut SyncContext<'_>, parent: ObjectId) {
        let Some(children) = self.waiting.remove(&parent) else {
            return;
        };
        for child in children {
            if let Some(node) = ctx.map.handle_for(child) {
                self.apply_parent(ctx, child, node);
            }
        }
    }

    fn meta_with(
        ctx: &SyncContext<'_>,
        node: EngineHandle,
        key: &str,
        value: &str,
    ) -> TemplateMeta {
        let mut meta = ctx.engine.template_meta(node);
        match key {
            CATEGORY => meta.category = value.to_string(),
            TOOLTIP => meta.tooltip = value.to_string(),
            _ => meta.display_name = value.to_string(),
        }
        meta
    }

    fn on_template_create(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        if ctx.tree().parent(object).is_some() {
            return Err(SyncError::protocol(object, "template is not a root"));
        }
        if !ctx.map.contains_object(object) {
            let name = ctx
                .tree()
                .property(object)
                .and_then(Property::as_dict)
                .and_then(|dict| dict.text(NAME))
                .unwrap_or_default()
                .to_string();
            let existing = ctx
                .engine
                .find_template(&name)
                .filter(|template| ctx.map.object_for(*template).is_none());
            let template = match existing {
                Some(template) => template,
                None => ctx.without_observer(|ctx| ctx.engine.create_template(&name)),
            };
            ctx.map.insert(object, template);
        }
        ctx.cascade_children(object);
        Ok(())
    }

    fn on_node_create(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        let Some(parent) = ctx.tree().parent(object) else {
            return Err(SyncError::protocol(object, "template node without a template"));
        };
        if ctx.tree().kind(parent) != Some(ObjectKind::Template) {
            return Err(SyncError::protocol(object, "template node outside a template"));
        }
        let Some(template) = ctx.map.handle_for(parent) else {
            debug!("Template {parent} of {object} is not instantiated yet");
            return Ok(());
        };
        if let Some(node) = ctx.map.handle_for(object) {
            self.apply_node(ctx, object, node);
            return Ok(());
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
        let existing = ctx.engine.find_template_node(template, &name).filter(|node| {
            ctx.map.object_for(*node).is_none()
                && ctx.engine.class_name(*node).as_deref() == Some(class.as_str())
        });
        let node = match existing {
            Some(node) => node,
            None => {
                let added = ctx.without_observer(|ctx| {
                    ctx.engine.add_template_node(template, &class, &name)
                });
                match added {
                    Ok(node) => node,
                    Err(err) => {
                        debug!("{err}");
                        ctx.raise(Notice::MissingClass { class: class.clone() });
                        return Err(SyncError::Resolution { class });
                    }
                }
            }
        };
        ctx.map.insert(object, node);
        self.apply_node(ctx, object, node);
        properties::resolve_references_to(ctx, object);
        self.release_waiting(ctx, object);
        Ok(())
    }
}

impl Adapter for TemplateAdapter {
    fn name(&self) -> &'static str {
        "template"
    }

    fn clean_up(&mut self, _ctx: &mut SyncContext<'_>) {
        self.dirty.clear();
        self.waiting.clear();
    }

    fn create(&mut self, ctx: &mut SyncContext<'_>, handle: EngineHandle) -> Claim {
        if ctx.engine.kind(handle) != Some(EngineKind::Template) {
            return Claim::Declined;
        }
        if let Some(object) = ctx.map.object_for(handle) {
            return Claim::Handled(Some(object));
        }
        let name = ctx.engine.name(handle).unwrap_or_default();
        let dict = Dictionary::new().with(NAME, Property::text(name));
        let object = ctx.provider.new_object(ObjectKind::Template, Property::Dict(dict));
        ctx.map.insert(object, handle);
        let nodes = ctx.engine.template_nodes(handle);
        let built = Self::build_nodes(ctx, &nodes);
        for child in &built {
            if let Err(err) = ctx.provider.add_child(object, *child, None) {
                warn!("Failed to attach template node {child}: {err}");
            }
        }
        let index = ctx.tree().roots().len();
        if let Err(err) = ctx.provider.create_objects(&[object], None, index) {
            warn!("Failed to create template {handle}: {err}");
            for member in ctx.tree().self_and_descendants(object) {
                ctx.map.remove_object(member);
            }
            ctx.provider.discard_object(object);
            return Claim::Handled(None);
        }
        debug!("Created template {object} with {} nodes", built.len());
        Claim::Handled(Some(object))
    }

    fn on_host_event(&mut self, ctx: &mut SyncContext<'_>, event: &HostEvent) {
        match event {
            HostEvent::TemplateChanged(template) => {
                if ctx.map.object_for(*template).is_some() {
                    self.dirty.insert(*template);
                }
            }
            HostEvent::PropertyChanged { object, .. } => {
                let template = ctx
                    .map
                    .object_for(*object)
                    .filter(|mapped| ctx.tree().kind(*mapped) == Some(ObjectKind::SubTemplate))
                    .and_then(|mapped| Self::template_of(ctx, mapped));
                if let Some(template) = template {
                    self.dirty.insert(template);
                }
            }
            _ => {}
        }
    }

    fn tick(&mut self, ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut remaining = dirty.into_iter();
        while let Some(template) = remaining.next() {
            if ctx.budget.exceeded() {
                self.dirty.insert(template);
                self.dirty.extend(remaining);
                break;
            }
            let Some(object) = ctx.map.object_for(template) else {
                continue;
            };
            if ctx.is_live(object) && ctx.engine.is_alive(template) {
                self.sync_template(ctx, template, object)?;
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
        match ctx.tree().kind(object) {
            Some(ObjectKind::Template) => self.on_template_create(ctx, object),
            _ => self.on_node_create(ctx, object),
        }
    }

    fn on_delete(&mut self, ctx: &mut SyncContext<'_>, object: ObjectId) -> Result<(), SyncError> {
        let members = ctx.tree().self_and_descendants(object);
        for member in members.into_iter().rev() {
            if let Some(handle) = ctx.map.remove_object(member) {
                self.dirty.remove(&handle);
                if ctx.engine.is_alive(handle) {
                    ctx.without_observer(|ctx| ctx.engine.destroy(handle));
                }
            }
            // Children waiting on a deleted parent attach at the root.
            self.release_waiting(ctx, member);
        }
        Ok(())
    }

    fn on_confirm_delete(
        &mut self,
        ctx: &mut SyncContext<'_>,
        object: ObjectId,
    ) -> Result<(), SyncError> {
        for member in ctx.tree().self_and_descendants(object) {
            ctx.map.remove_object(member);
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
        let value = ctx.tree().resolve(path).cloned();
        match (path.first_key(), path.depth()) {
            (Some(NAME), 1) => {
                if let Some(name) = value.as_ref().and_then(Property::as_text) {
                    let name = name.to_string();
                    ctx.without_observer(|ctx| ctx.engine.rename(handle, &name));
                }
            }
            (Some(key @ (CATEGORY | TOOLTIP | DISPLAY_NAME)), 1) => {
                let text = value.as_ref().and_then(Property::as_text).unwrap_or_default();
                let meta = Self::meta_with(ctx, handle, key, text);
                ctx.without_observer(|ctx| ctx.engine.set_template_meta(handle, &meta));
            }
            (Some(PARENT), 1) => self.apply_parent(ctx, object, handle),
            (Some(FIELDS), 1) => {
                if let Some(fields) = value.as_ref().and_then(Property::as_dict) {
                    properties::apply_fields(ctx, handle, fields);
                }
            }
            (Some(FIELDS), 2) => {
                if let (Some(name), Some(value)) = (path.key_at(1), value.as_ref()) {
                    properties::apply_field(ctx, handle, name, value);
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
