//! In-memory host engine.
//!
//! Objects live in a handle-keyed arena. Every mutation raises the [`HostEvent`] a real
//! editor would raise, unless change notifications are switched off. The `user_*`
//! methods play the person sitting at the editor.

use glam::Vec3;
use scenesync_core::{
    EngineHandle, EngineKind, FieldTable, FieldTables, FieldValue, HostEvent, HostInstances,
    HostNodes, HostScene, HostSubObjects, HostTemplates, InstanceRecord, LockIndicator,
    NodeTraits, ParticipantId, SpawnError, TemplateMeta,
};
use std::collections::{BTreeMap, BTreeSet};

/// Class given to placeholders for unavailable classes.
pub const STAND_IN_CLASS: &str = "StandIn";
const LOCK_MARKER_CLASS: &str = "LockMarker";
const CONTAINER_CLASS: &str = "Level";
const TEMPLATE_CLASS: &str = "Template";

/// Field storage shared by every mock class; each class exposes a subset through its
/// [`FieldTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Props {
    /// Light intensity.
    pub intensity: f64,
    /// Colour tint.
    pub tint: Vec3,
    /// Enabled flag.
    pub enabled: bool,
    /// Free text.
    pub note: String,
    /// Reference to another engine object.
    pub target: Option<EngineHandle>,
    /// Integer setting.
    pub count: i64,
}

impl Default for Props {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            tint: Vec3::ONE,
            enabled: true,
            note: String::new(),
            target: None,
            count: 0,
        }
    }
}

fn intensity(table: FieldTable<Props>) -> FieldTable<Props> {
    table.field(
        "intensity",
        |p| FieldValue::Float(p.intensity),
        |p, value| match value {
            FieldValue::Float(v) => {
                p.intensity = v;
                true
            }
            _ => false,
        },
        FieldValue::Float(1.0),
    )
}

fn tint(table: FieldTable<Props>) -> FieldTable<Props> {
    table.field(
        "tint",
        |p| FieldValue::Vec3(p.tint),
        |p, value| match value {
            FieldValue::Vec3(v) => {
                p.tint = v;
                true
            }
            _ => false,
        },
        FieldValue::Vec3(Vec3::ONE),
    )
}

fn enabled(table: FieldTable<Props>) -> FieldTable<Props> {
    table.field(
        "enabled",
        |p| FieldValue::Bool(p.enabled),
        |p, value| match value {
            FieldValue::Bool(v) => {
                p.enabled = v;
                true
            }
            _ => false,
        },
        FieldValue::Bool(true),
    )
}

fn note(table: FieldTable<Props>) -> FieldTable<Props> {
    table.field(
        "note",
        |p| FieldValue::Text(p.note.clone()),
        |p, value| match value {
            FieldValue::Text(v) => {
                p.note = v;
                true
            }
            _ => false,
        },
        FieldValue::Text(String::new()),
    )
}

fn target(table: FieldTable<Props>) -> FieldTable<Props> {
    table.field(
        "target",
        |p| FieldValue::Object(p.target),
        |p, value| match value {
            FieldValue::Object(v) => {
                p.target = v;
                true
            }
            _ => false,
        },
        FieldValue::Object(None),
    )
}

fn count(table: FieldTable<Props>) -> FieldTable<Props> {
    table.field(
        "count",
        |p| FieldValue::Int(p.count),
        |p, value| match value {
            FieldValue::Int(v) => {
                p.count = v;
                true
            }
            _ => false,
        },
        FieldValue::Int(0),
    )
}

/// Classes every [`MockEngine`] starts with.
///
/// Nodes: `Prop`, `Light`, `Rock`, `InstanceContainer`. Sub-objects: `SceneComponent`,
/// `LightComponent`, `MeshComponent`. Free-standing: `Settings`.
pub fn standard_classes() -> FieldTables<Props> {
    let mut tables = FieldTables::new();
    tables.register(target(note(tint(FieldTable::new("Prop")))));
    tables.register(enabled(tint(intensity(FieldTable::new("Light")))));
    tables.register(tint(FieldTable::new("Rock")));
    tables.register(FieldTable::new("InstanceContainer"));
    tables.register(FieldTable::new("SceneComponent"));
    tables.register(enabled(intensity(FieldTable::new("LightComponent"))));
    tables.register(target(tint(FieldTable::new("MeshComponent"))));
    tables.register(note(enabled(count(FieldTable::new("Settings")))));
    tables
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Alive,
    PendingDestroy,
    Destroyed,
}

#[derive(Debug, Clone)]
struct EngineObject {
    kind: EngineKind,
    class: String,
    name: String,
    /// Container of a node, node of a sub-object, template of a template node.
    owner: Option<EngineHandle>,
    /// Attach parent of a node, parent sub-object, parent template node.
    parent: Option<EngineHandle>,
    props: Props,
    state: Liveness,
    traits: NodeTraits,
    selected: bool,
    label: String,
    folder: String,
    layers: Vec<String>,
    indicator: LockIndicator,
    lock_marker: bool,
    meta: TemplateMeta,
    instances: BTreeMap<String, Vec<InstanceRecord>>,
}

impl EngineObject {
    fn new(kind: EngineKind, class: &str, name: &str, owner: Option<EngineHandle>) -> Self {
        Self {
            kind,
            class: class.to_string(),
            name: name.to_string(),
            owner,
            parent: None,
            props: Props::default(),
            state: Liveness::Alive,
            traits: NodeTraits::default(),
            selected: false,
            label: name.to_string(),
            folder: String::new(),
            layers: Vec::new(),
            indicator: LockIndicator::None,
            lock_marker: false,
            meta: TemplateMeta::default(),
            instances: BTreeMap::new(),
        }
    }

    fn exists(&self) -> bool {
        self.state != Liveness::Destroyed
    }

    fn alive(&self) -> bool {
        self.state == Liveness::Alive
    }
}

/// Host engine double implementing every host trait.
pub struct MockEngine {
    objects: BTreeMap<EngineHandle, EngineObject>,
    next: u64,
    classes: FieldTables<Props>,
    unavailable: BTreeSet<String>,
    active: Option<EngineHandle>,
    notifications: bool,
    outbox: Vec<HostEvent>,
    suppressed: usize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Engine with the standard classes and an active container named `Level`.
    pub fn new() -> Self {
        Self::with_classes(standard_classes())
    }

    /// Engine with custom classes and an active container named `Level`.
    pub fn with_classes(classes: FieldTables<Props>) -> Self {
        let mut engine = Self {
            objects: BTreeMap::new(),
            next: 1,
            classes,
            unavailable: BTreeSet::new(),
            active: None,
            notifications: true,
            outbox: Vec::new(),
            suppressed: 0,
        };
        let level = engine.add_container(CONTAINER_CLASS);
        engine.active = Some(level);
        engine
    }

    fn alloc(&mut self, object: EngineObject) -> EngineHandle {
        let handle = EngineHandle(self.next);
        self.next += 1;
        self.objects.insert(handle, object);
        handle
    }

    fn emit(&mut self, event: HostEvent) {
        if self.notifications {
            self.outbox.push(event);
        } else {
            self.suppressed += 1;
        }
    }

    fn existing(&self, handle: EngineHandle) -> Option<&EngineObject> {
        self.objects.get(&handle).filter(|object| object.exists())
    }

    fn alive(&self, handle: EngineHandle) -> Option<&EngineObject> {
        self.objects.get(&handle).filter(|object| object.alive())
    }

    fn alive_mut(&mut self, handle: EngineHandle) -> Option<&mut EngineObject> {
        self.objects.get_mut(&handle).filter(|object| object.alive())
    }

    fn select(&self, filter: impl Fn(&EngineObject) -> bool) -> Vec<EngineHandle> {
        self.objects
            .iter()
            .filter(|(_, object)| filter(object))
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn name_taken(
        &self,
        kind: EngineKind,
        owner: Option<EngineHandle>,
        name: &str,
        except: Option<EngineHandle>,
    ) -> bool {
        self.objects.iter().any(|(handle, object)| {
            object.exists()
                && object.kind == kind
                && object.owner == owner
                && object.name == name
                && Some(*handle) != except
        })
    }

    fn unique_name(&self, kind: EngineKind, owner: Option<EngineHandle>, name: &str) -> String {
        if !self.name_taken(kind, owner, name, None) {
            return name.to_string();
        }
        (1..)
            .map(|n| format!("{name}_{n}"))
            .find(|candidate| !self.name_taken(kind, owner, candidate, None))
            .unwrap_or_else(|| name.to_string())
    }

    fn spawn(
        &mut self,
        kind: EngineKind,
        class: &str,
        name: &str,
        owner: Option<EngineHandle>,
    ) -> EngineHandle {
        let name = self.unique_name(kind, owner, name);
        self.alloc(EngineObject::new(kind, class, &name, owner))
    }

    fn check_class(&self, class: &str) -> Result<(), SpawnError> {
        if self.class_available(class) {
            Ok(())
        } else {
            Err(SpawnError::ClassNotFound(class.to_string()))
        }
    }

    fn changed(&mut self, handle: EngineHandle) {
        let Some(object) = self.objects.get(&handle) else {
            return;
        };
        let (kind, owner) = (object.kind, object.owner);
        let owner_alive = owner.is_some_and(|owner| self.alive(owner).is_some());
        match kind {
            EngineKind::SubObject if owner_alive => {
                self.emit(HostEvent::SubObjectsChanged(owner.unwrap_or(handle)))
            }
            EngineKind::TemplateNode if owner_alive => {
                self.emit(HostEvent::TemplateChanged(owner.unwrap_or(handle)))
            }
            EngineKind::Template => self.emit(HostEvent::TemplateChanged(handle)),
            _ => {}
        }
    }

    fn detach_nodes_from(&mut self, sub_object: EngineHandle) {
        let attached = self.select(|o| {
            o.exists() && o.kind == EngineKind::Node && o.parent == Some(sub_object)
        });
        for node in attached {
            if let Some(object) = self.objects.get_mut(&node) {
                object.parent = None;
            }
            self.emit(HostEvent::NodeDetached(node));
        }
    }

    fn destroy_tree(&mut self, handle: EngineHandle) {
        let Some(object) = self.existing(handle) else {
            return;
        };
        let kind = object.kind;
        let dependents = self.select(|o| {
            o.exists()
                && match kind {
                    EngineKind::Container => {
                        o.kind == EngineKind::Node && o.owner == Some(handle)
                    }
                    EngineKind::Node => o.kind == EngineKind::SubObject && o.owner == Some(handle),
                    EngineKind::SubObject => {
                        o.kind == EngineKind::SubObject && o.parent == Some(handle)
                    }
                    EngineKind::Template => {
                        o.kind == EngineKind::TemplateNode && o.owner == Some(handle)
                    }
                    _ => false,
                }
        });
        if let Some(object) = self.objects.get_mut(&handle) {
            object.state = Liveness::Destroyed;
            object.selected = false;
        }
        for dependent in dependents {
            self.destroy_tree(dependent);
        }
        match kind {
            EngineKind::Node => self.emit(HostEvent::NodeRemoved(handle)),
            EngineKind::SubObject => {
                self.detach_nodes_from(handle);
                self.changed(handle);
            }
            _ => self.changed(handle),
        }
    }

    /// Drain the notifications raised since the last call.
    pub fn take_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Mutations made while notifications were switched off.
    pub fn suppressed_events(&self) -> usize {
        self.suppressed
    }

    /// Add a scene container.
    pub fn add_container(&mut self, name: &str) -> EngineHandle {
        self.alloc(EngineObject::new(EngineKind::Container, CONTAINER_CLASS, name, None))
    }

    /// Switch the container being edited.
    pub fn set_active_container(&mut self, container: Option<EngineHandle>) {
        self.active = container;
    }

    /// Register (or replace) a class.
    pub fn register_class(&mut self, table: FieldTable<Props>) {
        self.unavailable.remove(table.class());
        self.classes.register(table);
    }

    /// Make a registered class unloadable, or loadable again.
    pub fn set_class_available(&mut self, class: &str, available: bool) {
        if available {
            self.unavailable.remove(class);
        } else {
            self.unavailable.insert(class.to_string());
        }
    }

    /// Override a node's syncability traits.
    pub fn set_node_traits(&mut self, node: EngineHandle, traits: NodeTraits) {
        if let Some(object) = self.objects.get_mut(&node) {
            object.traits = traits;
        }
    }

    /// Field storage of an object.
    pub fn props(&self, handle: EngineHandle) -> Option<&Props> {
        self.existing(handle).map(|object| &object.props)
    }

    /// Lock indicator currently shown on a node.
    pub fn lock_indicator(&self, node: EngineHandle) -> LockIndicator {
        self.existing(node)
            .map(|object| object.indicator)
            .unwrap_or_default()
    }

    /// Lock markers attached to a node.
    pub fn lock_marker_count(&self, node: EngineHandle) -> usize {
        self.select(|o| o.alive() && o.lock_marker && o.owner == Some(node))
            .len()
    }

    /// Live node named `name` in the active container.
    pub fn node_named(&self, name: &str) -> Option<EngineHandle> {
        let container = self.active?;
        self.select(|o| {
            o.alive() && o.kind == EngineKind::Node && o.owner == Some(container) && o.name == name
        })
        .first()
        .copied()
    }

    /// Names of the live nodes in the active container, sorted.
    pub fn node_names(&self) -> Vec<String> {
        let Some(container) = self.active else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .nodes(container)
            .into_iter()
            .filter_map(|node| self.name(node))
            .collect();
        names.sort();
        names
    }

    /// User spawns a node in the active container.
    pub fn user_spawn_node(&mut self, class: &str, name: &str) -> Result<EngineHandle, SpawnError> {
        let container = self.active.ok_or(SpawnError::OwnerGone(EngineHandle(0)))?;
        self.spawn_node(container, class, name)
    }

    /// User deletes a node; it stays recoverable through undo.
    pub fn user_delete_node(&mut self, node: EngineHandle) {
        let Some(object) = self.alive_mut(node) else {
            return;
        };
        object.state = Liveness::PendingDestroy;
        object.selected = false;
        self.emit(HostEvent::NodeRemoved(node));
        let subs = self.select(|o| o.exists() && o.owner == Some(node));
        for sub in subs {
            self.detach_nodes_from(sub);
        }
    }

    /// User undoes the deletion of a node.
    pub fn user_undo_delete(&mut self, node: EngineHandle) {
        if let Some(object) = self.objects.get_mut(&node) {
            if object.state == Liveness::PendingDestroy {
                object.state = Liveness::Alive;
                self.emit(HostEvent::UndoRedo(vec![node]));
            }
        }
    }

    /// User renames an object.
    pub fn user_rename(&mut self, handle: EngineHandle, name: &str) -> bool {
        self.rename(handle, name)
    }

    /// User moves a node to another outliner folder.
    pub fn user_set_folder(&mut self, node: EngineHandle, folder: &str) {
        self.set_folder(node, folder);
    }

    /// User moves a node to other editor layers.
    pub fn user_set_layers(&mut self, node: EngineHandle, layers: &[&str]) {
        let layers: Vec<String> = layers.iter().map(|layer| layer.to_string()).collect();
        self.set_layers(node, &layers);
    }

    /// User edits a node label.
    pub fn user_set_label(&mut self, node: EngineHandle, label: &str) {
        self.set_label(node, label);
    }

    /// User attaches a node under a sub-object, or detaches it.
    pub fn user_attach(&mut self, node: EngineHandle, parent: Option<EngineHandle>) {
        self.attach_to(node, parent);
    }

    /// User edits a field.
    pub fn user_set_field(&mut self, handle: EngineHandle, name: &str, value: FieldValue) -> bool {
        self.set_field(handle, name, value)
    }

    /// User adds a sub-object to a node.
    pub fn user_add_sub_object(
        &mut self,
        node: EngineHandle,
        class: &str,
        name: &str,
        parent: Option<EngineHandle>,
    ) -> Result<EngineHandle, SpawnError> {
        let handle = self.spawn_sub_object(node, class, name)?;
        if parent.is_some() {
            self.set_sub_object_parent(handle, parent);
        }
        Ok(handle)
    }

    /// User removes a sub-object (and its children).
    pub fn user_remove_sub_object(&mut self, sub_object: EngineHandle) {
        self.destroy_tree(sub_object);
    }

    /// User reparents a sub-object.
    pub fn user_reparent_sub_object(
        &mut self,
        sub_object: EngineHandle,
        parent: Option<EngineHandle>,
    ) {
        self.set_sub_object_parent(sub_object, parent);
    }

    /// User selects a node.
    pub fn user_select(&mut self, node: EngineHandle) {
        if let Some(object) = self.alive_mut(node) {
            object.selected = true;
            self.emit(HostEvent::SelectionChanged {
                selected: vec![node],
                deselected: Vec::new(),
            });
        }
    }

    /// User deselects a node.
    pub fn user_deselect(&mut self, node: EngineHandle) {
        if let Some(object) = self.alive_mut(node) {
            object.selected = false;
            self.emit(HostEvent::SelectionChanged {
                selected: Vec::new(),
                deselected: vec![node],
            });
        }
    }

    /// User paints instances.
    pub fn user_add_instances(
        &mut self,
        node: EngineHandle,
        instance_type: &str,
        records: &[InstanceRecord],
    ) {
        if !self.instance_types(node).iter().any(|t| t == instance_type) {
            self.add_instance_type(node, instance_type);
        }
        self.add_instances(node, instance_type, records);
    }

    /// User erases instances.
    pub fn user_remove_instances(
        &mut self,
        node: EngineHandle,
        instance_type: &str,
        indices: &[usize],
    ) {
        self.remove_instances(node, instance_type, indices);
    }

    /// User creates a free-standing object.
    pub fn user_spawn_object(
        &mut self,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError> {
        self.spawn_object(class, name)
    }

    /// User creates a template.
    pub fn user_create_template(&mut self, name: &str) -> EngineHandle {
        self.create_template(name)
    }

    /// User adds a node to a template.
    pub fn user_add_template_node(
        &mut self,
        template: EngineHandle,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError> {
        self.add_template_node(template, class, name)
    }

    /// User edits template node metadata.
    pub fn user_set_template_meta(&mut self, node: EngineHandle, meta: &TemplateMeta) {
        self.set_template_meta(node, meta);
    }
}

impl HostScene for MockEngine {
    fn set_change_notifications(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.notifications, enabled)
    }

    fn is_alive(&self, handle: EngineHandle) -> bool {
        self.alive(handle).is_some()
    }

    fn is_pending_destroy(&self, handle: EngineHandle) -> bool {
        self.objects
            .get(&handle)
            .is_some_and(|object| object.state == Liveness::PendingDestroy)
    }

    fn kind(&self, handle: EngineHandle) -> Option<EngineKind> {
        self.existing(handle).map(|object| object.kind)
    }

    fn class_name(&self, handle: EngineHandle) -> Option<String> {
        self.existing(handle).map(|object| object.class.clone())
    }

    fn class_available(&self, class: &str) -> bool {
        self.classes.contains(class) && !self.unavailable.contains(class)
    }

    fn name(&self, handle: EngineHandle) -> Option<String> {
        self.existing(handle).map(|object| object.name.clone())
    }

    fn rename(&mut self, handle: EngineHandle, name: &str) -> bool {
        let Some(object) = self.existing(handle) else {
            return false;
        };
        if object.name == name {
            return true;
        }
        if self.name_taken(object.kind, object.owner, name, Some(handle)) {
            return false;
        }
        let kind = object.kind;
        if let Some(object) = self.objects.get_mut(&handle) {
            object.name = name.to_string();
        }
        match kind {
            EngineKind::Node => self.emit(HostEvent::NodeRenamed(handle)),
            _ => self.changed(handle),
        }
        true
    }

    fn fields(&self, handle: EngineHandle) -> Vec<(String, FieldValue)> {
        let Some(object) = self.existing(handle) else {
            return Vec::new();
        };
        self.classes
            .get(&object.class)
            .map(|table| {
                table
                    .read_all(&object.props)
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn field(&self, handle: EngineHandle, name: &str) -> Option<FieldValue> {
        let object = self.existing(handle)?;
        self.classes.get(&object.class)?.read(&object.props, name)
    }

    fn set_field(&mut self, handle: EngineHandle, name: &str, value: FieldValue) -> bool {
        let Some(object) = self.objects.get_mut(&handle).filter(|o| o.exists()) else {
            return false;
        };
        let Some(table) = self.classes.get(&object.class) else {
            return false;
        };
        if !table.write(&mut object.props, name, value) {
            return false;
        }
        self.emit(HostEvent::PropertyChanged {
            object: handle,
            field: name.to_string(),
        });
        true
    }

    fn reset_field(&mut self, handle: EngineHandle, name: &str) -> bool {
        let Some(object) = self.objects.get_mut(&handle).filter(|o| o.exists()) else {
            return false;
        };
        let Some(table) = self.classes.get(&object.class) else {
            return false;
        };
        if !table.reset(&mut object.props, name) {
            return false;
        }
        self.emit(HostEvent::PropertyChanged {
            object: handle,
            field: name.to_string(),
        });
        true
    }

    fn destroy(&mut self, handle: EngineHandle) {
        self.destroy_tree(handle);
    }

    fn active_container(&self) -> Option<EngineHandle> {
        self.active.filter(|container| self.alive(*container).is_some())
    }

    fn find_object(&self, name: &str) -> Option<EngineHandle> {
        self.select(|o| o.alive() && o.kind == EngineKind::Other && o.name == name)
            .first()
            .copied()
    }

    fn spawn_object(&mut self, class: &str, name: &str) -> Result<EngineHandle, SpawnError> {
        self.check_class(class)?;
        Ok(self.spawn(EngineKind::Other, class, name, None))
    }
}

impl HostNodes for MockEngine {
    fn nodes(&self, container: EngineHandle) -> Vec<EngineHandle> {
        self.select(|o| o.alive() && o.kind == EngineKind::Node && o.owner == Some(container))
    }

    fn container_of(&self, node: EngineHandle) -> Option<EngineHandle> {
        self.existing(node).and_then(|object| object.owner)
    }

    fn node_traits(&self, node: EngineHandle) -> NodeTraits {
        self.existing(node)
            .map(|object| object.traits)
            .unwrap_or_else(NodeTraits::empty)
    }

    fn is_selected(&self, node: EngineHandle) -> bool {
        self.alive(node).is_some_and(|object| object.selected)
    }

    fn label(&self, node: EngineHandle) -> String {
        self.existing(node)
            .map(|object| object.label.clone())
            .unwrap_or_default()
    }

    fn set_label(&mut self, node: EngineHandle, label: &str) {
        if let Some(object) = self.alive_mut(node) {
            if object.label != label {
                object.label = label.to_string();
                self.emit(HostEvent::PropertyChanged {
                    object: node,
                    field: "label".to_string(),
                });
            }
        }
    }

    fn folder(&self, node: EngineHandle) -> String {
        self.existing(node)
            .map(|object| object.folder.clone())
            .unwrap_or_default()
    }

    fn set_folder(&mut self, node: EngineHandle, folder: &str) {
        if let Some(object) = self.alive_mut(node) {
            if object.folder != folder {
                object.folder = folder.to_string();
                self.emit(HostEvent::FolderChanged(node));
            }
        }
    }

    fn layers(&self, node: EngineHandle) -> Vec<String> {
        self.existing(node)
            .map(|object| object.layers.clone())
            .unwrap_or_default()
    }

    fn set_layers(&mut self, node: EngineHandle, layers: &[String]) {
        if let Some(object) = self.alive_mut(node) {
            if object.layers != layers {
                object.layers = layers.to_vec();
                self.emit(HostEvent::LayersChanged(node));
            }
        }
    }

    fn attach_parent(&self, node: EngineHandle) -> Option<EngineHandle> {
        self.existing(node).and_then(|object| object.parent)
    }

    fn attach_to(&mut self, node: EngineHandle, parent: Option<EngineHandle>) {
        if let Some(parent) = parent {
            if self.alive(parent).map(|o| o.kind) != Some(EngineKind::SubObject) {
                return;
            }
        }
        let Some(object) = self.alive_mut(node) else {
            return;
        };
        if object.parent == parent {
            return;
        }
        object.parent = parent;
        match parent {
            Some(parent) => self.emit(HostEvent::NodeAttached { node, parent }),
            None => self.emit(HostEvent::NodeDetached(node)),
        }
    }

    fn attached_nodes(&self, sub_object: EngineHandle) -> Vec<EngineHandle> {
        self.select(|o| o.alive() && o.kind == EngineKind::Node && o.parent == Some(sub_object))
    }

    fn find_node(&self, container: EngineHandle, name: &str) -> Option<EngineHandle> {
        self.select(|o| {
            o.exists() && o.kind == EngineKind::Node && o.owner == Some(container) && o.name == name
        })
        .first()
        .copied()
    }

    fn spawn_node(
        &mut self,
        container: EngineHandle,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError> {
        if self.alive(container).map(|o| o.kind) != Some(EngineKind::Container) {
            return Err(SpawnError::OwnerGone(container));
        }
        self.check_class(class)?;
        let node = self.spawn(EngineKind::Node, class, name, Some(container));
        self.emit(HostEvent::NodeAdded(node));
        Ok(node)
    }

    fn spawn_node_stand_in(
        &mut self,
        container: EngineHandle,
        missing_class: &str,
        name: &str,
    ) -> EngineHandle {
        let node = self.spawn(EngineKind::Node, STAND_IN_CLASS, name, Some(container));
        if let Some(object) = self.objects.get_mut(&node) {
            object.props.note = missing_class.to_string();
        }
        self.emit(HostEvent::NodeAdded(node));
        node
    }

    fn set_lock_indicator(&mut self, node: EngineHandle, indicator: LockIndicator) {
        if let Some(object) = self.objects.get_mut(&node) {
            object.indicator = indicator;
        }
    }

    fn attach_lock_marker(&mut self, node: EngineHandle, owner: ParticipantId) -> EngineHandle {
        let name = format!("LockMarker_{}", owner.0);
        let marker = self.spawn(EngineKind::SubObject, LOCK_MARKER_CLASS, &name, Some(node));
        if let Some(object) = self.objects.get_mut(&marker) {
            object.lock_marker = true;
        }
        self.changed(marker);
        marker
    }

    fn detach_lock_markers(&mut self, node: EngineHandle) {
        for marker in self.select(|o| o.exists() && o.lock_marker && o.owner == Some(node)) {
            self.destroy_tree(marker);
        }
    }
}

impl HostSubObjects for MockEngine {
    fn sub_objects(&self, node: EngineHandle) -> Vec<EngineHandle> {
        self.select(|o| o.alive() && o.kind == EngineKind::SubObject && o.owner == Some(node))
    }

    fn owner_node(&self, sub_object: EngineHandle) -> Option<EngineHandle> {
        self.existing(sub_object)
            .filter(|object| object.kind == EngineKind::SubObject)
            .and_then(|object| object.owner)
    }

    fn sub_object_parent(&self, sub_object: EngineHandle) -> Option<EngineHandle> {
        self.existing(sub_object).and_then(|object| object.parent)
    }

    fn set_sub_object_parent(&mut self, sub_object: EngineHandle, parent: Option<EngineHandle>) {
        let Some(object) = self.alive_mut(sub_object) else {
            return;
        };
        if object.parent == parent || parent == Some(sub_object) {
            return;
        }
        object.parent = parent;
        self.changed(sub_object);
    }

    fn find_sub_object(&self, node: EngineHandle, name: &str) -> Option<EngineHandle> {
        self.select(|o| {
            o.alive() && o.kind == EngineKind::SubObject && o.owner == Some(node) && o.name == name
        })
        .first()
        .copied()
    }

    fn spawn_sub_object(
        &mut self,
        node: EngineHandle,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError> {
        if self.alive(node).map(|o| o.kind) != Some(EngineKind::Node) {
            return Err(SpawnError::OwnerGone(node));
        }
        self.check_class(class)?;
        let sub_object = self.spawn(EngineKind::SubObject, class, name, Some(node));
        self.changed(sub_object);
        Ok(sub_object)
    }

    fn spawn_sub_object_stand_in(
        &mut self,
        node: EngineHandle,
        missing_class: &str,
        name: &str,
    ) -> EngineHandle {
        let sub_object = self.spawn(EngineKind::SubObject, STAND_IN_CLASS, name, Some(node));
        if let Some(object) = self.objects.get_mut(&sub_object) {
            object.props.note = missing_class.to_string();
        }
        self.changed(sub_object);
        sub_object
    }

    fn is_lock_marker(&self, sub_object: EngineHandle) -> bool {
        self.existing(sub_object)
            .is_some_and(|object| object.lock_marker)
    }
}

impl HostTemplates for MockEngine {
    fn find_template(&self, name: &str) -> Option<EngineHandle> {
        self.select(|o| o.alive() && o.kind == EngineKind::Template && o.name == name)
            .first()
            .copied()
    }

    fn create_template(&mut self, name: &str) -> EngineHandle {
        let template = self.spawn(EngineKind::Template, TEMPLATE_CLASS, name, None);
        self.changed(template);
        template
    }

    fn template_nodes(&self, template: EngineHandle) -> Vec<EngineHandle> {
        self.select(|o| {
            o.alive() && o.kind == EngineKind::TemplateNode && o.owner == Some(template)
        })
    }

    fn find_template_node(&self, template: EngineHandle, name: &str) -> Option<EngineHandle> {
        self.select(|o| {
            o.alive()
                && o.kind == EngineKind::TemplateNode
                && o.owner == Some(template)
                && o.name == name
        })
        .first()
        .copied()
    }

    fn add_template_node(
        &mut self,
        template: EngineHandle,
        class: &str,
        name: &str,
    ) -> Result<EngineHandle, SpawnError> {
        if self.alive(template).map(|o| o.kind) != Some(EngineKind::Template) {
            return Err(SpawnError::OwnerGone(template));
        }
        self.check_class(class)?;
        let node = self.spawn(EngineKind::TemplateNode, class, name, Some(template));
        self.changed(node);
        Ok(node)
    }

    fn template_node_parent(&self, node: EngineHandle) -> Option<EngineHandle> {
        self.existing(node).and_then(|object| object.parent)
    }

    fn set_template_node_parent(&mut self, node: EngineHandle, parent: Option<EngineHandle>) {
        let Some(object) = self.alive_mut(node) else {
            return;
        };
        if object.parent == parent || parent == Some(node) {
            return;
        }
        object.parent = parent;
        self.changed(node);
    }

    fn template_meta(&self, node: EngineHandle) -> TemplateMeta {
        self.existing(node)
            .map(|object| object.meta.clone())
            .unwrap_or_default()
    }

    fn set_template_meta(&mut self, node: EngineHandle, meta: &TemplateMeta) {
        let Some(object) = self.alive_mut(node) else {
            return;
        };
        if &object.meta == meta {
            return;
        }
        object.meta = meta.clone();
        self.changed(node);
    }
}

impl HostInstances for MockEngine {
    fn instance_types(&self, node: EngineHandle) -> Vec<String> {
        self.existing(node)
            .map(|object| object.instances.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn add_instance_type(&mut self, node: EngineHandle, instance_type: &str) {
        if let Some(object) = self.alive_mut(node) {
            object.instances.entry(instance_type.to_string()).or_default();
            self.emit(HostEvent::InstancesChanged(node));
        }
    }

    fn remove_instance_type(&mut self, node: EngineHandle, instance_type: &str) {
        if let Some(object) = self.alive_mut(node) {
            if object.instances.remove(instance_type).is_some() {
                self.emit(HostEvent::InstancesChanged(node));
            }
        }
    }

    fn instances(&self, node: EngineHandle, instance_type: &str) -> Vec<InstanceRecord> {
        self.existing(node)
            .and_then(|object| object.instances.get(instance_type))
            .cloned()
            .unwrap_or_default()
    }

    fn add_instances(
        &mut self,
        node: EngineHandle,
        instance_type: &str,
        records: &[InstanceRecord],
    ) {
        if records.is_empty() {
            return;
        }
        if let Some(list) = self
            .alive_mut(node)
            .and_then(|object| object.instances.get_mut(instance_type))
        {
            list.extend_from_slice(records);
            self.emit(HostEvent::InstancesChanged(node));
        }
    }

    fn remove_instances(&mut self, node: EngineHandle, instance_type: &str, indices: &[usize]) {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        let Some(list) = self
            .alive_mut(node)
            .and_then(|object| object.instances.get_mut(instance_type))
        else {
            return;
        };
        let mut removed = false;
        for index in sorted {
            if index < list.len() {
                list.swap_remove(index);
                removed = true;
            }
        }
        if removed {
            self.emit(HostEvent::InstancesChanged(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_are_gated_by_the_flag() {
        let mut engine = MockEngine::new();
        let node = engine.user_spawn_node("Prop", "crate").unwrap();
        assert_eq!(engine.take_events(), vec![HostEvent::NodeAdded(node)]);

        let previous = engine.set_change_notifications(false);
        assert!(previous);
        engine.set_field(node, "note", FieldValue::Text("quiet".into()));
        engine.set_change_notifications(previous);
        assert!(engine.take_events().is_empty());
        assert_eq!(engine.suppressed_events(), 1);
        assert_eq!(engine.props(node).unwrap().note, "quiet");
    }

    #[test]
    fn spawned_names_stay_unique_and_renames_to_taken_names_fail() {
        let mut engine = MockEngine::new();
        let a = engine.user_spawn_node("Prop", "crate").unwrap();
        let b = engine.user_spawn_node("Prop", "crate").unwrap();
        assert_eq!(engine.name(b).as_deref(), Some("crate_1"));
        assert!(!engine.rename(b, "crate"));
        assert!(engine.rename(a, "barrel"));
        assert!(engine.rename(b, "crate"));
    }

    #[test]
    fn unavailable_classes_fail_to_spawn() {
        let mut engine = MockEngine::new();
        engine.set_class_available("Rock", false);
        assert_eq!(
            engine.user_spawn_node("Rock", "r"),
            Err(SpawnError::ClassNotFound("Rock".into()))
        );
        let container = engine.active_container().unwrap();
        let stand_in = engine.spawn_node_stand_in(container, "Rock", "r");
        assert_eq!(engine.class_name(stand_in).as_deref(), Some(STAND_IN_CLASS));
        assert!(engine.fields(stand_in).is_empty());
        engine.set_class_available("Rock", true);
        assert!(engine.class_available("Rock"));
    }

    #[test]
    fn destroying_a_node_takes_sub_objects_and_detaches_children() {
        let mut engine = MockEngine::new();
        let parent = engine.user_spawn_node("Prop", "parent").unwrap();
        let root = engine.user_add_sub_object(parent, "SceneComponent", "root", None).unwrap();
        let leaf = engine
            .user_add_sub_object(parent, "MeshComponent", "leaf", Some(root))
            .unwrap();
        let child = engine.user_spawn_node("Prop", "child").unwrap();
        engine.user_attach(child, Some(leaf));
        engine.take_events();

        engine.destroy(parent);
        assert!(!engine.is_alive(root));
        assert!(!engine.is_alive(leaf));
        assert_eq!(engine.attach_parent(child), None);
        let events = engine.take_events();
        assert!(events.contains(&HostEvent::NodeRemoved(parent)));
        assert!(events.contains(&HostEvent::NodeDetached(child)));
    }

    #[test]
    fn deleted_nodes_come_back_through_undo() {
        let mut engine = MockEngine::new();
        let node = engine.user_spawn_node("Light", "lamp").unwrap();
        engine.user_delete_node(node);
        assert!(engine.is_pending_destroy(node));
        assert!(!engine.is_alive(node));
        assert_eq!(engine.find_node(engine.active_container().unwrap(), "lamp"), Some(node));
        engine.take_events();
        engine.user_undo_delete(node);
        assert!(engine.is_alive(node));
        assert_eq!(engine.take_events(), vec![HostEvent::UndoRedo(vec![node])]);
    }

    #[test]
    fn instance_removal_swaps_from_the_back_highest_first() {
        let mut engine = MockEngine::new();
        let node = engine.user_spawn_node("InstanceContainer", "foliage").unwrap();
        let records: Vec<InstanceRecord> = (0..5)
            .map(|i| InstanceRecord::at(Vec3::new(i as f32, 0.0, 0.0)))
            .collect();
        engine.user_add_instances(node, "grass", &records);
        engine.user_remove_instances(node, "grass", &[1, 3]);
        let xs: Vec<f32> = engine
            .instances(node, "grass")
            .iter()
            .map(|r| r.position.x)
            .collect();
        assert_eq!(xs, vec![0.0, 4.0, 2.0]);
    }

    #[test]
    fn lock_markers_are_sub_objects_flagged_as_markers() {
        let mut engine = MockEngine::new();
        let node = engine.user_spawn_node("Prop", "crate").unwrap();
        let marker = engine.attach_lock_marker(node, ParticipantId(2));
        assert!(engine.is_lock_marker(marker));
        assert_eq!(engine.lock_marker_count(node), 1);
        engine.detach_lock_markers(node);
        assert_eq!(engine.lock_marker_count(node), 0);
    }
}
