//! Shared harness for the session scenarios.
#![allow(dead_code)]

use scenesync_core::{
    Dictionary, EngineHandle, HostScene, ObjectId, ObjectKind, Property, PropertyPath, Provider,
};
use scenesync_sync::{SyncConfig, SyncSession};
use scenesync_testkit::{LocalProvider, MockEngine};

/// Generous budget so creation work never defers unless a test asks for it.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        max_create_time_ms: 10_000,
        ..SyncConfig::default()
    }
}

/// One local participant wired to a scripted remote through a [`LocalProvider`].
pub struct Harness {
    pub provider: LocalProvider,
    pub engine: MockEngine,
    pub session: SyncSession,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_setup(test_config(), |_, _| {})
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_setup(config, |_, _| {})
    }

    /// Prepare the provider and the scene before connecting. Host events raised by the
    /// setup are dropped; the session discovers the scene on connect.
    pub fn with_setup(
        config: SyncConfig,
        setup: impl FnOnce(&mut LocalProvider, &mut MockEngine),
    ) -> Self {
        let mut provider = LocalProvider::default();
        let mut engine = MockEngine::new();
        setup(&mut provider, &mut engine);
        engine.take_events();
        let session = SyncSession::connect(config, &mut provider, &mut engine)
            .expect("connect should succeed");
        Self {
            provider,
            engine,
            session,
        }
    }

    /// One frame: forward host events, then pre-tick and tick.
    pub fn step(&mut self) {
        self.try_step().expect("step should succeed");
    }

    pub fn try_step(&mut self) -> Result<(), scenesync_sync::SyncError> {
        for event in self.engine.take_events() {
            self.session
                .notify(&mut self.provider, &mut self.engine, event)?;
        }
        self.session.pre_tick(&mut self.provider, &mut self.engine)?;
        self.session.tick(&mut self.provider, &mut self.engine)
    }

    pub fn run(&mut self, frames: usize) {
        for _ in 0..frames {
            self.step();
        }
    }

    /// Replicated object of the active container.
    pub fn container(&self) -> ObjectId {
        let handle = self.engine.active_container().expect("active container");
        self.object_of(handle).expect("container is mapped")
    }

    pub fn object_of(&self, handle: EngineHandle) -> Option<ObjectId> {
        self.session.object_map().object_for(handle)
    }

    pub fn handle_of(&self, object: ObjectId) -> Option<EngineHandle> {
        self.session.object_map().handle_for(object)
    }

    /// Root dictionary of a replicated object.
    pub fn dict(&self, object: ObjectId) -> Dictionary {
        self.provider
            .tree()
            .property(object)
            .and_then(Property::as_dict)
            .cloned()
            .unwrap_or_default()
    }

    /// Value of a node field as replicated.
    pub fn replicated_field(&self, object: ObjectId, field: &str) -> Option<Property> {
        self.provider
            .tree()
            .resolve(&PropertyPath::root(object).key("fields").key(field))
            .cloned()
    }

    /// Publish a node under the container as the remote participant.
    pub fn remote_node(&mut self, name: &str, class: &str) -> ObjectId {
        let container = self.container();
        self.provider
            .remote_create(ObjectKind::Node, node_property(name, class), Some(container))
            .expect("remote create")
    }

    pub fn live(&self, object: ObjectId) -> bool {
        self.provider
            .tree()
            .get(object)
            .is_some_and(|object| object.is_live())
    }
}

/// Dictionary of a node as a remote participant would publish it.
pub fn node_property(name: &str, class: &str) -> Property {
    Property::Dict(
        Dictionary::new()
            .with("name", Property::text(name))
            .with("class", Property::text(class))
            .with("label", Property::text(name))
            .with("folder", Property::text(""))
            .with("fields", Property::dict()),
    )
}

/// Dictionary of a sub-object as a remote participant would publish it.
pub fn sub_object_property(name: &str, class: &str) -> Property {
    Property::Dict(
        Dictionary::new()
            .with("name", Property::text(name))
            .with("class", Property::text(class))
            .with("fields", Property::dict()),
    )
}
