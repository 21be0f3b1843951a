//! Scripted two-participant session driven without a real editor.
//!
//! The local participant edits a [`MockEngine`] scene while the in-memory authority
//! plays a second participant. After the script the two views are compared.

use crate::config::DriverConfig;
use anyhow::Result;
use glam::Vec3;
use scenesync_core::{
    Dictionary, EngineHandle, HostEvent, HostInstances, HostScene, InstanceRecord, LockLevel,
    ObjectId, ObjectKind, Property, PropertyPath, Provider, Value,
};
use scenesync_sync::{SyncError, SyncSession};
use scenesync_testkit::{EventRecord, JsonlSink, LocalProvider, MockEngine, SessionReport};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const SCENARIO: &str = "two-participant";
const INSTANCE_TYPE: &str = "Fern";
const INSTANCE_SPACING: f32 = 150.0;

pub struct HeadlessConfig {
    pub config: DriverConfig,
    pub ticks: Option<u64>,
    pub events: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

pub fn run(cfg: HeadlessConfig) -> Result<SessionReport> {
    let settle_ticks = cfg.ticks.unwrap_or(cfg.config.scenario.settle_ticks);
    let sink = match &cfg.events {
        Some(path) => Some(JsonlSink::create(path)?),
        None => None,
    };

    let mut report = SessionReport::new(SCENARIO);
    let mut driver = match Driver::connect(&cfg.config, sink) {
        Ok(driver) => driver,
        Err(err) => {
            report.fail(format!("connect failed: {err}"));
            return finish(report, cfg.report);
        }
    };

    let outcome = driver
        .script(&cfg.config)
        .and_then(|lamp| {
            driver.run(settle_ticks)?;
            Ok(lamp)
        });
    match outcome {
        Ok(lamp) => {
            if let Err(reason) = driver.check_converged(lamp) {
                report.fail(reason);
            }
        }
        Err(ScriptError::Sync(err)) => report.fail(format!("session failed: {err}")),
        Err(ScriptError::Other(err)) => return Err(err),
    }

    driver.fill(&mut report);
    driver.session.disconnect(&mut driver.provider, &mut driver.engine);
    finish(report, cfg.report)
}

fn finish(report: SessionReport, path: Option<PathBuf>) -> Result<SessionReport> {
    if let Some(path) = path {
        report.write_to(&path)?;
        info!("Report written to {}", path.display());
    }
    Ok(report)
}

enum ScriptError {
    Sync(SyncError),
    Other(anyhow::Error),
}

impl From<SyncError> for ScriptError {
    fn from(err: SyncError) -> Self {
        ScriptError::Sync(err)
    }
}

impl From<anyhow::Error> for ScriptError {
    fn from(err: anyhow::Error) -> Self {
        ScriptError::Other(err)
    }
}

struct Driver {
    provider: LocalProvider,
    engine: MockEngine,
    session: SyncSession,
    sink: Option<JsonlSink>,
    tick: u64,
    host_events: usize,
}

impl Driver {
    fn connect(config: &DriverConfig, sink: Option<JsonlSink>) -> Result<Self, SyncError> {
        let mut provider = LocalProvider::default();
        if config.scenario.node_limit > 0 {
            provider.set_object_limit(ObjectKind::Node, config.scenario.node_limit);
        }
        let mut engine = MockEngine::new();
        let session = SyncSession::connect(config.sync.clone(), &mut provider, &mut engine)?;
        Ok(Self {
            provider,
            engine,
            session,
            sink,
            tick: 0,
            host_events: 0,
        })
    }

    /// Issue the scripted edits from both sides. Returns the local lamp.
    fn script(&mut self, config: &DriverConfig) -> Result<EngineHandle, ScriptError> {
        let lamp = self.spawn("Light", "lamp")?;
        self.spawn("Prop", "table")?;
        let grass = self.spawn("InstanceContainer", "grass")?;
        let records: Vec<InstanceRecord> = (0..config.scenario.painted_instances)
            .map(|i| InstanceRecord::at(Vec3::new(i as f32 * INSTANCE_SPACING, 0.0, 0.0)))
            .collect();
        self.engine.user_add_instances(grass, INSTANCE_TYPE, &records);
        self.run(2)?;

        let container = self.container()?;
        let rock = self.remote("create", "rock", |provider| {
            provider.remote_create(ObjectKind::Node, node_property("rock", "Rock"), Some(container))
        })?;
        if let Some(lamp_object) = self.session.object_map().object_for(lamp) {
            self.remote("set_field", "lamp.intensity", |provider| {
                provider.remote_set_property(
                    &PropertyPath::root(lamp_object).key("fields").key("intensity"),
                    Value::Float(3.0).into(),
                )
            })?;
            self.step()?;

            self.remote("lock", "lamp", |provider| {
                provider.remote_lock(lamp_object, LockLevel::Full)
            })?;
            self.step()?;
            self.engine.user_rename(lamp, "stolen");
            self.step()?;
            self.remote("unlock", "lamp", |provider| provider.remote_unlock(lamp_object))?;
            self.step()?;
            self.engine.user_rename(lamp, "desk lamp");
        }

        if !records.is_empty() {
            self.engine.user_remove_instances(grass, INSTANCE_TYPE, &[0]);
        }
        self.step()?;
        self.remote("delete", "rock", |provider| provider.remote_delete(rock))?;
        self.step()?;
        Ok(lamp)
    }

    fn spawn(&mut self, class: &str, name: &str) -> Result<EngineHandle, ScriptError> {
        self.engine
            .user_spawn_node(class, name)
            .map_err(|err| ScriptError::Other(anyhow::anyhow!("spawning {name}: {err}")))
    }

    fn container(&self) -> Result<ObjectId, ScriptError> {
        self.engine
            .active_container()
            .and_then(|handle| self.session.object_map().object_for(handle))
            .ok_or_else(|| ScriptError::Other(anyhow::anyhow!("container is not replicated")))
    }

    /// Act as the remote participant and log the operation.
    fn remote<T, E: std::fmt::Display>(
        &mut self,
        kind: &str,
        payload: &str,
        op: impl FnOnce(&mut LocalProvider) -> Result<T, E>,
    ) -> Result<T, ScriptError> {
        let value = op(&mut self.provider)
            .map_err(|err| ScriptError::Other(anyhow::anyhow!("remote {kind} {payload}: {err}")))?;
        self.log("remote", kind, payload.to_string())?;
        Ok(value)
    }

    fn run(&mut self, ticks: u64) -> Result<(), ScriptError> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    /// One frame: forward host events, then pre-tick and tick.
    fn step(&mut self) -> Result<(), ScriptError> {
        for event in self.engine.take_events() {
            self.host_events += 1;
            self.log("host", host_event_kind(&event), format!("{event:?}"))?;
            self.session
                .notify(&mut self.provider, &mut self.engine, event)?;
        }
        self.session.pre_tick(&mut self.provider, &mut self.engine)?;
        self.session.tick(&mut self.provider, &mut self.engine)?;
        self.tick += 1;
        debug!(tick = self.tick, "Frame complete");
        Ok(())
    }

    fn log(&mut self, source: &str, kind: &str, payload: String) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.write(&EventRecord {
                tick: self.tick,
                source,
                kind,
                payload,
            })?;
        }
        Ok(())
    }

    /// Compare the local scene with the replicated tree.
    fn check_converged(&self, lamp: EngineHandle) -> Result<(), String> {
        let tree = self.provider.tree();
        for object in self.provider.live_objects(ObjectKind::Node) {
            let Some(handle) = self.session.object_map().handle_for(object) else {
                return Err(format!("replicated node {object} has no local node"));
            };
            let replicated = tree
                .property(object)
                .and_then(Property::as_dict)
                .and_then(|dict| dict.text("name").map(str::to_string));
            let local = self.engine.name(handle);
            if replicated != local {
                return Err(format!(
                    "node {object} is named {local:?} locally but {replicated:?} remotely"
                ));
            }
        }

        if self.engine.node_named("rock").is_some() {
            return Err("remotely deleted rock is still in the scene".to_string());
        }
        if self.engine.is_alive(lamp)
            && self.session.object_map().object_for(lamp).is_some()
            && self.engine.name(lamp).as_deref() != Some("desk lamp")
        {
            return Err("rename after unlock was lost".to_string());
        }

        if let Some(grass) = self.engine.node_named("grass") {
            let local = self.engine.instances(grass, INSTANCE_TYPE).len();
            if let Some(replicated) = self.replicated_instances(grass) {
                if replicated != local {
                    return Err(format!(
                        "{local} local instances but {replicated} replicated"
                    ));
                }
            }
        }
        Ok(())
    }

    fn replicated_instances(&self, node: EngineHandle) -> Option<usize> {
        let tree = self.provider.tree();
        let object = self.session.object_map().object_for(node)?;
        let set = tree
            .children(object)
            .iter()
            .copied()
            .find(|child| tree.kind(*child) == Some(ObjectKind::BulkInstanceSet))?;
        let count = tree
            .resolve(&PropertyPath::root(set).index(0).key("instances"))
            .and_then(Property::as_list)
            .map_or(0, <[Property]>::len);
        Some(count)
    }

    fn fill(&mut self, report: &mut SessionReport) {
        report.ticks = self.tick;
        report.replicated_objects = self
            .provider
            .tree()
            .iter()
            .filter(|object| object.is_live())
            .count();
        report.mapped_objects = self.session.object_map().len();
        report.host_events = self.host_events;
        report.remote_operations = self.provider.remote_operations();
        report.notices = self
            .session
            .take_notices()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !self.session.is_connected() {
            warn!("Session ended disconnected");
        }
    }
}

fn node_property(name: &str, class: &str) -> Property {
    Property::Dict(
        Dictionary::new()
            .with("name", Property::text(name))
            .with("class", Property::text(class))
            .with("label", Property::text(name))
            .with("folder", Property::text(""))
            .with("fields", Property::dict()),
    )
}

fn host_event_kind(event: &HostEvent) -> &'static str {
    match event {
        HostEvent::NodeAdded(_) => "node_added",
        HostEvent::NodeRemoved(_) => "node_removed",
        HostEvent::NodeAttached { .. } => "node_attached",
        HostEvent::NodeDetached(_) => "node_detached",
        HostEvent::NodeRenamed(_) => "node_renamed",
        HostEvent::FolderChanged(_) => "folder_changed",
        HostEvent::LayersChanged(_) => "layers_changed",
        HostEvent::SelectionChanged { .. } => "selection_changed",
        HostEvent::PropertyChanged { .. } => "property_changed",
        HostEvent::SubObjectsChanged(_) => "sub_objects_changed",
        HostEvent::TemplateChanged(_) => "template_changed",
        HostEvent::InstancesChanged(_) => "instances_changed",
        HostEvent::UndoRedo(_) => "undo_redo",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> HeadlessConfig {
        let mut config = DriverConfig::default();
        config.sync.max_create_time_ms = 10_000;
        HeadlessConfig {
            config,
            ticks: None,
            events: None,
            report: None,
        }
    }

    #[test]
    fn default_scenario_converges() {
        let report = run(quiet()).unwrap();
        assert_eq!(report.failure, None);
        assert!(report.ticks >= 8);
        assert!(report.host_events > 0);
        assert!(report.remote_operations >= 5);
        assert!(report.notices.is_empty());
    }

    #[test]
    fn node_limit_is_reported_as_a_notice() {
        let mut cfg = quiet();
        cfg.config.scenario.node_limit = 2;
        let report = run(cfg).unwrap();
        assert_eq!(report.failure, None);
        assert_eq!(report.notices.len(), 1);
    }
}
