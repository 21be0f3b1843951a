//! Session hub owning the dispatcher, the object map and the deferred work queues.

use crate::adapters::{
    instances, ComponentAdapter, ContainerAdapter, GenericAdapter, InstanceAdapter, NodeAdapter,
    TemplateAdapter, INSTANCE_CONTAINER_CLASS,
};
use crate::budget::TickBudget;
use crate::config::SyncConfig;
use crate::context::{SessionState, SyncContext};
use crate::dispatcher::Dispatcher;
use crate::notices::Notice;
use crate::stand_in;
use crate::SyncError;
use scenesync_core::{
    EngineHandle, HostEngine, HostEvent, ObjectId, ObjectKind, ObjectMap, Provider,
};
use tracing::{debug, error, info};

/// One connection between a host scene and a replicated tree.
///
/// The provider and the engine are borrowed per call. A fatal error disconnects the
/// session; later calls are no-ops until a new session is connected.
pub struct SyncSession {
    config: SyncConfig,
    dispatcher: Dispatcher,
    map: ObjectMap,
    state: SessionState,
    budget: TickBudget,
    connected: bool,
}

impl SyncSession {
    /// Register the built-in adapters and initialize them against the current scene.
    pub fn connect(
        config: SyncConfig,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
    ) -> Result<Self, SyncError> {
        let dispatcher = Self::builtin_dispatcher(&config);
        Self::connect_with(config, dispatcher, provider, engine)
    }

    /// Connect with a custom set of adapters.
    pub fn connect_with(
        config: SyncConfig,
        dispatcher: Dispatcher,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
    ) -> Result<Self, SyncError> {
        let budget = TickBudget::start(config.max_create_time());
        let mut session = Self {
            config,
            dispatcher,
            map: ObjectMap::new(),
            state: SessionState::default(),
            budget,
            connected: true,
        };
        session.run(provider, engine, |dispatcher, ctx| dispatcher.initialize(ctx))?;
        info!(
            "Connected as participant {:?} with {} mapped objects",
            provider.local_participant(),
            session.map.len()
        );
        Ok(session)
    }

    /// Dispatcher with every built-in adapter enabled by `config`.
    pub fn builtin_dispatcher(config: &SyncConfig) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();

        let container = dispatcher.add(Box::new(ContainerAdapter::new()));
        dispatcher.register(ObjectKind::Container, container, false);

        let mut nodes = NodeAdapter::new();
        if config.sync_bulk_instances {
            nodes.add_hidden_sync_class(INSTANCE_CONTAINER_CLASS);
            nodes.register_initializer(INSTANCE_CONTAINER_CLASS, instances::create_instance_set);
        }
        let node = dispatcher.add(Box::new(nodes));
        dispatcher.register(ObjectKind::Node, node, false);

        let component = dispatcher.add(Box::new(ComponentAdapter::new()));
        dispatcher.register(ObjectKind::SubComponent, component, false);

        if config.sync_templates {
            let template = dispatcher.add(Box::new(TemplateAdapter::new()));
            dispatcher.register(ObjectKind::Template, template, false);
            dispatcher.register(ObjectKind::SubTemplate, template, false);
        }
        if config.sync_bulk_instances {
            let instances = dispatcher.add(Box::new(InstanceAdapter::new()));
            dispatcher.register(ObjectKind::BulkInstanceSet, instances, false);
        }

        let generic = dispatcher.add(Box::new(GenericAdapter::new()));
        dispatcher.register(ObjectKind::GenericEngineObject, generic, true);
        dispatcher.register(ObjectKind::ConfigSet, generic, true);
        dispatcher
    }

    fn run<R: Default>(
        &mut self,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
        f: impl FnOnce(&mut Dispatcher, &mut SyncContext<'_>) -> Result<R, SyncError>,
    ) -> Result<R, SyncError> {
        if !self.connected {
            return Ok(R::default());
        }
        let result = {
            let mut ctx = SyncContext::new(
                provider,
                engine,
                &mut self.map,
                &self.config,
                &mut self.state,
                self.budget,
            );
            f(&mut self.dispatcher, &mut ctx)
        };
        match result {
            Err(err) if err.is_fatal() => {
                error!("Fatal sync error: {err}; disconnecting");
                self.shut_down(provider, engine, &err.to_string());
                Err(err)
            }
            other => other,
        }
    }

    fn shut_down(
        &mut self,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
        reason: &str,
    ) {
        {
            let mut ctx = SyncContext::new(
                provider,
                engine,
                &mut self.map,
                &self.config,
                &mut self.state,
                TickBudget::unlimited(),
            );
            self.dispatcher.clean_up(&mut ctx);
        }
        provider.disconnect(reason);
        self.map.clear();
        self.state.reset();
        self.connected = false;
    }

    /// Start of frame: upgrade stand-ins, push local edits that incoming events would
    /// land on, apply replication events, drain deferred creates under the tick budget.
    pub fn pre_tick(
        &mut self,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
    ) -> Result<(), SyncError> {
        self.budget = TickBudget::start(self.config.max_create_time());
        self.run(provider, engine, |dispatcher, ctx| {
            stand_in::upgrade_stand_ins(ctx);
            dispatcher.before_events(ctx)?;
            let events = ctx.provider.poll_events();
            if !events.is_empty() {
                debug!("Applying {} replication events", events.len());
            }
            for event in events {
                dispatcher.dispatch(ctx, event)?;
            }
            dispatcher.process_create_queue(ctx)?;
            dispatcher.pre_tick(ctx)
        })
    }

    /// Main frame work: uploads, diffs and reverts, sharing the budget started in
    /// [`SyncSession::pre_tick`].
    pub fn tick(
        &mut self,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
    ) -> Result<(), SyncError> {
        self.run(provider, engine, |dispatcher, ctx| {
            dispatcher.tick(ctx)?;
            dispatcher.end_tick(ctx);
            Ok(())
        })
    }

    /// Forward a host notification to every adapter.
    pub fn notify(
        &mut self,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
        event: HostEvent,
    ) -> Result<(), SyncError> {
        let budget = std::mem::replace(&mut self.budget, TickBudget::unlimited());
        let result = self.run(provider, engine, |dispatcher, ctx| dispatcher.notify(ctx, &event));
        self.budget = budget;
        result
    }

    /// Replicate a local engine object explicitly; returns its replicated id.
    pub fn create(
        &mut self,
        provider: &mut dyn Provider,
        engine: &mut dyn HostEngine,
        handle: EngineHandle,
    ) -> Result<Option<ObjectId>, SyncError> {
        let budget = std::mem::replace(&mut self.budget, TickBudget::unlimited());
        let result = self.run(provider, engine, |dispatcher, ctx| dispatcher.create(ctx, handle));
        self.budget = budget;
        result
    }

    /// Leave the session, cleaning up adapter state.
    pub fn disconnect(&mut self, provider: &mut dyn Provider, engine: &mut dyn HostEngine) {
        if self.connected {
            info!("Disconnecting");
            self.shut_down(provider, engine, "disconnect requested");
        }
    }

    /// Drain queued user notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.state.notices.take()
    }

    /// Object ↔ engine handle map.
    pub fn object_map(&self) -> &ObjectMap {
        &self.map
    }

    /// Remote creates deferred to a later tick.
    pub fn queued_creates(&self) -> usize {
        self.state.create_queue.len()
    }

    /// Placeholders awaiting their class.
    pub fn stand_in_count(&self) -> usize {
        self.state.stand_ins.len()
    }

    /// Whether the session is still connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Session configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Change the per-tick creation budget; it applies from the next frame.
    pub fn set_max_create_time_ms(&mut self, millis: u64) {
        self.config.max_create_time_ms = millis;
    }
}
