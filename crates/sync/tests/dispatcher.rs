//! Adapter routing and error containment with hand-written adapters.

use scenesync_core::{Dictionary, EngineHandle, ObjectId, ObjectKind, Property};
use scenesync_sync::{Adapter, Claim, Dispatcher, SyncConfig, SyncContext, SyncError, SyncSession};
use scenesync_testkit::{LocalProvider, MockEngine};
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

struct Recorder {
    name: &'static str,
    log: Log,
    claim: Claim,
    fail_with: Option<fn(ObjectId) -> SyncError>,
}

impl Recorder {
    fn boxed(name: &'static str, log: &Log, claim: Claim) -> Box<Self> {
        Box::new(Self {
            name,
            log: Rc::clone(log),
            claim,
            fail_with: None,
        })
    }

    fn failing(name: &'static str, log: &Log, error: fn(ObjectId) -> SyncError) -> Box<Self> {
        Box::new(Self {
            name,
            log: Rc::clone(log),
            claim: Claim::Declined,
            fail_with: Some(error),
        })
    }
}

impl Adapter for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn create(&mut self, _ctx: &mut SyncContext<'_>, _handle: EngineHandle) -> Claim {
        self.log.borrow_mut().push(format!("{}.create", self.name));
        self.claim
    }

    fn on_create(
        &mut self,
        _ctx: &mut SyncContext<'_>,
        object: ObjectId,
        _child_index: usize,
    ) -> Result<(), SyncError> {
        self.log.borrow_mut().push(format!("{}.on_create {object}", self.name));
        match self.fail_with {
            Some(error) => Err(error(object)),
            None => Ok(()),
        }
    }
}

/// Logs the frame phases it takes part in.
struct Phases(Log);

impl Phases {
    fn record(&self, phase: &str) {
        self.0.borrow_mut().push(phase.to_string());
    }
}

impl Adapter for Phases {
    fn name(&self) -> &'static str {
        "phases"
    }

    fn before_events(&mut self, _ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        self.record("before_events");
        Ok(())
    }

    fn pre_tick(&mut self, _ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        self.record("pre_tick");
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut SyncContext<'_>) -> Result<(), SyncError> {
        self.record("tick");
        Ok(())
    }

    fn end_tick(&mut self, _ctx: &mut SyncContext<'_>) {
        self.record("end_tick");
    }

    fn on_create(
        &mut self,
        _ctx: &mut SyncContext<'_>,
        _object: ObjectId,
        _child_index: usize,
    ) -> Result<(), SyncError> {
        self.record("on_create");
        Ok(())
    }
}

fn connect(dispatcher: Dispatcher) -> (LocalProvider, MockEngine, SyncSession) {
    let mut provider = LocalProvider::default();
    let mut engine = MockEngine::new();
    let session =
        SyncSession::connect_with(SyncConfig::default(), dispatcher, &mut provider, &mut engine)
            .expect("connect");
    (provider, engine, session)
}

fn named(name: &str) -> Property {
    Property::Dict(Dictionary::new().with("name", Property::text(name)))
}

#[test]
fn primaries_are_probed_before_fallbacks() {
    let log = Log::default();
    let mut dispatcher = Dispatcher::new();
    let fallback = dispatcher.add(Recorder::boxed("fallback", &log, Claim::Handled(None)));
    dispatcher.register(ObjectKind::GenericEngineObject, fallback, true);
    let declines = dispatcher.add(Recorder::boxed("declines", &log, Claim::Declined));
    dispatcher.register(ObjectKind::Node, declines, false);
    let filters = dispatcher.add(Recorder::boxed("filters", &log, Claim::Handled(None)));
    dispatcher.register(ObjectKind::Container, filters, false);

    let (mut provider, mut engine, mut session) = connect(dispatcher);
    let created = session
        .create(&mut provider, &mut engine, EngineHandle(99))
        .unwrap();
    assert_eq!(created, None);
    assert_eq!(*log.borrow(), vec!["declines.create", "filters.create"]);
}

#[test]
fn fallback_claims_what_primaries_decline() {
    let log = Log::default();
    let mut dispatcher = Dispatcher::new();
    let primary = dispatcher.add(Recorder::boxed("primary", &log, Claim::Declined));
    dispatcher.register(ObjectKind::Node, primary, false);
    let fallback = dispatcher.add(Recorder::boxed(
        "fallback",
        &log,
        Claim::Handled(Some(ObjectId(5))),
    ));
    dispatcher.register(ObjectKind::ConfigSet, fallback, true);

    let (mut provider, mut engine, mut session) = connect(dispatcher);
    let created = session
        .create(&mut provider, &mut engine, EngineHandle(1))
        .unwrap();
    assert_eq!(created, Some(ObjectId(5)));
    assert_eq!(*log.borrow(), vec!["primary.create", "fallback.create"]);
}

#[test]
fn shared_adapter_is_probed_once() {
    let log = Log::default();
    let mut dispatcher = Dispatcher::new();
    let shared = dispatcher.add(Recorder::boxed("shared", &log, Claim::Declined));
    dispatcher.register(ObjectKind::Template, shared, false);
    dispatcher.register(ObjectKind::SubTemplate, shared, false);
    assert_eq!(dispatcher.adapter_for(ObjectKind::SubTemplate), Some(shared));

    let (mut provider, mut engine, mut session) = connect(dispatcher);
    session
        .create(&mut provider, &mut engine, EngineHandle(1))
        .unwrap();
    assert_eq!(*log.borrow(), vec!["shared.create"]);
}

#[test]
fn events_route_by_type_and_unknown_types_are_dropped() {
    let log = Log::default();
    let mut dispatcher = Dispatcher::new();
    let templates = dispatcher.add(Recorder::boxed("templates", &log, Claim::Declined));
    dispatcher.register(ObjectKind::Template, templates, false);

    let (mut provider, mut engine, mut session) = connect(dispatcher);
    let template = provider
        .remote_create(ObjectKind::Template, named("Chair"), None)
        .unwrap();
    provider
        .remote_create(ObjectKind::Node, named("lamp"), None)
        .unwrap();
    session.pre_tick(&mut provider, &mut engine).unwrap();

    assert!(session.is_connected());
    assert_eq!(
        *log.borrow(),
        vec![format!("templates.on_create {template}")]
    );
}

#[test]
fn adapter_errors_are_contained_unless_fatal() {
    let log = Log::default();
    let mut dispatcher = Dispatcher::new();
    let missing = dispatcher.add(Recorder::failing("missing", &log, |_| {
        SyncError::Resolution {
            class: "Rock".to_string(),
        }
    }));
    dispatcher.register(ObjectKind::Node, missing, false);
    let broken = dispatcher.add(Recorder::failing("broken", &log, |object| {
        SyncError::protocol(object, "no parent")
    }));
    dispatcher.register(ObjectKind::SubComponent, broken, false);

    let (mut provider, mut engine, mut session) = connect(dispatcher);
    provider
        .remote_create(ObjectKind::Node, named("boulder"), None)
        .unwrap();
    session.pre_tick(&mut provider, &mut engine).unwrap();
    assert!(session.is_connected());

    provider
        .remote_create(ObjectKind::SubComponent, named("root"), None)
        .unwrap();
    let err = session.pre_tick(&mut provider, &mut engine).unwrap_err();
    assert!(err.is_fatal());
    assert!(!session.is_connected());
    assert!(provider
        .disconnect_reason()
        .is_some_and(|reason| reason.contains("no parent")));

    // Disconnected sessions ignore further frames.
    assert!(session.pre_tick(&mut provider, &mut engine).is_ok());
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn frame_phases_run_in_order() {
    let log = Log::default();
    let mut dispatcher = Dispatcher::new();
    let phases = dispatcher.add(Box::new(Phases(Rc::clone(&log))));
    dispatcher.register(ObjectKind::Template, phases, false);

    let (mut provider, mut engine, mut session) = connect(dispatcher);
    provider
        .remote_create(ObjectKind::Template, named("Chair"), None)
        .unwrap();
    session.pre_tick(&mut provider, &mut engine).unwrap();
    session.tick(&mut provider, &mut engine).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["before_events", "on_create", "pre_tick", "tick", "end_tick"]
    );
}
