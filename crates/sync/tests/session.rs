//! Session lifecycle: joining, object limits, explicit creation and fatal errors.

mod common;

use common::{node_property, test_config, Harness};
use scenesync_core::{
    FieldValue, HostEvent, HostScene, LockIndicator, LockLevel, ObjectKind, Property, Provider,
    Value,
};
use scenesync_sync::{Notice, SyncConfig, SyncSession};
use scenesync_testkit::{LocalProvider, MockEngine};

#[test]
fn connect_creates_the_container() {
    let h = Harness::new();
    let container = h.container();
    assert!(h.live(container));
    assert_eq!(h.dict(container).text("name"), Some("Level"));
    assert_eq!(
        h.provider.tree().kind(container),
        Some(ObjectKind::Container)
    );
}

#[test]
fn joining_participant_adopts_existing_content() {
    let mut provider = LocalProvider::default();
    let mut first = MockEngine::new();
    let mut session = SyncSession::connect(test_config(), &mut provider, &mut first).unwrap();
    first.user_spawn_node("Light", "lamp").unwrap();
    for _ in 0..2 {
        for event in first.take_events() {
            session.notify(&mut provider, &mut first, event).unwrap();
        }
        session.pre_tick(&mut provider, &mut first).unwrap();
        session.tick(&mut provider, &mut first).unwrap();
    }
    session.disconnect(&mut provider, &mut first);

    let mut second = MockEngine::new();
    let mut joined = SyncSession::connect(test_config(), &mut provider, &mut second).unwrap();
    assert_eq!(provider.live_objects(ObjectKind::Container).len(), 1);
    joined.pre_tick(&mut provider, &mut second).unwrap();
    assert!(second.node_named("lamp").is_some());
}

#[test]
fn node_limit_discards_the_overflow_once() {
    let mut h = Harness::with_setup(test_config(), |provider, engine| {
        provider.set_object_limit(ObjectKind::Node, 2);
        for name in ["a", "b", "c"] {
            engine.user_spawn_node("Prop", name).unwrap();
        }
    });
    h.run(2);

    assert_eq!(h.engine.node_names(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(h.provider.live_objects(ObjectKind::Node).len(), 2);
    assert_eq!(
        h.session.take_notices(),
        vec![Notice::ObjectLimitReached {
            kind: ObjectKind::Node,
            limit: 2
        }]
    );

    let extra = h.engine.user_spawn_node("Prop", "d").unwrap();
    h.run(2);
    assert!(!h.engine.is_alive(extra));
    assert!(h.session.take_notices().is_empty());
}

#[test]
fn overflow_nodes_are_destroyed_when_the_tick_ends() {
    let mut h = Harness::with_setup(test_config(), |provider, _| {
        provider.set_object_limit(ObjectKind::Node, 1);
    });
    let kept = h.engine.user_spawn_node("Prop", "a").unwrap();
    let extra = h.engine.user_spawn_node("Prop", "b").unwrap();
    h.step();
    assert!(h.engine.is_alive(extra));

    // Uploaded and rejected in this frame.
    h.step();
    assert!(h.engine.is_alive(kept));
    assert!(!h.engine.is_alive(extra));
    assert!(!h
        .engine
        .take_events()
        .iter()
        .any(|event| matches!(event, HostEvent::NodeRemoved(_))));
}

#[test]
fn explicit_create_replicates_free_standing_objects() {
    let config = SyncConfig {
        config_set_classes: vec!["Settings".to_string()],
        ..test_config()
    };
    let mut h = Harness::with_config(config);
    let settings = h.engine.user_spawn_object("Settings", "world").unwrap();
    h.engine
        .user_set_field(settings, "count", FieldValue::Int(3));

    let object = h
        .session
        .create(&mut h.provider, &mut h.engine, settings)
        .unwrap()
        .expect("settings replicated");
    assert_eq!(h.provider.tree().kind(object), Some(ObjectKind::ConfigSet));
    assert!(h.live(object));
    assert_eq!(
        h.replicated_field(object, "count"),
        Some(Property::Value(Value::Int(3)))
    );

    h.engine
        .user_set_field(settings, "note", FieldValue::Text("foggy".to_string()));
    h.step();
    assert_eq!(
        h.replicated_field(object, "note"),
        Some(Property::Value(Value::Text("foggy".to_string())))
    );
}

#[test]
fn remote_generic_object_is_found_or_spawned() {
    let mut h = Harness::new();
    let dict = scenesync_core::Dictionary::new()
        .with("name", Property::text("world"))
        .with("class", Property::text("Settings"))
        .with(
            "fields",
            Property::Dict(
                scenesync_core::Dictionary::new().with("enabled", Value::Bool(false)),
            ),
        );
    let object = h
        .provider
        .remote_create(ObjectKind::GenericEngineObject, Property::Dict(dict), None)
        .unwrap();
    h.step();
    let handle = h.handle_of(object).expect("settings spawned");
    assert_eq!(h.engine.class_name(handle).as_deref(), Some("Settings"));
    assert!(!h.engine.props(handle).unwrap().enabled);
}

#[test]
fn malformed_tree_disconnects_the_session() {
    let mut h = Harness::new();
    let lamp = h.engine.user_spawn_node("Light", "lamp").unwrap();
    h.run(2);
    let object = h.object_of(lamp).unwrap();
    h.provider.remote_lock(object, LockLevel::Full).unwrap();
    h.step();
    assert_ne!(h.engine.lock_indicator(lamp), LockIndicator::None);

    h.provider
        .remote_create(ObjectKind::Node, node_property("orphan", "Prop"), None)
        .unwrap();
    assert!(h.try_step().is_err());

    assert!(!h.session.is_connected());
    assert!(!h.provider.is_connected());
    assert!(h.provider.disconnect_reason().is_some());
    assert!(h.session.object_map().is_empty());
    assert_eq!(h.engine.lock_indicator(lamp), LockIndicator::None);
    assert_eq!(h.engine.lock_marker_count(lamp), 0);

    h.engine.user_rename(lamp, "after");
    assert!(h.try_step().is_ok());
    assert_eq!(h.dict(object).text("name"), Some("lamp"));
}

#[test]
fn disconnect_is_idempotent() {
    let mut h = Harness::new();
    h.session.disconnect(&mut h.provider, &mut h.engine);
    h.session.disconnect(&mut h.provider, &mut h.engine);
    assert!(!h.session.is_connected());
    assert_eq!(h.provider.disconnect_reason(), Some("disconnect requested"));
}
