//! Lock enforcement on nodes edited by another participant.

mod common;

use common::Harness;
use scenesync_core::{
    EngineHandle, FieldValue, HostNodes, HostScene, LockIndicator, LockLevel, ObjectId,
    ParticipantId, Property, Provider, Value,
};

fn uploaded_lamp(h: &mut Harness) -> (EngineHandle, ObjectId) {
    let lamp = h.engine.user_spawn_node("Light", "lamp").unwrap();
    h.run(2);
    let object = h.object_of(lamp).expect("lamp uploaded");
    (lamp, object)
}

#[test]
fn full_lock_shows_indicator_and_marker() {
    let mut h = Harness::new();
    let (lamp, object) = uploaded_lamp(&mut h);

    h.provider.remote_lock(object, LockLevel::Full).unwrap();
    h.step();
    assert_eq!(
        h.engine.lock_indicator(lamp),
        LockIndicator::Full(ParticipantId(2))
    );
    assert_eq!(h.engine.lock_marker_count(lamp), 1);

    h.provider.remote_unlock(object).unwrap();
    h.step();
    assert_eq!(h.engine.lock_indicator(lamp), LockIndicator::None);
    assert_eq!(h.engine.lock_marker_count(lamp), 0);
}

#[test]
fn full_lock_reverts_structure_and_field_edits() {
    let mut h = Harness::new();
    let (lamp, object) = uploaded_lamp(&mut h);
    h.provider.remote_lock(object, LockLevel::Full).unwrap();
    h.step();

    h.engine.user_rename(lamp, "stolen");
    h.engine.user_set_folder(lamp, "Elsewhere");
    h.engine.user_set_layers(lamp, &["Night"]);
    h.engine
        .user_set_field(lamp, "intensity", FieldValue::Float(9.0));
    h.step();

    assert_eq!(h.engine.name(lamp).as_deref(), Some("lamp"));
    assert_eq!(h.engine.folder(lamp), "");
    assert!(h.engine.layers(lamp).is_empty());
    assert_eq!(h.dict(object).get("layers"), Some(&Property::List(Vec::new())));
    assert_eq!(h.engine.props(lamp).unwrap().intensity, 1.0);
    let dict = h.dict(object);
    assert_eq!(dict.text("name"), Some("lamp"));
    assert_eq!(
        h.replicated_field(object, "intensity"),
        Some(Property::Value(Value::Float(1.0)))
    );
}

#[test]
fn partial_lock_blocks_fields_but_not_renames() {
    let mut h = Harness::new();
    let (lamp, object) = uploaded_lamp(&mut h);
    h.provider.remote_lock(object, LockLevel::Partial).unwrap();
    h.step();
    assert_eq!(
        h.engine.lock_indicator(lamp),
        LockIndicator::Partial(ParticipantId(2))
    );
    assert_eq!(h.engine.lock_marker_count(lamp), 0);

    h.engine.user_rename(lamp, "reading lamp");
    h.engine.user_set_layers(lamp, &["Night"]);
    h.engine.user_set_label(lamp, "Reading");
    h.engine
        .user_set_field(lamp, "enabled", FieldValue::Bool(false));
    h.step();

    assert_eq!(h.dict(object).text("name"), Some("reading lamp"));
    assert_eq!(
        h.dict(object).get("layers"),
        Some(&Property::List(vec![Property::text("Night")]))
    );
    assert_eq!(h.engine.label(lamp), "lamp");
    assert!(h.engine.props(lamp).unwrap().enabled);
}

#[test]
fn selecting_a_node_requests_a_lock() {
    let mut h = Harness::new();
    let (lamp, object) = uploaded_lamp(&mut h);

    h.engine.user_select(lamp);
    h.step();
    let owner = h.provider.tree().get(object).and_then(|o| o.lock().owner());
    assert_eq!(owner, Some(ParticipantId(1)));

    h.engine.user_deselect(lamp);
    h.step();
    let owner = h.provider.tree().get(object).and_then(|o| o.lock().owner());
    assert_eq!(owner, None);
}

#[test]
fn own_lock_allows_edits() {
    let mut h = Harness::new();
    let (lamp, object) = uploaded_lamp(&mut h);
    h.engine.user_select(lamp);
    h.step();

    h.engine
        .user_set_field(lamp, "intensity", FieldValue::Float(4.0));
    h.step();
    assert_eq!(h.engine.lock_indicator(lamp), LockIndicator::None);
    assert_eq!(
        h.replicated_field(object, "intensity"),
        Some(Property::Value(Value::Float(4.0)))
    );
}

#[test]
fn deleting_a_locked_node_recreates_it() {
    let mut h = Harness::new();
    let (lamp, object) = uploaded_lamp(&mut h);
    h.provider.remote_lock(object, LockLevel::Full).unwrap();
    h.step();

    h.engine.user_delete_node(lamp);
    h.step();

    assert!(h.live(object));
    let replacement = h.handle_of(object).expect("object is mapped again");
    assert_ne!(replacement, lamp);
    assert_eq!(h.engine.name(replacement).as_deref(), Some("lamp"));
    assert_eq!(h.engine.name(lamp).as_deref(), Some("lamp (deleted)"));
    assert_eq!(
        h.engine.lock_indicator(replacement),
        LockIndicator::Full(ParticipantId(2))
    );
}

#[test]
fn lock_owner_change_updates_the_indicator() {
    let mut h = Harness::new();
    let (lamp, object) = uploaded_lamp(&mut h);
    h.provider.remote_lock(object, LockLevel::Full).unwrap();
    h.provider
        .lock_as(object, LockLevel::Full, ParticipantId(7))
        .unwrap();
    h.step();
    assert_eq!(
        h.engine.lock_indicator(lamp),
        LockIndicator::Full(ParticipantId(7))
    );
    assert_eq!(h.engine.lock_marker_count(lamp), 1);
}
