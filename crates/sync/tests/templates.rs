//! Template assets.

mod common;

use common::Harness;
use scenesync_core::{
    Dictionary, HostTemplates, ObjectId, ObjectKind, Property, PropertyPath, Provider,
    TemplateMeta,
};
use scenesync_sync::Notice;

fn template_node(name: &str, class: &str, parent: ObjectId) -> Property {
    Property::Dict(
        Dictionary::new()
            .with("name", Property::text(name))
            .with("class", Property::text(class))
            .with("category", Property::text(""))
            .with("tooltip", Property::text(""))
            .with("display_name", Property::text(""))
            .with("parent", Property::Reference(parent))
            .with("fields", Property::dict()),
    )
}

fn template(name: &str) -> Property {
    Property::Dict(Dictionary::new().with("name", Property::text(name)))
}

#[test]
fn explicit_create_uploads_template_nodes() {
    let mut h = Harness::new();
    let chair = h.engine.user_create_template("Chair");
    let seat = h
        .engine
        .user_add_template_node(chair, "MeshComponent", "seat")
        .unwrap();

    let object = h
        .session
        .create(&mut h.provider, &mut h.engine, chair)
        .unwrap()
        .expect("template replicated");
    assert!(h.live(object));
    let seat_object = h.object_of(seat).unwrap();
    assert_eq!(h.provider.tree().parent(seat_object), Some(object));
    assert_eq!(h.dict(seat_object).text("class"), Some("MeshComponent"));
}

#[test]
fn template_edits_are_pushed() {
    let mut h = Harness::new();
    let chair = h.engine.user_create_template("Chair");
    let seat = h
        .engine
        .user_add_template_node(chair, "MeshComponent", "seat")
        .unwrap();
    h.session
        .create(&mut h.provider, &mut h.engine, chair)
        .unwrap();
    h.engine.take_events();

    h.engine.user_set_template_meta(
        seat,
        &TemplateMeta {
            category: "Furniture".to_string(),
            tooltip: String::new(),
            display_name: "Seat".to_string(),
        },
    );
    let legs = h
        .engine
        .user_add_template_node(chair, "MeshComponent", "legs")
        .unwrap();
    h.step();

    let seat_object = h.object_of(seat).unwrap();
    assert_eq!(h.dict(seat_object).text("category"), Some("Furniture"));
    assert_eq!(h.dict(seat_object).text("display_name"), Some("Seat"));
    let legs_object = h.object_of(legs).expect("new node uploaded");
    assert!(h.live(legs_object));
}

#[test]
fn remote_template_is_built() {
    let mut h = Harness::new();
    let chair = h.provider.stage(ObjectKind::Template, template("Chair"));
    let seat = h
        .provider
        .stage_child(
            chair,
            ObjectKind::SubTemplate,
            template_node("seat", "MeshComponent", ObjectId::NONE),
        )
        .unwrap();
    h.provider.remote_publish(chair, None).unwrap();
    h.step();

    let handle = h.engine.find_template("Chair").expect("template created");
    assert_eq!(h.handle_of(chair), Some(handle));
    let seat_node = h.engine.find_template_node(handle, "seat").unwrap();
    assert_eq!(h.handle_of(seat), Some(seat_node));

    h.provider
        .remote_set_property(
            &PropertyPath::root(seat).key("tooltip"),
            Property::text("Sit here"),
        )
        .unwrap();
    h.step();
    assert_eq!(h.engine.template_meta(seat_node).tooltip, "Sit here");
}

#[test]
fn cross_template_parent_waits_until_instantiated() {
    let mut h = Harness::new();
    let base = h.provider.stage(ObjectKind::Template, template("Base"));
    let root = h
        .provider
        .stage_child(
            base,
            ObjectKind::SubTemplate,
            template_node("root", "SceneComponent", ObjectId::NONE),
        )
        .unwrap();
    let derived = h.provider.stage(ObjectKind::Template, template("Derived"));
    let arm = h
        .provider
        .stage_child(
            derived,
            ObjectKind::SubTemplate,
            template_node("arm", "MeshComponent", root),
        )
        .unwrap();
    // The derived template arrives first and references a node that is not built yet.
    h.provider.remote_publish(derived, None).unwrap();
    h.provider.remote_publish(base, None).unwrap();
    h.step();

    let arm_node = h.handle_of(arm).expect("arm created");
    let root_node = h.handle_of(root).expect("root created");
    assert_eq!(h.engine.template_node_parent(arm_node), Some(root_node));
}

#[test]
fn unresolved_parent_leaves_the_node_at_the_root() {
    let mut h = Harness::new();
    h.engine.set_class_available("SceneComponent", false);
    let base = h.provider.stage(ObjectKind::Template, template("Base"));
    let root = h
        .provider
        .stage_child(
            base,
            ObjectKind::SubTemplate,
            template_node("root", "SceneComponent", ObjectId::NONE),
        )
        .unwrap();
    let derived = h.provider.stage(ObjectKind::Template, template("Derived"));
    let arm = h
        .provider
        .stage_child(
            derived,
            ObjectKind::SubTemplate,
            template_node("arm", "MeshComponent", root),
        )
        .unwrap();
    h.provider.remote_publish(base, None).unwrap();
    h.provider.remote_publish(derived, None).unwrap();
    h.step();

    assert!(h.handle_of(root).is_none());
    let arm_node = h.handle_of(arm).expect("arm created");
    assert_eq!(h.engine.template_node_parent(arm_node), None);
    assert_eq!(
        h.session.take_notices(),
        vec![Notice::MissingClass {
            class: "SceneComponent".to_string()
        }]
    );

    h.provider.remote_delete(base).unwrap();
    h.step();
    assert!(h.engine.find_template("Base").is_none());
    assert_eq!(h.handle_of(arm), Some(arm_node));
    assert_eq!(h.engine.template_node_parent(arm_node), None);
}
