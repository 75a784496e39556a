use std::sync::{Arc, Mutex};

use frames::protocol::{
    BROADCAST_EVENT, CLAIM_OWNERSHIP, ENTITY_ADDED, ENTITY_CHANGED, ENTITY_REMOVED, FIELD_CHANGED, RELEASE_OWNERSHIP,
    construct_key,
};

use super::*;
use crate::transport::test_helpers::Recorder;

fn context() -> (SyncContext, Recorder) {
    let recorder = Recorder::default();
    (SyncContext::new("me", Box::new(recorder.clone())), recorder)
}

fn server_frame(syscall: &str, data: Value) -> Frame {
    request_frame(syscall, Some("R"), data)
}

fn field_changed(id: &str, owner: &str, value: Value) -> Frame {
    server_frame(FIELD_CHANGED, json!({"field": {"id": id, "type": "number", "value": value, "owner": owner, "version": 2}}))
}

#[test]
fn snapshot_seeds_mirror() {
    let (mut ctx, _) = context();
    let snapshot: RoomSnapshot = serde_json::from_value(json!({
        "room_id": "R",
        "session_id": "me",
        "fields": [{"id": "hp", "type": "number", "value": 10, "owner": "s2", "version": 4}],
        "entities": {"player": [{"entityID": "p1"}], "collabObject": []}
    }))
    .unwrap();

    ctx.apply_snapshot(&snapshot);
    assert_eq!(ctx.room_id(), Some("R"));
    assert_eq!(ctx.owner_of("hp"), Some("s2"));
    assert_eq!(ctx.take_remote("hp").unwrap().version, 4);
    assert_eq!(ctx.entity("player", "p1").unwrap()["entityID"], json!("p1"));
    assert_eq!(ctx.entities("collabObject").count(), 0);
}

#[test]
fn field_changed_updates_owner_mirror() {
    let (mut ctx, _) = context();
    ctx.apply_frame(&field_changed("hp", "me", json!(1)));
    assert!(ctx.is_owned_by_me("hp"));

    ctx.apply_frame(&field_changed("hp", "", json!(1)));
    assert!(!ctx.is_owned_by_me("hp"));
    assert_eq!(ctx.owner_of("hp"), Some(""));
    // Latest record wins in the inbox.
    assert_eq!(ctx.take_remote("hp").unwrap().owner, "");
    assert!(ctx.take_remote("hp").is_none());
}

#[test]
fn error_frames_leave_mirror_untouched() {
    let (mut ctx, _) = context();
    let mut frame = field_changed("hp", "s2", json!(1));
    frame.status = Status::Error;
    ctx.apply_frame(&frame);
    assert_eq!(ctx.owner_of("hp"), None);
}

#[test]
fn entity_frames_maintain_mirror() {
    let (mut ctx, _) = context();
    ctx.apply_frame(&server_frame(ENTITY_ADDED, json!({"type": "player", "entity": {"entityID": "p1", "visMode": 1}})));
    ctx.apply_frame(&server_frame(ENTITY_ADDED, json!({"type": "player", "entity": {"entityID": "p0"}})));
    ctx.apply_frame(&server_frame(ENTITY_CHANGED, json!({"type": "player", "entity": {"entityID": "p1", "visMode": 2}})));
    assert_eq!(ctx.entity("player", "p1").unwrap()["visMode"], json!(2));
    let ids: Vec<_> = ctx.entities("player").map(|e| e["entityID"].clone()).collect();
    assert_eq!(ids, vec![json!("p0"), json!("p1")]);

    ctx.apply_frame(&server_frame(ENTITY_REMOVED, json!({"type": "player", "entityID": "p1"})));
    assert!(ctx.entity("player", "p1").is_none());
}

#[test]
fn pump_applies_queued_frames() {
    let (mut ctx, _) = context();
    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(field_changed("a", "s2", json!(1))).unwrap();
    tx.send(field_changed("b", "s3", json!(2))).unwrap();

    assert_eq!(ctx.pump(&mut rx), 2);
    assert_eq!(ctx.owner_of("b"), Some("s3"));
    assert_eq!(ctx.pump(&mut rx), 0);
}

#[test]
fn ownership_requests_fan_out_over_derived_ids() {
    let (mut ctx, recorder) = context();
    ctx.register_direct("door", &FieldValue::Boolean(false)).unwrap();
    ctx.register_property("cube", "position", &FieldValue::Vector3(frames::Vector3::ZERO))
        .unwrap();
    ctx.register_property("cube", "rotation", &FieldValue::Quaternion(frames::Quaternion::IDENTITY))
        .unwrap();
    recorder.take();

    assert_eq!(ctx.claim_ownership("door").unwrap(), 1);
    assert_eq!(ctx.claim_ownership("cube").unwrap(), 2);
    let sent = recorder.take();
    assert!(sent.iter().all(|f| f.syscall == CLAIM_OWNERSHIP));
    let ids: Vec<_> = sent.iter().map(|f| f.data["id"].clone()).collect();
    assert_eq!(
        ids,
        vec![json!("door"), json!(construct_key("cube", "position")), json!(construct_key("cube", "rotation"))]
    );

    assert_eq!(ctx.release_ownership("door").unwrap(), 1);
    assert_eq!(recorder.take()[0].syscall, RELEASE_OWNERSHIP);
    assert_eq!(ctx.release_ownership("nothing").unwrap(), 0);
    assert!(recorder.take().is_empty());
}

#[test]
fn broadcast_event_runs_handler_and_skips_repeats() {
    let (mut ctx, recorder) = context();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ctx.on_event("hover", move |sender, value| {
        sink.lock().unwrap().push((sender.to_owned(), value.clone()));
    });

    assert!(ctx.broadcast_event("hover", json!({"on": true})).unwrap());
    assert!(!ctx.broadcast_event("hover", json!({"on": true})).unwrap());
    assert!(ctx.broadcast_event("hover", json!({"on": false})).unwrap());

    let sent = recorder.take();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].syscall, BROADCAST_EVENT);
    assert_eq!(sent[0].data["senderID"], json!("me"));
    assert_eq!(sent[0].data["value"], json!({"key": "hover", "on": true}));

    // Repeats neither reach the local handler nor the room.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "me");
    assert_eq!(seen[1].1, json!({"key": "hover", "on": false}));
}

#[test]
fn scalar_event_payload_travels_under_data() {
    let (mut ctx, recorder) = context();
    ctx.broadcast_event("score", json!(5)).unwrap();
    assert_eq!(recorder.take()[0].data["value"], json!({"key": "score", "data": 5}));
}

#[test]
fn relayed_events_dispatch_by_key() {
    let (mut ctx, _) = context();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ctx.on_event("hover", move |sender, _| sink.lock().unwrap().push(sender.to_owned()));

    ctx.apply_frame(&server_frame(BROADCAST_EVENT, json!({"senderID": "s2", "value": {"key": "hover"}})));
    ctx.apply_frame(&server_frame(BROADCAST_EVENT, json!({"senderID": "me", "value": {"key": "hover"}})));
    ctx.apply_frame(&server_frame(BROADCAST_EVENT, json!({"senderID": "s3", "value": {"key": "other"}})));

    assert_eq!(*seen.lock().unwrap(), vec!["s2".to_owned()]);
}

#[test]
fn outbound_frames_carry_room_after_join() {
    let (mut ctx, recorder) = context();
    ctx.apply_frame(&{
        let mut reply = server_frame(
            protocol::JOIN_ROOM,
            json!({"room_id": "R", "session_id": "me", "fields": [], "entities": {}}),
        );
        reply.status = Status::Done;
        reply
    });

    let mut data = Map::new();
    data.insert("entityID".into(), json!("me"));
    ctx.add_entity("player", data).unwrap();
    ctx.remove_entity("player", "me").unwrap();

    let sent = recorder.take();
    assert_eq!(sent[0].syscall, protocol::ADD_ENTITY);
    assert_eq!(sent[0].room_id.as_deref(), Some("R"));
    assert_eq!(sent[0].data, json!({"type": "player", "data": {"entityID": "me"}}));
    assert_eq!(sent[1].syscall, protocol::REMOVE_ENTITY);
}
