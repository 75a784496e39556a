use frames::{FieldValue, Quaternion, Transform, Vector3};

use super::*;

fn record(id: &str, value: FieldValue) -> FieldRecord {
    FieldRecord::new(id, value)
}

#[test]
fn new_store_is_empty() {
    let store = FieldStore::new();
    assert!(store.is_empty());
    for kind in FieldKind::SEARCH_ORDER {
        assert_eq!(store.collection(kind).kind(), kind);
        assert!(store.collection(kind).is_empty());
    }
}

#[test]
fn set_places_record_in_matching_collection() {
    let mut store = FieldStore::new();
    store
        .set(record("cube", FieldValue::Vector3(Vector3::new(1.0, 2.0, 3.0))))
        .unwrap();

    assert!(store.has(FieldKind::Vector3, "cube"));
    assert!(!store.has(FieldKind::Number, "cube"));
    let found = store.get(FieldKind::Vector3, "cube").unwrap();
    assert_eq!(found.value, FieldValue::Vector3(Vector3::new(1.0, 2.0, 3.0)));
    assert_eq!(found.owner, "");
}

#[test]
fn find_by_key_returns_unique_record_or_none() {
    let mut store = FieldStore::new();
    store.set(record("score", FieldValue::Number(1.0))).unwrap();
    store
        .set(record("rig", FieldValue::Transform(Transform::default())))
        .unwrap();
    store
        .set(record("spin", FieldValue::Quaternion(Quaternion::IDENTITY)))
        .unwrap();

    assert_eq!(store.find_by_key("score").map(FieldRecord::kind), Some(FieldKind::Number));
    assert_eq!(store.find_by_key("rig").map(FieldRecord::kind), Some(FieldKind::Transform));
    assert_eq!(store.find_by_key("spin").map(FieldRecord::kind), Some(FieldKind::Quaternion));
    assert!(store.find_by_key("missing").is_none());
}

#[test]
fn id_cannot_move_to_another_collection() {
    let mut store = FieldStore::new();
    store.set(record("flag", FieldValue::Boolean(true))).unwrap();

    let err = store
        .set(record("flag", FieldValue::String("yes".into())))
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::KindConflict { id: "flag".into(), existing: FieldKind::Boolean, incoming: FieldKind::String }
    );
    assert_eq!(store.len(), 1);
    assert!(!store.has(FieldKind::String, "flag"));
}

#[test]
fn every_set_is_logged_in_order() {
    let mut store = FieldStore::new();
    store.set(record("a", FieldValue::Number(1.0))).unwrap();
    store.set(record("b", FieldValue::Boolean(false))).unwrap();
    let mut a = store.get(FieldKind::Number, "a").unwrap().clone();
    a.value = FieldValue::Number(2.0);
    a.version += 1;
    store.set(a).unwrap();

    let changes = store.drain_changes();
    let ids: Vec<&str> = changes.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "a"]);
    assert_eq!(changes[2].value, FieldValue::Number(2.0));
    assert!(store.drain_changes().is_empty());
}

#[test]
fn rejected_set_is_not_logged() {
    let mut store = FieldStore::new();
    store.set(record("x", FieldValue::Number(0.0))).unwrap();
    store.drain_changes();

    assert!(store.set(record("x", FieldValue::Boolean(true))).is_err());
    assert!(store.drain_changes().is_empty());
}

#[test]
fn release_owned_by_clears_only_that_session() {
    let mut store = FieldStore::new();
    let mut mine = record("mine", FieldValue::Number(1.0));
    mine.owner = "s1".into();
    let mut theirs = record("theirs", FieldValue::Number(1.0));
    theirs.owner = "s2".into();
    store.set(mine).unwrap();
    store.set(theirs).unwrap();
    store.set(record("free", FieldValue::Number(1.0))).unwrap();
    store.drain_changes();

    let released = store.release_owned_by("s1");
    assert_eq!(released, ["mine"]);

    let mine = store.find_by_key("mine").unwrap();
    assert_eq!(mine.owner, "");
    assert_eq!(mine.version, 2);
    assert_eq!(store.find_by_key("theirs").unwrap().owner, "s2");

    let changes = store.drain_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].id, "mine");
}

#[test]
fn records_cover_every_collection() {
    let mut store = FieldStore::new();
    store.set(record("n", FieldValue::Number(1.0))).unwrap();
    store.set(record("s", FieldValue::String("x".into()))).unwrap();
    store
        .set(record("v", FieldValue::Vector3(Vector3::ZERO)))
        .unwrap();

    let mut ids: Vec<&str> = store.records().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["n", "s", "v"]);
    assert_eq!(store.len(), 3);
}
