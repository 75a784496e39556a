use super::*;
use serde_json::json;

#[test]
fn kind_wire_names_match_client_vocabulary() {
    assert_eq!(serde_json::to_value(FieldKind::Number).unwrap(), json!("number"));
    assert_eq!(serde_json::to_value(FieldKind::Boolean).unwrap(), json!("boolean"));
    assert_eq!(serde_json::to_value(FieldKind::String).unwrap(), json!("string"));
    assert_eq!(serde_json::to_value(FieldKind::Vector3).unwrap(), json!("Vector3"));
    assert_eq!(serde_json::to_value(FieldKind::Quaternion).unwrap(), json!("Quaternion"));
    assert_eq!(serde_json::to_value(FieldKind::Transform).unwrap(), json!("Transform"));
}

#[test]
fn kind_from_str_agrees_with_as_str() {
    for kind in FieldKind::SEARCH_ORDER {
        assert_eq!(kind.as_str().parse::<FieldKind>().unwrap(), kind);
    }
    assert_eq!(
        "object".parse::<FieldKind>().unwrap_err(),
        ValueError::UnknownKind("object".into())
    );
}

#[test]
fn search_order_starts_with_transforms_and_covers_every_kind() {
    assert_eq!(FieldKind::SEARCH_ORDER[0], FieldKind::Transform);
    assert_eq!(FieldKind::SEARCH_ORDER[5], FieldKind::Quaternion);
    let unique: std::collections::HashSet<_> = FieldKind::SEARCH_ORDER.iter().collect();
    assert_eq!(unique.len(), 6);
}

#[test]
fn primitives_parse_from_matching_json() {
    assert_eq!(FieldValue::from_json(FieldKind::Number, &json!(2.5)).unwrap(), FieldValue::Number(2.5));
    assert_eq!(FieldValue::from_json(FieldKind::Number, &json!(3)).unwrap(), FieldValue::Number(3.0));
    assert_eq!(FieldValue::from_json(FieldKind::Boolean, &json!(true)).unwrap(), FieldValue::Boolean(true));
    assert_eq!(
        FieldValue::from_json(FieldKind::String, &json!("hi")).unwrap(),
        FieldValue::String("hi".into())
    );
}

#[test]
fn mismatched_json_is_rejected() {
    let err = FieldValue::from_json(FieldKind::Number, &json!("7")).unwrap_err();
    assert_eq!(err, ValueError::TypeMismatch { expected: FieldKind::Number, found: "string".into() });

    assert!(FieldValue::from_json(FieldKind::Boolean, &json!(1)).is_err());
    assert!(FieldValue::from_json(FieldKind::Vector3, &json!(1.0)).is_err());
    assert!(FieldValue::from_json(FieldKind::Vector3, &json!([1, 2, 3])).is_err());
    assert!(FieldValue::from_json(FieldKind::Quaternion, &json!({"x": "a"})).is_err());
}

#[test]
fn composites_fill_missing_components_with_defaults() {
    let v = FieldValue::from_json(FieldKind::Vector3, &json!({"x": 1})).unwrap();
    assert_eq!(v, FieldValue::Vector3(Vector3::new(1.0, 0.0, 0.0)));

    let q = FieldValue::from_json(FieldKind::Quaternion, &json!({})).unwrap();
    assert_eq!(q, FieldValue::Quaternion(Quaternion::IDENTITY));

    let t = FieldValue::from_json(FieldKind::Transform, &json!({"position": {"y": 2}})).unwrap();
    let FieldValue::Transform(t) = t else { panic!("expected transform") };
    assert_eq!(t.position, Vector3::new(0.0, 2.0, 0.0));
    assert_eq!(t.rotation, Quaternion::IDENTITY);
    assert_eq!(t.scaling, Vector3::ONE);
}

#[test]
fn to_json_parses_back_to_the_same_value() {
    let values = [
        FieldValue::Number(-4.0),
        FieldValue::Boolean(false),
        FieldValue::String("abc".into()),
        FieldValue::Vector3(Vector3::new(1.0, 2.0, 3.0)),
        FieldValue::Quaternion(Quaternion::new(0.0, 0.7, 0.0, 0.7)),
        FieldValue::Transform(Transform::default()),
    ];
    for value in values {
        let back = FieldValue::from_json(value.kind(), &value.to_json()).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn new_record_is_unowned_at_version_one() {
    let record = FieldRecord::new("score", FieldValue::Number(0.0));
    assert_eq!(record.owner, "");
    assert_eq!(record.version, 1);
    assert!(!record.is_owned());
    assert!(!record.is_owned_by(""));
    assert_eq!(record.kind(), FieldKind::Number);
}

#[test]
fn record_serializes_with_type_tag() {
    let mut record = FieldRecord::new("cube", FieldValue::Vector3(Vector3::new(1.0, 2.0, 3.0)));
    record.owner = "s1".into();
    record.version = 4;

    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["type"], json!("Vector3"));
    assert_eq!(value["value"], json!({"x": 1.0, "y": 2.0, "z": 3.0}));
    assert_eq!(value["owner"], json!("s1"));

    let back: FieldRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back, record);
    assert!(back.is_owned_by("s1"));
}

#[test]
fn record_deserialization_rejects_mismatched_value() {
    let result = serde_json::from_value::<FieldRecord>(json!({
        "id": "flag",
        "type": "boolean",
        "value": "yes",
    }));
    assert!(result.is_err());
}
