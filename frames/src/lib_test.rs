use super::*;

fn sample_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        parent_id: Some("parent-1".to_owned()),
        ts: 42,
        room_id: Some("lobby".to_owned()),
        from: Some("session-1".to_owned()),
        syscall: "updateProperty".to_owned(),
        status: Status::Done,
        data: serde_json::json!({
            "x": 1.25,
            "ok": true,
            "tags": ["a", "b"],
            "nested": {"k": "v"},
            "nil": null
        }),
    }
}

fn encode_wire(wire: &WireFrame) -> Vec<u8> {
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");
    bytes
}

#[test]
fn status_numeric_mapping_matches_wire_enum() {
    assert_eq!(Status::Request.as_i32(), 0);
    assert_eq!(Status::Done.as_i32(), 1);
    assert_eq!(Status::Error.as_i32(), 2);
}

#[test]
fn status_round_trips_from_wire_values() {
    assert_eq!(Status::from_i32(0).expect("status"), Status::Request);
    assert_eq!(Status::from_i32(1).expect("status"), Status::Done);
    assert_eq!(Status::from_i32(2).expect("status"), Status::Error);
}

#[test]
fn status_from_wire_rejects_out_of_range_value() {
    let err = Status::from_i32(99).expect_err("status should be invalid");
    assert!(matches!(err, CodecError::InvalidStatus(99)));
    assert!(matches!(Status::from_i32(4), Err(CodecError::InvalidStatus(4))));
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = sample_frame();
    let bytes = encode_frame(&frame);
    assert!(!bytes.is_empty());
    let decoded = decode_frame(&bytes).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_status() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        syscall: "ping".to_owned(),
        status: 77,
        data: Some(json_to_proto_value(&serde_json::json!({}))),
    };

    let err = decode_frame(&encode_wire(&wire)).expect_err("status should fail");
    assert!(matches!(err, CodecError::InvalidStatus(77)));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        syscall: "leaveRoom".to_owned(),
        status: Status::Request.as_i32(),
        data: None,
    };

    let frame = decode_frame(&encode_wire(&wire)).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        syscall: "ping".to_owned(),
        status: Status::Request.as_i32(),
        data: Some(prost_types::Value { kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)) }),
    };

    let frame = decode_frame(&encode_wire(&wire)).expect("decode");
    assert_eq!(frame.data, Value::Null);
}

#[test]
fn integral_numbers_come_back_as_integers() {
    let mut frame = sample_frame();
    frame.data = serde_json::json!({"id": "cube", "version": 7, "value": {"x": 1, "y": 0.5}});

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data["version"].as_u64(), Some(7));
    assert_eq!(decoded.data["value"]["x"].as_i64(), Some(1));
    assert_eq!(decoded.data["value"]["y"].as_f64(), Some(0.5));
}

#[test]
fn typed_payload_survives_binary_trip() {
    let payload = protocol::UpdateProperty {
        id: protocol::construct_key("cube", "position"),
        value: serde_json::json!({"x": 1.0, "y": 0.0, "z": -2.5}),
        kind: FieldKind::Vector3,
        version: Some(3),
    };
    let mut frame = sample_frame();
    frame.data = serde_json::to_value(&payload).expect("serialize");

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    let restored: protocol::UpdateProperty = serde_json::from_value(decoded.data).expect("payload");
    assert_eq!(restored.id, payload.id);
    assert_eq!(restored.version, Some(3));
    assert_eq!(
        FieldValue::from_json(restored.kind, &restored.value).expect("value"),
        FieldValue::Vector3(Vector3::new(1.0, 0.0, -2.5))
    );
}

#[test]
fn status_serializes_as_lowercase_json() {
    assert_eq!(serde_json::to_string(&Status::Request).expect("serialize"), "\"request\"");
}

#[test]
fn status_rejects_non_lowercase_json() {
    assert!(serde_json::from_str::<Status>("\"Error\"").is_err());
    assert_eq!(serde_json::from_str::<Status>("\"error\"").expect("deserialize"), Status::Error);
}
