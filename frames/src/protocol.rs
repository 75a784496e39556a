//! Protocol vocabulary: message names and typed payloads.
//!
//! Message names travel in `Frame::syscall`. Payload structs mirror the JSON
//! carried in `Frame::data`; field names follow the client wire format
//! (`entityID`, `senderID`, `type`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value::{FieldKind, FieldRecord};

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

pub const JOIN_ROOM: &str = "joinRoom";
pub const LEAVE_ROOM: &str = "leaveRoom";
pub const ADD_ENTITY: &str = "addEntity";
pub const UPDATE_ENTITY: &str = "updateEntity";
pub const REMOVE_ENTITY: &str = "removeEntity";
pub const ADD_FIELD_DATA: &str = "addFieldData";
pub const UPDATE_FIELD: &str = "updateField";
pub const UPDATE_PROPERTY: &str = "updateProperty";
pub const CLAIM_OWNERSHIP: &str = "claimOwnership";
pub const RELEASE_OWNERSHIP: &str = "releaseOwnership";
pub const BROADCAST_EVENT: &str = "broadcastEvent";
pub const PING: &str = "ping";

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

pub const CONNECTED: &str = "connected";
pub const PONG: &str = "pong";
pub const FIELD_CHANGED: &str = "fieldChanged";
pub const ENTITY_ADDED: &str = "entityAdded";
pub const ENTITY_CHANGED: &str = "entityChanged";
pub const ENTITY_REMOVED: &str = "entityRemoved";
pub const PEER_JOINED: &str = "peerJoined";
pub const PEER_LEFT: &str = "peerLeft";
pub const GATEWAY_ERROR: &str = "gateway:error";

/// Separator between object key and property key in derived field ids.
pub const KEY_SEPARATOR: char = '\x1F';

/// Build the field id for one tracked property of a bound object.
#[must_use]
pub fn construct_key(object_key: &str, property_key: &str) -> String {
    format!("{object_key}{KEY_SEPARATOR}{property_key}")
}

/// Split a derived field id into `(object_key, property_key)`.
/// Bare ids come back with no property.
#[must_use]
pub fn parse_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once(KEY_SEPARATOR) {
        Some((object, property)) if !property.contains(KEY_SEPARATOR) => (object, Some(property)),
        _ => (key, None),
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoom {
    pub room_id: String,
}

/// `addEntity` / `updateEntity` / `removeEntity` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMessage {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data: Map<String, Value>,
}

impl EntityMessage {
    /// The `entityID` carried in the inner data, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entityID").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddFieldData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateField {
    pub field: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProperty {
    pub id: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// `claimOwnership` / `releaseOwnership` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipRequest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    pub value: Value,
}

impl BroadcastEvent {
    /// Event key used to route the relay to a handler.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.value.get("key").and_then(Value::as_str)
    }
}

/// `fieldChanged` notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChanged {
    pub field: FieldRecord,
}

/// `entityAdded` / `entityChanged` notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChanged {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub entity: Value,
}

/// `entityRemoved` notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRemoved {
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(rename = "entityID")]
    pub entity_id: String,
}

/// Reply to `joinRoom`: everything a late joiner needs to catch up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub session_id: String,
    pub fields: Vec<FieldRecord>,
    pub entities: Map<String, Value>,
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
