//! Per-room client context.
//!
//! DESIGN
//! ======
//! One `SyncContext` per joined room holds everything bindings share:
//! - ownership mirror `field id -> owner`, fed by `fieldChanged` and the join snapshot
//! - the set of directly bound ids and the derived-id table of bound objects
//! - an inbox of remote records, drained by bindings during `sync`
//! - entity collections `type -> entityID -> record`
//! - broadcast-event handlers and the last payload sent per event key
//!
//! The caller drives it: `pump` inbound frames, then `sync` each binding.
//! Outbound messages are fire-and-forget through the [`Transport`].

use std::collections::{BTreeMap, HashMap, HashSet};

use frames::protocol::{
    self, AddFieldData, BroadcastEvent, EntityChanged, EntityMessage, EntityRemoved, FieldChanged, OwnershipRequest,
    RoomSnapshot, UpdateField, UpdateProperty,
};
use frames::{FieldRecord, FieldValue, Frame, Status};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::BindingError;
use crate::transport::{Transport, request_frame};

type EventHandler = Box<dyn FnMut(&str, &Value) + Send>;

/// Client-side mirror of one room.
pub struct SyncContext {
    session_id: String,
    room_id: Option<String>,
    transport: Box<dyn Transport>,
    owners: HashMap<String, String>,
    direct: HashSet<String>,
    /// Derived id -> (object key, property key).
    properties: BTreeMap<String, (String, String)>,
    inbox: HashMap<String, FieldRecord>,
    entities: BTreeMap<String, BTreeMap<String, Value>>,
    handlers: HashMap<String, EventHandler>,
    last_events: HashMap<String, Value>,
}

impl SyncContext {
    #[must_use]
    pub fn new(session_id: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            session_id: session_id.into(),
            room_id: None,
            transport,
            owners: HashMap::new(),
            direct: HashSet::new(),
            properties: BTreeMap::new(),
            inbox: HashMap::new(),
            entities: BTreeMap::new(),
            handlers: HashMap::new(),
            last_events: HashMap::new(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Load a join snapshot: room id, every field and every entity.
    pub fn apply_snapshot(&mut self, snapshot: &RoomSnapshot) {
        self.room_id = Some(snapshot.room_id.clone());
        for record in &snapshot.fields {
            self.accept_record(record.clone());
        }
        self.entities.clear();
        for (entity_type, records) in &snapshot.entities {
            let collection = self.entities.entry(entity_type.clone()).or_default();
            for record in records.as_array().into_iter().flatten() {
                if let Some(id) = record.get("entityID").and_then(Value::as_str) {
                    collection.insert(id.to_owned(), record.clone());
                }
            }
        }
        info!(room_id = %snapshot.room_id, fields = snapshot.fields.len(), "snapshot applied");
    }

    /// Apply one server frame to the mirror.
    pub fn apply_frame(&mut self, frame: &Frame) {
        if frame.status == Status::Error {
            let message = frame
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            let code = frame.data.get("code").and_then(Value::as_str).unwrap_or("-");
            warn!(syscall = %frame.syscall, code, message, "server rejected request");
            return;
        }

        match frame.syscall.as_str() {
            protocol::FIELD_CHANGED => {
                if let Some(FieldChanged { field }) = parse(frame) {
                    self.accept_record(field);
                }
            }
            protocol::ENTITY_ADDED | protocol::ENTITY_CHANGED => {
                if let Some(EntityChanged { entity_type, entity }) = parse(frame) {
                    if let Some(id) = entity.get("entityID").and_then(Value::as_str) {
                        self.entities
                            .entry(entity_type)
                            .or_default()
                            .insert(id.to_owned(), entity.clone());
                    }
                }
            }
            protocol::ENTITY_REMOVED => {
                if let Some(EntityRemoved { entity_type, entity_id }) = parse(frame) {
                    if let Some(collection) = self.entities.get_mut(&entity_type) {
                        collection.remove(&entity_id);
                    }
                }
            }
            protocol::BROADCAST_EVENT => {
                if let Some(event) = parse::<BroadcastEvent>(frame) {
                    self.dispatch_event(&event);
                }
            }
            protocol::JOIN_ROOM if frame.status == Status::Done => {
                if let Some(snapshot) = parse::<RoomSnapshot>(frame) {
                    self.apply_snapshot(&snapshot);
                }
            }
            other => debug!(syscall = other, "frame ignored"),
        }
    }

    /// Apply every frame currently queued on `inbound`. Returns how many.
    pub fn pump(&mut self, inbound: &mut mpsc::UnboundedReceiver<Frame>) -> usize {
        let mut applied = 0;
        while let Ok(frame) = inbound.try_recv() {
            self.apply_frame(&frame);
            applied += 1;
        }
        applied
    }

    fn accept_record(&mut self, record: FieldRecord) {
        self.owners.insert(record.id.clone(), record.owner.clone());
        self.inbox.insert(record.id.clone(), record);
    }

    fn dispatch_event(&mut self, event: &BroadcastEvent) {
        // Local handlers already ran when this session sent the event.
        if event.sender_id == self.session_id {
            return;
        }
        let Some(key) = event.key() else {
            debug!(sender_id = %event.sender_id, "event without key ignored");
            return;
        };
        if let Some(handler) = self.handlers.get_mut(key) {
            handler(&event.sender_id, &event.value);
        }
    }

    // =========================================================================
    // OWNERSHIP MIRROR
    // =========================================================================

    /// Current owner of a field as last reported by the server.
    #[must_use]
    pub fn owner_of(&self, id: &str) -> Option<&str> {
        self.owners.get(id).map(String::as_str)
    }

    #[must_use]
    pub fn is_owned_by_me(&self, id: &str) -> bool {
        self.owner_of(id) == Some(self.session_id.as_str())
    }

    /// Take the pending remote record for a field, if any.
    pub fn take_remote(&mut self, id: &str) -> Option<FieldRecord> {
        self.inbox.remove(id)
    }

    // =========================================================================
    // OUTBOUND: FIELDS
    // =========================================================================

    /// Register a directly bound field with the server.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn register_direct(&mut self, id: &str, value: &FieldValue) -> Result<(), BindingError> {
        self.direct.insert(id.to_owned());
        self.send_add_field(id, value)
    }

    /// Register one tracked property of a bound object.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn register_property(&mut self, object_key: &str, property_key: &str, value: &FieldValue) -> Result<(), BindingError> {
        let id = protocol::construct_key(object_key, property_key);
        self.properties
            .insert(id.clone(), (object_key.to_owned(), property_key.to_owned()));
        self.send_add_field(&id, value)
    }

    fn send_add_field(&self, id: &str, value: &FieldValue) -> Result<(), BindingError> {
        let msg = AddFieldData { id: id.to_owned(), kind: value.kind(), value: value.to_json() };
        self.send(protocol::ADD_FIELD_DATA, &msg)
    }

    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn send_update_field(&self, id: &str, value: &FieldValue) -> Result<(), BindingError> {
        let msg = UpdateField { field: id.to_owned(), value: value.to_json(), kind: value.kind(), version: None };
        self.send(protocol::UPDATE_FIELD, &msg)
    }

    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn send_update_property(&self, id: &str, value: &FieldValue) -> Result<(), BindingError> {
        let msg = UpdateProperty { id: id.to_owned(), value: value.to_json(), kind: value.kind(), version: None };
        self.send(protocol::UPDATE_PROPERTY, &msg)
    }

    /// Ask for ownership of `key`. A directly bound id gets one claim;
    /// otherwise every derived id of the object `key` is claimed. Returns
    /// how many claims were sent.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn claim_ownership(&self, key: &str) -> Result<usize, BindingError> {
        self.send_ownership(protocol::CLAIM_OWNERSHIP, key)
    }

    /// Give up ownership of `key`, with the same fan-out as
    /// [`claim_ownership`](Self::claim_ownership).
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn release_ownership(&self, key: &str) -> Result<usize, BindingError> {
        self.send_ownership(protocol::RELEASE_OWNERSHIP, key)
    }

    fn send_ownership(&self, syscall: &str, key: &str) -> Result<usize, BindingError> {
        let ids: Vec<&str> = if self.direct.contains(key) {
            vec![key]
        } else {
            self.properties
                .iter()
                .filter(|(_, (object, _))| object == key)
                .map(|(id, _)| id.as_str())
                .collect()
        };
        if ids.is_empty() {
            debug!(%key, syscall, "no bound field for ownership request");
        }
        for id in &ids {
            self.send(syscall, &OwnershipRequest { id: (*id).to_owned(), version: None })?;
        }
        Ok(ids.len())
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Register the handler for events with `value.key == key`. The handler
    /// receives the sender's session id and the event value.
    pub fn on_event(&mut self, key: impl Into<String>, handler: impl FnMut(&str, &Value) + Send + 'static) {
        self.handlers.insert(key.into(), Box::new(handler));
    }

    /// When the payload differs from the last one sent for `key`, run the
    /// local handler and relay the event to the room. Returns whether it was
    /// relayed.
    ///
    /// Object payloads get `key` inserted; other payloads travel under
    /// `data`.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn broadcast_event(&mut self, key: &str, payload: Value) -> Result<bool, BindingError> {
        let value = match payload {
            Value::Object(mut map) => {
                map.insert("key".to_owned(), Value::String(key.to_owned()));
                Value::Object(map)
            }
            other => json!({"key": key, "data": other}),
        };

        if self.last_events.get(key) == Some(&value) {
            return Ok(false);
        }
        if let Some(handler) = self.handlers.get_mut(key) {
            handler(&self.session_id, &value);
        }

        let event = BroadcastEvent { sender_id: self.session_id.clone(), value: value.clone() };
        self.send(protocol::BROADCAST_EVENT, &event)?;
        self.last_events.insert(key.to_owned(), value);
        Ok(true)
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn add_entity(&self, entity_type: &str, data: Map<String, Value>) -> Result<(), BindingError> {
        self.send(protocol::ADD_ENTITY, &EntityMessage { entity_type: entity_type.to_owned(), data })
    }

    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn update_entity(&self, entity_type: &str, data: Map<String, Value>) -> Result<(), BindingError> {
        self.send(protocol::UPDATE_ENTITY, &EntityMessage { entity_type: entity_type.to_owned(), data })
    }

    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn remove_entity(&self, entity_type: &str, entity_id: &str) -> Result<(), BindingError> {
        let mut data = Map::new();
        data.insert("entityID".to_owned(), Value::String(entity_id.to_owned()));
        self.send(protocol::REMOVE_ENTITY, &EntityMessage { entity_type: entity_type.to_owned(), data })
    }

    #[must_use]
    pub fn entity(&self, entity_type: &str, entity_id: &str) -> Option<&Value> {
        self.entities.get(entity_type)?.get(entity_id)
    }

    /// Entities of one type, ordered by id.
    pub fn entities(&self, entity_type: &str) -> impl Iterator<Item = &Value> {
        self.entities
            .get(entity_type)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn send(&self, syscall: &str, payload: &impl Serialize) -> Result<(), BindingError> {
        let data = serde_json::to_value(payload).map_err(|e| BindingError::Protocol {
            syscall: syscall.to_owned(),
            reason: e.to_string(),
        })?;
        self.transport
            .send(request_frame(syscall, self.room_id.as_deref(), data))
    }
}

fn parse<T: serde::de::DeserializeOwned>(frame: &Frame) -> Option<T> {
    match serde_json::from_value(frame.data.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(syscall = %frame.syscall, error = %e, "malformed server payload");
            None
        }
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
