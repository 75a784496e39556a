//! Room service: join/part, snapshots and change fan-out.
//!
//! DESIGN
//! ======
//! Rooms are created on first join and kept in memory while any client is
//! connected. Leaving releases the session's fields, drops its player
//! entities and, when the room empties and auto-dispose is on, evicts it.
//!
//! Mutations never broadcast directly. Stores and registries log their
//! changes; [`emit_changes`] drains those logs under the same lock that
//! applied them, so every client sees changes in mutation order.

use frames::protocol::{
    self, EntityChanged, EntityRemoved, FieldChanged, RoomSnapshot, ENTITY_ADDED, ENTITY_CHANGED, ENTITY_REMOVED,
    FIELD_CHANGED, PEER_LEFT,
};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::EntityChange;
use crate::frame::{Data, ErrorCode, Frame, to_data};
use crate::state::{AppState, RoomState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room {room_id} is full ({max} clients)")]
    Full { room_id: String, max: usize },
    #[error("room_id required")]
    MissingRoomId,
    #[error("must join a room first")]
    NotJoined,
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Full { .. } => "E_ROOM_FULL",
            Self::MissingRoomId => "E_ROOM_ID_REQUIRED",
            Self::NotJoined => "E_NOT_IN_ROOM",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Everything a client needs to catch up with a room.
#[must_use]
pub fn snapshot(room: &RoomState, session_id: &str) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room.id.clone(),
        session_id: session_id.to_owned(),
        fields: room.store.records().cloned().collect(),
        entities: room.entities.snapshot(),
    }
}

/// Join a room, creating it if needed. Returns the room snapshot.
///
/// # Errors
///
/// Returns `Full` when the room already holds `max_clients` clients.
pub async fn join_room(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<RoomSnapshot, RoomError> {
    let max = state.config.max_clients;
    let mut rooms = state.rooms.write().await;
    let room = rooms
        .entry(room_id.to_owned())
        .or_insert_with(|| RoomState::new(room_id));

    if room.clients.len() >= max {
        return Err(RoomError::Full { room_id: room_id.to_owned(), max });
    }

    room.clients.insert(client_id, tx);
    info!(%room_id, %client_id, clients = room.clients.len(), "client joined room");
    Ok(snapshot(room, &client_id.to_string()))
}

/// Leave a room. Notifies peers, releases the session's fields, drops its
/// player entities and evicts the room when it empties.
pub async fn part_room(state: &AppState, room_id: &str, client_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return;
    };
    if room.clients.remove(&client_id).is_none() {
        return;
    }

    let session_id = client_id.to_string();
    let left = Frame::request(PEER_LEFT, Data::new())
        .with_room_id(room_id)
        .with_data("session_id", session_id.clone());
    broadcast_in(room, &left, None);

    if state.config.release_on_leave {
        let released = room.store.release_owned_by(&session_id);
        if !released.is_empty() {
            info!(%room_id, %session_id, count = released.len(), "released fields of departed session");
        }
    }
    let removed = room.entities.remove_for_session(&session_id);
    if !removed.is_empty() {
        info!(%room_id, %session_id, count = removed.len(), "removed entities of departed session");
    }
    emit_changes(room);

    info!(%room_id, %client_id, remaining = room.clients.len(), "client left room");

    if room.clients.is_empty() && state.config.auto_dispose {
        rooms.remove(room_id);
        info!(%room_id, "disposed empty room");
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Send a frame to every client in a locked room, optionally excluding one.
pub fn broadcast_in(room: &RoomState, frame: &Frame, exclude: Option<Uuid>) {
    for (client_id, tx) in &room.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: a full channel drops the frame for that client.
        if tx.try_send(frame.clone()).is_err() {
            debug!(room_id = %room.id, %client_id, syscall = %frame.syscall, "dropped frame for slow client");
        }
    }
}

/// Broadcast a frame to all clients in a room, optionally excluding one.
pub async fn broadcast(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(room_id) else {
        return;
    };
    broadcast_in(room, frame, exclude);
}

/// Drain the room's change logs and broadcast one notification per change
/// to every client, sender included.
pub fn emit_changes(room: &mut RoomState) {
    for field in room.store.drain_changes() {
        let frame = Frame::request(FIELD_CHANGED, to_data(&FieldChanged { field })).with_room_id(room.id.clone());
        broadcast_in(room, &frame, None);
    }

    for change in room.entities.drain_changes() {
        let (syscall, data) = match change {
            EntityChange::Added { entity_type, entity } => (ENTITY_ADDED, to_data(&EntityChanged { entity_type, entity })),
            EntityChange::Changed { entity_type, entity } => {
                (ENTITY_CHANGED, to_data(&EntityChanged { entity_type, entity }))
            }
            EntityChange::Removed { entity_type, entity_id } => {
                (ENTITY_REMOVED, to_data(&EntityRemoved { entity_type, entity_id }))
            }
        };
        let frame = Frame::request(syscall, data).with_room_id(room.id.clone());
        broadcast_in(room, &frame, None);
    }
}

/// Relay a `broadcastEvent` payload to every client in the room.
pub fn relay_event(room: &RoomState, event: protocol::BroadcastEvent) {
    let frame = Frame::request(protocol::BROADCAST_EVENT, to_data(&event)).with_room_id(room.id.clone());
    broadcast_in(room, &frame, None);
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
