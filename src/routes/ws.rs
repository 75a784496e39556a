//! WebSocket handler: protocol dispatch for one client connection.
//!
//! DESIGN
//! ======
//! On upgrade, generates a session id and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by exact syscall name
//! - Notification frames from the room → forward to client
//!
//! Handlers are business logic: they validate, mutate room state and return
//! an `Outcome`. The dispatch layer owns outbound concerns: the reply to the
//! sender, peer notifications, and draining the room's change log while the
//! room lock is still held.
//!
//! ENCODING
//! ========
//! Frames arrive as JSON text or protobuf binary. Replies and notifications
//! use the encoding of the most recent inbound frame; before the first one
//! it is binary, or JSON with `?format=json` on the upgrade URL.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with `session_id`
//! 2. `joinRoom` → snapshot reply, `peerJoined` to peers
//! 3. Room messages → dispatch → Outcome + change notifications
//! 4. `leaveRoom` or close → `peerLeft`, ownership release, cleanup

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use frames::protocol::{
    AddFieldData, BroadcastEvent, EntityMessage, FieldChanged, JoinRoom, OwnershipRequest, UpdateField, UpdateProperty,
    ADD_ENTITY, ADD_FIELD_DATA, BROADCAST_EVENT, CLAIM_OWNERSHIP, CONNECTED, GATEWAY_ERROR, JOIN_ROOM, LEAVE_ROOM,
    PEER_JOINED, PING, PONG, RELEASE_OWNERSHIP, REMOVE_ENTITY, UPDATE_ENTITY, UPDATE_FIELD, UPDATE_PROPERTY,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame, Status, to_data};
use crate::services::room::{self, RoomError};
use crate::services::{Actor, entity, field};
use crate::state::{AppState, RoomState};

// =============================================================================
// TYPES
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Echo the request payload back as `pong`.
    Pong,
    /// Reply to sender, and send a notification to room peers.
    ReplyAndNotify { reply: Data, syscall: &'static str, notify: Data },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Json,
    Binary,
}

/// Per-connection context.
struct Session {
    client_id: Uuid,
    session_id: String,
    room_id: Option<String>,
    tx: mpsc::Sender<Frame>,
}

impl Session {
    fn new(client_id: Uuid, tx: mpsc::Sender<Frame>) -> Self {
        Self { client_id, session_id: client_id.to_string(), room_id: None, tx }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid payload: {0}")]
struct InvalidPayload(serde_json::Error);

impl ErrorCode for InvalidPayload {
    fn error_code(&self) -> &'static str {
        "E_INVALID_PAYLOAD"
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let encoding = match params.get("format").map(String::as_str) {
        Some("json") => Encoding::Json,
        _ => Encoding::Binary,
    };
    ws.on_upgrade(move |socket| run_ws(socket, state, encoding))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, mut encoding: Encoding) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);
    let mut session = Session::new(client_id, client_tx);

    let welcome = Frame::request(CONNECTED, Data::new()).with_data("session_id", session.session_id.clone());
    if send_frame(&mut socket, &welcome, encoding).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let replies = match msg {
                    Message::Text(text) => {
                        encoding = Encoding::Json;
                        process_inbound_text(&state, &mut session, &text).await
                    }
                    Message::Binary(bytes) => {
                        encoding = Encoding::Binary;
                        process_inbound_bytes(&state, &mut session, &bytes).await
                    }
                    Message::Close(_) => break,
                    _ => continue,
                };
                if send_all(&mut socket, &replies, encoding).await.is_err() {
                    break;
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame, encoding).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(room_id) = session.room_id.take() {
        room::part_room(&state, &room_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse one JSON text frame, process it and return frames for the sender.
async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Frame> {
    match serde_json::from_str::<Frame>(text) {
        Ok(req) => process_inbound(state, session, req).await,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            vec![gateway_error(format!("invalid json: {e}"))]
        }
    }
}

/// Parse one protobuf frame, process it and return frames for the sender.
async fn process_inbound_bytes(state: &AppState, session: &mut Session, bytes: &[u8]) -> Vec<Frame> {
    let parsed = frames::decode_frame(bytes)
        .map_err(|e| e.to_string())
        .and_then(|wire| Frame::try_from(wire).map_err(|e| e.to_string()));
    match parsed {
        Ok(req) => process_inbound(state, session, req).await,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            vec![gateway_error(format!("invalid frame: {e}"))]
        }
    }
}

fn gateway_error(message: String) -> Frame {
    Frame::request(GATEWAY_ERROR, Data::new()).with_data("message", message)
}

/// Dispatch a parsed request and apply its outcome.
async fn process_inbound(state: &AppState, session: &mut Session, mut req: Frame) -> Vec<Frame> {
    // The server, not the client, decides who sent a frame.
    req.from = Some(session.session_id.clone());

    if req.syscall != PING {
        debug!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match req.syscall.as_str() {
        PING => Ok(Outcome::Pong),
        JOIN_ROOM => handle_join(state, session, &req).await,
        LEAVE_ROOM => handle_leave(state, session, &req).await,
        ADD_ENTITY | UPDATE_ENTITY | REMOVE_ENTITY | ADD_FIELD_DATA | UPDATE_FIELD | UPDATE_PROPERTY
        | CLAIM_OWNERSHIP | RELEASE_OWNERSHIP | BROADCAST_EVENT => handle_room_message(state, session, &req).await,
        other => Err(req.error(format!("unknown syscall: {other}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Pong) => {
            let mut pong = req.done_with(req.data.clone());
            pong.syscall = PONG.to_owned();
            vec![pong]
        }
        Ok(Outcome::ReplyAndNotify { reply, syscall, notify }) => {
            let mut sender_frame = req.done_with(reply);
            if let Some(room_id) = &session.room_id {
                sender_frame.room_id = Some(room_id.clone());
                let notification = Frame::request(syscall, notify).with_room_id(room_id.clone());
                room::broadcast(state, room_id, &notification, Some(session.client_id)).await;
            }
            vec![sender_frame]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// ROOM CONTROL
// =============================================================================

async fn handle_join(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = req
        .payload::<JoinRoom>()
        .ok()
        .map(|join| join.room_id)
        .or_else(|| req.room_id.clone())
        .filter(|id| !id.is_empty())
    else {
        return Err(req.error_from(&RoomError::MissingRoomId));
    };

    // Re-joining the current room just refreshes the snapshot.
    if session.room_id.as_deref() == Some(room_id.as_str()) {
        let rooms = state.rooms.read().await;
        if let Some(current) = rooms.get(&room_id) {
            return Ok(Outcome::Reply(to_data(&room::snapshot(current, &session.session_id))));
        }
    }

    // Join first so a rejected switch leaves the current membership intact.
    let snapshot = room::join_room(state, &room_id, session.client_id, session.tx.clone())
        .await
        .map_err(|e| req.error_from(&e))?;
    if let Some(old_room) = session.room_id.replace(room_id) {
        room::part_room(state, &old_room, session.client_id).await;
    }

    Ok(Outcome::ReplyAndNotify {
        reply: to_data(&snapshot),
        syscall: PEER_JOINED,
        notify: Data::from([("session_id".to_owned(), json!(session.session_id))]),
    })
}

async fn handle_leave(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = session.room_id.take() else {
        return Err(req.error_from(&RoomError::NotJoined));
    };
    room::part_room(state, &room_id, session.client_id).await;
    Ok(Outcome::Done)
}

// =============================================================================
// ROOM MESSAGES
// =============================================================================

/// Apply a room-scoped message under the rooms write lock, then broadcast
/// the changes it produced before releasing the lock.
async fn handle_room_message(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = session.room_id.as_deref() else {
        return Err(req.error_from(&RoomError::NotJoined));
    };

    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return Err(req.error_from(&RoomError::NotJoined));
    };

    let actor = Actor::new(&session.session_id, state.config.enforce_ownership);
    let result = apply_room_message(room, actor, req);
    room::emit_changes(room);
    result
}

fn apply_room_message(room: &mut RoomState, actor: Actor<'_>, req: &Frame) -> Result<Outcome, Frame> {
    match req.syscall.as_str() {
        ADD_FIELD_DATA => {
            let msg: AddFieldData = payload(req)?;
            let created = field::add_field(&mut room.store, &msg).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(Data::from([("created".to_owned(), json!(created))])))
        }
        UPDATE_FIELD => {
            let msg: UpdateField = payload(req)?;
            let field = field::update_field(&mut room.store, actor, &msg).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&FieldChanged { field })))
        }
        UPDATE_PROPERTY => {
            let msg: UpdateProperty = payload(req)?;
            let field = field::update_property(&mut room.store, actor, &msg).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&FieldChanged { field })))
        }
        CLAIM_OWNERSHIP => {
            let msg: OwnershipRequest = payload(req)?;
            let field = field::claim(&mut room.store, actor, &msg.id, msg.version).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&FieldChanged { field })))
        }
        RELEASE_OWNERSHIP => {
            let msg: OwnershipRequest = payload(req)?;
            let field = field::release(&mut room.store, actor, &msg.id).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&FieldChanged { field })))
        }
        ADD_ENTITY => {
            let msg: EntityMessage = payload(req)?;
            let clients = &room.clients;
            let is_peer = |id: &str| Uuid::parse_str(id).is_ok_and(|client_id| clients.contains_key(&client_id));
            let created =
                entity::add_entity(&mut room.entities, actor, &msg, is_peer).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(Data::from([("created".to_owned(), json!(created))])))
        }
        UPDATE_ENTITY => {
            let msg: EntityMessage = payload(req)?;
            let merged = entity::update_entity(&mut room.entities, actor, &msg).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(Data::from([("entity".to_owned(), merged)])))
        }
        REMOVE_ENTITY => {
            let msg: EntityMessage = payload(req)?;
            entity::remove_entity(&mut room.entities, actor, &msg).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        BROADCAST_EVENT => {
            let mut event: BroadcastEvent = payload(req)?;
            event.sender_id = actor.session_id.to_owned();
            room::relay_event(room, event);
            Ok(Outcome::Done)
        }
        other => Err(req.error(format!("unknown syscall: {other}"))),
    }
}

fn payload<T: DeserializeOwned>(req: &Frame) -> Result<T, Frame> {
    req.payload().map_err(|e| req.error_from(&InvalidPayload(e)))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_all(socket: &mut WebSocket, frames: &[Frame], encoding: Encoding) -> Result<(), ()> {
    for frame in frames {
        send_frame(socket, frame, encoding).await?;
    }
    Ok(())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame, encoding: Encoding) -> Result<(), ()> {
    if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }

    let msg = match encoding {
        Encoding::Json => match serde_json::to_string(frame) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => {
                warn!(error = %e, "ws: failed to serialize frame");
                return Err(());
            }
        },
        Encoding::Binary => Message::Binary(frames::encode_frame(&frames::Frame::from(frame)).into()),
    };
    socket.send(msg).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
