//! WebSocket connection to a collabxr server.
//!
//! `connect` performs the handshake synchronously (wait for `connected`,
//! send `joinRoom`, wait for the snapshot), then hands the socket to two
//! tasks: a writer draining the outbound channel and a reader decoding
//! binary frames into the inbound channel.

use std::time::Duration;

use frames::protocol::{CONNECTED, JOIN_ROOM, RoomSnapshot};
use frames::{Frame, Status};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::BindingError;
use crate::transport::{ChannelTransport, request_frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A joined room: session id, join snapshot and both frame channels.
pub struct Connection {
    pub session_id: String,
    pub snapshot: RoomSnapshot,
    pub transport: ChannelTransport,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

impl Connection {
    /// Open `url` (e.g. `ws://127.0.0.1:2567/api/ws`) and join `room_id`.
    ///
    /// # Errors
    ///
    /// Returns handshake, timeout, decode or server errors.
    pub async fn connect(url: &str, room_id: &str) -> Result<Self, BindingError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BindingError::WsConnect(Box::new(e)))?;
        let (mut write, mut read) = stream.split();

        let session_id = loop {
            let frame = recv_next(&mut read, HANDSHAKE_TIMEOUT).await?;
            if frame.syscall == CONNECTED {
                break frame
                    .data
                    .get("session_id")
                    .and_then(serde_json::Value::as_str)
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| protocol_error(CONNECTED, "missing session_id"))?;
            }
        };

        let join = request_frame(JOIN_ROOM, Some(room_id), json!({ "room_id": room_id }));
        send(&mut write, &join).await?;

        // Notifications may overtake the join reply; keep them for the caller.
        let mut early = Vec::new();
        let snapshot = loop {
            let frame = recv_next(&mut read, HANDSHAKE_TIMEOUT).await?;
            if frame.parent_id.as_deref() != Some(join.id.as_str()) {
                early.push(frame);
                continue;
            }
            if frame.status == Status::Error {
                let message = frame
                    .data
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("request failed")
                    .to_owned();
                return Err(BindingError::ServerError { syscall: frame.syscall, message });
            }
            break serde_json::from_value::<RoomSnapshot>(frame.data)
                .map_err(|e| protocol_error(JOIN_ROOM, &e.to_string()))?;
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        for frame in early {
            let _ = in_tx.send(frame);
        }
        tokio::spawn(write_loop(write, out_rx));
        tokio::spawn(read_loop(read, in_tx));

        info!(%session_id, %room_id, fields = snapshot.fields.len(), "joined room");
        Ok(Self { session_id, snapshot, transport: ChannelTransport::new(out_tx), inbound: in_rx })
    }

    /// Build a context seeded with the join snapshot, plus the inbound
    /// receiver to `pump` it from.
    #[must_use]
    pub fn into_context(self) -> (SyncContext, mpsc::UnboundedReceiver<Frame>) {
        let mut ctx = SyncContext::new(self.session_id, Box::new(self.transport));
        ctx.apply_snapshot(&self.snapshot);
        (ctx, self.inbound)
    }
}

fn protocol_error(syscall: &str, reason: &str) -> BindingError {
    BindingError::Protocol { syscall: syscall.to_owned(), reason: reason.to_owned() }
}

async fn send(write: &mut SplitSink<WsStream, Message>, frame: &Frame) -> Result<(), BindingError> {
    write
        .send(Message::Binary(frames::encode_frame(frame).into()))
        .await
        .map_err(|e| BindingError::WsConnect(Box::new(e)))
}

/// Read the next binary frame, skipping other message types.
async fn recv_next(read: &mut SplitStream<WsStream>, deadline: Duration) -> Result<Frame, BindingError> {
    let fut = async {
        loop {
            let Some(msg) = read.next().await else {
                return Err(BindingError::WsClosed);
            };
            match msg.map_err(|e| BindingError::WsConnect(Box::new(e)))? {
                Message::Binary(bytes) => return frames::decode_frame(&bytes).map_err(BindingError::from),
                Message::Close(_) => return Err(BindingError::WsClosed),
                _ => {}
            }
        }
    };

    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| BindingError::Timeout)?
}

async fn write_loop(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = send(&mut write, &frame).await {
            warn!(error = %e, syscall = %frame.syscall, "send failed, closing writer");
            break;
        }
    }
    let _ = write.close().await;
}

async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::UnboundedSender<Frame>) {
    while let Some(msg) = read.next().await {
        let bytes = match msg {
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        };
        match frames::decode_frame(&bytes) {
            Ok(frame) => {
                if tx.send(frame).is_err() {
                    break;
                }
            }
            Err(e) => debug!(error = %e, "undecodable frame dropped"),
        }
    }
    debug!("reader finished");
}

#[cfg(test)]
#[path = "net_test.rs"]
mod tests;
