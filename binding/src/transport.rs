//! Outbound frame transport.

use frames::{Frame, Status};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BindingError;

/// Sink for frames leaving the client. Sends are fire-and-forget: no reply
/// is awaited.
pub trait Transport: Send {
    /// Queue a frame for the server.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the connection is gone.
    fn send(&self, frame: Frame) -> Result<(), BindingError>;
}

/// Transport backed by an unbounded channel drained by a socket writer task.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Frame) -> Result<(), BindingError> {
        self.tx.send(frame).map_err(|_| BindingError::WsClosed)
    }
}

/// Build a request frame with a generated id.
#[must_use]
pub fn request_frame(syscall: &str, room_id: Option<&str>, data: Value) -> Frame {
    Frame {
        id: uuid::Uuid::new_v4().to_string(),
        parent_id: None,
        ts: 0,
        room_id: room_id.map(ToOwned::to_owned),
        from: None,
        syscall: syscall.to_owned(),
        status: Status::Request,
        data,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_transport_forwards_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport::new(tx);
        transport
            .send(request_frame("ping", Some("R"), serde_json::json!({})))
            .unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.syscall, "ping");
        assert_eq!(frame.room_id.as_deref(), Some("R"));
        assert_eq!(frame.status, Status::Request);
    }

    #[test]
    fn closed_channel_reports_ws_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let err = ChannelTransport::new(tx)
            .send(request_frame("ping", None, serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, BindingError::WsClosed));
    }
}
