/// Error type for binding and connection operations.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// The WebSocket connection or handshake failed.
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The connection is gone; outbound frames have nowhere to go.
    #[error("websocket closed")]
    WsClosed,
    /// A binary frame could not be decoded.
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    /// No expected frame arrived before the deadline.
    #[error("timed out waiting for frame")]
    Timeout,
    /// The server answered a request with an error frame.
    #[error("server returned error for {syscall}: {message}")]
    ServerError { syscall: String, message: String },
    /// A server frame did not have the expected shape.
    #[error("unexpected payload for {syscall}: {reason}")]
    Protocol { syscall: String, reason: String },
}
