//! Frame: the server-side message envelope.
//!
//! ARCHITECTURE
//! ============
//! Every protocol message is a Frame. Clients send request frames over the
//! websocket, the server dispatches by exact syscall name, and responses flow
//! back as done/error frames correlated by `parent_id`. Room notifications
//! (`fieldChanged`, `entityAdded`, ...) are server-originated request frames.
//!
//! DESIGN
//! ======
//! - Payload is a `Data` map; nested values are plain JSON.
//! - The wire crate (`frames`) owns the protobuf codec. This module converts
//!   between its string-keyed `frames::Frame` and the typed server frame.
//! - JSON clients may omit `id`, `ts`, `status` and `data`; they are filled
//!   with a fresh id, the receive time, `request` and an empty map.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use frames::Status;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

/// Key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, Value>;

/// The server message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default = "now_ms")]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    pub syscall: String,
    #[serde(default = "request_status")]
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame id: {0}")]
    InvalidId(String),
    #[error("frame data must be a JSON object")]
    DataNotObject,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

fn request_status() -> Status {
    Status::Request
}

impl Frame {
    /// Create a request frame. Also used for server notifications.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            room_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create an empty done response. Terminal.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create a done response carrying a payload. Terminal.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an error response from a plain string. Terminal.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `parent_id`, `room_id`, and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            room_id: self.room_id.clone(),
            from: None,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Decode the payload into a typed protocol struct.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the payload does not match `T`.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.data.clone().into_iter().collect()))
    }
}

/// Flatten a serializable payload into frame data. Non-object values land
/// under a `value` key.
pub fn to_data(payload: &impl Serialize) -> Data {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        Ok(other) => Data::from([("value".to_owned(), other)]),
        Err(_) => Data::new(),
    }
}

// =============================================================================
// WIRE CONVERSION
// =============================================================================

impl From<&Frame> for frames::Frame {
    fn from(frame: &Frame) -> Self {
        let data: Map<String, Value> = frame.data.clone().into_iter().collect();
        Self {
            id: frame.id.to_string(),
            parent_id: frame.parent_id.map(|id| id.to_string()),
            ts: frame.ts,
            room_id: frame.room_id.clone(),
            from: frame.from.clone(),
            syscall: frame.syscall.clone(),
            status: frame.status,
            data: Value::Object(data),
        }
    }
}

impl TryFrom<frames::Frame> for Frame {
    type Error = FrameError;

    fn try_from(wire: frames::Frame) -> Result<Self, Self::Error> {
        let id = if wire.id.is_empty() {
            Uuid::new_v4()
        } else {
            wire.id.parse().map_err(|_| FrameError::InvalidId(wire.id.clone()))?
        };
        let parent_id = match wire.parent_id {
            Some(raw) => Some(raw.parse().map_err(|_| FrameError::InvalidId(raw))?),
            None => None,
        };
        let data = match wire.data {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => Data::new(),
            _ => return Err(FrameError::DataNotObject),
        };

        Ok(Self {
            id,
            parent_id,
            ts: wire.ts,
            room_id: wire.room_id,
            from: wire.from,
            syscall: wire.syscall,
            status: wire.status,
            data,
        })
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
