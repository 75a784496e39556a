//! Typed field values shared by the room store and client bindings.
//!
//! DESIGN
//! ======
//! Every synchronized field carries one of six value kinds. On the wire a
//! value travels as `(type, value)` where `type` is a [`FieldKind`] name and
//! `value` is plain JSON. [`FieldValue::from_json`] is the only way in, so a
//! payload whose shape disagrees with its declared kind is rejected at the
//! edge instead of corrupting a collection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// COMPOSITE TYPES
// =============================================================================

/// A 3-component vector. Missing components deserialize as 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Self = Self { x: 1.0, y: 1.0, z: 1.0 };

    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A rotation quaternion. Missing components take the identity value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position, rotation and scale of a scene node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub position: Vector3,
    pub rotation: Quaternion,
    pub scaling: Vector3,
}

impl Default for Transform {
    fn default() -> Self {
        Self { position: Vector3::ZERO, rotation: Quaternion::IDENTITY, scaling: Vector3::ONE }
    }
}

// =============================================================================
// KIND
// =============================================================================

/// Discriminant of a [`FieldValue`]. Wire names match the client vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "string")]
    String,
    Vector3,
    Quaternion,
    Transform,
}

impl FieldKind {
    /// Collection scan order used by key lookups that carry no type tag.
    pub const SEARCH_ORDER: [Self; 6] = [
        Self::Transform,
        Self::Number,
        Self::Boolean,
        Self::String,
        Self::Vector3,
        Self::Quaternion,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Vector3 => "Vector3",
            Self::Quaternion => "Quaternion",
            Self::Transform => "Transform",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "Vector3" => Ok(Self::Vector3),
            "Quaternion" => Ok(Self::Quaternion),
            "Transform" => Ok(Self::Transform),
            other => Err(ValueError::UnknownKind(other.to_owned())),
        }
    }
}

// =============================================================================
// VALUE
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("unknown field type: {0}")]
    UnknownKind(String),
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: FieldKind, found: String },
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Vector3(Vector3),
    Quaternion(Quaternion),
    Transform(Transform),
}

impl FieldValue {
    #[must_use]
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Number(_) => FieldKind::Number,
            Self::Boolean(_) => FieldKind::Boolean,
            Self::String(_) => FieldKind::String,
            Self::Vector3(_) => FieldKind::Vector3,
            Self::Quaternion(_) => FieldKind::Quaternion,
            Self::Transform(_) => FieldKind::Transform,
        }
    }

    /// Parse a JSON payload as a value of the declared kind.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::TypeMismatch`] when the JSON shape does not fit `kind`.
    pub fn from_json(kind: FieldKind, value: &Value) -> Result<Self, ValueError> {
        let mismatch = || ValueError::TypeMismatch { expected: kind, found: json_type_name(value).to_owned() };
        match kind {
            FieldKind::Number => value.as_f64().map(Self::Number).ok_or_else(mismatch),
            FieldKind::Boolean => value.as_bool().map(Self::Boolean).ok_or_else(mismatch),
            FieldKind::String => value
                .as_str()
                .map(|s| Self::String(s.to_owned()))
                .ok_or_else(mismatch),
            FieldKind::Vector3 => composite(value)
                .and_then(|v| serde_json::from_value(v).ok())
                .map(Self::Vector3)
                .ok_or_else(mismatch),
            FieldKind::Quaternion => composite(value)
                .and_then(|v| serde_json::from_value(v).ok())
                .map(Self::Quaternion)
                .ok_or_else(mismatch),
            FieldKind::Transform => composite(value)
                .and_then(|v| serde_json::from_value(v).ok())
                .map(Self::Transform)
                .ok_or_else(mismatch),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(v) => serde_json::json!(v),
            Self::Boolean(v) => Value::Bool(*v),
            Self::String(v) => Value::String(v.clone()),
            Self::Vector3(v) => serde_json::to_value(v).unwrap_or(Value::Null),
            Self::Quaternion(v) => serde_json::to_value(v).unwrap_or(Value::Null),
            Self::Transform(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        }
    }
}

/// Composite kinds only accept JSON objects.
fn composite(value: &Value) -> Option<Value> {
    value.is_object().then(|| value.clone())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// FIELD RECORD
// =============================================================================

/// One synchronized field: id, typed value, owning session and version.
///
/// `owner` is empty when nobody holds the field. `version` starts at 1 and
/// is bumped by every mutation, so receivers can discard stale writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldRecordWire", into = "FieldRecordWire")]
pub struct FieldRecord {
    pub id: String,
    pub value: FieldValue,
    pub owner: String,
    pub version: u64,
}

impl FieldRecord {
    /// A freshly registered, unowned record.
    #[must_use]
    pub fn new(id: impl Into<String>, value: FieldValue) -> Self {
        Self { id: id.into(), value, owner: String::new(), version: 1 }
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        !self.owner.is_empty()
    }

    #[must_use]
    pub fn is_owned_by(&self, session_id: &str) -> bool {
        self.is_owned() && self.owner == session_id
    }
}

#[derive(Serialize, Deserialize)]
struct FieldRecordWire {
    id: String,
    #[serde(rename = "type")]
    kind: FieldKind,
    value: Value,
    #[serde(default)]
    owner: String,
    #[serde(default = "first_version")]
    version: u64,
}

fn first_version() -> u64 {
    1
}

impl TryFrom<FieldRecordWire> for FieldRecord {
    type Error = ValueError;

    fn try_from(wire: FieldRecordWire) -> Result<Self, Self::Error> {
        let value = FieldValue::from_json(wire.kind, &wire.value)?;
        Ok(Self { id: wire.id, value, owner: wire.owner, version: wire.version })
    }
}

impl From<FieldRecord> for FieldRecordWire {
    fn from(record: FieldRecord) -> Self {
        Self {
            kind: record.value.kind(),
            value: record.value.to_json(),
            id: record.id,
            owner: record.owner,
            version: record.version,
        }
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod tests;
