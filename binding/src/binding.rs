//! Typed bindings between local values and synchronized fields.
//!
//! A binding is polled with `sync` once per frame:
//! 1. First call registers the field(s) with `addFieldData`.
//! 2. A pending remote record is applied only when another session owns it.
//! 3. If this session owns the field and the value moved away from the last
//!    value sent, an update goes out and becomes the new baseline.

use std::collections::BTreeMap;

use frames::protocol;
use frames::{FieldKind, FieldRecord, FieldValue, Quaternion, Transform, Vector3};

use crate::context::SyncContext;
use crate::error::BindingError;

// =============================================================================
// SYNC VALUE
// =============================================================================

/// A local type that maps onto one field kind.
pub trait SyncValue: Clone + PartialEq {
    const KIND: FieldKind;

    fn to_field(&self) -> FieldValue;

    /// `None` when `value` holds another kind.
    fn from_field(value: &FieldValue) -> Option<Self>;
}

impl SyncValue for f64 {
    const KIND: FieldKind = FieldKind::Number;

    fn to_field(&self) -> FieldValue {
        FieldValue::Number(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl SyncValue for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn to_field(&self) -> FieldValue {
        FieldValue::Boolean(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl SyncValue for String {
    const KIND: FieldKind = FieldKind::String;

    fn to_field(&self) -> FieldValue {
        FieldValue::String(self.clone())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl SyncValue for Vector3 {
    const KIND: FieldKind = FieldKind::Vector3;

    fn to_field(&self) -> FieldValue {
        FieldValue::Vector3(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Vector3(v) => Some(*v),
            _ => None,
        }
    }
}

impl SyncValue for Quaternion {
    const KIND: FieldKind = FieldKind::Quaternion;

    fn to_field(&self) -> FieldValue {
        FieldValue::Quaternion(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Quaternion(v) => Some(*v),
            _ => None,
        }
    }
}

impl SyncValue for Transform {
    const KIND: FieldKind = FieldKind::Transform;

    fn to_field(&self) -> FieldValue {
        FieldValue::Transform(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Transform(v) => Some(*v),
            _ => None,
        }
    }
}

/// True when the record was written by a session other than `ctx`'s.
fn is_foreign(record: &FieldRecord, ctx: &SyncContext) -> bool {
    record.is_owned() && !record.is_owned_by(ctx.session_id())
}

// =============================================================================
// BOUND FIELD
// =============================================================================

type RemoteHandler<T> = Box<dyn FnMut(&mut T, &FieldRecord) + Send>;

/// A local value bound one-to-one to a field id.
pub struct BoundField<T: SyncValue> {
    id: String,
    value: T,
    baseline: Option<T>,
    on_remote: Option<RemoteHandler<T>>,
}

impl<T: SyncValue> BoundField<T> {
    #[must_use]
    pub fn new(id: impl Into<String>, initial: T) -> Self {
        Self { id: id.into(), value: initial, baseline: None, on_remote: None }
    }

    /// Replace the default remote handler, which assigns the remote value.
    #[must_use]
    pub fn with_handler(mut self, handler: impl FnMut(&mut T, &FieldRecord) + Send + 'static) -> Self {
        self.on_remote = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    /// Poll the binding against the room mirror.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn sync(&mut self, ctx: &mut SyncContext) -> Result<(), BindingError> {
        if self.baseline.is_none() {
            ctx.register_direct(&self.id, &self.value.to_field())?;
            self.baseline = Some(self.value.clone());
        }

        if let Some(record) = ctx.take_remote(&self.id) {
            if is_foreign(&record, ctx) {
                match self.on_remote.as_mut() {
                    Some(handler) => handler(&mut self.value, &record),
                    None => {
                        if let Some(value) = T::from_field(&record.value) {
                            self.value = value;
                        }
                    }
                }
                self.baseline = Some(self.value.clone());
            }
        }

        if ctx.is_owned_by_me(&self.id) && self.baseline.as_ref() != Some(&self.value) {
            ctx.send_update_field(&self.id, &self.value.to_field())?;
            self.baseline = Some(self.value.clone());
        }
        Ok(())
    }
}

// =============================================================================
// BOUND OBJECT
// =============================================================================

struct Property {
    id: String,
    value: FieldValue,
    baseline: FieldValue,
}

type PropertyHandler = Box<dyn FnMut(&str, &mut FieldValue, &FieldRecord) + Send>;

/// An object with a fixed set of tracked sub-properties, each synced under
/// the derived id `object_key + '\x1F' + property_key`.
pub struct BoundObject {
    key: String,
    properties: BTreeMap<String, Property>,
    registered: bool,
    on_remote: Option<PropertyHandler>,
}

impl BoundObject {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), properties: BTreeMap::new(), registered: false, on_remote: None }
    }

    /// Track a property. Properties added after the first `sync` are ignored.
    #[must_use]
    pub fn with_property<T: SyncValue>(mut self, name: &str, initial: T) -> Self {
        if !self.registered {
            let value = initial.to_field();
            self.properties.insert(
                name.to_owned(),
                Property { id: protocol::construct_key(&self.key, name), baseline: value.clone(), value },
            );
        }
        self
    }

    /// Replace the default remote handler, which assigns the remote value.
    /// Called with `(property, current value, remote record)`.
    #[must_use]
    pub fn with_handler(
        mut self,
        handler: impl FnMut(&str, &mut FieldValue, &FieldRecord) + Send + 'static,
    ) -> Self {
        self.on_remote = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Derived field id of a tracked property.
    #[must_use]
    pub fn property_id(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|p| p.id.as_str())
    }

    #[must_use]
    pub fn get<T: SyncValue>(&self, name: &str) -> Option<T> {
        self.properties
            .get(name)
            .and_then(|p| T::from_field(&p.value))
    }

    /// Set a tracked property. Returns `false` for an unknown property or a
    /// value of the wrong kind.
    pub fn set<T: SyncValue>(&mut self, name: &str, value: T) -> bool {
        match self.properties.get_mut(name) {
            Some(property) if property.value.kind() == T::KIND => {
                property.value = value.to_field();
                true
            }
            _ => false,
        }
    }

    /// Poll every tracked property against the room mirror.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::WsClosed`] when the transport is gone.
    pub fn sync(&mut self, ctx: &mut SyncContext) -> Result<(), BindingError> {
        if !self.registered {
            for (name, property) in &self.properties {
                ctx.register_property(&self.key, name, &property.value)?;
            }
            self.registered = true;
        }

        for (name, property) in &mut self.properties {
            if let Some(record) = ctx.take_remote(&property.id) {
                if is_foreign(&record, ctx) && record.kind() == property.value.kind() {
                    match self.on_remote.as_mut() {
                        Some(handler) => handler(name, &mut property.value, &record),
                        None => property.value = record.value,
                    }
                    property.baseline = property.value.clone();
                }
            }

            if ctx.is_owned_by_me(&property.id) && property.value != property.baseline {
                ctx.send_update_property(&property.id, &property.value)?;
                property.baseline = property.value.clone();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "binding_test.rs"]
mod tests;
