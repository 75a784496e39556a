//! Field service: registration, writes and the ownership ledger.
//!
//! DESIGN
//! ======
//! Every operation validates against the current record, builds the next
//! record and hands it to `FieldStore::set`, which logs the change for
//! broadcast. Nothing is written on any error path.
//!
//! A record's `owner` is the ledger. With enforcement on, a field owned by
//! another session cannot be written, claimed or released. Writes may carry
//! the version the client last saw; a version lower than the current one is
//! rejected as stale.

use frames::protocol::{AddFieldData, UpdateField, UpdateProperty};
use frames::{FieldKind, FieldRecord, FieldValue, ValueError};
use tracing::info;

use super::Actor;
use crate::frame::ErrorCode;
use crate::store::{FieldStore, StoreError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("field not found: {0}")]
    NotFound(String),
    #[error("field not registered: {0}")]
    NotRegistered(String),
    #[error("field {id} is {expected}, got {found}")]
    TypeMismatch { id: String, expected: FieldKind, found: FieldKind },
    #[error(transparent)]
    InvalidValue(#[from] ValueError),
    #[error("field {id} is owned by {owner}")]
    OwnershipViolation { id: String, owner: String },
    #[error("field {id} is already owned by {owner}")]
    AlreadyOwned { id: String, owner: String },
    #[error("field {id} is owned by {owner}, not by the caller")]
    NotOwner { id: String, owner: String },
    #[error("stale update: incoming version {incoming} < current {current}")]
    StaleUpdate { incoming: u64, current: u64 },
}

impl ErrorCode for FieldError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_FIELD_NOT_FOUND",
            Self::NotRegistered(_) => "E_FIELD_NOT_REGISTERED",
            Self::TypeMismatch { .. } | Self::InvalidValue(_) => "E_TYPE_MISMATCH",
            Self::OwnershipViolation { .. } => "E_OWNERSHIP_VIOLATION",
            Self::AlreadyOwned { .. } => "E_ALREADY_OWNED",
            Self::NotOwner { .. } => "E_NOT_OWNER",
            Self::StaleUpdate { .. } => "E_STALE_UPDATE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::StaleUpdate { .. })
    }
}

impl From<StoreError> for FieldError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::KindConflict { id, existing, incoming } => {
                Self::TypeMismatch { id, expected: existing, found: incoming }
            }
        }
    }
}

// =============================================================================
// CHECKS
// =============================================================================

fn check_kind(record: &FieldRecord, kind: FieldKind) -> Result<(), FieldError> {
    if record.kind() != kind {
        return Err(FieldError::TypeMismatch { id: record.id.clone(), expected: record.kind(), found: kind });
    }
    Ok(())
}

fn check_version(record: &FieldRecord, incoming: Option<u64>) -> Result<(), FieldError> {
    match incoming {
        Some(incoming) if incoming < record.version => {
            Err(FieldError::StaleUpdate { incoming, current: record.version })
        }
        _ => Ok(()),
    }
}

fn check_writer(record: &FieldRecord, actor: Actor<'_>) -> Result<(), FieldError> {
    if actor.is_blocked_by(&record.owner) {
        return Err(FieldError::OwnershipViolation { id: record.id.clone(), owner: record.owner.clone() });
    }
    Ok(())
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Register a field with its initial value. Returns `false` when the id is
/// already registered with the same kind.
///
/// # Errors
///
/// `TypeMismatch` when the id exists with another kind or the value does not
/// fit the declared kind.
pub fn add_field(store: &mut FieldStore, msg: &AddFieldData) -> Result<bool, FieldError> {
    let value = FieldValue::from_json(msg.kind, &msg.value)?;

    if let Some(existing) = store.find_by_key(&msg.id) {
        check_kind(existing, msg.kind)?;
        info!(id = %msg.id, "field already registered");
        return Ok(false);
    }

    store.set(FieldRecord::new(msg.id.clone(), value))?;
    Ok(true)
}

// =============================================================================
// WRITES
// =============================================================================

/// Upsert a field's value. The writer becomes the owner.
///
/// # Errors
///
/// Kind mismatch, ownership violation or stale version.
pub fn update_field(store: &mut FieldStore, actor: Actor<'_>, msg: &UpdateField) -> Result<FieldRecord, FieldError> {
    let value = FieldValue::from_json(msg.kind, &msg.value)?;

    let next = match store.find_by_key(&msg.field) {
        Some(existing) => {
            check_kind(existing, msg.kind)?;
            check_writer(existing, actor)?;
            check_version(existing, msg.version)?;
            let mut next = existing.clone();
            next.value = value;
            next.owner = actor.session_id.to_owned();
            next.version += 1;
            next
        }
        None => {
            let mut record = FieldRecord::new(msg.field.clone(), value);
            record.owner = actor.session_id.to_owned();
            record
        }
    };

    store.set(next.clone())?;
    Ok(next)
}

/// Change the value of a registered field. Ownership is untouched.
///
/// # Errors
///
/// Unregistered id, kind mismatch, ownership violation or stale version.
pub fn update_property(
    store: &mut FieldStore,
    actor: Actor<'_>,
    msg: &UpdateProperty,
) -> Result<FieldRecord, FieldError> {
    let value = FieldValue::from_json(msg.kind, &msg.value)?;
    let existing = store
        .find_by_key(&msg.id)
        .ok_or_else(|| FieldError::NotRegistered(msg.id.clone()))?;
    check_kind(existing, msg.kind)?;
    check_writer(existing, actor)?;
    check_version(existing, msg.version)?;

    let mut next = existing.clone();
    next.value = value;
    next.version += 1;
    store.set(next.clone())?;
    Ok(next)
}

// =============================================================================
// OWNERSHIP
// =============================================================================

/// Make the actor the owner of a field.
///
/// # Errors
///
/// Unknown id, stale version, or (enforced) a field held by someone else.
pub fn claim(store: &mut FieldStore, actor: Actor<'_>, id: &str, version: Option<u64>) -> Result<FieldRecord, FieldError> {
    let existing = store
        .find_by_key(id)
        .ok_or_else(|| FieldError::NotFound(id.to_owned()))?;
    check_version(existing, version)?;
    if actor.is_blocked_by(&existing.owner) {
        return Err(FieldError::AlreadyOwned { id: id.to_owned(), owner: existing.owner.clone() });
    }

    let mut next = existing.clone();
    next.owner = actor.session_id.to_owned();
    next.version += 1;
    store.set(next.clone())?;
    info!(%id, session_id = actor.session_id, "ownership claimed");
    Ok(next)
}

/// Clear a field's owner. Releasing an unowned field changes nothing.
///
/// # Errors
///
/// Unknown id, or (enforced) a field held by someone else.
pub fn release(store: &mut FieldStore, actor: Actor<'_>, id: &str) -> Result<FieldRecord, FieldError> {
    let existing = store
        .find_by_key(id)
        .ok_or_else(|| FieldError::NotFound(id.to_owned()))?;
    if actor.is_blocked_by(&existing.owner) {
        return Err(FieldError::NotOwner { id: id.to_owned(), owner: existing.owner.clone() });
    }
    if !existing.is_owned() {
        return Ok(existing.clone());
    }

    let mut next = existing.clone();
    next.owner.clear();
    next.version += 1;
    store.set(next.clone())?;
    info!(%id, session_id = actor.session_id, "ownership released");
    Ok(next)
}

#[cfg(test)]
#[path = "field_test.rs"]
mod tests;
