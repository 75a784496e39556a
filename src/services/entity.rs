//! Entity service: add, update and remove typed entities.
//!
//! Routing by type name and schema validation live in the registry; this
//! layer adds id extraction and the ownership check against `ownerUserID`.

use frames::protocol::EntityMessage;
use serde_json::Value;
use tracing::info;

use super::Actor;
use crate::entity::{EntityError, EntityRegistry};

fn require_id(msg: &EntityMessage) -> Result<&str, EntityError> {
    msg.entity_id()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EntityError::MissingEntityId { entity_type: msg.entity_type.clone() })
}

fn check_owner(registry: &EntityRegistry, actor: Actor<'_>, msg: &EntityMessage, id: &str) -> Result<(), EntityError> {
    let owner = registry
        .collection(&msg.entity_type)?
        .owner_of(id)
        .ok_or_else(|| EntityError::NotFound { entity_type: msg.entity_type.clone(), entity_id: id.to_owned() })?;
    if actor.is_blocked_by(owner) {
        return Err(EntityError::OwnershipViolation { entity_id: id.to_owned(), owner: owner.to_owned() });
    }
    Ok(())
}

/// Insert a new entity. Returns `false` if the id already exists.
///
/// With enforcement on, the payload may not name another session as
/// `ownerUserID`, and a session-bound entity may not take the id of a
/// connected peer. `is_peer` answers whether an id belongs to a connected
/// session.
///
/// # Errors
///
/// Unknown type, missing id, invalid payload or an ownership violation.
pub fn add_entity(
    registry: &mut EntityRegistry,
    actor: Actor<'_>,
    msg: &EntityMessage,
    is_peer: impl Fn(&str) -> bool,
) -> Result<bool, EntityError> {
    let entity_id = msg.entity_id().unwrap_or_default();
    let owner = msg.data.get("ownerUserID").and_then(Value::as_str).unwrap_or_default();
    if actor.is_blocked_by(owner) {
        return Err(EntityError::OwnershipViolation { entity_id: entity_id.to_owned(), owner: owner.to_owned() });
    }
    if actor.enforce
        && registry.collection(&msg.entity_type)?.session_bound()
        && entity_id != actor.session_id
        && is_peer(entity_id)
    {
        return Err(EntityError::OwnershipViolation { entity_id: entity_id.to_owned(), owner: entity_id.to_owned() });
    }

    let created = registry.add(&msg.entity_type, &msg.data)?;
    if !created {
        info!(entity_type = %msg.entity_type, %entity_id, "entity already exists");
    }
    Ok(created)
}

/// Merge the payload into an existing entity and return the merged record.
///
/// # Errors
///
/// Unknown type or id, invalid payload, or (enforced) an entity owned by
/// another session.
pub fn update_entity(registry: &mut EntityRegistry, actor: Actor<'_>, msg: &EntityMessage) -> Result<Value, EntityError> {
    let id = require_id(msg)?;
    check_owner(registry, actor, msg, id)?;
    registry.update(&msg.entity_type, id, &msg.data)
}

/// Remove an entity.
///
/// # Errors
///
/// Unknown type or id, or (enforced) an entity owned by another session.
pub fn remove_entity(registry: &mut EntityRegistry, actor: Actor<'_>, msg: &EntityMessage) -> Result<(), EntityError> {
    let id = require_id(msg)?;
    check_owner(registry, actor, msg, id)?;
    registry.remove(&msg.entity_type, id)
}

#[cfg(test)]
#[path = "entity_test.rs"]
mod tests;
