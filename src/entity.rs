//! Entity registry: typed per-type collections behind a type-erased map.
//!
//! DESIGN
//! ======
//! Each entity type is a plain serde struct implementing [`EntityState`].
//! The registry keys a boxed [`EntityCollection`] by the type's wire name, so
//! protocol handlers can route `addEntity {type, data}` without knowing the
//! concrete type. Adding a type is one struct plus one `register::<T>()`.
//!
//! Partial updates merge component-wise: the stored record is serialized,
//! the patch is merged into it object by object, and the result is parsed
//! back into `T`. A patch that breaks the schema fails the parse and leaves
//! the stored record untouched.

use std::collections::{BTreeMap, HashMap};

use frames::{Quaternion, Vector3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::frame::ErrorCode;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("unknown entity type: {0}")]
    UnknownType(String),
    #[error("{entity_type} entity has no entityID")]
    MissingEntityId { entity_type: String },
    #[error("{entity_type} entity not found: {entity_id}")]
    NotFound { entity_type: String, entity_id: String },
    #[error("invalid {entity_type} payload: {reason}")]
    InvalidPayload { entity_type: String, reason: String },
    #[error("{entity_id} is owned by {owner}")]
    OwnershipViolation { entity_id: String, owner: String },
}

impl ErrorCode for EntityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownType(_) => "E_UNKNOWN_ENTITY_TYPE",
            Self::MissingEntityId { .. } | Self::InvalidPayload { .. } => "E_INVALID_PAYLOAD",
            Self::NotFound { .. } => "E_ENTITY_NOT_FOUND",
            Self::OwnershipViolation { .. } => "E_OWNERSHIP_VIOLATION",
        }
    }
}

// =============================================================================
// ENTITY TYPES
// =============================================================================

/// Fields shared by every entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityBase {
    #[serde(rename = "entityID")]
    pub entity_id: String,
    pub pos: Vector3,
    pub rot: Quaternion,
    pub scale: Vector3,
    #[serde(rename = "ownerUserID")]
    pub owner_user_id: String,
}

impl Default for EntityBase {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            pos: Vector3::ZERO,
            rot: Quaternion::IDENTITY,
            scale: Vector3::ONE,
            owner_user_id: String::new(),
        }
    }
}

/// A typed entity record that can live in the registry.
pub trait EntityState: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Wire name used in `{type: ...}` payloads.
    const TYPE_NAME: &'static str;
    /// Drop records tied to a session when that session leaves.
    const REMOVE_ON_LEAVE: bool = false;

    fn base(&self) -> &EntityBase;
}

/// A connected user's avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Player {
    #[serde(flatten)]
    pub base: EntityBase,
    pub left_hand_pos: Vector3,
    pub left_hand_rot: Quaternion,
    pub right_hand_pos: Vector3,
    pub right_hand_rot: Quaternion,
    pub vis_mode: f64,
    pub avatar_anim: f64,
    pub facial_anim: f64,
    pub hand_pose: f64,
    pub audio_amplitude: f64,
    pub platform: f64,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            base: EntityBase::default(),
            left_hand_pos: Vector3::ZERO,
            left_hand_rot: Quaternion::IDENTITY,
            right_hand_pos: Vector3::ZERO,
            right_hand_rot: Quaternion::IDENTITY,
            vis_mode: 1.0,
            avatar_anim: 0.0,
            facial_anim: 0.0,
            hand_pose: 0.0,
            audio_amplitude: 0.0,
            platform: 0.0,
        }
    }
}

impl EntityState for Player {
    const TYPE_NAME: &'static str = "player";
    const REMOVE_ON_LEAVE: bool = true;

    fn base(&self) -> &EntityBase {
        &self.base
    }
}

/// A shared scene object that outlives the session that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollabObject {
    #[serde(flatten)]
    pub base: EntityBase,
    pub is_visible: bool,
    pub is_play_anim: bool,
    pub is_empty: bool,
    pub color: String,
}

impl Default for CollabObject {
    fn default() -> Self {
        Self {
            base: EntityBase::default(),
            is_visible: true,
            is_play_anim: false,
            is_empty: true,
            color: "#1ad2d2".to_owned(),
        }
    }
}

impl EntityState for CollabObject {
    const TYPE_NAME: &'static str = "collabObject";

    fn base(&self) -> &EntityBase {
        &self.base
    }
}

// =============================================================================
// COLLECTIONS
// =============================================================================

/// Type-erased view of one entity type's records.
pub trait EntityCollection: Send + Sync {
    fn type_name(&self) -> &'static str;
    /// Records of this type belong to the session whose id they carry.
    fn session_bound(&self) -> bool;
    fn len(&self) -> usize;
    fn contains(&self, entity_id: &str) -> bool;
    fn owner_of(&self, entity_id: &str) -> Option<&str>;
    fn get(&self, entity_id: &str) -> Option<Value>;

    /// Parse and insert a new record. `Ok(None)` when the id already exists.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::InvalidPayload`] or [`EntityError::MissingEntityId`].
    fn insert(&mut self, data: &Map<String, Value>) -> Result<Option<Value>, EntityError>;

    /// Merge a partial update into an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NotFound`] or [`EntityError::InvalidPayload`].
    fn merge(&mut self, entity_id: &str, patch: &Map<String, Value>) -> Result<Value, EntityError>;

    fn remove(&mut self, entity_id: &str) -> bool;
    fn snapshot(&self) -> Vec<Value>;
    /// Ids to drop when `session_id` leaves.
    fn tied_to_session(&self, session_id: &str) -> Vec<String>;
}

struct TypedCollection<T: EntityState> {
    records: BTreeMap<String, T>,
}

impl<T: EntityState> TypedCollection<T> {
    fn new() -> Self {
        Self { records: BTreeMap::new() }
    }

    fn invalid(err: &serde_json::Error) -> EntityError {
        EntityError::InvalidPayload { entity_type: T::TYPE_NAME.to_owned(), reason: err.to_string() }
    }
}

impl<T: EntityState> EntityCollection for TypedCollection<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn session_bound(&self) -> bool {
        T::REMOVE_ON_LEAVE
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn contains(&self, entity_id: &str) -> bool {
        self.records.contains_key(entity_id)
    }

    fn owner_of(&self, entity_id: &str) -> Option<&str> {
        self.records
            .get(entity_id)
            .map(|record| record.base().owner_user_id.as_str())
    }

    fn get(&self, entity_id: &str) -> Option<Value> {
        self.records
            .get(entity_id)
            .and_then(|record| serde_json::to_value(record).ok())
    }

    fn insert(&mut self, data: &Map<String, Value>) -> Result<Option<Value>, EntityError> {
        let record: T = serde_json::from_value(Value::Object(data.clone())).map_err(|e| Self::invalid(&e))?;
        let entity_id = record.base().entity_id.clone();
        if entity_id.is_empty() {
            return Err(EntityError::MissingEntityId { entity_type: T::TYPE_NAME.to_owned() });
        }
        if self.records.contains_key(&entity_id) {
            return Ok(None);
        }

        let value = serde_json::to_value(&record).map_err(|e| Self::invalid(&e))?;
        self.records.insert(entity_id, record);
        Ok(Some(value))
    }

    fn merge(&mut self, entity_id: &str, patch: &Map<String, Value>) -> Result<Value, EntityError> {
        let Some(current) = self.records.get(entity_id) else {
            return Err(EntityError::NotFound { entity_type: T::TYPE_NAME.to_owned(), entity_id: entity_id.to_owned() });
        };

        let mut merged = serde_json::to_value(current).map_err(|e| Self::invalid(&e))?;
        let mut patch = patch.clone();
        // The id is the collection key and cannot be renamed by a patch.
        patch.remove("entityID");
        merge_json(&mut merged, &patch);

        let updated: T = serde_json::from_value(merged).map_err(|e| Self::invalid(&e))?;
        let value = serde_json::to_value(&updated).map_err(|e| Self::invalid(&e))?;
        self.records.insert(entity_id.to_owned(), updated);
        Ok(value)
    }

    fn remove(&mut self, entity_id: &str) -> bool {
        self.records.remove(entity_id).is_some()
    }

    fn snapshot(&self) -> Vec<Value> {
        self.records
            .values()
            .filter_map(|record| serde_json::to_value(record).ok())
            .collect()
    }

    fn tied_to_session(&self, session_id: &str) -> Vec<String> {
        if !T::REMOVE_ON_LEAVE || session_id.is_empty() {
            return Vec::new();
        }
        self.records
            .iter()
            .filter(|(_, record)| {
                let base = record.base();
                base.entity_id == session_id || base.owner_user_id == session_id
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Merge `patch` into `target`, recursing into nested objects so a patch of
/// `{pos: {x: 2}}` keeps the other components.
fn merge_json(target: &mut Value, patch: &Map<String, Value>) {
    let Value::Object(target) = target else {
        return;
    };
    for (key, incoming) in patch {
        if let (Some(existing), Value::Object(nested)) = (target.get_mut(key), incoming) {
            if existing.is_object() {
                merge_json(existing, nested);
                continue;
            }
        }
        target.insert(key.clone(), incoming.clone());
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// A recorded entity mutation, drained by the room after each message.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    Added { entity_type: String, entity: Value },
    Changed { entity_type: String, entity: Value },
    Removed { entity_type: String, entity_id: String },
}

pub struct EntityRegistry {
    collections: HashMap<&'static str, Box<dyn EntityCollection>>,
    changes: Vec<EntityChange>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EntityRegistry {
    /// A registry with no entity types.
    #[must_use]
    pub fn new() -> Self {
        Self { collections: HashMap::new(), changes: Vec::new() }
    }

    /// A registry with the built-in `player` and `collabObject` types.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<Player>().register::<CollabObject>();
        registry
    }

    /// Add a collection for `T`. Re-registering a type keeps the existing records.
    pub fn register<T: EntityState>(&mut self) -> &mut Self {
        self.collections
            .entry(T::TYPE_NAME)
            .or_insert_with(|| Box::new(TypedCollection::<T>::new()));
        self
    }

    #[must_use]
    pub fn has_type(&self, entity_type: &str) -> bool {
        self.collections.contains_key(entity_type)
    }

    /// Look up a collection by type name.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::UnknownType`] for unregistered names.
    pub fn collection(&self, entity_type: &str) -> Result<&dyn EntityCollection, EntityError> {
        self.collections
            .get(entity_type)
            .map(|c| &**c)
            .ok_or_else(|| EntityError::UnknownType(entity_type.to_owned()))
    }

    fn collection_mut(&mut self, entity_type: &str) -> Result<&mut Box<dyn EntityCollection>, EntityError> {
        self.collections
            .get_mut(entity_type)
            .ok_or_else(|| EntityError::UnknownType(entity_type.to_owned()))
    }

    /// Insert a new entity. Returns `false` when the id already exists.
    ///
    /// # Errors
    ///
    /// Unknown type, missing id or a payload that does not fit the type.
    pub fn add(&mut self, entity_type: &str, data: &Map<String, Value>) -> Result<bool, EntityError> {
        let collection = self.collection_mut(entity_type)?;
        let type_name = collection.type_name();
        match collection.insert(data)? {
            Some(entity) => {
                self.changes
                    .push(EntityChange::Added { entity_type: type_name.to_owned(), entity });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Merge a partial update into an existing entity.
    ///
    /// # Errors
    ///
    /// Unknown type, unknown id or a patch that does not fit the type.
    pub fn update(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<Value, EntityError> {
        let collection = self.collection_mut(entity_type)?;
        let type_name = collection.type_name();
        let entity = collection.merge(entity_id, patch)?;
        self.changes
            .push(EntityChange::Changed { entity_type: type_name.to_owned(), entity: entity.clone() });
        Ok(entity)
    }

    /// Remove an entity.
    ///
    /// # Errors
    ///
    /// Unknown type or unknown id.
    pub fn remove(&mut self, entity_type: &str, entity_id: &str) -> Result<(), EntityError> {
        let collection = self.collection_mut(entity_type)?;
        let type_name = collection.type_name();
        if !collection.remove(entity_id) {
            return Err(EntityError::NotFound { entity_type: type_name.to_owned(), entity_id: entity_id.to_owned() });
        }
        self.changes
            .push(EntityChange::Removed { entity_type: type_name.to_owned(), entity_id: entity_id.to_owned() });
        Ok(())
    }

    /// Drop every record tied to a leaving session. Returns `(type, id)` pairs.
    pub fn remove_for_session(&mut self, session_id: &str) -> Vec<(String, String)> {
        let doomed: Vec<(&'static str, String)> = self
            .collections
            .values()
            .flat_map(|c| {
                let type_name = c.type_name();
                c.tied_to_session(session_id)
                    .into_iter()
                    .map(move |id| (type_name, id))
            })
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for (entity_type, entity_id) in doomed {
            if self.remove(entity_type, &entity_id).is_ok() {
                removed.push((entity_type.to_owned(), entity_id));
            }
        }
        removed
    }

    /// Every entity grouped by type name.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        self.collections
            .iter()
            .map(|(name, c)| ((*name).to_owned(), Value::Array(c.snapshot())))
            .collect()
    }

    pub fn drain_changes(&mut self) -> Vec<EntityChange> {
        std::mem::take(&mut self.changes)
    }
}

#[cfg(test)]
#[path = "entity_test.rs"]
mod tests;
