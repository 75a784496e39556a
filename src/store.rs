//! Typed field store: the server-authoritative record of every field.
//!
//! DESIGN
//! ======
//! One [`Collection`] per value kind. A field id lives in exactly one
//! collection; [`FieldStore::set`] refuses to place an id into a second
//! collection. Every successful `set` appends the full record to a change
//! log, and the room drains that log after each message to broadcast
//! `fieldChanged` in mutation order.

use std::collections::HashMap;

use frames::{FieldKind, FieldRecord};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("field {id} is registered as {existing}, not {incoming}")]
    KindConflict { id: String, existing: FieldKind, incoming: FieldKind },
}

/// Records of a single value kind keyed by field id.
#[derive(Debug)]
pub struct Collection {
    kind: FieldKind,
    records: HashMap<String, FieldRecord>,
}

impl Collection {
    fn new(kind: FieldKind) -> Self {
        Self { kind, records: HashMap::new() }
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&FieldRecord> {
        self.records.get(id)
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldRecord> {
        self.records.values()
    }
}

#[derive(Debug)]
pub struct FieldStore {
    transforms: Collection,
    numbers: Collection,
    booleans: Collection,
    strings: Collection,
    vectors: Collection,
    quaternions: Collection,
    changes: Vec<FieldRecord>,
}

impl Default for FieldStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ACCESS
// =============================================================================

impl FieldStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            transforms: Collection::new(FieldKind::Transform),
            numbers: Collection::new(FieldKind::Number),
            booleans: Collection::new(FieldKind::Boolean),
            strings: Collection::new(FieldKind::String),
            vectors: Collection::new(FieldKind::Vector3),
            quaternions: Collection::new(FieldKind::Quaternion),
            changes: Vec::new(),
        }
    }

    #[must_use]
    pub fn collection(&self, kind: FieldKind) -> &Collection {
        match kind {
            FieldKind::Transform => &self.transforms,
            FieldKind::Number => &self.numbers,
            FieldKind::Boolean => &self.booleans,
            FieldKind::String => &self.strings,
            FieldKind::Vector3 => &self.vectors,
            FieldKind::Quaternion => &self.quaternions,
        }
    }

    fn collection_mut(&mut self, kind: FieldKind) -> &mut Collection {
        match kind {
            FieldKind::Transform => &mut self.transforms,
            FieldKind::Number => &mut self.numbers,
            FieldKind::Boolean => &mut self.booleans,
            FieldKind::String => &mut self.strings,
            FieldKind::Vector3 => &mut self.vectors,
            FieldKind::Quaternion => &mut self.quaternions,
        }
    }

    #[must_use]
    pub fn get(&self, kind: FieldKind, id: &str) -> Option<&FieldRecord> {
        self.collection(kind).get(id)
    }

    #[must_use]
    pub fn has(&self, kind: FieldKind, id: &str) -> bool {
        self.collection(kind).has(id)
    }

    /// Find a record by id alone, scanning collections in
    /// [`FieldKind::SEARCH_ORDER`].
    #[must_use]
    pub fn find_by_key(&self, id: &str) -> Option<&FieldRecord> {
        FieldKind::SEARCH_ORDER
            .iter()
            .find_map(|kind| self.collection(*kind).get(id))
    }

    /// Insert or replace a record in the collection matching its kind and
    /// log the change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KindConflict`] if the id already lives in a
    /// different collection.
    pub fn set(&mut self, record: FieldRecord) -> Result<(), StoreError> {
        let incoming = record.kind();
        if let Some(existing) = self.find_by_key(&record.id) {
            if existing.kind() != incoming {
                return Err(StoreError::KindConflict {
                    id: record.id,
                    existing: existing.kind(),
                    incoming,
                });
            }
        }

        self.changes.push(record.clone());
        self.collection_mut(incoming)
            .records
            .insert(record.id.clone(), record);
        Ok(())
    }

    /// All records, collection by collection in search order.
    pub fn records(&self) -> impl Iterator<Item = &FieldRecord> {
        FieldKind::SEARCH_ORDER
            .iter()
            .flat_map(|kind| self.collection(*kind).values())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        FieldKind::SEARCH_ORDER
            .iter()
            .map(|kind| self.collection(*kind).len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// CHANGE LOG
// =============================================================================

impl FieldStore {
    /// Take every change recorded since the last drain, oldest first.
    pub fn drain_changes(&mut self) -> Vec<FieldRecord> {
        std::mem::take(&mut self.changes)
    }

    /// Clear ownership of every field held by `session_id`. Returns the ids
    /// that were released.
    pub fn release_owned_by(&mut self, session_id: &str) -> Vec<String> {
        let owned: Vec<FieldRecord> = self
            .records()
            .filter(|record| record.is_owned_by(session_id))
            .cloned()
            .collect();

        let mut released = Vec::with_capacity(owned.len());
        for mut record in owned {
            record.owner.clear();
            record.version += 1;
            released.push(record.id.clone());
            // Same collection as before, cannot conflict.
            let _ = self.set(record);
        }
        released
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
