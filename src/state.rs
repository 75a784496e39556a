//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the server config and a map of live rooms. Each room owns its
//! field store, entity registry and the outbound channels of its connected
//! clients. Handlers hold the rooms write lock for the whole mutation, so
//! messages within a room are applied one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::Config;
use crate::entity::EntityRegistry;
use crate::frame::Frame;
use crate::store::FieldStore;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state. Exists while at least one client is connected
/// (or forever when auto-dispose is off).
pub struct RoomState {
    pub id: String,
    pub store: FieldStore,
    pub entities: EntityRegistry,
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
}

impl RoomState {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store: FieldStore::new(),
            entities: EntityRegistry::with_defaults(),
            clients: HashMap::new(),
        }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_state_new_is_empty() {
        let room = RoomState::new("lobby");
        assert_eq!(room.id, "lobby");
        assert!(room.store.is_empty());
        assert!(room.clients.is_empty());
        assert!(room.entities.has_type("player"));
    }

    #[tokio::test]
    async fn seed_and_attach() {
        let state = test_helpers::test_app_state();
        let room_id = test_helpers::seed_room(&state, "lobby").await;
        let (client_id, _rx) = test_helpers::attach_client(&state, &room_id, 4).await;

        let rooms = state.rooms.read().await;
        assert!(rooms["lobby"].clients.contains_key(&client_id));
    }
}
