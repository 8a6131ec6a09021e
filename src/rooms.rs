use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use unified::api::{Area, Room};

use crate::error::{HubError, HubResult};

/// Room/area lookups the service uses to hydrate query results.
#[async_trait]
pub trait RoomService: Send + Sync {
    async fn get_room_by_id(&self, id: &str) -> HubResult<Room>;

    async fn get_area_by_id(&self, id: &str) -> HubResult<Area>;
}

/// In-memory room and area store. Rooms and areas persist independently of
/// entities: a stale sweep or adapter unregistration never touches them.
#[derive(Default)]
pub struct RoomDirectory {
    rooms: RwLock<HashMap<String, Room>>,
    areas: RwLock<HashMap<String, Area>>,
}

impl RoomDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_room(&self, room: Room) {
        self.rooms.write().await.insert(room.id.clone(), room);
    }

    pub async fn remove_room(&self, id: &str) -> HubResult<Room> {
        self.rooms
            .write()
            .await
            .remove(id)
            .ok_or_else(|| HubError::RoomNotFound(id.to_string()))
    }

    pub async fn upsert_area(&self, area: Area) {
        self.areas.write().await.insert(area.id.clone(), area);
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        self.rooms.read().await.values().cloned().collect()
    }

    pub async fn add_entity_to_room(&self, room_id: &str, entity_id: &str) -> HubResult<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;
        room.add_entity(entity_id);
        Ok(())
    }

    pub async fn remove_entity_from_room(&self, room_id: &str, entity_id: &str) -> HubResult<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;
        room.remove_entity(entity_id);
        Ok(())
    }
}

#[async_trait]
impl RoomService for RoomDirectory {
    async fn get_room_by_id(&self, id: &str) -> HubResult<Room> {
        self.rooms
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::RoomNotFound(id.to_string()))
    }

    async fn get_area_by_id(&self, id: &str) -> HubResult<Area> {
        self.areas
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::AreaNotFound(id.to_string()))
    }
}
