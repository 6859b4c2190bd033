use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatRoom {
    pub id: u64,
    pub name: String,
}

/// The ordered list of chat rooms, as shown in the room listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomList {
    rooms: Vec<ChatRoom>,
}

impl RoomList {
    pub fn new(rooms: Vec<ChatRoom>) -> Self {
        Self { rooms }
    }

    /// Appends a room with the next free id. A blank name becomes `Chat <id>`.
    pub fn create(&mut self, name: &str) -> ChatRoom {
        let id = self.rooms.iter().map(|room| room.id).max().unwrap_or(0) + 1;
        let name = name.trim();
        let room = ChatRoom {
            id,
            name: if name.is_empty() { format!("Chat {}", id) } else { name.to_string() },
        };
        self.rooms.push(room.clone());
        room
    }

    pub fn get(&self, id: u64) -> Option<&ChatRoom> {
        self.rooms.iter().find(|room| room.id == id)
    }

    pub fn remove(&mut self, id: u64) -> Option<ChatRoom> {
        let index = self.rooms.iter().position(|room| room.id == id)?;
        Some(self.rooms.remove(index))
    }

    pub fn first(&self) -> Option<&ChatRoom> {
        self.rooms.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatRoom> {
        self.rooms.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn as_slice(&self) -> &[ChatRoom] {
        &self.rooms
    }
}
