use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;
use crate::message::Message;
use crate::room::ChatRoom;

const API_KEY: &str = "apiKey";
const CHAT_ROOMS: &str = "chatRooms";

fn messages_key(room_id: u64) -> String {
    format!("messages-{}", room_id)
}

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Opens the store under `dir`, or under the platform data directory.
    pub fn open(dir: Option<&Path>) -> Result<Self, StoreError> {
        match dir {
            Some(dir) => Ok(Self::new(dir)),
            None => {
                let mut dir = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
                dir.push("chatr");
                Ok(Self::new(dir))
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io { key: key.to_string(), source };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        fs::write(self.path_for(key), value).map_err(io_err)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }

    /// Reads a JSON value. Unreadable or malformed entries read as absent.
    fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                log::warn!("{}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring malformed '{}': {}", key, e);
                None
            }
        }
    }

    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)
            .map_err(|source| StoreError::Serialize { key: key.to_string(), source })?;
        self.set(key, &json)
    }

    pub fn load_api_key(&self) -> Option<String> {
        self.load_json::<String>(API_KEY).filter(|key| !key.is_empty())
    }

    pub fn save_api_key(&self, api_key: &str) -> Result<(), StoreError> {
        self.save_json(API_KEY, api_key)
    }

    pub fn clear_api_key(&self) -> Result<(), StoreError> {
        self.remove(API_KEY)
    }

    pub fn load_rooms(&self) -> Vec<ChatRoom> {
        self.load_json(CHAT_ROOMS).unwrap_or_default()
    }

    pub fn save_rooms(&self, rooms: &[ChatRoom]) -> Result<(), StoreError> {
        self.save_json(CHAT_ROOMS, rooms)
    }

    pub fn load_messages(&self, room_id: u64) -> Vec<Message> {
        self.load_json(&messages_key(room_id)).unwrap_or_default()
    }

    pub fn save_messages(&self, room_id: u64, messages: &[Message]) -> Result<(), StoreError> {
        self.save_json(&messages_key(room_id), messages)
    }

    pub fn remove_messages(&self, room_id: u64) -> Result<(), StoreError> {
        self.remove(&messages_key(room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("data"));
        (dir, store)
    }

    #[test]
    fn missing_keys_read_as_absent() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get("nothing").unwrap(), None);
        assert_eq!(store.load_api_key(), None);
        assert!(store.load_rooms().is_empty());
        assert!(store.load_messages(1).is_empty());
        store.remove("nothing").unwrap();
    }

    #[test]
    fn values_are_json_strings_on_disk() {
        let (_dir, store) = temp_store();
        store.save_api_key("sk-test").unwrap();

        let raw = fs::read_to_string(store.dir().join("apiKey.json")).unwrap();
        assert_eq!(raw, "\"sk-test\"");
        assert_eq!(store.load_api_key().as_deref(), Some("sk-test"));

        store.clear_api_key().unwrap();
        assert_eq!(store.load_api_key(), None);
    }

    #[test]
    fn rooms_and_messages_are_kept_per_room() {
        let (_dir, store) = temp_store();
        let rooms = vec![
            ChatRoom { id: 1, name: "Work".to_string() },
            ChatRoom { id: 2, name: "Home".to_string() },
        ];
        store.save_rooms(&rooms).unwrap();
        store.save_messages(1, &[Message::user("hello")]).unwrap();
        store.save_messages(2, &[Message::user("bye"), Message::assistant("ok")]).unwrap();

        assert_eq!(store.load_rooms(), rooms);
        assert_eq!(store.load_messages(1), vec![Message::user("hello")]);
        let second = store.load_messages(2);
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].role, Role::Assistant);

        store.remove_messages(1).unwrap();
        assert!(store.load_messages(1).is_empty());
        assert_eq!(store.load_messages(2).len(), 2);
    }

    #[test]
    fn malformed_values_read_as_absent() {
        let (_dir, store) = temp_store();
        store.set("chatRooms", "{not a list").unwrap();
        store.set("messages-3", "42").unwrap();

        assert!(store.load_rooms().is_empty());
        assert!(store.load_messages(3).is_empty());
    }
}
