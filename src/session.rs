use crate::config::Config;
use crate::error::ChatError;
use crate::llm::Backend;
use crate::message::{current_system_message, Message, Role};
use crate::room::{ChatRoom, RoomList};
use crate::store::Store;

pub struct ChatSession<B: Backend> {
    backend: B,
    store: Store,
    api_key: Option<String>,
    model: String,
    possible_models: Vec<String>,
    rooms: RoomList,
    current_room: u64,
    messages: Vec<Message>,
    loading: bool,
}

impl<B: Backend> ChatSession<B> {
    /// Restores the key, the room list and the first room's messages.
    pub fn open(config: &Config, store: Store, backend: B) -> Self {
        let api_key = config.api_key.clone().or_else(|| store.load_api_key());

        let mut rooms = RoomList::new(store.load_rooms());
        if rooms.is_empty() {
            rooms.create("");
            if let Err(e) = store.save_rooms(rooms.as_slice()) {
                log::warn!("Failed to save rooms: {}", e);
            }
        }
        let current_room = rooms.first().map(|room| room.id).unwrap_or(1);
        let messages = with_system_message(store.load_messages(current_room));

        Self {
            backend,
            store,
            api_key,
            model: config.model.clone(),
            possible_models: Vec::new(),
            rooms,
            current_room,
            messages,
            loading: false,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key.as_deref().map(mask_api_key)
    }

    /// Verifies `candidate` and, when the API accepts it, makes it the active
    /// key. A blank candidate is ignored. On failure the previous key stays.
    pub fn set_api_key(&mut self, candidate: &str) -> Result<(), ChatError> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Ok(());
        }

        let models = self.backend.list_models(candidate)?;
        self.api_key = Some(candidate.to_string());
        self.possible_models = models;
        if let Err(e) = self.store.save_api_key(candidate) {
            log::warn!("Failed to save API key: {}", e);
        }
        Ok(())
    }

    pub fn clear_api_key(&mut self) {
        self.api_key = None;
        self.possible_models.clear();
        if let Err(e) = self.store.clear_api_key() {
            log::warn!("Failed to remove API key: {}", e);
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn possible_models(&self) -> &[String] {
        &self.possible_models
    }

    pub fn refresh_models(&mut self) -> Result<(), ChatError> {
        let api_key = self.api_key.as_deref().ok_or(ChatError::MissingApiKey)?;
        self.possible_models = self.backend.list_models(api_key)?;
        Ok(())
    }

    pub fn select_model(&mut self, model: &str) {
        self.model = model.trim().to_string();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn send(&mut self, input: &str, on_delta: &mut dyn FnMut(&str)) -> Result<&Message, ChatError> {
        if self.loading {
            return Err(ChatError::Busy);
        }
        let api_key = self.api_key.clone().ok_or(ChatError::MissingApiKey)?;

        let mut input_messages = Vec::with_capacity(self.messages.len() + 1);
        input_messages.push(current_system_message());
        input_messages.extend(self.messages.iter().skip(1).cloned());
        let rollback = input_messages.clone();
        input_messages.push(Message::user(input));

        self.messages = input_messages;
        self.complete(&api_key, rollback, on_delta)
    }

    /// Asks again for the reply to the last user message.
    pub fn resend(&mut self, on_delta: &mut dyn FnMut(&str)) -> Result<&Message, ChatError> {
        if self.loading {
            return Err(ChatError::Busy);
        }
        let api_key = self.api_key.clone().ok_or(ChatError::MissingApiKey)?;
        let last_user = self
            .messages
            .iter()
            .rposition(|message| message.role == Role::User)
            .ok_or(ChatError::NothingToResend)?;

        let rollback = self.messages.clone();
        self.messages.truncate(last_user + 1);
        self.messages[0] = current_system_message();
        self.complete(&api_key, rollback, on_delta)
    }

    fn complete(
        &mut self,
        api_key: &str,
        rollback: Vec<Message>,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<&Message, ChatError> {
        self.loading = true;
        let result = self.backend.stream_chat(api_key, &self.model, &self.messages, on_delta);
        self.loading = false;

        match result {
            Ok(content) => {
                self.messages.push(Message::assistant(content));
                self.persist_messages();
                Ok(&self.messages[self.messages.len() - 1])
            }
            Err(e) => {
                self.messages = rollback;
                Err(e)
            }
        }
    }

    pub fn reset(&mut self) {
        self.messages.truncate(1);
        self.persist_messages();
    }

    pub fn rooms(&self) -> impl Iterator<Item = &ChatRoom> {
        self.rooms.iter()
    }

    pub fn current_room(&self) -> Option<&ChatRoom> {
        self.rooms.get(self.current_room)
    }

    pub fn create_room(&mut self, name: &str) -> Result<ChatRoom, ChatError> {
        if self.loading {
            return Err(ChatError::Busy);
        }
        let room = self.rooms.create(name);
        self.persist_rooms();
        self.current_room = room.id;
        self.messages = vec![current_system_message()];
        Ok(room)
    }

    pub fn switch_room(&mut self, id: u64) -> Result<&ChatRoom, ChatError> {
        if self.loading {
            return Err(ChatError::Busy);
        }
        if self.rooms.get(id).is_none() {
            return Err(ChatError::UnknownRoom(id));
        }
        self.current_room = id;
        self.messages = with_system_message(self.store.load_messages(id));
        self.rooms.get(id).ok_or(ChatError::UnknownRoom(id))
    }

    /// Deletes a room and its messages. The last room is replaced by a fresh
    /// one so there is always a room to talk in.
    pub fn delete_room(&mut self, id: u64) -> Result<ChatRoom, ChatError> {
        if self.loading {
            return Err(ChatError::Busy);
        }
        let removed = self.rooms.remove(id).ok_or(ChatError::UnknownRoom(id))?;
        if let Err(e) = self.store.remove_messages(id) {
            log::warn!("Failed to remove messages of room {}: {}", id, e);
        }
        if self.rooms.is_empty() {
            self.rooms.create("");
        }
        self.persist_rooms();

        if self.current_room == id {
            let next = self.rooms.first().map(|room| room.id).unwrap_or(1);
            self.current_room = next;
            self.messages = with_system_message(self.store.load_messages(next));
        }
        Ok(removed)
    }

    fn persist_messages(&self) {
        if let Err(e) = self.store.save_messages(self.current_room, &self.messages) {
            log::warn!("Failed to save messages: {}", e);
        }
    }

    fn persist_rooms(&self) {
        if let Err(e) = self.store.save_rooms(self.rooms.as_slice()) {
            log::warn!("Failed to save rooms: {}", e);
        }
    }
}

// The list always leads with a system message.
fn with_system_message(mut messages: Vec<Message>) -> Vec<Message> {
    if messages.first().map(|message| message.role) == Some(Role::System) {
        messages[0] = current_system_message();
    } else {
        messages.insert(0, current_system_message());
    }
    messages
}

pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() < 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ScriptedBackend {
        valid_key: String,
        replies: RefCell<Vec<Result<Vec<&'static str>, ChatError>>>,
        requests: RefCell<Vec<Vec<Message>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<Vec<&'static str>, ChatError>>) -> Self {
            Self {
                valid_key: "sk-valid-key".to_string(),
                replies: RefCell::new(replies),
                requests: RefCell::default(),
            }
        }
    }

    impl Backend for ScriptedBackend {
        fn list_models(&self, api_key: &str) -> Result<Vec<String>, ChatError> {
            if api_key == self.valid_key {
                Ok(vec!["gpt-3.5-turbo".to_string(), "gpt-4".to_string()])
            } else {
                Err(ChatError::Api { status: 401, message: "Incorrect API key provided".to_string() })
            }
        }

        fn stream_chat(
            &self,
            api_key: &str,
            _model: &str,
            messages: &[Message],
            on_delta: &mut dyn FnMut(&str),
        ) -> Result<String, ChatError> {
            assert_eq!(api_key, self.valid_key);
            self.requests.borrow_mut().push(messages.to_vec());
            let deltas = self.replies.borrow_mut().remove(0)?;
            for &delta in &deltas {
                on_delta(delta);
            }
            Ok(deltas.concat())
        }
    }

    fn open_session(
        dir: &tempfile::TempDir,
        replies: Vec<Result<Vec<&'static str>, ChatError>>,
    ) -> ChatSession<ScriptedBackend> {
        let config = Config { api_key: Some("sk-valid-key".to_string()), ..Config::default() };
        ChatSession::open(&config, Store::new(dir.path()), ScriptedBackend::new(replies))
    }

    #[test]
    fn opens_with_a_room_and_a_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let session = open_session(&dir, vec![]);

        assert_eq!(session.current_room().map(|r| r.id), Some(1));
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, Role::System);
        assert_eq!(Store::new(dir.path()).load_rooms().len(), 1);
    }

    #[test]
    fn send_appends_streamed_reply_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![Ok(vec!["Hi", " there"])]);

        let mut shown = String::new();
        let reply = session.send("Hello", &mut |d| shown.push_str(d)).unwrap().clone();

        assert_eq!(reply, Message::assistant("Hi there"));
        assert_eq!(shown, "Hi there");
        assert!(!session.loading);

        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

        let saved = Store::new(dir.path()).load_messages(1);
        assert_eq!(saved, session.messages());
    }

    #[test]
    fn empty_stream_yields_empty_assistant_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![Ok(vec![])]);

        let reply = session.send("Anything?", &mut |_| {}).unwrap();
        assert_eq!(reply, &Message::assistant(""));
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn failed_send_rolls_back_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(
            &dir,
            vec![Ok(vec!["first"]), Err(ChatError::ContextLengthExceeded)],
        );
        session.send("one", &mut |_| {}).unwrap();

        let err = session.send("two", &mut |_| {}).unwrap_err();
        assert!(matches!(err, ChatError::ContextLengthExceeded));
        assert!(!session.loading);

        let contents: Vec<&str> = session.messages().iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "first"]);
    }

    #[test]
    fn each_request_carries_prior_turns() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![Ok(vec!["a"]), Ok(vec!["b"])]);
        session.send("q1", &mut |_| {}).unwrap();
        session.send("q2", &mut |_| {}).unwrap();

        let requests = session.backend.requests.borrow();
        assert_eq!(requests[0].len(), 2);
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[1][0].role, Role::System);
        assert_eq!(requests[1][3], Message::user("q2"));
    }

    #[test]
    fn send_is_refused_while_loading() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![]);
        session.loading = true;

        assert!(matches!(session.send("hi", &mut |_| {}), Err(ChatError::Busy)));
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn send_without_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            ChatSession::open(&Config::default(), Store::new(dir.path()), ScriptedBackend::new(vec![]));

        assert!(!session.has_api_key());
        assert!(matches!(session.send("hi", &mut |_| {}), Err(ChatError::MissingApiKey)));
    }

    #[test]
    fn resend_replaces_the_last_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![Ok(vec!["draft"]), Ok(vec!["better"])]);
        session.send("write", &mut |_| {}).unwrap();

        let reply = session.resend(&mut |_| {}).unwrap();
        assert_eq!(reply.content, "better");
        assert_eq!(session.messages().len(), 3);

        let requests = session.backend.requests.borrow();
        assert_eq!(requests[1].last(), Some(&Message::user("write")));
    }

    #[test]
    fn failed_resend_keeps_the_previous_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![Ok(vec!["draft"]), Err(ChatError::RateLimited)]);
        session.send("write", &mut |_| {}).unwrap();
        let before = session.messages().to_vec();

        let err = session.resend(&mut |_| {}).unwrap_err();
        assert!(matches!(err, ChatError::RateLimited));
        assert!(!session.loading);
        assert_eq!(session.messages(), before.as_slice());
        assert_eq!(session.messages().last(), Some(&Message::assistant("draft")));
    }

    #[test]
    fn resend_needs_a_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![]);
        assert!(matches!(session.resend(&mut |_| {}), Err(ChatError::NothingToResend)));
    }

    #[test]
    fn api_key_is_verified_before_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut session = ChatSession::open(&Config::default(), store.clone(), ScriptedBackend::new(vec![]));

        assert!(session.set_api_key("sk-wrong").is_err());
        assert!(!session.has_api_key());
        assert_eq!(store.load_api_key(), None);

        session.set_api_key("   ").unwrap();
        assert!(!session.has_api_key());

        session.set_api_key(" sk-valid-key ").unwrap();
        assert_eq!(session.masked_api_key().as_deref(), Some("sk-...-key"));
        assert_eq!(session.possible_models(), ["gpt-3.5-turbo", "gpt-4"]);
        assert_eq!(store.load_api_key().as_deref(), Some("sk-valid-key"));

        session.clear_api_key();
        assert!(!session.has_api_key());
        assert_eq!(store.load_api_key(), None);
    }

    #[test]
    fn models_are_refreshed_with_the_current_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![]);
        assert!(session.possible_models().is_empty());

        session.refresh_models().unwrap();
        assert_eq!(session.possible_models().len(), 2);

        session.select_model(" gpt-4 ");
        assert_eq!(session.model(), "gpt-4");

        session.clear_api_key();
        assert!(matches!(session.refresh_models(), Err(ChatError::MissingApiKey)));
    }

    #[test]
    fn rooms_keep_their_own_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![Ok(vec!["in one"]), Ok(vec!["in two"])]);
        session.send("first room", &mut |_| {}).unwrap();

        let second = session.create_room("Second").unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(session.messages().len(), 1);
        session.send("second room", &mut |_| {}).unwrap();

        session.switch_room(1).unwrap();
        assert_eq!(session.messages()[1], Message::user("first room"));
        session.switch_room(2).unwrap();
        assert_eq!(session.messages()[2], Message::assistant("in two"));

        assert!(matches!(session.switch_room(42), Err(ChatError::UnknownRoom(42))));
        assert_eq!(session.current_room().map(|r| r.id), Some(2));
    }

    #[test]
    fn deleting_the_current_room_moves_to_another() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![]);
        session.create_room("Other").unwrap();

        session.delete_room(2).unwrap();
        assert_eq!(session.current_room().map(|r| r.id), Some(1));

        session.delete_room(1).unwrap();
        let names: Vec<String> = session.rooms().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["Chat 1"]);
        assert_eq!(session.messages().len(), 1);
        assert!(matches!(session.delete_room(9), Err(ChatError::UnknownRoom(9))));
    }

    #[test]
    fn reset_keeps_only_the_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&dir, vec![Ok(vec!["x"])]);
        session.send("y", &mut |_| {}).unwrap();

        session.reset();
        assert_eq!(session.messages().len(), 1);
        assert_eq!(Store::new(dir.path()).load_messages(1).len(), 1);
    }

    #[test]
    fn stored_lists_without_system_message_get_one() {
        let messages = with_system_message(vec![Message::user("orphan")]);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1], Message::user("orphan"));
    }

    #[test]
    fn masks_keys() {
        assert_eq!(mask_api_key("sk-abcdefghijklmnop1234"), "sk-...1234");
        assert_eq!(mask_api_key("short"), "*****");
    }
}
