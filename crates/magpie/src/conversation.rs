//! Conversation state for the chat client.
//!
//! The store is an explicit object passed to whoever drives the UI, with
//! persistence injected as a save callback. Mutations return a targeted
//! [`StoreUpdate`] keyed by conversation and message id, so a view can patch
//! itself without re-serializing the whole list.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub created: i64,
}

impl ConversationMessage {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            content: content.into(),
            created: Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub pinned: bool,
    pub messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            pinned: false,
            messages: Vec::new(),
        }
    }

    pub fn message(&self, id: Uuid) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last_assistant(&self) -> Option<&ConversationMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Assistant)
    }

    /// Case-insensitive substring match over the title and message contents.
    pub fn matches_query(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query)
            || self
                .messages
                .iter()
                .any(|m| m.content.to_lowercase().contains(&query))
    }
}

/// What changed in the store, keyed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreUpdate {
    ConversationAdded { conversation: Uuid },
    ConversationRemoved { conversation: Uuid },
    ConversationChanged { conversation: Uuid },
    MessageAdded { conversation: Uuid, message: Uuid },
    MessageAppended { conversation: Uuid, message: Uuid },
}

type SaveFn = Box<dyn FnMut(&[Conversation]) + Send>;

/// In-memory conversation list with an active selection.
///
/// The save callback runs after every mutation; the storage medium behind it
/// is the caller's concern.
#[derive(Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: Option<Uuid>,
    on_save: Option<SaveFn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(save: impl FnMut(&[Conversation]) + Send + 'static) -> Self {
        Self {
            conversations: Vec::new(),
            active: None,
            on_save: Some(Box::new(save)),
        }
    }

    fn save(&mut self) {
        if let Some(save) = self.on_save.as_mut() {
            save(&self.conversations);
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// The active conversation, falling back to the first one.
    pub fn active(&self) -> Option<&Conversation> {
        self.active
            .and_then(|id| self.get(id))
            .or_else(|| self.conversations.first())
    }

    pub fn set_active(&mut self, id: Uuid) -> bool {
        if self.get(id).is_some() {
            self.active = Some(id);
            self.save();
            true
        } else {
            false
        }
    }

    /// Create a conversation, make it active, and return its id with the
    /// update.
    pub fn new_conversation(&mut self, title: Option<String>) -> (Uuid, StoreUpdate) {
        let title = title.unwrap_or_else(|| format!("Chat {}", self.conversations.len() + 1));
        let conversation = Conversation::new(title);
        let id = conversation.id;
        self.conversations.push(conversation);
        self.active = Some(id);
        self.save();
        (id, StoreUpdate::ConversationAdded { conversation: id })
    }

    pub fn rename(&mut self, id: Uuid, title: impl Into<String>) -> Option<StoreUpdate> {
        let title = title.into();
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        let conversation = self.get_mut(id)?;
        conversation.title = title.to_string();
        self.save();
        Some(StoreUpdate::ConversationChanged { conversation: id })
    }

    pub fn set_pinned(&mut self, id: Uuid, pinned: bool) -> Option<StoreUpdate> {
        let conversation = self.get_mut(id)?;
        conversation.pinned = pinned;
        self.save();
        Some(StoreUpdate::ConversationChanged { conversation: id })
    }

    /// Remove a conversation; the active selection falls back to the first
    /// remaining one.
    pub fn remove(&mut self, id: Uuid) -> Option<StoreUpdate> {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return None;
        }
        if self.active == Some(id) {
            self.active = self.conversations.first().map(|c| c.id);
        }
        self.save();
        Some(StoreUpdate::ConversationRemoved { conversation: id })
    }

    /// Append a new message and return its id with the update.
    pub fn add_message(
        &mut self,
        conversation: Uuid,
        sender: Sender,
        content: impl Into<String>,
    ) -> Option<(Uuid, StoreUpdate)> {
        let target = self.get_mut(conversation)?;
        let message = ConversationMessage::new(sender, content);
        let message_id = message.id;
        target.messages.push(message);
        self.save();
        Some((
            message_id,
            StoreUpdate::MessageAdded {
                conversation,
                message: message_id,
            },
        ))
    }

    /// Append text to an existing message's content, in place.
    pub fn append_to_message(
        &mut self,
        conversation: Uuid,
        message: Uuid,
        text: &str,
    ) -> Option<StoreUpdate> {
        let target = self.get_mut(conversation)?;
        let target = target.messages.iter_mut().find(|m| m.id == message)?;
        target.content.push_str(text);
        self.save();
        Some(StoreUpdate::MessageAppended {
            conversation,
            message,
        })
    }

    /// Conversations in sidebar order: pinned first, then by title.
    pub fn sorted(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.iter().collect();
        list.sort_by(|a, b| b.pinned.cmp(&a.pinned).then_with(|| a.title.cmp(&b.title)));
        list
    }

    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        self.sorted()
            .into_iter()
            .filter(|c| c.matches_query(query))
            .collect()
    }
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.conversations)
            .field("active", &self.active)
            .field("on_save", &self.on_save.as_ref().map(|_| "..."))
            .finish()
    }
}
