//! Wires the chat client to the conversation store.
//!
//! One session drives one transcript: each send pushes the user message,
//! creates the empty assistant placeholder, and streams fragments into that
//! placeholder in place. Failure paths leave a visible marker in the
//! transcript instead of erroring out of the session.

use crate::client::{CancelToken, ChatClient, GenerationRequest};
use crate::conversation::{ConversationStore, Sender};
use crate::errors::{ChatError, ChatResult};

const CANCELLED_MARKER: &str = "\n\n[Cancelled]";

/// How a send ended. Every variant leaves the session ready for the next
/// send; `Cancelled` and `Failed` also leave a marker in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    Cancelled,
    Failed,
    /// Empty input, nothing was sent.
    Ignored,
}

pub struct Session {
    client: ChatClient,
    store: ConversationStore,
    model: String,
}

impl Session {
    pub fn new(client: ChatClient, store: ConversationStore, model: impl Into<String>) -> Self {
        Session {
            client,
            store,
            model: model.into(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    /// Send a prompt and stream the reply into the active conversation.
    ///
    /// The `cancel` token is live only for the duration of this call; keep a
    /// clone to drive a stop control, and drop it once `send` returns. Taking
    /// `&mut self` means a second send cannot overlap a live one on the same
    /// session, which is the at-most-one-in-flight guarantee.
    pub async fn send(&mut self, text: &str, cancel: &CancelToken) -> ChatResult<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let conversation = match self.store.active().map(|c| c.id) {
            Some(id) => id,
            None => self.store.new_conversation(None).0,
        };

        // Prior transcript contents become the request's chat memory.
        let memory: Vec<String> = self
            .store
            .get(conversation)
            .map(|c| {
                c.messages
                    .iter()
                    .filter(|m| !m.content.is_empty())
                    .map(|m| m.content.clone())
                    .collect()
            })
            .unwrap_or_default();

        let _ = self.store.add_message(conversation, Sender::User, text);
        let Some((placeholder, _)) = self.store.add_message(conversation, Sender::Assistant, "")
        else {
            return Ok(SendOutcome::Ignored);
        };

        let request = GenerationRequest {
            prompt: text.to_string(),
            model: self.model.clone(),
            memory,
        };

        let Session { client, store, .. } = self;
        let result = client
            .stream_chat(&request, cancel, |fragment| {
                let _ = store.append_to_message(conversation, placeholder, fragment);
            })
            .await;

        let outcome = match result {
            Ok(()) => SendOutcome::Completed,
            Err(ChatError::Cancelled) => {
                let _ = self
                    .store
                    .append_to_message(conversation, placeholder, CANCELLED_MARKER);
                SendOutcome::Cancelled
            }
            Err(ChatError::UpstreamUnavailable {
                status: Some(code), ..
            }) => {
                let marker = format!("\n\n[Error: {code}]");
                let _ = self
                    .store
                    .append_to_message(conversation, placeholder, &marker);
                SendOutcome::Failed
            }
            Err(err) => {
                let marker = format!("\n\n[Error: {err}]");
                let _ = self
                    .store
                    .append_to_message(conversation, placeholder, &marker);
                SendOutcome::Failed
            }
        };
        Ok(outcome)
    }
}
