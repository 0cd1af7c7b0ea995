/// Shared types handed to the presentation layer
use crate::model::{Conversation, Message, UserProfile};
use crate::timestamp::ElapsedLabel;
use serde::{Deserialize, Serialize};

/// One row of the conversation list, derived from the raw conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    /// The participant that is not us
    pub counterpart_id: Option<String>,
    /// Resolved once per counterpart; `None` when the user has no profile
    pub counterpart: Option<UserProfile>,
    pub last_message: Option<Message>,
    /// Content of the last message
    pub preview: Option<String>,
    pub elapsed: Option<ElapsedLabel>,
    pub unread_count: usize,
    pub conversation: Conversation,
}

/// Decoded change to a conversation's message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    Added { message_id: String, message: Message },
    Changed { message_id: String, message: Message },
    Removed { message_id: String },
}

impl MessageEvent {
    pub fn message_id(&self) -> &str {
        match self {
            MessageEvent::Added { message_id, .. }
            | MessageEvent::Changed { message_id, .. }
            | MessageEvent::Removed { message_id } => message_id,
        }
    }
}

/// Events produced by an open conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    MessageAdded { message_id: String, message: Message },
    MessageChanged { message_id: String, message: Message },
    MessageRemoved { message_id: String },
    /// The counterpart opened or closed the conversation
    CounterpartActive { active: bool },
    /// We confirmed a message from the counterpart
    ReadReceiptSent { message_id: String },
    /// Confirming a message failed; it is retried on the next event or on resume
    ReadReceiptFailed { message_id: String, error: String },
}

impl From<MessageEvent> for RoomEvent {
    fn from(event: MessageEvent) -> Self {
        match event {
            MessageEvent::Added { message_id, message } => {
                RoomEvent::MessageAdded { message_id, message }
            }
            MessageEvent::Changed { message_id, message } => {
                RoomEvent::MessageChanged { message_id, message }
            }
            MessageEvent::Removed { message_id } => RoomEvent::MessageRemoved { message_id },
        }
    }
}
