/// ChatSync - one-to-one conversation sync over a realtime tree store
///
/// Conversation resolution, presence, message logs with read receipts,
/// the live conversation list and cleanup of abandoned conversations.

pub mod error;
pub mod config;
pub mod session;
pub mod timestamp;
pub mod model;
pub mod messenger_types;
pub mod store;
pub mod rules;
pub mod directory;
pub mod resolver;
pub mod presence;
pub mod message_log;
pub mod room;
pub mod conversation_list;
pub mod reaper;

pub use error::{ChatError, Result};
pub use config::Config;
pub use session::{Clock, ManualClock, Session, SystemClock};
pub use model::{Conversation, Message, PresenceState, UserProfile};
pub use store::{GuardedStore, MemoryTreeStore, RemoteTreeStore};
pub use resolver::{ConversationResolver, Resolution};
pub use presence::{PresenceTracker, PresenceWatch};
pub use message_log::{MessageFeed, MessageLog, MessageTimeline};
pub use room::ConversationRoom;
pub use conversation_list::{ConversationList, ConversationListFeed, ConversationListSync};
pub use reaper::{ConversationReaper, ReapOutcome};
pub use directory::UserDirectory;
