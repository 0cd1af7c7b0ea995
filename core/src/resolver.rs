/// Finds the conversation between two participants, or creates exactly one
///
/// The store can only filter on one field, so candidates are selected by
/// the counterpart's membership and then matched locally on the exact
/// participant pair. Two participants starting a conversation with each
/// other at the same moment can still both create one; that race is
/// accepted.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::model::Conversation;
use crate::session::Session;
use crate::store::{EqualityFilter, RemoteTreeStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub conversation_id: String,
    pub was_existing: bool,
}

pub struct ConversationResolver<S> {
    store: Arc<S>,
    session: Session,
}

impl<S: RemoteTreeStore> ConversationResolver<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        Self { store, session }
    }

    /// Existing conversation with `other_id` if we are both still members
    pub async fn find(&self, other_id: &str) -> Result<Option<String>> {
        let self_id = self.session.user_id();
        let config = self.session.config();
        let candidates = self
            .store
            .query_equal(
                &config.conversations_path(),
                EqualityFilter::new(Config::membership_field(other_id), Value::Bool(true)),
            )
            .await
            .map_err(|e| ChatError::QueryFailed(format!("conversations with {}: {}", other_id, e)))?;

        for (key, value) in candidates {
            let conversation: Conversation = match serde_json::from_value(value) {
                Ok(conversation) => conversation,
                Err(e) => {
                    warn!("Skipping unreadable conversation {}: {}", key, e);
                    continue;
                }
            };
            // A conversation we left is over for us
            if conversation.is_between(self_id, other_id) && conversation.is_member(self_id) {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    pub async fn find_or_create(&self, other_id: &str) -> Result<Resolution> {
        let self_id = self.session.user_id();
        Config::check_id("participant", self_id)?;
        Config::check_id("participant", other_id)?;
        if other_id == self_id {
            return Err(ChatError::InvalidArgument(format!(
                "cannot start a conversation between {} and '{}'",
                self_id, other_id
            )));
        }

        if let Some(conversation_id) = self.find(other_id).await? {
            debug!("Reusing conversation {} with {}", conversation_id, other_id);
            return Ok(Resolution {
                conversation_id,
                was_existing: true,
            });
        }

        let config = self.session.config();
        let root = config.conversations_path();
        let conversation_id = self
            .store
            .push(&root)
            .await
            .map_err(|e| ChatError::CreationFailed(e.to_string()))?;
        let conversation = Conversation::between(self_id, other_id);
        self.store
            .write(&root.child(&conversation_id), serde_json::to_value(&conversation)?)
            .await
            .map_err(|e| ChatError::CreationFailed(e.to_string()))?;

        info!(
            "Created conversation {} between {} and {}",
            conversation_id, self_id, other_id
        );
        Ok(Resolution {
            conversation_id,
            was_existing: false,
        })
    }
}
