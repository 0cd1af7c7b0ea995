/// Deletes conversations nobody belongs to anymore
///
/// Best effort: runs only after a participant leaves, reads the participant
/// map once and deletes the whole conversation when every `member` flag is
/// false. Two near-simultaneous leaves may both delete (harmless) or both
/// see the other still a member, leaving the conversation to the next leave.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::model::PresenceState;
use crate::store::RemoteTreeStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What a reaping pass found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReapOutcome {
    Deleted,
    Retained { members: usize },
    AlreadyGone,
}

pub struct ConversationReaper<S> {
    store: Arc<S>,
    config: Arc<Config>,
}

impl<S: RemoteTreeStore> ConversationReaper<S> {
    pub fn new(store: Arc<S>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub async fn after_leave(&self, conversation_id: &str) -> Result<ReapOutcome> {
        let participants_path = self.config.participants_path(conversation_id);
        let snapshot = self
            .store
            .read(&participants_path)
            .await
            .map_err(|e| ChatError::QueryFailed(format!("participants of {}: {}", conversation_id, e)))?;

        let Some(value) = snapshot else {
            debug!("Conversation {} already removed", conversation_id);
            return Ok(ReapOutcome::AlreadyGone);
        };
        let participants: BTreeMap<String, PresenceState> = serde_json::from_value(value)?;

        let members = participants.values().filter(|p| p.member).count();
        if members > 0 {
            debug!("Conversation {} keeps {} member(s)", conversation_id, members);
            return Ok(ReapOutcome::Retained { members });
        }

        self.store
            .delete(&self.config.conversation_path(conversation_id))
            .await
            .map_err(|e| {
                ChatError::PresenceWriteFailed(format!("reap {}: {}", conversation_id, e))
            })?;
        info!("Reaped conversation {}", conversation_id);
        Ok(ReapOutcome::Deleted)
    }
}
