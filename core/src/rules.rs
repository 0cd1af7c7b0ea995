/// Field-level ownership rules, evaluated the way a hosted store's
/// server-side validation would evaluate them
///
/// A participant writes only its own presence entry and the messages it
/// authored. The one exception is `confirmed`, which any member may flip to
/// `true` on a message it did not send.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::model::{Conversation, Message, PresenceState};
use crate::store::TreePath;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct OwnershipRules {
    conversations: TreePath,
    users: TreePath,
}

fn deny(actor: &str, path: &TreePath, why: &str) -> ChatError {
    ChatError::PermissionDenied(format!("{} may not write {}: {}", actor, path, why))
}

impl OwnershipRules {
    pub fn new(config: &Config) -> Self {
        Self {
            conversations: config.conversations_path(),
            users: config.users_path(),
        }
    }

    /// Path of the conversation a write lands in, if any
    pub fn conversation_of(&self, path: &TreePath) -> Option<TreePath> {
        if path.starts_with(&self.conversations) && path.len() > self.conversations.len() {
            Some(path.truncate(self.conversations.len() + 1))
        } else {
            None
        }
    }

    /// Decide whether `actor` may replace the node at `path` with `new`
    /// (`None` deletes). `conversation` is the current state of the
    /// conversation the path lies in.
    pub fn authorize(
        &self,
        actor: &str,
        path: &TreePath,
        new: Option<&Value>,
        conversation: Option<&Conversation>,
    ) -> Result<()> {
        if path.starts_with(&self.users) && path.len() > self.users.len() {
            let uid = &path.segments()[self.users.len()];
            if uid != actor {
                return Err(deny(actor, path, "profile belongs to another user"));
            }
            return Ok(());
        }

        if self.conversation_of(path).is_none() {
            return Err(deny(actor, path, "outside writable roots"));
        }
        let rest: Vec<&str> = path.segments()[self.conversations.len() + 1..]
            .iter()
            .map(String::as_str)
            .collect();

        match rest.as_slice() {
            [] => self.authorize_conversation(actor, path, new, conversation),
            ["participants", participant] => {
                let next = match new {
                    Some(value) => Some(serde_json::from_value::<PresenceState>(value.clone())?),
                    None => None,
                };
                self.authorize_presence(actor, path, participant, next, conversation)
            }
            ["participants", participant, field] => {
                let current = conversation
                    .and_then(|c| c.presence_of(participant))
                    .ok_or_else(|| deny(actor, path, "not a participant"))?;
                let flag = new
                    .and_then(Value::as_bool)
                    .ok_or_else(|| deny(actor, path, "presence flags must be booleans"))?;
                let next = match *field {
                    "member" => PresenceState { member: flag, ..current },
                    "active" => PresenceState { active: flag, ..current },
                    _ => return Err(deny(actor, path, "unknown presence field")),
                };
                self.authorize_presence(actor, path, participant, Some(next), conversation)
            }
            ["messages", message_id] => {
                self.authorize_message(actor, path, message_id, new, conversation)
            }
            ["messages", message_id, "confirmed"] => {
                let conversation =
                    conversation.ok_or_else(|| deny(actor, path, "no such conversation"))?;
                if !conversation.is_member(actor) {
                    return Err(deny(actor, path, "not a member"));
                }
                if !conversation.messages.contains_key(*message_id) {
                    return Err(deny(actor, path, "no such message"));
                }
                if new != Some(&Value::Bool(true)) {
                    return Err(deny(actor, path, "confirmed can only be set to true"));
                }
                Ok(())
            }
            _ => Err(deny(actor, path, "field is not writable")),
        }
    }

    fn authorize_conversation(
        &self,
        actor: &str,
        path: &TreePath,
        new: Option<&Value>,
        conversation: Option<&Conversation>,
    ) -> Result<()> {
        match (new, conversation) {
            (Some(value), None) => {
                let created: Conversation = serde_json::from_value(value.clone())?;
                if created.participants.len() != 2 || !created.participants.contains_key(actor) {
                    return Err(deny(actor, path, "needs exactly two participants including the creator"));
                }
                if !created.participants.values().all(PresenceState::is_valid) {
                    return Err(deny(actor, path, "active participant must be a member"));
                }
                if !created.messages.is_empty() {
                    return Err(deny(actor, path, "new conversations start empty"));
                }
                Ok(())
            }
            (Some(_), Some(_)) => Err(deny(actor, path, "conversation already exists")),
            (None, None) => Ok(()),
            (None, Some(existing)) => {
                if !existing.participants.contains_key(actor) {
                    return Err(deny(actor, path, "not a participant"));
                }
                if !existing.is_abandoned() {
                    return Err(deny(actor, path, "members remain"));
                }
                Ok(())
            }
        }
    }

    fn authorize_presence(
        &self,
        actor: &str,
        path: &TreePath,
        participant: &str,
        next: Option<PresenceState>,
        conversation: Option<&Conversation>,
    ) -> Result<()> {
        if participant != actor {
            return Err(deny(actor, path, "presence belongs to another participant"));
        }
        let current = conversation
            .and_then(|c| c.presence_of(participant))
            .ok_or_else(|| deny(actor, path, "participants cannot be added"))?;
        let next = next.ok_or_else(|| deny(actor, path, "participants cannot be removed"))?;
        if !next.is_valid() {
            return Err(deny(actor, path, "active participant must be a member"));
        }
        if !current.member && next.member {
            return Err(deny(actor, path, "cannot rejoin after leaving"));
        }
        Ok(())
    }

    fn authorize_message(
        &self,
        actor: &str,
        path: &TreePath,
        message_id: &str,
        new: Option<&Value>,
        conversation: Option<&Conversation>,
    ) -> Result<()> {
        let conversation = conversation.ok_or_else(|| deny(actor, path, "no such conversation"))?;
        let existing = conversation.messages.get(message_id);
        match (new, existing) {
            (Some(value), None) => {
                let message: Message = serde_json::from_value(value.clone())?;
                if message.sender_id != actor {
                    return Err(deny(actor, path, "sender must be the writer"));
                }
                if !conversation.is_member(actor) {
                    return Err(deny(actor, path, "not a member"));
                }
                Ok(())
            }
            (Some(_), Some(_)) => Err(deny(actor, path, "messages are immutable")),
            (None, Some(message)) if message.sender_id != actor => {
                Err(deny(actor, path, "only the sender may delete"))
            }
            (None, _) => Ok(()),
        }
    }
}
