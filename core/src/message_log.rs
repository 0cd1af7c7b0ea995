/// Append-only message log per conversation
///
/// Consumers follow the log through child-level diffs, so each new event
/// costs O(1) on the wire and O(log n) locally instead of reloading the
/// whole conversation.
use crate::error::{ChatError, Result};
use crate::messenger_types::MessageEvent;
use crate::model::Message;
use crate::session::Session;
use crate::store::{ChildEvent, RemoteTreeStore, Subscription};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct MessageLog<S> {
    store: Arc<S>,
    session: Session,
}

impl<S: RemoteTreeStore> MessageLog<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        Self { store, session }
    }

    /// Append a message; `confirmed` starts as `recipient_active`.
    ///
    /// On failure nothing is written and the caller keeps the draft.
    pub async fn send(
        &self,
        conversation_id: &str,
        content: &str,
        recipient_active: bool,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidArgument("message is empty".to_string()));
        }

        let config = self.session.config();
        let self_id = self.session.user_id();
        let membership = config
            .participant_path(conversation_id, self_id)
            .child("member");
        let is_member = self
            .store
            .read(&membership)
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;
        if is_member != Some(Value::Bool(true)) {
            return Err(ChatError::NotFound(format!(
                "{} is not a member of {}",
                self_id, conversation_id
            )));
        }

        let messages = config.messages_path(conversation_id);
        let message_id = self
            .store
            .push(&messages)
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;
        let message = Message::new(self_id, self.session.stamp(), content, recipient_active);
        self.store
            .write(&messages.child(&message_id), serde_json::to_value(&message)?)
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;

        info!(
            "{} sent {} in {} (confirmed: {})",
            self_id, message_id, conversation_id, recipient_active
        );
        Ok(message_id)
    }

    /// Flip `confirmed` to true. Returns whether a write happened: already
    /// confirmed messages and our own messages are left alone.
    pub async fn mark_read(&self, conversation_id: &str, message_id: &str) -> Result<bool> {
        let path = self.session.config().message_path(conversation_id, message_id);
        let value = self
            .store
            .read(&path)
            .await
            .map_err(|e| ChatError::QueryFailed(format!("{}: {}", path, e)))?
            .ok_or_else(|| ChatError::NotFound(format!("message {}", path)))?;
        let message: Message = serde_json::from_value(value)?;

        if message.confirmed {
            return Ok(false);
        }
        if message.sender_id == self.session.user_id() {
            debug!("Not confirming own message {}", message_id);
            return Ok(false);
        }

        self.store
            .write_field(&path, "confirmed", Value::Bool(true))
            .await
            .map_err(|e| ChatError::SendFailed(format!("read receipt {}: {}", path, e)))?;
        debug!("{} confirmed {}", self.session.user_id(), message_id);
        Ok(true)
    }

    /// Remove a message. Only its sender should call this; the store's
    /// ownership rules are what actually enforce it.
    pub async fn delete(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let path = self.session.config().message_path(conversation_id, message_id);
        self.store
            .delete(&path)
            .await
            .map_err(|e| ChatError::SendFailed(format!("delete {}: {}", path, e)))?;
        info!("{} deleted {}", self.session.user_id(), path);
        Ok(())
    }

    /// Follow the log; existing messages arrive first as `Added`
    pub async fn subscribe(&self, conversation_id: &str) -> Result<MessageFeed> {
        let path = self.session.config().messages_path(conversation_id);
        let sub = self
            .store
            .subscribe_child_diff(&path, None)
            .await
            .map_err(|e| ChatError::QueryFailed(format!("subscribe {}: {}", path, e)))?;
        Ok(MessageFeed {
            sub,
            conversation_id: conversation_id.to_string(),
        })
    }
}

/// Decoded child-diff stream of one conversation's messages
pub struct MessageFeed {
    sub: Subscription<ChildEvent>,
    conversation_id: String,
}

impl MessageFeed {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Next decodable event; `None` once unsubscribed or the store closed
    pub async fn next(&mut self) -> Option<MessageEvent> {
        loop {
            let event = self.sub.recv().await?;
            if let Some(decoded) = decode(event) {
                return Some(decoded);
            }
        }
    }

    /// Next already-delivered event, without waiting
    pub fn try_next(&mut self) -> Option<MessageEvent> {
        while let Some(event) = self.sub.try_recv() {
            if let Some(decoded) = decode(event) {
                return Some(decoded);
            }
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.sub.is_active()
    }

    pub fn unsubscribe(&mut self) {
        if self.sub.is_active() {
            self.sub.unsubscribe();
            debug!("Stopped following messages of {}", self.conversation_id);
        }
    }
}

fn decode(event: ChildEvent) -> Option<MessageEvent> {
    let parse = |key: &str, value: Value| match serde_json::from_value::<Message>(value) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Skipping unreadable message {}: {}", key, e);
            None
        }
    };
    match event {
        ChildEvent::Added { key, value } => {
            let message = parse(&key, value)?;
            Some(MessageEvent::Added { message_id: key, message })
        }
        ChildEvent::Changed { key, value } => {
            let message = parse(&key, value)?;
            Some(MessageEvent::Changed { message_id: key, message })
        }
        ChildEvent::Removed { key, .. } => Some(MessageEvent::Removed { message_id: key }),
        ChildEvent::Moved { .. } => None,
    }
}

/// Local chronological view of a log, kept current from [`MessageEvent`]s
#[derive(Debug, Default, Clone)]
pub struct MessageTimeline {
    order: BTreeSet<(String, String)>,
    messages: HashMap<String, Message>,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::Added { message_id, message }
            | MessageEvent::Changed { message_id, message } => {
                if let Some(old) = self.messages.insert(message_id.clone(), message.clone()) {
                    self.order.remove(&(old.sent_at, message_id.clone()));
                }
                self.order
                    .insert((message.sent_at.clone(), message_id.clone()));
            }
            MessageEvent::Removed { message_id } => {
                if let Some(old) = self.messages.remove(message_id) {
                    self.order.remove(&(old.sent_at, message_id.clone()));
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.get(message_id)
    }

    /// Messages oldest first
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Message)> + '_ {
        self.order
            .iter()
            .filter_map(|(_, id)| self.messages.get(id).map(|m| (id.as_str(), m)))
    }

    pub fn last(&self) -> Option<(&str, &Message)> {
        self.order
            .iter()
            .next_back()
            .and_then(|(_, id)| self.messages.get(id).map(|m| (id.as_str(), m)))
    }

    /// Ids of messages `reader` has not confirmed yet, oldest first
    pub fn unread_by(&self, reader: &str) -> Vec<String> {
        self.iter()
            .filter(|(_, m)| m.is_unread_by(reader))
            .map(|(id, _)| id.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(id: &str, sender: &str, sent_at: &str, confirmed: bool) -> MessageEvent {
        MessageEvent::Added {
            message_id: id.to_string(),
            message: Message::new(sender, sent_at.to_string(), id, confirmed),
        }
    }

    #[test]
    fn test_timeline_orders_by_sent_at_then_id() {
        let mut timeline = MessageTimeline::new();
        timeline.apply(&added("k2", "a", "20240101000002", true));
        timeline.apply(&added("k1", "b", "20240101000009", true));
        timeline.apply(&added("k0", "a", "20240101000002", true));

        let ids: Vec<&str> = timeline.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["k0", "k2", "k1"]);
        assert_eq!(timeline.last().map(|(id, _)| id), Some("k1"));
    }

    #[test]
    fn test_timeline_change_and_remove() {
        let mut timeline = MessageTimeline::new();
        timeline.apply(&added("m1", "a", "20240101000001", false));
        timeline.apply(&added("m2", "a", "20240101000002", false));
        assert_eq!(timeline.unread_by("b"), vec!["m1", "m2"]);
        assert!(timeline.unread_by("a").is_empty());

        let mut confirmed = timeline.get("m1").unwrap().clone();
        confirmed.confirmed = true;
        timeline.apply(&MessageEvent::Changed {
            message_id: "m1".into(),
            message: confirmed,
        });
        assert_eq!(timeline.unread_by("b"), vec!["m2"]);
        assert_eq!(timeline.len(), 2);

        timeline.apply(&MessageEvent::Removed { message_id: "m2".into() });
        timeline.apply(&MessageEvent::Removed { message_id: "missing".into() });
        assert_eq!(timeline.len(), 1);
        assert!(timeline.unread_by("b").is_empty());
    }

    #[test]
    fn test_decode_skips_garbage_and_moves() {
        assert_eq!(
            decode(ChildEvent::Added {
                key: "m".into(),
                value: serde_json::json!({"content": 3})
            }),
            None
        );
        assert_eq!(
            decode(ChildEvent::Moved { key: "m".into(), previous: None }),
            None
        );
        assert_eq!(
            decode(ChildEvent::Removed { key: "m".into(), value: Value::Null }),
            Some(MessageEvent::Removed { message_id: "m".into() })
        );
    }
}
