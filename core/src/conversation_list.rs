/// Conversation list synchronizer
///
/// Follows child diffs of "conversations where I am a member", keeps them
/// in a local insertion-ordered map and, after every change, emits the list
/// sorted by most recent message (conversations without messages last).
use crate::error::{ChatError, Result};
use crate::messenger_types::ConversationSummary;
use crate::config::Config;
use crate::directory::UserDirectory;
use crate::model::{message_order, Conversation, UserProfile};
use crate::session::Session;
use crate::store::{ChildEvent, EqualityFilter, RemoteTreeStore, Subscription};
use crate::timestamp::ElapsedLabel;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Local state of the conversations we belong to
#[derive(Debug, Default, Clone)]
pub struct ConversationList {
    entries: HashMap<String, (u64, Conversation)>,
    next_seq: u64,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one store event in; returns whether anything changed
    pub fn apply(&mut self, event: ChildEvent) -> bool {
        match event {
            ChildEvent::Added { key, value } | ChildEvent::Changed { key, value } => {
                match serde_json::from_value::<Conversation>(value) {
                    Ok(conversation) => {
                        self.upsert(key, conversation);
                        true
                    }
                    Err(e) => {
                        warn!("Skipping unreadable conversation {}: {}", key, e);
                        false
                    }
                }
            }
            ChildEvent::Removed { key, .. } => self.remove(&key),
            ChildEvent::Moved { .. } => false,
        }
    }

    /// Insert or replace; a replaced entry keeps its original position
    pub fn upsert(&mut self, conversation_id: String, conversation: Conversation) {
        match self.entries.get_mut(&conversation_id) {
            Some(entry) => entry.1 = conversation,
            None => {
                self.entries
                    .insert(conversation_id, (self.next_seq, conversation));
                self.next_seq += 1;
            }
        }
    }

    pub fn remove(&mut self, conversation_id: &str) -> bool {
        self.entries.remove(conversation_id).is_some()
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.entries.get(conversation_id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest last message first; conversations without messages after
    /// all others, in insertion order
    pub fn sorted(&self) -> Vec<(&str, &Conversation)> {
        let mut rows: Vec<(&str, u64, &Conversation)> = self
            .entries
            .iter()
            .map(|(id, (seq, c))| (id.as_str(), *seq, c))
            .collect();

        rows.sort_by(|a, b| {
            let by_recency = match (a.2.last_message(), b.2.last_message()) {
                (Some(x), Some(y)) => message_order(y, x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_recency.then(a.1.cmp(&b.1))
        });
        rows.into_iter().map(|(id, _, c)| (id, c)).collect()
    }

    /// Sorted view with derived fields for `self_id`
    pub fn summaries(
        &self,
        self_id: &str,
        now: DateTime<Utc>,
        profiles: &HashMap<String, Option<UserProfile>>,
    ) -> Vec<ConversationSummary> {
        self.sorted()
            .into_iter()
            .map(|(id, conversation)| summarize(id, conversation, self_id, now, profiles))
            .collect()
    }

    fn counterpart_ids(&self, self_id: &str) -> Vec<String> {
        self.entries
            .values()
            .filter_map(|(_, c)| c.counterpart_of(self_id).map(str::to_string))
            .collect()
    }
}

fn summarize(
    conversation_id: &str,
    conversation: &Conversation,
    self_id: &str,
    now: DateTime<Utc>,
    profiles: &HashMap<String, Option<UserProfile>>,
) -> ConversationSummary {
    let counterpart_id = conversation.counterpart_of(self_id).map(str::to_string);
    let counterpart = counterpart_id
        .as_ref()
        .and_then(|id| profiles.get(id).cloned().flatten());
    let last_message = conversation.last_message().map(|(_, m)| m.clone());
    let elapsed = last_message.as_ref().and_then(|m| {
        ElapsedLabel::from_stamp(&m.sent_at, now)
            .map_err(|e| debug!("No elapsed label for {}: {}", conversation_id, e))
            .ok()
    });

    ConversationSummary {
        conversation_id: conversation_id.to_string(),
        counterpart_id,
        counterpart,
        preview: last_message.as_ref().map(|m| m.content.clone()),
        last_message,
        elapsed,
        unread_count: conversation.unread_count(self_id),
        conversation: conversation.clone(),
    }
}

pub struct ConversationListSync<S> {
    store: Arc<S>,
    session: Session,
    directory: UserDirectory<S>,
}

impl<S: RemoteTreeStore> ConversationListSync<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        let directory = UserDirectory::new(store.clone(), session.config_arc());
        Self {
            store,
            session,
            directory,
        }
    }

    /// Start following the conversations we are a member of
    pub async fn subscribe(&self) -> Result<ConversationListFeed<S>> {
        let config = self.session.config();
        let filter = EqualityFilter::new(
            Config::membership_field(self.session.user_id()),
            Value::Bool(true),
        );
        let sub = self
            .store
            .subscribe_child_diff(&config.conversations_path(), Some(filter))
            .await
            .map_err(|e| ChatError::QueryFailed(format!("conversation list: {}", e)))?;

        Ok(ConversationListFeed {
            sub,
            list: ConversationList::new(),
            directory: self.directory.clone(),
            profiles: HashMap::new(),
            session: self.session.clone(),
        })
    }
}

/// Live, sorted conversation list for one participant
pub struct ConversationListFeed<S> {
    sub: Subscription<ChildEvent>,
    list: ConversationList,
    directory: UserDirectory<S>,
    /// One-shot counterpart lookups, `None` when the user has no profile
    profiles: HashMap<String, Option<UserProfile>>,
    session: Session,
}

impl<S: RemoteTreeStore> ConversationListFeed<S> {
    /// Wait for the next change and return the recomputed list;
    /// `None` once unsubscribed or the store closed
    pub async fn next(&mut self) -> Option<Vec<ConversationSummary>> {
        loop {
            let event = self.sub.recv().await?;
            if self.list.apply(event) {
                break;
            }
        }
        self.resolve_counterparts().await;
        Some(self.snapshot())
    }

    /// Call `on_list_changed` after every change until the feed ends
    pub async fn run<F>(mut self, mut on_list_changed: F)
    where
        F: FnMut(Vec<ConversationSummary>),
    {
        while let Some(list) = self.next().await {
            on_list_changed(list);
        }
    }

    /// Current sorted list without waiting
    pub fn snapshot(&self) -> Vec<ConversationSummary> {
        self.list
            .summaries(self.session.user_id(), self.session.now(), &self.profiles)
    }

    pub fn list(&self) -> &ConversationList {
        &self.list
    }

    pub fn unsubscribe(&mut self) {
        if self.sub.is_active() {
            self.sub.unsubscribe();
            debug!("Stopped following conversations of {}", self.session.user_id());
        }
    }

    async fn resolve_counterparts(&mut self) {
        for counterpart_id in self.list.counterpart_ids(self.session.user_id()) {
            if self.profiles.contains_key(&counterpart_id) {
                continue;
            }
            match self.directory.lookup(&counterpart_id).await {
                Ok(profile) => {
                    self.profiles.insert(counterpart_id, profile);
                }
                // Not cached, so the next change retries
                Err(e) => warn!("Counterpart lookup for {} failed: {}", counterpart_id, e),
            }
        }
    }
}
