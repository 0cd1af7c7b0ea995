/// An open conversation screen
///
/// Ties together our presence, the counterpart's `active` flag and the
/// message feed. While we are active every counterpart message that shows
/// up unconfirmed gets a read receipt. Receipts that fail are reported and
/// retried when the next event arrives or on resume.
use crate::error::Result;
use crate::message_log::{MessageFeed, MessageLog, MessageTimeline};
use crate::messenger_types::{MessageEvent, RoomEvent};
use crate::presence::{PresenceTracker, PresenceWatch};
use crate::reaper::ReapOutcome;
use crate::session::Session;
use crate::store::RemoteTreeStore;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ConversationRoom<S> {
    conversation_id: String,
    session: Session,
    presence: PresenceTracker<S>,
    log: MessageLog<S>,
    feed: MessageFeed,
    watch: PresenceWatch,
    watch_open: bool,
    timeline: MessageTimeline,
    active: bool,
    pending: VecDeque<RoomEvent>,
    /// Receipts whose write failed
    unconfirmed: BTreeSet<String>,
}

impl<S: RemoteTreeStore> ConversationRoom<S> {
    /// Enter the conversation: start watching the counterpart, follow the
    /// message log, then mark ourselves active. Nothing is written unless
    /// both subscriptions are in place.
    pub async fn open(
        store: Arc<S>,
        session: Session,
        conversation_id: &str,
        counterpart_id: &str,
    ) -> Result<Self> {
        let presence = PresenceTracker::new(store.clone(), session.clone());
        let log = MessageLog::new(store, session.clone());

        let watch = presence
            .watch_counterpart_active(conversation_id, counterpart_id)
            .await?;
        let feed = log.subscribe(conversation_id).await?;
        presence.enter(conversation_id).await?;

        info!(
            "{} opened {} with {}",
            session.user_id(),
            conversation_id,
            counterpart_id
        );
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            session,
            presence,
            log,
            feed,
            watch,
            watch_open: true,
            timeline: MessageTimeline::new(),
            active: true,
            pending: VecDeque::new(),
            unconfirmed: BTreeSet::new(),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn counterpart_id(&self) -> &str {
        self.watch.counterpart_id()
    }

    /// Messages received so far, oldest first
    pub fn timeline(&self) -> &MessageTimeline {
        &self.timeline
    }

    /// Whether we are currently viewing
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn counterpart_active(&mut self) -> bool {
        self.watch.is_active()
    }

    /// Messages whose read receipt failed and will be retried
    pub fn unconfirmed(&self) -> impl Iterator<Item = &str> + '_ {
        self.unconfirmed.iter().map(String::as_str)
    }

    /// Next change in the room; `None` once closed or the log went away
    pub async fn next_event(&mut self) -> Option<RoomEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }

        loop {
            tokio::select! {
                event = self.feed.next() => {
                    let event = event?;
                    self.timeline.apply(&event);
                    let receipt = self.needs_receipt(&event);
                    self.retry_receipts(receipt.as_deref()).await;
                    if let Some(message_id) = receipt {
                        self.confirm(&message_id).await;
                    }
                    return Some(event.into());
                }
                changed = self.watch.changed(), if self.watch_open => {
                    match changed {
                        Some(active) => {
                            self.retry_receipts(None).await;
                            return Some(RoomEvent::CounterpartActive { active });
                        }
                        None => self.watch_open = false,
                    }
                }
            }
        }
    }

    /// Send with `confirmed` set when the counterpart is viewing right now
    pub async fn send(&mut self, content: &str) -> Result<String> {
        let recipient_active = self.watch.is_active();
        self.log
            .send(&self.conversation_id, content, recipient_active)
            .await
    }

    /// Backgrounded: stay a member, stop sending read receipts
    pub async fn pause(&mut self) -> Result<()> {
        self.presence.pause(&self.conversation_id).await?;
        self.active = false;
        Ok(())
    }

    /// Back in view; confirms whatever arrived in the meantime, including
    /// receipts that failed earlier. Returns how many messages were confirmed.
    pub async fn resume(&mut self) -> Result<usize> {
        self.presence.enter(&self.conversation_id).await?;
        self.active = true;

        let unread = self.timeline.unread_by(self.session.user_id());
        let mut confirmed = 0;
        for message_id in unread {
            if self.confirm(&message_id).await {
                confirmed += 1;
            }
        }
        Ok(confirmed)
    }

    /// Screen closed without leaving: release listeners, go inactive
    pub async fn close(mut self) -> Result<()> {
        self.release();
        self.presence.pause(&self.conversation_id).await?;
        debug!("{} closed {}", self.session.user_id(), self.conversation_id);
        Ok(())
    }

    /// Leave for good; the conversation is deleted once nobody is left
    pub async fn leave(mut self) -> Result<ReapOutcome> {
        self.release();
        self.presence.leave(&self.conversation_id).await
    }

    fn release(&mut self) {
        self.feed.unsubscribe();
        self.watch.unwatch();
        self.watch_open = false;
        self.active = false;
    }

    fn needs_receipt(&self, event: &MessageEvent) -> Option<String> {
        if !self.active {
            return None;
        }
        match event {
            MessageEvent::Added { message_id, message }
            | MessageEvent::Changed { message_id, message }
                if message.is_unread_by(self.session.user_id()) =>
            {
                Some(message_id.clone())
            }
            _ => None,
        }
    }

    async fn retry_receipts(&mut self, skip: Option<&str>) {
        if !self.active || self.unconfirmed.is_empty() {
            return;
        }
        let retry: Vec<String> = self.unconfirmed.iter().cloned().collect();
        for message_id in retry {
            if skip == Some(message_id.as_str()) {
                continue;
            }
            // Gone from the log means nothing is left to confirm
            if self.timeline.get(&message_id).is_none() {
                self.unconfirmed.remove(&message_id);
                continue;
            }
            self.confirm(&message_id).await;
        }
    }

    /// Returns whether a receipt was written
    async fn confirm(&mut self, message_id: &str) -> bool {
        match self.log.mark_read(&self.conversation_id, message_id).await {
            Ok(written) => {
                self.unconfirmed.remove(message_id);
                if written {
                    self.pending.push_back(RoomEvent::ReadReceiptSent {
                        message_id: message_id.to_string(),
                    });
                }
                written
            }
            Err(e) => {
                warn!("Read receipt for {} failed: {}", message_id, e);
                self.unconfirmed.insert(message_id.to_string());
                self.pending.push_back(RoomEvent::ReadReceiptFailed {
                    message_id: message_id.to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }
}
