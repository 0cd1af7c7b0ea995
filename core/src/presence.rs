/// Per-conversation presence: membership and active viewing
///
/// Each participant writes only its own entry. Transitions:
/// entering → `JoinedActive`, backgrounding → `JoinedInactive`,
/// leaving → `Left` (terminal, `active` cleared in the same write).
use crate::error::{ChatError, Result};
use crate::model::{PresencePhase, PresenceState};
use crate::reaper::{ConversationReaper, ReapOutcome};
use crate::session::Session;
use crate::store::{RemoteTreeStore, Subscription};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PresenceTracker<S> {
    store: Arc<S>,
    session: Session,
    reaper: ConversationReaper<S>,
}

impl<S: RemoteTreeStore> PresenceTracker<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        let reaper = ConversationReaper::new(store.clone(), session.config_arc());
        Self {
            store,
            session,
            reaper,
        }
    }

    /// Current presence of any participant
    pub async fn presence_of(
        &self,
        conversation_id: &str,
        participant_id: &str,
    ) -> Result<PresenceState> {
        let path = self
            .session
            .config()
            .participant_path(conversation_id, participant_id);
        let value = self
            .store
            .read(&path)
            .await
            .map_err(|e| ChatError::QueryFailed(format!("{}: {}", path, e)))?
            .ok_or_else(|| {
                ChatError::NotFound(format!(
                    "{} is not a participant of {}",
                    participant_id, conversation_id
                ))
            })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Overwrite our own presence entry in one write.
    ///
    /// Clearing `member` also runs the reaper; its outcome is returned.
    pub async fn set_presence(
        &self,
        conversation_id: &str,
        member: bool,
        active: bool,
    ) -> Result<Option<ReapOutcome>> {
        let next = PresenceState { member, active };
        if !next.is_valid() {
            return Err(ChatError::InvalidPresence(
                "cannot be active without being a member".to_string(),
            ));
        }

        let self_id = self.session.user_id();
        let current = self.presence_of(conversation_id, self_id).await?;
        if current.phase() == PresencePhase::Left && next.member {
            return Err(ChatError::InvalidPresence(format!(
                "{} already left {}",
                self_id, conversation_id
            )));
        }

        let path = self.session.config().participant_path(conversation_id, self_id);
        self.store
            .write(&path, serde_json::to_value(next)?)
            .await
            .map_err(|e| ChatError::PresenceWriteFailed(format!("{}: {}", path, e)))?;
        info!(
            "{} is now {:?} in {}",
            self_id,
            next.phase(),
            conversation_id
        );

        if member {
            return Ok(None);
        }
        self.reaper.after_leave(conversation_id).await.map(Some)
    }

    /// Conversation screen opened
    pub async fn enter(&self, conversation_id: &str) -> Result<()> {
        self.set_presence(conversation_id, true, true).await.map(|_| ())
    }

    /// Conversation screen closed or backgrounded without leaving
    pub async fn pause(&self, conversation_id: &str) -> Result<()> {
        self.set_presence(conversation_id, true, false).await.map(|_| ())
    }

    /// Leave for good, then reap if nobody is left
    pub async fn leave(&self, conversation_id: &str) -> Result<ReapOutcome> {
        let outcome = self.set_presence(conversation_id, false, false).await?;
        Ok(outcome.unwrap_or(ReapOutcome::AlreadyGone))
    }

    /// Follow the counterpart's `active` flag; the current value is known on return
    pub async fn watch_counterpart_active(
        &self,
        conversation_id: &str,
        counterpart_id: &str,
    ) -> Result<PresenceWatch> {
        let path = self
            .session
            .config()
            .participant_path(conversation_id, counterpart_id);
        let mut sub = self
            .store
            .subscribe_snapshot(&path)
            .await
            .map_err(|e| ChatError::QueryFailed(format!("watch {}: {}", path, e)))?;
        let initial = sub
            .recv()
            .await
            .ok_or_else(|| ChatError::QueryFailed(format!("watch {} closed", path)))?;

        let active = active_flag(initial);
        debug!("Watching {} in {} (active: {})", counterpart_id, conversation_id, active);
        Ok(PresenceWatch {
            sub,
            active,
            counterpart_id: counterpart_id.to_string(),
        })
    }
}

fn active_flag(snapshot: Option<Value>) -> bool {
    match snapshot.map(serde_json::from_value::<PresenceState>) {
        Some(Ok(state)) => state.active,
        Some(Err(e)) => {
            warn!("Unreadable presence record: {}", e);
            false
        }
        None => false,
    }
}

/// Live view of one counterpart's `active` flag.
///
/// Must be released with [`PresenceWatch::unwatch`] (or dropped) when the
/// owning context goes away; releasing twice is harmless.
pub struct PresenceWatch {
    sub: Subscription<Option<Value>>,
    active: bool,
    counterpart_id: String,
}

impl PresenceWatch {
    pub fn counterpart_id(&self) -> &str {
        &self.counterpart_id
    }

    /// Latest known value, folding in anything already delivered
    pub fn is_active(&mut self) -> bool {
        while let Some(snapshot) = self.sub.try_recv() {
            self.active = active_flag(snapshot);
        }
        self.active
    }

    /// Wait until the flag changes; `None` once unwatched or the store closed
    pub async fn changed(&mut self) -> Option<bool> {
        loop {
            let snapshot = self.sub.recv().await?;
            let active = active_flag(snapshot);
            if active != self.active {
                self.active = active;
                return Some(active);
            }
        }
    }

    pub fn is_watching(&self) -> bool {
        self.sub.is_active()
    }

    pub fn unwatch(&mut self) {
        if self.sub.is_active() {
            self.sub.unsubscribe();
            debug!("Stopped watching {}", self.counterpart_id);
        }
    }
}
