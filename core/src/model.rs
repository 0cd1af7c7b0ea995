/// Records stored under a conversation and a user
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One participant's flags within one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceState {
    /// False once the participant has left the conversation
    #[serde(default)]
    pub member: bool,
    /// True while the participant has the conversation open
    #[serde(default)]
    pub active: bool,
}

/// Named states of [`PresenceState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresencePhase {
    JoinedActive,
    JoinedInactive,
    Left,
}

impl PresenceState {
    pub const JOINED_ACTIVE: PresenceState = PresenceState {
        member: true,
        active: true,
    };
    pub const JOINED_INACTIVE: PresenceState = PresenceState {
        member: true,
        active: false,
    };
    pub const LEFT: PresenceState = PresenceState {
        member: false,
        active: false,
    };

    /// `active` implies `member`
    pub fn is_valid(&self) -> bool {
        self.member || !self.active
    }

    pub fn phase(&self) -> PresencePhase {
        match (self.member, self.active) {
            (true, true) => PresencePhase::JoinedActive,
            (true, false) => PresencePhase::JoinedInactive,
            (false, _) => PresencePhase::Left,
        }
    }
}

impl From<PresencePhase> for PresenceState {
    fn from(phase: PresencePhase) -> Self {
        match phase {
            PresencePhase::JoinedActive => PresenceState::JOINED_ACTIVE,
            PresencePhase::JoinedInactive => PresenceState::JOINED_INACTIVE,
            PresencePhase::Left => PresenceState::LEFT,
        }
    }
}

/// A chat message; immutable apart from `confirmed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    /// `yyyyMMddHHmmss`, UTC
    pub sent_at: String,
    pub content: String,
    #[serde(default)]
    pub confirmed: bool,
}

impl Message {
    pub fn new(sender_id: &str, sent_at: String, content: &str, confirmed: bool) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sent_at,
            content: content.to_string(),
            confirmed,
        }
    }

    /// Sent by someone else and not yet seen by `reader`
    pub fn is_unread_by(&self, reader: &str) -> bool {
        !self.confirmed && self.sender_id != reader
    }
}

/// Canonical message order: `sentAt`, then store key
pub fn message_order<'a>(a: (&'a str, &'a Message), b: (&'a str, &'a Message)) -> std::cmp::Ordering {
    a.1.sent_at.cmp(&b.1.sent_at).then_with(|| a.0.cmp(b.0))
}

/// Two-party conversation as stored
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub participants: BTreeMap<String, PresenceState>,
    #[serde(default)]
    pub messages: BTreeMap<String, Message>,
}

impl Conversation {
    /// Fresh conversation opened by `self_id`: self active, counterpart not yet viewing
    pub fn between(self_id: &str, other_id: &str) -> Self {
        let mut participants = BTreeMap::new();
        participants.insert(self_id.to_string(), PresenceState::JOINED_ACTIVE);
        participants.insert(other_id.to_string(), PresenceState::JOINED_INACTIVE);
        Self {
            participants,
            messages: BTreeMap::new(),
        }
    }

    /// Participant set is exactly `{a, b}`
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        a != b
            && self.participants.len() == 2
            && self.participants.contains_key(a)
            && self.participants.contains_key(b)
    }

    pub fn counterpart_of(&self, self_id: &str) -> Option<&str> {
        self.participants
            .keys()
            .find(|id| id.as_str() != self_id)
            .map(String::as_str)
    }

    pub fn presence_of(&self, participant_id: &str) -> Option<PresenceState> {
        self.participants.get(participant_id).copied()
    }

    pub fn is_member(&self, participant_id: &str) -> bool {
        self.presence_of(participant_id).is_some_and(|p| p.member)
    }

    /// Every participant has left
    pub fn is_abandoned(&self) -> bool {
        self.participants.values().all(|p| !p.member)
    }

    /// Most recent message by canonical order
    pub fn last_message(&self) -> Option<(&str, &Message)> {
        self.messages
            .iter()
            .map(|(id, m)| (id.as_str(), m))
            .max_by(|a, b| message_order(*a, *b))
    }

    pub fn unread_count(&self, reader: &str) -> usize {
        self.messages
            .values()
            .filter(|m| m.is_unread_by(reader))
            .count()
    }
}

/// Public profile of a registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub uid: String,
}
