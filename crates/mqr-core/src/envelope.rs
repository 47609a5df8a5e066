//! Normalized inbound events.
//!
//! An [`EventEnvelope`] is what the event-source adapter hands to the
//! dispatcher. It is built once and never mutated afterwards; everything the
//! dispatcher decides about an event (which phase selected a hook, which
//! keyword matched, what a held conversation saved) travels separately in the
//! [`HookContext`](crate::hook::HookContext) given to each hook.
//!
//! # Hierarchy
//!
//! ```text
//! EventEnvelope { actor_id, conversation_id, kind, payload, mentions, is_bot_mentioned }
//! ├── Payload::Text(String)          group / direct / temp messages, join requests
//! ├── Payload::MemberJoin(JoinKind)  a member entered a group
//! └── Payload::Value(Value)          anything else structured
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Event Kind Classification
// ============================================================================

/// The kind of conversational event carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A message posted in a group.
    GroupMessage,
    /// A message from a friend, outside any group.
    DirectMessage,
    /// A temporary session message from a group member.
    TempMessage,
    /// Somebody asked to join a group.
    MemberJoinRequest,
    /// Somebody joined a group.
    MemberJoin,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 5] = [
        EventKind::GroupMessage,
        EventKind::DirectMessage,
        EventKind::TempMessage,
        EventKind::MemberJoinRequest,
        EventKind::MemberJoin,
    ];

    /// Stable snake_case name, used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupMessage => "group_message",
            Self::DirectMessage => "direct_message",
            Self::TempMessage => "temp_message",
            Self::MemberJoinRequest => "member_join_request",
            Self::MemberJoin => "member_join",
        }
    }

    /// Returns `true` for the three message kinds.
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            Self::GroupMessage | Self::DirectMessage | Self::TempMessage
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "group" | "group_message" => Ok(Self::GroupMessage),
            "direct" | "friend" | "direct_message" => Ok(Self::DirectMessage),
            "temp" | "temp_message" => Ok(Self::TempMessage),
            "join_request" | "member_join_request" => Ok(Self::MemberJoinRequest),
            "join" | "member_join" => Ok(Self::MemberJoin),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// How a member ended up in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Invited by an existing member.
    Invite,
    /// Applied and was approved.
    Active,
    /// Regained membership (e.g. an owner taking a group back).
    Retrieve,
}

impl FromStr for JoinKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "invite" => Ok(Self::Invite),
            "active" => Ok(Self::Active),
            "retrieve" => Ok(Self::Retrieve),
            other => Err(format!("unknown join kind '{other}'")),
        }
    }
}

/// The content of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Plain text content. Join requests carry the applicant's message here.
    Text(String),
    /// A member-join notification.
    MemberJoin(JoinKind),
    /// Any other structured payload.
    Value(Value),
}

impl Payload {
    /// Returns the text if this is a textual payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns `true` for [`Payload::Text`].
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<JoinKind> for Payload {
    fn from(kind: JoinKind) -> Self {
        Self::MemberJoin(kind)
    }
}

/// A user mentioned inside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Mentioned user's id.
    pub id: String,
    /// Name displayed for the mention.
    pub display_name: String,
}

impl Mention {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

// ============================================================================
// EventEnvelope
// ============================================================================

/// A normalized event, as produced by the event-source adapter.
///
/// Fields are private so an envelope cannot change after construction; use
/// the builder-style `with_*` methods while building it.
///
/// ```rust,ignore
/// let envelope = EventEnvelope::new(EventKind::GroupMessage, "10001", "20002", "hi")
///     .with_mentions("bot", vec![Mention::new("bot", "@mqr")]);
/// assert!(envelope.is_bot_mentioned());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    kind: EventKind,
    actor_id: String,
    conversation_id: String,
    payload: Payload,
    #[serde(default)]
    mentions: Vec<Mention>,
    #[serde(default)]
    is_bot_mentioned: bool,
}

impl EventEnvelope {
    /// Creates an envelope without mentions.
    ///
    /// `conversation_id` is the group for group-scoped kinds and the friend
    /// (or bot) id for direct messages.
    pub fn new(
        kind: EventKind,
        actor_id: impl Into<String>,
        conversation_id: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            kind,
            actor_id: actor_id.into(),
            conversation_id: conversation_id.into(),
            payload: payload.into(),
            mentions: Vec::new(),
            is_bot_mentioned: false,
        }
    }

    /// Sets the mention list and derives the bot-mention flag from it.
    pub fn with_mentions(mut self, bot_id: &str, mentions: Vec<Mention>) -> Self {
        self.is_bot_mentioned = mentions.iter().any(|m| m.id == bot_id);
        self.mentions = mentions;
        self
    }

    /// Overrides the bot-mention flag, for adapters that know it directly.
    pub fn with_bot_mentioned(mut self, mentioned: bool) -> Self {
        self.is_bot_mentioned = mentioned;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Shortcut for `payload().as_text()`.
    pub fn text(&self) -> Option<&str> {
        self.payload.as_text()
    }

    pub fn mentions(&self) -> &[Mention] {
        &self.mentions
    }

    pub fn is_bot_mentioned(&self) -> bool {
        self.is_bot_mentioned
    }

    /// The key under which a held conversation for this event's sender lives.
    ///
    /// Membership events have no key: they never enter the held phase.
    pub fn actor_key(&self) -> Option<ActorKey> {
        match self.kind {
            EventKind::GroupMessage => Some(ActorKey::Member {
                conversation: self.conversation_id.clone(),
                actor: self.actor_id.clone(),
            }),
            EventKind::TempMessage => Some(ActorKey::Temp {
                conversation: self.conversation_id.clone(),
                actor: self.actor_id.clone(),
            }),
            EventKind::DirectMessage => Some(ActorKey::Direct {
                actor: self.actor_id.clone(),
            }),
            EventKind::MemberJoinRequest | EventKind::MemberJoin => None,
        }
    }
}

// ============================================================================
// ActorKey
// ============================================================================

/// Identity of a sender within the scope a held conversation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActorKey {
    /// A member speaking in a group.
    Member { conversation: String, actor: String },
    /// A member in a temporary session started from a group.
    Temp { conversation: String, actor: String },
    /// A friend in a direct conversation.
    Direct { actor: String },
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member {
                conversation,
                actor,
            } => write!(f, "group:{conversation}:{actor}"),
            Self::Temp {
                conversation,
                actor,
            } => write!(f, "temp:{conversation}:{actor}"),
            Self::Direct { actor } => write!(f, "direct:{actor}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_mention_flag_derived_from_mentions() {
        let envelope = EventEnvelope::new(EventKind::GroupMessage, "u1", "g1", "hello")
            .with_mentions(
                "bot",
                vec![Mention::new("u2", "@alice"), Mention::new("bot", "@mqr")],
            );

        assert!(envelope.is_bot_mentioned());
        assert_eq!(envelope.mentions().len(), 2);
        assert_eq!(envelope.mentions()[0].display_name, "@alice");
    }

    #[test]
    fn test_actor_key_scopes() {
        let group = EventEnvelope::new(EventKind::GroupMessage, "u1", "g1", "x");
        let temp = EventEnvelope::new(EventKind::TempMessage, "u1", "g1", "x");
        let direct = EventEnvelope::new(EventKind::DirectMessage, "u1", "bot", "x");
        let join = EventEnvelope::new(EventKind::MemberJoin, "u1", "g1", JoinKind::Invite);

        assert_eq!(group.actor_key().unwrap().to_string(), "group:g1:u1");
        assert_ne!(group.actor_key(), temp.actor_key());
        assert_eq!(
            direct.actor_key(),
            Some(ActorKey::Direct {
                actor: "u1".into()
            })
        );
        assert!(join.actor_key().is_none());
    }

    #[test]
    fn test_event_kind_from_str() {
        assert_eq!("group".parse::<EventKind>(), Ok(EventKind::GroupMessage));
        assert_eq!(
            "Member_Join_Request".parse::<EventKind>(),
            Ok(EventKind::MemberJoinRequest)
        );
        assert!("poke".parse::<EventKind>().is_err());
        assert_eq!("INVITE".parse::<JoinKind>(), Ok(JoinKind::Invite));
        assert!("kicked".parse::<JoinKind>().is_err());
    }

    #[test]
    fn test_payload_text_only_for_text() {
        assert_eq!(Payload::from("hi").as_text(), Some("hi"));
        assert!(Payload::MemberJoin(JoinKind::Active).as_text().is_none());
        assert!(!Payload::Value(serde_json::json!({"a": 1})).is_text());
    }
}
