//! Chat message model shared by the engine and the wire format.
//!
//! A [`ChatMessage`] is the canonical record held in the client's message
//! store. A [`MessagePayload`] is what the server actually sends (push events
//! and send responses): every field optional, so that a minimal or partial
//! payload can be merged into a known record without losing anything.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{self, MessageStatus};

/// Default maximum outgoing message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Client-generated message identifier. The only key that is stable across
/// the whole lifecycle of a message, retries included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMessageId(String);

impl ClientMessageId {
    /// Generates a fresh identifier (UUID v7, time-ordered).
    ///
    /// Call once per logical send. Retries reuse the existing value.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the server once a message is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Wraps a server-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds from `self` until `later`, zero if `later` is not after `self`.
    #[must_use]
    pub const fn millis_until(&self, later: Self) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// How a message's `content` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// An image link.
    Image,
    /// A code snippet.
    Code,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Code => write!(f, "code"),
        }
    }
}

/// Error returned when outgoing content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty or whitespace only.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates outgoing content against the size limit `max`.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank content and
/// [`ValidationError::TooLarge`] if it is longer than `max` bytes.
pub fn validate_content(content: &str, max: usize) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = content.len();
    if size > max {
        return Err(ValidationError::TooLarge { size, max });
    }
    Ok(())
}

/// The canonical client-side record of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Primary key. Never reassigned.
    pub client_message_id: ClientMessageId,
    /// Set once the server persists the message, then immutable.
    pub server_id: Option<ServerId>,
    /// Author of the message.
    pub sender_id: UserId,
    /// The other participant.
    pub recipient_id: UserId,
    /// Raw payload, interpreted per `kind`.
    pub content: String,
    /// Content interpretation.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Current delivery status.
    pub status: MessageStatus,
    /// Number of manual retries performed so far.
    pub retry_count: u32,
    /// Server or client id of the message this one replies to.
    pub reply_to_id: Option<String>,
    /// Creation time. Server-canonical once the server has reported it.
    pub created_at: Timestamp,
}

impl ChatMessage {
    /// Builds the optimistic record for an outgoing message.
    #[must_use]
    pub const fn outgoing(
        client_message_id: ClientMessageId,
        sender_id: UserId,
        recipient_id: UserId,
        content: String,
        kind: MessageKind,
        reply_to_id: Option<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            client_message_id,
            server_id: None,
            sender_id,
            recipient_id,
            content,
            kind,
            status: MessageStatus::Sending,
            retry_count: 0,
            reply_to_id,
            created_at,
        }
    }

    /// Builds a record from a payload seen for the first time.
    ///
    /// Returns `None` when the payload cannot identify the message or its
    /// participants. A message without a client id is keyed by its server id.
    #[must_use]
    pub fn from_payload(payload: &MessagePayload) -> Option<Self> {
        let client_message_id = payload
            .client_message_id
            .clone()
            .or_else(|| payload.id.as_ref().map(|id| ClientMessageId::new(id.as_str())))?;
        Some(Self {
            client_message_id,
            server_id: payload.id.clone(),
            sender_id: payload.sender_id.clone()?,
            recipient_id: payload.recipient_id.clone()?,
            content: payload.content.clone().unwrap_or_default(),
            kind: payload.kind.unwrap_or_default(),
            status: payload.status.unwrap_or(MessageStatus::Sent),
            retry_count: 0,
            reply_to_id: payload.reply_to_id.clone(),
            created_at: payload.created_at.unwrap_or_else(Timestamp::now),
        })
    }

    /// The id the server knows this message by: the server id when assigned,
    /// the client id otherwise.
    #[must_use]
    pub fn wire_id(&self) -> &str {
        self.server_id
            .as_ref()
            .map_or_else(|| self.client_message_id.as_str(), ServerId::as_str)
    }

    /// Returns `true` if `id` names this message by either key.
    #[must_use]
    pub fn answers_to(&self, id: &str) -> bool {
        self.client_message_id.as_str() == id
            || self.server_id.as_ref().is_some_and(|s| s.as_str() == id)
    }

    /// Merges another full observation of the same message into this one.
    ///
    /// The server id is kept once set, the status only moves up the lattice,
    /// the retry count never decreases. Returns `true` if anything changed.
    pub fn absorb(&mut self, other: &Self) -> bool {
        let before = self.clone();
        if self.server_id.is_none() && other.server_id.is_some() {
            self.server_id.clone_from(&other.server_id);
            self.created_at = other.created_at;
        }
        if !other.content.is_empty() {
            self.content.clone_from(&other.content);
        }
        if self.reply_to_id.is_none() {
            self.reply_to_id.clone_from(&other.reply_to_id);
        }
        self.status = status::merge(self.status, other.status);
        self.retry_count = self.retry_count.max(other.retry_count);
        *self != before
    }

    /// Merges a partial server payload into this record.
    ///
    /// Fields the payload omits keep their local values. The status becomes
    /// the lattice maximum of the current status, the payload's status and
    /// `floor`. Returns `true` if anything changed.
    pub fn apply_payload(&mut self, payload: &MessagePayload, floor: MessageStatus) -> bool {
        let before = self.clone();
        if self.server_id.is_none() {
            self.server_id.clone_from(&payload.id);
        }
        if let Some(content) = payload.content.as_ref().filter(|c| !c.is_empty()) {
            self.content.clone_from(content);
        }
        if let Some(kind) = payload.kind {
            self.kind = kind;
        }
        if payload.reply_to_id.is_some() {
            self.reply_to_id.clone_from(&payload.reply_to_id);
        }
        if let Some(created_at) = payload.created_at {
            self.created_at = created_at;
        }
        let incoming = payload.status.map_or(floor, |s| status::merge(floor, s));
        self.status = status::merge(self.status, incoming);
        *self != before
    }
}

/// A possibly partial message as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Server id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServerId>,
    /// Client id, echoed back for messages this client created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<ClientMessageId>,
    /// Author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    /// Message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Content interpretation.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    /// Declared status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    /// Reply target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Server creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

impl MessagePayload {
    /// A payload that only carries the server id.
    pub fn with_server_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(ServerId::new(id)),
            ..Self::default()
        }
    }
}
