//! Push-channel events.
//!
//! Every frame on the push channel is a named event with a JSON payload:
//! `{"event": "receive_message", "data": {...}}`. [`InboundEvent`] covers
//! everything the client consumes, [`OutboundEvent`] everything it produces.

use serde::{Deserialize, Serialize};

use crate::message::{MessagePayload, Timestamp, UserId};
use crate::reaction::Reaction;
use crate::status::MessageStatus;

/// An event received from the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A new message, or another observation of a known one.
    ReceiveMessage {
        /// The (possibly partial) message.
        message: MessagePayload,
    },
    /// Status change for a single message.
    #[serde(rename = "message_status", rename_all = "camelCase")]
    MessageStatusChanged {
        /// Server id of the message.
        message_id: String,
        /// New status.
        status: MessageStatus,
    },
    /// The partner read the conversation.
    #[serde(rename_all = "camelCase")]
    MessageRead {
        /// User the bulk read refers to.
        sender_id: UserId,
    },
    /// Alternate name for [`InboundEvent::MessageRead`] used by older servers.
    #[serde(rename_all = "camelCase")]
    ReadStatus {
        /// User the bulk read refers to.
        sender_id: UserId,
    },
    /// A reaction was added.
    ReactionAdded {
        /// The new reaction.
        reaction: Reaction,
    },
    /// A reaction was removed.
    #[serde(rename_all = "camelCase")]
    ReactionRemoved {
        /// Message the reaction was attached to.
        message_id: String,
        /// Id of the removed reaction, when the server knows it.
        #[serde(default)]
        reaction_id: Option<String>,
        /// Who removed it.
        #[serde(default)]
        user_id: Option<UserId>,
        /// Which emoji was removed.
        #[serde(default)]
        emoji: Option<String>,
    },
    /// Full list of currently connected users.
    OnlineUsers(Vec<UserId>),
    /// One user connected or disconnected.
    #[serde(rename_all = "camelCase")]
    PresenceUpdate {
        /// The user.
        user_id: UserId,
        /// Whether they are now online.
        online: bool,
    },
    /// A user is typing.
    #[serde(rename_all = "camelCase")]
    UserTyping {
        /// The user.
        user_id: UserId,
        /// When the indicator lapses. Absent means "use the local default".
        #[serde(default)]
        expires_at: Option<Timestamp>,
    },
}

impl InboundEvent {
    /// The event's name on the wire.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ReceiveMessage { .. } => EventKind::ReceiveMessage,
            Self::MessageStatusChanged { .. } => EventKind::MessageStatus,
            Self::MessageRead { .. } => EventKind::MessageRead,
            Self::ReadStatus { .. } => EventKind::ReadStatus,
            Self::ReactionAdded { .. } => EventKind::ReactionAdded,
            Self::ReactionRemoved { .. } => EventKind::ReactionRemoved,
            Self::OnlineUsers(_) => EventKind::OnlineUsers,
            Self::PresenceUpdate { .. } => EventKind::PresenceUpdate,
            Self::UserTyping { .. } => EventKind::UserTyping,
        }
    }
}

/// Names of the inbound events, used to scope subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `receive_message`
    ReceiveMessage,
    /// `message_status`
    MessageStatus,
    /// `message_read`
    MessageRead,
    /// `read_status`
    ReadStatus,
    /// `reaction_added`
    ReactionAdded,
    /// `reaction_removed`
    ReactionRemoved,
    /// `online_users`
    OnlineUsers,
    /// `presence_update`
    PresenceUpdate,
    /// `user_typing`
    UserTyping,
}

impl EventKind {
    /// Every inbound event kind.
    pub const ALL: [Self; 9] = [
        Self::ReceiveMessage,
        Self::MessageStatus,
        Self::MessageRead,
        Self::ReadStatus,
        Self::ReactionAdded,
        Self::ReactionRemoved,
        Self::OnlineUsers,
        Self::PresenceUpdate,
        Self::UserTyping,
    ];

    /// The event's name on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReceiveMessage => "receive_message",
            Self::MessageStatus => "message_status",
            Self::MessageRead => "message_read",
            Self::ReadStatus => "read_status",
            Self::ReactionAdded => "reaction_added",
            Self::ReactionRemoved => "reaction_removed",
            Self::OnlineUsers => "online_users",
            Self::PresenceUpdate => "presence_update",
            Self::UserTyping => "user_typing",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by an outbound acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// The message reached this client.
    Delivered,
    /// The message was shown to the user.
    Read,
}

impl AckStatus {
    /// The message status this acknowledgement confirms.
    #[must_use]
    pub const fn as_status(self) -> MessageStatus {
        match self {
            Self::Delivered => MessageStatus::Delivered,
            Self::Read => MessageStatus::Read,
        }
    }
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_status().fmt(f)
    }
}

/// An event sent to the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Acknowledge delivery or reading of a message.
    #[serde(rename_all = "camelCase")]
    MessageAck {
        /// Server id of the acknowledged message.
        message_id: String,
        /// What is being acknowledged.
        status: AckStatus,
    },
    /// The local user is typing to `recipient_id`.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Conversation partner.
        recipient_id: UserId,
    },
}
