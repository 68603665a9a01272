//! Emoji reactions attached to messages.

use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// A single user's emoji reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Server id of the reaction itself.
    pub reaction_id: String,
    /// Server or client id of the message reacted to.
    pub message_id: String,
    /// Who reacted.
    pub user_id: UserId,
    /// The emoji, as sent by the client.
    pub emoji: String,
}

/// Reactions for one emoji on one message, aggregated for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionGroup {
    /// The emoji.
    pub emoji: String,
    /// Number of users who reacted with it.
    pub count: usize,
    /// Whether the local user is among them.
    pub reacted_by_me: bool,
}
