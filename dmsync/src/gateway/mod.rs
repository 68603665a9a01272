//! Request/response API used by the chat session.
//!
//! The [`Gateway`] trait covers the three calls the engine makes outside the
//! push channel: sending a message, toggling a reaction and marking the
//! conversation as read. [`scripted::ScriptedGateway`] implements it in
//! process for tests and capture replay.

pub mod scripted;

use serde::{Deserialize, Serialize};

use dmsync_proto::message::{ChatMessage, ClientMessageId, MessageKind, MessagePayload, UserId};
use dmsync_proto::reaction::Reaction;

/// Body of a send-message request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Conversation partner.
    pub recipient_id: UserId,
    /// Message text.
    pub content: String,
    /// Idempotency key for the send.
    pub client_message_id: ClientMessageId,
    /// Content kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

impl From<&ChatMessage> for SendRequest {
    fn from(message: &ChatMessage) -> Self {
        Self {
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            client_message_id: message.client_message_id.clone(),
            kind: message.kind,
            reply_to_id: message.reply_to_id.clone(),
        }
    }
}

/// Successful send-message response. The payload may be partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// The message as the server stored it.
    #[serde(default)]
    pub message: MessagePayload,
}

/// Result of a reaction toggle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    /// `true` if the toggle removed an existing reaction.
    pub removed: bool,
    /// The created reaction, when the server returns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<Reaction>,
}

/// Result of marking a conversation as read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    /// Number of messages the server flipped to read.
    pub marked_read: u64,
}

/// Errors from gateway calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request never got a response.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the request.
    #[error("server error {status}: {message}")]
    Server {
        /// Status code.
        status: u16,
        /// Server-provided description.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Async request/response API.
pub trait Gateway: Send + Sync {
    /// Sends a message. A successful response means the server stored it.
    fn send_message(
        &self,
        request: &SendRequest,
    ) -> impl std::future::Future<Output = Result<SendResponse, GatewayError>> + Send;

    /// Toggles the local user's `emoji` reaction on `message_id`.
    fn toggle_reaction(
        &self,
        message_id: &str,
        emoji: &str,
    ) -> impl std::future::Future<Output = Result<ToggleReactionResponse, GatewayError>> + Send;

    /// Marks every message from `partner` as read.
    fn mark_as_read(
        &self,
        partner: &UserId,
    ) -> impl std::future::Future<Output = Result<MarkReadResponse, GatewayError>> + Send;
}
