//! In-process gateway with queued responses.
//!
//! Each call pops the next scripted result for its endpoint. With nothing
//! queued, the gateway answers like a healthy server: sends succeed with a
//! fresh server id, toggles flip, reads mark nothing. Every call is
//! recorded, and [`ScriptedGateway::hold`] parks responses so tests can
//! interleave push events with in-flight requests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use dmsync_proto::message::{MessagePayload, UserId};

use super::{
    Gateway, GatewayError, MarkReadResponse, SendRequest, SendResponse, ToggleReactionResponse,
};

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// `send_message`
    SendMessage(SendRequest),
    /// `toggle_reaction`
    ToggleReaction {
        /// Target message.
        message_id: String,
        /// Emoji toggled.
        emoji: String,
    },
    /// `mark_as_read`
    MarkAsRead(UserId),
}

/// Gateway driven by queued results.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    sends: Mutex<VecDeque<Result<SendResponse, GatewayError>>>,
    toggles: Mutex<VecDeque<Result<ToggleReactionResponse, GatewayError>>>,
    reads: Mutex<VecDeque<Result<MarkReadResponse, GatewayError>>>,
    calls: Mutex<Vec<GatewayCall>>,
    toggled: Mutex<HashSet<(String, String)>>,
    next_server_id: AtomicU64,
    gate: tokio::sync::Mutex<()>,
}

impl ScriptedGateway {
    /// Creates a gateway with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next `send_message` call.
    pub fn push_send(&self, result: Result<SendResponse, GatewayError>) {
        self.sends.lock().push_back(result);
    }

    /// Queues a send failure.
    pub fn fail_next_send(&self, error: GatewayError) {
        self.push_send(Err(error));
    }

    /// Queues the result of the next `toggle_reaction` call.
    pub fn push_toggle(&self, result: Result<ToggleReactionResponse, GatewayError>) {
        self.toggles.lock().push_back(result);
    }

    /// Queues the result of the next `mark_as_read` call.
    pub fn push_mark_read(&self, result: Result<MarkReadResponse, GatewayError>) {
        self.reads.lock().push_back(result);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    /// Number of `send_message` calls made so far.
    #[must_use]
    pub fn send_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, GatewayCall::SendMessage(_)))
            .count()
    }

    /// Parks every response until the returned guard is dropped.
    ///
    /// Calls are still recorded immediately.
    pub async fn hold(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    async fn wait_gate(&self) {
        drop(self.gate.lock().await);
    }

    fn default_send(&self, request: &SendRequest) -> SendResponse {
        let n = self.next_server_id.fetch_add(1, Ordering::Relaxed) + 1;
        SendResponse {
            message: MessagePayload {
                client_message_id: Some(request.client_message_id.clone()),
                ..MessagePayload::with_server_id(format!("srv-{n}"))
            },
        }
    }

    fn default_toggle(&self, message_id: &str, emoji: &str) -> ToggleReactionResponse {
        let key = (message_id.to_owned(), emoji.to_owned());
        let mut toggled = self.toggled.lock();
        let removed = !toggled.insert(key.clone());
        if removed {
            toggled.remove(&key);
        }
        ToggleReactionResponse {
            removed,
            reaction: None,
        }
    }
}

impl Gateway for ScriptedGateway {
    async fn send_message(&self, request: &SendRequest) -> Result<SendResponse, GatewayError> {
        self.calls
            .lock()
            .push(GatewayCall::SendMessage(request.clone()));
        self.wait_gate().await;
        let scripted = self.sends.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_send(request)))
    }

    async fn toggle_reaction(
        &self,
        message_id: &str,
        emoji: &str,
    ) -> Result<ToggleReactionResponse, GatewayError> {
        self.calls.lock().push(GatewayCall::ToggleReaction {
            message_id: message_id.to_owned(),
            emoji: emoji.to_owned(),
        });
        self.wait_gate().await;
        let scripted = self.toggles.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_toggle(message_id, emoji)))
    }

    async fn mark_as_read(&self, partner: &UserId) -> Result<MarkReadResponse, GatewayError> {
        self.calls
            .lock()
            .push(GatewayCall::MarkAsRead(partner.clone()));
        self.wait_gate().await;
        let scripted = self.reads.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(MarkReadResponse::default()))
    }
}
