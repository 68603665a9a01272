//! Bounded manual retry of failed sends.
//!
//! Per message: `Sending -> {Sent | Failed}`, and `Failed -> Sending` on a
//! manual retry, at most [`RetryPolicy::max_retry_count`] times. A retry
//! keeps the message's client id, so the server and the timeline see the same
//! logical message across attempts.

use std::collections::HashSet;

use dmsync_proto::message::{ChatMessage, ClientMessageId};
use dmsync_proto::status::MessageStatus;

use super::reconcile::Reconciler;

/// Default upper bound on manual retries per message.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Configuration for manual retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries allowed after the initial attempt.
    pub max_retry_count: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: MAX_RETRY_COUNT,
        }
    }
}

/// Why a retry was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The message has used up its retries. The user has to delete and
    /// resend it.
    #[error("retry limit reached ({retry_count} of {max} retries used)")]
    LimitReached {
        /// Retries already performed.
        retry_count: u32,
        /// Configured maximum.
        max: u32,
    },
    /// Only failed messages can be retried.
    #[error("message is {0}, only failed messages can be retried")]
    NotRetryable(MessageStatus),
    /// The message is not in the active timeline.
    #[error("unknown message {0}")]
    UnknownMessage(ClientMessageId),
}

/// Tracks retry attempts and the messages that exhausted them.
#[derive(Debug, Default)]
pub struct RetryManager {
    policy: RetryPolicy,
    exhausted: HashSet<ClientMessageId>,
}

impl RetryManager {
    /// Creates a manager with the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            exhausted: HashSet::new(),
        }
    }

    /// Starts a retry of `id`.
    ///
    /// On success the message is back in `Sending` with its retry count
    /// incremented, and the returned record is what should be re-sent.
    ///
    /// # Errors
    ///
    /// [`RetryError::LimitReached`] if another attempt would exceed the
    /// policy (no state changes besides remembering the condition),
    /// [`RetryError::NotRetryable`] if the message has not failed, and
    /// [`RetryError::UnknownMessage`] if it is not in the timeline.
    pub fn begin(
        &mut self,
        engine: &mut Reconciler,
        id: &ClientMessageId,
    ) -> Result<ChatMessage, RetryError> {
        let message = engine
            .store()
            .find_by_client_id(id)
            .ok_or_else(|| RetryError::UnknownMessage(id.clone()))?;

        if message.status != MessageStatus::Failed {
            return Err(RetryError::NotRetryable(message.status));
        }

        if message.retry_count + 1 > self.policy.max_retry_count {
            tracing::info!(
                client_message_id = %id,
                retry_count = message.retry_count,
                max = self.policy.max_retry_count,
                "retry limit reached"
            );
            let err = RetryError::LimitReached {
                retry_count: message.retry_count,
                max: self.policy.max_retry_count,
            };
            self.exhausted.insert(id.clone());
            return Err(err);
        }

        engine
            .begin_resend(id)
            .ok_or_else(|| RetryError::UnknownMessage(id.clone()))
    }

    /// Returns `true` once a retry of `id` was refused for exceeding the
    /// limit.
    #[must_use]
    pub fn limit_reached(&self, id: &ClientMessageId) -> bool {
        self.exhausted.contains(id)
    }

    /// Forgets all per-message state. Used on conversation switch.
    pub fn clear(&mut self) {
        self.exhausted.clear();
    }
}
