//! Message delivery status and its merge lattice.
//!
//! Statuses are ranked `Sending < Sent < Delivered < Read`. [`merge`] keeps
//! the higher-ranked of two observations, so a late event can never move a
//! message backwards. `Failed` shares rank 0 with `Sending`: it never wins a
//! merge and is only ever applied by direct assignment from the send
//! pipeline.

use serde::{Deserialize, Serialize};

/// Delivery lifecycle of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistically inserted, request in flight.
    Sending,
    /// Persisted by the server.
    Sent,
    /// Reached the recipient's client.
    Delivered,
    /// Seen by the recipient.
    Read,
    /// The last send attempt errored. Retryable.
    Failed,
}

impl MessageStatus {
    /// Position of this status in the merge order.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Sending | Self::Failed => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    /// Returns `true` if this status is at least as far along as `other`.
    #[must_use]
    pub const fn reached(self, other: Self) -> bool {
        self.rank() >= other.rank()
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Merges two observations of the same message's status.
///
/// Returns `incoming` only if it ranks strictly higher than `current`.
/// Equal ranks keep `current`, which is what stops a stray `sending`
/// observation from clearing a `failed` marker.
#[must_use]
pub const fn merge(current: MessageStatus, incoming: MessageStatus) -> MessageStatus {
    if incoming.rank() > current.rank() {
        incoming
    } else {
        current
    }
}
