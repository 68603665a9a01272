//! Delivered/read acknowledgements for inbound messages.
//!
//! An ack is produced at most once per (message, status) per render cycle,
//! and never when the message's local status already covers it. The caller
//! merges the acknowledged status into the timeline after sending, which is
//! what keeps later duplicates suppressed across cycles.

use std::collections::HashSet;

use dmsync_proto::event::{AckStatus, OutboundEvent};
use dmsync_proto::message::{ChatMessage, ClientMessageId};

/// Decides which acknowledgements to send.
#[derive(Debug, Default)]
pub struct AckEmitter {
    emitted: HashSet<(ClientMessageId, AckStatus)>,
}

impl AckEmitter {
    /// Creates an emitter with an empty cycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new render cycle.
    pub fn begin_cycle(&mut self) {
        self.emitted.clear();
    }

    /// Returns the ack to send for `message`, or `None` if it is redundant.
    pub fn acknowledge(
        &mut self,
        message: &ChatMessage,
        status: AckStatus,
    ) -> Option<OutboundEvent> {
        if message.status.reached(status.as_status()) {
            return None;
        }
        if !self
            .emitted
            .insert((message.client_message_id.clone(), status))
        {
            tracing::debug!(
                client_message_id = %message.client_message_id,
                %status,
                "ack already sent this cycle"
            );
            return None;
        }
        Some(OutboundEvent::MessageAck {
            message_id: message.wire_id().to_owned(),
            status,
        })
    }
}
