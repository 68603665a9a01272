//! Reconciliation of the three writers of the message timeline.
//!
//! A message can be observed through the local optimistic insert, the
//! response to the send request, and any number of push events, in any order
//! and any number of times. Every path goes through the same two rules, so
//! the timeline converges regardless of arrival order:
//!
//! 1. Identity: match by server id first, client id second.
//! 2. Status: only move up the lattice (see [`dmsync_proto::status::merge`]).
//!
//! The `Failed` override and the retry transition back to `Sending` are the
//! only writes that bypass the lattice.

use dmsync_proto::event::InboundEvent;
use dmsync_proto::message::{ChatMessage, ClientMessageId, MessagePayload, ServerId, UserId};
use dmsync_proto::status::MessageStatus;

use super::store::{MessageStore, Upsert};

/// What a merge did to the timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Messages that were appended.
    pub inserted: Vec<ClientMessageId>,
    /// Existing messages that changed.
    pub updated: Vec<ClientMessageId>,
    /// Inbound messages from the partner that should be acknowledged if the
    /// conversation is visible.
    pub ack_candidates: Vec<ClientMessageId>,
}

impl ReconcileOutcome {
    /// Returns `true` if nothing in the timeline changed.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty()
    }

    fn record(&mut self, id: ClientMessageId, upsert: Upsert) {
        match upsert {
            Upsert::Inserted => self.inserted.push(id),
            Upsert::Updated => self.updated.push(id),
            Upsert::Unchanged => {}
        }
    }
}

/// Merges optimistic inserts, send responses and push events into one
/// [`MessageStore`] for the conversation between `me` and `partner`.
#[derive(Debug)]
pub struct Reconciler {
    me: UserId,
    partner: UserId,
    store: MessageStore,
}

impl Reconciler {
    /// Creates an engine with an empty timeline.
    #[must_use]
    pub fn new(me: UserId, partner: UserId) -> Self {
        Self {
            me,
            partner,
            store: MessageStore::new(),
        }
    }

    /// The local user.
    #[must_use]
    pub const fn me(&self) -> &UserId {
        &self.me
    }

    /// The active conversation partner.
    #[must_use]
    pub const fn partner(&self) -> &UserId {
        &self.partner
    }

    /// Read access to the timeline.
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Switches to a new partner and drops the previous timeline.
    pub fn set_partner(&mut self, partner: UserId) {
        self.partner = partner;
        self.store.clear();
    }

    /// Returns `true` if a message between `a` and `b` belongs to the active
    /// conversation.
    fn in_conversation(&self, a: &UserId, b: &UserId) -> bool {
        (*a == self.me && *b == self.partner) || (*a == self.partner && *b == self.me)
    }

    /// Inserts the optimistic record for an outgoing message.
    ///
    /// If a push echo of the same client id already landed, the record is
    /// merged into it instead, keeping the server id and higher status.
    pub fn optimistic_insert(&mut self, message: ChatMessage) -> Upsert {
        debug_assert_eq!(message.status, MessageStatus::Sending);
        self.store.upsert(message)
    }

    /// Merges the response to a send request.
    ///
    /// A successful response implies at least `Sent`. Fields the response
    /// omits keep their optimistic values. Returns the merged message, or
    /// `None` if the record is no longer in the timeline.
    pub fn merge_send_response(
        &mut self,
        id: &ClientMessageId,
        payload: &MessagePayload,
    ) -> Option<(ChatMessage, bool)> {
        let key = self
            .store
            .find_by_client_id(id)
            .or_else(|| payload.id.as_ref().and_then(|s| self.store.find_by_server_id(s)))
            .map(|m| m.client_message_id.clone());

        let Some(key) = key else {
            tracing::debug!(client_message_id = %id, "send response for unknown message ignored");
            return None;
        };

        let changed = self
            .store
            .update(&key, |msg| msg.apply_payload(payload, MessageStatus::Sent));
        self.store
            .find_by_client_id(&key)
            .map(|msg| (msg.clone(), changed))
    }

    /// Applies one push event. Events that do not concern the timeline
    /// (presence, typing, reactions) produce an empty outcome.
    pub fn apply_event(&mut self, event: &InboundEvent) -> ReconcileOutcome {
        match event {
            InboundEvent::ReceiveMessage { message } => self.merge_push_message(message),
            InboundEvent::MessageStatusChanged { message_id, status } => {
                self.merge_status(message_id, *status)
            }
            InboundEvent::MessageRead { sender_id } | InboundEvent::ReadStatus { sender_id } => {
                self.merge_bulk_read(sender_id)
            }
            _ => ReconcileOutcome::default(),
        }
    }

    /// Merges a `receive_message` payload.
    pub fn merge_push_message(&mut self, payload: &MessagePayload) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let existing = payload
            .id
            .as_ref()
            .and_then(|s| self.store.find_by_server_id(s))
            .or_else(|| {
                payload
                    .client_message_id
                    .as_ref()
                    .and_then(|c| self.store.find_by_client_id(c))
            })
            .map(|m| m.client_message_id.clone());

        let key = if let Some(key) = existing {
            let declared = payload.status.unwrap_or(MessageStatus::Sent);
            let changed = self
                .store
                .update(&key, |msg| msg.apply_payload(payload, declared));
            if changed {
                outcome.updated.push(key.clone());
            }
            key
        } else {
            let Some(message) = ChatMessage::from_payload(payload) else {
                tracing::warn!(
                    server_id = ?payload.id,
                    client_message_id = ?payload.client_message_id,
                    "dropping push message without ids or participants"
                );
                return outcome;
            };
            if !self.in_conversation(&message.sender_id, &message.recipient_id) {
                tracing::debug!(
                    sender = %message.sender_id,
                    recipient = %message.recipient_id,
                    "push message outside active conversation ignored"
                );
                return outcome;
            }
            let key = message.client_message_id.clone();
            let upsert = self.store.upsert(message);
            outcome.record(key.clone(), upsert);
            key
        };

        if self
            .store
            .find_by_client_id(&key)
            .is_some_and(|m| m.sender_id == self.partner)
        {
            outcome.ack_candidates.push(key);
        }
        outcome
    }

    /// Merges a single-message status event.
    pub fn merge_status(&mut self, message_id: &str, status: MessageStatus) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let Some(key) = self
            .store
            .find(message_id)
            .map(|m| m.client_message_id.clone())
        else {
            tracing::debug!(message_id, %status, "status for unknown message ignored");
            return outcome;
        };
        if self.store.apply_status(&key, status) {
            outcome.updated.push(key);
        }
        outcome
    }

    /// Marks every message addressed to the partner as read.
    ///
    /// The event names either the reader (the partner) or the author of the
    /// read messages (the local user); anything else belongs to a different
    /// conversation.
    pub fn merge_bulk_read(&mut self, user: &UserId) -> ReconcileOutcome {
        if *user != self.partner && *user != self.me {
            tracing::debug!(user = %user, "bulk read for another conversation ignored");
            return ReconcileOutcome::default();
        }
        let partner = self.partner.clone();
        let updated = self
            .store
            .apply_status_where(|m| m.recipient_id == partner, MessageStatus::Read);
        ReconcileOutcome {
            updated,
            ..ReconcileOutcome::default()
        }
    }

    /// Marks every message from the partner as read, after the local user
    /// read the conversation.
    pub fn mark_inbound_read(&mut self) -> Vec<ClientMessageId> {
        let partner = self.partner.clone();
        self.store
            .apply_status_where(|m| m.sender_id == partner, MessageStatus::Read)
    }

    /// Merges a locally confirmed status, e.g. after an acknowledgement was
    /// sent for an inbound message.
    pub fn apply_status(&mut self, id: &ClientMessageId, status: MessageStatus) -> bool {
        self.store.apply_status(id, status)
    }

    /// Records a failed send attempt.
    ///
    /// The override only applies while the message is unconfirmed: if a push
    /// event already proved the server has it, the confirmed status stands.
    pub fn mark_failed(&mut self, id: &ClientMessageId) -> bool {
        self.store.update(id, |msg| {
            if msg.status.rank() > MessageStatus::Sending.rank() {
                tracing::debug!(
                    client_message_id = %msg.client_message_id,
                    status = %msg.status,
                    "send error after confirmation, keeping status"
                );
                return false;
            }
            let changed = msg.status != MessageStatus::Failed;
            msg.status = MessageStatus::Failed;
            changed
        })
    }

    /// Moves a failed message back to `Sending` with its retry count bumped.
    ///
    /// Returns the updated record, or `None` if the message is unknown.
    pub fn begin_resend(&mut self, id: &ClientMessageId) -> Option<ChatMessage> {
        let found = self.store.update(id, |msg| {
            msg.retry_count += 1;
            msg.status = MessageStatus::Sending;
            true
        });
        if !found {
            return None;
        }
        self.store.find_by_client_id(id).cloned()
    }

    /// Resolves a wire id to the message it names.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&ChatMessage> {
        self.store.find(id)
    }

    /// Looks a message up by server id.
    #[must_use]
    pub fn find_by_server_id(&self, id: &ServerId) -> Option<&ChatMessage> {
        self.store.find_by_server_id(id)
    }
}
