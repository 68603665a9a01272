//! Ordered, deduplicated message store for the active conversation.
//!
//! Messages are kept in insertion order and indexed by both identities: the
//! client id (primary key, always present) and the server id (once known).
//! Updates happen in place, so a status change never moves a message.

use std::collections::HashMap;

use dmsync_proto::message::{ChatMessage, ClientMessageId, ServerId};
use dmsync_proto::status::{self, MessageStatus};

/// Result of an [`MessageStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The message was new and appended.
    Inserted,
    /// An existing entry was merged and changed.
    Updated,
    /// An existing entry already reflected everything in the input.
    Unchanged,
}

/// The canonical message timeline for one conversation.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    by_client: HashMap<ClientMessageId, usize>,
    by_server: HashMap<ServerId, usize>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `message` if its client id is unseen, otherwise merges it into
    /// the existing entry without moving it.
    pub fn upsert(&mut self, message: ChatMessage) -> Upsert {
        if let Some(&pos) = self.by_client.get(&message.client_message_id) {
            let changed = self.messages[pos].absorb(&message);
            self.index_server_id(pos);
            return if changed {
                Upsert::Updated
            } else {
                Upsert::Unchanged
            };
        }

        let pos = self.messages.len();
        self.by_client.insert(message.client_message_id.clone(), pos);
        self.messages.push(message);
        self.index_server_id(pos);
        Upsert::Inserted
    }

    /// Merges `status` into a message through the status lattice.
    ///
    /// Returns `true` if the stored status changed.
    pub fn apply_status(&mut self, id: &ClientMessageId, status: MessageStatus) -> bool {
        self.update(id, |msg| {
            let merged = status::merge(msg.status, status);
            let changed = merged != msg.status;
            msg.status = merged;
            changed
        })
    }

    /// Overwrites a message's status, bypassing the lattice.
    ///
    /// Only the send pipeline uses this, for `Failed` and for moving a failed
    /// message back to `Sending` on retry.
    pub fn set_status(&mut self, id: &ClientMessageId, status: MessageStatus) -> bool {
        self.update(id, |msg| {
            let changed = msg.status != status;
            msg.status = status;
            changed
        })
    }

    /// Mutates one message in place. `f` reports whether it changed anything.
    ///
    /// Returns `false` if the message is unknown.
    pub fn update(
        &mut self,
        id: &ClientMessageId,
        f: impl FnOnce(&mut ChatMessage) -> bool,
    ) -> bool {
        let Some(&pos) = self.by_client.get(id) else {
            return false;
        };
        let changed = f(&mut self.messages[pos]);
        self.index_server_id(pos);
        changed
    }

    /// Merges `status` into every message matching `predicate`.
    ///
    /// Returns the client ids whose status changed, in timeline order.
    pub fn apply_status_where(
        &mut self,
        predicate: impl Fn(&ChatMessage) -> bool,
        status: MessageStatus,
    ) -> Vec<ClientMessageId> {
        let mut changed = Vec::new();
        for msg in self.messages.iter_mut().filter(|m| predicate(m)) {
            let merged = status::merge(msg.status, status);
            if merged != msg.status {
                msg.status = merged;
                changed.push(msg.client_message_id.clone());
            }
        }
        changed
    }

    /// Looks a message up by its client id.
    #[must_use]
    pub fn find_by_client_id(&self, id: &ClientMessageId) -> Option<&ChatMessage> {
        self.by_client.get(id).map(|&pos| &self.messages[pos])
    }

    /// Looks a message up by its server id.
    #[must_use]
    pub fn find_by_server_id(&self, id: &ServerId) -> Option<&ChatMessage> {
        self.by_server.get(id).map(|&pos| &self.messages[pos])
    }

    /// Resolves a bare wire id, trying the server id first.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&ChatMessage> {
        self.find_by_server_id(&ServerId::new(id))
            .or_else(|| self.find_by_client_id(&ClientMessageId::new(id)))
    }

    /// The timeline, in insertion order.
    #[must_use]
    pub fn list(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if no messages are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops every message. Used when the active conversation changes.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.by_client.clear();
        self.by_server.clear();
    }

    fn index_server_id(&mut self, pos: usize) {
        if let Some(server_id) = &self.messages[pos].server_id {
            self.by_server.entry(server_id.clone()).or_insert(pos);
        }
    }
}
