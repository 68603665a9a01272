//! Chat session layer.
//!
//! Contains the [`ChatSession`] which owns the timeline, reactions, presence
//! and emitters for one active conversation, drives the send pipeline
//! (validate -> optimistic insert -> gateway -> merge), and applies push
//! events from the transport subscription.

pub mod ack;
pub mod reactions;
pub mod reconcile;
mod receive;
pub mod retry;
mod send;
pub mod store;

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use dmsync_proto::event::{AckStatus, EventKind, OutboundEvent};
use dmsync_proto::message::{
    ChatMessage, ClientMessageId, MAX_MESSAGE_SIZE, UserId, ValidationError,
};
use dmsync_proto::reaction::ReactionGroup;
use dmsync_proto::status::MessageStatus;

use crate::gateway::Gateway;
use crate::presence::typing::{DEFAULT_TYPING_THROTTLE, TypingEmitter};
use crate::presence::{DEFAULT_TYPING_TIMEOUT, PresenceTracker};
use crate::transport::{PushTransport, Subscription};

use ack::AckEmitter;
use reactions::ReactionBook;
use reconcile::{ReconcileOutcome, Reconciler};
use retry::{MAX_RETRY_COUNT, RetryManager, RetryPolicy};

/// Errors that can occur when sending a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Message validation failed (empty, too large).
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Tunables for a [`ChatSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Manual retries allowed per message.
    pub max_retry_count: u32,
    /// Maximum outgoing content size in bytes.
    pub max_message_size: usize,
    /// Lifetime of a typing indicator without an explicit expiry.
    pub typing_timeout: Duration,
    /// Minimum spacing between outbound typing signals.
    pub typing_throttle: Duration,
    /// Capacity of the [`ChatEvent`] channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retry_count: MAX_RETRY_COUNT,
            max_message_size: MAX_MESSAGE_SIZE,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            typing_throttle: DEFAULT_TYPING_THROTTLE,
            event_buffer: 256,
        }
    }
}

/// Events emitted by the [`ChatSession`] for UI notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was added to the timeline or its fields changed.
    MessageUpserted {
        /// The merged record.
        message: ChatMessage,
    },
    /// Only a message's status changed.
    StatusChanged {
        /// The message whose status changed.
        client_message_id: ClientMessageId,
        /// The new status.
        status: MessageStatus,
    },
    /// A retry was refused because the message used up its retries.
    RetryLimitReached {
        /// The exhausted message.
        client_message_id: ClientMessageId,
        /// Retries already performed.
        retry_count: u32,
    },
    /// The reactions on a message changed.
    ReactionsChanged {
        /// Id the reactions are attached to.
        message_id: String,
    },
    /// The partner connected or disconnected.
    PresenceChanged {
        /// The partner.
        user_id: UserId,
        /// Whether they are now online.
        online: bool,
    },
    /// The partner's typing indicator appeared or lapsed.
    TypingChanged {
        /// The partner.
        user_id: UserId,
        /// Whether they are typing.
        typing: bool,
    },
}

/// Result of a send or retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Stable key of the message.
    pub client_message_id: ClientMessageId,
    /// Status after the gateway call was merged (`Failed` on error).
    pub status: MessageStatus,
}

/// Mutable engine state. Guarded by a synchronous mutex that is never held
/// across an await.
struct State {
    engine: Reconciler,
    retries: RetryManager,
    reactions: ReactionBook,
    presence: PresenceTracker,
    typing: TypingEmitter,
    acks: AckEmitter,
    visible: bool,
}

/// The active push subscription and its generation.
///
/// `epoch` changes whenever the subscription is replaced or closed, which
/// tells an in-flight pump that what it holds is stale.
struct Slot {
    subscription: Option<Subscription>,
    epoch: u64,
    closed: bool,
}

/// An acknowledgement decided under the state lock, sent after releasing it.
struct PendingAck {
    client_message_id: ClientMessageId,
    status: AckStatus,
    event: OutboundEvent,
}

/// One conversation between the local user and a partner.
///
/// All methods take `&self`: gateway calls, push pumping and the typing
/// timer interleave on one runtime, and every merge goes through the
/// identity and lattice rules of [`Reconciler`], so arrival order does not
/// matter. Only one task should pump the subscription at a time.
pub struct ChatSession<T: PushTransport, G: Gateway> {
    /// Push channel.
    transport: T,
    /// Request/response API.
    gateway: G,
    /// Tunables.
    config: SessionConfig,
    /// Timeline, reactions, presence and emitters.
    state: Mutex<State>,
    /// Current push subscription.
    slot: Mutex<Slot>,
    /// Wakes a pump blocked on a replaced subscription.
    interrupt: Notify,
    /// Channel for emitting chat events to the UI layer.
    event_tx: mpsc::Sender<ChatEvent>,
}

impl<T: PushTransport, G: Gateway> ChatSession<T, G> {
    /// Opens a session with `partner` and subscribes to every inbound event.
    ///
    /// Returns the session and a receiver for [`ChatEvent`]s that the UI
    /// layer should consume.
    pub fn open(
        me: UserId,
        partner: UserId,
        transport: T,
        gateway: G,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let subscription = transport.subscribe(&EventKind::ALL);
        tracing::info!(
            me = %me,
            partner = %partner,
            subscription = subscription.id(),
            "chat session opened"
        );
        let state = State {
            engine: Reconciler::new(me, partner),
            retries: RetryManager::new(RetryPolicy {
                max_retry_count: config.max_retry_count,
            }),
            reactions: ReactionBook::new(),
            presence: PresenceTracker::new(config.typing_timeout),
            typing: TypingEmitter::new(config.typing_throttle),
            acks: AckEmitter::new(),
            visible: true,
        };
        let session = Self {
            transport,
            gateway,
            config,
            state: Mutex::new(state),
            slot: Mutex::new(Slot {
                subscription: Some(subscription),
                epoch: 0,
                closed: false,
            }),
            interrupt: Notify::new(),
            event_tx,
        };
        (session, event_rx)
    }

    /// The local user.
    #[must_use]
    pub fn me(&self) -> UserId {
        self.state.lock().engine.me().clone()
    }

    /// The active conversation partner.
    #[must_use]
    pub fn partner(&self) -> UserId {
        self.state.lock().engine.partner().clone()
    }

    /// The session's tunables.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The push transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The request/response gateway.
    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Snapshot of the timeline in insertion order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().engine.store().list().to_vec()
    }

    /// Looks a message up by server id or client id.
    #[must_use]
    pub fn message(&self, id: &str) -> Option<ChatMessage> {
        self.state.lock().engine.find(id).cloned()
    }

    /// Whether the partner is online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        let state = self.state.lock();
        state.presence.is_online(state.engine.partner())
    }

    /// Every user the server reported online, sorted.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.state.lock().presence.online_users().cloned().collect();
        users.sort();
        users
    }

    /// Whether the partner is typing right now.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        let state = self.state.lock();
        state
            .presence
            .is_typing(state.engine.partner(), tokio::time::Instant::now())
    }

    /// Returns `true` once a retry of `id` was refused for exceeding the limit.
    #[must_use]
    pub fn retry_limit_reached(&self, id: &ClientMessageId) -> bool {
        self.state.lock().retries.limit_reached(id)
    }

    /// Reactions on `message_id`, grouped by emoji.
    #[must_use]
    pub fn reactions(&self, message_id: &str) -> Vec<ReactionGroup> {
        let state = self.state.lock();
        state.reactions.grouped(message_id, state.engine.me())
    }

    /// Whether the conversation is on screen.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    /// Marks the conversation as on or off screen. Inbound messages are only
    /// acknowledged while visible.
    pub fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Acknowledges every visible inbound message that is not yet read.
    ///
    /// Starts a new ack cycle. Returns the acknowledgements that went out.
    pub async fn render(&self) -> Vec<OutboundEvent> {
        let pending = {
            let mut guard = self.state.lock();
            let State {
                engine,
                acks,
                visible,
                ..
            } = &mut *guard;
            acks.begin_cycle();
            if !*visible {
                return Vec::new();
            }
            let partner = engine.partner();
            let mut pending = Vec::new();
            for message in engine
                .store()
                .list()
                .iter()
                .filter(|m| m.sender_id == *partner && m.status != MessageStatus::Read)
            {
                queue_acks(acks, message, &mut pending);
            }
            pending
        };
        self.send_acks(pending).await
    }

    /// Switches the session to a new partner.
    ///
    /// The old subscription is dropped and a fresh one taken, the timeline,
    /// reactions and typing state are cleared, and any event still in flight
    /// for the previous partner is discarded.
    pub fn switch_partner(&self, partner: UserId) {
        let subscription = self.transport.subscribe(&EventKind::ALL);
        let stale = {
            let mut slot = self.slot.lock();
            slot.epoch += 1;
            slot.closed = false;
            slot.subscription.replace(subscription)
        };
        drop(stale);
        self.interrupt.notify_one();

        let previous = {
            let mut state = self.state.lock();
            let previous = state.engine.partner().clone();
            let was_typing = state
                .presence
                .is_typing(&previous, tokio::time::Instant::now());
            state.engine.set_partner(partner.clone());
            state.retries.clear();
            state.reactions.clear();
            state.presence.clear_typing();
            state.typing.reset();
            state.acks.begin_cycle();
            if was_typing {
                self.emit(ChatEvent::TypingChanged {
                    user_id: previous.clone(),
                    typing: false,
                });
            }
            previous
        };
        tracing::info!(from = %previous, to = %partner, "switched conversation");
    }

    /// Drops the subscription. A pending [`pump_one`](Self::pump_one)
    /// returns and [`run`](Self::run) exits.
    pub fn close(&self) {
        let stale = {
            let mut slot = self.slot.lock();
            slot.epoch += 1;
            slot.closed = true;
            slot.subscription.take()
        };
        drop(stale);
        self.interrupt.notify_one();
        tracing::info!("chat session closed");
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn emit_outcome(&self, engine: &Reconciler, outcome: &ReconcileOutcome, status_only: bool) {
        for id in outcome.inserted.iter().chain(&outcome.updated) {
            let Some(message) = engine.store().find_by_client_id(id) else {
                continue;
            };
            if status_only {
                self.emit(ChatEvent::StatusChanged {
                    client_message_id: id.clone(),
                    status: message.status,
                });
            } else {
                self.emit(ChatEvent::MessageUpserted {
                    message: message.clone(),
                });
            }
        }
    }

    /// Sends acknowledgements and merges each confirmed status locally.
    async fn send_acks(&self, pending: Vec<PendingAck>) -> Vec<OutboundEvent> {
        let mut sent = Vec::with_capacity(pending.len());
        for ack in pending {
            if let Err(e) = self.transport.send(&ack.event).await {
                tracing::warn!(
                    client_message_id = %ack.client_message_id,
                    status = %ack.status,
                    error = %e,
                    "failed to send ack"
                );
                continue;
            }
            let changed = self
                .state
                .lock()
                .engine
                .apply_status(&ack.client_message_id, ack.status.as_status());
            if changed {
                self.emit(ChatEvent::StatusChanged {
                    client_message_id: ack.client_message_id,
                    status: ack.status.as_status(),
                });
            }
            sent.push(ack.event);
        }
        sent
    }
}

/// Queues `delivered` then `read` for `message`, skipping what is redundant.
fn queue_acks(acks: &mut AckEmitter, message: &ChatMessage, out: &mut Vec<PendingAck>) {
    for status in [AckStatus::Delivered, AckStatus::Read] {
        if let Some(event) = acks.acknowledge(message, status) {
            out.push(PendingAck {
                client_message_id: message.client_message_id.clone(),
                status,
                event,
            });
        }
    }
}
