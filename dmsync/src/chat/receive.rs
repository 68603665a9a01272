//! Receive pipeline methods for [`ChatSession`].
//!
//! Pumps the push subscription, routes each event to the timeline, the
//! reaction book or the presence tracker, and drives the shared typing
//! expiry timer.

use std::time::Duration;

use tokio::time::Instant;

use dmsync_proto::event::InboundEvent;
use dmsync_proto::message::{Timestamp, UserId};

use crate::gateway::Gateway;
use crate::transport::{PushTransport, Subscription, TransportError};

use super::{ChatEvent, ChatSession, PendingAck, Slot, State, queue_acks};

/// A subscription borrowed out of the session for one pump.
///
/// Dropping the lease hands the subscription back unless it was replaced or
/// closed meanwhile, in which case the stale one is dropped and unsubscribes.
/// This keeps [`ChatSession::pump_one`] cancel-safe inside `select!`.
struct Lease<'a> {
    slot: &'a parking_lot::Mutex<Slot>,
    subscription: Option<Subscription>,
    epoch: u64,
}

impl Lease<'_> {
    fn is_current(&self) -> bool {
        self.slot.lock().epoch == self.epoch
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let stale = {
            let mut slot = self.slot.lock();
            if slot.epoch == self.epoch && slot.subscription.is_none() {
                slot.subscription = self.subscription.take();
            }
            self.subscription.take()
        };
        drop(stale);
    }
}

impl<T: PushTransport, G: Gateway> ChatSession<T, G> {
    /// Receives and applies one push event.
    ///
    /// Returns `Ok(None)` if the wait was interrupted by
    /// [`switch_partner`](Self::switch_partner) or [`close`](Self::close);
    /// the caller should simply pump again.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the session is closed
    /// or the transport dropped the subscription.
    pub async fn pump_one(&self) -> Result<Option<InboundEvent>, TransportError> {
        let mut lease = {
            let mut slot = self.slot.lock();
            let epoch = slot.epoch;
            let Some(subscription) = slot.subscription.take() else {
                return Err(TransportError::ConnectionClosed);
            };
            Lease {
                slot: &self.slot,
                subscription: Some(subscription),
                epoch,
            }
        };

        let event = loop {
            let Some(subscription) = lease.subscription.as_mut() else {
                return Err(TransportError::ConnectionClosed);
            };
            tokio::select! {
                biased;
                () = self.interrupt.notified() => {
                    if !lease.is_current() {
                        return Ok(None);
                    }
                }
                received = subscription.recv() => break received?,
            }
        };

        if !lease.is_current() {
            tracing::debug!(kind = %event.kind(), "event for previous subscription discarded");
            return Ok(None);
        }
        drop(lease);

        self.apply_event(&event).await;
        Ok(Some(event))
    }

    /// Applies one push event to the session.
    ///
    /// Timeline events go through the reconciler; inbound partner messages
    /// are acknowledged while the conversation is visible. Reactions apply
    /// to messages in the timeline only. Presence updates the global online
    /// set, but only changes of the partner are reported. Typing applies to
    /// the partner only.
    pub async fn apply_event(&self, event: &InboundEvent) {
        let pending = {
            let mut guard = self.state.lock();
            match event {
                InboundEvent::ReceiveMessage { .. }
                | InboundEvent::MessageStatusChanged { .. }
                | InboundEvent::MessageRead { .. }
                | InboundEvent::ReadStatus { .. } => self.apply_timeline(&mut guard, event),
                InboundEvent::ReactionAdded { reaction } => {
                    let message_id = reaction.message_id.clone();
                    if guard.engine.find(&message_id).is_none() {
                        tracing::debug!(
                            message_id,
                            "reaction for message outside timeline ignored"
                        );
                    } else if guard.reactions.apply_added(reaction.clone()) {
                        self.emit(ChatEvent::ReactionsChanged { message_id });
                    }
                    Vec::new()
                }
                InboundEvent::ReactionRemoved {
                    message_id,
                    reaction_id,
                    user_id,
                    emoji,
                } => {
                    if guard.reactions.apply_removed(
                        message_id,
                        reaction_id.as_deref(),
                        user_id.as_ref(),
                        emoji.as_deref(),
                    ) {
                        self.emit(ChatEvent::ReactionsChanged {
                            message_id: message_id.clone(),
                        });
                    }
                    Vec::new()
                }
                InboundEvent::OnlineUsers(ids) => {
                    let partner = guard.engine.partner().clone();
                    let was_online = guard.presence.is_online(&partner);
                    guard.presence.set_online_users(ids.iter().cloned());
                    let online = guard.presence.is_online(&partner);
                    if online != was_online {
                        self.emit(ChatEvent::PresenceChanged {
                            user_id: partner,
                            online,
                        });
                    }
                    Vec::new()
                }
                InboundEvent::PresenceUpdate { user_id, online } => {
                    let changed = guard.presence.apply_presence_delta(user_id.clone(), *online);
                    if changed && user_id == guard.engine.partner() {
                        self.emit(ChatEvent::PresenceChanged {
                            user_id: user_id.clone(),
                            online: *online,
                        });
                    }
                    Vec::new()
                }
                InboundEvent::UserTyping {
                    user_id,
                    expires_at,
                } => {
                    self.apply_typing(&mut guard, user_id, *expires_at);
                    Vec::new()
                }
            }
        };
        self.send_acks(pending).await;
    }

    fn apply_timeline(&self, state: &mut State, event: &InboundEvent) -> Vec<PendingAck> {
        let outcome = state.engine.apply_event(event);
        let status_only = !matches!(event, InboundEvent::ReceiveMessage { .. });
        self.emit_outcome(&state.engine, &outcome, status_only);

        let mut pending = Vec::new();
        if !state.visible {
            return pending;
        }
        for id in &outcome.ack_candidates {
            if let Some(message) = state.engine.store().find_by_client_id(id) {
                queue_acks(&mut state.acks, message, &mut pending);
            }
        }
        pending
    }

    fn apply_typing(&self, state: &mut State, user: &UserId, expires_at: Option<Timestamp>) {
        if user != state.engine.partner() {
            tracing::debug!(user = %user, "typing from non-partner ignored");
            return;
        }
        let now = Instant::now();
        let expires_at =
            expires_at.map(|at| now + Duration::from_millis(Timestamp::now().millis_until(at)));
        let was_typing = state.presence.is_typing(user, now);
        state.presence.mark_typing(user.clone(), expires_at, now);
        let typing = state.presence.is_typing(user, now);
        if typing != was_typing {
            self.emit(ChatEvent::TypingChanged {
                user_id: user.clone(),
                typing,
            });
        }
    }

    /// Prunes lapsed typing indicators and reports the partner's.
    ///
    /// Returns the users whose indicator expired.
    pub fn expire_typing(&self) -> Vec<UserId> {
        let mut state = self.state.lock();
        let expired = state.presence.prune(Instant::now());
        let partner = state.engine.partner();
        if expired.contains(partner) {
            self.emit(ChatEvent::TypingChanged {
                user_id: partner.clone(),
                typing: false,
            });
        }
        expired
    }

    /// Pumps push events and fires the typing expiry timer until `shutdown`
    /// resolves or the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the push channel failed while the
    /// session was still open.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), TransportError> {
        tokio::pin!(shutdown);
        loop {
            let next_expiry = self.state.lock().presence.next_expiry();
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("chat session loop stopped");
                    return Ok(());
                }
                () = sleep_until(next_expiry) => {
                    self.expire_typing();
                }
                result = self.pump_one() => match result {
                    Ok(_) => {}
                    Err(_) if self.is_closed() => return Ok(()),
                    Err(e) => {
                        tracing::warn!(error = %e, "push channel failed");
                        return Err(e);
                    }
                },
            }
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
