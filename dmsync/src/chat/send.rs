//! Send pipeline methods for [`ChatSession`].
//!
//! Contains the send and retry pipeline plus the fire-and-forget outputs
//! (typing signals) and the reaction and read-marker requests.

use dmsync_proto::event::OutboundEvent;
use dmsync_proto::message::{
    ChatMessage, ClientMessageId, MessageKind, Timestamp, validate_content,
};
use dmsync_proto::status::MessageStatus;

use crate::gateway::{Gateway, GatewayError, SendRequest};
use crate::transport::{PushTransport, TransportError};

use super::retry::RetryError;
use super::{ChatEvent, ChatSession, SendError, SendOutcome};

impl<T: PushTransport, G: Gateway> ChatSession<T, G> {
    /// Sends a message to the partner.
    ///
    /// Pipeline:
    /// 1. Validate the content (non-blank, within the size limit)
    /// 2. Insert the optimistic record (`Sending`) with a fresh client id
    /// 3. Call the gateway
    /// 4. Merge the response, or mark the message `Failed`
    ///
    /// A gateway failure is not an error of this call: the message stays in
    /// the timeline as `Failed` and can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] before anything is inserted if the
    /// content is rejected.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        kind: MessageKind,
        reply_to: Option<String>,
    ) -> Result<SendOutcome, SendError> {
        let content = content.into();
        validate_content(&content, self.config.max_message_size)?;

        let message = {
            let mut state = self.state.lock();
            let message = ChatMessage::outgoing(
                ClientMessageId::generate(),
                state.engine.me().clone(),
                state.engine.partner().clone(),
                content,
                kind,
                reply_to,
                Timestamp::now(),
            );
            let id = message.client_message_id.clone();
            let fallback = message.clone();
            state.engine.optimistic_insert(message);
            state
                .engine
                .store()
                .find_by_client_id(&id)
                .cloned()
                .unwrap_or(fallback)
        };
        tracing::debug!(client_message_id = %message.client_message_id, "optimistic insert");
        self.emit(ChatEvent::MessageUpserted {
            message: message.clone(),
        });

        Ok(self.dispatch(&message).await)
    }

    /// Retries a failed message with the same client id.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::LimitReached`] without any network call once
    /// the message used up its retries (a [`ChatEvent::RetryLimitReached`]
    /// is emitted too), [`RetryError::NotRetryable`] if the message has not
    /// failed, and [`RetryError::UnknownMessage`] if it is not in the
    /// timeline.
    pub async fn retry(&self, id: &ClientMessageId) -> Result<SendOutcome, RetryError> {
        let begun = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.retries.begin(&mut state.engine, id)
        };
        let message = match begun {
            Ok(message) => message,
            Err(RetryError::LimitReached { retry_count, max }) => {
                self.emit(ChatEvent::RetryLimitReached {
                    client_message_id: id.clone(),
                    retry_count,
                });
                return Err(RetryError::LimitReached { retry_count, max });
            }
            Err(e) => return Err(e),
        };
        tracing::info!(
            client_message_id = %id,
            retry_count = message.retry_count,
            "retrying send"
        );
        self.emit(ChatEvent::StatusChanged {
            client_message_id: id.clone(),
            status: MessageStatus::Sending,
        });
        Ok(self.dispatch(&message).await)
    }

    /// Sends one attempt of `message` and merges the result.
    async fn dispatch(&self, message: &ChatMessage) -> SendOutcome {
        let id = message.client_message_id.clone();
        let request = SendRequest::from(message);

        match self.gateway.send_message(&request).await {
            Ok(response) => {
                let merged = self
                    .state
                    .lock()
                    .engine
                    .merge_send_response(&id, &response.message);
                match merged {
                    Some((merged, changed)) => {
                        if changed {
                            self.emit(ChatEvent::MessageUpserted {
                                message: merged.clone(),
                            });
                        }
                        SendOutcome {
                            client_message_id: id,
                            status: merged.status,
                        }
                    }
                    None => SendOutcome {
                        client_message_id: id,
                        status: MessageStatus::Sent,
                    },
                }
            }
            Err(e) => {
                tracing::warn!(client_message_id = %id, error = %e, "send failed");
                let (changed, status) = {
                    let mut state = self.state.lock();
                    let changed = state.engine.mark_failed(&id);
                    let status = state
                        .engine
                        .store()
                        .find_by_client_id(&id)
                        .map_or(MessageStatus::Failed, |m| m.status);
                    (changed, status)
                };
                if changed {
                    self.emit(ChatEvent::StatusChanged {
                        client_message_id: id.clone(),
                        status,
                    });
                }
                SendOutcome {
                    client_message_id: id,
                    status,
                }
            }
        }
    }

    /// Tells the partner the local user is typing, at most once per throttle
    /// interval. Returns `true` if a signal went out.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the push channel rejected the signal.
    pub async fn notify_typing(&self) -> Result<bool, TransportError> {
        let recipient = {
            let mut state = self.state.lock();
            if !state.typing.notify_typing(tokio::time::Instant::now()) {
                return Ok(false);
            }
            state.engine.partner().clone()
        };
        self.transport
            .send(&OutboundEvent::Typing {
                recipient_id: recipient,
            })
            .await?;
        Ok(true)
    }

    /// Toggles the local user's `emoji` reaction on `message_id`.
    ///
    /// Returns `true` if the toggle removed a reaction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the request failed; local reactions are
    /// left untouched.
    pub async fn toggle_reaction(
        &self,
        message_id: &str,
        emoji: &str,
    ) -> Result<bool, GatewayError> {
        let response = self.gateway.toggle_reaction(message_id, emoji).await?;
        let changed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.reactions.apply_toggle(
                message_id,
                state.engine.me(),
                emoji,
                response.removed,
                response.reaction,
            )
        };
        if changed {
            self.emit(ChatEvent::ReactionsChanged {
                message_id: message_id.to_owned(),
            });
        }
        Ok(response.removed)
    }

    /// Marks the conversation as read on the server and locally.
    ///
    /// Returns the number of messages the server flipped.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the request failed.
    pub async fn mark_as_read(&self) -> Result<u64, GatewayError> {
        let partner = self.partner();
        let response = self.gateway.mark_as_read(&partner).await?;
        let updated = {
            let mut state = self.state.lock();
            if *state.engine.partner() != partner {
                tracing::debug!(partner = %partner, "mark-as-read for previous partner ignored");
                return Ok(response.marked_read);
            }
            state.engine.mark_inbound_read()
        };
        for id in updated {
            self.emit(ChatEvent::StatusChanged {
                client_message_id: id,
                status: MessageStatus::Read,
            });
        }
        Ok(response.marked_read)
    }
}
