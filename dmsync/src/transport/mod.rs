//! Push channel abstraction.
//!
//! Defines the [`PushTransport`] trait the chat session consumes. Concrete
//! implementations:
//! - [`loopback::LoopbackTransport`] — in-process channels for tests and replay

pub mod loopback;

use std::fmt;

use tokio::sync::mpsc;

use dmsync_proto::codec::CodecError;
use dmsync_proto::event::{EventKind, InboundEvent, OutboundEvent};

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The push channel has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Async push transport.
///
/// Inbound events are delivered through [`Subscription`]s scoped to a set
/// of event kinds. Outbound events (acks, typing) are fire-and-forget: `Ok`
/// means the frame was handed to the channel, not that the server got it.
pub trait PushTransport: Send + Sync {
    /// Registers interest in `kinds`. Dropping the returned subscription
    /// unsubscribes.
    fn subscribe(&self, kinds: &[EventKind]) -> Subscription;

    /// Sends an event to the server.
    fn send(
        &self,
        event: &OutboundEvent,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Whether the channel is currently connected.
    fn is_connected(&self) -> bool;
}

type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// A live registration on a [`PushTransport`].
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<InboundEvent>,
    on_drop: Option<Unsubscribe>,
}

impl Subscription {
    /// Builds a subscription fed by `rx`. `on_drop` runs exactly once when
    /// the subscription is dropped.
    pub fn new(
        id: u64,
        rx: mpsc::Receiver<InboundEvent>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Transport-assigned id of this subscription.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the transport side
    /// has gone away.
    pub async fn recv(&mut self) -> Result<InboundEvent, TransportError> {
        self.rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}
