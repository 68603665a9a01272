//! Loopback push transport for testing and capture replay.
//!
//! [`LoopbackTransport::create`] returns the client endpoint plus a
//! [`LoopbackServer`] handle that plays the server: it pushes inbound events
//! to matching subscriptions and reads back what the client sent. Outbound
//! events travel as JSON frames, so the wire encoding is exercised too.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use dmsync_proto::codec;
use dmsync_proto::event::{EventKind, InboundEvent, OutboundEvent};

use super::{PushTransport, Subscription, TransportError};

struct Subscriber {
    id: u64,
    kinds: HashSet<EventKind>,
    tx: mpsc::Sender<InboundEvent>,
}

struct Hub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl Hub {
    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
        tracing::debug!(subscription = id, "loopback unsubscribe");
    }
}

/// Client side of an in-process push channel.
pub struct LoopbackTransport {
    hub: Arc<Hub>,
    buffer: usize,
}

/// Server side of an in-process push channel.
pub struct LoopbackServer {
    hub: Arc<Hub>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl LoopbackTransport {
    /// Creates a connected transport/server pair. `buffer` is the queue
    /// capacity of each subscription.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use dmsync::transport::loopback::LoopbackTransport;
    /// use dmsync::transport::PushTransport;
    /// use dmsync_proto::event::{EventKind, InboundEvent};
    /// use dmsync_proto::message::UserId;
    ///
    /// # async fn example() {
    /// let (transport, server) = LoopbackTransport::create(16);
    /// let mut sub = transport.subscribe(&EventKind::ALL);
    /// server.push(InboundEvent::OnlineUsers(vec![UserId::new("bob")])).await;
    /// let event = sub.recv().await.unwrap();
    /// # }
    /// ```
    #[must_use]
    pub fn create(buffer: usize) -> (Self, LoopbackServer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Hub {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            outbound_tx,
        });
        let transport = Self {
            hub: Arc::clone(&hub),
            buffer: buffer.max(1),
        };
        (transport, LoopbackServer { hub, outbound_rx })
    }
}

impl PushTransport for LoopbackTransport {
    fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        // A subscription taken while disconnected starts out closed.
        if self.hub.connected.load(Ordering::Acquire) {
            self.hub.subscribers.lock().push(Subscriber {
                id,
                kinds: kinds.iter().copied().collect(),
                tx,
            });
        }
        let hub: Weak<Hub> = Arc::downgrade(&self.hub);
        Subscription::new(id, rx, move || {
            if let Some(hub) = hub.upgrade() {
                hub.unsubscribe(id);
            }
        })
    }

    async fn send(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        let frame = codec::encode(event)?;
        self.hub
            .outbound_tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.hub.connected.load(Ordering::Acquire)
    }
}

impl LoopbackServer {
    /// Delivers `event` to every subscription interested in its kind.
    ///
    /// Returns the number of subscriptions that received it. Waits while a
    /// subscriber's queue is full.
    pub async fn push(&self, event: InboundEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<mpsc::Sender<InboundEvent>> = self
            .hub
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.kinds.contains(&kind))
            .map(|s| s.tx.clone())
            .collect();

        let mut delivered = 0;
        for tx in targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        tracing::trace!(%kind, delivered, "loopback push");
        delivered
    }

    /// Decodes a raw JSON frame and pushes it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Codec`] if the frame is not a valid event.
    pub async fn push_frame(&self, frame: &str) -> Result<usize, TransportError> {
        let event: InboundEvent = codec::decode(frame)?;
        Ok(self.push(event).await)
    }

    /// Waits for the next event the client sent. Returns `None` once the
    /// client side is gone.
    pub async fn next_outbound(&mut self) -> Option<OutboundEvent> {
        while let Some(frame) = self.outbound_rx.recv().await {
            if let Some(event) = Self::decode_outbound(&frame) {
                return Some(event);
            }
        }
        None
    }

    /// Returns the next already-sent event without waiting.
    pub fn try_outbound(&mut self) -> Option<OutboundEvent> {
        while let Ok(frame) = self.outbound_rx.try_recv() {
            if let Some(event) = Self::decode_outbound(&frame) {
                return Some(event);
            }
        }
        None
    }

    /// Takes every event the client has sent so far.
    pub fn drain_outbound(&mut self) -> Vec<OutboundEvent> {
        std::iter::from_fn(|| self.try_outbound()).collect()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscribers.lock().len()
    }

    /// Drops the connection: every subscription sees the channel close and
    /// further sends fail.
    pub fn disconnect(&self) {
        self.hub.connected.store(false, Ordering::Release);
        self.hub.subscribers.lock().clear();
        tracing::info!("loopback disconnected");
    }

    fn decode_outbound(frame: &str) -> Option<OutboundEvent> {
        match codec::decode(frame) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "undecodable outbound frame");
                None
            }
        }
    }
}
