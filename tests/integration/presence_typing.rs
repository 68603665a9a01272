//! Integration tests for presence and typing indicators.
//!
//! Runs on a paused clock so expiries can be stepped through exactly.
//!
//! Verifies:
//! 1. A typing indicator lapses after the default timeout unless refreshed.
//! 2. A server-supplied expiry overrides the default.
//! 3. Outbound typing signals are throttled.
//! 4. Presence tracks every user, but only the partner's changes are
//!    reported.

use std::time::Duration;

use dmsync::chat::{ChatEvent, ChatSession, SessionConfig};
use dmsync::gateway::scripted::ScriptedGateway;
use dmsync::transport::loopback::{LoopbackServer, LoopbackTransport};

use dmsync_proto::event::{InboundEvent, OutboundEvent};
use dmsync_proto::message::{Timestamp, UserId};

use tokio::sync::mpsc;
use tokio::time::advance;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Session = ChatSession<LoopbackTransport, ScriptedGateway>;

fn open_session() -> (Session, mpsc::Receiver<ChatEvent>, LoopbackServer) {
    let (transport, server) = LoopbackTransport::create(64);
    let (session, events) = ChatSession::open(
        UserId::new("alice"),
        UserId::new("bob"),
        transport,
        ScriptedGateway::new(),
        SessionConfig::default(),
    );
    (session, events, server)
}

async fn deliver(session: &Session, server: &LoopbackServer, event: InboundEvent) {
    server.push(event).await;
    session.pump_one().await.unwrap();
}

fn typing(user: &str) -> InboundEvent {
    InboundEvent::UserTyping {
        user_id: UserId::new(user),
        expires_at: None,
    }
}

fn typing_events(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<bool> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::TypingChanged { typing, .. } = event {
            out.push(typing);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Inbound typing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn typing_lapses_after_default_timeout() {
    let (session, mut events, server) = open_session();
    deliver(&session, &server, typing("bob")).await;
    assert!(session.is_typing());

    advance(Duration::from_millis(3_999)).await;
    assert!(session.expire_typing().is_empty());
    assert!(session.is_typing());

    advance(Duration::from_millis(2)).await;
    assert_eq!(session.expire_typing(), vec![UserId::new("bob")]);
    assert!(!session.is_typing());
    assert_eq!(typing_events(&mut events), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn refresh_extends_the_indicator() {
    let (session, mut events, server) = open_session();
    deliver(&session, &server, typing("bob")).await;
    advance(Duration::from_millis(3_000)).await;
    deliver(&session, &server, typing("bob")).await;

    advance(Duration::from_millis(3_000)).await;
    assert!(session.expire_typing().is_empty());
    assert!(session.is_typing());

    advance(Duration::from_millis(1_001)).await;
    session.expire_typing();
    assert!(!session.is_typing());
    // The refresh did not produce a second "typing" transition.
    assert_eq!(typing_events(&mut events), vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn explicit_expiry_overrides_default() {
    let (session, _events, server) = open_session();
    let expires_at = Timestamp::from_millis(Timestamp::now().as_millis() + 2_000);
    deliver(
        &session,
        &server,
        InboundEvent::UserTyping {
            user_id: UserId::new("bob"),
            expires_at: Some(expires_at),
        },
    )
    .await;

    advance(Duration::from_millis(1_000)).await;
    assert!(session.is_typing());

    advance(Duration::from_millis(1_500)).await;
    assert!(!session.is_typing());
    assert_eq!(session.expire_typing(), vec![UserId::new("bob")]);
}

#[tokio::test(start_paused = true)]
async fn typing_from_other_users_is_ignored() {
    let (session, mut events, server) = open_session();
    deliver(&session, &server, typing("carol")).await;
    assert!(!session.is_typing());
    assert!(typing_events(&mut events).is_empty());
}

// ---------------------------------------------------------------------------
// Outbound typing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn outbound_typing_is_throttled() {
    let (session, _events, mut server) = open_session();

    assert!(session.notify_typing().await.unwrap());
    assert!(!session.notify_typing().await.unwrap());
    advance(Duration::from_millis(1_000)).await;
    assert!(!session.notify_typing().await.unwrap());
    advance(Duration::from_millis(1_001)).await;
    assert!(session.notify_typing().await.unwrap());

    let signal = OutboundEvent::Typing {
        recipient_id: UserId::new("bob"),
    };
    assert_eq!(server.drain_outbound(), vec![signal.clone(), signal]);
}

#[tokio::test(start_paused = true)]
async fn typing_signal_fails_when_disconnected() {
    let (session, _events, server) = open_session();
    server.disconnect();
    assert!(session.notify_typing().await.is_err());
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn presence_reports_partner_only() {
    let (session, mut events, server) = open_session();
    deliver(
        &session,
        &server,
        InboundEvent::OnlineUsers(vec![UserId::new("carol"), UserId::new("bob")]),
    )
    .await;
    assert!(session.is_online());
    assert_eq!(
        session.online_users(),
        vec![UserId::new("bob"), UserId::new("carol")]
    );

    deliver(
        &session,
        &server,
        InboundEvent::PresenceUpdate {
            user_id: UserId::new("carol"),
            online: false,
        },
    )
    .await;
    deliver(
        &session,
        &server,
        InboundEvent::PresenceUpdate {
            user_id: UserId::new("bob"),
            online: false,
        },
    )
    .await;
    assert!(!session.is_online());
    assert!(session.online_users().is_empty());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            ChatEvent::PresenceChanged {
                user_id: UserId::new("bob"),
                online: true,
            },
            ChatEvent::PresenceChanged {
                user_id: UserId::new("bob"),
                online: false,
            },
        ]
    );
}

#[tokio::test]
async fn repeated_presence_update_is_silent() {
    let (session, mut events, server) = open_session();
    let online = InboundEvent::PresenceUpdate {
        user_id: UserId::new("bob"),
        online: true,
    };
    deliver(&session, &server, online.clone()).await;
    deliver(&session, &server, online).await;

    assert!(matches!(
        events.try_recv(),
        Ok(ChatEvent::PresenceChanged { online: true, .. })
    ));
    assert!(events.try_recv().is_err());
}
