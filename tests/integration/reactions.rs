//! Integration tests for message reactions.
//!
//! Verifies:
//! 1. Local toggles add and remove the user's reaction.
//! 2. Pushed reactions group with local ones by emoji.
//! 3. Removal events match by reaction id or by (user, emoji).
//! 4. A failed toggle leaves local state untouched.

use dmsync::chat::{ChatEvent, ChatSession, SessionConfig};
use dmsync::gateway::scripted::{GatewayCall, ScriptedGateway};
use dmsync::gateway::{GatewayError, ToggleReactionResponse};
use dmsync::transport::loopback::{LoopbackServer, LoopbackTransport};

use dmsync_proto::event::InboundEvent;
use dmsync_proto::message::{MessagePayload, UserId};
use dmsync_proto::reaction::{Reaction, ReactionGroup};

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Session = ChatSession<LoopbackTransport, ScriptedGateway>;

/// Opens a session whose timeline already holds Bob's message `s1`.
async fn open_with_message() -> (Session, mpsc::Receiver<ChatEvent>, LoopbackServer) {
    let (transport, server) = LoopbackTransport::create(64);
    let (session, mut events) = ChatSession::open(
        UserId::new("alice"),
        UserId::new("bob"),
        transport,
        ScriptedGateway::new(),
        SessionConfig::default(),
    );
    deliver(
        &session,
        &server,
        InboundEvent::ReceiveMessage {
            message: MessagePayload {
                sender_id: Some(UserId::new("bob")),
                recipient_id: Some(UserId::new("alice")),
                content: Some("lunch?".into()),
                ..MessagePayload::with_server_id("s1")
            },
        },
    )
    .await;
    while events.try_recv().is_ok() {}
    (session, events, server)
}

async fn deliver(session: &Session, server: &LoopbackServer, event: InboundEvent) {
    server.push(event).await;
    session.pump_one().await.unwrap();
}

fn reaction(id: &str, user: &str, emoji: &str) -> Reaction {
    Reaction {
        reaction_id: id.into(),
        message_id: "s1".into(),
        user_id: UserId::new(user),
        emoji: emoji.into(),
    }
}

fn group(emoji: &str, count: usize, reacted_by_me: bool) -> ReactionGroup {
    ReactionGroup {
        emoji: emoji.into(),
        count,
        reacted_by_me,
    }
}

// ---------------------------------------------------------------------------
// Local toggles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn toggle_adds_then_removes() {
    let (session, mut events, _server) = open_with_message().await;

    let removed = session.toggle_reaction("s1", "👍").await.unwrap();
    assert!(!removed);
    assert_eq!(session.reactions("s1"), vec![group("👍", 1, true)]);
    assert_eq!(
        events.try_recv().unwrap(),
        ChatEvent::ReactionsChanged {
            message_id: "s1".into()
        }
    );

    let removed = session.toggle_reaction("s1", "👍").await.unwrap();
    assert!(removed);
    assert!(session.reactions("s1").is_empty());

    assert_eq!(
        session.gateway().calls(),
        vec![
            GatewayCall::ToggleReaction {
                message_id: "s1".into(),
                emoji: "👍".into(),
            };
            2
        ]
    );
}

#[tokio::test]
async fn toggle_keeps_server_reaction_id() {
    let (session, _events, server) = open_with_message().await;
    session.gateway().push_toggle(Ok(ToggleReactionResponse {
        removed: false,
        reaction: Some(reaction("r9", "alice", "🎉")),
    }));
    session.toggle_reaction("s1", "🎉").await.unwrap();

    // The echo of our own reaction is recognised by id and not double counted.
    deliver(
        &session,
        &server,
        InboundEvent::ReactionAdded {
            reaction: reaction("r9", "alice", "🎉"),
        },
    )
    .await;
    assert_eq!(session.reactions("s1"), vec![group("🎉", 1, true)]);
}

#[tokio::test]
async fn own_toggle_removed_by_server_id() {
    let (session, _events, server) = open_with_message().await;
    // Default scripted toggle returns no reaction, so a placeholder is stored.
    session.toggle_reaction("s1", "👍").await.unwrap();
    deliver(
        &session,
        &server,
        InboundEvent::ReactionAdded {
            reaction: reaction("r9", "alice", "👍"),
        },
    )
    .await;
    deliver(
        &session,
        &server,
        InboundEvent::ReactionRemoved {
            message_id: "s1".into(),
            reaction_id: Some("r9".into()),
            user_id: Some(UserId::new("alice")),
            emoji: Some("👍".into()),
        },
    )
    .await;
    assert!(session.reactions("s1").is_empty());
}

#[tokio::test]
async fn failed_toggle_changes_nothing() {
    let (session, mut events, _server) = open_with_message().await;
    session
        .gateway()
        .push_toggle(Err(GatewayError::Network("offline".into())));

    let err = session.toggle_reaction("s1", "👍").await.unwrap_err();
    assert_eq!(err, GatewayError::Network("offline".into()));
    assert!(session.reactions("s1").is_empty());
    assert!(events.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Pushed reactions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pushed_reactions_group_by_emoji() {
    let (session, _events, server) = open_with_message().await;
    session.toggle_reaction("s1", "👍").await.unwrap();

    for event in [
        InboundEvent::ReactionAdded {
            reaction: reaction("r1", "bob", "👍"),
        },
        InboundEvent::ReactionAdded {
            reaction: reaction("r2", "bob", "❤️"),
        },
        // Same reaction id again.
        InboundEvent::ReactionAdded {
            reaction: reaction("r1", "bob", "👍"),
        },
    ] {
        deliver(&session, &server, event).await;
    }

    assert_eq!(
        session.reactions("s1"),
        vec![group("👍", 2, true), group("❤️", 1, false)]
    );
}

#[tokio::test]
async fn removal_by_id_and_by_user_emoji() {
    let (session, _events, server) = open_with_message().await;
    deliver(
        &session,
        &server,
        InboundEvent::ReactionAdded {
            reaction: reaction("r1", "bob", "👍"),
        },
    )
    .await;
    deliver(
        &session,
        &server,
        InboundEvent::ReactionAdded {
            reaction: reaction("r2", "bob", "❤️"),
        },
    )
    .await;

    deliver(
        &session,
        &server,
        InboundEvent::ReactionRemoved {
            message_id: "s1".into(),
            reaction_id: Some("r1".into()),
            user_id: None,
            emoji: None,
        },
    )
    .await;
    assert_eq!(session.reactions("s1"), vec![group("❤️", 1, false)]);

    deliver(
        &session,
        &server,
        InboundEvent::ReactionRemoved {
            message_id: "s1".into(),
            reaction_id: None,
            user_id: Some(UserId::new("bob")),
            emoji: Some("❤️".into()),
        },
    )
    .await;
    assert!(session.reactions("s1").is_empty());
}

#[tokio::test]
async fn reaction_for_unknown_message_is_ignored() {
    let (session, mut events, server) = open_with_message().await;
    deliver(
        &session,
        &server,
        InboundEvent::ReactionAdded {
            reaction: Reaction {
                message_id: "elsewhere".into(),
                ..reaction("r1", "bob", "👍")
            },
        },
    )
    .await;
    assert!(session.reactions("elsewhere").is_empty());
    assert!(events.try_recv().is_err());
}
