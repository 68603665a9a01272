//! Integration tests for failed sends and bounded manual retry.
//!
//! Verifies:
//! 1. A failed message retried until success ends up `Sent` under the same
//!    client id, with its retry count reflecting the attempts.
//! 2. Once the limit is used up, a retry makes no network call and reports
//!    the condition.
//! 3. A send error arriving after a push already confirmed the message does
//!    not downgrade it.

use dmsync::chat::retry::RetryError;
use dmsync::chat::{ChatEvent, ChatSession, SessionConfig};
use dmsync::gateway::scripted::{GatewayCall, ScriptedGateway};
use dmsync::gateway::{GatewayError, SendResponse};
use dmsync::transport::loopback::{LoopbackServer, LoopbackTransport};

use dmsync_proto::event::InboundEvent;
use dmsync_proto::message::{MessageKind, MessagePayload, ServerId, UserId};
use dmsync_proto::status::MessageStatus;

use tokio::sync::mpsc;

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

fn offline() -> GatewayError {
    GatewayError::Network("connection refused".into())
}

fn drain(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ---------------------------------------------------------------------------
// Retry until success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fail_fail_succeed_keeps_one_entry() {
    let (session, _events, _server) = open_session();
    let gateway = session.gateway();
    gateway.fail_next_send(offline());
    gateway.fail_next_send(GatewayError::Server {
        status: 503,
        message: "unavailable".into(),
    });
    gateway.push_send(Ok(SendResponse {
        message: MessagePayload::with_server_id("s1"),
    }));

    let first = session
        .send_message("hello", MessageKind::Text, None)
        .await
        .unwrap();
    assert_eq!(first.status, MessageStatus::Failed);
    let id = first.client_message_id;

    let second = session.retry(&id).await.unwrap();
    assert_eq!(second.status, MessageStatus::Failed);
    assert_eq!(second.client_message_id, id);

    let third = session.retry(&id).await.unwrap();
    assert_eq!(third.status, MessageStatus::Sent);

    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].client_message_id, id);
    assert_eq!(messages[0].server_id, Some(ServerId::new("s1")));
    assert_eq!(messages[0].retry_count, 2);

    // Every attempt carried the same client id.
    let calls = gateway.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|call| matches!(
        call,
        GatewayCall::SendMessage(request) if request.client_message_id == id
    )));
}

#[tokio::test]
async fn retry_emits_sending_then_final_status() {
    let (session, mut events, _server) = open_session();
    session.gateway().fail_next_send(offline());
    let id = session
        .send_message("hello", MessageKind::Text, None)
        .await
        .unwrap()
        .client_message_id;
    drain(&mut events);

    session.retry(&id).await.unwrap();
    let seen = drain(&mut events);
    assert!(matches!(
        seen.first(),
        Some(ChatEvent::StatusChanged { status: MessageStatus::Sending, .. })
    ));
    assert!(matches!(
        seen.last(),
        Some(ChatEvent::MessageUpserted { message }) if message.status == MessageStatus::Sent
    ));
}

// ---------------------------------------------------------------------------
// Limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn limit_reached_after_max_retries() {
    let (session, mut events, _server) = open_session();
    let gateway = session.gateway();
    for _ in 0..4 {
        gateway.fail_next_send(offline());
    }

    let id = session
        .send_message("hello", MessageKind::Text, None)
        .await
        .unwrap()
        .client_message_id;
    for _ in 0..3 {
        let outcome = session.retry(&id).await.unwrap();
        assert_eq!(outcome.status, MessageStatus::Failed);
    }
    assert_eq!(gateway.send_count(), 4);
    assert!(!session.retry_limit_reached(&id));
    drain(&mut events);

    let err = session.retry(&id).await.unwrap_err();
    assert_eq!(
        err,
        RetryError::LimitReached {
            retry_count: 3,
            max: 3,
        }
    );
    assert_eq!(gateway.send_count(), 4);
    assert!(session.retry_limit_reached(&id));

    let stored = session.message(id.as_str()).unwrap();
    assert_eq!(stored.status, MessageStatus::Failed);
    assert_eq!(stored.retry_count, 3);

    assert_eq!(
        drain(&mut events),
        vec![ChatEvent::RetryLimitReached {
            client_message_id: id,
            retry_count: 3,
        }]
    );
}

#[tokio::test]
async fn custom_retry_limit_is_honored() {
    let (transport, _server) = LoopbackTransport::create(8);
    let (session, _events) = ChatSession::open(
        UserId::new("alice"),
        UserId::new("bob"),
        transport,
        ScriptedGateway::new(),
        SessionConfig {
            max_retry_count: 1,
            ..SessionConfig::default()
        },
    );
    session.gateway().fail_next_send(offline());
    session.gateway().fail_next_send(offline());

    let id = session
        .send_message("hello", MessageKind::Text, None)
        .await
        .unwrap()
        .client_message_id;
    session.retry(&id).await.unwrap();
    assert!(matches!(
        session.retry(&id).await,
        Err(RetryError::LimitReached { retry_count: 1, max: 1 })
    ));
}

#[tokio::test]
async fn retry_of_unknown_message_is_rejected() {
    let (session, _events, _server) = open_session();
    let id = dmsync_proto::message::ClientMessageId::new("nope");
    assert_eq!(
        session.retry(&id).await.unwrap_err(),
        RetryError::UnknownMessage(id)
    );
    assert_eq!(session.gateway().send_count(), 0);
}

// ---------------------------------------------------------------------------
// Error after confirmation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_error_after_push_confirmation_keeps_delivered() {
    let (session, _events, server) = open_session();
    session.gateway().fail_next_send(GatewayError::Network("timed out".into()));

    let gate = session.gateway().hold().await;
    let send = session.send_message("hello", MessageKind::Text, None);
    let confirm = async {
        while session.gateway().send_count() == 0 {
            tokio::task::yield_now().await;
        }
        let client_id = session.messages()[0].client_message_id.clone();
        server
            .push(InboundEvent::ReceiveMessage {
                message: MessagePayload {
                    client_message_id: Some(client_id),
                    status: Some(MessageStatus::Delivered),
                    ..MessagePayload::with_server_id("s1")
                },
            })
            .await;
        session.pump_one().await.unwrap();
        drop(gate);
    };
    let (outcome, ()) = tokio::join!(send, confirm);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.status, MessageStatus::Delivered);
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Delivered);
    assert!(matches!(
        session.retry(&outcome.client_message_id).await,
        Err(RetryError::NotRetryable(MessageStatus::Delivered))
    ));
}
