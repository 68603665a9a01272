//! Integration tests for the send pipeline and push reconciliation.
//!
//! Verifies:
//! 1. The "hello" lifecycle converges to one delivered entry.
//! 2. A push echo that beats the send response is merged, not duplicated.
//! 3. Duplicate and stale pushes are absorbed.
//! 4. Inbound partner messages are acknowledged delivered, then read.
//! 5. Raw JSON frames decode and apply end to end.

use dmsync::chat::{ChatEvent, ChatSession, SessionConfig};
use dmsync::gateway::SendResponse;
use dmsync::gateway::scripted::{GatewayCall, ScriptedGateway};
use dmsync::transport::loopback::{LoopbackServer, LoopbackTransport};

use dmsync_proto::event::{AckStatus, InboundEvent, OutboundEvent};
use dmsync_proto::message::{ClientMessageId, MessageKind, MessagePayload, ServerId, UserId};
use dmsync_proto::status::MessageStatus;

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Session = ChatSession<LoopbackTransport, ScriptedGateway>;

/// Open Alice's session with Bob over a loopback push channel.
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

/// A push observation of Alice's own message.
fn echo(server_id: &str, client_id: &ClientMessageId, status: MessageStatus) -> InboundEvent {
    InboundEvent::ReceiveMessage {
        message: MessagePayload {
            client_message_id: Some(client_id.clone()),
            sender_id: Some(UserId::new("alice")),
            recipient_id: Some(UserId::new("bob")),
            status: Some(status),
            ..MessagePayload::with_server_id(server_id)
        },
    }
}

/// A message from Bob to Alice.
fn from_bob(server_id: &str, content: &str) -> InboundEvent {
    InboundEvent::ReceiveMessage {
        message: MessagePayload {
            sender_id: Some(UserId::new("bob")),
            recipient_id: Some(UserId::new("alice")),
            content: Some(content.into()),
            ..MessagePayload::with_server_id(server_id)
        },
    }
}

/// Push an event and apply it.
async fn deliver(session: &Session, server: &LoopbackServer, event: InboundEvent) {
    assert_eq!(server.push(event).await, 1);
    session.pump_one().await.unwrap();
}

// ---------------------------------------------------------------------------
// Send lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hello_lifecycle_converges_to_single_delivered_entry() {
    let (session, _events, server) = open_session();
    session.gateway().push_send(Ok(SendResponse {
        message: MessagePayload::with_server_id("s1"),
    }));

    let outcome = session
        .send_message("hello", MessageKind::Text, None)
        .await
        .unwrap();
    assert_eq!(outcome.status, MessageStatus::Sent);
    assert_eq!(session.messages().len(), 1);

    let stored = session.message("s1").unwrap();
    assert_eq!(stored.client_message_id, outcome.client_message_id);
    assert_eq!(stored.server_id, Some(ServerId::new("s1")));
    assert_eq!(stored.content, "hello");

    deliver(
        &session,
        &server,
        InboundEvent::ReceiveMessage {
            message: MessagePayload {
                status: Some(MessageStatus::Delivered),
                ..MessagePayload::with_server_id("s1")
            },
        },
    )
    .await;
    assert_eq!(session.message("s1").unwrap().status, MessageStatus::Delivered);

    deliver(
        &session,
        &server,
        InboundEvent::ReceiveMessage {
            message: MessagePayload {
                status: Some(MessageStatus::Sent),
                ..MessagePayload::with_server_id("s1")
            },
        },
    )
    .await;
    assert_eq!(session.message("s1").unwrap().status, MessageStatus::Delivered);
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test]
async fn request_carries_client_id_and_reply_reference() {
    let (session, _events, _server) = open_session();
    let outcome = session
        .send_message("see above", MessageKind::Text, Some("s0".into()))
        .await
        .unwrap();

    let calls = session.gateway().calls();
    let [GatewayCall::SendMessage(request)] = calls.as_slice() else {
        panic!("expected one send call, got {calls:?}");
    };
    assert_eq!(request.client_message_id, outcome.client_message_id);
    assert_eq!(request.recipient_id, UserId::new("bob"));
    assert_eq!(request.reply_to_id.as_deref(), Some("s0"));
}

#[tokio::test]
async fn client_ids_are_unique_per_send() {
    let (session, _events, _server) = open_session();
    let a = session
        .send_message("one", MessageKind::Text, None)
        .await
        .unwrap();
    let b = session
        .send_message("two", MessageKind::Text, None)
        .await
        .unwrap();
    assert_ne!(a.client_message_id, b.client_message_id);
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.messages()[0].content, "one");
}

// ---------------------------------------------------------------------------
// Interleavings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_echo_before_response_is_merged() {
    let (session, _events, server) = open_session();
    session.gateway().push_send(Ok(SendResponse {
        message: MessagePayload::with_server_id("s1"),
    }));

    let gate = session.gateway().hold().await;
    let send = session.send_message("hello", MessageKind::Text, None);
    let interleave = async {
        while session.gateway().send_count() == 0 {
            tokio::task::yield_now().await;
        }
        let client_id = session.messages()[0].client_message_id.clone();
        deliver(
            &session,
            &server,
            echo("s1", &client_id, MessageStatus::Delivered),
        )
        .await;
        drop(gate);
    };
    let (outcome, ()) = tokio::join!(send, interleave);
    let outcome = outcome.unwrap();

    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].client_message_id, outcome.client_message_id);
    assert_eq!(messages[0].server_id, Some(ServerId::new("s1")));
    assert_eq!(outcome.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn status_event_by_client_id_before_server_id_is_known() {
    let (session, _events, server) = open_session();
    let gate = session.gateway().hold().await;
    let send = session.send_message("hello", MessageKind::Text, None);
    let interleave = async {
        while session.gateway().send_count() == 0 {
            tokio::task::yield_now().await;
        }
        let client_id = session.messages()[0].client_message_id.clone();
        deliver(
            &session,
            &server,
            InboundEvent::MessageStatusChanged {
                message_id: client_id.as_str().to_owned(),
                status: MessageStatus::Sent,
            },
        )
        .await;
        drop(gate);
    };
    let (outcome, ()) = tokio::join!(send, interleave);
    assert_eq!(outcome.unwrap().status, MessageStatus::Sent);
    assert_eq!(session.messages().len(), 1);
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inbound_message_is_inserted_once_and_acked() {
    let (session, mut events, mut server) = open_session();
    deliver(&session, &server, from_bob("s7", "hey")).await;
    deliver(&session, &server, from_bob("s7", "hey")).await;

    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_id, UserId::new("bob"));
    assert_eq!(messages[0].status, MessageStatus::Read);

    assert_eq!(
        server.drain_outbound(),
        vec![
            OutboundEvent::MessageAck {
                message_id: "s7".into(),
                status: AckStatus::Delivered,
            },
            OutboundEvent::MessageAck {
                message_id: "s7".into(),
                status: AckStatus::Read,
            },
        ]
    );

    let first = events.try_recv().unwrap();
    assert!(matches!(
        first,
        ChatEvent::MessageUpserted { ref message } if message.content == "hey"
    ));
}

#[tokio::test]
async fn bulk_read_marks_own_messages() {
    let (session, _events, server) = open_session();
    session
        .send_message("one", MessageKind::Text, None)
        .await
        .unwrap();
    session
        .send_message("two", MessageKind::Text, None)
        .await
        .unwrap();

    deliver(
        &session,
        &server,
        InboundEvent::MessageRead {
            sender_id: UserId::new("bob"),
        },
    )
    .await;
    assert!(
        session
            .messages()
            .iter()
            .all(|m| m.status == MessageStatus::Read)
    );
}

#[tokio::test]
async fn raw_frames_apply_end_to_end() {
    let (session, _events, server) = open_session();
    server
        .push_frame(
            r#"{"event":"receive_message","data":{"message":{"id":"s3","senderId":"bob","recipientId":"alice","content":"hi","type":"code"}}}"#,
        )
        .await
        .unwrap();
    session.pump_one().await.unwrap();

    let stored = session.message("s3").unwrap();
    assert_eq!(stored.kind, MessageKind::Code);
    assert_eq!(stored.content, "hi");
}
