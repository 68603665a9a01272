//! Capture replay.
//!
//! Feeds a recorded sequence of push events through a [`ChatSession`] over a
//! loopback transport, then reports the converged timeline and every
//! acknowledgement the engine sent. Used to debug reconciliation issues
//! from production captures.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use dmsync_proto::event::{InboundEvent, OutboundEvent};
use dmsync_proto::message::{ChatMessage, UserId};
use dmsync_proto::reaction::ReactionGroup;

use crate::chat::ChatSession;
use crate::config::ClientConfig;
use crate::gateway::scripted::ScriptedGateway;
use crate::transport::TransportError;
use crate::transport::loopback::LoopbackTransport;

/// The state of a session after a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Local user.
    pub me: UserId,
    /// Conversation partner.
    pub partner: UserId,
    /// Number of events fed in.
    pub applied: usize,
    /// Converged timeline.
    pub messages: Vec<ChatMessage>,
    /// Reactions per message, for messages that have any.
    pub reactions: Vec<(String, Vec<ReactionGroup>)>,
    /// Acknowledgements the session sent, in order.
    pub acks: Vec<OutboundEvent>,
    /// Whether the partner ended up online.
    pub partner_online: bool,
    /// Whether the partner was still typing at the end.
    pub partner_typing: bool,
}

/// Replays `events` for the conversation between `me` and `partner`.
///
/// With `visible` set, inbound messages are acknowledged as read and a
/// final render pass runs, as if the conversation were on screen.
///
/// # Errors
///
/// Returns [`TransportError`] if the loopback channel closes mid-replay.
pub async fn replay(
    events: Vec<InboundEvent>,
    me: UserId,
    partner: UserId,
    config: &ClientConfig,
    visible: bool,
) -> Result<ReplayReport, TransportError> {
    let (transport, mut server) = LoopbackTransport::create(config.subscription_buffer);
    let (session, _events) = ChatSession::open(
        me.clone(),
        partner.clone(),
        transport,
        ScriptedGateway::new(),
        config.to_session_config(),
    );
    session.set_visible(visible);

    let applied = events.len();
    for event in events {
        let kind = event.kind();
        if server.push(event).await == 0 {
            tracing::warn!(%kind, "replayed event had no subscriber");
            continue;
        }
        session.pump_one().await?;
    }
    session.render().await;

    let messages = session.messages();
    let reactions = messages
        .iter()
        .filter_map(|m| {
            let id = m.wire_id().to_owned();
            let groups = session.reactions(&id);
            (!groups.is_empty()).then_some((id, groups))
        })
        .collect();

    let report = ReplayReport {
        me,
        partner,
        applied,
        messages,
        reactions,
        acks: server.drain_outbound(),
        partner_online: session.is_online(),
        partner_typing: session.is_typing(),
    };
    session.close();
    tracing::info!(
        applied,
        messages = report.messages.len(),
        acks = report.acks.len(),
        "replay finished"
    );
    Ok(report)
}

impl ReplayReport {
    /// Formats the report for a terminal, with timestamps in
    /// `timestamp_format` (chrono syntax, UTC).
    #[must_use]
    pub fn render(&self, timestamp_format: &str) -> String {
        let mut out = String::new();
        let mut flags = Vec::new();
        if self.partner_online {
            flags.push("online");
        }
        if self.partner_typing {
            flags.push("typing");
        }
        let _ = writeln!(
            out,
            "conversation {} <-> {}{}",
            self.me,
            self.partner,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        );
        let _ = writeln!(out, "{} events, {} messages", self.applied, self.messages.len());

        for message in &self.messages {
            let time = format_millis(message.created_at.as_millis(), timestamp_format);
            let server_id = message
                .server_id
                .as_ref()
                .map_or("-", |s| s.as_str());
            let _ = writeln!(
                out,
                "[{time}] {} -> {} {:<9} {}/{} {}",
                message.sender_id,
                message.recipient_id,
                message.status.to_string(),
                message.client_message_id,
                server_id,
                message.content
            );
            if let Some((_, groups)) = self
                .reactions
                .iter()
                .find(|(id, _)| message.answers_to(id))
            {
                let line: Vec<String> = groups
                    .iter()
                    .map(|g| {
                        let mine = if g.reacted_by_me { "*" } else { "" };
                        format!("{} {}{mine}", g.emoji, g.count)
                    })
                    .collect();
                let _ = writeln!(out, "    {}", line.join("  "));
            }
        }

        if !self.acks.is_empty() {
            let _ = writeln!(out, "acks:");
            for ack in &self.acks {
                if let OutboundEvent::MessageAck { message_id, status } = ack {
                    let _ = writeln!(out, "  {message_id} {status}");
                }
            }
        }
        out
    }
}

/// Formats epoch millis with a chrono format string, falling back to the raw
/// number when the timestamp is out of range or the format is invalid.
fn format_millis(millis: u64, format: &str) -> String {
    let Some(time) = i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
    else {
        return millis.to_string();
    };
    let mut out = String::new();
    if write!(out, "{}", time.format(format)).is_err() {
        return millis.to_string();
    }
    out
}
