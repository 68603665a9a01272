//! JSON encoding for push-channel frames.
//!
//! Single frames go through [`encode`] / [`decode`]. Captured sessions are
//! stored as JSON lines, one inbound event per line, and read back with
//! [`decode_lines`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::InboundEvent;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A line of a capture could not be decoded.
    #[error("line {line}: {source}")]
    Line {
        /// 1-based line number.
        line: usize,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

/// Encodes an event into a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the value cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes an event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame is not a known event.
pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(frame)?)
}

/// Decodes a JSON-lines capture of inbound events.
///
/// Blank lines and lines starting with `#` are skipped.
///
/// # Errors
///
/// Returns [`CodecError::Line`] for the first line that fails to decode.
pub fn decode_lines(capture: &str) -> Result<Vec<InboundEvent>, CodecError> {
    capture
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| CodecError::Line {
                line: idx + 1,
                source,
            })
        })
        .collect()
}
