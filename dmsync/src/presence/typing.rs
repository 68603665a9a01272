//! Rate limiting for outbound typing signals.

use std::time::Duration;

use tokio::time::Instant;

/// Default minimum spacing between two outbound typing signals.
pub const DEFAULT_TYPING_THROTTLE: Duration = Duration::from_secs(2);

/// Emits at most one typing signal per interval.
///
/// The signal is a level ("still typing"), so calls inside the window are
/// dropped rather than queued.
#[derive(Debug)]
pub struct TypingEmitter {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl Default for TypingEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_THROTTLE)
    }
}

impl TypingEmitter {
    /// Creates an emitter with the given interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Returns `true` if a typing signal should go out at `now`.
    pub fn notify_typing(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_sent
            && now.duration_since(last) < self.interval
        {
            return false;
        }
        self.last_sent = Some(now);
        true
    }

    /// Forgets the last emission, e.g. after switching conversations.
    pub const fn reset(&mut self) {
        self.last_sent = None;
    }
}
