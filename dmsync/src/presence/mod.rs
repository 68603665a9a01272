//! Online presence and typing indicators.
//!
//! Typing entries carry their own expiry and lapse without any explicit
//! "stopped typing" signal. Expired entries are pruned lazily on query and by
//! the session's single shared timer, which sleeps until [`PresenceTracker::next_expiry`].

pub mod typing;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use dmsync_proto::message::UserId;

/// Default lifetime of a typing indicator without an explicit expiry.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(4);

/// Online set and self-expiring typing map.
#[derive(Debug)]
pub struct PresenceTracker {
    online: HashSet<UserId>,
    typing: HashMap<UserId, Instant>,
    default_timeout: Duration,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

impl PresenceTracker {
    /// Creates a tracker whose typing entries default to `default_timeout`.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            online: HashSet::new(),
            typing: HashMap::new(),
            default_timeout,
        }
    }

    /// Replaces the online set wholesale.
    pub fn set_online_users(&mut self, ids: impl IntoIterator<Item = UserId>) {
        self.online = ids.into_iter().collect();
    }

    /// Adds or removes one user. Returns `true` if the set changed.
    pub fn apply_presence_delta(&mut self, user: UserId, online: bool) -> bool {
        if online {
            self.online.insert(user)
        } else {
            self.online.remove(&user)
        }
    }

    /// Records that `user` is typing until `expires_at`, or for the default
    /// timeout from `now` when no expiry is given.
    ///
    /// A refresh replaces the previous expiry. Returns the effective expiry.
    pub fn mark_typing(
        &mut self,
        user: UserId,
        expires_at: Option<Instant>,
        now: Instant,
    ) -> Instant {
        let expiry = expires_at.unwrap_or(now + self.default_timeout);
        self.typing.insert(user, expiry);
        expiry
    }

    /// Drops every typing entry. Used when the active conversation changes.
    pub fn clear_typing(&mut self) {
        self.typing.clear();
    }

    /// Whether `user` is connected.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    /// Whether `user` has a live typing entry at `now`.
    #[must_use]
    pub fn is_typing(&self, user: &UserId, now: Instant) -> bool {
        self.typing.get(user).is_some_and(|&expiry| expiry > now)
    }

    /// Users currently online, in no particular order.
    pub fn online_users(&self) -> impl Iterator<Item = &UserId> {
        self.online.iter()
    }

    /// Removes every entry that expired at or before `now` and returns the
    /// affected users.
    pub fn prune(&mut self, now: Instant) -> Vec<UserId> {
        let expired: Vec<UserId> = self
            .typing
            .iter()
            .filter(|&(_, &expiry)| expiry <= now)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &expired {
            self.typing.remove(user);
        }
        expired
    }

    /// The earliest pending typing expiry, if any.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.typing.values().min().copied()
    }
}
