//! Per-message reaction lists with toggle semantics.

use std::collections::HashMap;

use dmsync_proto::message::UserId;
use dmsync_proto::reaction::{Reaction, ReactionGroup};

/// Prefix of reaction ids made up locally until the server's id is known.
const LOCAL_ID_PREFIX: &str = "local:";

/// Reactions for the active conversation, keyed by message id.
///
/// A user holds at most one reaction per emoji per message: adding a second
/// one for the same (user, emoji) is a no-op.
#[derive(Debug, Default)]
pub struct ReactionBook {
    by_message: HashMap<String, Vec<Reaction>>,
}

impl ReactionBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a `reaction_added` event. Returns `true` if it was new.
    pub fn apply_added(&mut self, reaction: Reaction) -> bool {
        let list = self
            .by_message
            .entry(reaction.message_id.clone())
            .or_default();
        if list.iter().any(|r| r.reaction_id == reaction.reaction_id) {
            return false;
        }
        if let Some(existing) = list
            .iter_mut()
            .find(|r| r.user_id == reaction.user_id && r.emoji == reaction.emoji)
        {
            // Adopt the server id over a placeholder from a local toggle.
            if existing.reaction_id.starts_with(LOCAL_ID_PREFIX) {
                existing.reaction_id = reaction.reaction_id;
            }
            return false;
        }
        list.push(reaction);
        true
    }

    /// Applies a `reaction_removed` event.
    ///
    /// Removes by reaction id when given, and by (user, emoji) when the id
    /// is absent or matches nothing. Returns `true` if anything was removed.
    pub fn apply_removed(
        &mut self,
        message_id: &str,
        reaction_id: Option<&str>,
        user_id: Option<&UserId>,
        emoji: Option<&str>,
    ) -> bool {
        let Some(list) = self.by_message.get_mut(message_id) else {
            return false;
        };
        let before = list.len();
        if let Some(id) = reaction_id {
            list.retain(|r| r.reaction_id != id);
        }
        if list.len() == before {
            match (user_id, emoji) {
                (Some(user), Some(emoji)) => {
                    list.retain(|r| !(r.user_id == *user && r.emoji == emoji));
                }
                _ if reaction_id.is_none() => {
                    tracing::warn!(
                        message_id,
                        "reaction removal without id or (user, emoji) ignored"
                    );
                }
                _ => {}
            }
        }
        let removed = list.len() != before;
        if list.is_empty() {
            self.by_message.remove(message_id);
        }
        removed
    }

    /// Applies the result of a local toggle request.
    ///
    /// `removed` is the server's verdict. When the server did not return the
    /// created reaction, a placeholder id is derived from the triple.
    pub fn apply_toggle(
        &mut self,
        message_id: &str,
        user_id: &UserId,
        emoji: &str,
        removed: bool,
        created: Option<Reaction>,
    ) -> bool {
        if removed {
            return self.apply_removed(message_id, None, Some(user_id), Some(emoji));
        }
        let reaction = created.unwrap_or_else(|| Reaction {
            reaction_id: format!("{LOCAL_ID_PREFIX}{message_id}:{user_id}:{emoji}"),
            message_id: message_id.to_owned(),
            user_id: user_id.clone(),
            emoji: emoji.to_owned(),
        });
        self.apply_added(reaction)
    }

    /// Raw reactions on a message, in arrival order.
    #[must_use]
    pub fn reactions(&self, message_id: &str) -> &[Reaction] {
        self.by_message
            .get(message_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Reactions grouped by emoji, in order of first appearance.
    #[must_use]
    pub fn grouped(&self, message_id: &str, me: &UserId) -> Vec<ReactionGroup> {
        let mut groups: Vec<ReactionGroup> = Vec::new();
        for reaction in self.reactions(message_id) {
            let mine = reaction.user_id == *me;
            if let Some(group) = groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
                group.count += 1;
                group.reacted_by_me |= mine;
            } else {
                groups.push(ReactionGroup {
                    emoji: reaction.emoji.clone(),
                    count: 1,
                    reacted_by_me: mine,
                });
            }
        }
        groups
    }

    /// Drops every reaction. Used on conversation switch.
    pub fn clear(&mut self) {
        self.by_message.clear();
    }
}
