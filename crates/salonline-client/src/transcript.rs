//! The visible conversation and its merge rule.
//!
//! A transcript is rebuilt on every reconciliation pass as
//! `local-only messages ++ server messages`, deduplicated by id. Local-only
//! messages are the welcome banner and optimistic visitor messages the server
//! has not echoed back yet. Merging is a set union on message id, so
//! re-applying the same server set is a no-op.

use std::collections::HashSet;

use salonline_shared::{Message, MessageId, Sender};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript holding only a welcome banner.
    pub fn welcome(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::welcome(text)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append an optimistic message. Ignored if its id is already present.
    pub fn push_local(&mut self, message: Message) {
        if !self.contains(&message.id) {
            self.messages.push(message);
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    /// Drop the message with `id`. Returns whether it was present.
    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| &m.id != id);
        self.messages.len() != before
    }

    /// Remove every resolution marker, returning the removed ids.
    pub fn remove_resolution_markers(&mut self) -> Vec<MessageId> {
        let mut removed = Vec::new();
        self.messages.retain(|m| {
            if m.is_resolution_marker {
                removed.push(m.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Rebuild the transcript from the server's message set.
    ///
    /// Optimistic messages the server has echoed (same text and attachment
    /// from the visitor, in a message not already shown) are dropped in
    /// favour of the server copy. Messages in
    /// `hidden` never reappear. Server messages keep the order the inbox
    /// returned them in.
    pub fn merge(&self, remote: &[Message], hidden: &HashSet<MessageId>) -> Transcript {
        // Server messages already shown cannot acknowledge anything.
        let mut echoed: Vec<bool> = remote.iter().map(|r| self.contains(&r.id)).collect();
        let mut seen: HashSet<&MessageId> = HashSet::new();
        let mut merged = Vec::with_capacity(remote.len() + 2);

        for local in self.messages.iter().filter(|m| m.is_local_only()) {
            if local.id.is_local() {
                let echo = remote.iter().enumerate().position(|(i, r)| {
                    !echoed[i]
                        && r.sender == Sender::Visitor
                        && r.text == local.text
                        && r.attachment == local.attachment
                });
                if let Some(i) = echo {
                    echoed[i] = true;
                    continue;
                }
            }
            if seen.insert(&local.id) {
                merged.push(local.clone());
            }
        }

        for message in remote {
            if message.is_local_only() {
                tracing::warn!(id = %message.id, "Server message uses a reserved id, skipping");
                continue;
            }
            if hidden.contains(&message.id) {
                continue;
            }
            if seen.insert(&message.id) {
                merged.push(message.clone());
            }
        }

        Transcript { messages: merged }
    }
}
