//! The Reconciliation Engine.
//!
//! Pull-based sync: fetch the inbox's view of the conversation, decode it,
//! and fold it into the local transcript. The fold is pure and idempotent; the
//! caller decides when to fetch (polling today, a push channel tomorrow).

use std::collections::HashSet;

use tracing::{debug, info};

use salonline_shared::protocol::{MessagesResponse, RemoteMessage};
use salonline_shared::{Message, MessageId, Sender, TicketId};

use crate::error::AdapterError;
use crate::inbox::InboxAdapter;
use crate::transcript::Transcript;

/// Fetch the remote conversation for `email`, optionally scoped to a ticket.
pub async fn fetch<A: InboxAdapter>(
    adapter: &A,
    email: &str,
    ticket_id: Option<&TicketId>,
) -> Result<MessagesResponse, AdapterError> {
    let resp = adapter.get_messages(email, ticket_id).await?;
    debug!(
        ticket = ?resp.ticket_id,
        count = resp.messages.len(),
        "Fetched support messages"
    );
    Ok(resp)
}

/// What one reconciliation pass found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub transcript: Transcript,
    /// Set when the inbox reported a ticket other than the tracked one.
    pub adopted_ticket: Option<TicketId>,
    /// Operator messages that arrived since the previous pass. Always zero
    /// on the first pass for a conversation.
    pub new_operator_messages: usize,
    /// Resolution markers not yet acted upon.
    pub unhandled_markers: Vec<MessageId>,
}

/// Cross-pass bookkeeping of the engine.
#[derive(Debug, Default)]
pub struct Reconciler {
    /// Operator message count seen on the last pass; `None` until the first
    /// pass for the current conversation completes.
    operator_baseline: Option<usize>,
    /// Markers that already triggered a resolution.
    handled_markers: HashSet<MessageId>,
    /// Messages the visitor dismissed from view.
    hidden: HashSet<MessageId>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `response` into `current`.
    pub fn apply(
        &mut self,
        current: &Transcript,
        tracked_ticket: Option<&TicketId>,
        response: &MessagesResponse,
    ) -> SyncOutcome {
        let adopted_ticket = match (&response.ticket_id, tracked_ticket) {
            (Some(remote), Some(tracked)) if remote != tracked => {
                info!(from = %tracked, to = %remote, "Ticket reassigned by inbox");
                // Counting restarts for a different thread.
                self.operator_baseline = None;
                Some(remote.clone())
            }
            (Some(remote), None) => {
                info!(ticket = %remote, "Adopting ticket reported by inbox");
                Some(remote.clone())
            }
            _ => None,
        };

        let remote: Vec<Message> = response
            .messages
            .iter()
            .map(RemoteMessage::to_message)
            .collect();
        let transcript = current.merge(&remote, &self.hidden);

        let operator_count = count_operator_messages(&remote);
        let new_operator_messages = match self.operator_baseline {
            Some(previous) => operator_count.saturating_sub(previous),
            None => 0,
        };
        self.operator_baseline = Some(operator_count);

        let unhandled_markers = transcript
            .messages()
            .iter()
            .filter(|m| m.is_resolution_marker && !self.handled_markers.contains(&m.id))
            .map(|m| m.id.clone())
            .collect();

        SyncOutcome {
            transcript,
            adopted_ticket,
            new_operator_messages,
            unhandled_markers,
        }
    }

    /// Record markers as acted upon so they never trigger again.
    pub fn mark_handled(&mut self, ids: impl IntoIterator<Item = MessageId>) {
        self.handled_markers.extend(ids);
    }

    /// Keep `ids` out of every future transcript.
    pub fn hide(&mut self, ids: impl IntoIterator<Item = MessageId>) {
        self.hidden.extend(ids);
    }

    /// Forget per-conversation counters. Handled markers are kept so a stale
    /// resolved ticket cannot resolve the fresh conversation.
    pub fn reset(&mut self) {
        self.operator_baseline = None;
        self.hidden.clear();
    }
}

fn count_operator_messages(messages: &[Message]) -> usize {
    let mut seen = HashSet::new();
    let mut count = 0;
    for m in messages {
        if m.sender == Sender::Operator && seen.insert(&m.id) {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use salonline_shared::protocol::SenderType;

    fn msg(id: &str, sender_type: SenderType, text: &str) -> RemoteMessage {
        RemoteMessage {
            id: id.into(),
            sender_type,
            message: text.into(),
            created_at: Utc::now(),
        }
    }

    fn response(ticket: &str, messages: Vec<RemoteMessage>) -> MessagesResponse {
        MessagesResponse {
            ticket_id: Some(TicketId::from(ticket)),
            messages,
        }
    }

    #[test]
    fn first_load_is_silent() {
        let mut r = Reconciler::new();
        let resp = response(
            "T1",
            vec![
                msg("m1", SenderType::Admin, "a"),
                msg("m2", SenderType::Admin, "b"),
                msg("m3", SenderType::Admin, "c"),
            ],
        );
        let out = r.apply(&Transcript::new(), Some(&TicketId::from("T1")), &resp);
        assert_eq!(out.new_operator_messages, 0);
        assert_eq!(r.operator_baseline, Some(3));
    }

    #[test]
    fn counts_new_operator_messages() {
        let mut r = Reconciler::new();
        let t1 = TicketId::from("T1");
        let mut messages = vec![msg("m1", SenderType::Company, "q")];
        let out = r.apply(&Transcript::new(), Some(&t1), &response("T1", messages.clone()));
        assert_eq!(out.new_operator_messages, 0);

        messages.push(msg("m2", SenderType::Admin, "a1"));
        messages.push(msg("m3", SenderType::Admin, "a2"));
        let out = r.apply(&out.transcript, Some(&t1), &response("T1", messages.clone()));
        assert_eq!(out.new_operator_messages, 2);

        let out = r.apply(&out.transcript, Some(&t1), &response("T1", messages));
        assert_eq!(out.new_operator_messages, 0);
    }

    #[test]
    fn adopts_new_ticket() {
        let mut r = Reconciler::new();
        let out = r.apply(&Transcript::new(), None, &response("T7", vec![]));
        assert_eq!(out.adopted_ticket, Some(TicketId::from("T7")));

        let out = r.apply(&out.transcript, Some(&TicketId::from("T7")), &response("T7", vec![]));
        assert_eq!(out.adopted_ticket, None);
    }

    #[test]
    fn reassignment_restarts_counting() {
        let mut r = Reconciler::new();
        r.apply(&Transcript::new(), Some(&TicketId::from("T1")), &response("T1", vec![]));
        let out = r.apply(
            &Transcript::new(),
            Some(&TicketId::from("T1")),
            &response("T2", vec![msg("m5", SenderType::Admin, "old history")]),
        );
        assert_eq!(out.adopted_ticket, Some(TicketId::from("T2")));
        assert_eq!(out.new_operator_messages, 0);
    }

    #[test]
    fn markers_are_reported_until_handled() {
        let mut r = Reconciler::new();
        let t1 = TicketId::from("T1");
        let resp = response("T1", vec![msg("m1", SenderType::Admin, "[[resolved]] bye")]);

        let out = r.apply(&Transcript::new(), Some(&t1), &resp);
        assert_eq!(out.unhandled_markers, vec![MessageId::from("m1")]);
        assert_eq!(out.transcript.messages()[0].text, "bye");

        r.mark_handled(out.unhandled_markers.clone());
        let out = r.apply(&out.transcript, Some(&t1), &resp);
        assert!(out.unhandled_markers.is_empty());
    }

    #[test]
    fn hidden_marker_does_not_return() {
        let mut r = Reconciler::new();
        let t1 = TicketId::from("T1");
        let resp = response("T1", vec![msg("m1", SenderType::Admin, "[[resolved]]")]);
        r.mark_handled([MessageId::from("m1")]);
        r.hide([MessageId::from("m1")]);
        let out = r.apply(&Transcript::new(), Some(&t1), &resp);
        assert!(out.transcript.is_empty());
        assert!(out.unhandled_markers.is_empty());
    }

    #[tokio::test]
    async fn fetch_goes_through_adapter() {
        let inbox = crate::inbox::InMemoryInbox::new();
        let ticket = inbox.operator_reply("a@b.com", "hello");
        let resp = fetch(&inbox, "a@b.com", None).await.unwrap();
        assert_eq!(resp.ticket_id, Some(ticket));
        assert_eq!(inbox.get_calls(), 1);
    }
}
