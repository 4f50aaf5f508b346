//! In-process inbox for demos and tests.
//!
//! Implements the server-side lookup policy: an email has at most one
//! non-resolved ticket; lookups without a ticket id only see that open
//! ticket; resolved tickets stay readable by id.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use salonline_shared::codec;
use salonline_shared::protocol::{
    MessagesResponse, RemoteMessage, SendMessageRequest, SendMessageResponse, SenderType,
};
use salonline_shared::TicketId;

use super::InboxAdapter;
use crate::error::AdapterError;

#[derive(Debug, Clone)]
struct Ticket {
    id: TicketId,
    email: String,
    source: Option<String>,
    resolved: bool,
    messages: Vec<RemoteMessage>,
}

#[derive(Debug, Default)]
struct InboxState {
    tickets: Vec<Ticket>,
    next_ticket: u64,
    next_message: u64,
    failures_pending: u32,
    latency: Option<Duration>,
}

impl InboxState {
    fn open_ticket_mut(&mut self, email: &str) -> Option<&mut Ticket> {
        self.tickets
            .iter_mut()
            .find(|t| !t.resolved && t.email.eq_ignore_ascii_case(email))
    }

    fn open_or_create(&mut self, email: &str, source: Option<&str>) -> &mut Ticket {
        if let Some(idx) = self
            .tickets
            .iter()
            .position(|t| !t.resolved && t.email.eq_ignore_ascii_case(email))
        {
            return &mut self.tickets[idx];
        }

        self.next_ticket += 1;
        let id = TicketId(format!("T{}", self.next_ticket));
        info!(ticket = %id, email, "Opening support ticket");
        self.tickets.push(Ticket {
            id,
            email: email.to_string(),
            source: source.map(str::to_string),
            resolved: false,
            messages: Vec::new(),
        });
        let last = self.tickets.len() - 1;
        &mut self.tickets[last]
    }

    /// The ticket a visitor message joins: the tracked one, reopened if it
    /// was resolved and the email has no other open ticket; otherwise the
    /// email's open ticket.
    fn ticket_for_send(
        &mut self,
        email: &str,
        tracked: Option<&TicketId>,
        source: &str,
    ) -> &mut Ticket {
        let has_open = self
            .tickets
            .iter()
            .any(|t| !t.resolved && t.email.eq_ignore_ascii_case(email));
        let reuse = tracked
            .and_then(|id| {
                self.tickets
                    .iter()
                    .position(|t| &t.id == id && t.email.eq_ignore_ascii_case(email))
            })
            .filter(|&idx| !self.tickets[idx].resolved || !has_open);

        if let Some(idx) = reuse {
            let ticket = &mut self.tickets[idx];
            if ticket.resolved {
                info!(ticket = %ticket.id, "Reopening resolved ticket");
                ticket.resolved = false;
            }
            return ticket;
        }
        self.open_or_create(email, Some(source))
    }

    fn next_message_id(&mut self) -> String {
        self.next_message += 1;
        format!("m{}", self.next_message)
    }

    fn take_failure(&mut self) -> Option<AdapterError> {
        if self.failures_pending == 0 {
            return None;
        }
        self.failures_pending -= 1;
        Some(AdapterError::Unavailable("injected failure".into()))
    }
}

/// Operator inbox held in memory.
#[derive(Debug, Default)]
pub struct InMemoryInbox {
    state: Mutex<InboxState>,
    get_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut InboxState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Make the next `n` adapter calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.with_state(|s| s.failures_pending = n);
    }

    /// Delay every `get_messages` call, simulating a slow network.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.with_state(|s| s.latency = latency);
    }

    /// Append an operator reply to the email's open ticket, opening one if
    /// the visitor has none.
    pub fn operator_reply(&self, email: &str, text: &str) -> TicketId {
        self.with_state(|s| {
            let id = s.next_message_id();
            let ticket = s.open_or_create(email, None);
            ticket.messages.push(RemoteMessage {
                id,
                sender_type: SenderType::Admin,
                message: text.to_string(),
                created_at: Utc::now(),
            });
            debug!(ticket = %ticket.id, "Operator replied");
            ticket.id.clone()
        })
    }

    /// Tag the ticket resolved by appending a resolution marker message.
    /// Returns `false` if the ticket does not exist or is already resolved.
    pub fn resolve(&self, ticket_id: &TicketId, note: &str) -> bool {
        self.with_state(|s| {
            let id = s.next_message_id();
            let Some(ticket) = s
                .tickets
                .iter_mut()
                .find(|t| &t.id == ticket_id && !t.resolved)
            else {
                return false;
            };
            ticket.messages.push(RemoteMessage {
                id,
                sender_type: SenderType::Admin,
                message: codec::resolution(note),
                created_at: Utc::now(),
            });
            ticket.resolved = true;
            info!(ticket = %ticket_id, "Ticket resolved");
            true
        })
    }

    /// The email's open ticket, if any.
    pub fn open_ticket(&self, email: &str) -> Option<TicketId> {
        self.with_state(|s| s.open_ticket_mut(email).map(|t| t.id.clone()))
    }

    /// Raw messages of a ticket, as an operator would see them.
    pub fn ticket_messages(&self, ticket_id: &TicketId) -> Vec<RemoteMessage> {
        self.with_state(|s| {
            s.tickets
                .iter()
                .find(|t| &t.id == ticket_id)
                .map(|t| t.messages.clone())
                .unwrap_or_default()
        })
    }

    /// Source recorded on the ticket when it was opened by the widget.
    pub fn ticket_source(&self, ticket_id: &TicketId) -> Option<String> {
        self.with_state(|s| {
            s.tickets
                .iter()
                .find(|t| &t.id == ticket_id)
                .and_then(|t| t.source.clone())
        })
    }

    /// Number of `get_messages` calls served so far.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `get_messages` calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl InboxAdapter for InMemoryInbox {
    async fn get_messages(
        &self,
        email: &str,
        ticket_id: Option<&TicketId>,
    ) -> Result<MessagesResponse, AdapterError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let latency = self.with_state(|s| s.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.with_state(|s| {
            if let Some(err) = s.take_failure() {
                return Err(err);
            }

            let by_id = ticket_id.and_then(|id| {
                s.tickets
                    .iter()
                    .find(|t| &t.id == id && t.email.eq_ignore_ascii_case(email))
            });
            let ticket = match by_id {
                Some(t) => Some(t),
                None => s
                    .tickets
                    .iter()
                    .find(|t| !t.resolved && t.email.eq_ignore_ascii_case(email)),
            };

            Ok(match ticket {
                Some(t) => MessagesResponse {
                    ticket_id: Some(t.id.clone()),
                    messages: t.messages.clone(),
                },
                None => MessagesResponse::default(),
            })
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, AdapterError> {
        self.with_state(|s| {
            if let Some(err) = s.take_failure() {
                return Err(err);
            }
            let id = s.next_message_id();
            let ticket =
                s.ticket_for_send(&request.email, request.ticket_id.as_ref(), &request.source);
            ticket.messages.push(RemoteMessage {
                id,
                sender_type: SenderType::Company,
                message: request.message.clone(),
                created_at: Utc::now(),
            });
            Ok(SendMessageResponse {
                ticket_id: ticket.id.clone(),
            })
        })
    }
}
