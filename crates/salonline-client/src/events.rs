use serde::Serialize;
use tokio::sync::mpsc;

use salonline_shared::TicketId;

/// Notifications the widget pushes to whatever renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetEvent {
    /// The visible transcript changed; re-read the snapshot.
    TranscriptUpdated { len: usize },
    /// The inbox assigned (or reassigned) the active ticket.
    TicketAssigned { ticket_id: TicketId },
    /// Operator replies arrived while the view was closed.
    NewOperatorMessages { count: usize, unread: u32 },
    UnreadCleared,
    /// The operator resolved the ticket; a countdown started.
    Resolved { remaining: u32 },
    CountdownTick { remaining: u32 },
    /// The conversation was reset into a fresh one.
    ConversationReset,
    /// The visitor chose to continue the resolved subject.
    Continued,
    /// The stored identity was forgotten.
    IdentityCleared,
    /// A one-shot error notice for an explicit user action.
    Notice { message: String },
}

pub fn emit_event(tx: &mpsc::Sender<WidgetEvent>, event: WidgetEvent) {
    if let Err(e) = tx.try_send(event) {
        tracing::warn!(error = %e, "Failed to emit widget event");
    }
}
