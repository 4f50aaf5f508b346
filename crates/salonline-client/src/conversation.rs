//! The widget's conversation state, independent of timers and I/O.
//!
//! Every operation returns the [`WidgetEvent`]s it produced; the async
//! driver in [`crate::widget`] forwards them and arms or cancels timers
//! accordingly. Keeping this layer synchronous makes every state transition
//! testable without a runtime.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use salonline_shared::codec;
use salonline_shared::protocol::{MessagesResponse, SendMessageRequest, SendMessageResponse};
use salonline_shared::{Attachment, Message, MessageId, TicketId, Visitor};
use salonline_store::IdentityStore;

use crate::config::WidgetConfig;
use crate::error::{AdapterError, ClientError};
use crate::events::WidgetEvent;
use crate::notify::{Chime, Notification, NotificationController};
use crate::reconcile::Reconciler;
use crate::resolution::{ResolutionMachine, ResolutionState, Transition};
use crate::transcript::Transcript;

/// Everything a reconcile needs to run and later prove it is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub generation: u64,
    pub email: String,
    pub ticket_id: Option<TicketId>,
}

/// An outgoing message waiting for the inbox to accept it.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub generation: u64,
    pub local_id: MessageId,
    pub request: SendMessageRequest,
}

/// Render-ready view of the widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetSnapshot {
    pub visitor: Option<Visitor>,
    pub messages: Vec<Message>,
    pub resolution: ResolutionState,
    pub unread: u32,
    pub view_open: bool,
}

pub struct Conversation {
    store: Arc<dyn IdentityStore>,
    visitor: Option<Visitor>,
    transcript: Transcript,
    reconciler: Reconciler,
    resolution: ResolutionMachine,
    notifications: NotificationController,
    /// Bumped whenever the identity or ticket is reset, so results of
    /// requests issued before that moment can be recognised and dropped.
    generation: u64,
    source: String,
    company_id: Option<String>,
}

fn fresh_greeting(name: &str) -> String {
    format!("Hi {name}! How can we help you today?")
}

fn resume_greeting(name: &str) -> String {
    format!("Welcome back, {name}!")
}

impl Conversation {
    /// Mount: read the stored identity and seed the transcript.
    pub fn mount(store: Arc<dyn IdentityStore>, chime: Arc<dyn Chime>, config: &WidgetConfig) -> Self {
        let visitor = store.load();
        let transcript = match &visitor {
            Some(v) if v.has_ticket() => {
                info!(ticket = ?v.ticket_id, "Resuming stored conversation");
                Transcript::welcome(resume_greeting(&v.name))
            }
            Some(v) => Transcript::welcome(fresh_greeting(&v.name)),
            None => Transcript::new(),
        };

        Self {
            store,
            visitor,
            transcript,
            reconciler: Reconciler::new(),
            resolution: ResolutionMachine::new(config.countdown_secs),
            notifications: NotificationController::new(chime),
            generation: 0,
            source: config.source.clone(),
            company_id: config.company_id.clone(),
        }
    }

    pub fn visitor(&self) -> Option<&Visitor> {
        self.visitor.as_ref()
    }

    pub fn ticket_id(&self) -> Option<&TicketId> {
        self.visitor.as_ref().and_then(|v| v.ticket_id.as_ref())
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn resolution(&self) -> ResolutionState {
        self.resolution.state()
    }

    pub fn unread(&self) -> u32 {
        self.notifications.unread()
    }

    pub fn is_view_open(&self) -> bool {
        self.notifications.is_view_open()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether polling makes sense: only once an email is known.
    pub fn can_poll(&self) -> bool {
        self.visitor.is_some()
    }

    /// Whether the widget should skip the intake form when opened.
    pub fn resumes_directly(&self) -> bool {
        self.ticket_id().is_some()
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        WidgetSnapshot {
            visitor: self.visitor.clone(),
            messages: self.transcript.messages().to_vec(),
            resolution: self.resolution.state(),
            unread: self.notifications.unread(),
            view_open: self.notifications.is_view_open(),
        }
    }

    fn persist(&self) {
        let Some(visitor) = &self.visitor else {
            return;
        };
        if let Err(e) = self.store.save(visitor) {
            warn!(error = %e, "Failed to persist visitor identity");
        }
    }

    fn adopt_ticket(&mut self, ticket_id: TicketId, events: &mut Vec<WidgetEvent>) {
        let Some(visitor) = self.visitor.as_mut() else {
            return;
        };
        if visitor.ticket_id.as_ref() == Some(&ticket_id) {
            return;
        }
        visitor.ticket_id = Some(ticket_id.clone());
        self.persist();
        events.push(WidgetEvent::TicketAssigned { ticket_id });
    }

    fn transcript_updated(&self) -> WidgetEvent {
        WidgetEvent::TranscriptUpdated {
            len: self.transcript.len(),
        }
    }

    pub fn open_view(&mut self) -> Vec<WidgetEvent> {
        let cleared = self.notifications.on_view_opened();
        if cleared > 0 {
            vec![WidgetEvent::UnreadCleared]
        } else {
            Vec::new()
        }
    }

    pub fn close_view(&mut self) {
        self.notifications.on_view_closed();
    }

    /// Intake form submitted. Stores the identity; a different email starts
    /// a different conversation.
    pub fn submit_intake(
        &mut self,
        name: &str,
        email: &str,
        phone: &str,
    ) -> Result<Vec<WidgetEvent>, ClientError> {
        let mut visitor = Visitor::new(name, email, phone)?;
        let mut events = Vec::new();

        match &self.visitor {
            Some(current) if current.email.eq_ignore_ascii_case(&visitor.email) => {
                visitor.ticket_id = current.ticket_id.clone();
            }
            _ => {
                self.generation += 1;
                self.reconciler.reset();
                self.resolution.clear();
                self.notifications.clear();
                self.transcript = Transcript::new();
                events.push(self.transcript_updated());
            }
        }

        info!(email = %visitor.email, "Visitor identity submitted");
        self.visitor = Some(visitor);
        self.persist();
        Ok(events)
    }

    /// Queue a visitor message: show it optimistically and build the request.
    pub fn begin_send(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<(PendingSend, Vec<WidgetEvent>), ClientError> {
        let visitor = self.visitor.as_ref().ok_or(ClientError::NoIdentity)?;
        if self.resolution.is_resolved() {
            return Err(ClientError::ConversationResolved);
        }

        let raw = codec::encode(text, attachment.as_ref());
        let request = SendMessageRequest::new(
            visitor,
            raw.clone(),
            &self.source,
            self.company_id.as_deref(),
        )?;

        // Store exactly what the server will echo back, so acknowledgement
        // matches on decoded content.
        let decoded = codec::decode(&raw);
        let message = Message::outgoing(decoded.text, decoded.attachment);
        let local_id = message.id.clone();
        self.transcript.push_local(message);

        Ok((
            PendingSend {
                generation: self.generation,
                local_id,
                request,
            },
            vec![self.transcript_updated()],
        ))
    }

    /// The inbox answered a send.
    pub fn finish_send(
        &mut self,
        pending: &PendingSend,
        result: Result<SendMessageResponse, AdapterError>,
    ) -> (Result<(), ClientError>, Vec<WidgetEvent>) {
        let mut events = Vec::new();
        match result {
            Ok(resp) => {
                if pending.generation == self.generation {
                    self.adopt_ticket(resp.ticket_id, &mut events);
                } else {
                    debug!("Send completed after reset, not adopting its ticket");
                }
                (Ok(()), events)
            }
            Err(e) => {
                warn!(error = %e, "Sending message failed");
                if self.transcript.remove(&pending.local_id) {
                    events.push(self.transcript_updated());
                }
                let notice = ClientError::from(e);
                events.push(WidgetEvent::Notice {
                    message: notice.to_string(),
                });
                (Err(notice), events)
            }
        }
    }

    /// Arguments for the next reconcile, if polling is possible.
    pub fn sync_target(&self) -> Option<SyncTarget> {
        let visitor = self.visitor.as_ref()?;
        Some(SyncTarget {
            generation: self.generation,
            email: visitor.email.clone(),
            ticket_id: visitor.ticket_id.clone(),
        })
    }

    /// Fold a reconcile result into the conversation.
    pub fn apply_sync(&mut self, target: &SyncTarget, response: &MessagesResponse) -> Vec<WidgetEvent> {
        let current = self.sync_target();
        if current.as_ref().map(|c| (c.generation, &c.email))
            != Some((target.generation, &target.email))
        {
            debug!("Discarding reconcile result for a previous identity");
            return Vec::new();
        }

        let mut events = Vec::new();
        let tracked = self.ticket_id().cloned();
        let outcome = self
            .reconciler
            .apply(&self.transcript, tracked.as_ref(), response);

        if let Some(ticket_id) = outcome.adopted_ticket {
            self.adopt_ticket(ticket_id, &mut events);
        }

        if outcome.transcript != self.transcript {
            self.transcript = outcome.transcript;
            events.push(self.transcript_updated());
        }

        if let Notification::Notified { unread } = self
            .notifications
            .on_new_operator_messages(outcome.new_operator_messages)
        {
            events.push(WidgetEvent::NewOperatorMessages {
                count: outcome.new_operator_messages,
                unread,
            });
        }

        if !outcome.unhandled_markers.is_empty() {
            self.reconciler.mark_handled(outcome.unhandled_markers);
            if let Transition::Resolved { remaining } = self.resolution.observe_marker() {
                info!(ticket = ?self.ticket_id(), "Conversation resolved by operator");
                events.push(WidgetEvent::Resolved { remaining });
            }
        }

        events
    }

    /// One countdown second elapsed.
    pub fn tick_countdown(&mut self) -> Vec<WidgetEvent> {
        match self.resolution.tick() {
            Transition::Ticked { remaining } => vec![WidgetEvent::CountdownTick { remaining }],
            Transition::Reset => self.reset(),
            _ => Vec::new(),
        }
    }

    /// Keep the resolved ticket and carry on talking.
    pub fn continue_subject(&mut self) -> Vec<WidgetEvent> {
        if self.resolution.continue_subject() != Transition::Continued {
            return Vec::new();
        }
        let removed = self.transcript.remove_resolution_markers();
        self.reconciler.hide(removed);
        info!(ticket = ?self.ticket_id(), "Continuing resolved conversation");
        vec![WidgetEvent::Continued, self.transcript_updated()]
    }

    /// Drop the current ticket and start over.
    pub fn new_request(&mut self) -> Vec<WidgetEvent> {
        // Resetting an already fresh conversation is a no-op.
        if !self.resolution.is_resolved() && self.ticket_id().is_none() {
            return Vec::new();
        }
        self.resolution.new_request();
        self.reset()
    }

    fn reset(&mut self) -> Vec<WidgetEvent> {
        self.resolution.clear();
        self.reconciler.reset();
        self.generation += 1;

        let name = match self.visitor.as_mut() {
            Some(visitor) => {
                visitor.ticket_id = None;
                visitor.name.clone()
            }
            None => String::new(),
        };
        self.persist();
        self.transcript = Transcript::welcome(fresh_greeting(&name));

        info!(generation = self.generation, "Conversation reset");
        vec![WidgetEvent::ConversationReset, self.transcript_updated()]
    }

    /// Forget the visitor entirely.
    pub fn forget(&mut self) -> Vec<WidgetEvent> {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored identity");
        }
        self.visitor = None;
        self.generation += 1;
        self.reconciler.reset();
        self.resolution.clear();
        self.notifications.clear();
        self.transcript = Transcript::new();
        vec![WidgetEvent::IdentityCleared, self.transcript_updated()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use salonline_shared::protocol::{RemoteMessage, SenderType};
    use salonline_shared::Sender;
    use salonline_store::MemoryIdentityStore;

    use crate::notify::Silent;

    fn config() -> WidgetConfig {
        WidgetConfig::default()
    }

    fn mount_with(visitor: Option<Visitor>) -> (Conversation, Arc<MemoryIdentityStore>) {
        let store = Arc::new(match &visitor {
            Some(v) => MemoryIdentityStore::with_visitor(v),
            None => MemoryIdentityStore::new(),
        });
        let conv = Conversation::mount(store.clone(), Arc::new(Silent), &config());
        (conv, store)
    }

    fn visitor(ticket: Option<&str>) -> Visitor {
        Visitor {
            name: "Ana".into(),
            email: "a@b.com".into(),
            phone: String::new(),
            ticket_id: ticket.map(TicketId::from),
        }
    }

    fn remote(id: &str, sender_type: SenderType, text: &str) -> RemoteMessage {
        RemoteMessage {
            id: id.into(),
            sender_type,
            message: text.into(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn resolve_conversation(conv: &mut Conversation) {
        let target = conv.sync_target().unwrap();
        let events = conv.apply_sync(
            &target,
            &MessagesResponse {
                ticket_id: Some(TicketId::from("T1")),
                messages: vec![
                    remote("m1", SenderType::Company, "hi"),
                    remote("m2", SenderType::Admin, "[[resolved]] All sorted"),
                ],
            },
        );
        assert!(events.contains(&WidgetEvent::Resolved { remaining: 15 }));
    }

    #[test]
    fn mount_without_identity_shows_intake() {
        let (conv, _) = mount_with(None);
        assert!(conv.visitor().is_none());
        assert!(conv.transcript().is_empty());
        assert!(!conv.can_poll());
        assert!(conv.sync_target().is_none());
    }

    #[test]
    fn mount_with_ticket_resumes() {
        let (conv, _) = mount_with(Some(visitor(Some("T1"))));
        assert!(conv.resumes_directly());
        assert_eq!(conv.transcript().len(), 1);
        assert_eq!(conv.transcript().messages()[0].text, "Welcome back, Ana!");
        assert_eq!(conv.transcript().messages()[0].sender, Sender::System);
    }

    #[test]
    fn corrupt_identity_mounts_as_fresh() {
        let store = Arc::new(MemoryIdentityStore::new());
        store.set_raw("{{{");
        let conv = Conversation::mount(store, Arc::new(Silent), &config());
        assert!(conv.visitor().is_none());
    }

    #[test]
    fn send_then_resolution_scenario() {
        let (mut conv, store) = mount_with(None);
        conv.submit_intake("Ana", "a@b.com", "").unwrap();
        assert!(conv.transcript().is_empty());

        let (pending, _) = conv.begin_send("my booking is wrong", None).unwrap();
        let (result, events) = conv.finish_send(
            &pending,
            Ok(SendMessageResponse {
                ticket_id: TicketId::from("T1"),
            }),
        );
        assert!(result.is_ok());
        assert!(events.contains(&WidgetEvent::TicketAssigned {
            ticket_id: TicketId::from("T1")
        }));
        assert_eq!(store.load().unwrap().ticket_id, Some(TicketId::from("T1")));

        let target = conv.sync_target().unwrap();
        assert_eq!(target.ticket_id, Some(TicketId::from("T1")));
        let events = conv.apply_sync(
            &target,
            &MessagesResponse {
                ticket_id: Some(TicketId::from("T1")),
                messages: vec![remote("m1", SenderType::Admin, "[[resolved]] Fixed it")],
            },
        );

        let messages = conv.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::Visitor);
        assert!(messages[1].is_resolution_marker);
        assert_eq!(messages[1].text, "Fixed it");
        assert_eq!(conv.resolution(), ResolutionState::Resolved { remaining: 15 });
        assert!(events.contains(&WidgetEvent::Resolved { remaining: 15 }));
    }

    #[test]
    fn countdown_expiry_resets() {
        let (mut conv, store) = mount_with(Some(visitor(Some("T1"))));
        resolve_conversation(&mut conv);

        for remaining in (1..15).rev() {
            assert_eq!(
                conv.tick_countdown(),
                vec![WidgetEvent::CountdownTick { remaining }]
            );
        }
        let events = conv.tick_countdown();
        assert!(events.contains(&WidgetEvent::ConversationReset));

        assert_eq!(conv.resolution(), ResolutionState::Active);
        assert!(conv.ticket_id().is_none());
        assert_eq!(conv.transcript().len(), 1);
        assert!(conv.transcript().messages()[0].id.is_welcome());

        let stored = store.load().unwrap();
        assert_eq!(stored.ticket_id, None);
        assert_eq!(stored.email, "a@b.com");
    }

    #[test]
    fn continue_keeps_ticket_and_hides_marker() {
        let (mut conv, _) = mount_with(Some(visitor(Some("T1"))));
        resolve_conversation(&mut conv);
        conv.tick_countdown();

        let events = conv.continue_subject();
        assert!(events.contains(&WidgetEvent::Continued));
        assert_eq!(conv.resolution(), ResolutionState::Active);
        assert_eq!(conv.ticket_id(), Some(&TicketId::from("T1")));
        assert!(conv
            .transcript()
            .messages()
            .iter()
            .all(|m| !m.is_resolution_marker));

        // The same marker comes back on the next poll: no re-trigger.
        let target = conv.sync_target().unwrap();
        let events = conv.apply_sync(
            &target,
            &MessagesResponse {
                ticket_id: Some(TicketId::from("T1")),
                messages: vec![
                    remote("m1", SenderType::Company, "hi"),
                    remote("m2", SenderType::Admin, "[[resolved]] All sorted"),
                ],
            },
        );
        assert!(events.is_empty());
        assert_eq!(conv.resolution(), ResolutionState::Active);
    }

    #[test]
    fn fresh_marker_after_continue_resolves_again() {
        let (mut conv, _) = mount_with(Some(visitor(Some("T1"))));
        resolve_conversation(&mut conv);
        conv.continue_subject();

        let target = conv.sync_target().unwrap();
        let events = conv.apply_sync(
            &target,
            &MessagesResponse {
                ticket_id: Some(TicketId::from("T1")),
                messages: vec![
                    remote("m1", SenderType::Company, "hi"),
                    remote("m2", SenderType::Admin, "[[resolved]] All sorted"),
                    remote("m3", SenderType::Company, "one more thing"),
                    remote("m4", SenderType::Admin, "[[resolved]] Done now"),
                ],
            },
        );
        assert!(events.contains(&WidgetEvent::Resolved { remaining: 15 }));
    }

    #[test]
    fn sending_while_resolved_is_rejected() {
        let (mut conv, _) = mount_with(Some(visitor(Some("T1"))));
        resolve_conversation(&mut conv);
        assert!(matches!(
            conv.begin_send("hello?", None),
            Err(ClientError::ConversationResolved)
        ));
    }

    #[test]
    fn new_request_is_idempotent() {
        let (mut conv, _) = mount_with(Some(visitor(Some("T1"))));
        resolve_conversation(&mut conv);

        assert!(conv.new_request().contains(&WidgetEvent::ConversationReset));
        let generation = conv.generation();
        assert!(conv.new_request().is_empty());
        assert_eq!(conv.generation(), generation);
    }

    #[test]
    fn stale_sync_is_discarded() {
        let (mut conv, _) = mount_with(Some(visitor(Some("T1"))));
        let stale = conv.sync_target().unwrap();
        conv.new_request();

        let events = conv.apply_sync(
            &stale,
            &MessagesResponse {
                ticket_id: Some(TicketId::from("T1")),
                messages: vec![remote("m1", SenderType::Admin, "old")],
            },
        );
        assert!(events.is_empty());
        assert!(conv.ticket_id().is_none());
        assert_eq!(conv.transcript().len(), 1);
    }

    #[test]
    fn failed_send_removes_optimistic_message() {
        let (mut conv, _) = mount_with(Some(visitor(None)));
        let before = conv.transcript().len();
        let (pending, _) = conv.begin_send("hello", None).unwrap();
        assert_eq!(conv.transcript().len(), before + 1);

        let (result, events) =
            conv.finish_send(&pending, Err(AdapterError::Unavailable("down".into())));
        assert!(matches!(result, Err(ClientError::Adapter(_))));
        assert_eq!(conv.transcript().len(), before);
        assert!(events
            .iter()
            .any(|e| matches!(e, WidgetEvent::Notice { .. })));
    }

    #[test]
    fn unread_counts_only_while_closed() {
        let (mut conv, _) = mount_with(Some(visitor(Some("T1"))));
        let target = conv.sync_target().unwrap();
        let mut messages = vec![remote("m1", SenderType::Admin, "history")];
        let first = MessagesResponse {
            ticket_id: Some(TicketId::from("T1")),
            messages: messages.clone(),
        };
        assert!(conv
            .apply_sync(&target, &first)
            .iter()
            .all(|e| !matches!(e, WidgetEvent::NewOperatorMessages { .. })));

        messages.push(remote("m2", SenderType::Admin, "new"));
        let second = MessagesResponse {
            ticket_id: Some(TicketId::from("T1")),
            messages: messages.clone(),
        };
        let events = conv.apply_sync(&target, &second);
        assert!(events.contains(&WidgetEvent::NewOperatorMessages { count: 1, unread: 1 }));

        assert_eq!(conv.open_view(), vec![WidgetEvent::UnreadCleared]);
        messages.push(remote("m3", SenderType::Admin, "while open"));
        let third = MessagesResponse {
            ticket_id: Some(TicketId::from("T1")),
            messages,
        };
        conv.apply_sync(&target, &third);
        assert_eq!(conv.unread(), 0);
    }

    #[test]
    fn new_email_starts_new_conversation() {
        let (mut conv, store) = mount_with(Some(visitor(Some("T1"))));
        let generation = conv.generation();
        conv.submit_intake("Bea", "bea@c.com", "555").unwrap();
        assert!(conv.ticket_id().is_none());
        assert!(conv.generation() > generation);
        assert_eq!(store.load().unwrap().email, "bea@c.com");

        conv.submit_intake("Bea B.", "BEA@c.com", "").unwrap();
        assert_eq!(conv.visitor().unwrap().name, "Bea B.");
    }

    #[test]
    fn forget_clears_store() {
        let (mut conv, store) = mount_with(Some(visitor(Some("T1"))));
        let events = conv.forget();
        assert!(events.contains(&WidgetEvent::IdentityCleared));
        assert!(store.load().is_none());
        assert!(!conv.can_poll());
    }
}
