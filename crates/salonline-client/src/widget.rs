//! The widget driver.
//!
//! One tokio task owns the [`Conversation`] and every timer. The host talks
//! to it through a cloneable [`WidgetHandle`] and listens on a
//! [`WidgetEvent`] receiver. Inbox calls run as futures polled by the same
//! task, so the conversation is only ever mutated sequentially.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use salonline_shared::constants::COUNTDOWN_TICK;
use salonline_shared::protocol::{MessagesResponse, SendMessageResponse};
use salonline_shared::{Attachment, ProtocolError};
use salonline_store::IdentityStore;

use crate::config::WidgetConfig;
use crate::conversation::{Conversation, PendingSend, SyncTarget, WidgetSnapshot};
use crate::error::{AdapterError, ClientError};
use crate::events::{emit_event, WidgetEvent};
use crate::inbox::InboxAdapter;
use crate::notify::Chime;
use crate::reconcile;
use crate::scheduler::{Cadence, Timers};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<T>;

/// Commands sent into the widget task.
#[derive(Debug)]
pub enum WidgetCommand {
    OpenView(Reply<()>),
    CloseView(Reply<()>),
    SubmitIntake {
        name: String,
        email: String,
        phone: String,
        message: String,
        reply: Reply<Result<(), ClientError>>,
    },
    SendMessage {
        text: String,
        attachment: Option<Attachment>,
        reply: Reply<Result<(), ClientError>>,
    },
    ContinueSubject(Reply<()>),
    NewRequest(Reply<()>),
    Forget(Reply<()>),
    Snapshot(Reply<WidgetSnapshot>),
    /// Unmount: cancel all timers and stop the task.
    Shutdown(Reply<()>),
}

/// An inbox call that finished.
enum Completion {
    Sync {
        target: SyncTarget,
        result: Result<MessagesResponse, AdapterError>,
    },
    Send {
        pending: PendingSend,
        result: Result<SendMessageResponse, AdapterError>,
        reply: Reply<Result<(), ClientError>>,
    },
}

/// Cloneable handle to a running widget.
#[derive(Debug, Clone)]
pub struct WidgetHandle {
    tx: mpsc::Sender<WidgetCommand>,
}

impl WidgetHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> WidgetCommand,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    pub async fn open_view(&self) -> Result<(), ClientError> {
        self.request(WidgetCommand::OpenView).await
    }

    pub async fn close_view(&self) -> Result<(), ClientError> {
        self.request(WidgetCommand::CloseView).await
    }

    /// Submit the intake form together with the visitor's first message.
    pub async fn submit_intake(
        &self,
        name: &str,
        email: &str,
        phone: &str,
        message: &str,
    ) -> Result<(), ClientError> {
        self.request(|reply| WidgetCommand::SubmitIntake {
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            message: message.to_string(),
            reply,
        })
        .await?
    }

    /// Send a message; resolves once the inbox accepted or rejected it.
    pub async fn send_message(
        &self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), ClientError> {
        self.request(|reply| WidgetCommand::SendMessage {
            text: text.to_string(),
            attachment,
            reply,
        })
        .await?
    }

    pub async fn continue_subject(&self) -> Result<(), ClientError> {
        self.request(WidgetCommand::ContinueSubject).await
    }

    pub async fn new_request(&self) -> Result<(), ClientError> {
        self.request(WidgetCommand::NewRequest).await
    }

    pub async fn forget(&self) -> Result<(), ClientError> {
        self.request(WidgetCommand::Forget).await
    }

    pub async fn snapshot(&self) -> Result<WidgetSnapshot, ClientError> {
        self.request(WidgetCommand::Snapshot).await
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.request(WidgetCommand::Shutdown).await
    }
}

/// Mount a widget on the current runtime.
///
/// Reads the stored identity, then starts background polling if an email is
/// known. Must be called from within a tokio runtime.
pub fn spawn<A: InboxAdapter>(
    adapter: Arc<A>,
    store: Arc<dyn IdentityStore>,
    chime: Arc<dyn Chime>,
    config: &WidgetConfig,
) -> (WidgetHandle, mpsc::Receiver<WidgetEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let conversation = Conversation::mount(store, chime, config);
    let mut timers = Timers::new(
        config.foreground_interval,
        config.background_interval,
        COUNTDOWN_TICK,
    );
    timers.poll.restart(conversation.can_poll());

    let driver = Driver {
        adapter,
        conversation,
        timers,
        commands: cmd_rx,
        events: event_tx,
        in_flight: FuturesUnordered::new(),
    };
    tokio::spawn(driver.run());

    (WidgetHandle { tx: cmd_tx }, event_rx)
}

struct Driver<A: InboxAdapter> {
    adapter: Arc<A>,
    conversation: Conversation,
    timers: Timers,
    commands: mpsc::Receiver<WidgetCommand>,
    events: mpsc::Sender<WidgetEvent>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
}

impl<A: InboxAdapter> Driver<A> {
    async fn run(mut self) {
        info!(
            identity = self.conversation.visitor().is_some(),
            resumes = self.conversation.resumes_directly(),
            "Widget mounted"
        );

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        info!("Widget handle dropped, unmounting");
                        break;
                    };
                    if self.handle_command(cmd).is_break() {
                        break;
                    }
                }

                _ = self.timers.poll.fired() => {
                    self.start_sync();
                }

                _ = self.timers.countdown.tick() => {
                    let generation = self.conversation.generation();
                    let events = self.conversation.tick_countdown();
                    self.settle(events, generation);
                }

                Some(done) = self.in_flight.next() => {
                    self.handle_completion(done);
                }
            }
        }

        self.timers.teardown();
        info!("Widget driver terminated");
    }

    /// Forward events and bring timers in line with the conversation.
    fn settle(&mut self, events: Vec<WidgetEvent>, generation_before: u64) {
        for event in events {
            emit_event(&self.events, event);
        }

        let resolved = self.conversation.resolution().is_resolved();
        if resolved && !self.timers.countdown.is_running() {
            self.timers.countdown.start();
        } else if !resolved && self.timers.countdown.is_running() {
            self.timers.countdown.cancel();
        }

        if self.conversation.generation() != generation_before {
            self.timers.poll.restart(self.conversation.can_poll());
        }
    }

    fn handle_command(&mut self, cmd: WidgetCommand) -> ControlFlow<()> {
        let generation = self.conversation.generation();
        match cmd {
            WidgetCommand::OpenView(reply) => {
                let events = self.conversation.open_view();
                self.settle(events, generation);
                self.timers.poll.on_view_opened(self.conversation.can_poll());
                let _ = reply.send(());
            }
            WidgetCommand::CloseView(reply) => {
                self.conversation.close_view();
                self.timers.poll.on_view_closed(self.conversation.can_poll());
                let _ = reply.send(());
            }
            WidgetCommand::SubmitIntake {
                name,
                email,
                phone,
                message,
                reply,
            } => {
                if message.trim().is_empty() {
                    let _ = reply.send(Err(ProtocolError::EmptyMessage.into()));
                    return ControlFlow::Continue(());
                }
                match self.conversation.submit_intake(&name, &email, &phone) {
                    Ok(events) => {
                        self.settle(events, generation);
                        self.start_send(&message, None, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            WidgetCommand::SendMessage {
                text,
                attachment,
                reply,
            } => self.start_send(&text, attachment, reply),
            WidgetCommand::ContinueSubject(reply) => {
                let events = self.conversation.continue_subject();
                self.settle(events, generation);
                let _ = reply.send(());
            }
            WidgetCommand::NewRequest(reply) => {
                let events = self.conversation.new_request();
                self.settle(events, generation);
                let _ = reply.send(());
            }
            WidgetCommand::Forget(reply) => {
                let events = self.conversation.forget();
                self.settle(events, generation);
                let _ = reply.send(());
            }
            WidgetCommand::Snapshot(reply) => {
                let _ = reply.send(self.conversation.snapshot());
            }
            WidgetCommand::Shutdown(reply) => {
                info!("Widget unmount requested");
                self.timers.teardown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn start_sync(&mut self) {
        let Some(target) = self.conversation.sync_target() else {
            return;
        };
        self.timers.poll.begin();

        let adapter = Arc::clone(&self.adapter);
        self.in_flight.push(
            async move {
                let result =
                    reconcile::fetch(&*adapter, &target.email, target.ticket_id.as_ref())
                        .await;
                Completion::Sync { target, result }
            }
            .boxed(),
        );
    }

    fn start_send(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
        reply: Reply<Result<(), ClientError>>,
    ) {
        let (pending, events) = match self.conversation.begin_send(text, attachment) {
            Ok(started) => started,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let generation = self.conversation.generation();
        self.settle(events, generation);

        let adapter = Arc::clone(&self.adapter);
        self.in_flight.push(
            async move {
                let result = adapter.send_message(&pending.request).await;
                Completion::Send {
                    pending,
                    result,
                    reply,
                }
            }
            .boxed(),
        );
    }

    fn handle_completion(&mut self, done: Completion) {
        let generation = self.conversation.generation();
        match done {
            Completion::Sync { target, result } => {
                match result {
                    Ok(response) => {
                        let events = self.conversation.apply_sync(&target, &response);
                        self.settle(events, generation);
                    }
                    // No backoff: the next tick retries at the normal cadence.
                    Err(e) => warn!(error = %e, "Reconcile failed"),
                }
                self.timers.poll.finish(self.conversation.can_poll());
            }
            Completion::Send {
                pending,
                result,
                reply,
            } => {
                let (outcome, events) = self.conversation.finish_send(&pending, result);
                self.settle(events, generation);

                // Pull the server copy right away while the visitor is watching.
                if outcome.is_ok()
                    && self.timers.poll.cadence() == Cadence::Foreground
                    && !self.timers.poll.in_flight()
                {
                    debug!("Refreshing after send");
                    self.timers.poll.restart(self.conversation.can_poll());
                }
                let _ = reply.send(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use salonline_shared::{Sender, TicketId, Visitor};
    use salonline_store::MemoryIdentityStore;

    use crate::inbox::InMemoryInbox;
    use crate::notify::Silent;
    use crate::resolution::ResolutionState;

    fn mount(
        inbox: &Arc<InMemoryInbox>,
        store: MemoryIdentityStore,
    ) -> (WidgetHandle, mpsc::Receiver<WidgetEvent>) {
        spawn(
            Arc::clone(inbox),
            Arc::new(store),
            Arc::new(Silent),
            &WidgetConfig::default(),
        )
    }

    fn stored_visitor(ticket_id: Option<TicketId>) -> MemoryIdentityStore {
        MemoryIdentityStore::with_visitor(&Visitor {
            name: "Ana".into(),
            email: "a@b.com".into(),
            phone: String::new(),
            ticket_id,
        })
    }

    fn drain(rx: &mut mpsc::Receiver<WidgetEvent>) -> Vec<WidgetEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn wait(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_network_never_overlaps_requests() {
        let inbox = Arc::new(InMemoryInbox::new());
        inbox.set_latency(Some(Duration::from_secs(7)));
        let (widget, _events) = mount(&inbox, stored_visitor(None));

        widget.open_view().await.unwrap();
        wait(60).await;

        assert_eq!(inbox.max_in_flight(), 1);
        assert!(inbox.get_calls() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_polls_keep_the_cadence() {
        let inbox = Arc::new(InMemoryInbox::new());
        inbox.operator_reply("a@b.com", "Hello from the salon");
        inbox.fail_next(2);
        let (widget, _events) = mount(&inbox, stored_visitor(None));

        widget.open_view().await.unwrap();
        wait(11).await;

        assert!(inbox.get_calls() >= 3);
        let snapshot = widget.snapshot().await.unwrap();
        assert!(snapshot
            .messages
            .iter()
            .any(|m| m.sender == Sender::Operator && m.text == "Hello from the salon"));
        assert!(snapshot.visitor.unwrap().ticket_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn intake_resolution_and_countdown_reset() {
        let inbox = Arc::new(InMemoryInbox::new());
        let (widget, mut events) = mount(&inbox, MemoryIdentityStore::new());

        widget.open_view().await.unwrap();
        widget
            .submit_intake("Ana", "a@b.com", "", "My appointment moved")
            .await
            .unwrap();

        let ticket = inbox.open_ticket("a@b.com").unwrap();
        assert_eq!(inbox.ticket_source(&ticket).as_deref(), Some("widget"));
        assert!(inbox.resolve(&ticket, "Rebooked you for Friday"));

        wait(6).await;
        let snapshot = widget.snapshot().await.unwrap();
        assert!(matches!(snapshot.resolution, ResolutionState::Resolved { .. }));
        assert_eq!(snapshot.messages.len(), 2);
        assert!(snapshot.messages[1].is_resolution_marker);
        assert!(matches!(
            widget.send_message("one more thing", None).await,
            Err(ClientError::ConversationResolved)
        ));

        wait(20).await;
        let snapshot = widget.snapshot().await.unwrap();
        assert_eq!(snapshot.resolution, ResolutionState::Active);
        assert_eq!(snapshot.visitor.unwrap().ticket_id, None);
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.messages[0].id.is_welcome());

        let seen = drain(&mut events);
        assert!(seen.contains(&WidgetEvent::TicketAssigned {
            ticket_id: ticket.clone()
        }));
        assert!(seen.contains(&WidgetEvent::Resolved { remaining: 15 }));
        assert!(seen.contains(&WidgetEvent::ConversationReset));
    }

    #[tokio::test(start_paused = true)]
    async fn continue_keeps_the_ticket() {
        let inbox = Arc::new(InMemoryInbox::new());
        let ticket = inbox.operator_reply("a@b.com", "Hi Ana");
        inbox.resolve(&ticket, "");
        let (widget, _events) = mount(&inbox, stored_visitor(Some(ticket.clone())));

        widget.open_view().await.unwrap();
        wait(1).await;
        widget.continue_subject().await.unwrap();

        // Polls keep returning the handled marker; the countdown never restarts.
        wait(30).await;
        let snapshot = widget.snapshot().await.unwrap();
        assert_eq!(snapshot.resolution, ResolutionState::Active);
        assert_eq!(snapshot.visitor.unwrap().ticket_id, Some(ticket));
        assert!(snapshot.messages.iter().all(|m| !m.is_resolution_marker));
    }

    #[tokio::test(start_paused = true)]
    async fn message_after_continue_stays_on_the_ticket() {
        let inbox = Arc::new(InMemoryInbox::new());
        let ticket = inbox.operator_reply("a@b.com", "Hi Ana");
        inbox.resolve(&ticket, "All done");
        let (widget, _events) = mount(&inbox, stored_visitor(Some(ticket.clone())));

        widget.open_view().await.unwrap();
        wait(1).await;
        assert!(widget.snapshot().await.unwrap().resolution.is_resolved());

        widget.continue_subject().await.unwrap();
        widget.send_message("one more thing", None).await.unwrap();
        wait(6).await;

        let snapshot = widget.snapshot().await.unwrap();
        assert_eq!(snapshot.resolution, ResolutionState::Active);
        assert_eq!(snapshot.visitor.unwrap().ticket_id, Some(ticket.clone()));
        let texts: Vec<&str> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Welcome back, Ana!", "Hi Ana", "one more thing"]);
        assert_eq!(inbox.open_ticket("a@b.com"), Some(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn background_replies_count_as_unread() {
        let inbox = Arc::new(InMemoryInbox::new());
        let ticket = inbox.operator_reply("a@b.com", "first");
        let (widget, mut events) = mount(&inbox, stored_visitor(Some(ticket)));

        // First background poll only primes the baseline.
        wait(11).await;
        assert_eq!(widget.snapshot().await.unwrap().unread, 0);

        inbox.operator_reply("a@b.com", "second");
        wait(10).await;
        assert_eq!(widget.snapshot().await.unwrap().unread, 1);
        assert!(drain(&mut events)
            .contains(&WidgetEvent::NewOperatorMessages { count: 1, unread: 1 }));

        widget.open_view().await.unwrap();
        assert_eq!(widget.snapshot().await.unwrap().unread, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_is_surfaced_once() {
        let inbox = Arc::new(InMemoryInbox::new());
        let (widget, _events) = mount(&inbox, stored_visitor(None));
        inbox.fail_next(1);

        let result = widget.send_message("hello", None).await;
        assert!(matches!(result, Err(ClientError::Adapter(_))));
        let snapshot = widget.snapshot().await.unwrap();
        assert!(snapshot.messages.iter().all(|m| !m.id.is_local()));

        widget.send_message("hello again", None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn forget_stops_polling() {
        let inbox = Arc::new(InMemoryInbox::new());
        let (widget, _events) = mount(&inbox, stored_visitor(None));
        widget.open_view().await.unwrap();
        wait(1).await;
        widget.forget().await.unwrap();

        let calls = inbox.get_calls();
        wait(60).await;
        assert_eq!(inbox.get_calls(), calls);
        assert!(matches!(
            widget.send_message("hi", None).await,
            Err(ClientError::NoIdentity)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_handle() {
        let inbox = Arc::new(InMemoryInbox::new());
        let (widget, _events) = mount(&inbox, stored_visitor(None));
        widget.shutdown().await.unwrap();
        assert!(matches!(widget.snapshot().await, Err(ClientError::Closed)));
    }
}
