//! The Operator Inbox Adapter: the server side of the support channel.
//!
//! The widget only ever talks to the inbox through [`InboxAdapter`], one
//! request/response call per operation.

pub mod http;
pub mod memory;

use std::future::Future;

use salonline_shared::protocol::{MessagesResponse, SendMessageRequest, SendMessageResponse};
use salonline_shared::TicketId;

use crate::error::AdapterError;

pub use http::HttpInboxAdapter;
pub use memory::InMemoryInbox;

pub trait InboxAdapter: Send + Sync + 'static {
    /// All messages of the visitor's ticket. With `ticket_id` the lookup is
    /// scoped to that ticket, otherwise the inbox picks the email's open one.
    fn get_messages(
        &self,
        email: &str,
        ticket_id: Option<&TicketId>,
    ) -> impl Future<Output = Result<MessagesResponse, AdapterError>> + Send;

    /// Append a visitor message, opening a ticket if the email has none.
    fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> impl Future<Output = Result<SendMessageResponse, AdapterError>> + Send;
}
