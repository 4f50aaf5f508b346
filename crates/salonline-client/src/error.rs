use salonline_shared::ProtocolError;
use thiserror::Error;

/// Failure talking to the operator inbox.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inbox responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Inbox unavailable: {0}")]
    Unavailable(String),
}

/// One-shot notice returned to the caller of an explicit user action.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No visitor identity, submit the intake form first")]
    NoIdentity,

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ProtocolError),

    #[error("Conversation is resolved; continue it or start a new request")]
    ConversationResolved,

    #[error("Could not reach support: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Widget has shut down")]
    Closed,
}
