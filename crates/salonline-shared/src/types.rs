use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{LOCAL_MESSAGE_PREFIX, WELCOME_MESSAGE_ID};
use crate::error::ProtocolError;

// Server-issued ticket identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TicketId(pub String);

impl TicketId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transcript message id. Server ids are opaque strings; the client mints
/// two kinds of its own (the welcome sentinel and `local-` optimistic ids)
/// which the server never issues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn welcome() -> Self {
        Self(WELCOME_MESSAGE_ID.to_string())
    }

    pub fn new_local() -> Self {
        Self(format!("{LOCAL_MESSAGE_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_welcome(&self) -> bool {
        self.0 == WELCOME_MESSAGE_ID
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_MESSAGE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Visitor,
    /// Client-only synthetic messages (welcome banners)
    System,
    Operator,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
    Audio,
}

impl AttachmentKind {
    pub const ALL: [AttachmentKind; 4] = [Self::Image, Self::Video, Self::File, Self::Audio];

    /// Tag name used inside raw message text, e.g. `[image:https://...]`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
            Self::Audio => "audio",
        }
    }
}

/// A media reference carried by a message. The URL is passed through as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
}

/// One entry of the visible transcript. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Display text with protocol markers already stripped.
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub attachment: Option<Attachment>,
    pub is_resolution_marker: bool,
}

impl Message {
    /// The client-only greeting that opens every fresh or resumed transcript.
    pub fn welcome(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::welcome(),
            text: text.into(),
            sender: Sender::System,
            timestamp: Utc::now(),
            attachment: None,
            is_resolution_marker: false,
        }
    }

    /// An optimistic visitor message shown before the server has stored it.
    pub fn outgoing(text: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            id: MessageId::new_local(),
            text: text.into(),
            sender: Sender::Visitor,
            timestamp: Utc::now(),
            attachment,
            is_resolution_marker: false,
        }
    }

    /// Whether the message exists only on this client.
    pub fn is_local_only(&self) -> bool {
        self.id.is_welcome() || self.id.is_local()
    }
}

/// The locally persisted identity of a returning visitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Visitor {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
}

impl Visitor {
    /// Build a visitor from intake form input, trimming whitespace.
    pub fn new(name: &str, email: &str, phone: &str) -> Result<Self, ProtocolError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(ProtocolError::MissingName);
        }
        if !is_plausible_email(email) {
            return Err(ProtocolError::InvalidEmail(email.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.trim().to_string(),
            ticket_id: None,
        })
    }

    pub fn has_ticket(&self) -> bool {
        self.ticket_id.is_some()
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}
