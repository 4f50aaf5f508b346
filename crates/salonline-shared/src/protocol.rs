use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::ProtocolError;
use crate::types::{Message, MessageId, Sender, TicketId, Visitor};

/// Who wrote a message, as the inbox records it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    /// The visitor (the business' customer writing through the widget)
    Company,
    /// Support staff
    Admin,
}

impl From<SenderType> for Sender {
    fn from(s: SenderType) -> Self {
        match s {
            SenderType::Company => Sender::Visitor,
            SenderType::Admin => Sender::Operator,
        }
    }
}

/// One message record as returned by `get_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: String,
    pub sender_type: SenderType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl RemoteMessage {
    /// Decode the raw body into a transcript message.
    pub fn to_message(&self) -> Message {
        let body = codec::decode(&self.message);
        Message {
            id: MessageId(self.id.clone()),
            text: body.text,
            sender: self.sender_type.into(),
            timestamp: self.created_at,
            attachment: body.attachment,
            is_resolution_marker: body.is_resolution_marker,
        }
    }
}

/// Request body for `get_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetMessagesRequest {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
}

/// Response of `get_messages`. `ticket_id` is absent when the email has no
/// open ticket yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagesResponse {
    #[serde(default)]
    pub ticket_id: Option<TicketId>,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
}

impl MessagesResponse {
    pub fn from_json(body: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Request body for `send_message`. With `ticket_id` the message joins that
/// ticket, reopening it if it was resolved; otherwise the inbox uses the
/// email's open ticket or opens one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
}

impl SendMessageRequest {
    pub fn new(
        visitor: &Visitor,
        message: String,
        source: &str,
        company_id: Option<&str>,
    ) -> Result<Self, ProtocolError> {
        if message.trim().is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        Ok(Self {
            name: visitor.name.clone(),
            email: visitor.email.clone(),
            phone: visitor.phone.clone(),
            message,
            source: source.to_string(),
            company_id: company_id.map(str::to_string),
            ticket_id: visitor.ticket_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageResponse {
    pub ticket_id: TicketId,
}
