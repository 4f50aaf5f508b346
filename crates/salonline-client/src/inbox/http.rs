use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use salonline_shared::protocol::{
    GetMessagesRequest, MessagesResponse, SendMessageRequest, SendMessageResponse,
};
use salonline_shared::{ProtocolError, TicketId};

use super::InboxAdapter;
use crate::error::AdapterError;

const GET_MESSAGES_FUNCTION: &str = "get-support-messages";
const SEND_MESSAGE_FUNCTION: &str = "send-support-message";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Inbox reached through the backend's HTTP functions endpoint.
#[derive(Clone)]
pub struct HttpInboxAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpInboxAdapter {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, function: &str) -> String {
        format!("{}/functions/v1/{}", self.base_url, function)
    }

    async fn invoke<B, R>(&self, function: &str, body: &B) -> Result<R, AdapterError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(function);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        debug!(function, len = text.len(), "Inbox function responded");
        serde_json::from_str(&text).map_err(|e| AdapterError::Protocol(ProtocolError::from(e)))
    }
}

impl InboxAdapter for HttpInboxAdapter {
    async fn get_messages(
        &self,
        email: &str,
        ticket_id: Option<&TicketId>,
    ) -> Result<MessagesResponse, AdapterError> {
        let body = GetMessagesRequest {
            email: email.to_string(),
            ticket_id: ticket_id.cloned(),
        };
        self.invoke(GET_MESSAGES_FUNCTION, &body).await
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, AdapterError> {
        self.invoke(SEND_MESSAGE_FUNCTION, request).await
    }
}
