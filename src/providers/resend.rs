//! A client for sending email through the Resend HTTP API.

use super::{error_from_response, ProviderError};
use crate::config::ResendConfig;
use crate::core::{Channel, ChannelProvider, OutboundMessage, ProviderReceipt};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

#[derive(Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

pub struct ResendClient {
    config: ResendConfig,
    client: reqwest::Client,
}

impl ResendClient {
    pub fn new(config: ResendConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// `"Sender Name <address>"`, with characters that would break the
    /// header stripped from the display name.
    fn from_header(&self, sender_name: &str) -> String {
        let name: String = sender_name
            .chars()
            .filter(|c| !matches!(c, '<' | '>' | '"' | '\r' | '\n'))
            .collect();
        let name = name.trim();
        if name.is_empty() {
            self.config.from_address.clone()
        } else {
            format!("{} <{}>", name, self.config.from_address)
        }
    }
}

#[async_trait]
impl ChannelProvider for ResendClient {
    fn name(&self) -> &str {
        "resend"
    }

    #[instrument(skip_all, fields(to = %message.to))]
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        if message.channel != Channel::Email {
            return Err(ProviderError::Rejected(format!(
                "resend cannot deliver {} messages",
                message.channel
            )));
        }

        let mut payload = json!({
            "from": self.from_header(&message.sender_name),
            "to": [message.to],
            "subject": message.subject.clone().unwrap_or_default(),
            "text": message.body,
        });
        if let Some(reply_to) = &self.config.reply_to {
            payload["reply_to"] = json!(reply_to);
        }

        let url = format!("{}/emails", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name(), response).await);
        }

        // Accepted from here on, even if the body is unreadable.
        let message_id = match response.json::<SendEmailResponse>().await {
            Ok(body) => body.id,
            Err(e) => {
                warn!(error = %e, "Resend accepted the email but its response was unreadable.");
                None
            }
        };
        info!(message_id = ?message_id, "Email accepted by Resend.");
        Ok(ProviderReceipt { message_id })
    }
}

#[cfg(test)]
mod resend_client_tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ResendClient {
        ResendClient::new(
            ResendConfig {
                api_key: "re_test".into(),
                from_address: "hello@example.com".into(),
                reply_to: Some("couple@example.com".into()),
                base_url: server.uri(),
            },
            reqwest::Client::new(),
        )
    }

    fn email() -> OutboundMessage {
        OutboundMessage {
            channel: Channel::Email,
            to: "ana@example.com".into(),
            recipient_id: "g1".into(),
            subject: Some("You're invited".into()),
            body: "Hello Ana".into(),
            sender_name: "Ana & Ben".into(),
        }
    }

    #[tokio::test]
    async fn test_resend_send_success() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .and(body_partial_json(json!({
                "from": "Ana & Ben <hello@example.com>",
                "to": ["ana@example.com"],
                "subject": "You're invited",
                "reply_to": "couple@example.com",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "em_123" })))
            .mount(&server)
            .await;

        // Act
        let receipt = client_for(&server).send(&email()).await;

        // Assert
        assert_eq!(receipt.unwrap().message_id.as_deref(), Some("em_123"));
    }

    #[tokio::test]
    async fn test_resend_unreadable_success_body_is_still_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client_for(&server).send(&email()).await.unwrap();
        assert_eq!(receipt.message_id, None);
    }

    #[tokio::test]
    async fn test_resend_validation_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "message": "Invalid `to` field" })))
            .mount(&server)
            .await;

        let err = client_for(&server).send(&email()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(ref m) if m.contains("Invalid")));
    }

    #[tokio::test]
    async fn test_resend_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server).send(&email()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_resend_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = ResendClient::new(
            client_for(&server).config,
            super::super::http_client(Duration::from_millis(200)),
        );
        let err = client.send(&email()).await.unwrap_err();
        assert!(err.is_transient(), "timeout should be transient, got {:?}", err);
    }

    #[tokio::test]
    async fn test_resend_refuses_non_email() {
        let server = MockServer::start().await;
        let mut sms = email();
        sms.channel = Channel::Sms;
        let err = client_for(&server).send(&sms).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }
}
