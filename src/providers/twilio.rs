//! A client for SMS and WhatsApp delivery through the Twilio Messages API.
//!
//! One instance serves one channel; WhatsApp addresses carry Twilio's
//! `whatsapp:` prefix on both ends.

use super::{error_from_response, ProviderError};
use crate::config::TwilioConfig;
use crate::core::{Channel, ChannelProvider, OutboundMessage, ProviderReceipt};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument, warn};

/// Twilio rejects message bodies longer than this.
pub const MAX_BODY_CHARS: usize = 1600;

#[derive(Deserialize)]
struct MessageResource {
    sid: Option<String>,
}

pub struct TwilioClient {
    channel: Channel,
    name: &'static str,
    account_sid: String,
    auth_token: String,
    from: String,
    base_url: String,
    client: reqwest::Client,
}

impl TwilioClient {
    /// An SMS client, if an SMS sender number is configured.
    pub fn sms(config: &TwilioConfig, client: reqwest::Client) -> Option<Self> {
        let from = config.sms_from.clone()?;
        Some(Self::new(Channel::Sms, "twilio-sms", config, from, client))
    }

    /// A WhatsApp client, if a WhatsApp sender number is configured.
    pub fn whatsapp(config: &TwilioConfig, client: reqwest::Client) -> Option<Self> {
        let from = config.whatsapp_from.clone()?;
        Some(Self::new(Channel::WhatsApp, "twilio-whatsapp", config, from, client))
    }

    fn new(
        channel: Channel,
        name: &'static str,
        config: &TwilioConfig,
        from: String,
        client: reqwest::Client,
    ) -> Self {
        Self {
            channel,
            name,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn address(&self, number: &str) -> String {
        match self.channel {
            Channel::WhatsApp if !number.starts_with("whatsapp:") => format!("whatsapp:{}", number),
            _ => number.to_string(),
        }
    }
}

#[async_trait]
impl ChannelProvider for TwilioClient {
    fn name(&self) -> &str {
        self.name
    }

    #[instrument(skip_all, fields(provider = self.name, to = %message.to))]
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        if message.channel != self.channel {
            return Err(ProviderError::Rejected(format!(
                "{} cannot deliver {} messages",
                self.name, message.channel
            )));
        }

        let body: String = message.body.chars().take(MAX_BODY_CHARS).collect();
        let to = self.address(&message.to);
        let from = self.address(&self.from);
        let form = [("To", to.as_str()), ("From", from.as_str()), ("Body", body.as_str())];

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name, response).await);
        }

        // Accepted from here on, even if the body is unreadable.
        let message_id = match response.json::<MessageResource>().await {
            Ok(resource) => resource.sid,
            Err(e) => {
                warn!(error = %e, "Twilio accepted the message but its response was unreadable.");
                None
            }
        };
        info!(message_sid = ?message_id, "Message accepted by Twilio.");
        Ok(ProviderReceipt { message_id })
    }
}

#[cfg(test)]
mod twilio_client_tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            sms_from: Some("+14155550000".into()),
            whatsapp_from: Some("+14155559999".into()),
            base_url: server.uri(),
        }
    }

    fn message(channel: Channel, body: &str) -> OutboundMessage {
        OutboundMessage {
            channel,
            to: "+14155550100".into(),
            recipient_id: "g1".into(),
            subject: None,
            body: body.into(),
            sender_name: "Ana & Ben".into(),
        }
    }

    #[tokio::test]
    async fn test_whatsapp_addresses_are_prefixed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=whatsapp%3A%2B14155550100"))
            .and(body_string_contains("From=whatsapp%3A%2B14155559999"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "SM1", "status": "queued" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TwilioClient::whatsapp(&config(&server), reqwest::Client::new()).unwrap();
        let receipt = client.send(&message(Channel::WhatsApp, "Hi")).await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("SM1"));
    }

    #[tokio::test]
    async fn test_sms_uses_plain_numbers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("To=%2B14155550100"))
            .and(body_string_contains("From=%2B14155550000"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "SM2" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TwilioClient::sms(&config(&server), reqwest::Client::new()).unwrap();
        assert!(client.send(&message(Channel::Sms, "Hi")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreadable_success_body_is_still_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_string("<Response/>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = TwilioClient::sms(&config(&server), reqwest::Client::new()).unwrap();
        let receipt = client.send(&message(Channel::Sms, "Hi")).await.unwrap();
        assert_eq!(receipt.message_id, None);
    }

    #[tokio::test]
    async fn test_invalid_number_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "code": 21211, "message": "Invalid 'To' Phone Number" })),
            )
            .mount(&server)
            .await;

        let client = TwilioClient::sms(&config(&server), reqwest::Client::new()).unwrap();
        let err = client.send(&message(Channel::Sms, "Hi")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(ref m) if m.contains("21211")));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = TwilioClient::sms(&config(&server), reqwest::Client::new()).unwrap();
        assert!(client.send(&message(Channel::Sms, "Hi")).await.unwrap_err().is_transient());
    }

    #[test]
    fn test_channel_requires_sender_number() {
        let config = TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            sms_from: None,
            whatsapp_from: None,
            base_url: "http://localhost".into(),
        };
        assert!(TwilioClient::sms(&config, reqwest::Client::new()).is_none());
        assert!(TwilioClient::whatsapp(&config, reqwest::Client::new()).is_none());
    }
}
