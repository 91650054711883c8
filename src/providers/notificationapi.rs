//! A client for the NotificationAPI sender endpoint, used for bulk RSVP
//! reminders. The service owns the templates and routes the message itself;
//! we pass the one contact field matching the channel we resolved.

use super::{error_from_response, ProviderError};
use crate::config::NotificationApiConfig;
use crate::core::{Channel, ChannelProvider, OutboundMessage, ProviderReceipt};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    notification_id: &'a str,
    user: User<'a>,
    merge_tags: MergeTags<'a>,
}

#[derive(Serialize)]
struct User<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeTags<'a> {
    sender_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    body: &'a str,
}

pub struct NotificationApiClient {
    config: NotificationApiConfig,
    client: reqwest::Client,
}

impl NotificationApiClient {
    pub fn new(config: NotificationApiConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl ChannelProvider for NotificationApiClient {
    fn name(&self) -> &str {
        "notificationapi"
    }

    #[instrument(skip_all, fields(recipient = %message.recipient_id, channel = %message.channel))]
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        let (email, number) = match message.channel {
            Channel::Email => (Some(message.to.as_str()), None),
            Channel::Sms | Channel::WhatsApp => (None, Some(message.to.as_str())),
        };
        let request = SendRequest {
            notification_id: &self.config.reminder_notification_id,
            user: User {
                id: &message.recipient_id,
                email,
                number,
            },
            merge_tags: MergeTags {
                sender_name: &message.sender_name,
                subject: message.subject.as_deref(),
                body: &message.body,
            },
        };

        let url = format!(
            "{}/{}/sender",
            self.config.base_url.trim_end_matches('/'),
            self.config.client_id
        );
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(self.name(), response).await);
        }

        info!("Notification accepted by NotificationAPI.");
        Ok(ProviderReceipt {
            // The sender endpoint does not hand back a tracking id.
            message_id: None,
        })
    }
}

#[cfg(test)]
mod notificationapi_client_tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> NotificationApiClient {
        NotificationApiClient::new(
            NotificationApiConfig {
                client_id: "client1".into(),
                client_secret: "shh".into(),
                reminder_notification_id: "rsvp_reminder".into(),
                base_url: server.uri(),
            },
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn test_phone_channel_sends_number_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/client1/sender"))
            .and(body_json(json!({
                "notificationId": "rsvp_reminder",
                "user": { "id": "g1", "number": "+14155550100" },
                "mergeTags": { "senderName": "Ana & Ben", "body": "Please RSVP" }
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let message = OutboundMessage {
            channel: Channel::WhatsApp,
            to: "+14155550100".into(),
            recipient_id: "g1".into(),
            subject: None,
            body: "Please RSVP".into(),
            sender_name: "Ana & Ben".into(),
        };
        let receipt = client_for(&server).send(&message).await.unwrap();
        assert_eq!(receipt.message_id, None);
    }

    #[tokio::test]
    async fn test_unauthorized_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let message = OutboundMessage {
            channel: Channel::Email,
            to: "ana@example.com".into(),
            recipient_id: "g1".into(),
            subject: Some("RSVP".into()),
            body: "Please RSVP".into(),
            sender_name: "Ana & Ben".into(),
        };
        let err = client_for(&server).send(&message).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }
}
