//! Delivery providers, one per channel, plus the bulk reminder service.
//!
//! Every provider implements [`ChannelProvider`]. Failures are classified so
//! the dispatcher can decide between retrying the same channel and falling
//! back to the next one.

pub mod dry_run;
pub mod notificationapi;
pub mod resend;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod twilio;

use crate::config::ProvidersConfig;
use crate::core::{Channel, ChannelProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use dry_run::DryRunProvider;
pub use notificationapi::NotificationApiClient;
pub use resend::ResendClient;
pub use twilio::TwilioClient;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth retrying: timeouts, connection errors, 429 and 5xx responses.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider refused this message; retrying will not help.
    #[error("provider rejected message: {0}")]
    Rejected(String),

    #[error("no provider configured for {0}")]
    NotConfigured(Channel),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return classify_status(status, e.to_string());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ProviderError::Transient(e.to_string())
        } else {
            ProviderError::Rejected(e.to_string())
        }
    }
}

fn classify_status(status: reqwest::StatusCode, detail: String) -> ProviderError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(format!("status {}: {}", status, detail))
    } else {
        ProviderError::Rejected(format!("status {}: {}", status, detail))
    }
}

/// Turns a non-success response into a classified error, keeping the body
/// for the log.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status = %status, body = %body, "Provider returned an error");
    classify_status(status, body)
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// The providers available to a dispatcher, keyed by channel.
#[derive(Clone, Default)]
pub struct ProviderSet {
    channels: HashMap<Channel, Arc<dyn ChannelProvider>>,
    bulk: Option<Arc<dyn ChannelProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from configuration. Channels without credentials are
    /// left out and fail with [`ProviderError::NotConfigured`].
    pub fn from_config(config: &ProvidersConfig, timeout: Duration) -> Self {
        let mut set = Self::new();
        let client = http_client(timeout);

        if let Some(resend) = &config.resend {
            set = set.with(Channel::Email, Arc::new(ResendClient::new(resend.clone(), client.clone())));
        }
        if let Some(twilio) = &config.twilio {
            if let Some(sms) = TwilioClient::sms(twilio, client.clone()) {
                set = set.with(Channel::Sms, Arc::new(sms));
            }
            if let Some(whatsapp) = TwilioClient::whatsapp(twilio, client.clone()) {
                set = set.with(Channel::WhatsApp, Arc::new(whatsapp));
            }
        }
        if let Some(napi) = &config.notificationapi {
            set = set.with_bulk(Arc::new(NotificationApiClient::new(napi.clone(), client)));
        }

        debug!(channels = ?set.configured_channels(), bulk = set.bulk.is_some(), "Providers configured");
        set
    }

    /// A set where every channel, and the bulk service, only logs.
    pub fn dry_run() -> Self {
        let mut set = Self::new();
        for channel in Channel::DEFAULT_PRIORITY {
            set = set.with(channel, Arc::new(DryRunProvider::new(channel.as_str())));
        }
        set.with_bulk(Arc::new(DryRunProvider::new("bulk")))
    }

    pub fn with(mut self, channel: Channel, provider: Arc<dyn ChannelProvider>) -> Self {
        self.channels.insert(channel, provider);
        self
    }

    pub fn with_bulk(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.bulk = Some(provider);
        self
    }

    pub fn get(&self, channel: Channel) -> Result<Arc<dyn ChannelProvider>, ProviderError> {
        self.channels
            .get(&channel)
            .cloned()
            .ok_or(ProviderError::NotConfigured(channel))
    }

    pub fn bulk(&self) -> Option<Arc<dyn ChannelProvider>> {
        self.bulk.clone()
    }

    pub fn configured_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.channels.keys().copied().collect();
        channels.sort();
        channels
    }
}
