//! A provider that logs messages instead of delivering them.
//!
//! Used by `--dry-run` to preview who would be notified, on which channel
//! and with what text.

use super::ProviderError;
use crate::core::{ChannelProvider, OutboundMessage, ProviderReceipt};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub struct DryRunProvider {
    name: String,
    sent: AtomicU64,
}

impl DryRunProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: format!("dry-run-{}", name),
            sent: AtomicU64::new(0),
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelProvider for DryRunProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            provider = %self.name,
            channel = %message.channel,
            to = %message.to,
            subject = ?message.subject,
            body = %message.body,
            "Dry run: message not sent"
        );
        Ok(ProviderReceipt {
            message_id: Some(format!("{}-{}", self.name, n)),
        })
    }
}
