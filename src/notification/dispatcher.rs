//! Delivers one notification to one guest.

use super::BulkSummary;
use crate::channel::{available_channels, determine_best_channel, resolve_recipient};
use crate::config::Config;
use crate::core::{
    Channel, ChannelProvider, DeliveryLog, DeliveryRecord, DeliveryStatus, Guest, NotificationKind,
    OutboundMessage, ProviderReceipt, SkipReason, Wedding,
};
use crate::formatting::{MessageContent, MessageFormatter};
use crate::internal_metrics::Metrics;
use crate::providers::{ProviderError, ProviderSet};
use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::roster::Roster;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Retry, fallback and rate-limit behavior of a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub fallback_enabled: bool,
    pub default_country_code: Option<String>,
    /// Longest a bulk run waits for a wedding's minute window to reopen.
    pub max_rate_limit_wait: Duration,
    /// Guests notified in parallel by bulk operations.
    pub concurrency: usize,
}

impl DispatchPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.delivery.max_retries,
            initial_backoff: config.delivery.initial_backoff,
            fallback_enabled: config.delivery.fallback_enabled,
            default_country_code: config.core.default_country_code.clone(),
            max_rate_limit_wait: config.rate_limit.max_wait,
            concurrency: config.delivery.concurrency.max(1),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-call options used by the bulk senders.
#[derive(Clone, Default)]
pub(crate) struct DeliverOptions {
    /// Sleep through a `RetryAfter` instead of skipping the guest.
    pub wait_for_rate_limit: bool,
    /// Send through this provider instead of the channel's own.
    pub via: Option<Arc<dyn ChannelProvider>>,
}

impl DeliverOptions {
    pub(crate) fn bulk() -> Self {
        Self {
            wait_for_rate_limit: true,
            via: None,
        }
    }
}

/// Picks a channel for each guest, sends through the matching provider and
/// records what happened.
#[derive(Clone)]
pub struct Dispatcher {
    providers: ProviderSet,
    formatter: Arc<dyn MessageFormatter>,
    rate_limiter: RateLimiter,
    delivery_log: Arc<dyn DeliveryLog>,
    metrics: Arc<Metrics>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        providers: ProviderSet,
        formatter: Arc<dyn MessageFormatter>,
        rate_limiter: RateLimiter,
        delivery_log: Arc<dyn DeliveryLog>,
        metrics: Arc<Metrics>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            providers,
            formatter,
            rate_limiter,
            delivery_log,
            metrics,
            policy,
        }
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn delivery_log(&self) -> &Arc<dyn DeliveryLog> {
        &self.delivery_log
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The channel a notification to this guest would go out on right now.
    pub fn resolve_channel(&self, wedding: &Wedding, guest: &Guest) -> Option<Channel> {
        determine_best_channel(
            guest,
            &wedding.settings,
            self.policy.default_country_code.as_deref(),
        )
    }

    /// Notifies one guest and records the outcome.
    pub async fn send(&self, wedding: &Wedding, guest: &Guest, content: &MessageContent) -> DeliveryRecord {
        self.deliver(wedding, guest, content, &DeliverOptions::default())
            .await
    }

    /// Sends the guest their invitation with the RSVP link.
    ///
    /// Guests without an invitation in the roster are skipped as
    /// [`SkipReason::NotInvited`].
    pub async fn send_invitation_notification(&self, roster: &Roster, guest: &Guest) -> DeliveryRecord {
        self.invite(roster, guest, &DeliverOptions::default()).await
    }

    /// Invites the listed guests, or everyone when `guest_ids` is `None`.
    #[instrument(skip_all, fields(wedding_id = %roster.wedding.id))]
    pub async fn send_invitations(&self, roster: &Roster, guest_ids: Option<&[String]>) -> BulkSummary {
        let started = Instant::now();
        let mut unknown_guests = Vec::new();
        let guests: Vec<&Guest> = match guest_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    let guest = roster.guest(id);
                    if guest.is_none() {
                        unknown_guests.push(id.clone());
                    }
                    guest
                })
                .collect(),
            None => roster.guests.iter().collect(),
        };
        if !unknown_guests.is_empty() {
            warn!(unknown = ?unknown_guests, "Ignoring guest ids that are not in the roster");
        }

        let options = DeliverOptions::bulk();
        let sends: Vec<BoxFuture<'_, DeliveryRecord>> = guests
            .into_iter()
            .map(|guest| self.invite(roster, guest, &options).boxed())
            .collect();
        let records: Vec<DeliveryRecord> = stream::iter(sends)
            .buffer_unordered(self.policy.concurrency)
            .collect()
            .await;

        let mut summary = BulkSummary::from_records(&records);
        summary.unknown_guests = unknown_guests;
        self.metrics
            .record_bulk_duration(NotificationKind::Invitation, started.elapsed());
        info!(
            total = summary.total,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Invitation run finished"
        );
        summary
    }

    async fn invite(&self, roster: &Roster, guest: &Guest, options: &DeliverOptions) -> DeliveryRecord {
        let Some(invitation) = roster.invitations_for(&guest.id).next() else {
            return self
                .skip(&roster.wedding, guest, NotificationKind::Invitation, SkipReason::NotInvited)
                .await;
        };
        let content = MessageContent::Invitation {
            token: invitation.token.clone(),
            events: roster.event_names_for(&guest.id),
        };
        self.deliver(&roster.wedding, guest, &content, options).await
    }

    #[instrument(
        skip_all,
        fields(wedding_id = %wedding.id, guest_id = %guest.id, kind = content.kind().as_str())
    )]
    pub(crate) async fn deliver(
        &self,
        wedding: &Wedding,
        guest: &Guest,
        content: &MessageContent,
        options: &DeliverOptions,
    ) -> DeliveryRecord {
        let kind = content.kind();
        if guest.opted_out {
            return self.skip(wedding, guest, kind, SkipReason::OptedOut).await;
        }

        let country_code = self.policy.default_country_code.as_deref();
        let candidates = available_channels(guest, &wedding.settings, country_code);
        if candidates.is_empty() {
            debug!("Guest has no usable contact for any enabled channel");
            return self.skip(wedding, guest, kind, SkipReason::NoChannel).await;
        }

        if let Err(reason) = self.acquire(wedding, options.wait_for_rate_limit).await {
            return self.skip(wedding, guest, kind, reason).await;
        }

        let mut attempts = 0;
        let mut last_error: Option<(Channel, ProviderError)> = None;
        for (i, channel) in candidates.iter().copied().enumerate() {
            if i > 0 {
                if !self.policy.fallback_enabled {
                    break;
                }
                self.metrics.channel_fallbacks_total.increment(1);
                info!(channel = %channel, "Falling back to next channel");
            }

            let Some(to) = resolve_recipient(guest, channel, country_code) else {
                continue;
            };
            let provider = match &options.via {
                Some(provider) => provider.clone(),
                None => match self.providers.get(channel) {
                    Ok(provider) => provider,
                    Err(e) => {
                        warn!(channel = %channel, "{}", e);
                        last_error = Some((channel, e));
                        continue;
                    }
                },
            };

            let text = self.formatter.compose(wedding, guest, channel, content);
            let message = OutboundMessage {
                channel,
                to,
                recipient_id: guest.id.clone(),
                subject: text.subject,
                body: text.body,
                sender_name: wedding.sender_name().to_string(),
            };

            match self.send_with_retry(provider.as_ref(), &message, &mut attempts).await {
                Ok(receipt) => {
                    let record = DeliveryRecord {
                        wedding_id: wedding.id.clone(),
                        guest_id: guest.id.clone(),
                        kind,
                        channel: Some(channel),
                        status: DeliveryStatus::Sent,
                        provider_message_id: receipt.message_id,
                        skip_reason: None,
                        error: None,
                        attempts,
                        timestamp: Utc::now(),
                    };
                    info!(channel = %channel, provider = provider.name(), attempts, "Notification sent");
                    return self.finish(record).await;
                }
                Err(e) => {
                    warn!(channel = %channel, provider = provider.name(), error = %e, "Delivery failed");
                    last_error = Some((channel, e));
                }
            }
        }

        let (channel, error) = match last_error {
            Some((channel, e)) => (Some(channel), e.to_string()),
            None => (None, "no channel could be attempted".to_string()),
        };
        let record = DeliveryRecord {
            wedding_id: wedding.id.clone(),
            guest_id: guest.id.clone(),
            kind,
            channel,
            status: DeliveryStatus::Failed,
            provider_message_id: None,
            skip_reason: None,
            error: Some(error),
            attempts,
            timestamp: Utc::now(),
        };
        self.finish(record).await
    }

    /// Takes one unit of the wedding's budget, waiting for the minute window
    /// to reopen when `wait` is set and the wait is short enough.
    async fn acquire(&self, wedding: &Wedding, wait: bool) -> Result<(), SkipReason> {
        let limit = &wedding.settings.rate_limit;
        match self.rate_limiter.try_acquire(&wedding.id, limit).await {
            Ok(()) => Ok(()),
            Err(RateLimitError::QuotaExhausted) => Err(SkipReason::QuotaExhausted),
            Err(RateLimitError::RetryAfter(delay)) => {
                if !wait || delay > self.policy.max_rate_limit_wait {
                    debug!(retry_after = ?delay, "Rate limited");
                    return Err(SkipReason::RateLimited);
                }
                debug!(retry_after = ?delay, "Rate limited, waiting for the next window");
                tokio::time::sleep(delay).await;
                match self.rate_limiter.try_acquire(&wedding.id, limit).await {
                    Ok(()) => Ok(()),
                    Err(RateLimitError::QuotaExhausted) => Err(SkipReason::QuotaExhausted),
                    Err(RateLimitError::RetryAfter(_)) => Err(SkipReason::RateLimited),
                }
            }
        }
    }

    /// Calls the provider, retrying transient failures with exponential
    /// backoff. `attempts` counts every call made.
    async fn send_with_retry(
        &self,
        provider: &dyn ChannelProvider,
        message: &OutboundMessage,
        attempts: &mut u32,
    ) -> Result<ProviderReceipt, ProviderError> {
        let mut retry = 0;
        loop {
            *attempts += 1;
            let started = Instant::now();
            let result = provider.send(message).await;
            self.metrics
                .record_send_duration(provider.name(), started.elapsed());

            let error = match result {
                Ok(receipt) => return Ok(receipt),
                Err(e) => e,
            };
            self.metrics
                .increment_provider_error(provider.name(), error.is_transient());
            if !error.is_transient() || retry >= self.policy.max_retries {
                return Err(error);
            }

            let delay = self.backoff(retry);
            warn!(
                provider = provider.name(),
                retry = retry + 1,
                max_retries = self.policy.max_retries,
                delay = ?delay,
                error = %error,
                "Transient provider failure, retrying"
            );
            self.metrics.provider_retries_total.increment(1);
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    /// `initial_backoff * 2^retry`, plus up to a quarter of that as jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let base = self
            .policy
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(retry));
        let max_jitter = (base.as_millis() / 4) as u64;
        if max_jitter == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
    }

    pub(crate) async fn skip(
        &self,
        wedding: &Wedding,
        guest: &Guest,
        kind: NotificationKind,
        reason: SkipReason,
    ) -> DeliveryRecord {
        debug!(guest_id = %guest.id, reason = reason.as_str(), "Skipping guest");
        self.finish(DeliveryRecord::skipped(&wedding.id, &guest.id, kind, reason))
            .await
    }

    /// Writes the record to the delivery log and updates metrics.
    pub(crate) async fn finish(&self, record: DeliveryRecord) -> DeliveryRecord {
        match (record.status, record.channel, record.skip_reason) {
            (DeliveryStatus::Sent, Some(channel), _) => {
                self.metrics.increment_sent(channel, record.kind)
            }
            (DeliveryStatus::Failed, _, _) => self.metrics.increment_failed(record.kind),
            (DeliveryStatus::Skipped, _, Some(reason)) => self.metrics.increment_skipped(reason),
            _ => {}
        }
        if let Err(e) = self.delivery_log.record(record.clone()).await {
            warn!(guest_id = %record.guest_id, error = %e, "Failed to write delivery record");
        }
        record
    }
}
