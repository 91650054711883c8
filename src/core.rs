//! Core domain types and service traits for rsvp-notify
//!
//! This module defines the tenant, guest and invitation data structures and
//! the trait contracts that the delivery pipeline is built around.

use crate::providers::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A delivery channel for guest notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    #[serde(alias = "whats_app", alias = "whatsApp")]
    WhatsApp,
}

impl Channel {
    /// All channels in default priority order.
    pub const DEFAULT_PRIORITY: [Channel; 3] = [Channel::Email, Channel::WhatsApp, Channel::Sms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::WhatsApp => "whatsapp",
        }
    }

    /// Whether this channel addresses the guest by phone number.
    pub fn uses_phone(&self) -> bool {
        matches!(self, Channel::Sms | Channel::WhatsApp)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "whatsapp" | "whats_app" => Ok(Channel::WhatsApp),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

/// A wedding guest and the contact details they gave the couple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Guest {
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Channel the guest asked to be contacted on, if any.
    #[serde(default)]
    pub preferred_channel: Option<Channel>,
    /// The guest unsubscribed from all notifications.
    #[serde(default)]
    pub opted_out: bool,
}

impl Guest {
    pub fn display_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

/// A guest-to-event association carrying the tokenized RSVP link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invitation {
    pub guest_id: String,
    pub event_id: String,
    pub token: String,
    #[serde(default)]
    pub status: InvitationStatus,
}

/// Per-wedding send budget. A limit of zero means unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RateLimit {
    #[serde(default)]
    pub per_minute: u32,
    #[serde(default)]
    pub per_day: u32,
}

/// Notification settings configured by the couple for their wedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationSettings {
    #[serde(default = "default_channels")]
    pub enabled_channels: Vec<Channel>,
    #[serde(default = "default_channels")]
    pub channel_priority: Vec<Channel>,
    #[serde(default)]
    pub rate_limit: RateLimit,
    /// Name shown as the sender of SMS/WhatsApp messages and email "from".
    #[serde(default)]
    pub sender_name: Option<String>,
}

fn default_channels() -> Vec<Channel> {
    Channel::DEFAULT_PRIORITY.to_vec()
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled_channels: default_channels(),
            channel_priority: default_channels(),
            rate_limit: RateLimit::default(),
            sender_name: None,
        }
    }
}

impl NotificationSettings {
    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled_channels.contains(&channel)
    }
}

/// The tenant: every guest, event and setting is scoped to one wedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wedding {
    pub id: String,
    pub slug: String,
    pub couple_names: String,
    #[serde(default)]
    pub settings: NotificationSettings,
}

impl Wedding {
    pub fn sender_name(&self) -> &str {
        self.settings
            .sender_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.couple_names)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Invitation,
    RsvpReminder,
    Announcement,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Invitation => "invitation",
            NotificationKind::RsvpReminder => "rsvp_reminder",
            NotificationKind::Announcement => "announcement",
        }
    }
}

/// A fully composed message, addressed and ready for a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub channel: Channel,
    /// Email address or E.164 phone number, depending on the channel.
    pub to: String,
    /// Stable guest identifier, used by providers that key on a user id.
    pub recipient_id: String,
    pub subject: Option<String>,
    pub body: String,
    pub sender_name: String,
}

/// What a provider hands back after accepting a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoChannel,
    NotInvited,
    OptedOut,
    RateLimited,
    QuotaExhausted,
    AlreadyResponded,
    RecentlyReminded,
    Aborted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoChannel => "no_channel",
            SkipReason::NotInvited => "not_invited",
            SkipReason::OptedOut => "opted_out",
            SkipReason::RateLimited => "rate_limited",
            SkipReason::QuotaExhausted => "quota_exhausted",
            SkipReason::AlreadyResponded => "already_responded",
            SkipReason::RecentlyReminded => "recently_reminded",
            SkipReason::Aborted => "aborted",
        }
    }
}

/// The recorded outcome of notifying one guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRecord {
    pub wedding_id: String,
    pub guest_id: String,
    pub kind: NotificationKind,
    pub channel: Option<Channel>,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider calls made, including retries and fallbacks.
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn skipped(
        wedding_id: &str,
        guest_id: &str,
        kind: NotificationKind,
        reason: SkipReason,
    ) -> Self {
        Self {
            wedding_id: wedding_id.to_string(),
            guest_id: guest_id.to_string(),
            kind,
            channel: None,
            status: DeliveryStatus::Skipped,
            provider_message_id: None,
            skip_reason: Some(reason),
            error: None,
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Delivers a composed message over one channel
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// A short name for logs and metrics (e.g., "resend", "twilio-sms").
    fn name(&self) -> &str;

    /// Sends the message.
    ///
    /// # Returns
    /// * `Ok(ProviderReceipt)` once the provider accepted the message
    /// * `Err(ProviderError)` classified as transient, rejected or not configured
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError>;
}

/// Stores delivery outcomes
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, record: DeliveryRecord) -> anyhow::Result<()>;

    /// All records for a wedding, oldest first.
    async fn records_for(&self, wedding_id: &str) -> Vec<DeliveryRecord>;
}
