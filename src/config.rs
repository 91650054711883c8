//! Configuration management for rsvp-notify
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer built-in defaults, an optional TOML file, environment
//! variables and command-line overrides.

use crate::cli::Cli;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub announcements: AnnouncementConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub delivery_log: DeliveryLogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoreConfig {
    /// The logging level, used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Country calling code applied to phone numbers entered without one.
    pub default_country_code: Option<String>,
    /// Log messages instead of handing them to providers.
    pub dry_run: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            default_country_code: None,
            dry_run: false,
        }
    }
}

/// Retry, fallback and concurrency settings for provider calls.
#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeliveryConfig {
    /// Retries per channel for transient provider failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    /// Try the next available channel when one fails.
    pub fallback_enabled: bool,
    /// Guests notified in parallel during bulk sends.
    pub concurrency: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "request_timeout_ms")]
    pub request_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            fallback_enabled: true,
            concurrency: num_cpus::get().clamp(2, 16),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    /// Weddings whose send windows are tracked at once.
    pub max_tracked_weddings: u64,
    /// Longest a bulk send waits for a per-minute window to reopen.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "max_wait_seconds")]
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tracked_weddings: 10_000,
            max_wait: Duration::from_secs(60),
        }
    }
}

/// How RSVP reminders reach guests.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReminderMode {
    /// Through the per-channel providers, one guest at a time.
    #[default]
    Direct,
    /// Through the NotificationAPI bulk service.
    Bulk,
}

#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReminderConfig {
    pub mode: ReminderMode,
    /// A guest is not reminded again within this window.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "cooldown_seconds")]
    pub cooldown: Duration,
    pub cache_size: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            mode: ReminderMode::Direct,
            cooldown: Duration::from_secs(3 * 24 * 60 * 60),
            cache_size: 100_000,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnnouncementConfig {
    pub batch_size: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "batch_delay_ms")]
    pub batch_delay: Duration,
    /// Consecutive fully-failed batches after which the run is abandoned.
    pub max_failed_batches: usize,
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_millis(1000),
            max_failed_batches: 2,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LinksConfig {
    /// Public site root; RSVP links are `{rsvp_base_url}/{slug}/rsvp?token=..`.
    pub rsvp_base_url: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            rsvp_base_url: "https://example.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    pub resend: Option<ResendConfig>,
    pub twilio: Option<TwilioConfig>,
    pub notificationapi: Option<NotificationApiConfig>,
}

/// Configuration for email delivery through Resend.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResendConfig {
    pub api_key: String,
    /// Bare sender address; the wedding's sender name is added as display name.
    pub from_address: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default = "default_resend_url")]
    pub base_url: String,
}

fn default_resend_url() -> String {
    "https://api.resend.com".to_string()
}

/// Configuration for SMS and WhatsApp delivery through Twilio.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number for SMS. SMS is unavailable when unset.
    #[serde(default)]
    pub sms_from: Option<String>,
    /// WhatsApp-enabled sender number. WhatsApp is unavailable when unset.
    #[serde(default)]
    pub whatsapp_from: Option<String>,
    #[serde(default = "default_twilio_url")]
    pub base_url: String,
}

fn default_twilio_url() -> String {
    "https://api.twilio.com".to_string()
}

/// Configuration for the NotificationAPI bulk service.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NotificationApiConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Notification template id used for RSVP reminders.
    #[serde(default = "default_reminder_notification")]
    pub reminder_notification_id: String,
    #[serde(default = "default_notificationapi_url")]
    pub base_url: String,
}

fn default_reminder_notification() -> String {
    "rsvp_reminder".to_string()
}

fn default_notificationapi_url() -> String {
    "https://api.notificationapi.com".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub listen_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: ([127, 0, 0, 1], 8080).into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: ([127, 0, 0, 1], 9090).into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DeliveryLogConfig {
    /// Append every delivery record as a JSON line to this file.
    pub path: Option<PathBuf>,
}

const ENV_PREFIX: &str = "RSVP_NOTIFY_";

/// Keys whose environment values are taken verbatim as strings.
const STRING_ENV_KEYS: &[&str] = &[
    "core.default_country_code",
    "providers.twilio.sms_from",
    "providers.twilio.whatsapp_from",
];

fn env() -> Env {
    Env::prefixed(ENV_PREFIX).split("__")
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file named on
    /// the command line, `RSVP_NOTIFY_*` environment variables and finally
    /// the command-line overrides themselves.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = &cli.config {
            if !path.exists() {
                bail!("Config file not found at specified path: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        // e.g. RSVP_NOTIFY_DELIVERY__MAX_RETRIES=5
        figment = figment.merge(env().ignore(STRING_ENV_KEYS));
        // Phone numbers and calling codes would otherwise parse as integers
        // and lose their leading `+`.
        for (key, value) in env().only(STRING_ENV_KEYS).iter() {
            figment = figment.merge(Serialized::default(key.as_str(), value));
        }

        let config: Config = figment.merge(cli).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.delivery.concurrency == 0 {
            bail!("delivery.concurrency must be at least 1");
        }
        if self.announcements.batch_size == 0 {
            bail!("announcements.batch_size must be at least 1");
        }
        if let Some(resend) = &self.providers.resend {
            if resend.api_key.trim().is_empty() {
                bail!("providers.resend.api_key must not be empty");
            }
        }
        Ok(())
    }
}
