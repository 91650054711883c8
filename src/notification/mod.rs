//! Channel resolution and delivery orchestration.
//!
//! The [`dispatcher::Dispatcher`] notifies one guest: it picks the channel,
//! applies the wedding's rate limit, retries and falls back across
//! providers, and records the outcome. The reminder and announcement
//! senders drive it over a whole roster.

pub mod announcements;
pub mod cooldown;
pub mod dispatcher;
pub mod reminders;

use crate::core::{Channel, DeliveryRecord, DeliveryStatus, SkipReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use announcements::{Announcement, AnnouncementSender};
pub use cooldown::ReminderCooldown;
pub use dispatcher::{DispatchPolicy, Dispatcher};
pub use reminders::ReminderSender;

/// Outcome counts for a multi-guest send.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BulkSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Sent notifications per channel.
    pub by_channel: BTreeMap<Channel, usize>,
    pub skipped_by_reason: BTreeMap<SkipReason, usize>,
    /// Requested guest ids that are not in the roster.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_guests: Vec<String>,
}

impl BulkSummary {
    pub fn add(&mut self, record: &DeliveryRecord) {
        self.total += 1;
        match record.status {
            DeliveryStatus::Sent => {
                self.sent += 1;
                if let Some(channel) = record.channel {
                    *self.by_channel.entry(channel).or_default() += 1;
                }
            }
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Skipped => {
                self.count_skip(record.skip_reason.unwrap_or(SkipReason::NoChannel))
            }
        }
    }

    /// Counts a guest that was skipped without a delivery record.
    pub fn add_skip(&mut self, reason: SkipReason) {
        self.total += 1;
        self.count_skip(reason);
    }

    fn count_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        *self.skipped_by_reason.entry(reason).or_default() += 1;
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DeliveryRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record);
        }
        summary
    }
}
