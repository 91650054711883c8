//! Sends an announcement to every guest of a wedding in paced batches.

use super::dispatcher::{DeliverOptions, Dispatcher};
use super::BulkSummary;
use crate::config::AnnouncementConfig;
use crate::core::{DeliveryRecord, DeliveryStatus, Guest, NotificationKind, SkipReason};
use crate::formatting::MessageContent;
use crate::roster::Roster;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// A message from the couple to all of their guests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub subject: String,
    pub body: String,
}

/// Sends announcements in fixed-size batches with a pause in between.
#[derive(Clone)]
pub struct AnnouncementSender {
    dispatcher: Dispatcher,
    config: AnnouncementConfig,
}

impl AnnouncementSender {
    pub fn new(dispatcher: Dispatcher, config: AnnouncementConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Sends the announcement to every guest who has not opted out.
    ///
    /// Guests within a batch are notified concurrently. After
    /// `max_failed_batches` consecutive batches in which nobody could be
    /// reached, the run stops and the remaining guests are recorded as
    /// [`SkipReason::Aborted`]. Zero disables the cut-off.
    #[instrument(skip_all, fields(wedding_id = %roster.wedding.id, subject = %announcement.subject))]
    pub async fn send(&self, roster: &Roster, announcement: &Announcement) -> BulkSummary {
        let started = Instant::now();
        let mut summary = BulkSummary::default();
        let content = MessageContent::Announcement {
            subject: announcement.subject.clone(),
            body: announcement.body.clone(),
        };

        let (recipients, opted_out): (Vec<&Guest>, Vec<&Guest>) =
            roster.guests.iter().partition(|g| !g.opted_out);
        for _ in &opted_out {
            summary.add_skip(SkipReason::OptedOut);
        }

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<&[&Guest]> = recipients.chunks(batch_size).collect();
        let batch_count = batches.len();
        let options = DeliverOptions::bulk();
        let mut consecutive_failures = 0;

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            debug!(batch = index + 1, of = batch_count, size = batch.len(), "Sending batch");
            let records: Vec<DeliveryRecord> = join_all(
                batch
                    .iter()
                    .map(|guest| self.dispatcher.deliver(&roster.wedding, guest, &content, &options)),
            )
            .await;

            let attempted = records
                .iter()
                .filter(|r| r.status != DeliveryStatus::Skipped)
                .count();
            let sent = records.iter().filter(|r| r.is_sent()).count();
            for record in &records {
                summary.add(record);
            }

            if sent > 0 {
                consecutive_failures = 0;
            } else if attempted > 0 {
                consecutive_failures += 1;
            }

            let max_failed = self.config.max_failed_batches;
            if max_failed > 0 && consecutive_failures >= max_failed && index + 1 < batch_count {
                error!(
                    failed_batches = consecutive_failures,
                    "Every recipient failed in consecutive batches, aborting announcement"
                );
                for guest in batches[index + 1..].iter().flat_map(|b| b.iter()) {
                    let record = self
                        .dispatcher
                        .skip(&roster.wedding, guest, NotificationKind::Announcement, SkipReason::Aborted)
                        .await;
                    summary.add(&record);
                }
                break;
            }
        }

        self.dispatcher
            .metrics()
            .record_bulk_duration(NotificationKind::Announcement, started.elapsed());
        info!(
            total = summary.total,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Announcement run finished"
        );
        summary
    }
}
