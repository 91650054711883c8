//! RSVP reminders for guests who have not answered yet.

use super::dispatcher::{DeliverOptions, Dispatcher};
use super::{BulkSummary, ReminderCooldown};
use crate::config::ReminderMode;
use crate::core::{DeliveryRecord, Guest, Invitation, NotificationKind, SkipReason};
use crate::formatting::MessageContent;
use crate::roster::Roster;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use itertools::{Either, Itertools};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Sends RSVP reminders across a wedding's roster.
#[derive(Clone)]
pub struct ReminderSender {
    dispatcher: Dispatcher,
    cooldown: ReminderCooldown,
    mode: ReminderMode,
}

impl ReminderSender {
    pub fn new(dispatcher: Dispatcher, cooldown: ReminderCooldown, mode: ReminderMode) -> Self {
        Self {
            dispatcher,
            cooldown,
            mode,
        }
    }

    /// Reminds every guest with at least one pending invitation.
    ///
    /// Guests who answered every invitation, or were reminded within the
    /// cooldown, are counted as skipped but not logged. Each due guest is
    /// claimed before sending, so overlapping runs for the same wedding
    /// skip them. A failed guest does not stop the run and its claim is
    /// released for the next one.
    #[instrument(skip_all, fields(wedding_id = %roster.wedding.id, mode = ?self.mode))]
    pub async fn send_reminders(&self, roster: &Roster) -> BulkSummary {
        let started = Instant::now();
        let mut summary = BulkSummary::default();

        let (pending, answered): (Vec<(&Guest, Vec<&Invitation>)>, Vec<&Guest>) = roster
            .guests
            .iter()
            .filter(|guest| roster.invitations_for(&guest.id).next().is_some())
            .partition_map(|guest| {
                let pending = roster.pending_invitations(&guest.id);
                if pending.is_empty() {
                    Either::Right(guest)
                } else {
                    Either::Left((guest, pending))
                }
            });
        for _ in &answered {
            summary.add_skip(SkipReason::AlreadyResponded);
        }

        let mut due = Vec::with_capacity(pending.len());
        for (guest, invitations) in pending {
            if self.cooldown.try_claim(&roster.wedding.id, &guest.id).await {
                due.push((guest, invitations));
            } else {
                debug!(guest_id = %guest.id, "Reminded recently, skipping");
                summary.add_skip(SkipReason::RecentlyReminded);
            }
        }

        let options = self.options();
        let sends: Vec<BoxFuture<'_, DeliveryRecord>> = due
            .into_iter()
            .map(|(guest, invitations)| self.remind(roster, guest, invitations, &options).boxed())
            .collect();
        let records: Vec<DeliveryRecord> = stream::iter(sends)
            .buffer_unordered(self.dispatcher.policy().concurrency)
            .collect()
            .await;
        for record in &records {
            summary.add(record);
        }

        self.dispatcher
            .metrics()
            .record_bulk_duration(NotificationKind::RsvpReminder, started.elapsed());
        info!(
            total = summary.total,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Reminder run finished"
        );
        summary
    }

    fn options(&self) -> DeliverOptions {
        let mut options = DeliverOptions::bulk();
        if self.mode == ReminderMode::Bulk {
            match self.dispatcher.providers().bulk() {
                Some(provider) => options.via = Some(provider),
                None => warn!("Bulk reminder mode without a bulk provider, sending directly"),
            }
        }
        options
    }

    async fn remind(
        &self,
        roster: &Roster,
        guest: &Guest,
        invitations: Vec<&Invitation>,
        options: &DeliverOptions,
    ) -> DeliveryRecord {
        let token = invitations
            .first()
            .map(|i| i.token.clone())
            .unwrap_or_default();
        let pending_events = invitations
            .iter()
            .filter_map(|i| roster.event_name(&i.event_id).map(String::from))
            .collect();
        let content = MessageContent::Reminder {
            token,
            pending_events,
        };

        let record = self
            .dispatcher
            .deliver(&roster.wedding, guest, &content, options)
            .await;
        if !record.is_sent() {
            self.cooldown.release(&roster.wedding.id, &guest.id).await;
        }
        record
    }
}
