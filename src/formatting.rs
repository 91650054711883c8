// src/formatting.rs

use crate::core::{Channel, Guest, NotificationKind, Wedding};
use crate::providers::twilio::MAX_BODY_CHARS;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// What a notification says, before it is shaped for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageContent {
    Invitation {
        token: String,
        events: Vec<String>,
    },
    Reminder {
        token: String,
        pending_events: Vec<String>,
    },
    Announcement {
        subject: String,
        body: String,
    },
}

impl MessageContent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            MessageContent::Invitation { .. } => NotificationKind::Invitation,
            MessageContent::Reminder { .. } => NotificationKind::RsvpReminder,
            MessageContent::Announcement { .. } => NotificationKind::Announcement,
        }
    }
}

/// Subject and text for one guest on one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedText {
    pub subject: Option<String>,
    pub body: String,
}

/// A trait for turning message content into channel-ready text.
pub trait MessageFormatter: Send + Sync {
    fn compose(
        &self,
        wedding: &Wedding,
        guest: &Guest,
        channel: Channel,
        content: &MessageContent,
    ) -> ComposedText;
}

/// Plain-text messages with a tokenized RSVP link.
pub struct PlainTextFormatter {
    rsvp_base_url: String,
}

impl PlainTextFormatter {
    pub fn new(rsvp_base_url: impl Into<String>) -> Self {
        Self {
            rsvp_base_url: rsvp_base_url.into(),
        }
    }

    pub fn rsvp_link(&self, wedding: &Wedding, token: &str) -> String {
        let base = format!("{}/{}/rsvp", self.rsvp_base_url.trim_end_matches('/'), wedding.slug);
        match Url::parse(&base) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("token", token);
                url.to_string()
            }
            Err(_) => format!("{}?token={}", base, token),
        }
    }

    fn text(&self, wedding: &Wedding, guest: &Guest, content: &MessageContent) -> (Option<String>, String) {
        match content {
            MessageContent::Invitation { token, events } => {
                let subject = format!("You're invited to celebrate {}", wedding.couple_names);
                let mut body = format!(
                    "Dear {},\n\n{} would love for you to join them",
                    guest.first_name, wedding.couple_names
                );
                if events.is_empty() {
                    body.push('.');
                } else {
                    body.push_str(&format!(" at: {}.", join_names(events)));
                }
                body.push_str(&format!(
                    "\n\nPlease let us know if you can make it: {}",
                    self.rsvp_link(wedding, token)
                ));
                (Some(subject), body)
            }
            MessageContent::Reminder { token, pending_events } => {
                let subject = format!("Reminder: please RSVP for {}", wedding.couple_names);
                let mut body = format!("Hi {}, we haven't heard back from you", guest.first_name);
                if !pending_events.is_empty() {
                    body.push_str(&format!(" about {}", join_names(pending_events)));
                }
                body.push_str(&format!(
                    ". Please RSVP here: {}",
                    self.rsvp_link(wedding, token)
                ));
                (Some(subject), body)
            }
            MessageContent::Announcement { subject, body } => (
                Some(subject.clone()),
                format!("Hi {},\n\n{}", guest.first_name, body),
            ),
        }
    }
}

impl MessageFormatter for PlainTextFormatter {
    fn compose(
        &self,
        wedding: &Wedding,
        guest: &Guest,
        channel: Channel,
        content: &MessageContent,
    ) -> ComposedText {
        let (subject, body) = self.text(wedding, guest, content);
        match channel {
            Channel::Email => ComposedText { subject, body },
            Channel::Sms | Channel::WhatsApp => {
                let mut text = format!("[{}] {}", wedding.sender_name(), body);
                if channel == Channel::Sms && text.chars().count() > MAX_BODY_CHARS {
                    text = text.chars().take(MAX_BODY_CHARS - 1).collect();
                    text.push('…');
                }
                ComposedText {
                    subject: None,
                    body: text,
                }
            }
        }
    }
}

/// "A", "A and B", "A, B and C".
fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
