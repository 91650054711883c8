//! Shared fixtures for integration tests.

#![allow(dead_code)]

use rsvp_notify::app::{App, Services};
use rsvp_notify::config::Config;
use rsvp_notify::delivery::InMemoryDeliveryLog;
use rsvp_notify::internal_metrics::Metrics;
use rsvp_notify::providers::ProviderSet;
use rsvp_notify::roster::Roster;
use rsvp_notify::Channel;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use rsvp_notify::providers::test_utils::FakeProvider;

/// One wedding, two events, and guests covering every channel situation.
///
/// - g1 Carla: email and phone, ceremony pending, reception accepted
/// - g2 Dan: phone only, prefers SMS, pending
/// - g3 Eve: email only, everything answered
/// - g4 Finn: opted out, pending
/// - g5 Gus: no contact details, pending
pub const ROSTER_JSON: &str = r#"{
    "wedding": {
        "id": "w1",
        "slug": "ana-and-ben",
        "couple_names": "Ana & Ben",
        "settings": { "sender_name": "Ana+Ben" }
    },
    "events": [
        { "id": "e1", "name": "Ceremony" },
        { "id": "e2", "name": "Reception" }
    ],
    "guests": [
        { "id": "g1", "first_name": "Carla", "last_name": "Diaz", "email": "Carla@Example.com", "phone": "+1 (415) 555-0101" },
        { "id": "g2", "first_name": "Dan", "phone": "+14155550102", "preferred_channel": "sms" },
        { "id": "g3", "first_name": "Eve", "email": "eve@example.com" },
        { "id": "g4", "first_name": "Finn", "email": "finn@example.com", "opted_out": true },
        { "id": "g5", "first_name": "Gus" }
    ],
    "invitations": [
        { "guest_id": "g1", "event_id": "e1", "token": "tok-carla" },
        { "guest_id": "g1", "event_id": "e2", "token": "tok-carla", "status": "accepted" },
        { "guest_id": "g2", "event_id": "e1", "token": "tok-dan" },
        { "guest_id": "g3", "event_id": "e1", "token": "tok-eve", "status": "declined" },
        { "guest_id": "g4", "event_id": "e1", "token": "tok-finn" },
        { "guest_id": "g5", "event_id": "e1", "token": "tok-gus" }
    ]
}"#;

pub fn roster() -> Roster {
    Roster::from_json_str(ROSTER_JSON).unwrap()
}

/// Writes the fixture roster to a file inside `dir`.
pub fn write_roster(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("roster.json");
    std::fs::write(&path, ROSTER_JSON).unwrap();
    path
}

/// Fake providers for every channel plus the bulk service.
pub struct FakeProviders {
    pub email: FakeProvider,
    pub sms: FakeProvider,
    pub whatsapp: FakeProvider,
    pub bulk: FakeProvider,
}

impl FakeProviders {
    pub fn new() -> Self {
        Self {
            email: FakeProvider::new("email"),
            sms: FakeProvider::new("sms"),
            whatsapp: FakeProvider::new("whatsapp"),
            bulk: FakeProvider::new("bulk"),
        }
    }

    pub fn set(&self) -> ProviderSet {
        ProviderSet::new()
            .with(Channel::Email, Arc::new(self.email.clone()))
            .with(Channel::Sms, Arc::new(self.sms.clone()))
            .with(Channel::WhatsApp, Arc::new(self.whatsapp.clone()))
            .with_bulk(Arc::new(self.bulk.clone()))
    }
}

/// A configuration with fast retries and no batch pauses.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.delivery.initial_backoff = Duration::from_millis(1);
    config.delivery.concurrency = 4;
    config.announcements.batch_delay = Duration::ZERO;
    config.links.rsvp_base_url = "https://weddings.example".to_string();
    config
}

pub fn build_services(config: Config, providers: ProviderSet) -> (Services, Arc<InMemoryDeliveryLog>) {
    let log = Arc::new(InMemoryDeliveryLog::new());
    let services = App::builder(config)
        .providers_override(providers)
        .delivery_log_override(log.clone())
        .metrics_override(Metrics::new_for_test())
        .build_oneshot();
    (services, log)
}
