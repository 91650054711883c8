//! Loading the wedding, its events, guests and invitations.
//!
//! The roster is the crate's only input: a JSON document exported from the
//! wedding site, optionally topped up with a CSV guest list.

use crate::core::{Channel, Event, Guest, Invitation, InvitationStatus, NotificationSettings, Wedding};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid roster JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid guest CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid roster: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Roster {
    pub wedding: Wedding,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub guests: Vec<Guest>,
    #[serde(default)]
    pub invitations: Vec<Invitation>,
}

#[derive(Debug, Deserialize)]
struct CsvGuest {
    id: String,
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    preferred_channel: Option<String>,
    #[serde(default)]
    opted_out: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Roster {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, RosterError> {
        let roster: Roster = serde_json::from_str(data)?;
        roster.validate()?;
        Ok(roster)
    }

    /// Merges guests from a CSV file. Rows with an existing guest id replace
    /// that guest; new ids are appended.
    pub fn with_guests_csv(self, path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| RosterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.with_guests_csv_reader(file)
    }

    pub fn with_guests_csv_reader<R: std::io::Read>(mut self, reader: R) -> Result<Self, RosterError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut merged = 0;
        for row in csv_reader.deserialize::<CsvGuest>() {
            let row = row?;
            let preferred_channel = match non_empty(row.preferred_channel) {
                Some(raw) => Some(raw.parse::<Channel>().map_err(|e| {
                    RosterError::Invalid(format!("guest {}: {}", row.id, e))
                })?),
                None => None,
            };
            let guest = Guest {
                id: row.id,
                first_name: row.first_name,
                last_name: non_empty(row.last_name).unwrap_or_default(),
                email: non_empty(row.email),
                phone: non_empty(row.phone),
                preferred_channel,
                opted_out: row.opted_out.unwrap_or(false),
            };
            match self.guests.iter_mut().find(|g| g.id == guest.id) {
                Some(existing) => *existing = guest,
                None => self.guests.push(guest),
            }
            merged += 1;
        }
        debug!(merged, total = self.guests.len(), "Merged CSV guests into roster");
        self.validate()?;
        Ok(self)
    }

    /// Checks referential integrity: unique guest ids, and invitations that
    /// point at known guests and events.
    pub fn validate(&self) -> Result<(), RosterError> {
        if self.wedding.id.trim().is_empty() {
            return Err(RosterError::Invalid("wedding id must not be empty".into()));
        }
        let mut guest_ids = HashSet::new();
        for guest in &self.guests {
            if !guest_ids.insert(guest.id.as_str()) {
                return Err(RosterError::Invalid(format!("duplicate guest id '{}'", guest.id)));
            }
        }
        let event_ids: HashSet<&str> = self.events.iter().map(|e| e.id.as_str()).collect();
        for invitation in &self.invitations {
            if !guest_ids.contains(invitation.guest_id.as_str()) {
                return Err(RosterError::Invalid(format!(
                    "invitation references unknown guest '{}'",
                    invitation.guest_id
                )));
            }
            if !event_ids.contains(invitation.event_id.as_str()) {
                return Err(RosterError::Invalid(format!(
                    "invitation references unknown event '{}'",
                    invitation.event_id
                )));
            }
        }
        Ok(())
    }

    pub fn guest(&self, guest_id: &str) -> Option<&Guest> {
        self.guests.iter().find(|g| g.id == guest_id)
    }

    pub fn invitations_for<'a>(&'a self, guest_id: &'a str) -> impl Iterator<Item = &'a Invitation> + 'a {
        self.invitations.iter().filter(move |i| i.guest_id == guest_id)
    }

    pub fn event_name(&self, event_id: &str) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.id == event_id)
            .map(|e| e.name.as_str())
    }

    /// Names of the events the guest is invited to, in invitation order.
    pub fn event_names_for(&self, guest_id: &str) -> Vec<String> {
        self.invitations_for(guest_id)
            .filter_map(|i| self.event_name(&i.event_id).map(String::from))
            .collect()
    }

    /// Invitations the guest has not answered yet.
    pub fn pending_invitations<'a>(&'a self, guest_id: &'a str) -> Vec<&'a Invitation> {
        self.invitations_for(guest_id)
            .filter(|i| i.status == InvitationStatus::Pending)
            .collect()
    }
}

/// The rosters served by the HTTP API, keyed by wedding id.
///
/// Reads are lock-free; settings updates swap in a whole new map.
pub struct RosterStore {
    rosters: ArcSwap<HashMap<String, Arc<Roster>>>,
}

impl RosterStore {
    pub fn new(rosters: Vec<Roster>) -> Self {
        let map = rosters
            .into_iter()
            .map(|r| (r.wedding.id.clone(), Arc::new(r)))
            .collect();
        Self {
            rosters: ArcSwap::from_pointee(map),
        }
    }

    pub fn get(&self, wedding_id: &str) -> Option<Arc<Roster>> {
        self.rosters.load().get(wedding_id).cloned()
    }

    pub fn wedding_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rosters.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replaces a wedding's notification settings. Returns `false` for an
    /// unknown wedding.
    pub fn update_settings(&self, wedding_id: &str, settings: NotificationSettings) -> bool {
        let mut found = false;
        self.rosters.rcu(|current| {
            let mut next = HashMap::clone(current);
            found = false;
            if let Some(roster) = next.get_mut(wedding_id) {
                let mut updated = Roster::clone(roster);
                updated.wedding.settings = settings.clone();
                *roster = Arc::new(updated);
                found = true;
            }
            next
        });
        found
    }
}
