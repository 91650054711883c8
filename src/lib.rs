//! rsvp-notify - guest notifications for wedding websites
//!
//! This library picks one delivery channel per guest, sends invitations,
//! RSVP reminders and announcements through email, SMS and WhatsApp
//! providers, and records the outcome of every notification.

pub mod api;
pub mod app;
pub mod channel;
pub mod cli;
pub mod config;
pub mod contact;
pub mod core;
pub mod delivery;
pub mod formatting;
pub mod internal_metrics;
pub mod notification;
pub mod providers;
pub mod rate_limit;
pub mod roster;
pub mod task_manager;

// Re-export core types for convenience
pub use crate::core::*;
