//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using
//! the `clap` crate. Global flags are merged into the configuration as the
//! last `figment` layer, so they win over the file and the environment.

use clap::{Args, Parser, Subcommand};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Guest notifications for wedding websites: invitations, RSVP reminders
/// and announcements over email, SMS and WhatsApp.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log messages instead of sending them.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the wedding, its guests and their invitations come from.
#[derive(Args, Debug, Clone)]
pub struct RosterArgs {
    /// JSON roster with the wedding, events, guests and invitations.
    #[arg(long, value_name = "FILE")]
    pub roster: PathBuf,

    /// Optional CSV guest list merged into the roster.
    #[arg(long, value_name = "FILE")]
    pub guests_csv: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the channel each guest would be notified on.
    Resolve(RosterArgs),

    /// Send invitations.
    Invite {
        #[command(flatten)]
        roster: RosterArgs,
        /// Only invite these guest ids (repeatable). Defaults to everyone.
        #[arg(long = "guest", value_name = "ID")]
        guests: Vec<String>,
    },

    /// Remind guests with unanswered invitations to RSVP.
    Remind(RosterArgs),

    /// Send an announcement to every guest.
    Announce {
        #[command(flatten)]
        roster: RosterArgs,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
    },

    /// Serve the notification API for one or more rosters.
    Serve {
        /// Roster files to load (repeatable).
        #[arg(long = "roster", value_name = "FILE", required = true)]
        rosters: Vec<PathBuf>,
        /// CSV guest lists (repeatable); the n-th is merged into the n-th roster.
        #[arg(long = "guests-csv", value_name = "FILE")]
        guests_csv: Vec<PathBuf>,
        /// Address to listen on, overriding `server.listen_address`.
        #[arg(long, value_name = "ADDR")]
        listen: Option<SocketAddr>,
    },
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        let mut core = Dict::new();
        if let Some(level) = &self.log_level {
            core.insert("log_level".into(), Value::from(level.clone()));
        }
        // Only a present flag overrides; absence must not reset a file value.
        if self.dry_run {
            core.insert("dry_run".into(), Value::from(true));
        }
        if !core.is_empty() {
            dict.insert("core".into(), Value::from(core));
        }

        if let Command::Serve {
            listen: Some(addr), ..
        } = &self.command
        {
            let mut server = Dict::new();
            server.insert("listen_address".into(), Value::from(addr.to_string()));
            dict.insert("server".into(), Value::from(server));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
