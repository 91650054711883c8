//! rsvp-notify - guest notifications for wedding websites.

use anyhow::{bail, Result};
use clap::Parser;
use rsvp_notify::{
    app::App,
    cli::{Cli, Command, RosterArgs},
    config::Config,
    notification::Announcement,
    roster::Roster,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_roster(args: &RosterArgs) -> Result<Roster> {
    let mut roster = Roster::from_json_file(&args.roster)?;
    if let Some(csv) = &args.guests_csv {
        roster = roster.with_guests_csv(csv)?;
    }
    info!(
        wedding_id = %roster.wedding.id,
        guests = roster.guests.len(),
        invitations = roster.invitations.len(),
        "Roster loaded"
    );
    Ok(roster)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ResolvedGuest<'a> {
    guest_id: &'a str,
    name: String,
    channel: Option<rsvp_notify::Channel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_tracing("error");
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };
    init_tracing(&config.core.log_level);

    info!("rsvp-notify starting up...");
    info!(
        dry_run = config.core.dry_run,
        max_retries = config.delivery.max_retries,
        fallback = config.delivery.fallback_enabled,
        concurrency = config.delivery.concurrency,
        reminder_mode = ?config.reminders.mode,
        "Configuration loaded"
    );

    match &cli.command {
        Command::Resolve(args) => {
            let roster = load_roster(args)?;
            let services = App::builder(config).build_oneshot();
            let resolved: Vec<ResolvedGuest> = roster
                .guests
                .iter()
                .map(|guest| ResolvedGuest {
                    guest_id: &guest.id,
                    name: guest.display_name(),
                    channel: services.dispatcher.resolve_channel(&roster.wedding, guest),
                })
                .collect();
            print_json(&resolved)?;
        }
        Command::Invite { roster, guests } => {
            let roster = load_roster(roster)?;
            let services = App::builder(config).build_oneshot();
            let ids = (!guests.is_empty()).then_some(guests.as_slice());
            let summary = services.dispatcher.send_invitations(&roster, ids).await;
            print_json(&summary)?;
        }
        Command::Remind(args) => {
            let roster = load_roster(args)?;
            let services = App::builder(config).build_oneshot();
            let summary = services.reminders.send_reminders(&roster).await;
            print_json(&summary)?;
        }
        Command::Announce {
            roster,
            subject,
            body,
        } => {
            let roster = load_roster(roster)?;
            let services = App::builder(config).build_oneshot();
            let announcement = Announcement {
                subject: subject.clone(),
                body: body.clone(),
            };
            let summary = services.announcements.send(&roster, &announcement).await;
            print_json(&summary)?;
        }
        Command::Serve {
            rosters,
            guests_csv,
            ..
        } => {
            if guests_csv.len() > rosters.len() {
                bail!(
                    "{} guest lists given for {} rosters",
                    guests_csv.len(),
                    rosters.len()
                );
            }
            let rosters = rosters
                .iter()
                .enumerate()
                .map(|(i, path)| {
                    load_roster(&RosterArgs {
                        roster: path.clone(),
                        guests_csv: guests_csv.get(i).cloned(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            serve(config, rosters).await?;
        }
    }
    Ok(())
}

async fn serve(config: Config, rosters: Vec<Roster>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(rosters, shutdown_rx).await?;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Ctrl-C received, shutting down...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("rsvp-notify shut down.");
    Ok(())
}
