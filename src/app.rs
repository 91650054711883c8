//! The main application logic, decoupled from the entry point.

use crate::{
    api::{ApiServer, ApiState},
    config::{Config, ReminderMode},
    core::DeliveryLog,
    delivery::{InMemoryDeliveryLog, JsonLinesDeliveryLog},
    formatting::PlainTextFormatter,
    internal_metrics::{Metrics, MetricsBuilder},
    notification::{AnnouncementSender, DispatchPolicy, Dispatcher, ReminderCooldown, ReminderSender},
    providers::ProviderSet,
    rate_limit::RateLimiter,
    roster::{Roster, RosterStore},
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// The notification services wired together from one configuration.
#[derive(Clone)]
pub struct Services {
    pub dispatcher: Dispatcher,
    pub reminders: ReminderSender,
    pub announcements: AnnouncementSender,
}

impl Services {
    pub fn delivery_log(&self) -> &Arc<dyn DeliveryLog> {
        self.dispatcher.delivery_log()
    }

    pub fn into_api_state(self, rosters: RosterStore) -> ApiState {
        ApiState {
            rosters,
            dispatcher: self.dispatcher,
            reminders: self.reminders,
            announcements: self.announcements,
        }
    }
}

/// A handle to the running `serve` application.
pub struct App {
    task_manager: TaskManager,
    api_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown().await;

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the application.
///
/// Separates constructing the services from running them, and lets tests
/// swap out providers, the delivery log and metrics.
pub struct AppBuilder {
    config: Config,
    providers_override: Option<ProviderSet>,
    delivery_log_override: Option<Arc<dyn DeliveryLog>>,
    metrics_override: Option<Metrics>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            providers_override: None,
            delivery_log_override: None,
            metrics_override: None,
        }
    }

    /// Overrides the delivery providers for testing.
    pub fn providers_override(mut self, providers: ProviderSet) -> Self {
        self.providers_override = Some(providers);
        self
    }

    /// Overrides the delivery log for testing.
    pub fn delivery_log_override(mut self, log: Arc<dyn DeliveryLog>) -> Self {
        self.delivery_log_override = Some(log);
        self
    }

    /// Overrides the metrics system for testing.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    fn providers(&mut self) -> ProviderSet {
        if let Some(providers) = self.providers_override.take() {
            return providers;
        }
        if self.config.core.dry_run {
            info!("Dry run: messages will be logged, not sent");
            return ProviderSet::dry_run();
        }
        let providers =
            ProviderSet::from_config(&self.config.providers, self.config.delivery.request_timeout);
        if providers.configured_channels().is_empty() {
            warn!("No delivery providers configured; every send will fail");
        }
        if self.config.reminders.mode == ReminderMode::Bulk && providers.bulk().is_none() {
            warn!("reminders.mode is 'bulk' but providers.notificationapi is not configured");
        }
        providers
    }

    fn delivery_log(&mut self) -> Arc<dyn DeliveryLog> {
        if let Some(log) = self.delivery_log_override.take() {
            return log;
        }
        match &self.config.delivery_log.path {
            Some(path) => {
                debug!(path = %path.display(), "Appending delivery records to file");
                Arc::new(JsonLinesDeliveryLog::new(path))
            }
            None => Arc::new(InMemoryDeliveryLog::new()),
        }
    }

    /// Builds the dispatcher and bulk senders.
    pub fn build_services(mut self, metrics: Arc<Metrics>) -> Services {
        let providers = self.providers();
        let delivery_log = self.delivery_log();
        let config = &self.config;

        let dispatcher = Dispatcher::new(
            providers,
            Arc::new(PlainTextFormatter::new(config.links.rsvp_base_url.clone())),
            RateLimiter::new(config.rate_limit.max_tracked_weddings),
            delivery_log,
            metrics,
            DispatchPolicy::from_config(config),
        );
        let cooldown = ReminderCooldown::new(config.reminders.cooldown, config.reminders.cache_size);
        let reminders = ReminderSender::new(dispatcher.clone(), cooldown, config.reminders.mode);
        let announcements = AnnouncementSender::new(dispatcher.clone(), config.announcements.clone());

        Services {
            dispatcher,
            reminders,
            announcements,
        }
    }

    /// Builds the one-shot services used by the CLI subcommands.
    pub fn build_oneshot(mut self) -> Services {
        let metrics = self.metrics_override.take().unwrap_or_else(Metrics::disabled);
        self.build_services(Arc::new(metrics))
    }

    /// Starts the API and metrics servers for the given rosters.
    #[instrument(skip_all)]
    pub async fn build(mut self, rosters: Vec<Roster>, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let task_manager = TaskManager::new(shutdown_rx);

        let (metrics, metrics_server_info) = match self.metrics_override.take() {
            Some(m) => (m, None),
            None => MetricsBuilder::new(self.config.metrics.clone()).build(task_manager.get_shutdown_rx()),
        };
        let metrics_addr = if let Some((server, addr)) = metrics_server_info {
            info!(%addr, "Metrics server listening");
            task_manager.spawn("MetricsServer", server.run());
            Some(addr)
        } else {
            None
        };

        let listen_address = self.config.server.listen_address;
        let services = self.build_services(Arc::new(metrics));
        let store = RosterStore::new(rosters);
        info!(weddings = ?store.wedding_ids(), "Rosters loaded");

        let listener = TcpListener::bind(listen_address)
            .await
            .with_context(|| format!("binding API server to {}", listen_address))?;
        let api_addr = listener.local_addr()?;
        let server = ApiServer::new(
            listener,
            Arc::new(services.into_api_state(store)),
            task_manager.get_shutdown_rx(),
        );
        task_manager.spawn("ApiServer", server.run());
        info!(addr = %api_addr, "API server listening");

        Ok(App {
            task_manager,
            api_addr,
            metrics_addr,
        })
    }
}
