//! # Internal Metrics Module
//!
//! This module provides the infrastructure for collecting and exposing
//! delivery metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: The entry point for initializing the metrics system.
//!   It sets up the Prometheus recorder and constructs the `Metrics` handle
//!   together with the server that exposes it.
//!
//! - **`Metrics`**: A lightweight, cloneable struct that serves as the public
//!   API for the rest of the application. It provides high-level methods for
//!   updating the predefined delivery metrics.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.

use crate::config::MetricsConfig;
use crate::core::{Channel, NotificationKind, SkipReason};
use crate::internal_metrics::server::MetricsServer;
use metrics::{Counter, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

pub mod server;

/// The public API for the metrics system.
#[derive(Clone)]
pub struct Metrics {
    pub provider_retries_total: Counter,
    pub channel_fallbacks_total: Counter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!("notifications_sent_total", Unit::Count, "Notifications accepted by a provider, labeled by channel and kind.");
        metrics::describe_counter!("notifications_failed_total", Unit::Count, "Notifications that failed on every candidate channel, labeled by kind.");
        metrics::describe_counter!("notifications_skipped_total", Unit::Count, "Guests skipped without a send attempt, labeled by reason.");
        metrics::describe_counter!("provider_errors_total", Unit::Count, "Provider errors, labeled by provider and whether they were transient.");
        metrics::describe_counter!("provider_retries_total", Unit::Count, "Retries of a provider call after a transient failure.");
        metrics::describe_counter!("channel_fallbacks_total", Unit::Count, "Times delivery moved on to the next available channel.");
        metrics::describe_histogram!("provider_send_duration_seconds", Unit::Seconds, "Latency of a single provider call.");
        metrics::describe_histogram!("bulk_send_duration_seconds", Unit::Seconds, "Duration of a whole reminder or announcement run.");

        Self {
            provider_retries_total: metrics::counter!("provider_retries_total"),
            channel_fallbacks_total: metrics::counter!("channel_fallbacks_total"),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    pub fn disabled() -> Self {
        Self {
            provider_retries_total: Counter::noop(),
            channel_fallbacks_total: Counter::noop(),
        }
    }

    pub fn increment_sent(&self, channel: Channel, kind: NotificationKind) {
        metrics::counter!(
            "notifications_sent_total",
            "channel" => channel.as_str(),
            "kind" => kind.as_str()
        )
        .increment(1);
    }

    pub fn increment_failed(&self, kind: NotificationKind) {
        metrics::counter!("notifications_failed_total", "kind" => kind.as_str()).increment(1);
    }

    pub fn increment_skipped(&self, reason: SkipReason) {
        metrics::counter!("notifications_skipped_total", "reason" => reason.as_str()).increment(1);
    }

    pub fn increment_provider_error(&self, provider: &str, transient: bool) {
        metrics::counter!(
            "provider_errors_total",
            "provider" => provider.to_string(),
            "transient" => if transient { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn record_send_duration(&self, provider: &str, duration: Duration) {
        metrics::histogram!("provider_send_duration_seconds", "provider" => provider.to_string())
            .record(duration.as_secs_f64());
    }

    pub fn record_bulk_duration(&self, kind: NotificationKind, duration: Duration) {
        metrics::histogram!("bulk_send_duration_seconds", "kind" => kind.as_str())
            .record(duration.as_secs_f64());
    }

    /// Creates a `Metrics` instance suitable for testing. Without an
    /// installed recorder the `metrics` macros are no-ops.
    pub fn new_for_test() -> Self {
        Self::new()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Initializes the metrics system and returns a `Metrics` handle and an
    /// optional `MetricsServer` with its bound address.
    ///
    /// If metrics are disabled, or the recorder cannot be installed, this
    /// returns a disabled `Metrics` instance and `None` for the server.
    pub fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0],
        ) {
            Ok(builder) => builder,
            Err(e) => {
                error!("Invalid histogram buckets: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        // The listener must be non-blocking to be used with Tokio.
        if let Err(e) = listener.set_nonblocking(true) {
            error!("Failed to make metrics listener non-blocking: {}", e);
            return (Metrics::disabled(), None);
        }
        let listener = match TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to prepare metrics listener: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, shutdown_rx);
        (metrics, Some((server, addr)))
    }
}
