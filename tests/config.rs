use clap::Parser;
use rsvp_notify::cli::Cli;
use rsvp_notify::config::{Config, ReminderMode};
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn cli_with(args: &[&str]) -> Cli {
    let mut argv = vec!["rsvp-notify"];
    argv.extend_from_slice(args);
    argv.extend_from_slice(&["resolve", "--roster", "roster.json"]);
    Cli::parse_from(argv)
}

#[test]
#[serial]
fn test_load_full_valid_config() {
    let toml_content = r#"
        [core]
        log_level = "debug"
        default_country_code = "44"
        [delivery]
        max_retries = 4
        initial_backoff_ms = 250
        fallback_enabled = false
        concurrency = 8
        request_timeout_ms = 5000
        [rate_limit]
        max_tracked_weddings = 500
        max_wait_seconds = 30
        [reminders]
        mode = "bulk"
        cooldown_seconds = 3600
        cache_size = 1000
        [announcements]
        batch_size = 25
        batch_delay_ms = 200
        max_failed_batches = 3
        [links]
        rsvp_base_url = "https://weddings.example"
        [providers.resend]
        api_key = "re_test"
        from_address = "hello@weddings.example"
        [providers.twilio]
        account_sid = "AC123"
        auth_token = "secret"
        sms_from = "+15005550006"
        [providers.notificationapi]
        client_id = "client"
        client_secret = "shh"
        [server]
        listen_address = "0.0.0.0:3000"
        [metrics]
        enabled = true
        listen_address = "127.0.0.1:9100"
        [delivery_log]
        path = "/var/log/rsvp-notify/deliveries.jsonl"
    "#;

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    let path = file.path().to_str().unwrap();

    let config = Config::load(&cli_with(&["--config", path])).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.core.default_country_code.as_deref(), Some("44"));
    assert_eq!(config.delivery.max_retries, 4);
    assert_eq!(config.delivery.initial_backoff, Duration::from_millis(250));
    assert!(!config.delivery.fallback_enabled);
    assert_eq!(config.delivery.concurrency, 8);
    assert_eq!(config.delivery.request_timeout, Duration::from_secs(5));
    assert_eq!(config.rate_limit.max_wait, Duration::from_secs(30));
    assert_eq!(config.reminders.mode, ReminderMode::Bulk);
    assert_eq!(config.reminders.cooldown, Duration::from_secs(3600));
    assert_eq!(config.announcements.batch_size, 25);
    assert_eq!(config.announcements.batch_delay, Duration::from_millis(200));
    assert_eq!(config.links.rsvp_base_url, "https://weddings.example");

    let resend = config.providers.resend.unwrap();
    assert_eq!(resend.base_url, "https://api.resend.com");
    let twilio = config.providers.twilio.unwrap();
    assert_eq!(twilio.sms_from.as_deref(), Some("+15005550006"));
    assert_eq!(twilio.whatsapp_from, None);
    let napi = config.providers.notificationapi.unwrap();
    assert_eq!(napi.reminder_notification_id, "rsvp_reminder");

    assert_eq!(config.server.listen_address.port(), 3000);
    assert!(config.metrics.enabled);
    assert!(config.delivery_log.path.is_some());
}

#[test]
#[serial]
fn test_defaults_without_file() {
    let config = Config::load(&cli_with(&[])).unwrap();
    assert_eq!(config.core.log_level, "info");
    assert!(!config.core.dry_run);
    assert_eq!(config.delivery.max_retries, 2);
    assert!(config.delivery.fallback_enabled);
    assert_eq!(config.reminders.mode, ReminderMode::Direct);
    assert_eq!(config.announcements.batch_size, 50);
    assert!(config.providers.resend.is_none());
    assert!(!config.metrics.enabled);
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    let err = Config::load(&cli_with(&["--config", "/definitely/not/here.toml"])).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
#[serial]
fn test_env_overrides_file_and_cli_overrides_env() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "[core]\nlog_level = \"warn\"\n[delivery]\nmax_retries = 1\n"
    )
    .unwrap();
    let path = file.path().to_str().unwrap().to_string();

    std::env::set_var("RSVP_NOTIFY_DELIVERY__MAX_RETRIES", "7");
    std::env::set_var("RSVP_NOTIFY_CORE__LOG_LEVEL", "error");
    let config = Config::load(&cli_with(&["--config", &path, "--log-level", "trace", "--dry-run"]));
    std::env::remove_var("RSVP_NOTIFY_DELIVERY__MAX_RETRIES");
    std::env::remove_var("RSVP_NOTIFY_CORE__LOG_LEVEL");

    let config = config.unwrap();
    assert_eq!(config.delivery.max_retries, 7);
    assert_eq!(config.core.log_level, "trace");
    assert!(config.core.dry_run);
}

#[test]
#[serial]
fn test_numeric_looking_env_values_stay_strings() {
    std::env::set_var("RSVP_NOTIFY_CORE__DEFAULT_COUNTRY_CODE", "44");
    std::env::set_var("RSVP_NOTIFY_PROVIDERS__TWILIO__ACCOUNT_SID", "AC123");
    std::env::set_var("RSVP_NOTIFY_PROVIDERS__TWILIO__AUTH_TOKEN", "secret");
    std::env::set_var("RSVP_NOTIFY_PROVIDERS__TWILIO__SMS_FROM", "+14155550000");
    let config = Config::load(&cli_with(&[]));
    for key in [
        "RSVP_NOTIFY_CORE__DEFAULT_COUNTRY_CODE",
        "RSVP_NOTIFY_PROVIDERS__TWILIO__ACCOUNT_SID",
        "RSVP_NOTIFY_PROVIDERS__TWILIO__AUTH_TOKEN",
        "RSVP_NOTIFY_PROVIDERS__TWILIO__SMS_FROM",
    ] {
        std::env::remove_var(key);
    }

    let config = config.unwrap();
    assert_eq!(config.core.default_country_code.as_deref(), Some("44"));
    let twilio = config.providers.twilio.unwrap();
    assert_eq!(twilio.account_sid, "AC123");
    assert_eq!(twilio.sms_from.as_deref(), Some("+14155550000"));
    assert_eq!(twilio.whatsapp_from, None);
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[announcements]\nbatch_size = 0\n").unwrap();
    let path = file.path().to_str().unwrap();
    let err = Config::load(&cli_with(&["--config", path])).unwrap_err();
    assert!(err.to_string().contains("batch_size"));

    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "[providers.resend]\napi_key = \"\"\nfrom_address = \"a@b.example\"\n"
    )
    .unwrap();
    let path = file.path().to_str().unwrap();
    let err = Config::load(&cli_with(&["--config", path])).unwrap_err();
    assert!(err.to_string().contains("api_key"));
}

#[test]
#[serial]
fn test_serve_listen_flag_overrides_server_address() {
    let cli = Cli::parse_from([
        "rsvp-notify",
        "serve",
        "--roster",
        "a.json",
        "--listen",
        "127.0.0.1:4444",
    ]);
    let config = Config::load(&cli).unwrap();
    assert_eq!(config.server.listen_address.port(), 4444);
}
