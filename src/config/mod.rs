//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or a
//! numeric knob does not parse. The database URL is wrapped in
//! secrecy::SecretString to prevent log leaks.

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Base URL of the external action gateway (notify, register CRUD, directory, ...).
    pub actions_base_url: Option<String>,
    /// Admin addresses alerted on hard failures.
    pub alert_subscribers: Vec<String>,
    pub scheduler: SchedulerConfig,
    pub requests: RequestLimits,
}

/// Knobs for the ingress pipeline and the daemon loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed daemon tick interval.
    pub poll_interval: Duration,
    /// Pause between ingress queue reads once the queue is drained.
    pub ingress_poll_interval: Duration,
    /// Events allowed per (workflow, template) before the loop guard trips.
    pub max_same_template_events: i64,
    /// Claims older than this are reaped.
    pub stale_lock_after: Duration,
    pub template_cache_ttl: Duration,
    pub ingress_queue: String,
    pub outbound_queue: String,
    /// Visibility timeout (seconds) for pgmq reads on the ingress queue.
    pub visibility_timeout: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            ingress_poll_interval: Duration::from_secs(1),
            max_same_template_events: 50,
            stale_lock_after: Duration::from_secs(60 * 60),
            template_cache_ttl: Duration::from_secs(60),
            ingress_queue: "events".to_string(),
            outbound_queue: "manager".to_string(),
            visibility_timeout: 60,
        }
    }
}

/// Limits for `request` sub-operation fan-out.
#[derive(Debug, Clone)]
pub struct RequestLimits {
    /// Records deleted per bulk-delete attempt.
    pub delete_chunk_size: usize,
    /// Default ceiling on records removed by one bulk delete.
    pub delete_cap: usize,
    /// Register keys allowed to exceed `delete_cap`.
    pub delete_cap_allowlist: HashSet<String>,
    pub concurrency: usize,
    /// Pause between waves of concurrent jobs.
    pub interval: Duration,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            delete_chunk_size: 20,
            delete_cap: 100,
            delete_cap_allowlist: HashSet::new(),
            concurrency: 5,
            interval: Duration::ZERO,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let scheduler_defaults = SchedulerConfig::default();
        let request_defaults = RequestLimits::default();

        let scheduler = SchedulerConfig {
            poll_interval: Duration::from_millis(parsed_var(
                "EVENTS_DAEMON_INTERVAL_MS",
                scheduler_defaults.poll_interval.as_millis() as u64,
            )?),
            ingress_poll_interval: Duration::from_millis(parsed_var(
                "EVENTS_INGRESS_POLL_MS",
                scheduler_defaults.ingress_poll_interval.as_millis() as u64,
            )?),
            max_same_template_events: parsed_var(
                "EVENTS_MAX_SAME_TEMPLATE",
                scheduler_defaults.max_same_template_events,
            )?,
            stale_lock_after: Duration::from_secs(parsed_var(
                "EVENTS_STALE_LOCK_SECS",
                scheduler_defaults.stale_lock_after.as_secs(),
            )?),
            template_cache_ttl: Duration::from_secs(parsed_var(
                "EVENTS_TEMPLATE_CACHE_TTL_SECS",
                scheduler_defaults.template_cache_ttl.as_secs(),
            )?),
            ingress_queue: std::env::var("EVENTS_INGRESS_QUEUE")
                .unwrap_or(scheduler_defaults.ingress_queue),
            outbound_queue: std::env::var("EVENTS_OUTBOUND_QUEUE")
                .unwrap_or(scheduler_defaults.outbound_queue),
            visibility_timeout: parsed_var(
                "EVENTS_VISIBILITY_TIMEOUT_SECS",
                scheduler_defaults.visibility_timeout,
            )?,
        };

        let requests = RequestLimits {
            delete_chunk_size: parsed_var("EVENTS_DELETE_CHUNK", request_defaults.delete_chunk_size)?,
            delete_cap: parsed_var("EVENTS_DELETE_CAP", request_defaults.delete_cap)?,
            delete_cap_allowlist: list_var("EVENTS_DELETE_CAP_ALLOWLIST").into_iter().collect(),
            concurrency: parsed_var("EVENTS_REQUEST_CONCURRENCY", request_defaults.concurrency)?,
            interval: Duration::from_millis(parsed_var("EVENTS_REQUEST_INTERVAL_MS", 0u64)?),
        };

        if requests.delete_chunk_size == 0 || requests.concurrency == 0 {
            return Err(Error::Config(
                "EVENTS_DELETE_CHUNK and EVENTS_REQUEST_CONCURRENCY must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            actions_base_url: std::env::var("ACTIONS_BASE_URL").ok(),
            alert_subscribers: list_var("ALERT_SUBSCRIBERS"),
            scheduler,
            requests,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn list_var(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
