use crate::endpoint::EndpointAddr;
use crate::error::{Error, Result};
use crate::registry::DEFAULT_UNKNOWN_CLIENT_CAPACITY;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Coordinator settings, loaded from the environment.
///
/// Passed through the coordinator constructor; nothing reads ambient state
/// after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// The configured Redis pool. At least two endpoints.
    pub redis_servers: Vec<EndpointAddr>,
    /// Redis URL of the control bus (Pub/Sub).
    pub bus_url: String,
    /// Expected client ids. May be empty.
    pub client_ids: Vec<String>,
    /// Consecutive failed master probes before escalation.
    pub master_retries: u32,
    /// Interval between master liveness checks.
    pub watcher_interval: Duration,
    /// How long an invalidation round may wait for client acks.
    pub invalidation_timeout: Duration,
    /// Age past which an expected client counts as unresponsive.
    pub client_dead_threshold: Duration,
    /// Deadline for a single Redis probe or admin command.
    pub probe_timeout: Duration,
    /// Path of the one-line master record.
    pub master_file: PathBuf,
    /// Port of the status/metrics HTTP server.
    pub port: u16,
    /// Cap on retained unknown client ids.
    pub unknown_client_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_servers: Vec::new(),
            bus_url: "redis://127.0.0.1:6379".to_string(),
            client_ids: Vec::new(),
            master_retries: 3,
            watcher_interval: Duration::from_secs(10),
            invalidation_timeout: Duration::from_secs(10),
            client_dead_threshold: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(1),
            master_file: PathBuf::from("redmaster.master"),
            port: 3000,
            unknown_client_capacity: DEFAULT_UNKNOWN_CLIENT_CAPACITY,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Collects every problem before failing so a misconfigured deployment
    /// reports all of them at once.
    pub fn from_env() -> Result<Self> {
        let mut errors = Vec::new();
        let defaults = Settings::default();

        let redis_servers = match env::var("REDIS_SERVERS") {
            Ok(raw) => match parse_server_list(&raw) {
                Ok(servers) => servers,
                Err(e) => {
                    errors.push(e.to_string());
                    Vec::new()
                }
            },
            Err(_) => {
                errors.push("REDIS_SERVERS must be set (comma-separated host:port list)".into());
                Vec::new()
            }
        };

        let bus_url = match env::var("BUS_URL") {
            Ok(url) => url,
            Err(_) => {
                errors.push("BUS_URL must be set (Redis URL of the control bus)".into());
                String::new()
            }
        };

        let client_ids = env::var("CLIENT_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let settings = Self {
            redis_servers,
            bus_url,
            client_ids,
            master_retries: env_parse("MASTER_RETRIES", defaults.master_retries, &mut errors),
            watcher_interval: Duration::from_secs(env_parse(
                "WATCHER_INTERVAL_SECS",
                defaults.watcher_interval.as_secs(),
                &mut errors,
            )),
            invalidation_timeout: Duration::from_secs(env_parse(
                "INVALIDATION_TIMEOUT_SECS",
                defaults.invalidation_timeout.as_secs(),
                &mut errors,
            )),
            client_dead_threshold: Duration::from_secs(env_parse(
                "CLIENT_DEAD_THRESHOLD_SECS",
                defaults.client_dead_threshold.as_secs(),
                &mut errors,
            )),
            probe_timeout: Duration::from_millis(env_parse(
                "PROBE_TIMEOUT_MS",
                defaults.probe_timeout.as_millis() as u64,
                &mut errors,
            )),
            master_file: env::var("MASTER_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.master_file),
            port: env_parse("PORT", defaults.port, &mut errors),
            unknown_client_capacity: env_parse(
                "UNKNOWN_CLIENT_CAPACITY",
                defaults.unknown_client_capacity,
                &mut errors,
            ),
        };

        if settings.redis_servers.len() < 2 && errors.is_empty() {
            errors.push(format!(
                "REDIS_SERVERS must name at least 2 endpoints, got {}",
                settings.redis_servers.len()
            ));
        }

        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(Error::Configuration(errors.join("; ")))
        }
    }
}

fn parse_server_list(raw: &str) -> Result<Vec<EndpointAddr>> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T, errors: &mut Vec<String>) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                errors.push(format!("{} has an unparseable value '{}'", key, raw));
                default
            }
        },
        Err(_) => default,
    }
}
