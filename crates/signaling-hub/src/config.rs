//! Signaling hub configuration.
//!
//! Configuration is loaded from environment variables. The store URL is
//! redacted in Debug output.
//!
//! No variable is required: without `REDIS_URL` or `REDIS_HOST` the hub runs
//! in-memory only.

use crate::actors::ConnectionSettings;
use crate::tasks::ReaperConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default signaling (WebSocket + room API) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default Redis port when only `REDIS_HOST` is given.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default keepalive ping interval in seconds.
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 54;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 60;

/// Default per-frame write timeout in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECONDS: u64 = 10;

/// Default reaper interval in seconds.
pub const DEFAULT_REAPER_INTERVAL_SECONDS: u64 = 300;

/// Default inactivity threshold in seconds.
pub const DEFAULT_INACTIVITY_THRESHOLD_SECONDS: u64 = 600;

/// Default room TTL in storage in seconds (24 hours).
pub const DEFAULT_ROOM_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Default hub instance ID prefix.
pub const DEFAULT_HUB_ID_PREFIX: &str = "hub";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "HUB_LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Signaling hub configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL, `None` for in-memory only.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: Option<SecretString>,

    /// Signaling server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this hub instance.
    pub hub_id: String,

    /// Outbound queue capacity per connection (default: 256).
    pub outbound_queue_capacity: usize,

    /// Keepalive ping interval in seconds (default: 54).
    pub ping_interval_seconds: u64,

    /// Idle timeout in seconds (default: 60). Must exceed the ping interval.
    pub idle_timeout_seconds: u64,

    /// Per-frame write timeout in seconds (default: 10).
    pub write_timeout_seconds: u64,

    /// Reaper sweep interval in seconds (default: 300).
    pub reaper_interval_seconds: u64,

    /// Idle time before a room or peer is reaped, in seconds (default: 600).
    pub inactivity_threshold_seconds: u64,

    /// Room TTL in storage in seconds (default: 86400).
    pub room_ttl_seconds: u64,

    /// Log output format (default: text).
    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("hub_id", &self.hub_id)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("ping_interval_seconds", &self.ping_interval_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("write_timeout_seconds", &self.write_timeout_seconds)
            .field("reaper_interval_seconds", &self.reaper_interval_seconds)
            .field(
                "inactivity_threshold_seconds",
                &self.inactivity_threshold_seconds,
            )
            .field("room_ttl_seconds", &self.room_ttl_seconds)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = redis_url_from_vars(vars)?;

        let bind_address = match (vars.get("HUB_BIND_ADDRESS"), vars.get("PORT")) {
            (Some(address), _) => address.clone(),
            (None, Some(port)) => {
                let port: u16 = port.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("PORT must be a port number, got '{port}'"))
                })?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => DEFAULT_BIND_ADDRESS.to_string(),
        };

        let health_bind_address = vars
            .get("HUB_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let outbound_queue_capacity = parse_var(
            vars,
            "HUB_OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )?;
        let ping_interval_seconds =
            parse_var(vars, "HUB_PING_INTERVAL_SECONDS", DEFAULT_PING_INTERVAL_SECONDS)?;
        let idle_timeout_seconds =
            parse_var(vars, "HUB_IDLE_TIMEOUT_SECONDS", DEFAULT_IDLE_TIMEOUT_SECONDS)?;
        let write_timeout_seconds =
            parse_var(vars, "HUB_WRITE_TIMEOUT_SECONDS", DEFAULT_WRITE_TIMEOUT_SECONDS)?;
        let reaper_interval_seconds = parse_var(
            vars,
            "HUB_REAPER_INTERVAL_SECONDS",
            DEFAULT_REAPER_INTERVAL_SECONDS,
        )?;
        let inactivity_threshold_seconds = parse_var(
            vars,
            "HUB_INACTIVITY_THRESHOLD_SECONDS",
            DEFAULT_INACTIVITY_THRESHOLD_SECONDS,
        )?;
        let room_ttl_seconds = parse_var(vars, "HUB_ROOM_TTL_SECONDS", DEFAULT_ROOM_TTL_SECONDS)?;

        let log_format = match vars.get("HUB_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        // Generate hub instance ID
        let hub_id = vars.get("HUB_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_HUB_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        let config = Config {
            redis_url,
            bind_address,
            health_bind_address,
            hub_id,
            outbound_queue_capacity,
            ping_interval_seconds,
            idle_timeout_seconds,
            write_timeout_seconds,
            reaper_interval_seconds,
            inactivity_threshold_seconds,
            room_ttl_seconds,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("HUB_OUTBOUND_QUEUE_CAPACITY", self.outbound_queue_capacity as u64),
            ("HUB_PING_INTERVAL_SECONDS", self.ping_interval_seconds),
            ("HUB_IDLE_TIMEOUT_SECONDS", self.idle_timeout_seconds),
            ("HUB_WRITE_TIMEOUT_SECONDS", self.write_timeout_seconds),
            ("HUB_REAPER_INTERVAL_SECONDS", self.reaper_interval_seconds),
            ("HUB_INACTIVITY_THRESHOLD_SECONDS", self.inactivity_threshold_seconds),
            ("HUB_ROOM_TTL_SECONDS", self.room_ttl_seconds),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue(format!("{name} must be greater than zero")));
        }

        if self.ping_interval_seconds >= self.idle_timeout_seconds {
            return Err(ConfigError::InvalidValue(format!(
                "HUB_PING_INTERVAL_SECONDS ({}) must be less than HUB_IDLE_TIMEOUT_SECONDS ({})",
                self.ping_interval_seconds, self.idle_timeout_seconds
            )));
        }

        Ok(())
    }

    /// Settings applied to every connection.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            ping_interval: Duration::from_secs(self.ping_interval_seconds),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            write_timeout: Duration::from_secs(self.write_timeout_seconds),
            outbound_capacity: self.outbound_queue_capacity,
        }
    }

    /// Reaper schedule.
    #[must_use]
    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.reaper_interval_seconds),
            threshold: Duration::from_secs(self.inactivity_threshold_seconds),
        }
    }

    /// Room TTL in storage.
    #[must_use]
    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_seconds)
    }
}

/// `REDIS_URL` wins; otherwise build one from `REDIS_HOST`, `REDIS_PORT`
/// and `REDIS_PASSWORD`.
fn redis_url_from_vars(
    vars: &HashMap<String, String>,
) -> Result<Option<SecretString>, ConfigError> {
    if let Some(url) = vars.get("REDIS_URL").filter(|u| !u.trim().is_empty()) {
        return Ok(Some(SecretString::from(url.clone())));
    }

    let Some(host) = vars.get("REDIS_HOST").filter(|h| !h.trim().is_empty()) else {
        if vars.contains_key("REDIS_PASSWORD") {
            return Err(ConfigError::MissingEnvVar("REDIS_HOST".to_string()));
        }
        return Ok(None);
    };

    let port = parse_var(vars, "REDIS_PORT", DEFAULT_REDIS_PORT)?;
    let url = match vars.get("REDIS_PASSWORD").filter(|p| !p.is_empty()) {
        Some(password) => format!("redis://:{password}@{host}:{port}"),
        None => format!("redis://{host}:{port}"),
    };
    Ok(Some(SecretString::from(url)))
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} has invalid value '{raw}'"))
        }),
        None => Ok(default),
    }
}
