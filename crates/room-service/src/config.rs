//! Room service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket/HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health and metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default sliding expiry for room keys (24 hours).
pub const DEFAULT_ROOM_TTL_SECONDS: u64 = 86_400;

/// Default bound on each store or bus call.
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 3_000;

/// Default bound on the startup Redis connectivity check.
pub const DEFAULT_REDIS_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Default grace period for in-flight connections on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "room";

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// Shared backend URL. `None` runs the process in local-only mode.
    pub redis_url: Option<SecretString>,

    /// Shared secret for credential decryption. `None` only in bypass mode.
    pub client_secret: Option<SecretString>,

    /// Accept unverified `roomId`/`pid` query parameters as identity.
    pub dev_bypass: bool,

    /// WebSocket/HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Sliding expiry for room keys in the shared backend.
    pub room_ttl_seconds: u64,

    /// Per-call bound on store and bus operations.
    pub backend_timeout_ms: u64,

    /// Bound on the startup connectivity check.
    pub redis_connect_timeout_seconds: u64,

    /// How long open connections may keep running after shutdown starts.
    pub shutdown_grace_seconds: u64,

    /// Instance identifier for log correlation.
    pub instance_id: String,

    /// Emit JSON logs.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |present: bool| if present { "[REDACTED]" } else { "[UNSET]" };
        f.debug_struct("Config")
            .field("redis_url", &redact(self.redis_url.is_some()))
            .field("client_secret", &redact(self.client_secret.is_some()))
            .field("dev_bypass", &self.dev_bypass)
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("room_ttl_seconds", &self.room_ttl_seconds)
            .field("backend_timeout_ms", &self.backend_timeout_ms)
            .field(
                "redis_connect_timeout_seconds",
                &self.redis_connect_timeout_seconds,
            )
            .field("shutdown_grace_seconds", &self.shutdown_grace_seconds)
            .field("instance_id", &self.instance_id)
            .field("log_json", &self.log_json)
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

fn non_empty<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(vars, name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    match non_empty(vars, name).map(str::to_ascii_lowercase).as_deref() {
        None | Some("false" | "0") => Ok(false),
        Some("true" | "1") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue(format!("{name}={other}"))),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let dev_bypass = parse_bool(vars, "ROOM_DEV_BYPASS")?;

        let client_secret = non_empty(vars, "ROOM_CLIENT_SECRET").map(SecretString::from);
        if client_secret.is_none() && !dev_bypass {
            return Err(ConfigError::MissingEnvVar("ROOM_CLIENT_SECRET".to_string()));
        }

        let redis_url = non_empty(vars, "REDIS_URL").map(SecretString::from);

        let bind_address = non_empty(vars, "ROOM_BIND_ADDRESS")
            .unwrap_or(DEFAULT_BIND_ADDRESS)
            .to_string();

        let health_bind_address = non_empty(vars, "ROOM_HEALTH_BIND_ADDRESS")
            .unwrap_or(DEFAULT_HEALTH_BIND_ADDRESS)
            .to_string();

        let room_ttl_seconds = parse_or(vars, "ROOM_TTL_SECONDS", DEFAULT_ROOM_TTL_SECONDS)?;
        if room_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let backend_timeout_ms =
            parse_or(vars, "ROOM_BACKEND_TIMEOUT_MS", DEFAULT_BACKEND_TIMEOUT_MS)?;
        if backend_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_BACKEND_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        let redis_connect_timeout_seconds = parse_or(
            vars,
            "ROOM_REDIS_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_REDIS_CONNECT_TIMEOUT_SECONDS,
        )?;

        let shutdown_grace_seconds = parse_or(
            vars,
            "ROOM_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?;

        let instance_id = non_empty(vars, "ROOM_INSTANCE_ID")
            .map(ToString::to_string)
            .unwrap_or_else(|| {
                let hostname = vars
                    .get("HOSTNAME")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                let uuid_suffix = uuid::Uuid::new_v4().to_string();
                let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
                format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
            });

        let log_json = parse_bool(vars, "ROOM_LOG_JSON")?;

        Ok(Config {
            redis_url,
            client_secret,
            dev_bypass,
            bind_address,
            health_bind_address,
            room_ttl_seconds,
            backend_timeout_ms,
            redis_connect_timeout_seconds,
            shutdown_grace_seconds,
            instance_id,
            log_json,
        })
    }

    #[must_use]
    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_seconds)
    }

    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    #[must_use]
    pub fn redis_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.redis_connect_timeout_seconds)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}
