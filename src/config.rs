use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub grpc_port: u16,
    pub log_level: String,
    /// `compact` or `json`.
    pub log_format: String,
    pub event_buffer_size: usize,
    pub directions_api_key: Option<String>,
    pub directions_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            grpc_port: parse_or_default("GRPC_PORT", 50051)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            directions_api_key: env::var("DIRECTIONS_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            directions_base_url: env::var("DIRECTIONS_BASE_URL")
                .unwrap_or_else(|_| "https://maps.googleapis.com/maps/api".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub poll_interval: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Countdown length in one-second ticks.
    pub countdown_secs: u32,
    /// Every this many ticks the request row is re-read.
    pub reconcile_every_secs: u32,
    pub tick: Duration,
    pub online_poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 30,
            reconcile_every_secs: 5,
            tick: Duration::from_secs(1),
            online_poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub fix_timeout: Duration,
    pub emit_interval: Duration,
    /// Movement below this many meters is not written.
    pub min_distance_m: f64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            fix_timeout: Duration::from_secs(8),
            emit_interval: Duration::from_secs(10),
            min_distance_m: 20.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub matching: MatchingConfig,
    pub wait: WaitConfig,
    pub presence: PresenceConfig,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            matching: MatchingConfig {
                poll_interval: Duration::from_millis(parse_or_default(
                    "MATCH_POLL_INTERVAL_MS",
                    5_000,
                )?),
            },
            wait: WaitConfig {
                countdown_secs: parse_or_default("WAIT_COUNTDOWN_SECS", 30)?,
                reconcile_every_secs: parse_or_default("WAIT_RECONCILE_SECS", 5)?,
                ..WaitConfig::default()
            },
            presence: PresenceConfig {
                fix_timeout: Duration::from_millis(parse_or_default(
                    "LOCATION_FIX_TIMEOUT_MS",
                    8_000,
                )?),
                emit_interval: Duration::from_millis(parse_or_default(
                    "LOCATION_EMIT_INTERVAL_MS",
                    10_000,
                )?),
                min_distance_m: parse_or_default("LOCATION_MIN_DISTANCE_M", 20.0)?,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
