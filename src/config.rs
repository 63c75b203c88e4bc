//! Sync configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::time::Duration;

use crate::channel::ReconnectPolicy;
use crate::frame::ErrorCode;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_AUTOSAVE_MS: u64 = 1000;
pub const DEFAULT_REFRESH_DELAY_MS: u64 = 250;
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl(_) => "E_CONFIG_BASE_URL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// REST root, without trailing slash.
    pub base_url: String,
    /// Notification websocket endpoint.
    pub ws_url: String,
    pub token: Option<String>,
    /// Quiet period after the last local commit before autosave fires.
    pub autosave_quiescence: Duration,
    /// Pull after each applied notification as a consistency safety net.
    pub refresh_after_notify: bool,
    /// Coalescing window for notification-triggered pulls.
    pub refresh_delay: Duration,
    pub reconnect: ReconnectPolicy,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            ws_url: format!("ws://{}/ws", DEFAULT_BASE_URL.trim_start_matches("http://")),
            token: None,
            autosave_quiescence: Duration::from_millis(DEFAULT_AUTOSAVE_MS),
            refresh_after_notify: true,
            refresh_delay: Duration::from_millis(DEFAULT_REFRESH_DELAY_MS),
            reconnect: ReconnectPolicy {
                max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
                base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
                max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            },
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    /// Build typed config from environment variables.
    ///
    /// - `SEATSYNC_BASE_URL`: default `http://127.0.0.1:8000`
    /// - `SEATSYNC_WS_URL`: derived from the base URL when absent
    /// - `SEATSYNC_TOKEN`: bearer token, optional
    /// - `SEATSYNC_AUTOSAVE_MS`: default 1000
    /// - `SEATSYNC_REFRESH_AFTER_NOTIFY`: default true
    /// - `SEATSYNC_REFRESH_DELAY_MS`: default 250
    /// - `SEATSYNC_RECONNECT_ATTEMPTS`: default 5
    /// - `SEATSYNC_RECONNECT_BASE_MS` / `SEATSYNC_RECONNECT_MAX_MS`: default 1000 / 10000
    /// - `SEATSYNC_REQUEST_TIMEOUT_SECS` / `SEATSYNC_CONNECT_TIMEOUT_SECS`: default 10 / 5
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not `http://` or `https://`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not `http://` or `https://`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("SEATSYNC_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        let ws_url = match lookup("SEATSYNC_WS_URL") {
            Some(url) => url,
            None => ws_url(&base_url)?,
        };
        let token = lookup("SEATSYNC_TOKEN").filter(|t| !t.is_empty());

        Ok(Self {
            base_url,
            ws_url,
            token,
            autosave_quiescence: Duration::from_millis(env_parse(&lookup, "SEATSYNC_AUTOSAVE_MS", DEFAULT_AUTOSAVE_MS)),
            refresh_after_notify: env_parse(&lookup, "SEATSYNC_REFRESH_AFTER_NOTIFY", true),
            refresh_delay: Duration::from_millis(env_parse(&lookup, "SEATSYNC_REFRESH_DELAY_MS", DEFAULT_REFRESH_DELAY_MS)),
            reconnect: ReconnectPolicy {
                max_attempts: env_parse(&lookup, "SEATSYNC_RECONNECT_ATTEMPTS", DEFAULT_RECONNECT_ATTEMPTS),
                base: Duration::from_millis(env_parse(&lookup, "SEATSYNC_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS)),
                max: Duration::from_millis(env_parse(&lookup, "SEATSYNC_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS)),
            },
            request_timeout: Duration::from_secs(env_parse(
                &lookup,
                "SEATSYNC_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            connect_timeout: Duration::from_secs(env_parse(
                &lookup,
                "SEATSYNC_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
        })
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Derive the notification endpoint from the REST root.
///
/// # Errors
///
/// Returns an error if the base URL is not `http://` or `https://`.
pub fn ws_url(base_url: &str) -> Result<String, ConfigError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }
    Err(ConfigError::InvalidBaseUrl(base_url.to_owned()))
}
