//! Client configuration parsed from environment variables.
//!
//! Every knob has a typed default so a bare environment yields a client that
//! polls a local backend once per second.

use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const TIMEOUT_MULTIPLIER_MS: u64 = 1000;
pub const DEFAULT_MAX_FAILURE_COUNT: u32 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend origin, without a trailing slash.
    pub base_url: String,
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Accumulated fetch failures after which polling stops.
    pub max_failure_count: u32,
    pub timeouts: HttpTimeouts,
    /// File backing the local key-value store.
    pub store_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_failure_count: DEFAULT_MAX_FAILURE_COUNT,
            timeouts: HttpTimeouts::default(),
            store_path: default_store_path(),
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `PUBSUB_BASE_URL`: default `http://127.0.0.1:8080`
    /// - `PUBSUB_POLL_INTERVAL_SECS`: default 1
    /// - `PUBSUB_MAX_FAILURE_COUNT`: default 10000
    /// - `PUBSUB_REQUEST_TIMEOUT_SECS`: default 30
    /// - `PUBSUB_CONNECT_TIMEOUT_SECS`: default 10
    /// - `PUBSUB_STORE_PATH`: default `$HOME/.pubsub-client/store.json`
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("PUBSUB_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let store_path = std::env::var_os("PUBSUB_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_store_path);

        Self {
            base_url: normalize_base_url(&base_url),
            poll_interval_secs: env_parse("PUBSUB_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS),
            max_failure_count: env_parse("PUBSUB_MAX_FAILURE_COUNT", DEFAULT_MAX_FAILURE_COUNT),
            timeouts: HttpTimeouts {
                request_secs: env_parse("PUBSUB_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
                connect_secs: env_parse("PUBSUB_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            store_path,
        }
    }
}

pub(crate) fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_owned()
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn default_store_path() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".pubsub-client")
        .join("store.json")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
