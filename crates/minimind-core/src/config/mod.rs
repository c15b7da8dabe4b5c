//! Sync agent configuration.
//!
//! Provides a unified `SyncSettings` struct loaded from an optional JSON file
//! and overlaid with `MINIMIND_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::RetryPolicy;
use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_API_URL: &str = "MINIMIND_API_URL";
pub const ENV_AUTH_TOKEN: &str = "MINIMIND_AUTH_TOKEN";
pub const ENV_SYNC_INTERVAL_MS: &str = "MINIMIND_SYNC_INTERVAL_MS";
pub const ENV_RETRY_DELAY_MS: &str = "MINIMIND_RETRY_DELAY_MS";
pub const ENV_MAX_RETRIES: &str = "MINIMIND_MAX_RETRIES";

const DEFAULT_SYNC_INTERVAL_MS: u64 = 30_000;
const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Timing and endpoint settings for the sync agent.
///
/// `auth_token` is a bearer token handed over by the authentication context;
/// it is never printed by `Debug`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    pub api_base_url: Option<String>,
    pub auth_token: Option<String>,
    pub sync_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub request_timeout_ms: Option<u64>,
    /// Defaults to twice the sync interval
    pub lease_ttl_ms: Option<u64>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            auth_token: None,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout_ms: None,
            lease_ttl_ms: None,
        }
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("sync_interval_ms", &self.sync_interval_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("lease_ttl_ms", &self.lease_ttl_ms)
            .finish()
    }
}

impl SyncSettings {
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(
            self.lease_ttl_ms
                .unwrap_or_else(|| self.sync_interval_ms.saturating_mul(2)),
        )
    }

    /// Overlay values from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, which maps a `MINIMIND_*` name to its value
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_AUTH_TOKEN)) {
            self.auth_token = Some(token);
        }
        if let Some(value) = parse_env_number(&lookup, ENV_SYNC_INTERVAL_MS)? {
            self.sync_interval_ms = value;
        }
        if let Some(value) = parse_env_number(&lookup, ENV_RETRY_DELAY_MS)? {
            self.retry_delay_ms = value;
        }
        if let Some(value) = parse_env_number(&lookup, ENV_MAX_RETRIES)? {
            self.max_retries = value;
        }
        Ok(self)
    }

    /// Trim text fields, drop empties and validate ranges
    pub fn normalized(mut self) -> Result<Self> {
        self.auth_token = normalize_text_option(self.auth_token);
        self.api_base_url = match normalize_text_option(self.api_base_url) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(url) => {
                return Err(Error::Config(format!(
                    "api_base_url must include http:// or https:// (got '{url}')"
                )))
            }
            None => None,
        };

        if self.sync_interval_ms == 0 {
            return Err(Error::Config("sync_interval_ms must be positive".to_string()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.lease_ttl_ms == Some(0) {
            return Err(Error::Config("lease_ttl_ms must be positive".to_string()));
        }
        Ok(self)
    }
}

/// Parse settings from a raw JSON payload.
pub fn parse_settings(payload: &str) -> Result<SyncSettings> {
    let settings: SyncSettings = serde_json::from_str(payload)
        .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
    settings.normalized()
}

/// Load settings from `path` (when it exists), then apply environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<SyncSettings> {
    let settings = match path {
        Some(path) if path.exists() => {
            tracing::debug!("Loading sync settings from {}", path.display());
            parse_settings(&std::fs::read_to_string(path)?)?
        }
        _ => SyncSettings::default(),
    };
    settings.with_env_overrides()?.normalized()
}

fn parse_env_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    normalize_text_option(lookup(key))
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| Error::Config(format!("{key} must be a non-negative integer")))
        })
        .transpose()
}
