//! Relay configuration loaded from the environment (and `.env`)

use crate::backend::gemini::{GEMINI_DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::caches::{parse_ttl, DEFAULT_CACHE_TTL};
use crate::error::{RelayError, Result};
use crate::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub base_url: String,
    /// Used when a query names no model and no cache
    pub default_model: String,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub default_cache_ttl: Duration,
    pub enable_caching: bool,
    /// Fetch the remote model list during bootstrap
    pub refresh_models: bool,
    pub log_json: bool,
}

impl RelayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryConfig::default(),
            default_cache_ttl: DEFAULT_CACHE_TTL,
            enable_caching: true,
            refresh_models: true,
            log_json: false,
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Malformed optional values fall
    /// back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("GEMINI_API_KEY")
            .ok_or_else(|| RelayError::Configuration("GEMINI_API_KEY is not set".to_string()))?;
        let mut config = Self::new(api_key);

        if let Some(base_url) = get("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(model) = get("GEMINI_MODEL") {
            config.default_model = model;
        }
        if let Some(secs) = parse_or_warn::<u64>("GEMINI_REQUEST_TIMEOUT_SECS", get("GEMINI_REQUEST_TIMEOUT_SECS")) {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }
        // Total calls including the first one, not the number of retries.
        if let Some(attempts) = parse_or_warn::<u32>("GEMINI_MAX_ATTEMPTS", get("GEMINI_MAX_ATTEMPTS")) {
            config.retry = config.retry.with_max_attempts(attempts);
        }
        if let Some(ms) = parse_or_warn::<u64>("GEMINI_INITIAL_BACKOFF_MS", get("GEMINI_INITIAL_BACKOFF_MS")) {
            config.retry = config.retry.with_initial_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_or_warn::<u64>("GEMINI_MAX_BACKOFF_MS", get("GEMINI_MAX_BACKOFF_MS")) {
            config.retry = config.retry.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(ttl) = get("GEMINI_DEFAULT_CACHE_TTL") {
            config.default_cache_ttl = parse_ttl(&ttl).map_err(|e| {
                RelayError::Configuration(format!("GEMINI_DEFAULT_CACHE_TTL: {e}"))
            })?;
        }
        if let Some(flag) = parse_flag("GEMINI_ENABLE_CACHING", get("GEMINI_ENABLE_CACHING")) {
            config.enable_caching = flag;
        }
        if let Some(flag) = parse_flag("GEMINI_REFRESH_MODELS", get("GEMINI_REFRESH_MODELS")) {
            config.refresh_models = flag;
        }
        if let Some(flag) = parse_flag("LOG_JSON", get("LOG_JSON")) {
            config.log_json = flag;
        }

        Ok(config)
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring malformed setting, using default");
            None
        }
    }
}

fn parse_flag(key: &str, raw: Option<String>) -> Option<bool> {
    let raw = raw?;
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "ignoring malformed flag, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let error = RelayConfig::from_lookup(lookup(&[("GEMINI_MODEL", "x")])).unwrap_err();
        assert!(matches!(error, RelayError::Configuration(_)));

        let blank = RelayConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(blank, RelayError::Configuration(_)));
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "key")])).unwrap();
        assert_eq!(config.api_key, "key");
        assert_eq!(config.base_url, GEMINI_DEFAULT_BASE_URL);
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.default_cache_ttl, DEFAULT_CACHE_TTL);
        assert!(config.enable_caching);
        assert!(config.refresh_models);
        assert!(!config.log_json);
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "key"),
            ("GEMINI_BASE_URL", "http://localhost:9000"),
            ("GEMINI_MODEL", "gemini-2.5-pro"),
            ("GEMINI_REQUEST_TIMEOUT_SECS", "30"),
            ("GEMINI_MAX_ATTEMPTS", "5"),
            ("GEMINI_INITIAL_BACKOFF_MS", "250"),
            ("GEMINI_MAX_BACKOFF_MS", "4000"),
            ("GEMINI_DEFAULT_CACHE_TTL", "2h"),
            ("GEMINI_ENABLE_CACHING", "false"),
            ("GEMINI_REFRESH_MODELS", "0"),
            ("LOG_JSON", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.default_model, "gemini-2.5-pro");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_millis(4000));
        assert_eq!(config.default_cache_ttl, Duration::from_secs(7200));
        assert!(!config.enable_caching);
        assert!(!config.refresh_models);
        assert!(config.log_json);
    }

    #[test]
    fn test_max_attempts_counts_the_first_call() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "key"),
            ("GEMINI_MAX_ATTEMPTS", "1"),
            ("GEMINI_MAX_RETRIES", "7"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_malformed_numbers_fall_back() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "key"),
            ("GEMINI_MAX_ATTEMPTS", "many"),
            ("GEMINI_ENABLE_CACHING", "perhaps"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_attempts, RetryConfig::default().max_attempts);
        assert!(config.enable_caching);
    }

    #[test]
    fn test_invalid_default_ttl_is_config_error() {
        let error = RelayConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "key"),
            ("GEMINI_DEFAULT_CACHE_TTL", "eventually"),
        ]))
        .unwrap_err();
        assert!(matches!(error, RelayError::Configuration(_)));
    }
}
