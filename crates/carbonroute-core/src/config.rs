//! Environment-driven engine configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ELECTRICITYMAPS_TOKEN` | unset (Electricity Maps adapters fail with an auth error) |
//! | `CARBONROUTE_LATEST_URL` | Electricity Maps v3 `latest` |
//! | `CARBONROUTE_FORECAST_URL` | Electricity Maps v3 `forecast` |
//! | `CARBONROUTE_FOOTPRINT_URL` | unset (footprint adapter disabled) |
//! | `CARBONROUTE_FOOTPRINT_TOKEN` | unset |
//! | `PUE_DEFAULT` | `1.4` |
//! | `CARBONROUTE_RETRIES` | `2` |
//! | `CARBONROUTE_TIMEOUT_MS` | `20000` |
//! | `CARBONROUTE_RETRY_DELAY_MS` | `800` |
//! | `CARBONROUTE_RETAINMENT_TTL_SECS` | `172800` |
//! | `CARBONROUTE_HOME` | `$HOME/.carbonroute` |
//! | `SITES_JSON` | unset (built-in site table) |
//! | `CARBONROUTE_RANK_CONCURRENCY` | `4` |
//! | `CARBONROUTE_FAIL_SOFT` | `false` |
//! | `CARBONROUTE_PROVIDER_ORDER` | `electricitymaps,footprint_window` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use carbonroute_retainment::{RetainmentConfig, DEFAULT_TTL_SECS};
use thiserror::Error;

use crate::adapters::{
    DEFAULT_TIMEOUT_MS, ELECTRICITY_MAPS_FORECAST_URL, ELECTRICITY_MAPS_LATEST_URL,
};
use crate::retry::{Backoff, RetryConfig};
use crate::{validate_pue, ProviderId, ValidationError, DEFAULT_PUE};

pub const DEFAULT_RANK_CONCURRENCY: usize = 4;
const DEFAULT_PROVIDER_ORDER: &str = "electricitymaps,footprint_window";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{key}='{value}' is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{key}: {source}")]
    Validation {
        key: &'static str,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub electricitymaps_token: Option<String>,
    pub latest_url: String,
    pub forecast_url: String,
    pub footprint_url: Option<String>,
    pub footprint_token: Option<String>,
    pub pue_default: f64,
    pub retries: u32,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub retainment_ttl: Duration,
    pub home: PathBuf,
    pub sites_json: Option<PathBuf>,
    pub rank_concurrency: usize,
    pub fail_soft: bool,
    pub provider_order: Vec<ProviderId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            electricitymaps_token: None,
            latest_url: String::from(ELECTRICITY_MAPS_LATEST_URL),
            forecast_url: String::from(ELECTRICITY_MAPS_FORECAST_URL),
            footprint_url: None,
            footprint_token: None,
            pue_default: DEFAULT_PUE,
            retries: 2,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_delay_ms: 800,
            retainment_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            home: default_home(|key| std::env::var(key).ok()),
            sites_json: None,
            rank_concurrency: DEFAULT_RANK_CONCURRENCY,
            fail_soft: false,
            provider_order: vec![
                ProviderId::ElectricityMapsLatest,
                ProviderId::ElectricityMapsForecast,
                ProviderId::FootprintWindow,
            ],
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let pue_default = parse_or(&get, "PUE_DEFAULT", defaults.pue_default)?;
        validate_pue(pue_default).map_err(|source| ConfigError::Validation {
            key: "PUE_DEFAULT",
            source,
        })?;

        let rank_concurrency =
            parse_or(&get, "CARBONROUTE_RANK_CONCURRENCY", defaults.rank_concurrency)?;
        if rank_concurrency == 0 {
            return Err(ConfigError::Validation {
                key: "CARBONROUTE_RANK_CONCURRENCY",
                source: ValidationError::ZeroConcurrency,
            });
        }

        let ttl_secs = parse_or(&get, "CARBONROUTE_RETAINMENT_TTL_SECS", DEFAULT_TTL_SECS)?;
        if ttl_secs == 0 {
            return Err(ConfigError::Validation {
                key: "CARBONROUTE_RETAINMENT_TTL_SECS",
                source: ValidationError::ZeroTtl,
            });
        }

        let provider_order = match get("CARBONROUTE_PROVIDER_ORDER") {
            Some(value) => parse_provider_order(&value)?,
            None => parse_provider_order(DEFAULT_PROVIDER_ORDER)?,
        };

        Ok(Self {
            electricitymaps_token: get("ELECTRICITYMAPS_TOKEN"),
            latest_url: get("CARBONROUTE_LATEST_URL").unwrap_or(defaults.latest_url),
            forecast_url: get("CARBONROUTE_FORECAST_URL").unwrap_or(defaults.forecast_url),
            footprint_url: get("CARBONROUTE_FOOTPRINT_URL"),
            footprint_token: get("CARBONROUTE_FOOTPRINT_TOKEN"),
            pue_default,
            retries: parse_or(&get, "CARBONROUTE_RETRIES", defaults.retries)?,
            timeout_ms: parse_or(&get, "CARBONROUTE_TIMEOUT_MS", defaults.timeout_ms)?,
            retry_delay_ms: parse_or(&get, "CARBONROUTE_RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            retainment_ttl: Duration::from_secs(ttl_secs),
            home: default_home(&get),
            sites_json: get("SITES_JSON").map(PathBuf::from),
            rank_concurrency,
            fail_soft: parse_flag(&get, "CARBONROUTE_FAIL_SOFT")?,
            provider_order,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retries,
            backoff: Backoff::exponential_from(Duration::from_millis(self.retry_delay_ms)),
        }
    }

    pub fn retainment_config(&self) -> RetainmentConfig {
        RetainmentConfig {
            db_path: self.home.join("retainment.duckdb"),
            ttl: self.retainment_ttl,
            ..RetainmentConfig::default()
        }
    }
}

fn default_home<F>(get: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(home) = get("CARBONROUTE_HOME").filter(|value| !value.is_empty()) {
        return PathBuf::from(home);
    }
    match get("HOME") {
        Some(home) => PathBuf::from(home).join(".carbonroute"),
        None => PathBuf::from(".carbonroute"),
    }
}

fn parse_or<T, F>(get: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|error: T::Err| ConfigError::Invalid {
            key,
            reason: error.to_string(),
            value,
        }),
    }
}

fn parse_flag<F>(get: &F, key: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = get(key) else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value,
            reason: String::from("expected true/false"),
        }),
    }
}

/// Comma-separated vendor names, expanded and de-duplicated in order.
pub fn parse_provider_order(value: &str) -> Result<Vec<ProviderId>, ConfigError> {
    let mut order = Vec::new();
    for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let providers = ProviderId::expand_vendor(name).map_err(|source| {
            ConfigError::Validation {
                key: "CARBONROUTE_PROVIDER_ORDER",
                source,
            }
        })?;
        for provider in providers {
            if !order.contains(&provider) {
                order.push(provider);
            }
        }
    }

    if order.is_empty() {
        return Err(ConfigError::Invalid {
            key: "CARBONROUTE_PROVIDER_ORDER",
            value: value.to_owned(),
            reason: String::from("no providers listed"),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[("HOME", "/home/ops")])).expect("valid");

        assert_eq!(config.pue_default, 1.4);
        assert_eq!(config.retries, 2);
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.retainment_ttl, Duration::from_secs(172_800));
        assert_eq!(config.rank_concurrency, 4);
        assert!(!config.fail_soft);
        assert_eq!(config.home, PathBuf::from("/home/ops/.carbonroute"));
        assert_eq!(
            config.provider_order,
            vec![
                ProviderId::ElectricityMapsLatest,
                ProviderId::ElectricityMapsForecast,
                ProviderId::FootprintWindow
            ]
        );
        assert_eq!(config.retry_config().max_attempts(), 3);
    }

    #[test]
    fn values_are_read_and_provider_order_is_deduplicated() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("ELECTRICITYMAPS_TOKEN", "abc"),
            ("PUE_DEFAULT", "1.25"),
            ("CARBONROUTE_RETRIES", "0"),
            ("CARBONROUTE_FAIL_SOFT", "yes"),
            ("CARBONROUTE_HOME", "/var/lib/carbonroute"),
            ("CARBONROUTE_PROVIDER_ORDER", "mock, footprint, mock"),
        ]))
        .expect("valid");

        assert_eq!(config.electricitymaps_token.as_deref(), Some("abc"));
        assert_eq!(config.pue_default, 1.25);
        assert_eq!(config.retries, 0);
        assert!(config.fail_soft);
        assert_eq!(
            config.retainment_config().db_path,
            PathBuf::from("/var/lib/carbonroute/retainment.duckdb")
        );
        assert_eq!(
            config.provider_order,
            vec![ProviderId::Mock, ProviderId::FootprintWindow]
        );
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("CARBONROUTE_RETRIES", "many")])),
            Err(ConfigError::Invalid { key: "CARBONROUTE_RETRIES", .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("PUE_DEFAULT", "0.8")])),
            Err(ConfigError::Validation { key: "PUE_DEFAULT", .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("CARBONROUTE_PROVIDER_ORDER", "coal")])),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("CARBONROUTE_RANK_CONCURRENCY", "0")])),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("CARBONROUTE_RETAINMENT_TTL_SECS", "0")])),
            Err(ConfigError::Validation {
                key: "CARBONROUTE_RETAINMENT_TTL_SECS",
                source: ValidationError::ZeroTtl,
            })
        ));
    }

    #[test]
    fn a_retry_delay_above_five_seconds_is_not_capped() {
        let config =
            EngineConfig::from_lookup(lookup(&[("CARBONROUTE_RETRY_DELAY_MS", "8000")]))
                .expect("valid");
        let retry = config.retry_config();

        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(8));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(8));
    }
}
