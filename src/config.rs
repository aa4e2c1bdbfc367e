//! Application configuration loaded from environment variables

use crate::error::{HarvestError, Result};
use crate::proxy::checker::{DEFAULT_BATCH_SIZE, DEFAULT_TEST_URL};
use crate::proxy::fetcher::DEFAULT_BASE_URL;
use crate::proxy::harvester::DEFAULT_PRIORITY_COUNTRY;
use crate::store::DEFAULT_SNAPSHOT;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Only verify this country each cycle; `None` verifies all
    pub check_country: Option<String>,
    /// URL fetched through each proxy to prove it alive
    pub check_target: String,
    /// Query layer bind host (default: 0.0.0.0)
    pub host: String,
    /// Query layer port (default: 3000)
    pub port: u16,
    /// Snapshot file; backups are written next to it
    pub data_file: PathBuf,
    /// Countries harvested before the rest of the directory
    pub priority_countries: Vec<String>,
    /// Listing site root
    pub listing_base_url: String,
    /// Cadence of the verification loop
    pub check_interval: Duration,
    /// Probes run together per batch
    pub batch_size: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            check_country: None,
            check_target: DEFAULT_TEST_URL.to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            data_file: PathBuf::from(DEFAULT_SNAPSHOT),
            priority_countries: vec![DEFAULT_PRIORITY_COUNTRY.to_string()],
            listing_base_url: DEFAULT_BASE_URL.to_string(),
            check_interval: Duration::from_secs(300),
            batch_size: DEFAULT_BATCH_SIZE,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_env_or = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let defaults = Config::default();

        let check_country = lookup("CHECK_COUNTRY")
            .map(|v| v.trim().to_uppercase())
            .filter(|v| !v.is_empty());

        let port = get_env_or("PORT", "3000").parse().map_err(|_| {
            HarvestError::InvalidConfig("PORT must be a valid port number".into())
        })?;

        let check_interval_secs: u64 = get_env_or("CHECK_INTERVAL_SECS", "300")
            .parse()
            .ok()
            .filter(|&secs| secs > 0)
            .ok_or_else(|| {
                HarvestError::InvalidConfig("CHECK_INTERVAL_SECS must be a positive integer".into())
            })?;

        let batch_size: usize = get_env_or("CHECK_BATCH_SIZE", &DEFAULT_BATCH_SIZE.to_string())
            .parse()
            .ok()
            .filter(|&size| size > 0)
            .ok_or_else(|| {
                HarvestError::InvalidConfig("CHECK_BATCH_SIZE must be a positive integer".into())
            })?;

        let check_target = get_env_or("CHECK_TARGET", &defaults.check_target);
        url::Url::parse(&check_target).map_err(|e| {
            HarvestError::InvalidConfig(format!("CHECK_TARGET is not a valid URL: {e}"))
        })?;

        let log_format = match get_env_or("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => {
                return Err(HarvestError::InvalidConfig(format!(
                    "LOG_FORMAT must be pretty or json, got {other}"
                )))
            }
        };

        Ok(Config {
            check_country,
            check_target,
            host: get_env_or("HOST", &defaults.host),
            port,
            data_file: PathBuf::from(get_env_or("DATA_FILE", DEFAULT_SNAPSHOT)),
            priority_countries: parse_codes(&get_env_or("PRIORITY_COUNTRIES", DEFAULT_PRIORITY_COUNTRY)),
            listing_base_url: get_env_or("LISTING_BASE_URL", DEFAULT_BASE_URL),
            check_interval: Duration::from_secs(check_interval_secs),
            batch_size,
            log_format,
        })
    }
}

/// Parse a comma-separated list of country codes
pub fn parse_codes(list: &str) -> Vec<String> {
    list.split(',')
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.check_country, None);
        assert_eq!(config.check_target, "https://www.baidu.com");
        assert_eq!(config.port, 3000);
        assert_eq!(config.data_file, PathBuf::from("list.json"));
        assert_eq!(config.priority_countries, vec!["CN"]);
        assert_eq!(config.check_interval, Duration::from_secs(300));
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CHECK_COUNTRY", " us "),
            ("CHECK_TARGET", "http://example.com/"),
            ("PORT", "8080"),
            ("PRIORITY_COUNTRIES", "cn, us,,de"),
            ("CHECK_INTERVAL_SECS", "60"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.check_country.as_deref(), Some("US"));
        assert_eq!(config.check_target, "http://example.com/");
        assert_eq!(config.port, 8080);
        assert_eq!(config.priority_countries, vec!["CN", "US", "DE"]);
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_check_country_means_all() {
        let config = config_from(&[("CHECK_COUNTRY", "")]).unwrap();
        assert!(config.check_country.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("PORT", "99999")]),
            Err(HarvestError::InvalidConfig(_))
        ));
        assert!(config_from(&[("CHECK_INTERVAL_SECS", "0")]).is_err());
        assert!(config_from(&[("CHECK_BATCH_SIZE", "many")]).is_err());
        assert!(config_from(&[("CHECK_TARGET", "not a url")]).is_err());
        assert!(config_from(&[("LOG_FORMAT", "xml")]).is_err());
    }
}
