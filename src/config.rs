use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

pub const DEFAULT_CONFIG_FILE: &str = "prodfetch.json";
pub const DEFAULT_API_BASE_URL: &str = "https://api.tiki.vn/product-detail/api/v1/products";

/// On-disk config. Every field is optional; missing ones fall back to defaults.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub backoff_secs: Option<u64>,
    #[serde(default)]
    pub dedupe_input: Option<bool>,
    #[serde(default)]
    pub retry_failures: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadPolicy {
    /// Drop repeated ids at load time, keeping the first occurrence.
    Deduplicate,
    KeepAll,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub error_log: Utf8PathBuf,
    pub api_base_url: String,
    pub retries: u32,
    pub concurrency: usize,
    pub batch_size: usize,
    pub timeout: Duration,
    pub backoff_unit: Duration,
    pub load_policy: LoadPolicy,
    pub retry_failures: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            input: Utf8PathBuf::from("product_ids.csv"),
            output: Utf8PathBuf::from("product_results.tsv"),
            error_log: Utf8PathBuf::from("errors.log"),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            retries: 5,
            concurrency: 20,
            batch_size: 5000,
            timeout: Duration::from_secs(15),
            backoff_unit: Duration::from_secs(2),
            load_policy: LoadPolicy::Deduplicate,
            retry_failures: false,
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.retries == 0 {
            return Err(CrawlError::InvalidConfig(
                "retries must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(CrawlError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CrawlError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CrawlError::InvalidConfig(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(CrawlError::InvalidConfig(
                "api_base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path`, or `prodfetch.json` from the working directory when it exists.
    /// With neither, the defaults are returned.
    pub fn resolve(path: Option<&str>) -> Result<CrawlConfig, CrawlError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CrawlError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CrawlError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<CrawlConfig, CrawlError> {
        let defaults = CrawlConfig::default();
        let resolved = CrawlConfig {
            input: config.input.map(Utf8PathBuf::from).unwrap_or(defaults.input),
            output: config
                .output
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.output),
            error_log: config
                .error_log
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.error_log),
            api_base_url: config.api_base_url.unwrap_or(defaults.api_base_url),
            retries: config.retries.unwrap_or(defaults.retries),
            concurrency: config.concurrency.unwrap_or(defaults.concurrency),
            batch_size: config.batch_size.unwrap_or(defaults.batch_size),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            backoff_unit: config
                .backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_unit),
            load_policy: match config.dedupe_input {
                Some(false) => LoadPolicy::KeepAll,
                _ => LoadPolicy::Deduplicate,
            },
            retry_failures: config.retry_failures.unwrap_or(defaults.retry_failures),
        };
        resolved.validate()?;
        Ok(resolved)
    }
}
