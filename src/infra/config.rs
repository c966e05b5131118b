//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional. Secrets never live here; see `infra::secrets`.

use crate::domain::currency::{Currency, ExchangeRates};
use anyhow::Context;
use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Long-poll timeout passed to getUpdates
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Reaction emoji used to acknowledge a recorded message
    #[serde(default = "default_reaction")]
    pub reaction: String,
    /// Timeout for non-polling calls (reactions, replies)
    #[serde(default = "default_telegram_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
            reaction: default_reaction(),
            timeout_ms: default_telegram_timeout_ms(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_reaction() -> String {
    "👍".to_string()
}

fn default_telegram_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Omitted from the request when unset (some models reject it)
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_classifier_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_base: default_classifier_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_classifier_timeout_ms(),
        }
    }
}

fn default_classifier_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> Option<f64> {
    Some(0.3)
}

fn default_max_tokens() -> u32 {
    500
}

fn default_classifier_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
    /// Worksheet (tab) that receives rows
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default = "default_ledger_timeout_ms")]
    pub timeout_ms: u64,
    /// Offset applied to the receipt timestamp for the Date column
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    /// Rates into the base currency, keyed by currency code
    #[serde(default = "default_rates")]
    pub rates: HashMap<String, f64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            api_base: default_sheets_api_base(),
            sheet_name: default_sheet_name(),
            timeout_ms: default_ledger_timeout_ms(),
            utc_offset_minutes: 0,
            base_currency: default_base_currency(),
            rates: default_rates(),
        }
    }
}

fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_sheet_name() -> String {
    "Sheet1".to_string()
}

fn default_ledger_timeout_ms() -> u64 {
    15_000
}

fn default_base_currency() -> String {
    "ILS".to_string()
}

fn default_rates() -> HashMap<String, f64> {
    HashMap::from([
        ("ILS".to_string(), 1.0),
        ("USD".to_string(), 3.7),
        ("EUR".to_string(), 4.0),
        ("RUB".to_string(), 0.04),
        ("GBP".to_string(), 4.7),
    ])
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// How many recorded delivery keys to remember
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { capacity: default_dedup_capacity() }
    }
}

fn default_dedup_capacity() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    telegram_api_base: String,
    poll_timeout_secs: u64,
    reaction: String,
    telegram_timeout_ms: u64,
    classifier_api_base: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: u32,
    classifier_timeout_ms: u64,
    sheets_api_base: String,
    sheet_name: String,
    ledger_timeout_ms: u64,
    utc_offset: FixedOffset,
    rates: ExchangeRates,
    dedup_capacity: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
            .unwrap_or_else(|_| unreachable!("built-in defaults are valid"))
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: &str) -> anyhow::Result<Self> {
        let ledger = toml_config.ledger;

        let utc_offset = FixedOffset::east_opt(ledger.utc_offset_minutes.saturating_mul(60))
            .with_context(|| format!("utc_offset_minutes out of range: {}", ledger.utc_offset_minutes))?;

        let base = Currency::parse(&ledger.base_currency)
            .with_context(|| "base_currency must not be empty".to_string())?;

        if let Some((code, rate)) = ledger.rates.iter().find(|(_, rate)| !rate.is_finite() || **rate <= 0.0) {
            anyhow::bail!("exchange rate for {} must be positive, got {}", code, rate);
        }

        if toml_config.telegram.reaction.trim().is_empty() {
            anyhow::bail!("telegram.reaction must not be empty");
        }

        Ok(Self {
            telegram_api_base: toml_config.telegram.api_base.trim_end_matches('/').to_string(),
            poll_timeout_secs: toml_config.telegram.poll_timeout_secs,
            reaction: toml_config.telegram.reaction,
            telegram_timeout_ms: toml_config.telegram.timeout_ms,
            classifier_api_base: toml_config.classifier.api_base.trim_end_matches('/').to_string(),
            model: toml_config.classifier.model,
            temperature: toml_config.classifier.temperature,
            max_tokens: toml_config.classifier.max_tokens,
            classifier_timeout_ms: toml_config.classifier.timeout_ms,
            sheets_api_base: ledger.api_base.trim_end_matches('/').to_string(),
            sheet_name: ledger.sheet_name,
            ledger_timeout_ms: ledger.timeout_ms,
            utc_offset,
            rates: ExchangeRates::new(base, ledger.rates),
            dedup_capacity: toml_config.dedup.capacity.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: config_file.to_string(),
        })
    }

    /// Load configuration from a specific path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn telegram_api_base(&self) -> &str {
        &self.telegram_api_base
    }

    pub fn poll_timeout_secs(&self) -> u64 {
        self.poll_timeout_secs
    }

    pub fn reaction(&self) -> &str {
        &self.reaction
    }

    pub fn telegram_timeout_ms(&self) -> u64 {
        self.telegram_timeout_ms
    }

    pub fn classifier_api_base(&self) -> &str {
        &self.classifier_api_base
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn classifier_timeout_ms(&self) -> u64 {
        self.classifier_timeout_ms
    }

    pub fn sheets_api_base(&self) -> &str {
        &self.sheets_api_base
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn ledger_timeout_ms(&self) -> u64 {
        self.ledger_timeout_ms
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn rates(&self) -> &ExchangeRates {
        &self.rates
    }

    pub fn base_currency(&self) -> &Currency {
        self.rates.base()
    }

    pub fn dedup_capacity(&self) -> usize {
        self.dedup_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point every client at one mock server
    pub fn with_api_bases(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        self.telegram_api_base = base.clone();
        self.classifier_api_base = base.clone();
        self.sheets_api_base = base;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.telegram_api_base(), "https://api.telegram.org");
        assert_eq!(config.poll_timeout_secs(), 30);
        assert_eq!(config.reaction(), "👍");
        assert_eq!(config.model(), "gpt-4o-mini");
        assert_eq!(config.temperature(), Some(0.3));
        assert_eq!(config.sheet_name(), "Sheet1");
        assert_eq!(config.base_currency(), &Currency::Ils);
        assert_eq!(config.dedup_capacity(), 10_000);
        assert_eq!(config.prometheus_port(), 9090);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["ledger-relay".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["ledger-relay".to_string(), "--config".to_string(), "config/prod.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["ledger-relay".to_string(), "--config=config/home.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/home.toml");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[classifier]
model = "gpt-5"
temperature = 1.0
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline").unwrap();
        assert_eq!(config.model(), "gpt-5");
        assert_eq!(config.temperature(), Some(1.0));
        assert_eq!(config.max_tokens(), 500);
        assert_eq!(config.sheet_name(), "Sheet1");
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[ledger.rates]
USD = -1.0
"#,
        )
        .unwrap();
        assert!(Config::from_toml(toml_config, "inline").is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = Config::default().with_api_bases("http://127.0.0.1:1234/");
        assert_eq!(config.telegram_api_base(), "http://127.0.0.1:1234");
        assert_eq!(config.classifier_api_base(), "http://127.0.0.1:1234");
        assert_eq!(config.sheets_api_base(), "http://127.0.0.1:1234");
    }
}
