use crate::feed::types::OddsFormat;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub odds_feed: OddsFeedConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sports: BTreeMap<String, SportConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OddsFeedConfig {
    pub base_url: String,
    #[serde(default = "default_regions")]
    pub regions: String,
    #[serde(default)]
    pub bookmakers: String,
    #[serde(default)]
    pub odds_format: OddsFormat,
    pub poll_interval_s: Option<u64>,
    /// Pause between sports within one cycle (rate limiting).
    pub sport_delay_ms: Option<u64>,
    pub quota_warning_threshold: Option<u64>,
}

fn default_regions() -> String {
    "eu".to_string()
}

/// Which market shape wins when an event prices both a two-way and a
/// three-way arbitrage.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MarketPrecedence {
    #[default]
    TwoWayFirst,
    ThreeWayFirst,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DetectorConfig {
    #[serde(default = "default_stake")]
    pub default_stake: f64,
    #[serde(default = "default_expiry_window")]
    pub expiry_window_min: i64,
    #[serde(default = "default_pre_start_cutoff")]
    pub pre_start_cutoff_min: i64,
    #[serde(default)]
    pub precedence: MarketPrecedence,
}

fn default_stake() -> f64 { 1000.0 }
fn default_expiry_window() -> i64 { 30 }
fn default_pre_start_cutoff() -> i64 { 120 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            default_stake: default_stake(),
            expiry_window_min: default_expiry_window(),
            pre_start_cutoff_min: default_pre_start_cutoff(),
            precedence: MarketPrecedence::default(),
        }
    }
}

/// Per-sport detector override. Unset fields inherit the global value.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct DetectorOverride {
    pub default_stake: Option<f64>,
    pub precedence: Option<MarketPrecedence>,
}

impl DetectorConfig {
    pub fn with_override(&self, over: Option<&DetectorOverride>) -> Self {
        let Some(over) = over else {
            return self.clone();
        };
        Self {
            default_stake: over.default_stake.unwrap_or(self.default_stake),
            precedence: over.precedence.unwrap_or(self.precedence),
            ..self.clone()
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SettlementConfig {
    /// Share of the edge kept by the platform.
    #[serde(default = "default_platform_cut")]
    pub platform_cut: f64,
    /// Recalculated margin at or below this cancels the match.
    #[serde(default = "default_min_margin")]
    pub min_margin: f64,
}

fn default_platform_cut() -> f64 { 0.33 }
fn default_min_margin() -> f64 { 0.005 }

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            platform_cut: default_platform_cut(),
            min_margin: default_min_margin(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_file() -> PathBuf { PathBuf::from("sports-arb.log") }
fn default_log_level() -> String { "sports_arb=info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SportConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub label: String,
    #[serde(default)]
    pub detector: Option<DetectorOverride>,
}

fn default_enabled() -> bool { true }

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.detector.default_stake > 0.0) {
            anyhow::bail!("detector.default_stake must be > 0");
        }
        // Written so NaN fails too.
        if !(self.settlement.platform_cut >= 0.0 && self.settlement.platform_cut < 1.0) {
            anyhow::bail!("settlement.platform_cut must be in [0, 1)");
        }
        if !(self.settlement.min_margin >= 0.0) {
            anyhow::bail!("settlement.min_margin must be >= 0");
        }
        for (key, sport) in &self.sports {
            let stake = sport.detector.as_ref().and_then(|d| d.default_stake);
            if stake.is_some_and(|s| !(s > 0.0)) {
                anyhow::bail!("sports.{}.detector.default_stake must be > 0", key);
            }
        }
        Ok(())
    }

    /// Enabled sports in key order.
    pub fn enabled_sports(&self) -> Vec<(&str, &SportConfig)> {
        self.sports
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(k, s)| (k.as_str(), s))
            .collect()
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let _ = dotenvy::from_filename(ENV_FILE);
    }

    /// API key comes from the environment, or is prompted at startup.
    /// Prompted values are saved to .env for future runs.
    pub fn odds_api_key() -> Result<String> {
        match std::env::var("ODDS_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(sanitize_key(&key)),
            _ => {
                let key = prompt("Odds API Key (the-odds-api.com)")?;
                save_env_var("ODDS_API_KEY", &key);
                Ok(key)
            }
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("  {} > ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let value = input.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("{} cannot be empty", label);
    }
    Ok(value)
}

/// Strip carriage returns, BOM, and other invisible chars from a key value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

/// Append a KEY=VALUE line to .env and set it in the current process.
fn save_env_var(key: &str, value: &str) {
    std::env::set_var(key, value);
    let path = Path::new(ENV_FILE);
    let mut contents = std::fs::read_to_string(path).unwrap_or_default();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format!("{}={}\n", key, value));
    if let Err(e) = std::fs::write(path, contents) {
        tracing::warn!(error = %e, "failed to persist {} to .env", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses() {
        let config = Config::load(Path::new("config.toml")).unwrap();
        assert_eq!(config.detector.default_stake, 1000.0);
        assert_eq!(config.detector.expiry_window_min, 30);
        assert_eq!(config.detector.pre_start_cutoff_min, 120);
        assert_eq!(config.settlement.platform_cut, 0.33);
        assert_eq!(config.settlement.min_margin, 0.005);
        assert!(config.odds_feed.poll_interval_s.is_some());
        assert!(config.sports.contains_key("soccer-epl"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [odds_feed]
            base_url = "https://api.the-odds-api.com"

            [sports.basketball]
            label = "NBA"

            [sports.mma]
            label = "UFC"
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.odds_feed.regions, "eu");
        assert_eq!(config.odds_feed.odds_format, OddsFormat::Decimal);
        assert_eq!(config.detector, DetectorConfig::default());
        assert_eq!(config.detector.precedence, MarketPrecedence::TwoWayFirst);
        assert_eq!(config.settlement, SettlementConfig::default());
        assert!(config.store.snapshot_path.is_none());

        let enabled = config.enabled_sports();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, "basketball");
    }

    #[test]
    fn test_detector_override_merges_over_global() {
        let global = DetectorConfig::default();
        let over = DetectorOverride {
            default_stake: Some(250.0),
            precedence: Some(MarketPrecedence::ThreeWayFirst),
        };
        let merged = global.with_override(Some(&over));
        assert_eq!(merged.default_stake, 250.0);
        assert_eq!(merged.precedence, MarketPrecedence::ThreeWayFirst);
        assert_eq!(merged.expiry_window_min, 30); // inherited

        assert_eq!(global.with_override(None), global);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::parse(
            r#"
            [odds_feed]
            base_url = "x"
            [detector]
            default_stake = 0.0
            "#,
        );
        assert!(err.is_err());

        let err = Config::parse(
            r#"
            [odds_feed]
            base_url = "x"
            [settlement]
            platform_cut = 1.5
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_nan_settlement_values_rejected() {
        for table in ["min_margin = nan", "platform_cut = nan"] {
            let content = format!(
                "[odds_feed]\nbase_url = \"x\"\n[settlement]\n{}\n",
                table
            );
            assert!(Config::parse(&content).is_err(), "{} should be rejected", table);
        }
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("\u{feff}abc123\r\n"), "abc123");
    }
}
