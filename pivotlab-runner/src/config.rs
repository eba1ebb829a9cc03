//! Run configuration: the `pivotlab.toml` settings file.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! Example:
//! ```toml
//! [pivot]
//! sensitivity = "aggressive"
//! frequency = "daily"
//! max_symbols = 200
//!
//! [cache]
//! dir = "data/cache"
//! ttl_hours = 12
//!
//! [screen.long_term]
//! min_volatility = 0.40
//! max_volatility = 0.50
//! min_sharpe = 0.5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pivotlab_core::domain::{Frequency, StrategyType};
use pivotlab_core::pivot::{DetectionMethod, DetectorConfig, InitialDirection, Sensitivity};

use crate::retry::{Backoff, RetryPolicy};

/// Default settings file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pivotlab.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pivot: PivotSettings,
    pub cache: CacheSettings,
    pub persistence: PersistenceSettings,
    pub screen: ScreenSettings,
}

/// `[pivot]`: detection run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotSettings {
    pub method: DetectionMethod,
    pub sensitivity: Sensitivity,
    pub frequency: Frequency,
    /// Most recent bars loaded per symbol; 0 loads the whole history.
    pub window_bars: usize,
    pub max_symbols: Option<usize>,
    /// Worker threads; unset uses one per core.
    pub threads: Option<usize>,
    /// Wall-clock budget for scheduling detection tasks.
    pub time_budget_secs: Option<u64>,
    pub initial_direction: InitialDirection,
    pub atr_period: usize,
    pub zscore_window: usize,
}

impl Default for PivotSettings {
    fn default() -> Self {
        Self {
            method: DetectionMethod::ZigzagAtr,
            sensitivity: Sensitivity::Balanced,
            frequency: Frequency::Weekly,
            window_bars: 260,
            max_symbols: None,
            threads: None,
            time_budget_secs: None,
            initial_direction: InitialDirection::NetMove,
            atr_period: 14,
            zscore_window: 20,
        }
    }
}

impl PivotSettings {
    pub fn detector_config(&self) -> DetectorConfig {
        let mut config = DetectorConfig::new(self.sensitivity, self.frequency)
            .with_initial_direction(self.initial_direction);
        config.atr_period = self.atr_period;
        config.zscore_window = self.zscore_window;
        config
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}

/// `[cache]`: selection-set cache location and validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub ttl_hours: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/cache"),
            ttl_hours: pivotlab_core::data::cache::DEFAULT_TTL_HOURS,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }
}

/// `[persistence]`: record store location and commit retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub dir: PathBuf,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter: bool,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/records"),
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 3_000,
            jitter: true,
        }
    }
}

impl PersistenceSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.backoff_base_ms),
                factor: 2.0,
                max: Duration::from_millis(self.backoff_max_ms),
                jitter: self.jitter,
            },
        }
    }
}

/// Volatility/Sharpe window rule for one strategy screen.
///
/// A symbol passes when `min_volatility <= vol`, `vol < max_volatility`
/// (if set) and its Sharpe ratio clears `min_sharpe` (strictly, when
/// `strict_sharpe` is set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRule {
    pub frequency: Frequency,
    pub window_bars: usize,
    pub min_volatility: f64,
    pub max_volatility: Option<f64>,
    pub min_sharpe: f64,
    pub strict_sharpe: bool,
}

impl ScreenRule {
    pub fn long_term() -> Self {
        Self {
            frequency: Frequency::Weekly,
            window_bars: 52,
            min_volatility: 0.40,
            max_volatility: Some(0.50),
            min_sharpe: 0.5,
            strict_sharpe: false,
        }
    }

    pub fn short_term() -> Self {
        Self {
            frequency: Frequency::Daily,
            window_bars: 120,
            min_volatility: 0.50,
            max_volatility: None,
            min_sharpe: 1.0,
            strict_sharpe: true,
        }
    }

    pub fn passes(&self, volatility: f64, sharpe: f64) -> bool {
        let vol_ok = volatility >= self.min_volatility
            && self.max_volatility.map_or(true, |max| volatility < max);
        let sharpe_ok = if self.strict_sharpe {
            sharpe > self.min_sharpe
        } else {
            sharpe >= self.min_sharpe
        };
        vol_ok && sharpe_ok
    }
}

/// Fields given in a `[screen.*]` table; the rest keep that strategy's defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RuleOverrides {
    frequency: Option<Frequency>,
    window_bars: Option<usize>,
    min_volatility: Option<f64>,
    max_volatility: Option<f64>,
    min_sharpe: Option<f64>,
    strict_sharpe: Option<bool>,
}

impl RuleOverrides {
    fn apply(self, mut rule: ScreenRule) -> ScreenRule {
        if let Some(v) = self.frequency {
            rule.frequency = v;
        }
        if let Some(v) = self.window_bars {
            rule.window_bars = v;
        }
        if let Some(v) = self.min_volatility {
            rule.min_volatility = v;
        }
        if let Some(v) = self.max_volatility {
            rule.max_volatility = Some(v);
        }
        if let Some(v) = self.min_sharpe {
            rule.min_sharpe = v;
        }
        if let Some(v) = self.strict_sharpe {
            rule.strict_sharpe = v;
        }
        rule
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScreenSection {
    long_term: RuleOverrides,
    short_term: RuleOverrides,
    min_listing_days: Option<i64>,
    risk_free_rate: Option<f64>,
    entry_sensitivity: Option<Sensitivity>,
}

impl From<ScreenSection> for ScreenSettings {
    fn from(section: ScreenSection) -> Self {
        let defaults = ScreenSettings::default();
        ScreenSettings {
            long_term: section.long_term.apply(defaults.long_term),
            short_term: section.short_term.apply(defaults.short_term),
            min_listing_days: section.min_listing_days.unwrap_or(defaults.min_listing_days),
            risk_free_rate: section.risk_free_rate.unwrap_or(defaults.risk_free_rate),
            entry_sensitivity: section.entry_sensitivity.unwrap_or(defaults.entry_sensitivity),
        }
    }
}

/// `[screen]`: eligibility and per-strategy rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ScreenSection")]
pub struct ScreenSettings {
    pub long_term: ScreenRule,
    pub short_term: ScreenRule,
    /// Symbols listed fewer days than this before `dt` are ineligible.
    pub min_listing_days: i64,
    pub risk_free_rate: f64,
    /// Sensitivity used for the entry signal attached to each candidate.
    pub entry_sensitivity: Sensitivity,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            long_term: ScreenRule::long_term(),
            short_term: ScreenRule::short_term(),
            min_listing_days: 365,
            risk_free_rate: 0.02,
            entry_sensitivity: Sensitivity::Balanced,
        }
    }
}

impl ScreenSettings {
    pub fn rule(&self, strategy: StrategyType) -> &ScreenRule {
        match strategy {
            StrategyType::LongTerm => &self.long_term,
            StrategyType::ShortTerm => &self.short_term,
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the detector or screens cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.pivot.atr_period == 0 {
            return invalid("pivot.atr_period must be at least 1");
        }
        if self.pivot.zscore_window < 2 {
            return invalid("pivot.zscore_window must be at least 2");
        }
        if self.pivot.threads == Some(0) {
            return invalid("pivot.threads must be at least 1");
        }
        if self.cache.ttl_hours <= 0 {
            return invalid("cache.ttl_hours must be positive");
        }
        for (name, rule) in [("long_term", &self.screen.long_term), ("short_term", &self.screen.short_term)] {
            if rule.window_bars < 2 {
                return Err(ConfigError::Invalid(format!(
                    "screen.{name}.window_bars must be at least 2"
                )));
            }
            if rule.max_volatility.is_some_and(|max| max <= rule.min_volatility) {
                return Err(ConfigError::Invalid(format!(
                    "screen.{name}.max_volatility must exceed min_volatility"
                )));
            }
        }
        Ok(())
    }
}
