//! Strategy candidate records and ranked pools.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::bar::Frequency;

/// Strategy whose pool a candidate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    LongTerm,
    ShortTerm,
}

impl StrategyType {
    pub const ALL: [StrategyType; 2] = [StrategyType::LongTerm, StrategyType::ShortTerm];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::LongTerm => "long_term",
            StrategyType::ShortTerm => "short_term",
        }
    }

    /// Bar frequency the strategy screens on.
    pub fn frequency(&self) -> Frequency {
        match self {
            StrategyType::LongTerm => Frequency::Weekly,
            StrategyType::ShortTerm => Frequency::Daily,
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long_term" | "long" => Ok(StrategyType::LongTerm),
            "short_term" | "short" => Ok(StrategyType::ShortTerm),
            other => Err(format!(
                "unknown strategy type '{other}' (expected long_term|short_term)"
            )),
        }
    }
}

/// Market capitalization bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCapCategory {
    LargeCap,
    MidCap,
    SmallCap,
}

/// Descriptive and windowed-metric fields of a candidate, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub code: String,
    pub name: String,
    pub market_cap_category: Option<MarketCapCategory>,
    /// Market value in units of 100 million.
    pub market_value: Option<f64>,
    pub ipo_date: Option<NaiveDate>,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub data_frequency: Frequency,
    pub data_window_days: usize,
    pub entry_date: Option<NaiveDate>,
    pub entry_price: Option<f64>,
    pub t2_date: Option<NaiveDate>,
    /// Strategy-specific explanatory fields.
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl CandidateProfile {
    /// Profile with only the identifying and metric fields populated.
    pub fn new(code: impl Into<String>, frequency: Frequency, window: usize) -> Self {
        Self {
            code: code.into(),
            name: String::new(),
            market_cap_category: None,
            market_value: None,
            ipo_date: None,
            volatility: 0.0,
            sharpe_ratio: 0.0,
            data_frequency: frequency,
            data_window_days: window,
            entry_date: None,
            entry_price: None,
            t2_date: None,
            extras: BTreeMap::new(),
        }
    }
}

/// One symbol's ranked membership in one strategy pool on one result date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCandidate {
    pub dt: NaiveDate,
    pub strategy_type: StrategyType,
    pub rank_in_dt: usize,
    pub score: f64,
    #[serde(flatten)]
    pub profile: CandidateProfile,
}

impl StrategyCandidate {
    pub fn code(&self) -> &str {
        &self.profile.code
    }
}

/// The full ranked pool for one `(dt, strategy_type)`. Committed as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePool {
    pub dt: NaiveDate,
    pub strategy_type: StrategyType,
    pub candidates: Vec<StrategyCandidate>,
}

impl CandidatePool {
    pub fn empty(dt: NaiveDate, strategy_type: StrategyType) -> Self {
        Self {
            dt,
            strategy_type,
            candidates: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Codes in rank order.
    pub fn codes(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.profile.code.clone()).collect()
    }

    pub fn get(&self, code: &str) -> Option<&StrategyCandidate> {
        self.candidates.iter().find(|c| c.profile.code == code)
    }
}
