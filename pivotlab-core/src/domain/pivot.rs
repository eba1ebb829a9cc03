//! Persisted pivot records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::bar::Frequency;

/// Why a raw pivot was kept in, or dropped from, the filtered trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDecision {
    Kept,
    LowProminence,
    WeakConfirmation,
    LowZScore,
    /// Passed the thresholds but sat next to a more extreme pivot of the
    /// same type once its neighbours were filtered out.
    Alternation,
}

impl FilterDecision {
    pub fn is_kept(&self) -> bool {
        matches!(self, FilterDecision::Kept)
    }
}

/// Threshold values and filter outcome recorded alongside each pivot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotExtras {
    /// Swing threshold (fraction) active when the pivot was confirmed.
    pub threshold_pct: f64,
    pub base_swing_pct: f64,
    pub atr_multiplier: f64,
    /// Bar on which the retracement confirmed this pivot.
    pub confirmed_index: usize,
    pub confirmed_date: NaiveDate,
    pub decision: FilterDecision,
}

/// One confirmed local extremum, as handed to the persistence sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotPoint {
    pub dt: NaiveDate,
    pub code: String,
    pub frequency: Frequency,
    pub is_filtered: bool,
    pub is_high: bool,
    pub trade_date: NaiveDate,
    pub bar_index: usize,
    pub price: f64,
    pub prominence: f64,
    pub confirm_strength: f64,
    pub z_score: f64,
    /// ATR as a percentage of price at the confirming bar.
    pub atr_pct: f64,
    pub extras: PivotExtras,
}

/// Natural key: at most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PivotKey {
    pub dt: NaiveDate,
    pub code: String,
    pub frequency: Frequency,
    pub is_filtered: bool,
    pub is_high: bool,
    pub trade_date: NaiveDate,
}

impl PivotPoint {
    pub fn key(&self) -> PivotKey {
        PivotKey {
            dt: self.dt,
            code: self.code.clone(),
            frequency: self.frequency,
            is_filtered: self.is_filtered,
            is_high: self.is_high,
            trade_date: self.trade_date,
        }
    }
}
